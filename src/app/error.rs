use thiserror::Error;

use crate::{git::GitError, gitprovider::ProviderError};

/// Everything that can stop an `add`.
///
/// Nothing here is retried by the caller's behalf; the variants carry enough
/// context (repository, branch, step) to act on without re-running.
#[derive(Debug, Error)]
pub enum AddError {
    /// Malformed or contradictory request.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The cluster is not ready for onboarding.
    #[error("{0}")]
    ClusterState(String),

    /// Talking to the cluster failed.
    #[error("{context}: {source:#}")]
    Cluster {
        context: String,
        source: anyhow::Error,
    },

    /// Deploy key or secret could not be created or verified.
    #[error("deploy key {key} for repository {repo}: {reason}")]
    Credential {
        key: String,
        repo: String,
        reason: String,
    },

    #[error("git {step} failed for {repo}: {source}")]
    GitOperation {
        step: &'static str,
        repo: String,
        source: GitError,
    },

    #[error("{context}: {source}")]
    Provider {
        context: String,
        source: ProviderError,
    },

    /// The manifest generator could not render a manifest.
    #[error("failed to generate {what} manifest for {name}: {source:#}")]
    Assembly {
        what: &'static str,
        name: String,
        source: anyhow::Error,
    },

    #[error("add cancelled")]
    Cancelled,
}

impl AddError {
    pub(crate) fn git(step: &'static str, repo: impl Into<String>, source: GitError) -> Self {
        Self::GitOperation {
            step,
            repo: repo.into(),
            source,
        }
    }

    pub(crate) fn provider(context: impl Into<String>, source: ProviderError) -> Self {
        Self::Provider {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn cluster(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Cluster {
            context: context.into(),
            source,
        }
    }
}
