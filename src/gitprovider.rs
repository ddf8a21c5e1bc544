//! Hosted git provider contract.
//!
//! The onboarding workflow never talks to a provider API directly; it goes
//! through [`GitProvider`], which `github::GithubClient` implements for GitHub
//! and the test fakes implement in memory.

use async_trait::async_trait;
use thiserror::Error;

/// Title of the deploy key this tool manages on every repository.
pub const DEPLOY_KEY_NAME: &str = "weave-gitops-deploy-key";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not found")]
    NotFound,

    /// The deploy key is already registered on the repository.
    #[error("key is already in use")]
    KeyInUse,

    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    User,
    Organization,
}

/// A repository addressed through the kind of account that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryRef {
    User { login: String, name: String },
    Organization { org: String, name: String },
}

impl RepositoryRef {
    pub fn new(account: AccountType, owner: impl Into<String>, name: impl Into<String>) -> Self {
        match account {
            AccountType::User => Self::User {
                login: owner.into(),
                name: name.into(),
            },
            AccountType::Organization => Self::Organization {
                org: owner.into(),
                name: name.into(),
            },
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            Self::User { login, .. } => login,
            Self::Organization { org, .. } => org,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::User { name, .. } | Self::Organization { name, .. } => name,
        }
    }
}

impl std::fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner(), self.name())
    }
}

/// A file to commit through the provider API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestInfo {
    pub title: String,
    pub description: String,
    pub commit_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub url: String,
}

#[async_trait]
pub trait GitProvider: Send + Sync {
    async fn repository_exists(&self, name: &str, owner: &str) -> Result<bool, ProviderError>;

    async fn create_repository(
        &self,
        name: &str,
        owner: &str,
        private: bool,
    ) -> Result<(), ProviderError>;

    async fn get_account_type(&self, owner: &str) -> Result<AccountType, ProviderError>;

    async fn deploy_key_exists(&self, owner: &str, repo: &str) -> Result<bool, ProviderError>;

    async fn upload_deploy_key(
        &self,
        owner: &str,
        repo: &str,
        key: &[u8],
    ) -> Result<(), ProviderError>;

    async fn get_default_branch(&self, repo: &RepositoryRef) -> Result<String, ProviderError>;

    /// Branch `new_branch` off the tip of `target_branch`, commit `files` to it
    /// and open a pull request back into `target_branch`.
    async fn create_pull_request(
        &self,
        repo: &RepositoryRef,
        target_branch: &str,
        new_branch: &str,
        files: &[CommitFile],
        info: &PullRequestInfo,
    ) -> Result<PullRequest, ProviderError>;
}
