//! Working tree contract.
//!
//! One [`GitWorktree`] handles one checkout at a time: `init`, `open` or
//! `clone_repo` select it, every other call acts on it.

pub mod local;

use async_trait::async_trait;
use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use thiserror::Error;

pub use local::LocalWorktree;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("no git repository")]
    NoRepository,

    #[error("repository does not exist")]
    RepositoryDoesNotExist,

    #[error("repository already exists")]
    RepositoryAlreadyExists,

    #[error("reference not found")]
    ReferenceNotFound,

    #[error("remote not found")]
    RemoteNotFound,

    #[error("no staged files")]
    NoStagedFiles,

    #[error("checked out branch is {actual}, expected {expected}")]
    BranchMismatch { expected: String, actual: String },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("failed to open the worktree: worktree not available in a bare repository")]
    BareRepository,

    #[error(transparent)]
    Git2(#[from] git2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("git task did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub author: Author,
    pub message: String,
}

/// Shared switch that stops clones and pushes mid-transfer.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Decides which changed paths a commit stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitFilter {
    /// Stage only paths under this directory.
    Prefix(String),
}

impl CommitFilter {
    pub fn accepts(&self, path: &str) -> bool {
        match self {
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

#[async_trait]
pub trait GitWorktree: Send + Sync {
    /// Initialise `dir` with an `origin` remote. Returns `false` when this
    /// worktree already initialised `dir`.
    async fn init(&mut self, dir: &Path, origin_url: &str, branch: &str) -> Result<bool, GitError>;

    async fn open(&mut self, dir: &Path) -> Result<(), GitError>;

    /// Clone `branch` of `url` into `dir`. When the remote has no such branch
    /// the directory is initialised instead and `false` is returned.
    async fn clone_repo(&mut self, dir: &Path, url: &str, branch: &str) -> Result<bool, GitError>;

    async fn write(&self, path: &str, content: &[u8]) -> Result<(), GitError>;

    async fn remove(&self, path: &str) -> Result<(), GitError>;

    /// Stage every changed path the filter accepts and commit them. Fails
    /// with [`GitError::NoStagedFiles`] when nothing was staged.
    ///
    /// With a filter the commit holds `HEAD` plus the accepted paths only.
    /// Anything else already in the index stays staged, uncommitted.
    async fn commit(&self, commit: &Commit, filter: Option<&CommitFilter>)
        -> Result<String, GitError>;

    /// `true` when the worktree has no changes.
    async fn status(&self) -> Result<bool, GitError>;

    async fn head(&self) -> Result<String, GitError>;

    /// Name of the checked out branch, born or not.
    async fn current_branch(&self) -> Result<String, GitError>;

    async fn push(&self) -> Result<(), GitError>;

    async fn origin_url(&self) -> Result<String, GitError>;

    /// Flag that aborts this worktree's network transfers once set.
    fn cancel_flag(&self) -> CancelFlag;
}
