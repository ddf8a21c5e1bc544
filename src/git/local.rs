//! [`GitWorktree`] on top of libgit2.
//!
//! Network operations (clone, push) authenticate through the running ssh-agent,
//! which is where the deploy key's private half is expected to be loaded when
//! this runs outside a cluster.

use async_trait::async_trait;
use git2::{
    build::RepoBuilder, Cred, ErrorCode, FetchOptions, Index, IndexEntry, IndexTime, Oid,
    PushOptions, RemoteCallbacks, Repository, RepositoryInitOptions, Signature, StatusOptions,
};
use log::{debug, info};
use std::{
    fs,
    path::{Path, PathBuf},
};

use super::{CancelFlag, Commit, CommitFilter, GitError, GitWorktree};

const REGULAR_FILE: u32 = 0o100644;

#[derive(Debug, Default)]
pub struct LocalWorktree {
    dir: Option<PathBuf>,
    cancel: CancelFlag,
}

impl LocalWorktree {
    pub fn new() -> Self {
        Self::default()
    }

    fn repository(&self) -> Result<Repository, GitError> {
        let dir = self.dir.as_ref().ok_or(GitError::NoRepository)?;
        Ok(Repository::open(dir)?)
    }

    fn workdir(repo: &Repository) -> Result<PathBuf, GitError> {
        repo.workdir()
            .map(Path::to_path_buf)
            .ok_or(GitError::BareRepository)
    }
}

fn callbacks<'a>(cancel: &CancelFlag) -> RemoteCallbacks<'a> {
    let mut rc = RemoteCallbacks::new();
    rc.credentials(|_url, username, _allowed| Cred::ssh_key_from_agent(username.unwrap_or("git")));

    // Returning false or an error makes libgit2 abort the transfer.
    let fetching = cancel.clone();
    rc.transfer_progress(move |_| !fetching.is_cancelled());
    let pushing = cancel.clone();
    rc.push_negotiation(move |_| {
        if pushing.is_cancelled() {
            return Err(git2::Error::from_str("push cancelled"));
        }
        Ok(())
    });
    rc
}

fn blob_entry(path: &str, id: Oid, size: usize, mode: u32) -> IndexEntry {
    IndexEntry {
        ctime: IndexTime::new(0, 0),
        mtime: IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode,
        uid: 0,
        gid: 0,
        file_size: size as u32,
        id,
        flags: 0,
        flags_extended: 0,
        path: path.as_bytes().to_vec(),
    }
}

fn relative(path: &str) -> &str {
    path.trim_start_matches('/')
}

#[async_trait]
impl GitWorktree for LocalWorktree {
    async fn init(&mut self, dir: &Path, origin_url: &str, branch: &str) -> Result<bool, GitError> {
        if Repository::open(dir).is_ok() {
            if self.dir.as_deref() == Some(dir) {
                return Ok(false);
            }
            return Err(GitError::RepositoryAlreadyExists);
        }

        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(branch);
        let repo = Repository::init_opts(dir, &opts)?;
        repo.remote("origin", origin_url)?;

        debug!("initialised {} with origin {origin_url}", dir.display());
        self.dir = Some(dir.to_path_buf());
        Ok(true)
    }

    async fn open(&mut self, dir: &Path) -> Result<(), GitError> {
        match Repository::open(dir) {
            Ok(_) => {
                self.dir = Some(dir.to_path_buf());
                Ok(())
            }
            Err(e) if e.code() == ErrorCode::NotFound => Err(GitError::RepositoryDoesNotExist),
            Err(e) => Err(e.into()),
        }
    }

    async fn clone_repo(&mut self, dir: &Path, url: &str, branch: &str) -> Result<bool, GitError> {
        if self.cancel.is_cancelled() {
            return Err(GitError::Cancelled);
        }
        info!("cloning {url}@{branch} into {}", dir.display());
        let (target, remote, reference) = (dir.to_path_buf(), url.to_owned(), branch.to_owned());
        let cancel = self.cancel.clone();

        let cloned = tokio::task::spawn_blocking(move || {
            let mut fo = FetchOptions::new();
            fo.remote_callbacks(callbacks(&cancel));
            RepoBuilder::new()
                .branch(&reference)
                .fetch_options(fo)
                .clone(&remote, &target)
                .map(drop)
        })
        .await?;

        match cloned {
            Ok(()) => {
                self.dir = Some(dir.to_path_buf());
                Ok(true)
            }
            Err(_) if self.cancel.is_cancelled() => Err(GitError::Cancelled),
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!("branch {branch} not found on {url}, initialising instead");
                let leftover = dir.join(".git");
                if leftover.exists() {
                    fs::remove_dir_all(leftover)?;
                }
                self.init(dir, url, branch).await?;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<(), GitError> {
        let repo = self.repository()?;
        let target = Self::workdir(&repo)?.join(relative(path));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), GitError> {
        let repo = self.repository()?;
        let target = Self::workdir(&repo)?.join(relative(path));
        fs::remove_file(target)?;
        Ok(())
    }

    async fn commit(
        &self,
        commit: &Commit,
        filter: Option<&CommitFilter>,
    ) -> Result<String, GitError> {
        let repo = self.repository()?;
        let workdir = Self::workdir(&repo)?;

        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);

        let mut changed = Vec::new();
        for entry in repo.statuses(Some(&mut opts))?.iter() {
            let Some(path) = entry.path() else { continue };
            if filter.map_or(false, |f| !f.accepts(path)) {
                debug!("skipping {path}");
                continue;
            }
            changed.push(path.to_owned());
        }
        if changed.is_empty() {
            return Err(GitError::NoStagedFiles);
        }

        let mut index = repo.index()?;
        for path in &changed {
            if workdir.join(path).is_file() {
                index.add_path(Path::new(path))?;
            } else {
                index.remove_path(Path::new(path))?;
            }
        }
        index.write()?;

        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };

        let tree_id = match filter {
            None => index.write_tree()?,
            Some(_) => {
                let mut scoped = Index::new()?;
                if let Some(parent) = &parent {
                    scoped.read_tree(&parent.tree()?)?;
                }
                for path in &changed {
                    let file = workdir.join(path);
                    if !file.is_file() {
                        scoped.remove_path(Path::new(path))?;
                        continue;
                    }
                    let content = fs::read(&file)?;
                    let mode = scoped
                        .get_path(Path::new(path), 0)
                        .map_or(REGULAR_FILE, |e| e.mode);
                    let id = repo.blob(&content)?;
                    scoped.add(&blob_entry(path, id, content.len(), mode))?;
                }
                scoped.write_tree_to(&repo)?
            }
        };
        if parent.as_ref().map(|p| p.tree_id()) == Some(tree_id) {
            return Err(GitError::NoStagedFiles);
        }

        let tree = repo.find_tree(tree_id)?;
        let signature = Signature::now(&commit.author.name, &commit.author.email)?;

        let parents: Vec<_> = parent.iter().collect();

        let oid = repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            &commit.message,
            &tree,
            &parents,
        )?;
        Ok(oid.to_string())
    }

    async fn status(&self) -> Result<bool, GitError> {
        let repo = self.repository()?;
        Self::workdir(&repo)?;

        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let clean = repo.statuses(Some(&mut opts))?.is_empty();
        Ok(clean)
    }

    async fn head(&self) -> Result<String, GitError> {
        let repo = self.repository()?;
        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                return Err(GitError::ReferenceNotFound)
            }
            Err(e) => return Err(e.into()),
        };
        head.target()
            .map(|oid| oid.to_string())
            .ok_or(GitError::ReferenceNotFound)
    }

    async fn push(&self) -> Result<(), GitError> {
        let repo = self.repository()?;
        if repo.find_remote("origin").is_err() {
            return Err(GitError::RemoteNotFound);
        }
        let branch = match repo.head() {
            Ok(head) => head.shorthand().unwrap_or_default().to_owned(),
            Err(_) => return Err(GitError::ReferenceNotFound),
        };
        let dir = repo.path().to_path_buf();
        drop(repo);
        if self.cancel.is_cancelled() {
            return Err(GitError::Cancelled);
        }

        info!("pushing {branch} to origin");
        let cancel = self.cancel.clone();
        let pushed = tokio::task::spawn_blocking(move || -> Result<(), git2::Error> {
            let repo = Repository::open(dir)?;
            let mut remote = repo.find_remote("origin")?;
            let mut po = PushOptions::new();
            po.remote_callbacks(callbacks(&cancel));
            let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
            remote.push(&[refspec.as_str()], Some(&mut po))
        })
        .await?;

        match pushed {
            Ok(()) => Ok(()),
            Err(_) if self.cancel.is_cancelled() => Err(GitError::Cancelled),
            Err(e) => Err(e.into()),
        }
    }

    async fn current_branch(&self) -> Result<String, GitError> {
        let repo = self.repository()?;
        let head = repo.find_reference("HEAD")?;
        head.symbolic_target()
            .and_then(|target| target.strip_prefix("refs/heads/"))
            .map(str::to_owned)
            .ok_or(GitError::ReferenceNotFound)
    }

    async fn origin_url(&self) -> Result<String, GitError> {
        let repo = self.repository()?;
        let remote = repo
            .find_remote("origin")
            .map_err(|_| GitError::RemoteNotFound)?;
        remote
            .url()
            .map(str::to_owned)
            .ok_or(GitError::RemoteNotFound)
    }

    fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}
