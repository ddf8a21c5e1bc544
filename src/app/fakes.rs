//! In-memory collaborators that record every call.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::{
    flux::ManifestGenerator,
    git::{CancelFlag, Commit, CommitFilter, GitError, GitWorktree},
    gitprovider::{
        AccountType, CommitFile, GitProvider, ProviderError, PullRequest, PullRequestInfo,
        RepositoryRef,
    },
    kube::{ClusterClient, ClusterStatus},
};

pub struct FakeCluster {
    pub status: ClusterStatus,
    pub name: String,
    pub secrets: Mutex<BTreeSet<String>>,
    pub applied: Mutex<Vec<(String, Vec<u8>)>>,
    /// `get_status` never returns.
    pub hang: bool,
}

impl FakeCluster {
    pub fn new(status: ClusterStatus) -> Self {
        Self {
            status,
            name: "kind-kind".to_owned(),
            secrets: Mutex::default(),
            applied: Mutex::default(),
            hang: false,
        }
    }

    pub fn with_secret(self, name: &str) -> Self {
        self.secrets.lock().unwrap().insert(name.to_owned());
        self
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .map(|(_, bytes)| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_status(&self) -> ClusterStatus {
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.status
    }

    async fn get_cluster_name(&self) -> Result<String> {
        Ok(self.name.clone())
    }

    async fn apply(&self, manifest: &[u8], namespace: &str) -> Result<()> {
        self.applied
            .lock()
            .unwrap()
            .push((namespace.to_owned(), manifest.to_vec()));
        Ok(())
    }

    async fn secret_present(&self, name: &str, _namespace: &str) -> Result<bool> {
        Ok(self.secrets.lock().unwrap().contains(name))
    }
}

/// Renders one-line manifests that name the call and its arguments.
#[derive(Default)]
pub struct FakeFlux {
    pub calls: Mutex<Vec<String>>,
    pub fail: bool,
}

impl FakeFlux {
    fn render(&self, line: String) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(line.clone());
        if self.fail {
            return Err(anyhow!("flux exploded"));
        }
        Ok(format!("{line}\n").into_bytes())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ManifestGenerator for FakeFlux {
    async fn create_secret_git(&self, name: &str, url: &str, namespace: &str) -> Result<Vec<u8>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("secret {name} {url} {namespace}"));
        Ok(format!(
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: {name}\nstringData:\n  identity: private\n  identity.pub: ssh-ed25519 {name}\n"
        )
        .into_bytes())
    }

    async fn create_source_git(
        &self,
        name: &str,
        url: &str,
        branch: &str,
        secret_ref: &str,
        namespace: &str,
    ) -> Result<Vec<u8>> {
        self.render(format!(
            "source git {name} {url} {branch} {secret_ref} {namespace}"
        ))
    }

    async fn create_source_helm(&self, name: &str, url: &str, namespace: &str) -> Result<Vec<u8>> {
        self.render(format!("source helm {name} {url} {namespace}"))
    }

    async fn create_kustomization(
        &self,
        name: &str,
        source: &str,
        path: &str,
        namespace: &str,
    ) -> Result<Vec<u8>> {
        self.render(format!("kustomization {name} {source} {path} {namespace}"))
    }

    async fn create_helm_release_git_repository(
        &self,
        name: &str,
        source: &str,
        path: &str,
        namespace: &str,
    ) -> Result<Vec<u8>> {
        self.render(format!("helmrelease git {name} {source} {path} {namespace}"))
    }

    async fn create_helm_release_helm_repository(
        &self,
        name: &str,
        chart: &str,
        namespace: &str,
    ) -> Result<Vec<u8>> {
        self.render(format!("helmrelease helm {name} {chart} {namespace}"))
    }
}

pub struct FakeProvider {
    pub account: Option<AccountType>,
    pub repos: Mutex<BTreeSet<String>>,
    pub keys: Mutex<BTreeSet<String>>,
    /// Answer uploads with `KeyInUse`.
    pub key_in_use: bool,
    /// Uploaded keys never show up in `deploy_key_exists`.
    pub keys_invisible: bool,
    /// Created repositories never show up in `repository_exists`.
    pub repos_invisible: bool,
    pub uploads: Mutex<Vec<(String, Vec<u8>)>>,
    pub created_repos: Mutex<Vec<(String, bool)>>,
    pub pull_requests: Mutex<Vec<RecordedPullRequest>>,
}

#[derive(Debug, Clone)]
pub struct RecordedPullRequest {
    pub repo: RepositoryRef,
    pub target_branch: String,
    pub new_branch: String,
    pub files: Vec<CommitFile>,
    pub info: PullRequestInfo,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            account: Some(AccountType::User),
            repos: Mutex::default(),
            keys: Mutex::default(),
            key_in_use: false,
            keys_invisible: false,
            repos_invisible: false,
            uploads: Mutex::default(),
            created_repos: Mutex::default(),
            pull_requests: Mutex::default(),
        }
    }
}

impl FakeProvider {
    pub fn with_repo(self, full_name: &str) -> Self {
        self.repos.lock().unwrap().insert(full_name.to_owned());
        self
    }

    pub fn with_key(self, full_name: &str) -> Self {
        self.keys.lock().unwrap().insert(full_name.to_owned());
        self
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn pull_requests(&self) -> Vec<RecordedPullRequest> {
        self.pull_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitProvider for FakeProvider {
    async fn repository_exists(&self, name: &str, owner: &str) -> Result<bool, ProviderError> {
        Ok(self.repos.lock().unwrap().contains(&format!("{owner}/{name}")))
    }

    async fn create_repository(
        &self,
        name: &str,
        owner: &str,
        private: bool,
    ) -> Result<(), ProviderError> {
        let full_name = format!("{owner}/{name}");
        self.created_repos
            .lock()
            .unwrap()
            .push((full_name.clone(), private));
        if !self.repos_invisible {
            self.repos.lock().unwrap().insert(full_name);
        }
        Ok(())
    }

    async fn get_account_type(&self, owner: &str) -> Result<AccountType, ProviderError> {
        self.account.ok_or_else(|| anyhow!("no account {owner}").into())
    }

    async fn deploy_key_exists(&self, owner: &str, repo: &str) -> Result<bool, ProviderError> {
        Ok(self.keys.lock().unwrap().contains(&format!("{owner}/{repo}")))
    }

    async fn upload_deploy_key(
        &self,
        owner: &str,
        repo: &str,
        key: &[u8],
    ) -> Result<(), ProviderError> {
        let full_name = format!("{owner}/{repo}");
        self.uploads
            .lock()
            .unwrap()
            .push((full_name.clone(), key.to_vec()));
        if self.key_in_use {
            return Err(ProviderError::KeyInUse);
        }
        if !self.keys_invisible {
            self.keys.lock().unwrap().insert(full_name);
        }
        Ok(())
    }

    async fn get_default_branch(&self, _repo: &RepositoryRef) -> Result<String, ProviderError> {
        Ok("main".to_owned())
    }

    async fn create_pull_request(
        &self,
        repo: &RepositoryRef,
        target_branch: &str,
        new_branch: &str,
        files: &[CommitFile],
        info: &PullRequestInfo,
    ) -> Result<PullRequest, ProviderError> {
        self.pull_requests.lock().unwrap().push(RecordedPullRequest {
            repo: repo.clone(),
            target_branch: target_branch.to_owned(),
            new_branch: new_branch.to_owned(),
            files: files.to_vec(),
            info: info.clone(),
        });
        Ok(PullRequest {
            url: format!("https://github.com/{repo}/pull/1"),
        })
    }
}

/// State shared between a [`FakeWorktree`] and the test inspecting it.
#[derive(Debug, Default)]
pub struct WorktreeLog {
    pub calls: Vec<String>,
    pub dir: Option<PathBuf>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub filters: Vec<Option<CommitFilter>>,
    pub origin: Option<String>,
    /// Every commit reports nothing staged.
    pub nothing_to_commit: bool,
    /// `status` reports a clean worktree.
    pub clean: bool,
    /// Checked out branch, `main` when unset.
    pub branch: Option<String>,
}

#[derive(Clone, Default)]
pub struct FakeWorktree {
    pub log: Arc<Mutex<WorktreeLog>>,
    pub cancel: CancelFlag,
}

impl FakeWorktree {
    pub fn with_origin(origin: &str) -> Self {
        let fake = Self::default();
        fake.log.lock().unwrap().origin = Some(origin.to_owned());
        fake
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) {
        self.log.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl GitWorktree for FakeWorktree {
    async fn init(&mut self, dir: &Path, origin_url: &str, branch: &str) -> Result<bool, GitError> {
        self.record(format!("init {origin_url} {branch}"));
        self.log.lock().unwrap().dir = Some(dir.to_owned());
        Ok(true)
    }

    async fn open(&mut self, dir: &Path) -> Result<(), GitError> {
        self.record("open".to_owned());
        let mut log = self.log.lock().unwrap();
        if log.origin.is_none() {
            return Err(GitError::RepositoryDoesNotExist);
        }
        log.dir = Some(dir.to_owned());
        Ok(())
    }

    async fn clone_repo(&mut self, dir: &Path, url: &str, branch: &str) -> Result<bool, GitError> {
        self.record(format!("clone {url} {branch}"));
        self.log.lock().unwrap().dir = Some(dir.to_owned());
        Ok(true)
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<(), GitError> {
        self.record(format!("write {path}"));
        self.log
            .lock()
            .unwrap()
            .files
            .insert(path.to_owned(), content.to_vec());
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), GitError> {
        self.record(format!("remove {path}"));
        self.log.lock().unwrap().files.remove(path);
        Ok(())
    }

    async fn commit(
        &self,
        commit: &Commit,
        filter: Option<&CommitFilter>,
    ) -> Result<String, GitError> {
        self.record(format!("commit {}", commit.message));
        let mut log = self.log.lock().unwrap();
        log.filters.push(filter.cloned());
        if log.nothing_to_commit {
            return Err(GitError::NoStagedFiles);
        }
        Ok("3a1f2b4c".to_owned())
    }

    async fn status(&self) -> Result<bool, GitError> {
        self.record("status".to_owned());
        Ok(self.log.lock().unwrap().clean)
    }

    async fn head(&self) -> Result<String, GitError> {
        Ok("3a1f2b4c".to_owned())
    }

    async fn current_branch(&self) -> Result<String, GitError> {
        Ok(self
            .log
            .lock()
            .unwrap()
            .branch
            .clone()
            .unwrap_or_else(|| "main".to_owned()))
    }

    async fn push(&self) -> Result<(), GitError> {
        self.record("push".to_owned());
        Ok(())
    }

    async fn origin_url(&self) -> Result<String, GitError> {
        self.log
            .lock()
            .unwrap()
            .origin
            .clone()
            .ok_or(GitError::RemoteNotFound)
    }

    fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}
