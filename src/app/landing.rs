use itertools::Itertools;
use log::{debug, info};
use std::path::Path;

use super::{
    identity::AppIdentity,
    manifests::AppManifestSet,
    request::AddRequest,
    topology::ConfigTopology,
    AddError,
};
use crate::{
    git::{Author, Commit, GitError, GitWorktree},
    gitprovider::{CommitFile, GitProvider, PullRequestInfo, RepositoryRef},
    kube::ClusterClient,
};

pub const COMMIT_MESSAGE: &str = "Add App manifests";

pub fn commit_author() -> Author {
    Author {
        name: "Weave Gitops".to_owned(),
        email: "weave-gitops@weave.works".to_owned(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandingMode {
    ApplyToCluster,
    CommitAndPush,
    OpenPullRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandingPlan {
    pub mode: LandingMode,
    pub dry_run: bool,
    pub target_paths: Vec<String>,
}

pub fn plan(topology: &ConfigTopology, request: &AddRequest) -> LandingPlan {
    let mode = match (topology, request.auto_merge) {
        (ConfigTopology::NoConfigRepo, _) => LandingMode::ApplyToCluster,
        (_, true) => LandingMode::CommitAndPush,
        (_, false) => LandingMode::OpenPullRequest,
    };
    LandingPlan {
        mode,
        dry_run: request.dry_run,
        target_paths: topology
            .paths()
            .map(|paths| paths.all().iter().map(|p| p.to_string()).collect())
            .unwrap_or_default(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LandingResult {
    /// Dry run: nothing was touched.
    Planned,
    Applied,
    Committed { hash: String },
    /// The config repository already held these manifests.
    Unchanged,
    PullRequest { url: String },
}

/// Everything the dispatcher lands, already resolved.
pub struct Landing<'a> {
    pub request: &'a AddRequest,
    pub identity: &'a AppIdentity,
    pub topology: &'a ConfigTopology,
    pub manifests: &'a AppManifestSet,
    /// The app repository is the checkout at `request.dir`.
    pub local_checkout: bool,
}

pub struct Dispatcher<'a> {
    kube: &'a dyn ClusterClient,
    provider: &'a dyn GitProvider,
    git: &'a mut dyn GitWorktree,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        kube: &'a dyn ClusterClient,
        provider: &'a dyn GitProvider,
        git: &'a mut dyn GitWorktree,
    ) -> Self {
        Self {
            kube,
            provider,
            git,
        }
    }

    pub async fn land(
        &mut self,
        plan: &LandingPlan,
        landing: &Landing<'_>,
    ) -> Result<LandingResult, AddError> {
        if plan.dry_run {
            debug!("dry run, landing {:?} skipped", plan.mode);
            return Ok(LandingResult::Planned);
        }

        self.apply(landing).await?;

        let repo = match (plan.mode, landing.topology.config_repo()) {
            (LandingMode::ApplyToCluster, _) | (_, None) => return Ok(LandingResult::Applied),
            (_, Some(repo)) => repo,
        };

        match plan.mode {
            LandingMode::CommitAndPush => self.commit_and_push(landing).await,
            _ => self.open_pull_request(repo.owner(), repo.name(), landing).await,
        }
    }

    async fn apply(&self, landing: &Landing<'_>) -> Result<(), AddError> {
        let to_apply = landing.manifests.to_apply().collect_vec();
        if to_apply.is_empty() {
            return Ok(());
        }
        info!(
            "Applying {} to the cluster",
            to_apply.iter().map(|m| m.name.as_str()).join(", ")
        );
        for manifest in to_apply {
            self.kube
                .apply(&manifest.bytes, &manifest.namespace)
                .await
                .map_err(|source| {
                    AddError::cluster(format!("applying {:?} {}", manifest.kind, manifest.name), source)
                })?;
        }
        Ok(())
    }

    async fn commit_and_push(&mut self, landing: &Landing<'_>) -> Result<LandingResult, AddError> {
        let topology = landing.topology;
        let repo = topology
            .config_repo()
            .map(|r| r.to_string())
            .unwrap_or_default();

        // Dropped after the push.
        let scratch;
        if landing.local_checkout && matches!(topology, ConfigTopology::ConfigInAppRepo { .. }) {
            self.git
                .open(&landing.request.dir)
                .await
                .map_err(|e| AddError::git("open", &repo, e))?;
            // The push goes to the checked out branch, which must be the tracked one.
            let checked_out = self
                .git
                .current_branch()
                .await
                .map_err(|e| AddError::git("branch", &repo, e))?;
            if checked_out != landing.request.branch {
                return Err(AddError::git(
                    "branch",
                    &repo,
                    GitError::BranchMismatch {
                        expected: landing.request.branch.clone(),
                        actual: checked_out,
                    },
                ));
            }
        } else {
            scratch = tempfile::Builder::new()
                .prefix("user-repo-")
                .tempdir()
                .map_err(|e| AddError::git("clone", &repo, e.into()))?;
            self.clone_config_repo(scratch.path(), landing).await?;
        }

        for (path, bytes) in landing.manifests.files() {
            self.git
                .write(path, bytes)
                .await
                .map_err(|e| AddError::git("write", &repo, e))?;
        }

        let commit = Commit {
            author: commit_author(),
            message: COMMIT_MESSAGE.to_owned(),
        };
        let filter = topology.commit_filter();
        let hash = match self.git.commit(&commit, filter.as_ref()).await {
            Ok(hash) => hash,
            Err(GitError::NoStagedFiles) => {
                let clean = self
                    .git
                    .status()
                    .await
                    .map_err(|e| AddError::git("status", &repo, e))?;
                if clean {
                    info!("{repo} already has these manifests, nothing to commit");
                    return Ok(LandingResult::Unchanged);
                }
                return Err(AddError::git("commit", &repo, GitError::NoStagedFiles));
            }
            Err(e) => return Err(AddError::git("commit", &repo, e)),
        };

        info!("Pushing app manifests to {repo}");
        self.git
            .push()
            .await
            .map_err(|e| AddError::git("push", &repo, e))?;

        Ok(LandingResult::Committed { hash })
    }

    async fn clone_config_repo(&mut self, dir: &Path, landing: &Landing<'_>) -> Result<(), AddError> {
        let Some(repo) = landing.topology.config_repo() else {
            return Ok(());
        };
        info!("Cloning {} into {}", repo.ssh_url(), dir.display());
        self.git
            .clone_repo(dir, &repo.ssh_url(), &landing.request.branch)
            .await
            .map_err(|e| AddError::git("clone", repo.to_string(), e))?;
        Ok(())
    }

    async fn open_pull_request(
        &self,
        owner: &str,
        name: &str,
        landing: &Landing<'_>,
    ) -> Result<LandingResult, AddError> {
        let account = self
            .provider
            .get_account_type(owner)
            .await
            .map_err(|e| AddError::provider(format!("failed to retrieve account type for {owner}"), e))?;
        let repo = RepositoryRef::new(account, owner, name);

        let target = self
            .provider
            .get_default_branch(&repo)
            .await
            .map_err(|e| AddError::provider(format!("failed to retrieve default branch of {repo}"), e))?;

        let files = landing
            .manifests
            .files()
            .map(|(path, bytes)| CommitFile {
                path: path.to_owned(),
                content: String::from_utf8_lossy(bytes).into_owned(),
            })
            .collect_vec();
        let app = &landing.identity.name;
        let info = PullRequestInfo {
            title: format!("Wego add {app}"),
            description: format!("Added yamls for {app}"),
            commit_message: COMMIT_MESSAGE.to_owned(),
        };
        let new_branch = &landing.identity.hash;

        info!("Opening pull request {new_branch} -> {target} on {repo}");
        let pr = self
            .provider
            .create_pull_request(&repo, &target, new_branch, &files, &info)
            .await
            .map_err(|e| {
                AddError::provider(
                    format!("failed to create pull request {new_branch} -> {target} on {repo}"),
                    e,
                )
            })?;

        info!("Pull Request created: {}", pr.url);
        Ok(LandingResult::PullRequest { url: pr.url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{repo_url::RepoUrl, request::AddParamsBuilder, topology::ManifestPaths};

    fn request(auto_merge: bool, dry_run: bool) -> AddRequest {
        AddParamsBuilder::default()
            .url("https://github.com/foo/bar")
            .auto_merge(auto_merge)
            .dry_run(dry_run)
            .build()
            .unwrap()
            .validate()
            .unwrap()
    }

    fn in_app() -> ConfigTopology {
        ConfigTopology::ConfigInAppRepo {
            repo: RepoUrl::parse("https://github.com/foo/bar").unwrap(),
            paths: ManifestPaths::new(".wego", "bar", "kind"),
        }
    }

    #[test]
    fn plan_follows_topology_and_flags() {
        assert_eq!(
            plan(&ConfigTopology::NoConfigRepo, &request(true, false)).mode,
            LandingMode::ApplyToCluster
        );
        assert_eq!(plan(&in_app(), &request(true, false)).mode, LandingMode::CommitAndPush);
        assert_eq!(plan(&in_app(), &request(false, false)).mode, LandingMode::OpenPullRequest);

        let dry = plan(&in_app(), &request(false, true));
        assert!(dry.dry_run);
        assert_eq!(
            dry.target_paths,
            vec![
                ".wego/targets/kind/bar/bar-gitops-source.yaml",
                ".wego/targets/kind/bar/bar-gitops-deploy.yaml",
                ".wego/apps/bar/app.yaml",
            ]
        );
    }

    #[test]
    fn no_config_repo_has_no_target_paths() {
        assert!(plan(&ConfigTopology::NoConfigRepo, &request(false, false))
            .target_paths
            .is_empty());
    }
}
