//! The `add` workflow: onboard a git repository or a Helm chart as a GitOps
//! application.
//!
//! [`AppService::add`] runs one request through a fixed sequence of stages.
//! Each stage talks to the outside world only through the collaborator traits
//! it was constructed with, so every branch can be driven by in-memory fakes.

pub mod credentials;
mod error;
pub mod identity;
pub mod landing;
pub mod manifests;
pub mod repo_url;
pub mod request;
pub mod retry;
pub mod topology;

#[cfg(test)]
mod fakes;

use log::{debug, info, warn};
use std::{future::Future, sync::Arc};

pub use error::AddError;
pub use request::{AddParams, AddRequest, AppSource};

use self::{
    credentials::CredentialReconciler,
    identity::AppIdentity,
    landing::{Dispatcher, Landing, LandingPlan, LandingResult},
    manifests::{AppManifestSet, Assembler},
    repo_url::RepoUrl,
    request::SourceKind,
    retry::RetryPolicy,
    topology::ConfigTopology,
};
use crate::{
    flux::ManifestGenerator,
    git::GitWorktree,
    gitprovider::{GitProvider, ProviderError},
    kube::{ClusterClient, ClusterStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Validating,
    ResolvingTopology,
    ReconcilingCredential,
    Assembling,
    Landing,
    Done,
    Failed,
}

fn advance(stage: &mut Stage, next: Stage) {
    debug!("add: {stage:?} -> {next:?}");
    *stage = next;
}

/// What an `add` did, or would do on a dry run.
#[derive(Debug)]
pub struct AddOutcome {
    pub identity: AppIdentity,
    pub topology: ConfigTopology,
    pub plan: LandingPlan,
    pub manifests: AppManifestSet,
    pub result: LandingResult,
}

pub struct AppService {
    kube: Arc<dyn ClusterClient>,
    flux: Arc<dyn ManifestGenerator>,
    provider: Arc<dyn GitProvider>,
    git: Box<dyn GitWorktree>,
    retry: RetryPolicy,
}

impl AppService {
    pub fn new(
        kube: Arc<dyn ClusterClient>,
        flux: Arc<dyn ManifestGenerator>,
        provider: Arc<dyn GitProvider>,
        git: Box<dyn GitWorktree>,
    ) -> Self {
        Self {
            kube,
            flux,
            provider,
            git,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn add(&mut self, params: AddParams) -> Result<AddOutcome, AddError> {
        let mut stage = Stage::Validating;
        match self.run(params, &mut stage).await {
            Ok(outcome) => {
                advance(&mut stage, Stage::Done);
                Ok(outcome)
            }
            Err(e) => {
                warn!("add failed while {stage:?}: {e}");
                advance(&mut stage, Stage::Failed);
                Err(e)
            }
        }
    }

    /// Like [`add`](Self::add), but gives up with [`AddError::Cancelled`] as
    /// soon as `signal` completes. In-flight collaborator calls are dropped
    /// and running clones or pushes are told to abort.
    pub async fn add_until<F>(&mut self, params: AddParams, signal: F) -> Result<AddOutcome, AddError>
    where
        F: Future<Output = ()>,
    {
        let transfers = self.git.cancel_flag();
        tokio::select! {
            outcome = self.add(params) => outcome,
            _ = signal => {
                transfers.cancel();
                warn!("add cancelled");
                Err(AddError::Cancelled)
            }
        }
    }

    async fn run(&mut self, params: AddParams, stage: &mut Stage) -> Result<AddOutcome, AddError> {
        let request = params.validate()?;

        match self.kube.get_status().await {
            ClusterStatus::WegoInstalled => {}
            ClusterStatus::Unmodified | ClusterStatus::FluxInstalled => {
                return Err(AddError::ClusterState(
                    "Wego not installed... exiting".to_owned(),
                ))
            }
            ClusterStatus::Unknown => {
                return Err(AddError::ClusterState(
                    "Wego can not determine cluster status... exiting".to_owned(),
                ))
            }
        }

        let (source, local_checkout) = self.resolve_source(&request).await?;
        let cluster = self
            .kube
            .get_cluster_name()
            .await
            .map_err(|e| AddError::cluster("failed to get cluster name", e))?;
        let identity = AppIdentity::new(&request, &source);

        advance(stage, Stage::ResolvingTopology);
        let topology = topology::resolve(&request, &source, &identity.name, &cluster)?;
        let plan = landing::plan(&topology, &request);
        info!("Adding {} ({}) with {topology}", identity.name, identity.hash);

        if let ConfigTopology::ExternalConfigRepo { repo, .. } = &topology {
            if !request.dry_run {
                self.ensure_config_repo(repo).await?;
            }
        }

        advance(stage, Stage::ReconcilingCredential);
        if request.dry_run {
            debug!("dry run, skipping deploy keys");
        } else {
            let reconciler = CredentialReconciler::new(
                &*self.kube,
                &*self.flux,
                &*self.provider,
                self.retry,
                &cluster,
                &request.namespace,
            );
            for repo in repos_needing_keys(&source, &topology) {
                reconciler.ensure(repo).await?;
            }
        }

        advance(stage, Stage::Assembling);
        let manifests = Assembler::new(&*self.flux)
            .build(&identity, &request, &source, &topology, &cluster)
            .await?;

        advance(stage, Stage::Landing);
        let result = Dispatcher::new(&*self.kube, &*self.provider, &mut *self.git)
            .land(
                &plan,
                &Landing {
                    request: &request,
                    identity: &identity,
                    topology: &topology,
                    manifests: &manifests,
                    local_checkout,
                },
            )
            .await?;

        Ok(AddOutcome {
            identity,
            topology,
            plan,
            manifests,
            result,
        })
    }

    /// The source of the app, and whether it was read from the checkout at
    /// `request.dir`.
    async fn resolve_source(&mut self, request: &AddRequest) -> Result<(AppSource, bool), AddError> {
        match (request.source, &request.url, &request.chart) {
            (SourceKind::Helm, Some(url), Some(chart)) => Ok((
                AppSource::Helm {
                    url: url.clone(),
                    chart: chart.clone(),
                },
                false,
            )),
            (SourceKind::Helm, _, _) => Err(AddError::Validation(
                "a chart needs the url of its chart repository".to_owned(),
            )),
            (SourceKind::Git, Some(url), _) => Ok((AppSource::Git(RepoUrl::parse(url)?), false)),
            (SourceKind::Git, None, _) => {
                let dir = request.dir.display().to_string();
                debug!("no url given, reading origin of {dir}");
                self.git
                    .open(&request.dir)
                    .await
                    .map_err(|e| AddError::git("open", &dir, e))?;
                let url = self
                    .git
                    .origin_url()
                    .await
                    .map_err(|e| AddError::git("remote", &dir, e))?;
                Ok((AppSource::Git(RepoUrl::parse(&url)?), true))
            }
        }
    }

    async fn ensure_config_repo(&self, repo: &RepoUrl) -> Result<(), AddError> {
        let exists = self
            .provider
            .repository_exists(repo.name(), repo.owner())
            .await
            .map_err(|e| AddError::provider(format!("failed to look up repository {repo}"), e))?;
        if exists {
            return Ok(());
        }

        info!("Creating config repository {repo}");
        self.provider
            .create_repository(repo.name(), repo.owner(), true)
            .await
            .map_err(|e| AddError::provider(format!("failed to create repository {repo}"), e))?;

        let (provider, owner, name) = (&*self.provider, repo.owner(), repo.name());
        let visible = self
            .retry
            .poll("repository", move || async move {
                provider.repository_exists(name, owner).await
            })
            .await
            .map_err(|e| AddError::provider(format!("failed to look up repository {repo}"), e))?;
        if !visible {
            return Err(AddError::provider(
                format!("repository {repo} not visible after {:?}", self.retry.ceiling),
                ProviderError::NotFound,
            ));
        }
        Ok(())
    }
}

/// Git repositories the cluster has to read, each once.
fn repos_needing_keys<'a>(source: &'a AppSource, topology: &'a ConfigTopology) -> Vec<&'a RepoUrl> {
    let mut repos = Vec::new();
    if let AppSource::Git(repo) = source {
        repos.push(repo);
    }
    if let ConfigTopology::ExternalConfigRepo { repo, .. } = topology {
        if !repos.contains(&repo) {
            repos.push(repo);
        }
    }
    repos
}
