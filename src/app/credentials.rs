use log::{debug, info};

use super::{repo_url::RepoUrl, retry::RetryPolicy, AddError};
use crate::{
    flux::{public_key_from_secret, ManifestGenerator},
    gitprovider::{GitProvider, ProviderError, DEPLOY_KEY_NAME},
    kube::ClusterClient,
};

/// The deploy key of one repository and the cluster secret holding its
/// private half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployCredential {
    pub owner: String,
    pub repo: String,
    pub secret_ref: String,
    /// Only known when this run generated the key.
    pub public_key: Option<Vec<u8>>,
}

/// Secret name for a repository on a cluster.
pub fn secret_name(cluster: &str, repo: &str) -> String {
    let raw = format!("weave-gitops-{cluster}-{repo}").to_ascii_lowercase();
    raw.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' | '.' => c,
            _ => '-',
        })
        .collect()
}

fn credential_error(repo: &RepoUrl, reason: impl std::fmt::Display) -> AddError {
    AddError::Credential {
        key: DEPLOY_KEY_NAME.to_owned(),
        repo: repo.to_string(),
        reason: reason.to_string(),
    }
}

pub struct CredentialReconciler<'a> {
    kube: &'a dyn ClusterClient,
    flux: &'a dyn ManifestGenerator,
    provider: &'a dyn GitProvider,
    retry: RetryPolicy,
    cluster: &'a str,
    namespace: &'a str,
}

impl<'a> CredentialReconciler<'a> {
    pub fn new(
        kube: &'a dyn ClusterClient,
        flux: &'a dyn ManifestGenerator,
        provider: &'a dyn GitProvider,
        retry: RetryPolicy,
        cluster: &'a str,
        namespace: &'a str,
    ) -> Self {
        Self {
            kube,
            flux,
            provider,
            retry,
            cluster,
            namespace,
        }
    }

    /// Make sure `repo` has a deploy key whose private half is a secret on the
    /// cluster. Does nothing when both already exist.
    pub async fn ensure(&self, repo: &RepoUrl) -> Result<DeployCredential, AddError> {
        let secret_ref = secret_name(self.cluster, repo.name());
        let mut credential = DeployCredential {
            owner: repo.owner().to_owned(),
            repo: repo.name().to_owned(),
            secret_ref: secret_ref.clone(),
            public_key: None,
        };

        let secret_present = self
            .kube
            .secret_present(&secret_ref, self.namespace)
            .await
            .map_err(|e| credential_error(repo, format!("checking secret {secret_ref}: {e:#}")))?;
        let key_present = self
            .provider
            .deploy_key_exists(repo.owner(), repo.name())
            .await
            .map_err(|e| credential_error(repo, format!("checking deploy key: {e}")))?;

        if secret_present && key_present {
            debug!("deploy key and secret {secret_ref} already exist for {repo}");
            return Ok(credential);
        }

        info!("Generating deploy key for repo {repo}");
        let secret = self
            .flux
            .create_secret_git(&secret_ref, &repo.ssh_url(), self.namespace)
            .await
            .map_err(|source| AddError::Assembly {
                what: "secret",
                name: secret_ref.clone(),
                source,
            })?;
        let public_key =
            public_key_from_secret(&secret).map_err(|e| credential_error(repo, format!("{e:#}")))?;

        self.kube
            .apply(&secret, self.namespace)
            .await
            .map_err(|source| AddError::cluster(format!("applying secret {secret_ref}"), source))?;

        info!("Uploading deploy key to {repo}");
        match self
            .provider
            .upload_deploy_key(repo.owner(), repo.name(), &public_key)
            .await
        {
            Ok(()) => {}
            Err(ProviderError::KeyInUse) => {
                debug!("deploy key for {repo} is already in use");
                credential.public_key = Some(public_key);
                return Ok(credential);
            }
            Err(e) => return Err(credential_error(repo, format!("uploading: {e}"))),
        }

        let (provider, owner, name) = (self.provider, repo.owner(), repo.name());
        let visible = self
            .retry
            .poll("deploy key", move || async move {
                match provider.deploy_key_exists(owner, name).await {
                    Err(ProviderError::KeyInUse) => Ok(true),
                    other => other,
                }
            })
            .await
            .map_err(|e| credential_error(repo, format!("waiting for the key: {e}")))?;

        if !visible {
            return Err(credential_error(
                repo,
                format!("not visible after {:?}", self.retry.ceiling),
            ));
        }

        credential.public_key = Some(public_key);
        Ok(credential)
    }
}
