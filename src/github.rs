use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use http::Uri;
use log::{debug, info};
use octocrab::{
    map_github_error,
    models::repos::{Object, Ref},
    params::repos::Reference,
    Octocrab,
};
use serde::Deserialize;
use serde_json::json;

use crate::gitprovider::{
    AccountType, CommitFile, GitProvider, ProviderError, PullRequest, PullRequestInfo,
    RepositoryRef, DEPLOY_KEY_NAME,
};

pub struct GithubClient {
    client: Octocrab,
}

impl std::ops::Deref for GithubClient {
    type Target = Octocrab;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[derive(Debug, Deserialize)]
struct DeployKey {
    title: String,
}

#[derive(Debug, Deserialize)]
struct Sha {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitCommit {
    tree: Sha,
}

impl GithubClient {
    /// `host` is the API host of a GitHub Enterprise instance; `None` talks to
    /// github.com.
    pub fn new(token: String, host: Option<&str>) -> Result<Self> {
        let mut builder = Octocrab::builder().personal_token(token);
        if let Some(host) = host {
            builder = builder
                .base_uri(format!("https://{host}/api/v3"))
                .context(format!("Invalid GitHub host {host}"))?;
        }
        let client = builder.build().context("Building GitHub client")?;
        Ok(Self { client })
    }

    pub async fn get_sha_for_ref(
        &self,
        owner: &str,
        repo: &str,
        reference: &Reference,
    ) -> Result<String> {
        let ref_object = self.repos(owner, repo).get_ref(reference).await?;

        match ref_object.object {
            Object::Commit { sha, url: _ } => Ok(sha),
            _ => Err(anyhow!("could not get sha for ref {}", reference)),
        }
    }

    pub async fn branch_from_ref(
        &self,
        owner: &str,
        repo: &str,
        branch_name: &str,
        reference: &Reference,
    ) -> Result<Ref> {
        self.repos(owner, repo)
            .create_ref(
                &Reference::Branch(branch_name.to_string()),
                self.get_sha_for_ref(owner, repo, reference).await?,
            )
            .await
            .map_err(anyhow::Error::from)
    }

    pub async fn delete_ref_if_exists(
        &self,
        owner: &str,
        repo: &str,
        reference: &Reference,
    ) -> Result<()> {
        match self.repos(owner, repo).get_ref(reference).await {
            Ok(_) => self.delete_ref(owner, repo, reference).await,
            Err(_) => Ok(()),
        }
    }

    pub async fn delete_ref(&self, owner: &str, repo: &str, reference: &Reference) -> Result<()> {
        let route = format!("/repos/{owner}/{repo}/git/refs/{}", reference.ref_url(),);
        let uri = Uri::builder()
            .path_and_query(&route)
            .build()
            .context("buidling path")?;
        map_github_error(self._delete(uri, None::<&()>).await?)
            .await
            .map(drop)
            .context(format!("Error deleting ref {route}"))
    }

    /// Commit `files` on top of `branch` as a single commit through the git
    /// data API, then move the branch to it.
    async fn commit_files(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        files: &[CommitFile],
        message: &str,
    ) -> Result<String> {
        let parent = self
            .get_sha_for_ref(owner, repo, &Reference::Branch(branch.to_owned()))
            .await?;

        let base: GitCommit = self
            .get(format!("/repos/{owner}/{repo}/git/commits/{parent}"), None::<&()>)
            .await
            .context(format!("Reading commit {parent}"))?;

        let entries: Vec<_> = files
            .iter()
            .map(|file| {
                json!({
                    "path": file.path,
                    "mode": "100644",
                    "type": "blob",
                    "content": file.content,
                })
            })
            .collect();

        let tree: Sha = self
            .post(
                format!("/repos/{owner}/{repo}/git/trees"),
                Some(&json!({ "base_tree": base.tree.sha, "tree": entries })),
            )
            .await
            .context("Creating tree")?;

        let commit: Sha = self
            .post(
                format!("/repos/{owner}/{repo}/git/commits"),
                Some(&json!({
                    "message": message,
                    "tree": tree.sha,
                    "parents": [parent],
                })),
            )
            .await
            .context("Creating commit")?;

        let _: Ref = self
            .patch(
                format!("/repos/{owner}/{repo}/git/refs/heads/{branch}"),
                Some(&json!({ "sha": commit.sha, "force": false })),
            )
            .await
            .context(format!("Moving {branch} to {}", commit.sha))?;

        Ok(commit.sha)
    }
}

/// GitHub reports a missing resource as a 404 with the message "Not Found".
fn is_not_found(err: &octocrab::Error) -> bool {
    matches!(err, octocrab::Error::GitHub { source, .. } if source.message == "Not Found")
}

/// Registering a key GitHub already knows about fails with a 422 whose
/// validation errors say "key is already in use".
fn is_key_in_use(err: &octocrab::Error) -> bool {
    match err {
        octocrab::Error::GitHub { source, .. } => {
            source.message.contains("key is already in use")
                || source
                    .errors
                    .iter()
                    .flatten()
                    .any(|e| e.to_string().contains("key is already in use"))
        }
        _ => false,
    }
}

#[async_trait]
impl GitProvider for GithubClient {
    async fn repository_exists(&self, name: &str, owner: &str) -> Result<bool, ProviderError> {
        match self.repos(owner, name).get().await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(anyhow::Error::from(e)
                .context(format!("Fetching repo {owner}/{name}"))
                .into()),
        }
    }

    async fn create_repository(
        &self,
        name: &str,
        owner: &str,
        private: bool,
    ) -> Result<(), ProviderError> {
        let route = match self.get_account_type(owner).await? {
            AccountType::Organization => format!("/orgs/{owner}/repos"),
            AccountType::User => "/user/repos".to_owned(),
        };
        let body = json!({
            "name": name,
            "private": private,
            "description": "Weave Gitops repo",
            "auto_init": true,
            "license_template": "apache-2.0",
        });

        let _: octocrab::models::Repository = self
            .post(route, Some(&body))
            .await
            .context(format!("Creating repo {owner}/{name}"))?;
        Ok(())
    }

    async fn get_account_type(&self, owner: &str) -> Result<AccountType, ProviderError> {
        match self.orgs(owner).get().await {
            Ok(_) => Ok(AccountType::Organization),
            Err(e) if is_not_found(&e) => Ok(AccountType::User),
            Err(e) => Err(anyhow::Error::from(e)
                .context(format!("could not get account type for {owner}"))
                .into()),
        }
    }

    async fn deploy_key_exists(&self, owner: &str, repo: &str) -> Result<bool, ProviderError> {
        let keys: Vec<DeployKey> = match self
            .get(format!("/repos/{owner}/{repo}/keys"), None::<&()>)
            .await
        {
            Ok(keys) => keys,
            Err(e) if is_not_found(&e) => return Err(ProviderError::NotFound),
            Err(e) => {
                return Err(anyhow::Error::from(e)
                    .context(format!("Listing deploy keys for {owner}/{repo}"))
                    .into())
            }
        };

        Ok(keys.iter().any(|key| key.title == DEPLOY_KEY_NAME))
    }

    async fn upload_deploy_key(
        &self,
        owner: &str,
        repo: &str,
        key: &[u8],
    ) -> Result<(), ProviderError> {
        info!("uploading deploy key to {owner}/{repo}");
        let body = json!({
            "title": DEPLOY_KEY_NAME,
            "key": String::from_utf8_lossy(key).trim(),
            "read_only": false,
        });

        let result: std::result::Result<serde_json::Value, _> = self
            .post(format!("/repos/{owner}/{repo}/keys"), Some(&body))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_key_in_use(&e) => Err(ProviderError::KeyInUse),
            Err(e) => Err(anyhow::Error::from(e)
                .context(format!("Uploading deploy key to {owner}/{repo}"))
                .into()),
        }
    }

    async fn get_default_branch(&self, repo: &RepositoryRef) -> Result<String, ProviderError> {
        let (owner, name) = (repo.owner(), repo.name());
        let repository = self
            .repos(owner, name)
            .get()
            .await
            .context(format!("Fetching repo {owner}/{name}"))?;

        Ok(repository
            .default_branch
            .context(format!("No default branch for {owner}/{name}"))?)
    }

    async fn create_pull_request(
        &self,
        repo: &RepositoryRef,
        target_branch: &str,
        new_branch: &str,
        files: &[CommitFile],
        info: &PullRequestInfo,
    ) -> Result<PullRequest, ProviderError> {
        let (owner, repo_name) = match repo {
            RepositoryRef::User { login, name } => (login.as_str(), name.as_str()),
            RepositoryRef::Organization { org, name } => (org.as_str(), name.as_str()),
        };
        debug!("opening pull request {new_branch} -> {target_branch} on {repo}");

        self.delete_ref_if_exists(
            owner,
            repo_name,
            &Reference::Branch(new_branch.to_string()),
        )
        .await?;

        self.branch_from_ref(
            owner,
            repo_name,
            new_branch,
            &Reference::Branch(target_branch.to_string()),
        )
        .await
        .context(format!(
            "error creating branch[{new_branch}] for repo[{repo}]"
        ))?;

        self.commit_files(owner, repo_name, new_branch, files, &info.commit_message)
            .await
            .context(format!(
                "error creating commit for branch[{new_branch}] for repo[{repo}]"
            ))?;

        let pr = self
            .pulls(owner, repo_name)
            .create(&info.title, new_branch, target_branch)
            .body(&info.description)
            .send()
            .await
            .context(format!(
                "error creating pull request[{}] for branch[{new_branch}] for repo[{repo}]",
                info.title
            ))?;

        Ok(PullRequest {
            url: pr
                .html_url
                .context("PR should have a html url")?
                .to_string(),
        })
    }
}
