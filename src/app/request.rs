use derive_builder::Builder;
use std::{fmt, path::PathBuf, str::FromStr};

use super::{repo_url::RepoUrl, AddError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Git,
    Helm,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Git => "git",
            Self::Helm => "helm",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentKind {
    Kustomize,
    Helm,
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Kustomize => "kustomize",
            Self::Helm => "helm",
        })
    }
}

impl FromStr for DeploymentKind {
    type Err = AddError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kustomize" => Ok(Self::Kustomize),
            "helm" => Ok(Self::Helm),
            other => Err(AddError::Validation(format!(
                "invalid deployment type: {other}; must be one of kustomize, helm"
            ))),
        }
    }
}

/// What the caller said about the configuration repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigRepoChoice {
    /// `NONE`: apply straight to the cluster.
    None,
    /// Nothing given: fall back to the application's own repository.
    Default,
    Url(String),
}

impl From<&str> for ConfigRepoChoice {
    fn from(raw: &str) -> Self {
        match raw.trim() {
            "" => Self::Default,
            none if none.eq_ignore_ascii_case("none") => Self::None,
            url => Self::Url(url.to_owned()),
        }
    }
}

/// Raw `add` input as it arrives from the command line.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), default)]
pub struct AddParams {
    #[builder(setter(into, strip_option))]
    pub url: Option<String>,
    #[builder(setter(into, strip_option))]
    pub chart: Option<String>,
    pub path: String,
    pub branch: String,
    pub dir: PathBuf,
    pub deployment_type: String,
    pub namespace: String,
    #[builder(setter(into, strip_option))]
    pub name: Option<String>,
    pub app_config_url: String,
    pub auto_merge: bool,
    pub dry_run: bool,
}

impl Default for AddParams {
    fn default() -> Self {
        Self {
            url: None,
            chart: None,
            path: "./".to_owned(),
            branch: "main".to_owned(),
            dir: PathBuf::from("."),
            deployment_type: DeploymentKind::Kustomize.to_string(),
            namespace: "wego-system".to_owned(),
            name: None,
            app_config_url: String::new(),
            auto_merge: false,
            dry_run: false,
        }
    }
}

/// A validated `add` request. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    pub url: Option<String>,
    pub chart: Option<String>,
    pub path: String,
    pub branch: String,
    pub dir: PathBuf,
    pub deployment: DeploymentKind,
    pub namespace: String,
    pub name: Option<String>,
    pub config: ConfigRepoChoice,
    pub auto_merge: bool,
    pub dry_run: bool,
    pub source: SourceKind,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl AddParams {
    pub fn validate(self) -> Result<AddRequest, AddError> {
        let url = non_empty(self.url);
        let chart = non_empty(self.chart);
        let source = match chart {
            Some(_) => SourceKind::Helm,
            None => SourceKind::Git,
        };

        let requested: DeploymentKind = self.deployment_type.parse()?;
        let deployment = match source {
            SourceKind::Helm => DeploymentKind::Helm,
            SourceKind::Git => requested,
        };

        if source == SourceKind::Helm && url.is_none() {
            return Err(AddError::Validation(
                "a chart needs the url of its chart repository".to_owned(),
            ));
        }
        if self.namespace.trim().is_empty() {
            return Err(AddError::Validation("namespace must not be empty".to_owned()));
        }
        if self.branch.trim().is_empty() {
            return Err(AddError::Validation("branch must not be empty".to_owned()));
        }

        Ok(AddRequest {
            url,
            chart,
            path: self.path,
            branch: self.branch,
            dir: self.dir,
            deployment,
            namespace: self.namespace,
            name: non_empty(self.name),
            config: self.app_config_url.as_str().into(),
            auto_merge: self.auto_merge,
            dry_run: self.dry_run,
            source,
        })
    }
}

/// Where the deployable unit comes from, once the source URL is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppSource {
    Git(RepoUrl),
    Helm { url: String, chart: String },
}

impl AppSource {
    /// The URL embedded in manifests: SSH for git, verbatim for charts.
    pub fn url(&self) -> String {
        match self {
            Self::Git(repo) => repo.ssh_url(),
            Self::Helm { url, .. } => url.clone(),
        }
    }
}
