use std::fmt;

use super::{
    repo_url::RepoUrl,
    request::{AddRequest, AppSource, ConfigRepoChoice},
    AddError,
};
use crate::git::CommitFilter;

/// Directory inside an application's own repository that holds its config.
pub const RESERVED_DIR: &str = ".wego";

/// Where the manifests of one application go inside the config repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPaths {
    pub apps_dir: String,
    pub target_dir: String,
    pub app_yaml: String,
    pub source_yaml: String,
    pub deploy_yaml: String,
}

impl ManifestPaths {
    pub fn new(root: &str, name: &str, cluster: &str) -> Self {
        let under_root = |path: String| match root {
            "" => path,
            root => format!("{root}/{path}"),
        };
        let apps_dir = under_root(format!("apps/{name}"));
        let target_dir = under_root(format!("targets/{cluster}/{name}"));

        Self {
            app_yaml: format!("{apps_dir}/app.yaml"),
            source_yaml: format!("{target_dir}/{name}-gitops-source.yaml"),
            deploy_yaml: format!("{target_dir}/{name}-gitops-deploy.yaml"),
            apps_dir,
            target_dir,
        }
    }

    pub fn all(&self) -> [&str; 3] {
        [&self.source_yaml, &self.deploy_yaml, &self.app_yaml]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigTopology {
    NoConfigRepo,
    ConfigInAppRepo {
        repo: RepoUrl,
        paths: ManifestPaths,
    },
    ExternalConfigRepo {
        repo: RepoUrl,
        paths: ManifestPaths,
    },
}

impl ConfigTopology {
    pub fn paths(&self) -> Option<&ManifestPaths> {
        match self {
            Self::NoConfigRepo => None,
            Self::ConfigInAppRepo { paths, .. } | Self::ExternalConfigRepo { paths, .. } => {
                Some(paths)
            }
        }
    }

    /// The repository the manifests are written into.
    pub fn config_repo(&self) -> Option<&RepoUrl> {
        match self {
            Self::NoConfigRepo => None,
            Self::ConfigInAppRepo { repo, .. } | Self::ExternalConfigRepo { repo, .. } => {
                Some(repo)
            }
        }
    }

    /// Which changed paths a commit into the config repository may stage.
    pub fn commit_filter(&self) -> Option<CommitFilter> {
        match self {
            Self::ConfigInAppRepo { .. } => Some(CommitFilter::Prefix(format!("{RESERVED_DIR}/"))),
            Self::ExternalConfigRepo { .. } | Self::NoConfigRepo => None,
        }
    }
}

impl fmt::Display for ConfigTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoConfigRepo => f.write_str("no config repository"),
            Self::ConfigInAppRepo { repo, .. } => write!(f, "config in app repository {repo}"),
            Self::ExternalConfigRepo { repo, .. } => {
                write!(f, "external config repository {repo}")
            }
        }
    }
}

pub fn resolve(
    request: &AddRequest,
    source: &AppSource,
    name: &str,
    cluster: &str,
) -> Result<ConfigTopology, AddError> {
    let config_url = match (&request.config, source) {
        (ConfigRepoChoice::None, _) => return Ok(ConfigTopology::NoConfigRepo),
        // A chart repository cannot hold configuration.
        (ConfigRepoChoice::Default, AppSource::Helm { .. }) => {
            return Ok(ConfigTopology::NoConfigRepo)
        }
        (ConfigRepoChoice::Default, AppSource::Git(repo)) => {
            return Ok(ConfigTopology::ConfigInAppRepo {
                repo: repo.clone(),
                paths: ManifestPaths::new(RESERVED_DIR, name, cluster),
            })
        }
        (ConfigRepoChoice::Url(url), _) => url,
    };

    if let AppSource::Helm { url, .. } = source {
        if url.trim_end_matches('/') == config_url.trim_end_matches('/') {
            return Err(AddError::Validation(format!(
                "config url {config_url} is the chart repository; it cannot hold configuration"
            )));
        }
    }

    let config = RepoUrl::parse(config_url)?;
    match source {
        AppSource::Git(repo) if *repo == config => Ok(ConfigTopology::ConfigInAppRepo {
            repo: config,
            paths: ManifestPaths::new(RESERVED_DIR, name, cluster),
        }),
        _ => Ok(ConfigTopology::ExternalConfigRepo {
            repo: config,
            paths: ManifestPaths::new("", name, cluster),
        }),
    }
}
