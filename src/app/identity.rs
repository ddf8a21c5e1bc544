use sha2::{Digest, Sha256};

use super::request::{AddRequest, AppSource};

/// Label carrying the application hash on the Application descriptor.
pub const APP_IDENTIFIER_LABEL: &str = "wego.weave.works/app-identifier";

const HASH_PREFIX: &str = "wego-";

/// Hex digest of the concatenated inputs.
///
/// The digest is cut to 128 bits so the prefixed value still fits a
/// Kubernetes label value.
pub fn hash(url_or_chart: &str, path_or_name: &str, branch: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url_or_chart.as_bytes());
    hasher.update(path_or_name.as_bytes());
    hasher.update(branch.as_bytes());

    hasher.finalize()[..16]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub name: String,
    pub hash: String,
}

impl AppIdentity {
    pub fn new(request: &AddRequest, source: &AppSource) -> Self {
        let name = request.name.clone().unwrap_or_else(|| match source {
            AppSource::Git(repo) => repo.name().to_owned(),
            AppSource::Helm { chart, .. } => chart.clone(),
        });

        let digest = match source {
            AppSource::Git(repo) => hash(&repo.ssh_url(), &request.path, &request.branch),
            AppSource::Helm { url, .. } => hash(url, &name, &request.branch),
        };

        Self {
            name,
            hash: format!("{HASH_PREFIX}{digest}"),
        }
    }
}
