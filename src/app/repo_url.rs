use regex::Regex;
use std::{fmt, sync::OnceLock};
use url::Url;

use super::AddError;

/// A git repository location reduced to the parts every collaborator needs.
///
/// HTTPS, `ssh://` and scp-like (`git@host:owner/repo.git`) forms all parse to
/// the same value, so comparing two `RepoUrl`s compares repositories rather
/// than spellings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoUrl {
    host: String,
    owner: String,
    name: String,
}

/// `[user@]host:owner/repo`
fn scp_like() -> &'static Regex {
    static SCP_LIKE: OnceLock<Regex> = OnceLock::new();
    SCP_LIKE.get_or_init(|| {
        Regex::new(r"^(?:[\w.-]+@)?([\w.-]+):([^/].*)$").expect("scp-like pattern compiles")
    })
}

impl RepoUrl {
    pub fn parse(raw: &str) -> Result<Self, AddError> {
        let raw = raw.trim();

        let (host, path) = match Url::parse(raw) {
            Ok(url) if url.has_host() => (
                url.host_str().unwrap_or_default().to_owned(),
                url.path().to_owned(),
            ),
            _ => match scp_like().captures(raw) {
                Some(caps) => (caps[1].to_owned(), caps[2].to_owned()),
                None => {
                    return Err(AddError::Validation(format!(
                        "failed to retrieve owner: {raw} is not a git repository url"
                    )))
                }
            },
        };

        let segments: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        match segments.as_slice() {
            [owner @ .., name] if !owner.is_empty() => Ok(Self {
                host,
                owner: owner.join("/"),
                name: name.trim_end_matches(".git").to_owned(),
            }),
            _ => Err(AddError::Validation(format!(
                "failed to retrieve owner: no owner in {raw}"
            ))),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `ssh://git@<host>/<owner>/<name>.git`, the only form that works with a
    /// deploy key.
    pub fn ssh_url(&self) -> String {
        format!("ssh://git@{}/{}/{}.git", self.host, self.owner, self.name)
    }
}

impl fmt::Display for RepoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}
