//! Manifest generation contract and a `flux`-backed implementation.
//!
//! Every call renders manifests with `--export`; nothing here touches the
//! cluster.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use log::debug;
use serde::Deserialize;
use std::{collections::BTreeMap, path::PathBuf};
use tokio::process::Command;

#[async_trait]
pub trait ManifestGenerator: Send + Sync {
    /// Generate an SSH keypair for `url` wrapped in a secret manifest.
    async fn create_secret_git(&self, name: &str, url: &str, namespace: &str) -> Result<Vec<u8>>;

    async fn create_source_git(
        &self,
        name: &str,
        url: &str,
        branch: &str,
        secret_ref: &str,
        namespace: &str,
    ) -> Result<Vec<u8>>;

    async fn create_source_helm(&self, name: &str, url: &str, namespace: &str) -> Result<Vec<u8>>;

    async fn create_kustomization(
        &self,
        name: &str,
        source: &str,
        path: &str,
        namespace: &str,
    ) -> Result<Vec<u8>>;

    async fn create_helm_release_git_repository(
        &self,
        name: &str,
        source: &str,
        path: &str,
        namespace: &str,
    ) -> Result<Vec<u8>>;

    async fn create_helm_release_helm_repository(
        &self,
        name: &str,
        chart: &str,
        namespace: &str,
    ) -> Result<Vec<u8>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretManifest {
    #[serde(default)]
    string_data: BTreeMap<String, String>,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

/// Pull the public half of the keypair out of a rendered git secret.
pub fn public_key_from_secret(manifest: &[u8]) -> Result<Vec<u8>> {
    let secret: SecretManifest =
        serde_yaml::from_slice(manifest).context("parsing generated secret")?;

    if let Some(key) = secret.string_data.get("identity.pub") {
        return Ok(key.trim().as_bytes().to_vec());
    }
    if let Some(encoded) = secret.data.get("identity.pub") {
        return STANDARD
            .decode(encoded.trim())
            .context("decoding identity.pub");
    }
    bail!("generated secret has no identity.pub")
}

pub struct FluxCli {
    bin: PathBuf,
}

impl FluxCli {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    async fn export(&self, args: &[&str]) -> Result<Vec<u8>> {
        debug!("flux {} --export", args.join(" "));
        let output = Command::new(&self.bin)
            .args(args)
            .arg("--export")
            .kill_on_drop(true)
            .output()
            .await
            .context(format!("running {}", self.bin.display()))?;

        if !output.status.success() {
            bail!(
                "flux {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl ManifestGenerator for FluxCli {
    async fn create_secret_git(&self, name: &str, url: &str, namespace: &str) -> Result<Vec<u8>> {
        self.export(&[
            "create",
            "secret",
            "git",
            name,
            &format!("--url={url}"),
            &format!("--namespace={namespace}"),
        ])
        .await
    }

    async fn create_source_git(
        &self,
        name: &str,
        url: &str,
        branch: &str,
        secret_ref: &str,
        namespace: &str,
    ) -> Result<Vec<u8>> {
        self.export(&[
            "create",
            "source",
            "git",
            name,
            &format!("--url={url}"),
            &format!("--branch={branch}"),
            &format!("--secret-ref={secret_ref}"),
            &format!("--namespace={namespace}"),
            "--interval=30s",
        ])
        .await
    }

    async fn create_source_helm(&self, name: &str, url: &str, namespace: &str) -> Result<Vec<u8>> {
        self.export(&[
            "create",
            "source",
            "helm",
            name,
            &format!("--url={url}"),
            &format!("--namespace={namespace}"),
            "--interval=30s",
        ])
        .await
    }

    async fn create_kustomization(
        &self,
        name: &str,
        source: &str,
        path: &str,
        namespace: &str,
    ) -> Result<Vec<u8>> {
        self.export(&[
            "create",
            "kustomization",
            name,
            &format!("--path={path}"),
            &format!("--source=GitRepository/{source}"),
            &format!("--namespace={namespace}"),
            "--prune=true",
            "--interval=1m",
        ])
        .await
    }

    async fn create_helm_release_git_repository(
        &self,
        name: &str,
        source: &str,
        path: &str,
        namespace: &str,
    ) -> Result<Vec<u8>> {
        self.export(&[
            "create",
            "helmrelease",
            name,
            &format!("--source=GitRepository/{source}"),
            &format!("--chart={path}"),
            &format!("--namespace={namespace}"),
            "--interval=5m",
        ])
        .await
    }

    async fn create_helm_release_helm_repository(
        &self,
        name: &str,
        chart: &str,
        namespace: &str,
    ) -> Result<Vec<u8>> {
        self.export(&[
            "create",
            "helmrelease",
            name,
            &format!("--source=HelmRepository/{name}"),
            &format!("--chart={chart}"),
            &format!("--namespace={namespace}"),
            "--interval=5m",
        ])
        .await
    }
}
