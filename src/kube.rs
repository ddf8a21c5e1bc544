//! Cluster contract and a `kubectl`-backed implementation.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use std::{path::PathBuf, process::Stdio};
use tokio::{io::AsyncWriteExt, process::Command};

/// What is installed on the cluster the current context points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStatus {
    Unknown,
    Unmodified,
    FluxInstalled,
    WegoInstalled,
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_status(&self) -> ClusterStatus;

    async fn get_cluster_name(&self) -> Result<String>;

    async fn apply(&self, manifest: &[u8], namespace: &str) -> Result<()>;

    async fn secret_present(&self, name: &str, namespace: &str) -> Result<bool>;
}

pub struct Kubectl {
    bin: PathBuf,
}

struct Output {
    success: bool,
    stdout: String,
    stderr: String,
}

impl Kubectl {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Output> {
        debug!("kubectl {}", args.join(" "));
        let mut child = Command::new(&self.bin)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(format!("running {}", self.bin.display()))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await.context("writing manifest to kubectl")?;
        }

        let output = child.wait_with_output().await?;
        Ok(Output {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }

    async fn succeeds(&self, args: &[&str]) -> bool {
        matches!(self.run(args, None).await, Ok(Output { success: true, .. }))
    }
}

#[async_trait]
impl ClusterClient for Kubectl {
    async fn get_status(&self) -> ClusterStatus {
        if self.succeeds(&["get", "crd", "apps.wego.weave.works"]).await {
            ClusterStatus::WegoInstalled
        } else if self.succeeds(&["get", "namespace", "flux-system"]).await {
            ClusterStatus::FluxInstalled
        } else if self
            .succeeds(&["get", "deployment", "coredns", "-n", "kube-system"])
            .await
        {
            ClusterStatus::Unmodified
        } else {
            ClusterStatus::Unknown
        }
    }

    async fn get_cluster_name(&self) -> Result<String> {
        let out = self.run(&["config", "current-context"], None).await?;
        if !out.success {
            bail!("could not read the current context: {}", out.stderr);
        }
        Ok(out.stdout)
    }

    async fn apply(&self, manifest: &[u8], namespace: &str) -> Result<()> {
        let out = self
            .run(&["apply", "--namespace", namespace, "-f", "-"], Some(manifest))
            .await?;
        if !out.success {
            bail!("kubectl apply failed: {}", out.stderr);
        }
        debug!("{}", out.stdout);
        Ok(())
    }

    async fn secret_present(&self, name: &str, namespace: &str) -> Result<bool> {
        let out = self
            .run(&["get", "secret", name, "--namespace", namespace], None)
            .await?;
        match (out.success, out.stderr.contains("NotFound")) {
            (true, _) => Ok(true),
            (false, true) => Ok(false),
            (false, false) => bail!("could not look up secret {namespace}/{name}: {}", out.stderr),
        }
    }
}
