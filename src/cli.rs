use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Onboard git repositories and Helm charts as GitOps applications
#[derive(Debug, Parser)]
#[clap(name = "gitops-onboard", version)]
pub(crate) struct App {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub(crate) struct GlobalOpts {
    /// Print the manifests and the landing plan without changing anything
    #[arg(long, global = true, default_value_t = false)]
    pub dry_run: bool,

    /// The namespace the GitOps runtime lives in
    #[arg(short, long, global = true, default_value = "wego-system")]
    pub namespace: String,

    /// Personal access token for the git provider
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: String,

    /// GitHub Enterprise host, api.github.com when unset
    #[arg(long, env = "GITHUB_HOST")]
    pub github_host: Option<String>,

    #[arg(long, default_value = "flux")]
    pub flux_bin: PathBuf,

    #[arg(long, default_value = "kubectl")]
    pub kubectl_bin: PathBuf,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Add an application to the cluster and its config repository
    Add(AddArgs),
}

#[derive(Debug, Args)]
pub(crate) struct AddArgs {
    /// Local checkout of the application, used when --url is not given
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Name of the application, defaults to the repository or chart name
    #[arg(long)]
    pub name: Option<String>,

    /// URL of the application repository, or of the chart repository with --chart
    #[arg(long)]
    pub url: Option<String>,

    /// Path of the manifests inside the repository
    #[arg(long, default_value = "./")]
    pub path: String,

    #[arg(long, default_value = "main")]
    pub branch: String,

    /// kustomize or helm
    #[arg(long, default_value = "kustomize")]
    pub deployment_type: String,

    /// Helm chart to deploy from the --url chart repository
    #[arg(long)]
    pub chart: Option<String>,

    /// Repository for the generated manifests; NONE applies them to the
    /// cluster only, empty uses the application repository
    #[arg(long, default_value = "")]
    pub app_config_url: String,

    /// Push to the tracked branch instead of opening a pull request
    #[arg(long, default_value_t = false)]
    pub auto_merge: bool,
}
