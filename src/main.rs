extern crate log;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{AddArgs, Command, GlobalOpts};
use std::sync::Arc;

mod app;
mod cli;
mod flux;
mod git;
mod github;
mod gitprovider;
mod kube;

use crate::{
    app::{
        landing::LandingResult, request::AddParamsBuilder, AddOutcome, AddParams, AppService,
    },
    flux::FluxCli,
    git::LocalWorktree,
    github::GithubClient,
    kube::Kubectl,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = cli::App::parse();
    let options = args.global_opts;

    match args.command {
        Command::Add(add) => {
            let params = add_params(add, &options)?;
            let mut service = AppService::new(
                Arc::new(Kubectl::new(&options.kubectl_bin)),
                Arc::new(FluxCli::new(&options.flux_bin)),
                Arc::new(GithubClient::new(
                    options.github_token.clone(),
                    options.github_host.as_deref(),
                )?),
                Box::new(LocalWorktree::new()),
            );

            let outcome = service.add_until(params, interrupted()).await?;
            report(&outcome);
        }
    }

    Ok(())
}

async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        // no signal handler, run to completion
        std::future::pending::<()>().await;
    }
}

fn add_params(args: AddArgs, options: &GlobalOpts) -> Result<AddParams> {
    let mut builder = AddParamsBuilder::default();
    builder
        .dir(args.dir)
        .path(args.path)
        .branch(args.branch)
        .deployment_type(args.deployment_type)
        .app_config_url(args.app_config_url)
        .auto_merge(args.auto_merge)
        .namespace(options.namespace.clone())
        .dry_run(options.dry_run);
    if let Some(url) = args.url {
        builder.url(url);
    }
    if let Some(chart) = args.chart {
        builder.chart(chart);
    }
    if let Some(name) = args.name {
        builder.name(name);
    }
    builder.build().context("Building add parameters")
}

fn report(outcome: &AddOutcome) {
    let name = &outcome.identity.name;
    match &outcome.result {
        LandingResult::Planned => {
            println!(
                "Dry run: {name} ({}) would land by {:?}",
                outcome.identity.hash, outcome.plan.mode
            );
            for manifest in outcome.manifests.iter() {
                let target = match &manifest.destination.path {
                    Some(path) if manifest.destination.apply => format!("cluster + {path}"),
                    Some(path) => path.clone(),
                    None => "cluster".to_owned(),
                };
                println!("---\n# {} -> {target}", manifest.name);
                print!("{}", String::from_utf8_lossy(&manifest.bytes));
            }
        }
        LandingResult::Applied => {
            println!("Applied {} manifests for {name}", outcome.manifests.to_apply().count())
        }
        LandingResult::Committed { hash } => println!("Committed {hash} for {name}"),
        LandingResult::Unchanged => println!("{name} is up to date."),
        LandingResult::PullRequest { url } => println!("PR: {}", url),
    }
}
