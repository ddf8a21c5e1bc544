use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    credentials::secret_name,
    identity::{AppIdentity, APP_IDENTIFIER_LABEL},
    request::{AddRequest, AppSource, DeploymentKind},
    topology::ConfigTopology,
    AddError,
};
use crate::flux::ManifestGenerator;

/// Sorted by reconciliation order: sources, then workloads, then the
/// application descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ManifestKind {
    Source,
    Workload,
    AppDescriptor,
}

/// Where a manifest ends up. A manifest can be both applied and written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub apply: bool,
    pub path: Option<String>,
}

impl Destination {
    fn cluster() -> Self {
        Self {
            apply: true,
            path: None,
        }
    }

    fn repo(path: &str) -> Self {
        Self {
            apply: false,
            path: Some(path.to_owned()),
        }
    }

    fn both(path: &str) -> Self {
        Self {
            apply: true,
            path: Some(path.to_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub kind: ManifestKind,
    pub name: String,
    pub namespace: String,
    pub bytes: Vec<u8>,
    pub destination: Destination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppManifestSet(Vec<Manifest>);

impl AppManifestSet {
    pub fn new(mut manifests: Vec<Manifest>) -> Self {
        // stable: keeps insertion order within a kind
        manifests.sort_by_key(|m| m.kind);
        Self(manifests)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Manifest> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_apply(&self) -> impl Iterator<Item = &Manifest> {
        self.iter().filter(|m| m.destination.apply)
    }

    /// `(path, bytes)` for every manifest written into the config repository.
    pub fn files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.iter().filter_map(|m| {
            m.destination
                .path
                .as_deref()
                .map(|path| (path, m.bytes.as_slice()))
        })
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub api_version: String,
    pub kind: String,
    pub metadata: ApplicationMetadata,
    pub spec: ApplicationSpec,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ApplicationMetadata {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ApplicationSpec {
    pub url: String,
    pub path: String,
    pub branch: String,
    pub deployment_type: String,
    pub source_type: String,
    pub config_url: String,
}

impl Application {
    pub fn new(
        identity: &AppIdentity,
        request: &AddRequest,
        source: &AppSource,
        topology: &ConfigTopology,
    ) -> Self {
        let path = match source {
            AppSource::Git(_) => request.path.clone(),
            AppSource::Helm { chart, .. } => chart.clone(),
        };
        let config_url = match topology.config_repo() {
            Some(repo) => repo.ssh_url(),
            None => "NONE".to_owned(),
        };

        Self {
            api_version: "wego.weave.works/v1alpha1".to_owned(),
            kind: "Application".to_owned(),
            metadata: ApplicationMetadata {
                name: identity.name.clone(),
                namespace: request.namespace.clone(),
                labels: BTreeMap::from([(APP_IDENTIFIER_LABEL.to_owned(), identity.hash.clone())]),
            },
            spec: ApplicationSpec {
                url: source.url(),
                path,
                branch: request.branch.clone(),
                deployment_type: request.deployment.to_string(),
                source_type: request.source.to_string(),
                config_url,
            },
        }
    }
}

fn assembly<'a>(what: &'static str, name: &'a str) -> impl FnOnce(anyhow::Error) -> AddError + 'a {
    move |source| AddError::Assembly {
        what,
        name: name.to_owned(),
        source,
    }
}

pub struct Assembler<'a> {
    flux: &'a dyn ManifestGenerator,
}

impl<'a> Assembler<'a> {
    pub fn new(flux: &'a dyn ManifestGenerator) -> Self {
        Self { flux }
    }

    pub async fn build(
        &self,
        identity: &AppIdentity,
        request: &AddRequest,
        source: &AppSource,
        topology: &ConfigTopology,
        cluster: &str,
    ) -> Result<AppManifestSet, AddError> {
        let name = identity.name.as_str();
        let ns = request.namespace.as_str();
        let paths = topology.paths();
        let mut manifests = Vec::new();
        let mut push = |kind, name: &str, bytes, destination| {
            manifests.push(Manifest {
                kind,
                name: name.to_owned(),
                namespace: ns.to_owned(),
                bytes,
                destination,
            })
        };

        let source_bytes = match source {
            AppSource::Git(repo) => self
                .flux
                .create_source_git(
                    name,
                    &repo.ssh_url(),
                    &request.branch,
                    &secret_name(cluster, repo.name()),
                    ns,
                )
                .await
                .map_err(assembly("source", name))?,
            AppSource::Helm { url, .. } => self
                .flux
                .create_source_helm(name, url, ns)
                .await
                .map_err(assembly("source", name))?,
        };
        let source_destination = match (topology, paths) {
            (ConfigTopology::ConfigInAppRepo { .. }, Some(paths)) => {
                Destination::both(&paths.source_yaml)
            }
            (_, Some(paths)) => Destination::repo(&paths.source_yaml),
            (_, None) => Destination::cluster(),
        };
        push(ManifestKind::Source, name, source_bytes, source_destination);

        let workload = match (request.deployment, source) {
            (DeploymentKind::Kustomize, AppSource::Git(_)) => {
                self.flux
                    .create_kustomization(name, name, &request.path, ns)
                    .await
            }
            (DeploymentKind::Helm, AppSource::Git(_)) => {
                self.flux
                    .create_helm_release_git_repository(name, name, &request.path, ns)
                    .await
            }
            (DeploymentKind::Helm, AppSource::Helm { chart, .. }) => {
                self.flux
                    .create_helm_release_helm_repository(name, chart, ns)
                    .await
            }
            (DeploymentKind::Kustomize, AppSource::Helm { .. }) => {
                return Err(AddError::Validation(
                    "a chart can only be deployed with helm".to_owned(),
                ))
            }
        }
        .map_err(assembly("workload", name))?;
        let workload_destination = match paths {
            Some(paths) => Destination::repo(&paths.deploy_yaml),
            None => Destination::cluster(),
        };
        push(ManifestKind::Workload, name, workload, workload_destination);

        // The config repository's own source, and the kustomizations that
        // keep its directories reconciled.
        let config_source = match topology {
            ConfigTopology::NoConfigRepo => None,
            ConfigTopology::ConfigInAppRepo { .. } => Some(name.to_owned()),
            ConfigTopology::ExternalConfigRepo { repo, .. } => {
                let bytes = self
                    .flux
                    .create_source_git(
                        repo.name(),
                        &repo.ssh_url(),
                        &request.branch,
                        &secret_name(cluster, repo.name()),
                        ns,
                    )
                    .await
                    .map_err(assembly("source", repo.name()))?;
                push(ManifestKind::Source, repo.name(), bytes, Destination::cluster());
                Some(repo.name().to_owned())
            }
        };

        if let (Some(config_source), Some(paths)) = (config_source, paths) {
            let apps_dir_name = format!("{name}-apps-dir");
            let bytes = self
                .flux
                .create_kustomization(&apps_dir_name, &config_source, &paths.apps_dir, ns)
                .await
                .map_err(assembly("workload", &apps_dir_name))?;
            push(ManifestKind::Workload, &apps_dir_name, bytes, Destination::cluster());

            let target_name = format!("{cluster}-{name}");
            let bytes = self
                .flux
                .create_kustomization(&target_name, &config_source, &paths.target_dir, ns)
                .await
                .map_err(assembly("workload", &target_name))?;
            push(ManifestKind::Workload, &target_name, bytes, Destination::cluster());
        }

        let descriptor = serde_yaml::to_string(&Application::new(identity, request, source, topology))
            .context("serialising application")
            .map_err(assembly("application", name))?;
        let descriptor_destination = match paths {
            Some(paths) => Destination::repo(&paths.app_yaml),
            None => Destination::cluster(),
        };
        push(
            ManifestKind::AppDescriptor,
            name,
            descriptor.into_bytes(),
            descriptor_destination,
        );

        Ok(AppManifestSet::new(manifests))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{
        fakes::FakeFlux,
        repo_url::RepoUrl,
        request::AddParamsBuilder,
        topology,
    };
    use pretty_assertions::assert_eq;

    struct Case {
        request: AddRequest,
        source: AppSource,
        identity: AppIdentity,
        topology: ConfigTopology,
    }

    fn git_case(config: &str, deployment: &str) -> Case {
        let request = AddParamsBuilder::default()
            .url("https://github.com/foo/bar")
            .path("./kustomize")
            .deployment_type(deployment)
            .app_config_url(config)
            .build()
            .unwrap()
            .validate()
            .unwrap();
        let source = AppSource::Git(RepoUrl::parse("https://github.com/foo/bar").unwrap());
        let identity = AppIdentity::new(&request, &source);
        let topology = topology::resolve(&request, &source, &identity.name, "kind").unwrap();
        Case {
            request,
            source,
            identity,
            topology,
        }
    }

    fn helm_case(config: &str) -> Case {
        let request = AddParamsBuilder::default()
            .url("https://charts.kube-ops.io")
            .chart("loki")
            .app_config_url(config)
            .build()
            .unwrap()
            .validate()
            .unwrap();
        let source = AppSource::Helm {
            url: "https://charts.kube-ops.io".to_owned(),
            chart: "loki".to_owned(),
        };
        let identity = AppIdentity::new(&request, &source);
        let topology = topology::resolve(&request, &source, &identity.name, "kind").unwrap();
        Case {
            request,
            source,
            identity,
            topology,
        }
    }

    async fn build(flux: &FakeFlux, case: &Case) -> AppManifestSet {
        Assembler::new(flux)
            .build(
                &case.identity,
                &case.request,
                &case.source,
                &case.topology,
                "kind",
            )
            .await
            .unwrap()
    }

    fn kinds(set: &AppManifestSet) -> Vec<ManifestKind> {
        set.iter().map(|m| m.kind).collect()
    }

    #[tokio::test]
    async fn git_source_without_config_repo_is_applied_whole() {
        let flux = FakeFlux::default();
        let set = build(&flux, &git_case("NONE", "kustomize")).await;

        assert_eq!(
            flux.calls(),
            vec![
                "source git bar ssh://git@github.com/foo/bar.git main weave-gitops-kind-bar wego-system",
                "kustomization bar bar ./kustomize wego-system",
            ]
        );
        assert_eq!(
            kinds(&set),
            vec![
                ManifestKind::Source,
                ManifestKind::Workload,
                ManifestKind::AppDescriptor
            ]
        );
        assert_eq!(set.to_apply().count(), 3);
        assert_eq!(set.files().count(), 0);
    }

    #[tokio::test]
    async fn helm_source_uses_a_helm_repository() {
        let flux = FakeFlux::default();
        let set = build(&flux, &helm_case("")).await;

        assert_eq!(
            flux.calls(),
            vec![
                "source helm loki https://charts.kube-ops.io wego-system",
                "helmrelease helm loki loki wego-system",
            ]
        );
        assert_eq!(set.len(), 3);
    }

    #[tokio::test]
    async fn helm_deployment_from_git_uses_the_path_as_chart() {
        let flux = FakeFlux::default();
        build(&flux, &git_case("NONE", "helm")).await;

        assert_eq!(
            flux.calls()[1],
            "helmrelease git bar bar ./kustomize wego-system"
        );
    }

    #[tokio::test]
    async fn in_app_repo_writes_app_manifests_and_applies_the_rest() {
        let flux = FakeFlux::default();
        let set = build(&flux, &git_case("", "kustomize")).await;

        let files: Vec<&str> = set.files().map(|(path, _)| path).collect();
        assert_eq!(
            files,
            vec![
                ".wego/targets/kind/bar/bar-gitops-source.yaml",
                ".wego/targets/kind/bar/bar-gitops-deploy.yaml",
                ".wego/apps/bar/app.yaml",
            ]
        );
        let applied: Vec<&str> = set.to_apply().map(|m| m.name.as_str()).collect();
        assert_eq!(applied, vec!["bar", "bar-apps-dir", "kind-bar"]);
        assert_eq!(
            flux.calls()[2],
            "kustomization bar-apps-dir bar .wego/apps/bar wego-system"
        );
    }

    #[tokio::test]
    async fn external_config_repo_gets_its_own_source() {
        let flux = FakeFlux::default();
        let set = build(&flux, &git_case("https://github.com/acme/config", "kustomize")).await;

        let sources: Vec<&str> = set
            .iter()
            .filter(|m| m.kind == ManifestKind::Source)
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(sources, vec!["bar", "config"]);

        let files: Vec<&str> = set.files().map(|(path, _)| path).collect();
        assert_eq!(
            files,
            vec![
                "targets/kind/bar/bar-gitops-source.yaml",
                "targets/kind/bar/bar-gitops-deploy.yaml",
                "apps/bar/app.yaml",
            ]
        );
        assert!(flux.calls().contains(
            &"kustomization kind-bar config targets/kind/bar wego-system".to_owned()
        ));
    }

    #[tokio::test]
    async fn ordering_holds_for_every_combination() {
        let cases = [
            git_case("NONE", "kustomize"),
            git_case("NONE", "helm"),
            git_case("", "kustomize"),
            git_case("", "helm"),
            git_case("https://github.com/acme/config", "kustomize"),
            git_case("https://github.com/acme/config", "helm"),
            helm_case(""),
            helm_case("https://github.com/acme/config"),
        ];

        for case in &cases {
            let set = build(&FakeFlux::default(), case).await;
            let kinds = kinds(&set);
            let mut sorted = kinds.clone();
            sorted.sort();
            assert_eq!(kinds, sorted, "{}", case.topology);
            assert_eq!(kinds.last(), Some(&ManifestKind::AppDescriptor));
        }
    }

    #[tokio::test]
    async fn descriptor_is_identical_across_runs() {
        let case = git_case("", "kustomize");
        let first = build(&FakeFlux::default(), &case).await;
        let second = build(&FakeFlux::default(), &case).await;

        let descriptor = |set: &AppManifestSet| {
            set.iter()
                .find(|m| m.kind == ManifestKind::AppDescriptor)
                .map(|m| m.bytes.clone())
                .unwrap()
        };
        assert_eq!(descriptor(&first), descriptor(&second));

        let app: Application = serde_yaml::from_slice(&descriptor(&first)).unwrap();
        assert_eq!(
            app,
            Application {
                api_version: "wego.weave.works/v1alpha1".to_owned(),
                kind: "Application".to_owned(),
                metadata: ApplicationMetadata {
                    name: "bar".to_owned(),
                    namespace: "wego-system".to_owned(),
                    labels: BTreeMap::from([(
                        APP_IDENTIFIER_LABEL.to_owned(),
                        case.identity.hash.clone()
                    )]),
                },
                spec: ApplicationSpec {
                    url: "ssh://git@github.com/foo/bar.git".to_owned(),
                    path: "./kustomize".to_owned(),
                    branch: "main".to_owned(),
                    deployment_type: "kustomize".to_owned(),
                    source_type: "git".to_owned(),
                    config_url: "ssh://git@github.com/foo/bar.git".to_owned(),
                },
            }
        );
    }

    #[tokio::test]
    async fn generator_failures_are_assembly_errors() {
        let flux = FakeFlux {
            fail: true,
            ..FakeFlux::default()
        };
        let case = git_case("NONE", "kustomize");
        let err = Assembler::new(&flux)
            .build(
                &case.identity,
                &case.request,
                &case.source,
                &case.topology,
                "kind",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AddError::Assembly { what: "source", .. }));
    }
}
