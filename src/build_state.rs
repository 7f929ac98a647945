//! Tracks where the two stage build of a `KogitoApp` stands. Nothing here is persisted between passes:
//! the state is derived every time from the builds in the cluster and from whether the runtime image
//! exists.
use crate::client::Clients;
use crate::crd::BuildsStatus;
use crate::error::{Operation, ReconcileError};
use crate::factory::{builder_name, BUILD_TYPE_RUNTIME, BUILD_TYPE_S2I, LABEL_APP, LABEL_BUILD_TYPE};
use crate::k8s_types;
use crate::openshift::build::{Build, BuildRequest};
use crate::resource::{KubeObject, Labels, ObjectIdRef};

use chrono::{DateTime, Utc};

use std::fmt::{self, Display};
use std::panic::{catch_unwind, AssertUnwindSafe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuildStage {
    S2I,
    Runtime,
}

impl BuildStage {
    pub fn build_type(self) -> &'static str {
        match self {
            BuildStage::S2I => BUILD_TYPE_S2I,
            BuildStage::Runtime => BUILD_TYPE_RUNTIME,
        }
    }

    pub fn build_config_name(self, app: &str) -> String {
        match self {
            BuildStage::S2I => builder_name(app),
            BuildStage::Runtime => app.to_owned(),
        }
    }
}

impl Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BuildStage::S2I => f.write_str("S2I"),
            BuildStage::Runtime => f.write_str("runtime"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildState {
    pub image_exists: bool,
    pub build_running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    NoImageNoBuild,
    NoImageBuildRunning,
    NoImageBuildDone,
    ImageExists,
}

/// Returns true if the build belongs to the given stage of the app. The name prefix alone is not
/// enough, since `<app>` is a prefix of `<app>-builder`.
pub fn is_build_of(build: &Build, app: &str, stage: BuildStage) -> bool {
    let prefix = format!("{}-", stage.build_config_name(app));
    build.label(LABEL_APP) == Some(app)
        && build.label(LABEL_BUILD_TYPE) == Some(stage.build_type())
        && build.name().starts_with(prefix.as_str())
}

pub fn running_builds<'a>(builds: &'a [Build], app: &str, stage: BuildStage) -> Vec<&'a Build> {
    builds
        .iter()
        .filter(|build| build.status.phase.is_in_flight() && is_build_of(build, app, stage))
        .collect()
}

/// Build names end with the version of their `BuildConfig`
fn build_number(build: &Build) -> u64 {
    build
        .name()
        .rsplit('-')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

fn created_at(build: &Build) -> Option<DateTime<Utc>> {
    build.metadata.creation_timestamp.as_ref().map(|t| t.0)
}

pub fn latest_build<'a>(builds: &'a [Build], app: &str, stage: BuildStage) -> Option<&'a Build> {
    builds
        .iter()
        .filter(|build| is_build_of(build, app, stage))
        .max_by_key(|build| (created_at(build), build_number(build)))
}

/// Everything that is known about the builds of an app during one pass
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuildPipeline {
    pub state: BuildState,
    pub builds: BuildsStatus,
    pub latest_build: Option<String>,
    pub failure: Option<(BuildStage, String)>,
    has_finished_builds: bool,
}

impl BuildPipeline {
    pub fn observe(app: &str, builds: &[Build], image_exists: bool) -> BuildPipeline {
        let stages = [BuildStage::S2I, BuildStage::Runtime];
        let build_running = stages
            .iter()
            .any(|stage| !running_builds(builds, app, *stage).is_empty());

        let latest = stages
            .iter()
            .filter_map(|stage| latest_build(builds, app, *stage).map(|build| (*stage, build)))
            .collect::<Vec<_>>();
        let failure = latest
            .iter()
            .find(|(_, build)| build.status.phase.is_failure())
            .map(|(stage, build)| (*stage, build.name().to_owned()));
        let latest_build = latest
            .iter()
            .max_by_key(|(stage, build)| (created_at(build), *stage, build_number(build)))
            .map(|(_, build)| build.name().to_owned());

        let own_builds = builds
            .iter()
            .filter(|build| stages.iter().any(|stage| is_build_of(build, app, *stage)))
            .collect::<Vec<_>>();
        BuildPipeline {
            state: BuildState {
                image_exists,
                build_running,
            },
            builds: BuildsStatus::from_builds(own_builds.iter().cloned()),
            latest_build,
            failure,
            has_finished_builds: own_builds.iter().any(|b| !b.status.phase.is_in_flight()),
        }
    }

    pub fn phase(&self) -> PipelinePhase {
        if self.state.image_exists {
            PipelinePhase::ImageExists
        } else if self.state.build_running {
            PipelinePhase::NoImageBuildRunning
        } else if self.has_finished_builds {
            PipelinePhase::NoImageBuildDone
        } else {
            PipelinePhase::NoImageNoBuild
        }
    }

    /// The error to report when the latest build of a stage failed
    pub fn failure_error(&self) -> Option<ReconcileError> {
        self.failure
            .as_ref()
            .map(|(stage, build_name)| ReconcileError::BuildFailed {
                stage: *stage,
                build_name: build_name.clone(),
            })
    }
}

/// Lists the builds of both stages of an app
pub fn list_app_builds(clients: &Clients, namespace: &str, app: &str) -> Result<Vec<Build>, ReconcileError> {
    let mut selector = Labels::new();
    selector.insert(LABEL_APP.to_owned(), app.to_owned());
    clients.builds.list_builds(namespace, &selector).map_err(|e| {
        ReconcileError::cluster(
            Operation::List,
            k8s_types::build_openshift_io::v1::Build,
            ObjectIdRef::new(namespace, app).to_owned(),
            e,
        )
    })
}

/// Starts a new build of the given `BuildConfig`. Returns false without an error if the build config
/// does not exist or if the build client panicked.
pub fn trigger_build(clients: &Clients, id: ObjectIdRef, message: &str) -> Result<bool, ReconcileError> {
    let bc_type = k8s_types::build_openshift_io::v1::BuildConfig;
    let build_config = clients
        .builds
        .get_build_config(id)
        .map_err(|e| ReconcileError::cluster(Operation::Fetch, bc_type, id.to_owned(), e))?;
    if build_config.is_none() {
        log::warn!("Cannot trigger a build of BuildConfig {}, it does not exist", id);
        return Ok(false);
    }

    let request = BuildRequest::new(id.name, message);
    let namespace = id.namespace;
    let result = catch_unwind(AssertUnwindSafe(|| clients.builds.instantiate(namespace, &request)));
    match result {
        Ok(Ok(build)) => {
            log::info!("Triggered build {} of BuildConfig {}", build.name(), id);
            Ok(true)
        }
        Ok(Err(e)) => Err(ReconcileError::cluster(Operation::Instantiate, bc_type, id.to_owned(), e)),
        Err(_) => {
            log::error!("Build client panicked while instantiating BuildConfig {}", id);
            Ok(false)
        }
    }
}
