//! Keeps the existing objects of a `KogitoApp` in line with its custom resource. The builder chain only
//! creates what is missing, so changes to the custom resource after creation are applied here, one field
//! at a time, with a single update per changed object.
use crate::build_state::{trigger_build, BuildStage};
use crate::builder::{AppBundle, AppChain, Resource};
use crate::client::ResourceStoreExt;
use crate::conditions::ReasonType;
use crate::crd::ServiceSpec;
use crate::error::ReconcileError;
use crate::factory::build_config::{runtime_build_config, s2i_build_config};
use crate::factory::workload::first_container_mut;
use crate::factory::LABEL_BUILD_TYPE;
use crate::openshift::apps::DeploymentConfig;
use crate::openshift::build::BuildConfig;
use crate::resource::{apply_labels, KubeObject, ObjectIdRef};

use k8s_openapi::api::core::v1::EnvVar;

use std::collections::BTreeMap;

pub const UPDATED_BUILD_MESSAGE: &str = "Build triggered by a change to the KogitoApp";

/// The outcome of all the updates of one pass. The first error is kept and later ones are only
/// logged, while `updated` is true if any object was updated.
#[derive(Debug, Default)]
pub struct UpdateResult {
    pub updated: bool,
    pub error_reason: Option<ReasonType>,
    pub error: Option<ReconcileError>,
}

impl UpdateResult {
    pub fn record(&mut self, result: Result<bool, ReconcileError>) {
        match result {
            Ok(updated) => self.updated |= updated,
            Err(error) => {
                if self.error.is_none() {
                    self.error_reason = Some(error.reason());
                    self.error = Some(error);
                } else {
                    log::warn!("Ignoring update error after an earlier one: {}", error);
                }
            }
        }
    }

    pub fn into_result(self) -> Result<bool, ReconcileError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.updated),
        }
    }
}

/// Environment variables compared by name and value, ignoring their order
fn env_map(env: &[EnvVar]) -> BTreeMap<&str, Option<&str>> {
    env.iter()
        .map(|var| (var.name.as_str(), var.value.as_deref()))
        .collect()
}

fn env_equal(deployed: &[EnvVar], desired: &[EnvVar]) -> bool {
    env_map(deployed) == env_map(desired)
}

fn sync_field<T: PartialEq + Clone>(deployed: &mut T, desired: &T) -> bool {
    if deployed != desired {
        *deployed = desired.clone();
        true
    } else {
        false
    }
}

fn sync_build_type_label(deployed: &mut BuildConfig, desired: &BuildConfig) -> bool {
    match desired.label(LABEL_BUILD_TYPE).map(str::to_owned) {
        Some(build_type) if deployed.label(LABEL_BUILD_TYPE) != Some(build_type.as_str()) => {
            deployed
                .labels_mut()
                .insert(LABEL_BUILD_TYPE.to_owned(), build_type);
            true
        }
        _ => false,
    }
}

/// Copies the base image name, and its namespace when one is requested
fn sync_base_image(deployed: &mut BuildConfig, desired: &BuildConfig) -> bool {
    let desired_from = match desired.source_strategy() {
        Some(strategy) => strategy.from.clone(),
        None => return false,
    };
    let from = &mut deployed.source_strategy_mut().from;
    let mut changed = sync_field(&mut from.kind, &desired_from.kind);
    changed |= sync_field(&mut from.name, &desired_from.name);
    if desired_from.namespace.as_deref().map(|ns| !ns.is_empty()).unwrap_or(false) {
        changed |= sync_field(&mut from.namespace, &desired_from.namespace);
    }
    changed
}

/// Applies the fields of the S2I build that come from the custom resource. Returns true if any changed.
pub fn sync_s2i_build(deployed: &mut BuildConfig, desired: &BuildConfig) -> bool {
    let mut changed = sync_base_image(deployed, desired);
    changed |= sync_build_type_label(deployed, desired);
    changed |= sync_field(&mut deployed.spec.resources, &desired.spec.resources);

    let source = &mut deployed.spec.source;
    changed |= sync_field(&mut source.type_, &desired.spec.source.type_);
    changed |= sync_field(&mut source.git, &desired.spec.source.git);
    changed |= sync_field(&mut source.context_dir, &desired.spec.source.context_dir);

    if let Some(desired_strategy) = desired.source_strategy() {
        let strategy = deployed.source_strategy_mut();
        changed |= sync_field(&mut strategy.incremental, &desired_strategy.incremental);
        if !env_equal(&strategy.env, &desired_strategy.env) {
            strategy.env = desired_strategy.env.clone();
            changed = true;
        }
    }
    changed
}

pub fn sync_runtime_build(deployed: &mut BuildConfig, desired: &BuildConfig) -> bool {
    let changed = sync_base_image(deployed, desired);
    sync_build_type_label(deployed, desired) || changed
}

/// Applies the replicas, resources and environment from the custom resource
pub fn sync_deployment_config(deployed: &mut DeploymentConfig, replicas: i32, spec: &dyn ServiceSpec) -> bool {
    let mut changed = sync_field(&mut deployed.spec.replicas, &Some(replicas));
    if let Some(container) = first_container_mut(deployed.spec.template.as_mut()) {
        changed |= sync_field(&mut container.resources, &spec.resources().cloned());
        let desired_env = spec.envs();
        let deployed_env = container.env.as_deref().unwrap_or(&[]);
        if !env_equal(deployed_env, desired_env) {
            container.env = Some(desired_env.to_vec()).filter(|env| !env.is_empty());
            changed = true;
        }
    }
    changed
}

fn update<T: KubeObject>(ctx: &AppChain, object: &T) -> Result<(), ReconcileError> {
    log::info!("Updating {} {} to match {}", T::k8s_type().kind, object.object_id(), ctx.instance.object_id());
    ctx.clients.store.update_object(object)?;
    ctx.metrics.resource_updated(T::k8s_type());
    Ok(())
}

/// Objects created during this pass already match the custom resource
fn existing<T: Clone>(resource: &Option<Resource<T>>) -> Option<T> {
    resource
        .as_ref()
        .filter(|r| !r.is_new())
        .map(|r| r.object.clone())
}

fn manage_build_config(
    ctx: &AppChain,
    resource: &Option<Resource<BuildConfig>>,
    sync: impl FnOnce(&mut BuildConfig) -> Result<bool, ReconcileError>,
) -> Result<bool, ReconcileError> {
    match existing(resource) {
        Some(mut deployed) => {
            if sync(&mut deployed)? {
                update(ctx, &deployed)?;
                Ok(true)
            } else {
                Ok(false)
            }
        }
        None => Ok(false),
    }
}

/// Each build config is checked on its own, and an applied update is recorded even if starting the
/// new build fails afterwards
fn manage_builds(ctx: &AppChain, bundle: &AppBundle, result: &mut UpdateResult) {
    let images = &ctx.config.images;
    let desired_s2i = s2i_build_config(ctx.instance, &ctx.meta, images);

    let s2i = manage_build_config(ctx, &bundle.build_s2i, |deployed| {
        Ok(sync_s2i_build(deployed, &desired_s2i))
    });
    let s2i_changed = matches!(s2i, Ok(true));
    result.record(s2i);

    let runtime = manage_build_config(ctx, &bundle.build_runtime, |deployed| {
        let desired = runtime_build_config(ctx.instance, &desired_s2i, &ctx.meta, images)?;
        Ok(sync_runtime_build(deployed, &desired))
    });
    let runtime_changed = matches!(runtime, Ok(true));
    result.record(runtime);

    // a new S2I image triggers the runtime build on its own
    let stage = if s2i_changed {
        BuildStage::S2I
    } else if runtime_changed {
        BuildStage::Runtime
    } else {
        return;
    };
    let bc_name = stage.build_config_name(ctx.app_name());
    let id = ObjectIdRef::new(ctx.namespace(), &bc_name);
    result.record(trigger_build(ctx.clients, id, UPDATED_BUILD_MESSAGE).map(|triggered| {
        if triggered {
            ctx.metrics.build_triggered();
        }
        false
    }));
}

fn manage_deployment_config(ctx: &AppChain, bundle: &AppBundle) -> Result<bool, ReconcileError> {
    match existing(&bundle.deployment_config) {
        Some(mut deployed) => {
            if sync_deployment_config(&mut deployed, ctx.instance.spec.replicas(), &ctx.instance.spec) {
                update(ctx, &deployed)?;
                Ok(true)
            } else {
                Ok(false)
            }
        }
        None => Ok(false),
    }
}

fn manage_labels<T: KubeObject>(ctx: &AppChain, resource: &Option<Resource<T>>) -> Result<bool, ReconcileError> {
    match existing(resource) {
        Some(mut deployed) => {
            if apply_labels(&ctx.meta.labels, deployed.labels_mut()) {
                update(ctx, &deployed)?;
                Ok(true)
            } else {
                Ok(false)
            }
        }
        None => Ok(false),
    }
}

/// Updates every existing object of the app that no longer matches its custom resource
pub fn manage_app(ctx: &AppChain, bundle: &AppBundle) -> UpdateResult {
    let mut result = UpdateResult::default();
    manage_builds(ctx, bundle, &mut result);
    result.record(manage_deployment_config(ctx, bundle));
    result.record(manage_labels(ctx, &bundle.service));
    result.record(manage_labels(ctx, &bundle.route));
    result
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::OperatorConfig;
    use crate::crd::{env_var, GitSource, KogitoApp};
    use crate::factory::MetaDefaults;

    fn app() -> KogitoApp {
        let mut app = KogitoApp::default();
        app.metadata.name = Some("example".to_owned());
        app.metadata.namespace = Some("kogito".to_owned());
        app.spec.build.git_source = Some(GitSource {
            uri: "https://github.com/kiegroup/kogito-examples".to_owned(),
            reference: None,
            context_dir: None,
        });
        app
    }

    fn s2i(app: &KogitoApp) -> BuildConfig {
        let config = OperatorConfig::default();
        let meta = MetaDefaults::for_service(app, &config);
        s2i_build_config(app, &meta, &config.images)
    }

    #[test]
    fn first_error_wins() {
        let mut result = UpdateResult::default();
        result.record(Ok(true));
        result.record(Err(ReconcileError::structural("first")));
        result.record(Ok(false));
        result.record(Err(ReconcileError::InvalidSpec("second".to_owned())));
        assert!(result.updated);
        assert_eq!(Some(ReasonType::MissingDependency), result.error_reason);
        assert_eq!("missing dependency: first", result.error.unwrap().to_string());
    }

    #[test]
    fn unchanged_build_is_not_updated() {
        let app = app();
        let mut deployed = s2i(&app);
        deployed.spec.strategy.source_strategy.as_mut().unwrap().env.reverse();
        assert!(!sync_s2i_build(&mut deployed, &s2i(&app)));
    }

    #[test]
    fn git_and_env_changes_are_applied() {
        let mut app = app();
        let mut deployed = s2i(&app);
        app.spec.build.git_source.as_mut().unwrap().reference = Some("stable".to_owned());
        app.spec.build.env.push(env_var("MAVEN_ARGS", "-DskipTests"));
        app.spec.build.incremental = true;
        let desired = s2i(&app);

        assert!(sync_s2i_build(&mut deployed, &desired));
        assert_eq!(
            Some("stable"),
            deployed.spec.source.git.as_ref().and_then(|g| g.reference.as_deref())
        );
        let strategy = deployed.source_strategy().unwrap();
        assert_eq!(Some(true), strategy.incremental);
        assert!(strategy.env.iter().any(|e| e.name == "MAVEN_ARGS"));
        assert!(!sync_s2i_build(&mut deployed, &desired));
    }

    #[test]
    fn applied_update_is_reported_when_the_rebuild_fails() {
        use crate::error::Operation;
        use crate::k8s_types;
        use crate::metrics::Metrics;
        use crate::testkit::FakeCluster;

        let cluster = FakeCluster::new();
        let clients = cluster.clients();
        let config = OperatorConfig::default();
        let metrics = Metrics::new();
        let app = cluster.put(&app());
        AppChain::new(&config, &clients, &metrics, &app).run().unwrap();

        let mut changed = app.clone();
        changed.spec.build.git_source.as_mut().unwrap().reference = Some("stable".to_owned());
        let ctx = AppChain::new(&config, &clients, &metrics, &changed);
        let bundle = ctx.run().unwrap();
        let bc_type = k8s_types::build_openshift_io::v1::BuildConfig;
        cluster.fail_on(Operation::Instantiate, bc_type, "build quota exceeded");

        let result = manage_app(&ctx, &bundle);
        assert!(result.updated);
        assert_eq!(Some(ReasonType::TriggerBuildFailed), result.error_reason);
        assert_eq!(1, cluster.call_count(Operation::Update, bc_type));
        let deployed = cluster.get::<BuildConfig>("kogito", "example-builder").unwrap();
        assert_eq!(
            Some("stable"),
            deployed.spec.source.git.as_ref().and_then(|g| g.reference.as_deref())
        );
    }

    #[test]
    fn failed_s2i_update_does_not_skip_the_runtime_build() {
        use crate::crd::Image;
        use crate::error::Operation;
        use crate::k8s_types;
        use crate::metrics::Metrics;
        use crate::testkit::FakeCluster;

        let cluster = FakeCluster::new();
        let clients = cluster.clients();
        let config = OperatorConfig::default();
        let metrics = Metrics::new();
        let app = cluster.put(&app());
        AppChain::new(&config, &clients, &metrics, &app).run().unwrap();

        let mut changed = app.clone();
        changed.spec.build.git_source.as_mut().unwrap().reference = Some("stable".to_owned());
        changed.spec.build.image_runtime = Some(Image::new("quay.io", "custom", "runtime", "1.0"));
        let ctx = AppChain::new(&config, &clients, &metrics, &changed);
        let bundle = ctx.run().unwrap();
        // every update of a build config fails, yet both are attempted
        let bc_type = k8s_types::build_openshift_io::v1::BuildConfig;
        cluster.fail_on(Operation::Update, bc_type, "conflict");

        let result = manage_app(&ctx, &bundle);
        assert_eq!(Some(ReasonType::UpdateResourceFailed), result.error_reason);
        assert_eq!(2, cluster.call_count(Operation::Update, bc_type));
        assert_eq!(0, cluster.call_count(Operation::Instantiate, bc_type));
    }

    #[test]
    fn deployment_config_follows_replicas_and_env() {
        let mut app = app();
        let mut dc = DeploymentConfig::default();
        dc.spec.template = Some(Default::default());
        dc.spec.template.as_mut().unwrap().spec = Some(k8s_openapi::api::core::v1::PodSpec {
            containers: vec![Default::default()],
            ..Default::default()
        });
        dc.spec.replicas = Some(1);
        assert!(!sync_deployment_config(&mut dc, 1, &app.spec));

        app.spec.service.replicas = Some(3);
        app.spec.service.env = vec![env_var("A", "1")];
        assert!(sync_deployment_config(&mut dc, app.spec.replicas(), &app.spec));
        assert_eq!(Some(3), dc.spec.replicas);
        assert!(!sync_deployment_config(&mut dc, 3, &app.spec));
    }
}
