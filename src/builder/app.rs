//! The chain for a `KogitoApp`: rbac, the two build configs and their output streams, then the workload
//! and its networking once the runtime build has produced an image. Objects that already exist are left
//! alone here, and are brought up to date by `crate::manage` instead.
use crate::build_state::{list_app_builds, trigger_build, BuildPipeline, BuildStage, PipelinePhase};
use crate::builder::{is_new, run_chain, Context, Resource, StepFn};
use crate::crd::KogitoApp;
use crate::error::{ChainError, Operation, ReconcileError};
use crate::factory::build_config::{runtime_build_config, s2i_build_config, OUTPUT_TAG};
use crate::factory::image_stream::build_output_stream;
use crate::factory::service::{route, service, service_monitor};
use crate::factory::workload::{app_deployment_config, workload_ports};
use crate::factory::{builder_name, rbac};
use crate::k8s_types;
use crate::openshift::apps::DeploymentConfig;
use crate::openshift::build::BuildConfig;
use crate::openshift::image::{ImageStream, ImageStreamTag};
use crate::openshift::monitoring::ServiceMonitor;
use crate::openshift::route::Route;
use crate::resource::{KubeObject, ObjectIdRef};

use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;

pub const FIRST_BUILD_MESSAGE: &str = "Initial build triggered by the Kogito operator";

pub type AppChain<'a> = Context<'a, KogitoApp>;

/// Everything the chain produced for a `KogitoApp`
#[derive(Debug, Clone, Default)]
pub struct AppBundle {
    pub service_account: Option<Resource<ServiceAccount>>,
    pub role_binding: Option<Resource<RoleBinding>>,
    pub build_s2i: Option<Resource<BuildConfig>>,
    pub build_runtime: Option<Resource<BuildConfig>>,
    pub image_stream_s2i: Option<Resource<ImageStream>>,
    pub image_stream_runtime: Option<Resource<ImageStream>>,
    /// the resolved runtime image, absent until the first runtime build completes
    pub image: Option<ImageStreamTag>,
    pub builds: BuildPipeline,
    pub deployment_config: Option<Resource<DeploymentConfig>>,
    pub service: Option<Resource<Service>>,
    pub route: Option<Resource<Route>>,
    pub service_monitor: Option<Resource<ServiceMonitor>>,
    /// true if a build was triggered by this pass
    pub build_triggered: bool,
}

impl AppBundle {
    /// Waiting for the runtime image, which is not an error
    pub fn is_pending(&self) -> bool {
        self.image.is_none()
    }

    pub fn deployment_config_is_new(&self) -> bool {
        is_new(&self.deployment_config)
    }
}

impl<'a> AppChain<'a> {
    pub fn run(&self) -> Result<AppBundle, ChainError<AppBundle>> {
        let steps: [(&'static str, StepFn<AppChain, AppBundle>); 10] = [
            ("service_account", service_account_step),
            ("role_binding", role_binding_step),
            ("build_s2i", build_s2i_step),
            ("build_runtime", build_runtime_step),
            ("image_streams", image_streams_step),
            ("runtime_image", runtime_image_step),
            ("deployment_config", deployment_config_step),
            ("service", service_step),
            ("route", route_step),
            ("service_monitor", service_monitor_step),
        ];
        run_chain(self, &steps)
    }
}

fn service_account_step(ctx: &AppChain, bundle: &mut AppBundle) -> Result<(), ReconcileError> {
    if ctx.config.create_service_accounts {
        bundle.service_account = Some(ctx.create(rbac::service_account(&ctx.meta))?);
    }
    Ok(())
}

fn role_binding_step(ctx: &AppChain, bundle: &mut AppBundle) -> Result<(), ReconcileError> {
    if ctx.config.create_service_accounts {
        bundle.role_binding = Some(ctx.create(rbac::view_role_binding(&ctx.meta))?);
    }
    Ok(())
}

fn build_s2i_step(ctx: &AppChain, bundle: &mut AppBundle) -> Result<(), ReconcileError> {
    let desired = s2i_build_config(ctx.instance, &ctx.meta, &ctx.config.images);
    bundle.build_s2i = Some(ctx.create(desired)?);
    Ok(())
}

fn build_runtime_step(ctx: &AppChain, bundle: &mut AppBundle) -> Result<(), ReconcileError> {
    let s2i = bundle.build_s2i.as_ref().ok_or_else(|| {
        ReconcileError::structural(format!(
            "the S2I BuildConfig of {} is required for its runtime build",
            ctx.instance.object_id()
        ))
    })?;
    let desired = runtime_build_config(ctx.instance, &s2i.object, &ctx.meta, &ctx.config.images)?;
    bundle.build_runtime = Some(ctx.create(desired)?);
    Ok(())
}

fn image_streams_step(ctx: &AppChain, bundle: &mut AppBundle) -> Result<(), ReconcileError> {
    let app = ctx.app_name();
    bundle.image_stream_s2i = Some(ctx.create(build_output_stream(&builder_name(app), &ctx.meta))?);
    bundle.image_stream_runtime = Some(ctx.create(build_output_stream(app, &ctx.meta))?);

    // a new build config only builds on its own once its base image changes
    if is_new(&bundle.build_s2i) {
        start_first_build(ctx, bundle)?;
    }
    Ok(())
}

/// Starts the S2I build of an app built from git. Returns true if a build was started.
fn start_first_build(ctx: &AppChain, bundle: &mut AppBundle) -> Result<bool, ReconcileError> {
    if ctx.instance.git_source().is_none() || bundle.build_triggered {
        return Ok(false);
    }
    let bc_name = builder_name(ctx.app_name());
    let id = ObjectIdRef::new(ctx.namespace(), &bc_name);
    let triggered = trigger_build(ctx.clients, id, FIRST_BUILD_MESSAGE)?;
    if triggered {
        ctx.metrics.build_triggered();
        bundle.build_triggered = true;
    }
    Ok(triggered)
}

fn runtime_image_step(ctx: &AppChain, bundle: &mut AppBundle) -> Result<(), ReconcileError> {
    let namespace = ctx.namespace();
    let app = ctx.app_name();
    let image = ctx
        .clients
        .images
        .get_image_stream_tag(namespace, app, OUTPUT_TAG)
        .map_err(|e| {
            ReconcileError::cluster(
                Operation::Fetch,
                k8s_types::image_openshift_io::v1::ImageStreamTag,
                ctx.sibling_id(&ImageStreamTag::tag_name(app, OUTPUT_TAG)),
                e,
            )
        })?
        .filter(|tag| !tag.docker_image_reference().is_empty());

    let builds = list_app_builds(ctx.clients, namespace, app)?;
    let mut pipeline = BuildPipeline::observe(app, &builds, image.is_some());
    // a pass that failed after creating the build configs never started the first build
    if pipeline.phase() == PipelinePhase::NoImageNoBuild && start_first_build(ctx, bundle)? {
        let builds = list_app_builds(ctx.clients, namespace, app)?;
        pipeline = BuildPipeline::observe(app, &builds, false);
    }
    match pipeline.phase() {
        PipelinePhase::ImageExists => {}
        PipelinePhase::NoImageBuildRunning => {
            log::info!("Waiting for the builds of {} to produce an image", ctx.instance.object_id());
        }
        PipelinePhase::NoImageBuildDone => {
            log::info!(
                "Builds of {} finished without producing an image, latest build: {:?}",
                ctx.instance.object_id(),
                pipeline.latest_build
            );
        }
        PipelinePhase::NoImageNoBuild => {
            log::info!(
                "No image and no build for {}, the {} BuildConfig {} has to be started manually",
                ctx.instance.object_id(),
                BuildStage::S2I,
                builder_name(app)
            );
        }
    }
    bundle.image = image;
    bundle.builds = pipeline;
    Ok(())
}

fn deployment_config_step(ctx: &AppChain, bundle: &mut AppBundle) -> Result<(), ReconcileError> {
    let image = match bundle.image.as_ref() {
        Some(image) => image,
        None => {
            log::debug!("Skipping the DeploymentConfig of {} until its image exists", ctx.instance.object_id());
            return Ok(());
        }
    };
    let desired = app_deployment_config(ctx.instance, image, &ctx.meta, ctx.config.create_service_accounts);
    bundle.deployment_config = Some(ctx.create(desired)?);
    Ok(())
}

fn service_step(ctx: &AppChain, bundle: &mut AppBundle) -> Result<(), ReconcileError> {
    let ports = match bundle.deployment_config.as_ref() {
        Some(dc) => workload_ports(dc.object.spec.template.as_ref()),
        None => return Ok(()),
    };
    match service(&ctx.meta, &ports) {
        Some(desired) => bundle.service = Some(ctx.create(desired)?),
        None => log::info!(
            "{} exposes no ports, so no Service is created for it",
            ctx.instance.object_id()
        ),
    }
    Ok(())
}

fn route_step(ctx: &AppChain, bundle: &mut AppBundle) -> Result<(), ReconcileError> {
    if let Some(desired) = bundle.service.as_ref().and_then(|svc| route(&ctx.meta, &svc.object)) {
        bundle.route = Some(ctx.create(desired)?);
    }
    Ok(())
}

fn service_monitor_step(ctx: &AppChain, bundle: &mut AppBundle) -> Result<(), ReconcileError> {
    let (image, svc) = match (bundle.image.as_ref(), bundle.service.as_ref()) {
        (Some(image), Some(svc)) => (image, svc),
        _ => return Ok(()),
    };
    if !ctx.config.enable_service_monitors
        || !ctx.is_type_available(k8s_types::monitoring_coreos_com::v1::ServiceMonitor)?
    {
        return Ok(());
    }
    if let Some(desired) = service_monitor(&ctx.meta, image, &svc.object) {
        bundle.service_monitor = Some(ctx.create(desired)?);
    }
    Ok(())
}
