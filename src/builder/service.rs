//! The chain for the runtime services. Their image is imported from an external registry, and every
//! object that already exists is compared with the desired state and updated in the same step.
use crate::builder::{is_new, run_chain, Context, Resource, StepFn};
use crate::crd::{upsert_env, RuntimeService, ServiceSpec};
use crate::error::{ChainError, Operation, ReconcileError};
use crate::factory::image_stream::{image_stream_tag, imported_stream};
use crate::factory::infra::{
    application_properties, credentials_secret, infra_env, infra_properties, properties_config_map,
};
use crate::factory::service::{route, service, service_monitor};
use crate::factory::workload::{service_deployment, workload_ports};
use crate::k8s_types;
use crate::openshift::image::{ImageStream, ImageStreamTag};
use crate::openshift::monitoring::ServiceMonitor;
use crate::openshift::route::Route;
use crate::resource::KubeObject;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, EnvVar, Secret, Service};

pub type ServiceChain<'a, S> = Context<'a, S>;

#[derive(Debug, Clone, Default)]
pub struct ServiceBundle {
    pub secret: Option<Resource<Secret>>,
    pub config_map: Option<Resource<ConfigMap>>,
    pub image_stream: Option<Resource<ImageStream>>,
    /// the imported image, absent until the import finished
    pub image: Option<ImageStreamTag>,
    pub deployment: Option<Resource<Deployment>>,
    pub service: Option<Resource<Service>>,
    pub route: Option<Resource<Route>>,
    pub service_monitor: Option<Resource<ServiceMonitor>>,
}

impl ServiceBundle {
    pub fn is_pending(&self) -> bool {
        self.image.is_none()
    }

    pub fn deployment_is_new(&self) -> bool {
        is_new(&self.deployment)
    }
}

impl<'a, S: RuntimeService> ServiceChain<'a, S> {
    pub fn run(&self) -> Result<ServiceBundle, ChainError<ServiceBundle>> {
        let steps: [(&'static str, StepFn<ServiceChain<S>, ServiceBundle>); 8] = [
            ("secret", secret_step::<S>),
            ("config_map", config_map_step::<S>),
            ("image_stream", image_stream_step::<S>),
            ("image", image_step::<S>),
            ("deployment", deployment_step::<S>),
            ("service", service_step::<S>),
            ("route", route_step::<S>),
            ("service_monitor", service_monitor_step::<S>),
        ];
        run_chain(self, &steps)
    }

    /// The container environment: the infra bindings, then the variables of the service kind, then the
    /// variables from the custom resource, which win over both
    pub fn container_env(&self) -> Vec<EnvVar> {
        let spec = self.instance.spec();
        let properties = infra_properties(spec.runtime(), spec.infra());
        let mut env = infra_env(self.app_name(), &properties);
        for var in self.instance.extra_env().into_iter().chain(spec.envs().iter().cloned()) {
            upsert_env(&mut env, var);
        }
        env
    }
}

fn secret_step<S: RuntimeService>(ctx: &ServiceChain<S>, bundle: &mut ServiceBundle) -> Result<(), ReconcileError> {
    if let Some(desired) = credentials_secret(&ctx.meta, ctx.instance.spec().infra()) {
        bundle.secret = Some(ctx.ensure(desired)?);
    }
    Ok(())
}

fn config_map_step<S: RuntimeService>(ctx: &ServiceChain<S>, bundle: &mut ServiceBundle) -> Result<(), ReconcileError> {
    let spec = ctx.instance.spec();
    let properties = infra_properties(spec.runtime(), spec.infra());
    if let Some(file) = application_properties(&properties) {
        bundle.config_map = Some(ctx.ensure(properties_config_map(&ctx.meta, file))?);
    }
    Ok(())
}

fn image_stream_step<S: RuntimeService>(ctx: &ServiceChain<S>, bundle: &mut ServiceBundle) -> Result<(), ReconcileError> {
    let image = ctx.instance.resolved_image(&ctx.config.images);
    bundle.image_stream = Some(ctx.ensure(imported_stream(&image, &ctx.meta))?);
    Ok(())
}

fn image_step<S: RuntimeService>(ctx: &ServiceChain<S>, bundle: &mut ServiceBundle) -> Result<(), ReconcileError> {
    let image = ctx.instance.resolved_image(&ctx.config.images);
    let tag_type = k8s_types::image_openshift_io::v1::ImageStreamTag;
    let tag_id = ctx.sibling_id(&image.stream_tag());

    let found = ctx
        .clients
        .images
        .get_image_stream_tag(ctx.namespace(), &image.name, image.tag_or_latest())
        .map_err(|e| ReconcileError::cluster(Operation::Fetch, tag_type, tag_id.clone(), e))?;
    match found {
        Some(tag) if !tag.docker_image_reference().is_empty() => {
            bundle.image = Some(tag);
        }
        Some(_) => {
            log::info!("Waiting for the import of {} into {}", image, tag_id);
        }
        None if bundle.image_stream.is_some() => {
            let created = ctx
                .clients
                .images
                .create_image_stream_tag(&image_stream_tag(&image, &ctx.meta))
                .map_err(|e| ReconcileError::cluster(Operation::Create, tag_type, tag_id.clone(), e))?;
            if created {
                ctx.metrics.resource_created(tag_type);
                log::info!("Created ImageStreamTag {} to import {}", tag_id, image);
            }
        }
        None => {}
    }
    Ok(())
}

fn deployment_step<S: RuntimeService>(ctx: &ServiceChain<S>, bundle: &mut ServiceBundle) -> Result<(), ReconcileError> {
    let image = match bundle.image.as_ref() {
        Some(image) => image,
        None => {
            log::debug!("Skipping the Deployment of {} until its image is imported", ctx.instance.object_id());
            return Ok(());
        }
    };
    let properties = bundle.config_map.as_ref().map(|cm| cm.object.name().to_owned());
    let desired = service_deployment(ctx.instance, image, &ctx.meta, ctx.container_env(), properties);
    bundle.deployment = Some(ctx.ensure(desired)?);
    Ok(())
}

fn service_step<S: RuntimeService>(ctx: &ServiceChain<S>, bundle: &mut ServiceBundle) -> Result<(), ReconcileError> {
    let ports = match bundle.deployment.as_ref().and_then(|d| d.object.spec.as_ref()) {
        Some(spec) => workload_ports(Some(&spec.template)),
        None => return Ok(()),
    };
    if let Some(desired) = service(&ctx.meta, &ports) {
        bundle.service = Some(ctx.ensure(desired)?);
    }
    Ok(())
}

fn route_step<S: RuntimeService>(ctx: &ServiceChain<S>, bundle: &mut ServiceBundle) -> Result<(), ReconcileError> {
    if let Some(desired) = bundle.service.as_ref().and_then(|svc| route(&ctx.meta, &svc.object)) {
        bundle.route = Some(ctx.ensure(desired)?);
    }
    Ok(())
}

fn service_monitor_step<S: RuntimeService>(
    ctx: &ServiceChain<S>,
    bundle: &mut ServiceBundle,
) -> Result<(), ReconcileError> {
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
        bundle.service_monitor = Some(ctx.ensure(desired)?);
    }
    Ok(())
}
