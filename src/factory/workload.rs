//! Workloads for both kinds of services. A `KogitoApp` runs as an OpenShift `DeploymentConfig` that is
//! rolled out again whenever its runtime build pushes a new image, while runtime services run as a plain
//! `apps/v1` `Deployment`. Ports, probes and part of the labels come from the labels of the image.
use crate::crd::{KogitoApp, RuntimeService, ServiceSpec};
use crate::factory::build_config::output_stream_tag;
use crate::factory::{app_selector, MetaDefaults};
use crate::openshift::apps::{
    DeploymentConfig, DeploymentConfigSpec, DeploymentStrategy, DeploymentTriggerPolicy,
};
use crate::openshift::image::ImageStreamTag;
use crate::openshift::ImageReference;
use crate::resource::{KubeObject, Labels};

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

pub const LABEL_EXPOSE_SERVICES: &str = "io.openshift.expose-services";
pub const KIE_LABEL_PREFIX: &str = "org.kie/";
pub const KIE_PERSISTENCE_PREFIX: &str = "org.kie/persistence";

pub const PORT_NAME_HTTP: &str = "http";
pub const PROTOCOL_TCP: &str = "TCP";

pub const CONFIG_VOLUME_NAME: &str = "config";
pub const CONFIG_MOUNT_PATH: &str = "/home/kogito/config";

const PROBE_INITIAL_DELAY_SECONDS: i32 = 5;
const PROBE_TIMEOUT_SECONDS: i32 = 1;

/// A `<port>:<name>` entry of the `io.openshift.expose-services` image label
#[derive(Debug, Clone, PartialEq)]
pub struct ExposedPort {
    pub port: i32,
    pub name: String,
}

/// Parses a comma separated list of `<port>:<name>` entries. Malformed entries are skipped.
pub fn parse_exposed_ports(label: &str) -> Vec<ExposedPort> {
    label
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let tokens = entry.split(':').collect::<Vec<_>>();
            if tokens.len() != 2 || tokens[1].is_empty() {
                log::warn!("Ignoring malformed exposed port '{}', expected <port>:<name>", entry);
                return None;
            }
            match tokens[0].parse::<i32>() {
                Ok(port) => Some(ExposedPort {
                    port,
                    name: tokens[1].to_owned(),
                }),
                Err(e) => {
                    log::warn!("Ignoring exposed port '{}' with invalid port number: {}", entry, e);
                    None
                }
            }
        })
        .collect()
}

pub fn image_ports(image: &ImageStreamTag) -> Vec<ExposedPort> {
    image
        .image_label(LABEL_EXPOSE_SERVICES)
        .map(parse_exposed_ports)
        .unwrap_or_default()
}

/// Image labels under `org.kie/`, as valid label keys. The persistence labels only describe files
/// inside of the image and are left out.
pub fn kie_labels(image_labels: &Labels) -> Labels {
    image_labels
        .iter()
        .filter(|(key, _)| key.starts_with(KIE_LABEL_PREFIX) && !key.starts_with(KIE_PERSISTENCE_PREFIX))
        .map(|(key, value)| {
            let name = key[KIE_LABEL_PREFIX.len()..].replace('/', ".");
            (format!("{}{}", KIE_LABEL_PREFIX, name), value.clone())
        })
        .collect()
}

fn tcp_probe(port: i32) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            host: None,
            port: IntOrString::Int(port),
        }),
        initial_delay_seconds: Some(PROBE_INITIAL_DELAY_SECONDS),
        timeout_seconds: Some(PROBE_TIMEOUT_SECONDS),
        ..Default::default()
    }
}

/// Everything that varies between the containers of the different services
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub ports: Vec<ExposedPort>,
    pub env: Vec<EnvVar>,
    pub resources: Option<ResourceRequirements>,
    /// name of a config map to mount at `CONFIG_MOUNT_PATH`
    pub properties: Option<String>,
}

pub fn container(spec: &ContainerSpec) -> Container {
    let ports = spec
        .ports
        .iter()
        .map(|p| ContainerPort {
            container_port: p.port,
            name: Some(p.name.clone()),
            protocol: Some(PROTOCOL_TCP.to_owned()),
            ..Default::default()
        })
        .collect::<Vec<_>>();
    // only the first http port is probed
    let http_port = spec.ports.iter().find(|p| p.name == PORT_NAME_HTTP).map(|p| p.port);

    Container {
        name: spec.name.clone(),
        image: Some(spec.image.clone()),
        ports: Some(ports).filter(|p| !p.is_empty()),
        env: Some(spec.env.clone()).filter(|e| !e.is_empty()),
        resources: spec.resources.clone(),
        liveness_probe: http_port.map(tcp_probe),
        readiness_probe: http_port.map(tcp_probe),
        volume_mounts: spec.properties.as_ref().map(|_| {
            vec![VolumeMount {
                name: CONFIG_VOLUME_NAME.to_owned(),
                mount_path: CONFIG_MOUNT_PATH.to_owned(),
                read_only: Some(true),
                ..Default::default()
            }]
        }),
        ..Default::default()
    }
}

fn pod_template(labels: Labels, spec: &ContainerSpec, service_account: Option<String>) -> PodTemplateSpec {
    let volumes = spec.properties.as_ref().map(|config_map| {
        vec![Volume {
            name: CONFIG_VOLUME_NAME.to_owned(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(config_map.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }]
    });
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container(spec)],
            service_account_name: service_account,
            volumes,
            ..Default::default()
        }),
    }
}

/// The labels of the workload, its pods and its selector
fn workload_labels(meta: &MetaDefaults, image: &ImageStreamTag) -> (Labels, Labels) {
    let kie = kie_labels(image.image_labels());
    let mut labels = meta.labels.clone();
    labels.extend(kie.clone());
    let mut selector = app_selector(&meta.app);
    selector.extend(kie);
    (labels, selector)
}

/// The `DeploymentConfig` of a `KogitoApp`, running the image that was produced by its runtime build
pub fn app_deployment_config(
    app: &KogitoApp,
    image: &ImageStreamTag,
    meta: &MetaDefaults,
    service_account: bool,
) -> DeploymentConfig {
    let name = app.name().to_owned();
    let (labels, selector) = workload_labels(meta, image);
    let container_spec = ContainerSpec {
        name: name.clone(),
        image: image.docker_image_reference().to_owned(),
        ports: image_ports(image),
        env: app.spec.envs().to_vec(),
        resources: app.spec.resources().cloned(),
        properties: None,
    };

    DeploymentConfig {
        metadata: meta.object_meta_with_labels(name.as_str(), labels.clone()),
        spec: DeploymentConfigSpec {
            strategy: Some(DeploymentStrategy::rolling()),
            triggers: vec![
                DeploymentTriggerPolicy::image_change(
                    name.as_str(),
                    ImageReference::image_stream_tag(output_stream_tag(&name)),
                ),
                DeploymentTriggerPolicy::config_change(),
            ],
            replicas: Some(app.spec.replicas()),
            selector: Some(selector),
            template: Some(pod_template(
                labels,
                &container_spec,
                Some(name.clone()).filter(|_| service_account),
            )),
        },
        status: None,
    }
}

/// The `Deployment` of a runtime service. Images without an `io.openshift.expose-services` label
/// expose the configured http port.
pub fn service_deployment<S: RuntimeService>(
    service: &S,
    image: &ImageStreamTag,
    meta: &MetaDefaults,
    env: Vec<EnvVar>,
    properties: Option<String>,
) -> Deployment {
    let name = service.name().to_owned();
    let (labels, selector) = workload_labels(meta, image);
    let mut ports = image_ports(image);
    if ports.is_empty() {
        ports.push(ExposedPort {
            port: service.spec().http_port(),
            name: PORT_NAME_HTTP.to_owned(),
        });
    }
    let container_spec = ContainerSpec {
        name: name.clone(),
        image: image.docker_image_reference().to_owned(),
        ports,
        env,
        resources: service.spec().resources().cloned(),
        properties,
    };

    Deployment {
        metadata: meta.object_meta_with_labels(name.as_str(), labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(service.spec().replicas()),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: pod_template(labels, &container_spec, None),
            ..Default::default()
        }),
        status: None,
    }
}

/// The first container of a pod template
pub fn first_container(template: Option<&PodTemplateSpec>) -> Option<&Container> {
    template
        .and_then(|t| t.spec.as_ref())
        .and_then(|spec| spec.containers.first())
}

pub fn first_container_mut(template: Option<&mut PodTemplateSpec>) -> Option<&mut Container> {
    template
        .and_then(|t| t.spec.as_mut())
        .and_then(|spec| spec.containers.first_mut())
}

/// The ports of the first container, which is the only one the operator creates
pub fn workload_ports(template: Option<&PodTemplateSpec>) -> Vec<ContainerPort> {
    first_container(template)
        .and_then(|c| c.ports.clone())
        .unwrap_or_default()
}
