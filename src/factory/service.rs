//! Networking for a workload: the `Service` in front of its pods, the `Route` that exposes that service
//! outside of the cluster, and the `ServiceMonitor` that lets prometheus scrape it.
use crate::factory::{app_selector, MetaDefaults};
use crate::openshift::image::ImageStreamTag;
use crate::openshift::monitoring::{Endpoint, NamespaceSelector, ServiceMonitor, ServiceMonitorSpec};
use crate::openshift::route::{Route, RoutePort, RouteSpec, RouteTargetReference};

use k8s_openapi::api::core::v1::{ContainerPort, Service, ServicePort, ServiceSpec as CoreServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

pub const KIND_SERVICE: &str = "Service";

pub const LABEL_PROMETHEUS_SCRAPE: &str = "prometheus.io/scrape";
pub const LABEL_PROMETHEUS_PATH: &str = "prometheus.io/path";
pub const LABEL_PROMETHEUS_PORT: &str = "prometheus.io/port";
pub const LABEL_PROMETHEUS_SCHEME: &str = "prometheus.io/scheme";

pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_METRICS_SCHEME: &str = "http";

/// A service with one port per container port, or `None` if the workload exposes nothing
pub fn service(meta: &MetaDefaults, container_ports: &[ContainerPort]) -> Option<Service> {
    if container_ports.is_empty() {
        return None;
    }
    let ports = container_ports
        .iter()
        .map(|port| ServicePort {
            name: port.name.clone(),
            port: port.container_port,
            protocol: port.protocol.clone(),
            target_port: Some(IntOrString::Int(port.container_port)),
            ..Default::default()
        })
        .collect();
    Some(Service {
        metadata: meta.app_meta(),
        spec: Some(CoreServiceSpec {
            ports: Some(ports),
            selector: Some(app_selector(&meta.app)),
            ..Default::default()
        }),
        status: None,
    })
}

fn service_ports(service: &Service) -> &[ServicePort] {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_deref())
        .unwrap_or(&[])
}

/// A route to the first port of the service
pub fn route(meta: &MetaDefaults, service: &Service) -> Option<Route> {
    let port = service_ports(service).first()?;
    let target_port = match port.name.as_ref() {
        Some(name) if !name.is_empty() => IntOrString::String(name.clone()),
        _ => IntOrString::Int(port.port),
    };
    Some(Route {
        metadata: meta.app_meta(),
        spec: RouteSpec {
            host: None,
            to: RouteTargetReference {
                kind: KIND_SERVICE.to_owned(),
                name: meta.app.clone(),
                weight: None,
            },
            port: Some(RoutePort { target_port }),
        },
        status: None,
    })
}

/// Returns `true` if the image asks to be scraped by prometheus
pub fn is_scrape_enabled(image: &ImageStreamTag) -> bool {
    image
        .image_label(LABEL_PROMETHEUS_SCRAPE)
        .map(|value| value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// The name of the service port to scrape. `prometheus.io/port` may hold either a port number or a port
/// name, and the first port is used when it's missing or matches nothing.
fn metrics_port(image: &ImageStreamTag, service: &Service) -> Option<String> {
    let ports = service_ports(service);
    let requested = image.image_label(LABEL_PROMETHEUS_PORT);
    let matching = requested.and_then(|requested| {
        ports.iter().find(|port| {
            port.name.as_deref() == Some(requested) || port.port.to_string() == requested
        })
    });
    matching.or_else(|| ports.first()).and_then(|port| port.name.clone())
}

/// A monitor for the service, or `None` unless the image sets `prometheus.io/scrape=true`
pub fn service_monitor(
    meta: &MetaDefaults,
    image: &ImageStreamTag,
    service: &Service,
) -> Option<ServiceMonitor> {
    if !is_scrape_enabled(image) {
        return None;
    }
    let path = image
        .image_label(LABEL_PROMETHEUS_PATH)
        .unwrap_or(DEFAULT_METRICS_PATH);
    let scheme = image
        .image_label(LABEL_PROMETHEUS_SCHEME)
        .unwrap_or(DEFAULT_METRICS_SCHEME);

    Some(ServiceMonitor {
        metadata: meta.app_meta(),
        spec: ServiceMonitorSpec {
            selector: LabelSelector {
                match_labels: Some(app_selector(&meta.app)),
                ..Default::default()
            },
            namespace_selector: Some(NamespaceSelector {
                match_names: vec![meta.namespace.clone()],
            }),
            endpoints: vec![Endpoint {
                port: metrics_port(image, service),
                path: Some(path.to_owned()),
                scheme: Some(scheme.to_owned()),
            }],
        },
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::factory::workload::{container, parse_exposed_ports, ContainerSpec};
    use crate::openshift::image::{DockerConfig, DockerImage, Image};
    use crate::resource::Labels;

    fn meta() -> MetaDefaults {
        MetaDefaults {
            app: "example-quarkus".to_owned(),
            namespace: "kogito".to_owned(),
            labels: Labels::new(),
            annotations: Labels::new(),
        }
    }

    fn ports(label: &str) -> Vec<ContainerPort> {
        container(&ContainerSpec {
            ports: parse_exposed_ports(label),
            ..Default::default()
        })
        .ports
        .unwrap_or_default()
    }

    fn image(labels: &[(&str, &str)]) -> ImageStreamTag {
        ImageStreamTag {
            image: Image {
                docker_image_metadata: DockerImage {
                    config: DockerConfig {
                        labels: labels
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect(),
                    },
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn no_service_without_ports() {
        assert!(service(&meta(), &[]).is_none());
    }

    #[test]
    fn route_targets_the_first_port() {
        let svc = service(&meta(), &ports("8080:http,9000:admin")).unwrap();
        let selector = svc.spec.as_ref().and_then(|s| s.selector.as_ref()).unwrap();
        assert_eq!("example-quarkus", selector["app"]);

        let route = route(&meta(), &svc).unwrap();
        assert_eq!("example-quarkus", route.spec.to.name);
        assert_eq!(
            IntOrString::String("http".to_owned()),
            route.spec.port.unwrap().target_port
        );
    }

    #[test]
    fn monitor_requires_scrape_label() {
        let svc = service(&meta(), &ports("8080:http,9000:admin")).unwrap();
        assert!(service_monitor(&meta(), &image(&[]), &svc).is_none());

        let monitor = service_monitor(
            &meta(),
            &image(&[(LABEL_PROMETHEUS_SCRAPE, "true"), (LABEL_PROMETHEUS_PORT, "9000")]),
            &svc,
        )
        .unwrap();
        let endpoint = &monitor.spec.endpoints[0];
        assert_eq!(Some("admin"), endpoint.port.as_deref());
        assert_eq!(Some(DEFAULT_METRICS_PATH), endpoint.path.as_deref());
        assert_eq!(Some(DEFAULT_METRICS_SCHEME), endpoint.scheme.as_deref());
        assert_eq!(
            vec!["kogito".to_owned()],
            monitor.spec.namespace_selector.unwrap().match_names
        );
    }
}
