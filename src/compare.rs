//! Decides whether a deployed object still matches the requested one, and merges the requested state
//! into the deployed object when it doesn't. The generic rule is the superset comparison from
//! `values::compare_values`, applied to everything but metadata and status. Labels follow their own
//! asymmetric rule: requested labels must be a subset of the deployed ones, and labels that only exist
//! on the deployed object are never removed.
pub mod values;

pub use self::values::{compare_values, merge_values, Diff, Diffs};

use crate::client::ResourceStoreExt;
use crate::error::ReconcileError;
use crate::factory::workload::CONFIG_VOLUME_NAME;
use crate::metrics::Metrics;
use crate::openshift::apps::DeploymentConfig;
use crate::openshift::build::BuildConfig;
use crate::openshift::image::ImageStream;
use crate::openshift::monitoring::ServiceMonitor;
use crate::openshift::route::Route;
use crate::resource::{apply_labels, labels_subset, KubeObject};

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PodSpec, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use k8s_openapi::ByteString;
use serde_json::Value;

use std::collections::BTreeMap;

const UNMANAGED_FIELDS: &[&str] = &["apiVersion", "kind", "metadata", "status"];

/// The json of everything the operator manages on the object, besides its metadata
pub fn managed_fields<T: KubeObject>(object: &T) -> Result<Value, serde_json::Error> {
    let mut value = object.to_value()?;
    if let Some(obj) = value.as_object_mut() {
        for field in UNMANAGED_FIELDS {
            obj.remove(*field);
        }
    }
    Ok(value)
}

/// Kind specific comparison rules. The defaults implement the generic superset comparison and merge.
pub trait Comparable: KubeObject {
    /// Returns a copy of `requested` where the fields that the cluster fills in, and that the operator
    /// doesn't care about, are taken from `deployed`
    fn normalize(requested: &Self, _deployed: &Self) -> Self {
        requested.clone()
    }

    fn fields_equal(deployed: &Self, requested: &Self) -> Result<bool, serde_json::Error> {
        superset_equal(deployed, requested)
    }

    fn merge_fields(deployed: &mut Self, requested: &Self) -> Result<(), serde_json::Error> {
        superset_merge(deployed, requested)
    }
}

fn superset_equal<T: KubeObject>(deployed: &T, requested: &T) -> Result<bool, serde_json::Error> {
    let deployed_fields = managed_fields(deployed)?;
    let requested_fields = managed_fields(requested)?;
    let diffs = compare_values(&deployed_fields, &requested_fields);
    if diffs.non_empty() {
        log::debug!(
            "{} {} differs from the requested state: {}",
            T::k8s_type().kind,
            deployed.object_id(),
            diffs
        );
    }
    Ok(diffs.is_empty())
}

fn superset_merge<T: KubeObject>(deployed: &mut T, requested: &T) -> Result<(), serde_json::Error> {
    let requested_fields = managed_fields(requested)?;
    let mut value = deployed.to_value()?;
    merge_values(&mut value, &requested_fields);
    *deployed = T::from_value(value)?;
    Ok(())
}

/// Returns true if `deployed` matches `requested` according to the rules of its kind
pub fn equal<T: Comparable>(deployed: &T, requested: &T) -> Result<bool, serde_json::Error> {
    if !labels_subset(&requested.labels(), &deployed.labels()) {
        log::debug!(
            "{} {} is missing some of the requested labels",
            T::k8s_type().kind,
            deployed.object_id()
        );
        return Ok(false);
    }
    let requested = T::normalize(requested, deployed);
    T::fields_equal(deployed, &requested)
}

/// Merges the requested state into the deployed object in place. Labels that only exist on the deployed
/// object are kept.
pub fn merge_requested<T: Comparable>(deployed: &mut T, requested: &T) -> Result<(), serde_json::Error> {
    let requested = T::normalize(requested, deployed);
    apply_labels(&requested.labels(), deployed.labels_mut());
    T::merge_fields(deployed, &requested)
}

/// Compares the objects, and issues a single update if they differ. Returns the object as it is in the
/// cluster afterwards, and whether it was updated.
pub fn update_if_changed<T: Comparable>(
    store: &dyn crate::client::ResourceStore,
    metrics: &Metrics,
    mut deployed: T,
    requested: &T,
) -> Result<(T, bool), ReconcileError> {
    if equal(&deployed, requested)? {
        return Ok((deployed, false));
    }
    merge_requested(&mut deployed, requested)?;
    log::info!("Updating {} {}", T::k8s_type().kind, deployed.object_id());
    let updated = store.update_object(&deployed)?;
    metrics.resource_updated(T::k8s_type());
    Ok((updated, true))
}

fn namespace_is_empty(namespace: &Option<String>) -> bool {
    namespace.as_deref().map(str::is_empty).unwrap_or(true)
}

impl Comparable for BuildConfig {
    /// Base images without a namespace and builds without triggers leave those fields to the cluster
    fn normalize(requested: &BuildConfig, deployed: &BuildConfig) -> BuildConfig {
        let mut requested = requested.clone();
        if requested.spec.triggers.is_empty() {
            requested.spec.triggers = deployed.spec.triggers.clone();
        }
        if let (Some(requested_strategy), Some(deployed_strategy)) = (
            requested.spec.strategy.source_strategy.as_mut(),
            deployed.source_strategy(),
        ) {
            if namespace_is_empty(&requested_strategy.from.namespace) {
                requested_strategy.from.namespace = deployed_strategy.from.namespace.clone();
            }
        }
        requested
    }
}

impl Comparable for DeploymentConfig {
    fn normalize(requested: &DeploymentConfig, deployed: &DeploymentConfig) -> DeploymentConfig {
        let mut requested = requested.clone();
        if let (Some(requested_strategy), Some(deployed_strategy)) =
            (requested.spec.strategy.as_mut(), deployed.spec.strategy.as_ref())
        {
            if requested_strategy.type_ == deployed_strategy.type_
                && requested_strategy.rolling_params.is_none()
            {
                requested_strategy.rolling_params = deployed_strategy.rolling_params.clone();
            }
        }
        // the cluster sets the namespace of image change triggers to the namespace of the workload
        for params in requested.image_change_triggers_mut() {
            if !namespace_is_empty(&params.from.namespace) {
                continue;
            }
            let deployed_params = deployed
                .image_change_triggers()
                .find(|p| p.from.kind == params.from.kind && p.from.name == params.from.name);
            if let Some(deployed_params) = deployed_params {
                params.from.namespace = deployed_params.from.namespace.clone();
                params.last_triggered_image = deployed_params.last_triggered_image.clone();
            }
        }
        requested
    }
}

impl Comparable for Deployment {
    fn normalize(requested: &Deployment, deployed: &Deployment) -> Deployment {
        let mut requested = requested.clone();
        if let (Some(requested_spec), Some(deployed_spec)) = (requested.spec.as_mut(), deployed.spec.as_ref()) {
            match (requested_spec.strategy.as_mut(), deployed_spec.strategy.as_ref()) {
                (None, Some(deployed_strategy)) => {
                    requested_spec.strategy = Some(deployed_strategy.clone());
                }
                (Some(requested_strategy), Some(deployed_strategy))
                    if requested_strategy.type_ == deployed_strategy.type_
                        && requested_strategy.rolling_update.is_none() =>
                {
                    requested_strategy.rolling_update = deployed_strategy.rolling_update.clone();
                }
                _ => {}
            }
        }
        requested
    }

    /// The merge keeps deployed-only entries, so a properties volume that is no longer requested
    /// has to be detected and removed explicitly
    fn fields_equal(deployed: &Deployment, requested: &Deployment) -> Result<bool, serde_json::Error> {
        if mounts_config_volume(deployed) && !mounts_config_volume(requested) {
            log::debug!("Deployment {} still mounts a properties volume", deployed.object_id());
            return Ok(false);
        }
        superset_equal(deployed, requested)
    }

    fn merge_fields(deployed: &mut Deployment, requested: &Deployment) -> Result<(), serde_json::Error> {
        superset_merge(deployed, requested)?;
        if !mounts_config_volume(requested) {
            remove_config_volume(deployed);
        }
        Ok(())
    }
}

fn pod_spec(deployment: &Deployment) -> Option<&PodSpec> {
    deployment.spec.as_ref().and_then(|spec| spec.template.spec.as_ref())
}

fn mounts_config_volume(deployment: &Deployment) -> bool {
    pod_spec(deployment)
        .and_then(|spec| spec.volumes.as_ref())
        .map(|volumes| volumes.iter().any(|v| v.name == CONFIG_VOLUME_NAME))
        .unwrap_or(false)
}

fn remove_config_volume(deployment: &mut Deployment) {
    let spec = match deployment.spec.as_mut().and_then(|spec| spec.template.spec.as_mut()) {
        Some(spec) => spec,
        None => return,
    };
    spec.volumes = spec
        .volumes
        .take()
        .map(|volumes| volumes.into_iter().filter(|v| v.name != CONFIG_VOLUME_NAME).collect::<Vec<_>>())
        .filter(|volumes| !volumes.is_empty());
    for container in spec.containers.iter_mut() {
        container.volume_mounts = container
            .volume_mounts
            .take()
            .map(|mounts| mounts.into_iter().filter(|m| m.name != CONFIG_VOLUME_NAME).collect::<Vec<_>>())
            .filter(|mounts| !mounts.is_empty());
    }
}

impl Comparable for Service {}

impl Comparable for Route {}

impl Comparable for ServiceMonitor {}

impl Comparable for ServiceAccount {}

impl Comparable for RoleBinding {}

impl Comparable for ImageStream {}

impl Comparable for ConfigMap {
    /// The data of a config map is owned entirely by the operator
    fn fields_equal(deployed: &ConfigMap, requested: &ConfigMap) -> Result<bool, serde_json::Error> {
        Ok(deployed.data.clone().unwrap_or_default() == requested.data.clone().unwrap_or_default()
            && deployed.binary_data == requested.binary_data)
    }

    fn merge_fields(deployed: &mut ConfigMap, requested: &ConfigMap) -> Result<(), serde_json::Error> {
        deployed.data = requested.data.clone();
        deployed.binary_data = requested.binary_data.clone();
        Ok(())
    }
}

/// `stringData` is write only, and ends up base64 encoded in `data`
fn decoded_secret_data(secret: &Secret) -> BTreeMap<String, Vec<u8>> {
    let mut data = secret
        .data
        .iter()
        .flat_map(|data| data.iter())
        .map(|(key, value)| (key.clone(), value.0.clone()))
        .collect::<BTreeMap<_, _>>();
    if let Some(string_data) = secret.string_data.as_ref() {
        for (key, value) in string_data {
            data.insert(key.clone(), value.as_bytes().to_vec());
        }
    }
    data
}

impl Comparable for Secret {
    fn fields_equal(deployed: &Secret, requested: &Secret) -> Result<bool, serde_json::Error> {
        Ok(decoded_secret_data(deployed) == decoded_secret_data(requested))
    }

    fn merge_fields(deployed: &mut Secret, requested: &Secret) -> Result<(), serde_json::Error> {
        let data = decoded_secret_data(requested)
            .into_iter()
            .map(|(key, value)| (key, ByteString(value)))
            .collect();
        deployed.data = Some(data);
        deployed.string_data = None;
        if requested.type_.is_some() {
            deployed.type_ = requested.type_.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::openshift::build::{BuildTriggerPolicy, SourceBuildStrategy};
    use crate::openshift::ImageReference;
    use crate::resource::Labels;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::{
        Container, PodTemplateSpec, ServicePort, ServiceSpec, Volume, VolumeMount,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn labels(pairs: &[(&str, &str)]) -> Option<Labels> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn service(labels: Option<Labels>, port: i32) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("example".to_owned()),
                namespace: Some("kogito".to_owned()),
                labels,
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some("http".to_owned()),
                    port,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn deployed_only_labels_are_ignored_and_kept() {
        let requested = service(labels(&[("app", "example")]), 8080);
        let mut deployed = service(labels(&[("app", "example"), ("extra", "x")]), 8080);
        deployed.spec.as_mut().unwrap().cluster_ip = Some("10.0.0.1".to_owned());
        assert!(equal(&deployed, &requested).unwrap());

        // the subset rule is asymmetric
        assert!(!equal(&requested, &deployed).unwrap());

        let requested = service(labels(&[("app", "example"), ("team", "kie")]), 8080);
        assert!(!equal(&deployed, &requested).unwrap());
        merge_requested(&mut deployed, &requested).unwrap();
        assert_eq!(Some("x"), deployed.label("extra"));
        assert_eq!(Some("kie"), deployed.label("team"));
        assert_eq!(
            Some("10.0.0.1"),
            deployed.spec.as_ref().and_then(|s| s.cluster_ip.as_deref())
        );
        assert!(equal(&deployed, &requested).unwrap());
    }

    #[test]
    fn changed_port_is_detected_and_merged() {
        let mut deployed = service(labels(&[("app", "example")]), 8080);
        let requested = service(labels(&[("app", "example")]), 9090);
        assert!(!equal(&deployed, &requested).unwrap());
        merge_requested(&mut deployed, &requested).unwrap();
        assert!(equal(&deployed, &requested).unwrap());
    }

    fn build_config(namespace: Option<&str>, triggers: Vec<BuildTriggerPolicy>) -> BuildConfig {
        let mut bc = BuildConfig::default();
        bc.metadata.name = Some("example-builder".to_owned());
        bc.spec.triggers = triggers;
        bc.spec.strategy.source_strategy = Some(SourceBuildStrategy {
            from: ImageReference {
                kind: "ImageStreamTag".to_owned(),
                name: "kogito-quarkus-ubi8-s2i:0.9.0".to_owned(),
                namespace: namespace.map(str::to_owned),
            },
            env: Vec::new(),
            incremental: None,
        });
        bc
    }

    #[test]
    fn build_config_ignores_defaults_filled_by_the_cluster() {
        let deployed = build_config(Some("openshift"), vec![BuildTriggerPolicy::image_change(None)]);
        let requested = build_config(None, Vec::new());
        assert!(equal(&deployed, &requested).unwrap());

        let requested = build_config(Some("kogito"), Vec::new());
        assert!(!equal(&deployed, &requested).unwrap());
    }

    #[test]
    fn config_map_data_must_match_exactly() {
        let config_map = |pairs: &[(&str, &str)]| ConfigMap {
            metadata: ObjectMeta {
                name: Some("example-properties".to_owned()),
                ..Default::default()
            },
            data: labels(pairs),
            ..Default::default()
        };
        let mut deployed = config_map(&[("a", "1"), ("b", "2")]);
        let requested = config_map(&[("a", "1")]);
        assert!(!equal(&deployed, &requested).unwrap());
        merge_requested(&mut deployed, &requested).unwrap();
        assert!(equal(&deployed, &requested).unwrap());
        assert_eq!(1, deployed.data.unwrap().len());
    }

    fn deployment(with_properties: bool) -> Deployment {
        let mut container = Container {
            name: "data-index".to_owned(),
            ..Default::default()
        };
        let mut pod = PodSpec::default();
        if with_properties {
            container.volume_mounts = Some(vec![VolumeMount {
                name: CONFIG_VOLUME_NAME.to_owned(),
                mount_path: "/home/kogito/config".to_owned(),
                ..Default::default()
            }]);
            pod.volumes = Some(vec![Volume {
                name: CONFIG_VOLUME_NAME.to_owned(),
                ..Default::default()
            }]);
        }
        pod.containers = vec![container];
        Deployment {
            metadata: ObjectMeta {
                name: Some("data-index".to_owned()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    spec: Some(pod),
                    ..Default::default()
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn properties_volume_is_removed_once_no_longer_requested() {
        assert!(equal(&deployment(true), &deployment(true)).unwrap());

        let mut deployed = deployment(true);
        let requested = deployment(false);
        assert!(!equal(&deployed, &requested).unwrap());
        merge_requested(&mut deployed, &requested).unwrap();
        assert!(!mounts_config_volume(&deployed));
        assert!(pod_spec(&deployed).unwrap().containers[0].volume_mounts.is_none());
        assert!(equal(&deployed, &requested).unwrap());
    }

    #[test]
    fn secret_string_data_is_compared_decoded() {
        let mut requested = Secret::default();
        requested.string_data = labels(&[("password", "s3cr3t")]);
        let mut deployed = Secret::default();
        let mut data = BTreeMap::new();
        data.insert("password".to_owned(), ByteString(b"s3cr3t".to_vec()));
        deployed.data = Some(data);
        assert!(equal(&deployed, &requested).unwrap());
    }
}
