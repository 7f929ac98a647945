pub mod object_id;

pub use self::object_id::{ObjectId, ObjectIdRef};

use crate::k8s_types::{self, K8sType};

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use std::collections::BTreeMap;
use std::fmt::Debug;

pub type JsonObject = serde_json::Map<String, Value>;

/// Labels and annotations are both plain string maps
pub type Labels = BTreeMap<String, String>;

/// Common view of every typed Kubernetes object handled by the operator, whether it comes from
/// `k8s_openapi`, from the OpenShift types in `crate::openshift`, or from the Kogito custom resources.
/// Everything that crosses the `ResourceStore` boundary goes through `to_value` and `from_value`.
pub trait KubeObject: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    fn k8s_type() -> &'static K8sType;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or("")
    }

    fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or("")
    }

    fn object_id(&self) -> ObjectId {
        ObjectId::new(self.namespace(), self.name())
    }

    fn uid(&self) -> Option<&str> {
        self.metadata().uid.as_deref()
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.metadata()
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    fn labels(&self) -> Labels {
        self.metadata().labels.clone().unwrap_or_default()
    }

    fn labels_mut(&mut self) -> &mut Labels {
        self.metadata_mut().labels.get_or_insert_with(Labels::new)
    }

    /// Serializes the object, making sure that `apiVersion` and `kind` are present even for the
    /// hand written types that don't carry them as fields.
    fn to_value(&self) -> Result<Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            let k8s_type = Self::k8s_type();
            obj.entry("apiVersion")
                .or_insert_with(|| Value::from(k8s_type.api_version));
            obj.entry("kind")
                .or_insert_with(|| Value::from(k8s_type.kind));
        }
        Ok(value)
    }

    fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

macro_rules! kube_object {
    ($object_type:ty => $k8s_type:expr) => {
        impl crate::resource::KubeObject for $object_type {
            fn k8s_type() -> &'static crate::k8s_types::K8sType {
                $k8s_type
            }

            fn metadata(&self) -> &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(
                &mut self,
            ) -> &mut k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

kube_object!(Deployment => k8s_types::apps::v1::Deployment);
kube_object!(Service => k8s_types::core::v1::Service);
kube_object!(Secret => k8s_types::core::v1::Secret);
kube_object!(ConfigMap => k8s_types::core::v1::ConfigMap);
kube_object!(ServiceAccount => k8s_types::core::v1::ServiceAccount);
kube_object!(RoleBinding => k8s_types::rbac_authorization_k8s_io::v1::RoleBinding);

/// Identifies the custom resource that owns every object created during a reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Owner {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub name: String,
    pub uid: String,
}

impl Owner {
    pub fn of<T: KubeObject>(owner: &T) -> Owner {
        let k8s_type = T::k8s_type();
        Owner {
            api_version: k8s_type.api_version,
            kind: k8s_type.kind,
            name: owner.name().to_owned(),
            uid: owner.uid().unwrap_or("").to_owned(),
        }
    }

    fn to_owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.to_owned(),
            kind: self.kind.to_owned(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// Adds a controller reference to the owner unless the child already has one for the same uid.
/// Deletion of the children is left to the cluster garbage collector.
pub fn add_owner_reference(meta: &mut ObjectMeta, owner: &Owner) {
    let owner_refs = meta.owner_references.get_or_insert_with(Vec::new);
    let new_ref = owner.to_owner_reference();
    if !owner_refs.iter().any(|existing| existing.uid == new_ref.uid) {
        owner_refs.push(new_ref);
    }
}

/// returns true if every key/value in `requested` is also present in `deployed`. Extra labels in
/// `deployed` are allowed, since they may have been added by the cluster or by other controllers.
pub fn labels_subset(requested: &Labels, deployed: &Labels) -> bool {
    requested
        .iter()
        .all(|(key, value)| deployed.get(key) == Some(value))
}

/// Copies every requested label into `deployed`, returning true if anything changed. Labels that
/// are only present in `deployed` are left alone.
pub fn apply_labels(requested: &Labels, deployed: &mut Labels) -> bool {
    let mut changed = false;
    for (key, value) in requested {
        if deployed.get(key) != Some(value) {
            deployed.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

pub fn str_value<'a, 'b>(json: &'a Value, pointer: &'b str) -> Option<&'a str> {
    json.pointer(pointer).and_then(Value::as_str)
}

#[cfg(test)]
mod test {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn requested_labels_must_be_a_subset_of_deployed() {
        let deployed = labels(&[("app", "x"), ("extra", "y")]);
        assert!(labels_subset(&labels(&[("app", "x")]), &deployed));
        assert!(!labels_subset(&labels(&[("app", "x"), ("team", "a")]), &deployed));
        assert!(!labels_subset(&labels(&[("app", "z")]), &deployed));
    }

    #[test]
    fn apply_labels_keeps_deployed_only_labels() {
        let mut deployed = labels(&[("app", "x"), ("extra", "y")]);
        assert!(apply_labels(&labels(&[("team", "a")]), &mut deployed));
        assert_eq!(labels(&[("app", "x"), ("extra", "y"), ("team", "a")]), deployed);
        assert!(!apply_labels(&labels(&[("team", "a")]), &mut deployed));
    }

    #[test]
    fn to_value_includes_api_version_and_kind() {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some("props".to_owned()),
                namespace: Some("kogito".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };
        let value = config_map.to_value().unwrap();
        assert_eq!(Some("v1"), str_value(&value, "/apiVersion"));
        assert_eq!(Some("ConfigMap"), str_value(&value, "/kind"));
        assert_eq!(ObjectId::new("kogito", "props"), config_map.object_id());
    }

    #[test]
    fn owner_reference_is_only_added_once() {
        let owner = Owner {
            api_version: "app.kiegroup.org/v1alpha1",
            kind: "KogitoApp",
            name: "example".to_owned(),
            uid: "1234".to_owned(),
        };
        let mut meta = ObjectMeta::default();
        add_owner_reference(&mut meta, &owner);
        add_owner_reference(&mut meta, &owner);
        let refs = meta.owner_references.unwrap();
        assert_eq!(1, refs.len());
        assert_eq!(Some(true), refs[0].controller);
        assert_eq!("KogitoApp", refs[0].kind);
    }
}
