//! Serializable representations of the OpenShift and prometheus-operator kinds that the operator manages.
//! `k8s_openapi` only covers upstream Kubernetes, so these are declared here with just the fields that
//! the operator reads or writes. Unknown fields returned by the api server are ignored on deserialization.
pub mod apps;
pub mod build;
pub mod image;
pub mod monitoring;
pub mod route;

use std::fmt::{self, Display};

pub const KIND_IMAGE_STREAM_TAG: &str = "ImageStreamTag";
pub const KIND_DOCKER_IMAGE: &str = "DockerImage";

/// A reference to an image, either through an `ImageStreamTag` (`name:tag`) or a `DockerImage` pull spec.
/// This is the `ObjectReference` shape used by builds, triggers and image stream tags.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ImageReference {
    pub fn image_stream_tag(name: impl Into<String>) -> ImageReference {
        ImageReference {
            kind: KIND_IMAGE_STREAM_TAG.to_owned(),
            name: name.into(),
            namespace: None,
        }
    }

    pub fn docker_image(pull_spec: impl Into<String>) -> ImageReference {
        ImageReference {
            kind: KIND_DOCKER_IMAGE.to_owned(),
            name: pull_spec.into(),
            namespace: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> ImageReference {
        self.namespace = Some(namespace.into());
        self
    }

    /// An empty namespace is resolved by the cluster to the namespace of the referencing object
    pub fn namespace_or_default<'a>(&'a self, default: &'a str) -> &'a str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => default,
        }
    }
}

impl Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => write!(f, "{} {}/{}", self.kind, ns, self.name),
            _ => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}
