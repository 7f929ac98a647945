use crate::k8s_types;
use crate::openshift::ImageReference;
use crate::resource::{KubeObject, Labels};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStream {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ImageStreamSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ImageStreamStatus>,
}

kube_object!(ImageStream => k8s_types::image_openshift_io::v1::ImageStream);

impl ImageStream {
    pub fn tag(&self, name: &str) -> Option<&TagReference> {
        self.spec.tags.iter().find(|tag| tag.name == name)
    }

    /// true if the stream has already imported an image for the given tag
    pub fn has_imported_tag(&self, name: &str) -> bool {
        self.status
            .as_ref()
            .map(|status| {
                status
                    .tags
                    .iter()
                    .any(|tag| tag.tag == name && !tag.items.is_empty())
            })
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_policy: Option<ImageLookupPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagReference>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLookupPolicy {
    pub local: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ImageReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_policy: Option<TagImportPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_policy: Option<TagReferencePolicy>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagImportPolicy {
    #[serde(default, skip_serializing_if = "crate::openshift::is_false")]
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "crate::openshift::is_false")]
    pub scheduled: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagReferencePolicy {
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image_repository: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<NamedTagEventList>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedTagEventList {
    pub tag: String,
    #[serde(default)]
    pub items: Vec<TagEvent>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagEvent {
    #[serde(default)]
    pub docker_image_reference: String,
    #[serde(default)]
    pub image: String,
}

/// A resolved `<stream>:<tag>`. The name of an `ImageStreamTag` object is always `<stream>:<tag>`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamTag {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TagReference>,
    #[serde(default)]
    pub image: Image,
}

kube_object!(ImageStreamTag => k8s_types::image_openshift_io::v1::ImageStreamTag);

impl ImageStreamTag {
    pub fn tag_name(stream: &str, tag: &str) -> String {
        format!("{}:{}", stream, tag)
    }

    /// The labels baked into the image by its Dockerfile or S2I scripts
    pub fn image_labels(&self) -> &Labels {
        &self.image.docker_image_metadata.config.labels
    }

    pub fn image_label(&self, key: &str) -> Option<&str> {
        self.image_labels().get(key).map(String::as_str)
    }

    pub fn docker_image_reference(&self) -> &str {
        self.image.docker_image_reference.as_str()
    }

    /// The stream name, taken from the `<stream>:<tag>` object name
    pub fn stream_name(&self) -> &str {
        let name = self.name();
        name.rsplitn(2, ':').last().unwrap_or(name)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(default)]
    pub docker_image_reference: String,
    #[serde(default)]
    pub docker_image_metadata: DockerImage,
}

/// Image metadata uses the docker capitalized field names
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DockerImage {
    #[serde(rename = "Config", default)]
    pub config: DockerConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(rename = "Labels", default)]
    pub labels: Labels,
}
