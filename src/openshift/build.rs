use crate::k8s_types;
use crate::openshift::ImageReference;

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use std::fmt::{self, Display};

pub const SOURCE_TYPE_GIT: &str = "Git";
pub const SOURCE_TYPE_BINARY: &str = "Binary";
pub const SOURCE_TYPE_IMAGE: &str = "Image";
pub const STRATEGY_TYPE_SOURCE: &str = "Source";
pub const TRIGGER_TYPE_IMAGE_CHANGE: &str = "ImageChange";
pub const TRIGGER_TYPE_CONFIG_CHANGE: &str = "ConfigChange";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: BuildConfigSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BuildConfigStatus>,
}

kube_object!(BuildConfig => k8s_types::build_openshift_io::v1::BuildConfig);

impl BuildConfig {
    /// the `Source` strategy, which is the only strategy the operator generates
    pub fn source_strategy(&self) -> Option<&SourceBuildStrategy> {
        self.spec.strategy.source_strategy.as_ref()
    }

    pub fn source_strategy_mut(&mut self) -> &mut SourceBuildStrategy {
        self.spec
            .strategy
            .source_strategy
            .get_or_insert_with(SourceBuildStrategy::default)
    }

    pub fn output_image(&self) -> Option<&ImageReference> {
        self.spec.output.to.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfigSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<BuildTriggerPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_policy: Option<String>,
    #[serde(default)]
    pub source: BuildSource,
    #[serde(default)]
    pub strategy: BuildStrategy,
    #[serde(default)]
    pub output: BuildOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSource {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitBuildSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageSource>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitBuildSource {
    pub uri: String,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSource {
    pub from: ImageReference,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<ImageSourcePath>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSourcePath {
    pub source_path: String,
    pub destination_dir: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStrategy {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_strategy: Option<SourceBuildStrategy>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBuildStrategy {
    #[serde(default)]
    pub from: ImageReference,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incremental: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ImageReference>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTriggerPolicy {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_change: Option<ImageChangeTrigger>,
}

impl BuildTriggerPolicy {
    pub fn image_change(from: Option<ImageReference>) -> BuildTriggerPolicy {
        BuildTriggerPolicy {
            type_: TRIGGER_TYPE_IMAGE_CHANGE.to_owned(),
            image_change: Some(ImageChangeTrigger {
                from,
                last_triggered_image_id: None,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageChangeTrigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ImageReference>,
    #[serde(rename = "lastTriggeredImageID", default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_image_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfigStatus {
    #[serde(default)]
    pub last_version: i64,
}

/// Lifecycle phase of a single build. Unrecognized phases deserialize as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BuildPhase {
    New,
    Pending,
    Running,
    Complete,
    Failed,
    Error,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl BuildPhase {
    /// `New`, `Pending` and `Running` builds may still produce an image
    pub fn is_in_flight(self) -> bool {
        match self {
            BuildPhase::New | BuildPhase::Pending | BuildPhase::Running => true,
            _ => false,
        }
    }

    pub fn is_failure(self) -> bool {
        match self {
            BuildPhase::Failed | BuildPhase::Error | BuildPhase::Cancelled => true,
            _ => false,
        }
    }
}

impl Default for BuildPhase {
    fn default() -> BuildPhase {
        BuildPhase::New
    }
}

impl Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: BuildStatus,
}

kube_object!(Build => k8s_types::build_openshift_io::v1::Build);

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    #[serde(default)]
    pub phase: BuildPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The body of a `buildconfigs/instantiate` request
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggered_by: Vec<BuildTriggerCause>,
}

impl BuildRequest {
    pub fn new(build_config_name: impl Into<String>, message: impl Into<String>) -> BuildRequest {
        BuildRequest {
            metadata: ObjectMeta {
                name: Some(build_config_name.into()),
                ..Default::default()
            },
            triggered_by: vec![BuildTriggerCause {
                message: message.into(),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTriggerCause {
    pub message: String,
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_build_phases_are_not_in_flight() {
        let status: BuildStatus = serde_json::from_value(json!({"phase": "Paused"})).unwrap();
        assert_eq!(BuildPhase::Unknown, status.phase);
        assert!(!status.phase.is_in_flight());
        assert!(BuildPhase::Pending.is_in_flight());
        assert!(BuildPhase::Cancelled.is_failure());
    }

    #[test]
    fn git_reference_is_serialized_as_ref() {
        let source = GitBuildSource {
            uri: "https://github.com/kiegroup/kogito-examples".to_owned(),
            reference: Some("master".to_owned()),
        };
        let value = serde_json::to_value(&source).unwrap();
        assert_eq!(json!({"uri": "https://github.com/kiegroup/kogito-examples", "ref": "master"}), value);
    }
}
