use crate::k8s_types;
use crate::openshift::ImageReference;
use crate::resource::Labels;

use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

pub const STRATEGY_ROLLING: &str = "Rolling";
pub const TRIGGER_IMAGE_CHANGE: &str = "ImageChange";
pub const TRIGGER_CONFIG_CHANGE: &str = "ConfigChange";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: DeploymentConfigSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentConfigStatus>,
}

kube_object!(DeploymentConfig => k8s_types::apps_openshift_io::v1::DeploymentConfig);

impl DeploymentConfig {
    pub fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(1)
    }

    pub fn image_change_triggers(&self) -> impl Iterator<Item = &ImageChangeParams> {
        self.spec
            .triggers
            .iter()
            .filter_map(|trigger| trigger.image_change_params.as_ref())
    }

    pub fn image_change_triggers_mut(&mut self) -> impl Iterator<Item = &mut ImageChangeParams> {
        self.spec
            .triggers
            .iter_mut()
            .filter_map(|trigger| trigger.image_change_params.as_mut())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<DeploymentStrategy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<DeploymentTriggerPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Labels>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PodTemplateSpec>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStrategy {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_params: Option<RollingDeploymentStrategyParams>,
}

impl DeploymentStrategy {
    pub fn rolling() -> DeploymentStrategy {
        DeploymentStrategy {
            type_: STRATEGY_ROLLING.to_owned(),
            rolling_params: None,
        }
    }
}

/// Every field here is filled in by the api server when left empty
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingDeploymentStrategyParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_period_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_surge: Option<IntOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTriggerPolicy {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_change_params: Option<ImageChangeParams>,
}

impl DeploymentTriggerPolicy {
    pub fn config_change() -> DeploymentTriggerPolicy {
        DeploymentTriggerPolicy {
            type_: TRIGGER_CONFIG_CHANGE.to_owned(),
            image_change_params: None,
        }
    }

    pub fn image_change(container_name: impl Into<String>, from: ImageReference) -> DeploymentTriggerPolicy {
        DeploymentTriggerPolicy {
            type_: TRIGGER_IMAGE_CHANGE.to_owned(),
            image_change_params: Some(ImageChangeParams {
                automatic: true,
                container_names: vec![container_name.into()],
                from,
                last_triggered_image: None,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageChangeParams {
    #[serde(default, skip_serializing_if = "crate::openshift::is_false")]
    pub automatic: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_names: Vec<String>,
    pub from: ImageReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfigStatus {
    #[serde(default)]
    pub latest_version: i64,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub available_replicas: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<DeploymentCondition>,
}

/// Shared by `DeploymentConfig` and the conditions mirrored into the Kogito status
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn image_change_trigger_serializes_with_container_names() {
        let trigger = DeploymentTriggerPolicy::image_change(
            "example-quarkus",
            ImageReference::image_stream_tag("example-quarkus:latest"),
        );
        let value = serde_json::to_value(&trigger).unwrap();
        assert_eq!(
            json!({
                "type": "ImageChange",
                "imageChangeParams": {
                    "automatic": true,
                    "containerNames": ["example-quarkus"],
                    "from": { "kind": "ImageStreamTag", "name": "example-quarkus:latest" }
                }
            }),
            value
        );
    }

    #[test]
    fn replicas_default_to_one() {
        let dc = DeploymentConfig::default();
        assert_eq!(1, dc.replicas());
        assert_eq!(0, dc.image_change_triggers().count());
    }
}
