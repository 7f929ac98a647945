use crate::conditions::ConditionHistory;
use crate::openshift::apps::DeploymentCondition;
use crate::openshift::build::{Build, BuildPhase};
use crate::resource::KubeObject;

/// Operator owned status shared by every Kogito custom resource
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KogitoServiceStatus {
    #[serde(default)]
    pub conditions: ConditionHistory,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deployment_conditions: Vec<DeploymentCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(rename = "externalURI", default, skip_serializing_if = "Option::is_none")]
    pub external_uri: Option<String>,
}

/// Build names grouped by the phase they were last observed in
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildsStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub running: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub complete: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cancelled: Vec<String>,
}

impl BuildsStatus {
    pub fn from_builds<'a>(builds: impl IntoIterator<Item = &'a Build>) -> BuildsStatus {
        let mut status = BuildsStatus::default();
        for build in builds {
            let name = build.name().to_owned();
            match build.status.phase {
                BuildPhase::New => status.new.push(name),
                BuildPhase::Pending => status.pending.push(name),
                BuildPhase::Running => status.running.push(name),
                BuildPhase::Complete => status.complete.push(name),
                BuildPhase::Failed => status.failed.push(name),
                BuildPhase::Error => status.error.push(name),
                BuildPhase::Cancelled => status.cancelled.push(name),
                BuildPhase::Unknown => {}
            }
        }
        for names in status.all_mut().iter_mut() {
            names.sort();
        }
        status
    }

    fn all_mut(&mut self) -> [&mut Vec<String>; 7] {
        [
            &mut self.new,
            &mut self.pending,
            &mut self.running,
            &mut self.complete,
            &mut self.failed,
            &mut self.error,
            &mut self.cancelled,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KogitoAppStatus {
    #[serde(flatten)]
    pub service: KogitoServiceStatus,
    #[serde(default)]
    pub builds: BuildsStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_build: Option<String>,
}

/// Capabilities shared by the status of every Kogito custom resource
pub trait ServiceStatus {
    fn service_status(&self) -> &KogitoServiceStatus;

    fn service_status_mut(&mut self) -> &mut KogitoServiceStatus;

    fn conditions(&self) -> &ConditionHistory {
        &self.service_status().conditions
    }

    fn conditions_mut(&mut self) -> &mut ConditionHistory {
        &mut self.service_status_mut().conditions
    }

    fn deployment_conditions(&self) -> &[DeploymentCondition] {
        &self.service_status().deployment_conditions
    }

    fn set_deployment_conditions(&mut self, conditions: Vec<DeploymentCondition>) {
        self.service_status_mut().deployment_conditions = conditions;
    }

    fn image(&self) -> Option<&str> {
        self.service_status().image.as_deref()
    }

    fn set_image(&mut self, image: Option<String>) {
        self.service_status_mut().image = image;
    }

    fn external_uri(&self) -> Option<&str> {
        self.service_status().external_uri.as_deref()
    }

    fn set_external_uri(&mut self, uri: Option<String>) {
        self.service_status_mut().external_uri = uri;
    }
}

impl ServiceStatus for KogitoServiceStatus {
    fn service_status(&self) -> &KogitoServiceStatus {
        self
    }

    fn service_status_mut(&mut self) -> &mut KogitoServiceStatus {
        self
    }
}

impl ServiceStatus for KogitoAppStatus {
    fn service_status(&self) -> &KogitoServiceStatus {
        &self.service
    }

    fn service_status_mut(&mut self) -> &mut KogitoServiceStatus {
        &mut self.service
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::json;

    fn build(name: &str, phase: BuildPhase) -> Build {
        let mut build = Build {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };
        build.status.phase = phase;
        build
    }

    #[test]
    fn builds_are_grouped_by_phase() {
        let builds = vec![
            build("example-builder-2", BuildPhase::Running),
            build("example-builder-1", BuildPhase::Failed),
            build("example-1", BuildPhase::Complete),
            build("example-2", BuildPhase::Running),
        ];
        let status = BuildsStatus::from_builds(&builds);
        assert_eq!(vec!["example-2", "example-builder-2"], status.running);
        assert_eq!(vec!["example-builder-1"], status.failed);
        assert_eq!(vec!["example-1"], status.complete);
        assert!(status.new.is_empty());
    }

    #[test]
    fn app_status_is_flattened() {
        let mut status = KogitoAppStatus::default();
        status.set_external_uri(Some("http://example".to_owned()));
        status.latest_build = Some("example-1".to_owned());
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json!({
                "conditions": [],
                "externalURI": "http://example",
                "builds": {},
                "latestBuild": "example-1",
            }),
            value
        );
        let parsed: KogitoAppStatus = serde_json::from_value(value).unwrap();
        assert_eq!(status, parsed);
    }
}
