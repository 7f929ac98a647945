use crate::crd::{
    GitSource, Image, KogitoAppStatus, KogitoService, ServiceDeploymentSpec, ServiceSpec,
};
use crate::k8s_types;

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// A Kogito service built from source inside the cluster, through an S2I build followed by a
/// runtime build that copies the S2I output into a slim runtime image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KogitoApp {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: KogitoAppSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<KogitoAppStatus>,
}

kube_object!(KogitoApp => k8s_types::app_kiegroup_org::v1alpha1::KogitoApp);

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KogitoAppSpec {
    #[serde(flatten)]
    pub service: ServiceDeploymentSpec,
    #[serde(default)]
    pub build: KogitoAppBuild,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KogitoAppBuild {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_source: Option<GitSource>,
    #[serde(default)]
    pub incremental: bool,
    #[serde(default)]
    pub native: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// overrides the default S2I builder image for the runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_s2i: Option<Image>,
    /// overrides the default base image of the runtime build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_runtime: Option<Image>,
}

impl ServiceSpec for KogitoAppSpec {
    fn deployment_spec(&self) -> &ServiceDeploymentSpec {
        &self.service
    }

    fn deployment_spec_mut(&mut self) -> &mut ServiceDeploymentSpec {
        &mut self.service
    }
}

impl KogitoService for KogitoApp {
    type Spec = KogitoAppSpec;
    type Status = KogitoAppStatus;

    fn spec(&self) -> &KogitoAppSpec {
        &self.spec
    }

    fn status(&self) -> Option<&KogitoAppStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut KogitoAppStatus {
        self.status.get_or_insert_with(KogitoAppStatus::default)
    }
}

impl KogitoApp {
    pub fn git_source(&self) -> Option<&GitSource> {
        self.spec
            .build
            .git_source
            .as_ref()
            .filter(|git| !git.uri.is_empty())
    }
}
