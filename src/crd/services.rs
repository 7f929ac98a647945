//! Custom resources that deploy an image that was built outside of the cluster.
use crate::config::ImageDefaults;
use crate::crd::{
    env_var, Image, KogitoService, KogitoServiceStatus, ServiceDeploymentSpec, ServiceSpec,
};
use crate::k8s_types;
use crate::resource::KubeObject;

use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub const ENV_BACKOFF_RETRY_MILLIS: &str = "BACKOFF_RETRY_MILLIS";
pub const ENV_MAX_INTERVAL_LIMIT_RETRY_MILLIS: &str = "MAX_INTERVAL_LIMIT_RETRY_MILLIS";

/// A Kogito custom resource whose image is pulled from an external registry and imported into an
/// `ImageStream`, instead of being built by the operator.
pub trait RuntimeService: KogitoService<Status = KogitoServiceStatus> {
    /// The image used when the custom resource does not declare one
    fn default_image(&self, defaults: &ImageDefaults) -> Image;

    /// Environment that is specific to this kind of service and always set on the container
    fn extra_env(&self) -> Vec<EnvVar> {
        Vec::new()
    }

    /// The declared image, with every missing part taken from the default image
    fn resolved_image(&self, defaults: &ImageDefaults) -> Image {
        let default_image = self.default_image(defaults);
        match self.spec().image() {
            Some(image) => image.or_defaults(&default_image),
            None => default_image,
        }
    }
}

macro_rules! runtime_service {
    ($object_type:ident, $spec_type:ident, $k8s_type:expr) => {
        kube_object!($object_type => $k8s_type);

        impl KogitoService for $object_type {
            type Spec = $spec_type;
            type Status = KogitoServiceStatus;

            fn spec(&self) -> &$spec_type {
                &self.spec
            }

            fn status(&self) -> Option<&KogitoServiceStatus> {
                self.status.as_ref()
            }

            fn status_mut(&mut self) -> &mut KogitoServiceStatus {
                self.status.get_or_insert_with(KogitoServiceStatus::default)
            }
        }

        impl ServiceSpec for $spec_type {
            fn deployment_spec(&self) -> &ServiceDeploymentSpec {
                &self.service
            }

            fn deployment_spec_mut(&mut self) -> &mut ServiceDeploymentSpec {
                &mut self.service
            }
        }
    };
}

/// A pre-built quarkus or spring boot application
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KogitoRuntime {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: KogitoRuntimeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<KogitoServiceStatus>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KogitoRuntimeSpec {
    #[serde(flatten)]
    pub service: ServiceDeploymentSpec,
}

runtime_service!(
    KogitoRuntime,
    KogitoRuntimeSpec,
    k8s_types::app_kiegroup_org::v1alpha1::KogitoRuntime
);

impl RuntimeService for KogitoRuntime {
    /// an image named after the custom resource, in the default registry
    fn default_image(&self, defaults: &ImageDefaults) -> Image {
        defaults.image(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KogitoDataIndex {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: KogitoDataIndexSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<KogitoServiceStatus>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KogitoDataIndexSpec {
    #[serde(flatten)]
    pub service: ServiceDeploymentSpec,
}

runtime_service!(
    KogitoDataIndex,
    KogitoDataIndexSpec,
    k8s_types::app_kiegroup_org::v1alpha1::KogitoDataIndex
);

impl RuntimeService for KogitoDataIndex {
    fn default_image(&self, defaults: &ImageDefaults) -> Image {
        defaults.image(&defaults.data_index)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KogitoJobsService {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: KogitoJobsServiceSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<KogitoServiceStatus>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KogitoJobsServiceSpec {
    #[serde(flatten)]
    pub service: ServiceDeploymentSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_off_retry_millis: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_interval_limit_to_retry_millis: Option<i64>,
}

runtime_service!(
    KogitoJobsService,
    KogitoJobsServiceSpec,
    k8s_types::app_kiegroup_org::v1alpha1::KogitoJobsService
);

impl RuntimeService for KogitoJobsService {
    fn default_image(&self, defaults: &ImageDefaults) -> Image {
        defaults.image(&defaults.jobs_service)
    }

    fn extra_env(&self) -> Vec<EnvVar> {
        let mut env = Vec::new();
        if let Some(millis) = self.spec.back_off_retry_millis.filter(|m| *m > 0) {
            env.push(env_var(ENV_BACKOFF_RETRY_MILLIS, &millis.to_string()));
        }
        if let Some(millis) = self
            .spec
            .max_interval_limit_to_retry_millis
            .filter(|m| *m > 0)
        {
            env.push(env_var(ENV_MAX_INTERVAL_LIMIT_RETRY_MILLIS, &millis.to_string()));
        }
        env
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_index_uses_default_image_when_none_is_declared() {
        let data_index = KogitoDataIndex {
            metadata: ObjectMeta {
                name: Some("data-index".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };
        let image = data_index.resolved_image(&ImageDefaults::default());
        assert_eq!("quay.io/kiegroup/kogito-data-index:0.9.0", image.to_string());
    }

    #[test]
    fn runtime_image_is_completed_from_defaults() {
        let runtime: KogitoRuntime = serde_json::from_value(json!({
            "metadata": { "name": "travels", "namespace": "kogito" },
            "spec": { "image": { "namespace": "myteam", "tag": "1.0" } }
        }))
        .unwrap();
        let image = runtime.resolved_image(&ImageDefaults::default());
        assert_eq!("quay.io/myteam/travels:1.0", image.to_string());
    }

    #[test]
    fn jobs_service_exposes_retry_settings_as_env() {
        let jobs: KogitoJobsService = serde_json::from_value(json!({
            "metadata": { "name": "jobs-service" },
            "spec": { "backOffRetryMillis": 2000, "maxIntervalLimitToRetryMillis": 0 }
        }))
        .unwrap();
        let env = jobs.extra_env();
        assert_eq!(1, env.len());
        assert_eq!(ENV_BACKOFF_RETRY_MILLIS, env[0].name);
        assert_eq!(Some("2000"), env[0].value.as_deref());
    }
}
