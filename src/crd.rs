//! The Kogito custom resources. `KogitoApp` builds its image from source inside the cluster, while
//! `KogitoRuntime`, `KogitoDataIndex` and `KogitoJobsService` deploy an image that already exists in
//! some registry. All of them share the `ServiceDeploymentSpec` and the `KogitoServiceStatus`, which
//! are exposed through the `ServiceSpec`, `ServiceStatus` and `KogitoService` traits so that the
//! factories and the reconciler can treat every variant the same way.
pub mod app;
pub mod services;
pub mod status;

pub use self::app::{KogitoApp, KogitoAppBuild, KogitoAppSpec};
pub use self::services::{
    KogitoDataIndex, KogitoDataIndexSpec, KogitoJobsService, KogitoJobsServiceSpec, KogitoRuntime,
    KogitoRuntimeSpec, RuntimeService,
};
pub use self::status::{BuildsStatus, KogitoAppStatus, KogitoServiceStatus, ServiceStatus};

use crate::resource::{KubeObject, Labels};

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use std::fmt::{self, Debug, Display};
use std::str::FromStr;

pub const DEFAULT_HTTP_PORT: i32 = 8080;
pub const DEFAULT_REPLICAS: i32 = 1;
pub const DEFAULT_IMAGE_TAG: &str = "latest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Quarkus,
    Springboot,
}

impl Default for Runtime {
    fn default() -> Runtime {
        Runtime::Quarkus
    }
}

impl Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Runtime::Quarkus => f.write_str("quarkus"),
            Runtime::Springboot => f.write_str("springboot"),
        }
    }
}

lazy_static! {
    static ref IMAGE_REGEX: Regex = Regex::new(
        r"^(?:(?P<domain>[^/]*[.:][^/]*|localhost)/)?(?:(?P<namespace>[^/:@]+)/)?(?P<name>[^/:@]+)(?::(?P<tag>[^/:@]+))?$"
    )
    .unwrap();
}

/// Coordinates of a container image: `domain/namespace/name:tag`. Any part but the name may be empty,
/// in which case it is filled in from the operator's `ImageDefaults`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
}

impl Image {
    pub fn new(
        domain: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Image {
        Image {
            domain: domain.into(),
            namespace: namespace.into(),
            name: name.into(),
            tag: tag.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// Returns a copy where every empty part is taken from `defaults`
    pub fn or_defaults(&self, defaults: &Image) -> Image {
        fn pick(value: &str, default: &str) -> String {
            if value.is_empty() {
                default.to_owned()
            } else {
                value.to_owned()
            }
        }
        Image {
            domain: pick(&self.domain, &defaults.domain),
            namespace: pick(&self.namespace, &defaults.namespace),
            name: pick(&self.name, &defaults.name),
            tag: pick(&self.tag, &defaults.tag),
        }
    }

    pub fn tag_or_latest(&self) -> &str {
        if self.tag.is_empty() {
            DEFAULT_IMAGE_TAG
        } else {
            self.tag.as_str()
        }
    }

    /// The `name:tag` of the `ImageStreamTag` that this image is imported into
    pub fn stream_tag(&self) -> String {
        format!("{}:{}", self.name, self.tag_or_latest())
    }
}

impl Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if !self.domain.is_empty() {
            write!(f, "{}/", self.domain)?;
        }
        if !self.namespace.is_empty() {
            write!(f, "{}/", self.namespace)?;
        }
        f.write_str(&self.name)?;
        if !self.tag.is_empty() {
            write!(f, ":{}", self.tag)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvalidImage(pub String);

impl Display for InvalidImage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid image reference: '{}'", self.0)
    }
}

impl std::error::Error for InvalidImage {}

impl FromStr for Image {
    type Err = InvalidImage;

    fn from_str(s: &str) -> Result<Image, InvalidImage> {
        let captures = IMAGE_REGEX
            .captures(s.trim())
            .ok_or_else(|| InvalidImage(s.to_owned()))?;
        let group = |name: &str| {
            captures
                .name(name)
                .map(|m| m.as_str().to_owned())
                .unwrap_or_default()
        };
        Ok(Image {
            domain: group("domain"),
            namespace: group("namespace"),
            name: group("name"),
            tag: group("tag"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfinispanBinding {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sasl_mechanism: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaBinding {
    pub bootstrap_servers: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakBinding {
    pub auth_server_url: String,
    pub realm: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// Connection properties for the infrastructure a service talks to
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfraBindings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infinispan: Option<InfinispanBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kafka: Option<KafkaBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keycloak: Option<KeycloakBinding>,
}

impl InfraBindings {
    pub fn is_empty(&self) -> bool {
        self.infinispan.is_none() && self.kafka.is_none() && self.keycloak.is_none()
    }

    pub fn has_inline_credentials(&self) -> bool {
        let infinispan = self
            .infinispan
            .as_ref()
            .map(|i| i.credentials.is_some())
            .unwrap_or(false);
        let keycloak = self
            .keycloak
            .as_ref()
            .map(|k| k.client_secret.is_some())
            .unwrap_or(false);
        infinispan || keycloak
    }
}

/// The part of the spec shared by every Kogito custom resource
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDeploymentSpec {
    #[serde(default)]
    pub runtime: Runtime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub service_labels: Labels,
    #[serde(default)]
    pub infra: InfraBindings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<i32>,
}

/// Capabilities shared by the spec of every Kogito custom resource
pub trait ServiceSpec {
    fn deployment_spec(&self) -> &ServiceDeploymentSpec;

    fn deployment_spec_mut(&mut self) -> &mut ServiceDeploymentSpec;

    fn runtime(&self) -> Runtime {
        self.deployment_spec().runtime
    }

    /// Negative replica counts are treated as zero
    fn replicas(&self) -> i32 {
        self.deployment_spec()
            .replicas
            .unwrap_or(DEFAULT_REPLICAS)
            .max(0)
    }

    fn set_replicas(&mut self, replicas: i32) {
        self.deployment_spec_mut().replicas = Some(replicas);
    }

    fn envs(&self) -> &[EnvVar] {
        self.deployment_spec().env.as_slice()
    }

    /// Replaces all environment variables. When a name is repeated, the last value wins and takes the
    /// position of the first occurrence.
    fn set_envs(&mut self, envs: Vec<EnvVar>) {
        let target = &mut self.deployment_spec_mut().env;
        target.clear();
        for env in envs {
            upsert_env(target, env);
        }
    }

    fn add_env(&mut self, name: &str, value: &str) {
        upsert_env(&mut self.deployment_spec_mut().env, env_var(name, value));
    }

    fn image(&self) -> Option<&Image> {
        self.deployment_spec().image.as_ref()
    }

    fn set_image(&mut self, image: Image) {
        self.deployment_spec_mut().image = Some(image);
    }

    fn resources(&self) -> Option<&ResourceRequirements> {
        self.deployment_spec().resources.as_ref()
    }

    fn set_resources(&mut self, resources: ResourceRequirements) {
        self.deployment_spec_mut().resources = Some(resources);
    }

    fn service_labels(&self) -> &Labels {
        &self.deployment_spec().service_labels
    }

    fn infra(&self) -> &InfraBindings {
        &self.deployment_spec().infra
    }

    fn http_port(&self) -> i32 {
        self.deployment_spec().http_port.unwrap_or(DEFAULT_HTTP_PORT)
    }
}

impl ServiceSpec for ServiceDeploymentSpec {
    fn deployment_spec(&self) -> &ServiceDeploymentSpec {
        self
    }

    fn deployment_spec_mut(&mut self) -> &mut ServiceDeploymentSpec {
        self
    }
}

/// A Kogito custom resource, independent of its variant
pub trait KogitoService: KubeObject {
    type Spec: ServiceSpec;
    type Status: ServiceStatus + Serialize + Default + Clone + PartialEq + Debug + Send + Sync;

    fn spec(&self) -> &Self::Spec;

    fn status(&self) -> Option<&Self::Status>;

    fn status_mut(&mut self) -> &mut Self::Status;
}

pub fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: Some(value.to_owned()),
        value_from: None,
    }
}

/// Sets the env var, replacing any existing var with the same name in place
pub fn upsert_env(envs: &mut Vec<EnvVar>, env: EnvVar) {
    match envs.iter_mut().find(|existing| existing.name == env.name) {
        Some(existing) => *existing = env,
        None => envs.push(env),
    }
}

pub fn env_value<'a>(envs: &'a [EnvVar], name: &str) -> Option<&'a str> {
    envs.iter()
        .find(|env| env.name == name)
        .and_then(|env| env.value.as_deref())
}
