//! Operator configuration. Everything that influences the desired state of the managed resources is
//! passed explicitly through an `OperatorConfig`, so that reconciliation never depends on global state.
//!
//! ```rust
//! use kogito_operator::config::OperatorConfig;
//! use std::time::Duration;
//!
//! let config = OperatorConfig::new("kogito-operator")
//!     .within_namespace("kogito")
//!     .without_service_accounts()
//!     .with_provisioning_requeue(Duration::from_secs(10));
//!
//! assert_eq!(Some("kogito"), config.namespace.as_deref());
//! assert!(!config.create_service_accounts);
//! assert_eq!("quay.io", config.images.registry);
//! ```
use crate::crd::{Image, Runtime};
use crate::retry::BackoffConfig;

use anyhow::Context;

use std::path::Path;
use std::time::Duration;

pub const DEFAULT_OPERATOR_NAME: &str = "kogito-operator";
pub const DEFAULT_MANAGED_BY: &str = "Kogito Operator";

/// Where the default images for each kind of service come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageDefaults {
    pub registry: String,
    pub namespace: String,
    pub tag: String,
    pub quarkus_s2i: String,
    pub quarkus_jvm: String,
    pub quarkus_native: String,
    pub springboot_s2i: String,
    pub springboot_runtime: String,
    pub data_index: String,
    pub jobs_service: String,
}

impl Default for ImageDefaults {
    fn default() -> ImageDefaults {
        ImageDefaults {
            registry: "quay.io".to_owned(),
            namespace: "kiegroup".to_owned(),
            tag: "0.9.0".to_owned(),
            quarkus_s2i: "kogito-quarkus-ubi8-s2i".to_owned(),
            quarkus_jvm: "kogito-quarkus-jvm-ubi8".to_owned(),
            quarkus_native: "kogito-quarkus-ubi8".to_owned(),
            springboot_s2i: "kogito-springboot-ubi8-s2i".to_owned(),
            springboot_runtime: "kogito-springboot-ubi8".to_owned(),
            data_index: "kogito-data-index".to_owned(),
            jobs_service: "kogito-jobs-service".to_owned(),
        }
    }
}

impl ImageDefaults {
    /// An image with the given name in the default registry, namespace and tag
    pub fn image(&self, name: &str) -> Image {
        Image::new(
            self.registry.as_str(),
            self.namespace.as_str(),
            name,
            self.tag.as_str(),
        )
    }

    /// The builder image of the S2I build
    pub fn s2i_image(&self, runtime: Runtime) -> Image {
        match runtime {
            Runtime::Quarkus => self.image(&self.quarkus_s2i),
            Runtime::Springboot => self.image(&self.springboot_s2i),
        }
    }

    /// The base image of the runtime build. Spring boot has no native flavor.
    pub fn runtime_image(&self, runtime: Runtime, native: bool) -> Image {
        match runtime {
            Runtime::Quarkus if native => self.image(&self.quarkus_native),
            Runtime::Quarkus => self.image(&self.quarkus_jvm),
            Runtime::Springboot => self.image(&self.springboot_runtime),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    pub operator_name: String,

    /// value of the `org.kie.kogito/managed-by` annotation on every managed resource
    pub managed_by: String,

    /// if set, only custom resources in this namespace are reconciled
    pub namespace: Option<String>,

    pub images: ImageDefaults,

    /// whether a `ServiceAccount` and a `view` `RoleBinding` are created for each `KogitoApp`
    pub create_service_accounts: bool,

    /// ServiceMonitors are only created when this is set and the monitoring CRD is installed
    pub enable_service_monitors: bool,

    /// how long to wait before checking again on a service that is still provisioning
    #[serde(with = "crate::retry::millis")]
    pub provisioning_requeue: Duration,

    pub backoff: BackoffConfig,

    /// the maximum number of reconciliation passes that may run at the same time
    pub max_concurrent_passes: usize,
}

impl Default for OperatorConfig {
    fn default() -> OperatorConfig {
        OperatorConfig::new(DEFAULT_OPERATOR_NAME)
    }
}

impl OperatorConfig {
    pub fn new(operator_name: impl Into<String>) -> OperatorConfig {
        OperatorConfig {
            operator_name: operator_name.into(),
            managed_by: DEFAULT_MANAGED_BY.to_owned(),
            namespace: None,
            images: ImageDefaults::default(),
            create_service_accounts: true,
            enable_service_monitors: true,
            provisioning_requeue: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
            max_concurrent_passes: 4,
        }
    }

    pub fn within_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_image_defaults(mut self, images: ImageDefaults) -> Self {
        self.images = images;
        self
    }

    pub fn without_service_accounts(mut self) -> Self {
        self.create_service_accounts = false;
        self
    }

    pub fn without_service_monitors(mut self) -> Self {
        self.enable_service_monitors = false;
        self
    }

    pub fn with_provisioning_requeue(mut self, interval: Duration) -> Self {
        self.provisioning_requeue = interval;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_concurrent_passes(mut self, max: usize) -> Self {
        self.max_concurrent_passes = max.max(1);
        self
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<OperatorConfig> {
        let config: OperatorConfig =
            serde_yaml::from_str(yaml).context("invalid operator configuration")?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<OperatorConfig> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read operator configuration from {}", path.display()))?;
        OperatorConfig::from_yaml_str(&contents)
            .with_context(|| format!("failed to load operator configuration from {}", path.display()))
    }

    /// true if custom resources in the given namespace should be reconciled by this operator
    pub fn watches_namespace(&self, namespace: &str) -> bool {
        self.namespace
            .as_deref()
            .map(|ns| ns == namespace)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_yaml_config_keeps_defaults() {
        let config = OperatorConfig::from_yaml_str(
            r#"
namespace: kogito
createServiceAccounts: false
provisioningRequeue: 5000
images:
  registry: registry.example.com
backoff:
  initialInterval: 100
  maxInterval: 2000
"#,
        )
        .unwrap();

        assert_eq!(Some("kogito".to_owned()), config.namespace);
        assert!(!config.create_service_accounts);
        assert!(config.enable_service_monitors);
        assert_eq!(Duration::from_secs(5), config.provisioning_requeue);
        assert_eq!("registry.example.com", config.images.registry);
        assert_eq!("kiegroup", config.images.namespace);
        assert_eq!(Duration::from_millis(100), config.backoff.initial_interval);
        assert_eq!(Duration::from_secs(2), config.backoff.max_interval);
        assert_eq!(DEFAULT_OPERATOR_NAME, config.operator_name);
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let err = OperatorConfig::from_yaml_str("namespace: [").unwrap_err();
        assert!(err.to_string().contains("invalid operator configuration"));
    }

    #[test]
    fn runtime_images_depend_on_the_runtime_flavor() {
        let images = ImageDefaults::default();
        assert_eq!(
            "quay.io/kiegroup/kogito-quarkus-ubi8:0.9.0",
            images.runtime_image(Runtime::Quarkus, true).to_string()
        );
        assert_eq!(
            "kogito-springboot-ubi8",
            images.runtime_image(Runtime::Springboot, true).name
        );
        assert_eq!("kogito-quarkus-ubi8-s2i", images.s2i_image(Runtime::Quarkus).name);
    }

    #[test]
    fn namespace_restriction_is_respected() {
        let config = OperatorConfig::new("test");
        assert!(config.watches_namespace("anything"));
        let config = config.within_namespace("kogito");
        assert!(config.watches_namespace("kogito"));
        assert!(!config.watches_namespace("other"));
    }
}
