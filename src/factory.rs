//! Pure constructors for the desired state of every resource the operator manages. Nothing in here
//! talks to the cluster: the same custom resource and configuration always produce the same objects.
pub mod build_config;
pub mod image_stream;
pub mod infra;
pub mod rbac;
pub mod service;
pub mod workload;

use crate::config::OperatorConfig;
use crate::crd::{KogitoService, ServiceSpec};
use crate::resource::{KubeObject, Labels};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub const LABEL_APP: &str = "app";
pub const LABEL_BUILD_TYPE: &str = "buildtype";
pub const BUILD_TYPE_S2I: &str = "s2i";
pub const BUILD_TYPE_RUNTIME: &str = "runtime";

pub const ANNOTATION_MANAGED_BY: &str = "org.kie.kogito/managed-by";
pub const ANNOTATION_OPERATOR_CRD: &str = "org.kie.kogito/operator-crd";

pub const BUILDER_SUFFIX: &str = "-builder";
pub const ROLE_BINDING_SUFFIX: &str = "-view";
pub const PROPERTIES_SUFFIX: &str = "-properties";
pub const CREDENTIALS_SUFFIX: &str = "-infra-credentials";

pub fn builder_name(app: &str) -> String {
    format!("{}{}", app, BUILDER_SUFFIX)
}

pub fn role_binding_name(app: &str) -> String {
    format!("{}{}", app, ROLE_BINDING_SUFFIX)
}

pub fn properties_name(app: &str) -> String {
    format!("{}{}", app, PROPERTIES_SUFFIX)
}

pub fn credentials_name(app: &str) -> String {
    format!("{}{}", app, CREDENTIALS_SUFFIX)
}

/// Labels for every resource of a service: the user's service labels plus the `app` label, which
/// always names the service.
pub fn merge_labels(app: &str, service_labels: &Labels) -> Labels {
    let mut labels = service_labels.clone();
    labels.insert(LABEL_APP.to_owned(), app.to_owned());
    labels
}

/// The labels that select the pods of a service
pub fn app_selector(app: &str) -> Labels {
    let mut labels = Labels::new();
    labels.insert(LABEL_APP.to_owned(), app.to_owned());
    labels
}

/// Metadata shared by all the resources created for one custom resource
#[derive(Debug, Clone, PartialEq)]
pub struct MetaDefaults {
    pub app: String,
    pub namespace: String,
    pub labels: Labels,
    pub annotations: Labels,
}

impl MetaDefaults {
    pub fn for_service<T: KogitoService>(service: &T, config: &OperatorConfig) -> MetaDefaults {
        let app = service.name().to_owned();
        let mut annotations = Labels::new();
        annotations.insert(ANNOTATION_MANAGED_BY.to_owned(), config.managed_by.clone());
        annotations.insert(
            ANNOTATION_OPERATOR_CRD.to_owned(),
            T::k8s_type().kind.to_owned(),
        );
        MetaDefaults {
            labels: merge_labels(&app, service.spec().service_labels()),
            namespace: service.namespace().to_owned(),
            app,
            annotations,
        }
    }

    /// Metadata for an object with the given name
    pub fn object_meta(&self, name: impl Into<String>) -> ObjectMeta {
        self.object_meta_with_labels(name, self.labels.clone())
    }

    pub fn object_meta_with_labels(&self, name: impl Into<String>, labels: Labels) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace: Some(self.namespace.clone()),
            labels: Some(labels),
            annotations: Some(self.annotations.clone()),
            ..Default::default()
        }
    }

    /// Metadata for the object named after the service itself
    pub fn app_meta(&self) -> ObjectMeta {
        self.object_meta(self.app.clone())
    }
}
