use std::fmt::{self, Display};
use std::hash::{self, Hash};

/// A basic description of a Kubernetes resource type. Every object the operator creates, fetches or updates
/// is addressed through one of the statics declared in this module, so that the `ResourceStore` does not need
/// to know anything about the concrete Rust type that represents the object.
///
/// ```
/// use kogito_operator::k8s_types::{self, K8sType};
///
/// let build_config: &K8sType = k8s_types::build_openshift_io::v1::BuildConfig;
/// assert_eq!("build.openshift.io", build_config.group());
/// assert_eq!("v1", build_config.version());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct K8sType {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub plural_kind: &'static str,
}

impl Hash for K8sType {
    fn hash<H: hash::Hasher>(&self, hasher: &mut H) {
        self.api_version.hash(hasher);
        self.kind.hash(hasher);
    }
}

impl K8sType {
    pub fn as_group_and_version(&self) -> (&str, &str) {
        match self.api_version.find('/') {
            Some(slash_idx) => (
                &self.api_version[..slash_idx],
                &self.api_version[(slash_idx + 1)..],
            ),
            None => ("", self.api_version),
        }
    }

    pub fn group(&self) -> &str {
        self.as_group_and_version().0
    }

    pub fn version(&self) -> &str {
        self.as_group_and_version().1
    }

    /// true if the given `apiVersion` and `kind` describe this type
    pub fn matches(&self, api_version: &str, kind: &str) -> bool {
        self.api_version == api_version && self.kind == kind
    }
}

impl Display for K8sType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.api_version, self.plural_kind)
    }
}

macro_rules! k8s_type {
    ($ref_name:ident, $api_version:expr, $kind:expr, $plural_kind:expr) => {
        #[allow(non_upper_case_globals)]
        pub static $ref_name: &crate::k8s_types::K8sType = &crate::k8s_types::K8sType {
            api_version: $api_version,
            kind: $kind,
            plural_kind: $plural_kind,
        };
    };
}

macro_rules! def_types {
    (@nogroupmod, $group:expr, [
        $( $version:ident => [
            $( $kind:ident ~ $plural_kind:ident ),*
        ]),*
    ]) => {
        $(
            pub mod $version {
                $(
                    k8s_type!($kind, concat!($group, "/", stringify!($version)), stringify!($kind), stringify!($plural_kind));
                )*
            }
        )*
    };
    ($group:ident => $rem:tt ) => {
        pub mod $group {
            def_types!{@nogroupmod, stringify!($group), $rem }
        }
    };
    (@core => [
        $( $version:ident => [
            $( $kind:ident ~ $plural_kind:ident ),*
        ]),*
    ]) => {
        pub mod core {
            $(pub mod $version {
                $(
                    k8s_type!($kind, stringify!($version), stringify!($kind), stringify!($plural_kind));
                )*
            })*
        }
    }
}

def_types! {
    @core => [
        v1 => [
            Service ~ services,
            Secret ~ secrets,
            ConfigMap ~ configmaps,
            ServiceAccount ~ serviceaccounts
        ]
    ]
}

def_types! {
    apps => [
        v1 => [
            Deployment ~ deployments
        ]
    ]
}

pub mod rbac_authorization_k8s_io {
    def_types! {
        @nogroupmod, "rbac.authorization.k8s.io", [
            v1 => [
                RoleBinding ~ rolebindings
            ]
        ]
    }
}

pub mod apps_openshift_io {
    def_types! {
        @nogroupmod, "apps.openshift.io", [
            v1 => [
                DeploymentConfig ~ deploymentconfigs
            ]
        ]
    }
}

pub mod build_openshift_io {
    def_types! {
        @nogroupmod, "build.openshift.io", [
            v1 => [
                BuildConfig ~ buildconfigs,
                Build ~ builds
            ]
        ]
    }
}

pub mod image_openshift_io {
    def_types! {
        @nogroupmod, "image.openshift.io", [
            v1 => [
                ImageStream ~ imagestreams,
                ImageStreamTag ~ imagestreamtags
            ]
        ]
    }
}

pub mod route_openshift_io {
    def_types! {
        @nogroupmod, "route.openshift.io", [
            v1 => [
                Route ~ routes
            ]
        ]
    }
}

pub mod monitoring_coreos_com {
    def_types! {
        @nogroupmod, "monitoring.coreos.com", [
            v1 => [
                ServiceMonitor ~ servicemonitors
            ]
        ]
    }
}

pub mod app_kiegroup_org {
    def_types! {
        @nogroupmod, "app.kiegroup.org", [
            v1alpha1 => [
                KogitoApp ~ kogitoapps,
                KogitoRuntime ~ kogitoruntimes,
                KogitoDataIndex ~ kogitodataindices,
                KogitoJobsService ~ kogitojobsservices
            ]
        ]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn k8s_type_returns_group_and_api_version_when_both_are_present() {
        let subject = apps_openshift_io::v1::DeploymentConfig;
        assert_eq!("apps.openshift.io", subject.group());
        assert_eq!("v1", subject.version());
        assert_eq!("apps.openshift.io/v1", subject.api_version);
    }

    #[test]
    fn k8s_type_returns_empty_str_for_group_when_no_group_is_present() {
        let subject = core::v1::Service;
        assert_eq!("", subject.group());
        assert_eq!("v1", subject.version());
    }

    #[test]
    fn custom_resource_types_use_the_kiegroup_api_group() {
        let subject = app_kiegroup_org::v1alpha1::KogitoDataIndex;
        assert_eq!("app.kiegroup.org/v1alpha1", subject.api_version);
        assert_eq!("kogitodataindices", subject.plural_kind);
        assert!(subject.matches("app.kiegroup.org/v1alpha1", "KogitoDataIndex"));
    }
}
