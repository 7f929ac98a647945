use crate::factory::{role_binding_name, MetaDefaults};

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};

pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";
pub const KIND_CLUSTER_ROLE: &str = "ClusterRole";
pub const KIND_SERVICE_ACCOUNT: &str = "ServiceAccount";
pub const VIEW_ROLE: &str = "view";

/// The account the pods of a service run as
pub fn service_account(meta: &MetaDefaults) -> ServiceAccount {
    ServiceAccount {
        metadata: meta.app_meta(),
        ..Default::default()
    }
}

/// Grants the service account read access to the namespace, so the service can discover its peers
pub fn view_role_binding(meta: &MetaDefaults) -> RoleBinding {
    RoleBinding {
        metadata: meta.object_meta(role_binding_name(&meta.app)),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_owned(),
            kind: KIND_CLUSTER_ROLE.to_owned(),
            name: VIEW_ROLE.to_owned(),
        },
        subjects: Some(vec![Subject {
            api_group: None,
            kind: KIND_SERVICE_ACCOUNT.to_owned(),
            name: meta.app.clone(),
            namespace: Some(meta.namespace.clone()),
        }]),
    }
}
