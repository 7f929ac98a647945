//! Infrastructure bindings. Each binding turns into a set of properties that are passed to the service
//! both as environment variables and, for runtime services, through an `application.properties` file.
//! Inline credentials are kept in a Secret and only ever referenced through `secretKeyRef`.
use crate::crd::{InfraBindings, Runtime};
use crate::factory::{credentials_name, properties_name, MetaDefaults};

use k8s_openapi::api::core::v1::{
    ConfigMap, EnvVar, EnvVarSource, Secret, SecretKeySelector,
};
use k8s_openapi::ByteString;

use std::collections::BTreeMap;

pub const PROPERTIES_FILE: &str = "application.properties";
pub const SECRET_TYPE_OPAQUE: &str = "Opaque";

pub const KEY_INFINISPAN_USERNAME: &str = "infinispan-username";
pub const KEY_INFINISPAN_PASSWORD: &str = "infinispan-password";
pub const KEY_KEYCLOAK_CLIENT_SECRET: &str = "keycloak-client-secret";

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Plain(String),
    /// a key in the credentials secret
    Secret(&'static str),
}

/// One setting derived from an infra binding, with its env var and property names
#[derive(Debug, Clone, PartialEq)]
pub struct InfraProperty {
    pub env: &'static str,
    pub property: &'static str,
    pub value: PropertyValue,
}

struct Names {
    infinispan_server_list: (&'static str, &'static str),
    infinispan_use_auth: (&'static str, &'static str),
    infinispan_username: (&'static str, &'static str),
    infinispan_password: (&'static str, &'static str),
    infinispan_sasl: (&'static str, &'static str),
    kafka_servers: (&'static str, &'static str),
    keycloak_url: (&'static str, &'static str),
    keycloak_realm: Option<(&'static str, &'static str)>,
    keycloak_client_id: (&'static str, &'static str),
    keycloak_secret: (&'static str, &'static str),
}

const QUARKUS_NAMES: Names = Names {
    infinispan_server_list: ("QUARKUS_INFINISPAN_CLIENT_SERVER_LIST", "quarkus.infinispan-client.server-list"),
    infinispan_use_auth: ("QUARKUS_INFINISPAN_CLIENT_USE_AUTH", "quarkus.infinispan-client.use-auth"),
    infinispan_username: ("QUARKUS_INFINISPAN_CLIENT_AUTH_USERNAME", "quarkus.infinispan-client.auth-username"),
    infinispan_password: ("QUARKUS_INFINISPAN_CLIENT_AUTH_PASSWORD", "quarkus.infinispan-client.auth-password"),
    infinispan_sasl: ("QUARKUS_INFINISPAN_CLIENT_SASL_MECHANISM", "quarkus.infinispan-client.sasl-mechanism"),
    kafka_servers: ("KAFKA_BOOTSTRAP_SERVERS", "kafka.bootstrap.servers"),
    keycloak_url: ("QUARKUS_OIDC_AUTH_SERVER_URL", "quarkus.oidc.auth-server-url"),
    keycloak_realm: None,
    keycloak_client_id: ("QUARKUS_OIDC_CLIENT_ID", "quarkus.oidc.client-id"),
    keycloak_secret: ("QUARKUS_OIDC_CREDENTIALS_SECRET", "quarkus.oidc.credentials.secret"),
};

const SPRINGBOOT_NAMES: Names = Names {
    infinispan_server_list: ("INFINISPAN_REMOTE_SERVER_LIST", "infinispan.remote.server-list"),
    infinispan_use_auth: ("INFINISPAN_REMOTE_USE_AUTH", "infinispan.remote.use-auth"),
    infinispan_username: ("INFINISPAN_REMOTE_AUTH_USERNAME", "infinispan.remote.auth-username"),
    infinispan_password: ("INFINISPAN_REMOTE_AUTH_PASSWORD", "infinispan.remote.auth-password"),
    infinispan_sasl: ("INFINISPAN_REMOTE_SASL_MECHANISM", "infinispan.remote.sasl-mechanism"),
    kafka_servers: ("SPRING_KAFKA_BOOTSTRAP_SERVERS", "spring.kafka.bootstrap-servers"),
    keycloak_url: ("KEYCLOAK_AUTH_SERVER_URL", "keycloak.auth-server-url"),
    keycloak_realm: Some(("KEYCLOAK_REALM", "keycloak.realm")),
    keycloak_client_id: ("KEYCLOAK_RESOURCE", "keycloak.resource"),
    keycloak_secret: ("KEYCLOAK_CREDENTIALS_SECRET", "keycloak.credentials.secret"),
};

fn property(names: (&'static str, &'static str), value: PropertyValue) -> InfraProperty {
    InfraProperty {
        env: names.0,
        property: names.1,
        value,
    }
}

/// Every setting derived from the bindings, in a stable order
pub fn infra_properties(runtime: Runtime, infra: &InfraBindings) -> Vec<InfraProperty> {
    let names = match runtime {
        Runtime::Quarkus => &QUARKUS_NAMES,
        Runtime::Springboot => &SPRINGBOOT_NAMES,
    };
    let mut properties = Vec::new();

    if let Some(infinispan) = infra.infinispan.as_ref() {
        properties.push(property(
            names.infinispan_server_list,
            PropertyValue::Plain(infinispan.uri.clone()),
        ));
        let use_auth = infinispan.credentials.is_some();
        properties.push(property(
            names.infinispan_use_auth,
            PropertyValue::Plain(use_auth.to_string()),
        ));
        if use_auth {
            properties.push(property(
                names.infinispan_username,
                PropertyValue::Secret(KEY_INFINISPAN_USERNAME),
            ));
            properties.push(property(
                names.infinispan_password,
                PropertyValue::Secret(KEY_INFINISPAN_PASSWORD),
            ));
        }
        if let Some(mechanism) = infinispan.sasl_mechanism.as_ref() {
            properties.push(property(
                names.infinispan_sasl,
                PropertyValue::Plain(mechanism.clone()),
            ));
        }
    }

    if let Some(kafka) = infra.kafka.as_ref() {
        properties.push(property(
            names.kafka_servers,
            PropertyValue::Plain(kafka.bootstrap_servers.clone()),
        ));
    }

    if let Some(keycloak) = infra.keycloak.as_ref() {
        let url = keycloak.auth_server_url.trim_end_matches('/');
        match names.keycloak_realm {
            Some(realm_names) => {
                properties.push(property(names.keycloak_url, PropertyValue::Plain(url.to_owned())));
                properties.push(property(realm_names, PropertyValue::Plain(keycloak.realm.clone())));
            }
            // quarkus takes the realm as part of the server url
            None => properties.push(property(
                names.keycloak_url,
                PropertyValue::Plain(format!("{}/realms/{}", url, keycloak.realm)),
            )),
        }
        properties.push(property(
            names.keycloak_client_id,
            PropertyValue::Plain(keycloak.client_id.clone()),
        ));
        if keycloak.client_secret.is_some() {
            properties.push(property(
                names.keycloak_secret,
                PropertyValue::Secret(KEY_KEYCLOAK_CLIENT_SECRET),
            ));
        }
    }
    properties
}

/// The environment variables for the bindings. Secret values reference the credentials secret of `app`.
pub fn infra_env(app: &str, properties: &[InfraProperty]) -> Vec<EnvVar> {
    let secret_name = credentials_name(app);
    properties
        .iter()
        .map(|prop| match &prop.value {
            PropertyValue::Plain(value) => EnvVar {
                name: prop.env.to_owned(),
                value: Some(value.clone()),
                value_from: None,
            },
            PropertyValue::Secret(key) => EnvVar {
                name: prop.env.to_owned(),
                value: None,
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        key: (*key).to_owned(),
                        name: Some(secret_name.clone()),
                        optional: None,
                    }),
                    ..Default::default()
                }),
            },
        })
        .collect()
}

/// The `application.properties` for the bindings, without any secret value. Returns `None` if there
/// is nothing to write.
pub fn application_properties(properties: &[InfraProperty]) -> Option<String> {
    let lines = properties
        .iter()
        .filter_map(|prop| match &prop.value {
            PropertyValue::Plain(value) => Some(format!("{}={}", prop.property, value)),
            PropertyValue::Secret(_) => None,
        })
        .collect::<Vec<_>>();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n") + "\n")
    }
}

pub fn properties_config_map(meta: &MetaDefaults, properties: String) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert(PROPERTIES_FILE.to_owned(), properties);
    ConfigMap {
        metadata: meta.object_meta(properties_name(&meta.app)),
        data: Some(data),
        ..Default::default()
    }
}

/// The secret holding inline credentials, or `None` if the bindings have none
pub fn credentials_secret(meta: &MetaDefaults, infra: &InfraBindings) -> Option<Secret> {
    let mut data = BTreeMap::new();
    let mut put = |key: &str, value: &str| {
        data.insert(key.to_owned(), ByteString(value.as_bytes().to_vec()));
    };
    if let Some(credentials) = infra.infinispan.as_ref().and_then(|i| i.credentials.as_ref()) {
        put(KEY_INFINISPAN_USERNAME, &credentials.username);
        put(KEY_INFINISPAN_PASSWORD, &credentials.password);
    }
    if let Some(secret) = infra.keycloak.as_ref().and_then(|k| k.client_secret.as_ref()) {
        put(KEY_KEYCLOAK_CLIENT_SECRET, secret);
    }
    if data.is_empty() {
        return None;
    }
    Some(Secret {
        metadata: meta.object_meta(credentials_name(&meta.app)),
        data: Some(data),
        type_: Some(SECRET_TYPE_OPAQUE.to_owned()),
        ..Default::default()
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crd::{Credentials, InfinispanBinding, KafkaBinding, KeycloakBinding};
    use crate::resource::Labels;

    fn bindings() -> InfraBindings {
        InfraBindings {
            infinispan: Some(InfinispanBinding {
                uri: "infinispan:11222".to_owned(),
                credentials: Some(Credentials {
                    username: "developer".to_owned(),
                    password: "s3cr3t".to_owned(),
                }),
                sasl_mechanism: Some("PLAIN".to_owned()),
            }),
            kafka: Some(KafkaBinding {
                bootstrap_servers: "kafka:9092".to_owned(),
            }),
            keycloak: Some(KeycloakBinding {
                auth_server_url: "https://keycloak/auth/".to_owned(),
                realm: "kogito".to_owned(),
                client_id: "travels".to_owned(),
                client_secret: None,
            }),
        }
    }

    fn meta() -> MetaDefaults {
        MetaDefaults {
            app: "travels".to_owned(),
            namespace: "kogito".to_owned(),
            labels: Labels::new(),
            annotations: Labels::new(),
        }
    }

    #[test]
    fn credentials_are_only_referenced_from_env() {
        let properties = infra_properties(Runtime::Quarkus, &bindings());
        let env = infra_env("travels", &properties);

        let password = env
            .iter()
            .find(|e| e.name == "QUARKUS_INFINISPAN_CLIENT_AUTH_PASSWORD")
            .unwrap();
        assert!(password.value.is_none());
        let selector = password
            .value_from
            .as_ref()
            .and_then(|v| v.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(Some("travels-infra-credentials"), selector.name.as_deref());
        assert_eq!(KEY_INFINISPAN_PASSWORD, selector.key);

        let file = application_properties(&properties).unwrap();
        assert!(!file.contains("s3cr3t"));
        assert!(!file.contains("auth-password"));
        assert!(file.contains("kafka.bootstrap.servers=kafka:9092\n"));
        assert!(file.contains("quarkus.oidc.auth-server-url=https://keycloak/auth/realms/kogito\n"));
    }

    #[test]
    fn springboot_uses_its_own_property_names() {
        let properties = infra_properties(Runtime::Springboot, &bindings());
        let file = application_properties(&properties).unwrap();
        assert!(file.contains("spring.kafka.bootstrap-servers=kafka:9092\n"));
        assert!(file.contains("keycloak.realm=kogito\n"));
        assert!(file.contains("keycloak.auth-server-url=https://keycloak/auth\n"));
    }

    #[test]
    fn secret_is_only_created_for_inline_credentials() {
        let secret = credentials_secret(&meta(), &bindings()).unwrap();
        assert_eq!(Some("travels-infra-credentials"), secret.metadata.name.as_deref());
        let data = secret.data.unwrap();
        assert_eq!(b"developer".to_vec(), data[KEY_INFINISPAN_USERNAME].0);
        assert!(!data.contains_key(KEY_KEYCLOAK_CLIENT_SECRET));

        let mut no_credentials = bindings();
        no_credentials.infinispan = None;
        assert!(credentials_secret(&meta(), &no_credentials).is_none());
        assert!(application_properties(&[]).is_none());
    }
}
