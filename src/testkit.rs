//! An in-memory cluster for testing reconciliation without an api server. `FakeCluster` implements
//! every client trait, counts each call by operation and type, and can be told to fail specific calls.
//!
//! **This module is only available in tests, or when the `testkit` feature is enabled**
use crate::client::{
    BuildClient, ClientError, ClientResult, Clients, CreateHooks, ImageClient, ResourceStore,
};
use crate::error::Operation;
use crate::k8s_types::{self, K8sType};
use crate::openshift::build::{Build, BuildConfig, BuildPhase, BuildRequest};
use crate::openshift::image::{DockerConfig, DockerImage, Image, ImageStreamTag};
use crate::resource::{labels_subset, KubeObject, Labels, ObjectId, ObjectIdRef};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

pub const BUILD_CONFIG_LABEL: &str = "buildconfig";
pub const BUILD_CONFIG_NAME_LABEL: &str = "openshift.io/build-config.name";

type ObjectKey = (&'static str, &'static str, ObjectId);

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    unavailable_types: HashSet<&'static str>,
    calls: HashMap<(Operation, &'static str), usize>,
    failures: HashMap<(Operation, &'static str), String>,
    next_uid: u64,
    panic_on_instantiate: bool,
}

impl State {
    fn key(k8s_type: &'static K8sType, id: ObjectIdRef) -> ObjectKey {
        (k8s_type.api_version, k8s_type.kind, id.to_owned())
    }

    fn record(&mut self, op: Operation, k8s_type: &'static K8sType) -> ClientResult<()> {
        *self.calls.entry((op, k8s_type.kind)).or_insert(0) += 1;
        match self.failures.get(&(op, k8s_type.kind)) {
            Some(message) => Err(ClientError::Unavailable(message.clone())),
            None => Ok(()),
        }
    }

    fn insert_new(&mut self, k8s_type: &'static K8sType, mut object: Value) -> ClientResult<Value> {
        let id = object_id(&object);
        let key = State::key(k8s_type, id.as_id_ref());
        if self.objects.contains_key(&key) {
            return Err(ClientError::Conflict(format!(
                "{} {} already exists",
                k8s_type.kind, id
            )));
        }
        self.next_uid += 1;
        let uid = format!("uid-{}", self.next_uid);
        if let Some(meta) = metadata_mut(&mut object) {
            meta.insert("uid".to_owned(), Value::from(uid));
            meta.insert("resourceVersion".to_owned(), Value::from("1"));
        }
        set_type_fields(k8s_type, &mut object);
        self.objects.insert(key, object.clone());
        Ok(object)
    }

    fn replace(
        &mut self,
        k8s_type: &'static K8sType,
        mut object: Value,
        status_only: bool,
    ) -> ClientResult<Value> {
        let id = object_id(&object);
        let key = State::key(k8s_type, id.as_id_ref());
        let existing = self.objects.get(&key).ok_or(ClientError::NotFound)?;

        let version = existing
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let mut stored = if status_only {
            let mut stored = existing.clone();
            if let (Some(obj), Some(status)) = (stored.as_object_mut(), object.get("status")) {
                obj.insert("status".to_owned(), status.clone());
            }
            stored
        } else {
            // status can only be changed through the status subresource
            let status = existing.get("status").cloned();
            let uid = existing.pointer("/metadata/uid").cloned();
            if let Some(obj) = object.as_object_mut() {
                match status {
                    Some(status) => obj.insert("status".to_owned(), status),
                    None => obj.remove("status"),
                };
            }
            if let (Some(meta), Some(uid)) = (metadata_mut(&mut object), uid) {
                meta.insert("uid".to_owned(), uid);
            }
            object
        };
        if let Some(meta) = metadata_mut(&mut stored) {
            meta.insert(
                "resourceVersion".to_owned(),
                Value::from((version + 1).to_string()),
            );
        }
        set_type_fields(k8s_type, &mut stored);
        self.objects.insert(key, stored.clone());
        Ok(stored)
    }

    fn list(&self, k8s_type: &'static K8sType, namespace: &str, selector: &Labels) -> Vec<Value> {
        self.objects
            .iter()
            .filter(|((api_version, kind, id), _)| {
                *api_version == k8s_type.api_version && *kind == k8s_type.kind && id.namespace == namespace
            })
            .map(|(_, value)| value)
            .filter(|value| labels_subset(selector, &labels_of(value)))
            .cloned()
            .collect()
    }
}

/// A fake cluster that keeps every object in memory
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Arc<FakeCluster> {
        Arc::new(FakeCluster::default())
    }

    /// Clients that all point to this cluster
    pub fn clients(self: &Arc<Self>) -> Clients {
        Clients::new(self.clone(), self.clone(), self.clone())
    }

    pub fn clients_with_hooks(self: &Arc<Self>, hooks: Arc<dyn CreateHooks>) -> Clients {
        self.clients().with_hooks(hooks)
    }

    fn lock(&self) -> MutexGuard<State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores the object as is, without counting a call. Populates the `uid` if it is missing.
    pub fn put<T: KubeObject>(&self, object: &T) -> T {
        let mut state = self.lock();
        let mut value = object.to_value().expect("failed to serialize object");
        let key = State::key(T::k8s_type(), object.object_id().as_id_ref());
        if object.uid().is_none() {
            state.next_uid += 1;
            let uid = format!("uid-{}", state.next_uid);
            if let Some(meta) = metadata_mut(&mut value) {
                meta.insert("uid".to_owned(), Value::from(uid));
            }
        }
        state.objects.insert(key, value.clone());
        T::from_value(value).expect("failed to deserialize object")
    }

    /// Returns the object as it is currently stored, without counting a call
    pub fn get<T: KubeObject>(&self, namespace: &str, name: &str) -> Option<T> {
        let state = self.lock();
        let key = State::key(T::k8s_type(), ObjectIdRef::new(namespace, name));
        state
            .objects
            .get(&key)
            .cloned()
            .map(|value| T::from_value(value).expect("failed to deserialize object"))
    }

    pub fn all<T: KubeObject>(&self, namespace: &str) -> Vec<T> {
        let state = self.lock();
        state
            .list(T::k8s_type(), namespace, &Labels::new())
            .into_iter()
            .map(|value| T::from_value(value).expect("failed to deserialize object"))
            .collect()
    }

    pub fn remove<T: KubeObject>(&self, namespace: &str, name: &str) {
        let key = State::key(T::k8s_type(), ObjectIdRef::new(namespace, name));
        self.lock().objects.remove(&key);
    }

    /// Makes `is_type_available` return false for the type
    pub fn remove_type(&self, k8s_type: &'static K8sType) {
        self.lock().unavailable_types.insert(k8s_type.kind);
    }

    /// Every call of the given operation on the given type fails until `clear_failures` is called
    pub fn fail_on(&self, op: Operation, k8s_type: &'static K8sType, message: &str) {
        self.lock()
            .failures
            .insert((op, k8s_type.kind), message.to_owned());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Simulates a client that panics while starting a build
    pub fn panic_on_instantiate(&self) {
        self.lock().panic_on_instantiate = true;
    }

    pub fn call_count(&self, op: Operation, k8s_type: &'static K8sType) -> usize {
        self.lock()
            .calls
            .get(&(op, k8s_type.kind))
            .copied()
            .unwrap_or(0)
    }

    /// The number of calls of any operation made for the given type
    pub fn calls_for_type(&self, k8s_type: &'static K8sType) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|((_, kind), _)| *kind == k8s_type.kind)
            .map(|(_, count)| *count)
            .sum()
    }

    pub fn total_calls(&self, op: Operation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|((call_op, _), _)| *call_op == op)
            .map(|(_, count)| *count)
            .sum()
    }

    pub fn reset_call_counts(&self) {
        self.lock().calls.clear();
    }

    /// Adds a resolved `<stream>:<tag>` whose image carries the given docker labels
    pub fn add_image(&self, namespace: &str, stream: &str, tag: &str, labels: &[(&str, &str)]) {
        let name = ImageStreamTag::tag_name(stream, tag);
        let image_tag = ImageStreamTag {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_owned()),
                name: Some(name),
                ..Default::default()
            },
            tag: None,
            image: Image {
                docker_image_reference: format!(
                    "image-registry.openshift-image-registry.svc:5000/{}/{}@sha256:{:x}",
                    namespace,
                    stream,
                    stream.len() * 31 + tag.len()
                ),
                docker_image_metadata: DockerImage {
                    config: DockerConfig {
                        labels: labels
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect(),
                    },
                },
            },
        };
        self.put(&image_tag);
    }

    pub fn set_build_phase(&self, namespace: &str, name: &str, phase: BuildPhase) {
        let mut build = self
            .get::<Build>(namespace, name)
            .unwrap_or_else(|| panic!("no such build: {}/{}", namespace, name));
        build.status.phase = phase;
        self.put(&build);
    }

    pub fn builds_of(&self, namespace: &str, build_config: &str) -> Vec<Build> {
        let mut selector = Labels::new();
        selector.insert(BUILD_CONFIG_NAME_LABEL.to_owned(), build_config.to_owned());
        let state = self.lock();
        state
            .list(k8s_types::build_openshift_io::v1::Build, namespace, &selector)
            .into_iter()
            .map(|value| Build::from_value(value).expect("failed to deserialize build"))
            .collect()
    }
}

impl ResourceStore for FakeCluster {
    fn fetch(&self, k8s_type: &'static K8sType, id: ObjectIdRef) -> ClientResult<Option<Value>> {
        let mut state = self.lock();
        state.record(Operation::Fetch, k8s_type)?;
        Ok(state.objects.get(&State::key(k8s_type, id)).cloned())
    }

    fn create(&self, k8s_type: &'static K8sType, object: &Value) -> ClientResult<Value> {
        let mut state = self.lock();
        state.record(Operation::Create, k8s_type)?;
        state.insert_new(k8s_type, object.clone())
    }

    fn update(&self, k8s_type: &'static K8sType, object: &Value) -> ClientResult<Value> {
        let mut state = self.lock();
        state.record(Operation::Update, k8s_type)?;
        state.replace(k8s_type, object.clone(), false)
    }

    fn update_status(&self, k8s_type: &'static K8sType, object: &Value) -> ClientResult<Value> {
        let mut state = self.lock();
        state.record(Operation::UpdateStatus, k8s_type)?;
        state.replace(k8s_type, object.clone(), true)
    }

    fn list(
        &self,
        k8s_type: &'static K8sType,
        namespace: &str,
        selector: &Labels,
    ) -> ClientResult<Vec<Value>> {
        let mut state = self.lock();
        state.record(Operation::List, k8s_type)?;
        Ok(state.list(k8s_type, namespace, selector))
    }

    fn is_type_available(&self, k8s_type: &'static K8sType) -> ClientResult<bool> {
        Ok(!self.lock().unavailable_types.contains(k8s_type.kind))
    }
}

impl BuildClient for FakeCluster {
    fn instantiate(&self, namespace: &str, request: &BuildRequest) -> ClientResult<Build> {
        let bc_type = k8s_types::build_openshift_io::v1::BuildConfig;
        let mut state = self.lock();
        state.record(Operation::Instantiate, bc_type)?;
        if state.panic_on_instantiate {
            drop(state);
            panic!("fake build client does not support instantiate");
        }

        let bc_name = request.metadata.name.clone().unwrap_or_default();
        let key = State::key(bc_type, ObjectIdRef::new(namespace, &bc_name));
        let mut build_config: BuildConfig = match state.objects.get(&key) {
            Some(value) => BuildConfig::from_value(value.clone())?,
            None => return Err(ClientError::NotFound),
        };
        let version = build_config
            .status
            .as_ref()
            .map(|s| s.last_version)
            .unwrap_or(0)
            + 1;
        build_config.status.get_or_insert_with(Default::default).last_version = version;
        state.objects.insert(key, build_config.to_value()?);

        let mut labels = build_config.labels();
        labels.insert(BUILD_CONFIG_LABEL.to_owned(), bc_name.clone());
        labels.insert(BUILD_CONFIG_NAME_LABEL.to_owned(), bc_name.clone());
        let build = Build {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_owned()),
                name: Some(format!("{}-{}", bc_name, version)),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        let created = state.insert_new(k8s_types::build_openshift_io::v1::Build, build.to_value()?)?;
        Ok(Build::from_value(created)?)
    }

    fn list_builds(&self, namespace: &str, selector: &Labels) -> ClientResult<Vec<Build>> {
        let build_type = k8s_types::build_openshift_io::v1::Build;
        let mut state = self.lock();
        state.record(Operation::List, build_type)?;
        state
            .list(build_type, namespace, selector)
            .into_iter()
            .map(|value| Build::from_value(value).map_err(ClientError::from))
            .collect()
    }

    fn get_build_config(&self, id: ObjectIdRef) -> ClientResult<Option<BuildConfig>> {
        let bc_type = k8s_types::build_openshift_io::v1::BuildConfig;
        let mut state = self.lock();
        state.record(Operation::Fetch, bc_type)?;
        match state.objects.get(&State::key(bc_type, id)) {
            Some(value) => Ok(Some(BuildConfig::from_value(value.clone())?)),
            None => Ok(None),
        }
    }
}

impl ImageClient for FakeCluster {
    fn get_image_stream_tag(
        &self,
        namespace: &str,
        stream: &str,
        tag: &str,
    ) -> ClientResult<Option<ImageStreamTag>> {
        let tag_type = k8s_types::image_openshift_io::v1::ImageStreamTag;
        let mut state = self.lock();
        state.record(Operation::Fetch, tag_type)?;
        let name = ImageStreamTag::tag_name(stream, tag);
        match state.objects.get(&State::key(tag_type, ObjectIdRef::new(namespace, &name))) {
            Some(value) => Ok(Some(ImageStreamTag::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    fn create_image_stream_tag(&self, tag: &ImageStreamTag) -> ClientResult<bool> {
        let tag_type = k8s_types::image_openshift_io::v1::ImageStreamTag;
        let mut state = self.lock();
        state.record(Operation::Create, tag_type)?;
        match state.insert_new(tag_type, tag.to_value()?) {
            Ok(_) => Ok(true),
            Err(ClientError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// One invocation of a create hook
#[derive(Debug, Clone, PartialEq)]
pub struct HookCall {
    pub pre: bool,
    pub was_new: bool,
    pub kind: &'static str,
    pub name: String,
}

/// Create hooks that record every invocation, and optionally fail for one kind
#[derive(Debug, Default)]
pub struct RecordingHooks {
    calls: Mutex<Vec<HookCall>>,
    fail_pre_create_for: Option<&'static str>,
}

impl RecordingHooks {
    pub fn new() -> RecordingHooks {
        RecordingHooks::default()
    }

    pub fn failing_pre_create_for(k8s_type: &'static K8sType) -> RecordingHooks {
        RecordingHooks {
            calls: Mutex::new(Vec::new()),
            fail_pre_create_for: Some(k8s_type.kind),
        }
    }

    pub fn calls(&self) -> Vec<HookCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn push(&self, call: HookCall) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }
}

impl CreateHooks for RecordingHooks {
    fn pre_create(&self, k8s_type: &'static K8sType, object: &Value) -> anyhow::Result<()> {
        self.push(HookCall {
            pre: true,
            was_new: false,
            kind: k8s_type.kind,
            name: object_id(object).name,
        });
        if self.fail_pre_create_for == Some(k8s_type.kind) {
            anyhow::bail!("pre create hook rejected {}", k8s_type.kind);
        }
        Ok(())
    }

    fn post_create(
        &self,
        was_new: bool,
        k8s_type: &'static K8sType,
        object: &Value,
    ) -> anyhow::Result<()> {
        self.push(HookCall {
            pre: false,
            was_new,
            kind: k8s_type.kind,
            name: object_id(object).name,
        });
        Ok(())
    }
}

fn object_id(value: &Value) -> ObjectId {
    let field = |pointer: &str| {
        value
            .pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned()
    };
    ObjectId::new(field("/metadata/namespace"), field("/metadata/name"))
}

fn labels_of(value: &Value) -> Labels {
    value
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_owned())))
                .collect()
        })
        .unwrap_or_default()
}

fn metadata_mut(value: &mut Value) -> Option<&mut serde_json::Map<String, Value>> {
    value
        .as_object_mut()
        .map(|obj| {
            obj.entry("metadata")
                .or_insert_with(|| Value::Object(Default::default()))
        })
        .and_then(Value::as_object_mut)
}

fn set_type_fields(k8s_type: &'static K8sType, value: &mut Value) {
    if let Some(obj) = value.as_object_mut() {
        obj.insert("apiVersion".to_owned(), Value::from(k8s_type.api_version));
        obj.insert("kind".to_owned(), Value::from(k8s_type.kind));
    }
}
