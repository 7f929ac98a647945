//! The interfaces through which the reconciliation engine talks to the cluster. Implementations are
//! provided by the caller; the `testkit` module has an in-memory one. Every call is synchronous and is
//! never retried by the engine, so implementations should apply their own timeouts.
use crate::error::{Operation, ReconcileError};
use crate::k8s_types::K8sType;
use crate::openshift::build::{Build, BuildConfig, BuildRequest};
use crate::openshift::image::ImageStreamTag;
use crate::resource::{KubeObject, Labels, ObjectId, ObjectIdRef};

use serde_json::Value;

use std::fmt::{self, Display};
use std::sync::Arc;

#[derive(Debug)]
pub enum ClientError {
    /// only returned by calls that require the object to exist, such as `update`
    NotFound,
    Conflict(String),
    Unavailable(String),
    Server { status: u16, message: String },
    Serde(serde_json::Error),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        match self {
            ClientError::NotFound => true,
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            ClientError::Conflict(_) => true,
            _ => false,
        }
    }
}

impl Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClientError::NotFound => f.write_str("not found"),
            ClientError::Conflict(msg) => write!(f, "conflict: {}", msg),
            ClientError::Unavailable(msg) => write!(f, "cluster unavailable: {}", msg),
            ClientError::Server { status, message } => {
                write!(f, "server error {}: {}", status, message)
            }
            ClientError::Serde(e) => write!(f, "(De)Serialization error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Serde(e) => Some(e as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> ClientError {
        ClientError::Serde(e)
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Generic access to namespaced objects of any type
pub trait ResourceStore: Send + Sync {
    /// Returns `None` if the object does not exist
    fn fetch(&self, k8s_type: &'static K8sType, id: ObjectIdRef) -> ClientResult<Option<Value>>;

    /// Returns the object as it was persisted, including server populated fields such as the `uid`
    fn create(&self, k8s_type: &'static K8sType, object: &Value) -> ClientResult<Value>;

    fn update(&self, k8s_type: &'static K8sType, object: &Value) -> ClientResult<Value>;

    /// Writes only the `status` of the object
    fn update_status(&self, k8s_type: &'static K8sType, object: &Value) -> ClientResult<Value>;

    /// Lists the objects in the namespace that have all of the labels in `selector`
    fn list(
        &self,
        k8s_type: &'static K8sType,
        namespace: &str,
        selector: &Labels,
    ) -> ClientResult<Vec<Value>>;

    /// true if the type is served by the cluster, which is how optional CRDs are detected
    fn is_type_available(&self, k8s_type: &'static K8sType) -> ClientResult<bool>;
}

/// Typed helpers on top of any `ResourceStore`. These attach the operation, type and id of the
/// object to every error.
pub trait ResourceStoreExt: ResourceStore {
    fn fetch_object<T: KubeObject>(
        &self,
        id: ObjectIdRef,
    ) -> Result<Option<T>, ReconcileError> {
        let k8s_type = T::k8s_type();
        let value = self
            .fetch(k8s_type, id)
            .map_err(|e| ReconcileError::cluster(Operation::Fetch, k8s_type, id.to_owned(), e))?;
        match value {
            Some(value) => Ok(Some(T::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn create_object<T: KubeObject>(&self, object: &T) -> Result<T, ReconcileError> {
        let k8s_type = T::k8s_type();
        let created = self
            .create(k8s_type, &object.to_value()?)
            .map_err(|e| ReconcileError::cluster(Operation::Create, k8s_type, object.object_id(), e))?;
        Ok(T::from_value(created)?)
    }

    fn update_object<T: KubeObject>(&self, object: &T) -> Result<T, ReconcileError> {
        let k8s_type = T::k8s_type();
        let updated = self
            .update(k8s_type, &object.to_value()?)
            .map_err(|e| ReconcileError::cluster(Operation::Update, k8s_type, object.object_id(), e))?;
        Ok(T::from_value(updated)?)
    }

    fn update_object_status<T: KubeObject>(&self, object: &T) -> Result<T, ReconcileError> {
        let k8s_type = T::k8s_type();
        let updated = self.update_status(k8s_type, &object.to_value()?).map_err(|e| {
            ReconcileError::cluster(Operation::UpdateStatus, k8s_type, object.object_id(), e)
        })?;
        Ok(T::from_value(updated)?)
    }

    fn list_objects<T: KubeObject>(
        &self,
        namespace: &str,
        selector: &Labels,
    ) -> Result<Vec<T>, ReconcileError> {
        let k8s_type = T::k8s_type();
        let values = self.list(k8s_type, namespace, selector).map_err(|e| {
            ReconcileError::cluster(Operation::List, k8s_type, ObjectId::new(namespace, ""), e)
        })?;
        values
            .into_iter()
            .map(|value| T::from_value(value).map_err(ReconcileError::from))
            .collect()
    }

    /// Fetches the object with the same id as `desired`, and creates it only if it does not exist.
    /// Returns the object from the cluster, and whether it was created by this call. The pre create
    /// hook only runs if the object is about to be created, while the post create hook always runs.
    fn create_if_not_exists<T: KubeObject>(
        &self,
        desired: T,
        hooks: &dyn CreateHooks,
    ) -> Result<(T, bool), ReconcileError> {
        let k8s_type = T::k8s_type();
        let id = desired.object_id();
        let hook_error = |source: anyhow::Error| ReconcileError::Hook {
            k8s_type,
            id: id.clone(),
            source,
        };

        let (object, is_new) = match self.fetch_object::<T>(id.as_id_ref())? {
            Some(existing) => {
                log::debug!("{} {} already exists", k8s_type.kind, id);
                (existing, false)
            }
            None => {
                hooks
                    .pre_create(k8s_type, &desired.to_value()?)
                    .map_err(hook_error)?;
                log::info!("Creating {} {}", k8s_type.kind, id);
                (self.create_object(&desired)?, true)
            }
        };
        hooks
            .post_create(is_new, k8s_type, &object.to_value()?)
            .map_err(hook_error)?;
        Ok((object, is_new))
    }
}

impl<S: ResourceStore + ?Sized> ResourceStoreExt for S {}

pub trait BuildClient: Send + Sync {
    /// Starts a new build from the BuildConfig named in the request
    fn instantiate(&self, namespace: &str, request: &BuildRequest) -> ClientResult<Build>;

    fn list_builds(&self, namespace: &str, selector: &Labels) -> ClientResult<Vec<Build>>;

    fn get_build_config(&self, id: ObjectIdRef) -> ClientResult<Option<BuildConfig>>;
}

pub trait ImageClient: Send + Sync {
    fn get_image_stream_tag(
        &self,
        namespace: &str,
        stream: &str,
        tag: &str,
    ) -> ClientResult<Option<ImageStreamTag>>;

    /// Returns false if the tag already existed
    fn create_image_stream_tag(&self, tag: &ImageStreamTag) -> ClientResult<bool>;
}

/// Callbacks around `create_if_not_exists`, for things like recording events
pub trait CreateHooks: Send + Sync {
    fn pre_create(&self, _k8s_type: &'static K8sType, _object: &Value) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_create(
        &self,
        _was_new: bool,
        _k8s_type: &'static K8sType,
        _object: &Value,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl CreateHooks for NoopHooks {}

/// Everything a reconciliation pass needs to talk to the cluster
#[derive(Clone)]
pub struct Clients {
    pub store: Arc<dyn ResourceStore>,
    pub builds: Arc<dyn BuildClient>,
    pub images: Arc<dyn ImageClient>,
    pub hooks: Arc<dyn CreateHooks>,
}

impl Clients {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        builds: Arc<dyn BuildClient>,
        images: Arc<dyn ImageClient>,
    ) -> Clients {
        Clients {
            store,
            builds,
            images,
            hooks: Arc::new(NoopHooks),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn CreateHooks>) -> Clients {
        self.hooks = hooks;
        self
    }
}

impl fmt::Debug for Clients {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Clients")
    }
}
