//! The builder chains that bring the cluster to the desired state of a custom resource. A chain is an
//! ordered list of named steps that all work on the same bundle. Steps run in order, and the first one
//! that fails stops the chain: the error carries the bundle as it was when the step failed, and no later
//! step makes any call to the cluster.
pub mod app;
pub mod service;

pub use self::app::{AppBundle, AppChain};
pub use self::service::{ServiceBundle, ServiceChain};

use crate::client::{Clients, ResourceStoreExt};
use crate::compare::{update_if_changed, Comparable};
use crate::config::OperatorConfig;
use crate::crd::KogitoService;
use crate::error::{ChainError, Operation, ReconcileError};
use crate::factory::MetaDefaults;
use crate::k8s_types::K8sType;
use crate::metrics::Metrics;
use crate::resource::{add_owner_reference, KubeObject, ObjectId, Owner};

/// A step of a chain. Steps only ever add to the bundle.
pub type StepFn<C, B> = fn(&C, &mut B) -> Result<(), ReconcileError>;

/// Runs every step in order, stopping at the first failure
pub fn run_chain<C, B: Default>(
    ctx: &C,
    steps: &[(&'static str, StepFn<C, B>)],
) -> Result<B, ChainError<B>> {
    steps
        .iter()
        .try_fold(B::default(), |mut bundle, (step_name, step)| {
            match step(ctx, &mut bundle) {
                Ok(()) => Ok(bundle),
                Err(error) => Err(ChainError {
                    step: *step_name,
                    bundle,
                    error,
                }),
            }
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceStatus {
    /// true if the object was created during this pass
    pub is_new: bool,
}

/// An object as it is in the cluster after a step ran
#[derive(Debug, Clone, PartialEq)]
pub struct Resource<T> {
    pub object: T,
    pub status: ResourceStatus,
}

impl<T> Resource<T> {
    pub fn is_new(&self) -> bool {
        self.status.is_new
    }
}

pub(crate) fn is_new<T>(resource: &Option<Resource<T>>) -> bool {
    resource.as_ref().map(Resource::is_new).unwrap_or(false)
}

/// Everything a step needs: the custom resource, the metadata defaults derived from it, and the clients
#[derive(Debug)]
pub struct Context<'a, T: KogitoService> {
    pub config: &'a OperatorConfig,
    pub clients: &'a Clients,
    pub metrics: &'a Metrics,
    pub instance: &'a T,
    pub meta: MetaDefaults,
    owner: Owner,
}

impl<'a, T: KogitoService> Context<'a, T> {
    pub fn new(
        config: &'a OperatorConfig,
        clients: &'a Clients,
        metrics: &'a Metrics,
        instance: &'a T,
    ) -> Context<'a, T> {
        Context {
            config,
            clients,
            metrics,
            instance,
            meta: MetaDefaults::for_service(instance, config),
            owner: Owner::of(instance),
        }
    }

    pub fn namespace(&self) -> &str {
        self.instance.namespace()
    }

    pub fn app_name(&self) -> &str {
        self.instance.name()
    }

    pub fn sibling_id(&self, name: &str) -> ObjectId {
        self.instance.object_id().sibling(name)
    }

    /// Creates the object, owned by the custom resource, unless it already exists. An existing object
    /// is returned as is.
    pub fn create<O: KubeObject>(&self, mut desired: O) -> Result<Resource<O>, ReconcileError> {
        add_owner_reference(desired.metadata_mut(), &self.owner);
        let (object, is_new) = self
            .clients
            .store
            .create_if_not_exists(desired, self.clients.hooks.as_ref())?;
        if is_new {
            self.metrics.resource_created(O::k8s_type());
        }
        Ok(Resource {
            object,
            status: ResourceStatus { is_new },
        })
    }

    /// Like `create`, but an existing object is also brought up to date with the desired one
    pub fn ensure<O: Comparable>(&self, desired: O) -> Result<Resource<O>, ReconcileError> {
        let created = self.create(desired.clone())?;
        if created.is_new() {
            return Ok(created);
        }
        let (object, _) = update_if_changed(
            self.clients.store.as_ref(),
            self.metrics,
            created.object,
            &desired,
        )?;
        Ok(Resource {
            object,
            status: ResourceStatus { is_new: false },
        })
    }

    pub fn is_type_available(&self, k8s_type: &'static K8sType) -> Result<bool, ReconcileError> {
        self.clients
            .store
            .is_type_available(k8s_type)
            .map_err(|e| ReconcileError::cluster(Operation::Fetch, k8s_type, self.instance.object_id(), e))
    }
}
