//! The reconciliation engine of the Kogito operator. For every Kogito custom resource, it creates and
//! maintains the OpenShift and Kubernetes objects that build, deploy and expose the service.
//!
//! A `KogitoApp` is built from source inside the cluster: an S2I build compiles the application, a
//! runtime build puts the result on a slim base image, and once that image exists the app is deployed
//! with a `DeploymentConfig`, a `Service` and a `Route`. `KogitoRuntime`, `KogitoDataIndex` and
//! `KogitoJobsService` deploy an image from an external registry, which is imported into an
//! `ImageStream` and deployed with a `Deployment`.
//!
//! The engine talks to the cluster only through the traits in the `client` module, so it can be driven
//! by any client, or by the in-memory cluster from the `testkit` module. One pass is run for one
//! custom resource at a time:
//!
//! ```no_run
//! use kogito_operator::prelude::*;
//!
//! fn reconcile_all(clients: Clients, requests: Vec<ReconcileRequest>) {
//!     let config = OperatorConfig::new("kogito-operator").within_namespace("kogito");
//!     let reconciler = Reconciler::new(config, clients, Metrics::new());
//!     for request in requests {
//!         if let Some(outcome) = reconciler.reconcile_request(&request) {
//!             println!("{}: requeue after {:?}", request, outcome.requeue_after);
//!         }
//!     }
//! }
//! ```
//!
//! In an operator, the `runner` module drives these passes from a stream of `ReconcileRequest`s.

#[macro_use]
extern crate serde_derive;

#[macro_use]
pub mod resource;

pub mod build_state;
pub mod builder;
pub mod client;
pub mod compare;
pub mod conditions;
pub mod config;
pub mod crd;
pub mod error;
pub mod factory;
pub mod k8s_types;
pub mod manage;
pub mod metrics;
pub mod openshift;
pub mod reconcile;
pub mod retry;
pub mod runner;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use serde;
pub use serde_json;
pub use serde_yaml;

pub mod prelude {
    pub use crate::client::{BuildClient, Clients, CreateHooks, ImageClient, ResourceStore};
    pub use crate::conditions::{ConditionType, ReasonType};
    pub use crate::config::{ImageDefaults, OperatorConfig};
    pub use crate::crd::{
        KogitoApp, KogitoDataIndex, KogitoJobsService, KogitoRuntime, KogitoService, ServiceSpec,
        ServiceStatus,
    };
    pub use crate::error::ReconcileError;
    pub use crate::k8s_types::{self, K8sType};
    pub use crate::metrics::Metrics;
    pub use crate::reconcile::{ReconcileOutcome, ReconcileRequest, Reconciler, ServiceKind};
    pub use crate::resource::{KubeObject, ObjectId};
    pub use crate::runner::{start_reconciler, Reconcile, RunnerHandle};
}
