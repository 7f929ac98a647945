//! One reconciliation pass for a single custom resource: run its builder chain, bring existing objects
//! up to date, then record the outcome in the status of the custom resource. The status subresource is
//! written at most once per pass, and only when it changed.
use crate::builder::{AppChain, ServiceChain};
use crate::client::{Clients, ResourceStoreExt};
use crate::conditions::ReasonType;
use crate::config::OperatorConfig;
use crate::crd::{
    KogitoApp, KogitoDataIndex, KogitoJobsService, KogitoRuntime, KogitoService, RuntimeService,
    ServiceStatus,
};
use crate::error::ReconcileError;
use crate::manage::manage_app;
use crate::metrics::Metrics;
use crate::openshift::apps::{DeploymentCondition, DeploymentConfig};
use crate::openshift::image::ImageStreamTag;
use crate::openshift::route::Route;
use crate::k8s_types::{self, K8sType};
use crate::resource::{KubeObject, ObjectId};
use crate::retry::ErrorBackoff;

use k8s_openapi::api::apps::v1::Deployment;

use std::fmt::{self, Display};
use std::time::Duration;

pub const CONDITION_PROGRESSING: &str = "Progressing";
pub const CONDITION_STATUS_FALSE: &str = "False";

/// The kinds of custom resource the reconciler handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    App,
    Runtime,
    DataIndex,
    JobsService,
}

impl ServiceKind {
    pub fn k8s_type(self) -> &'static K8sType {
        use k8s_types::app_kiegroup_org::v1alpha1;
        match self {
            ServiceKind::App => v1alpha1::KogitoApp,
            ServiceKind::Runtime => v1alpha1::KogitoRuntime,
            ServiceKind::DataIndex => v1alpha1::KogitoDataIndex,
            ServiceKind::JobsService => v1alpha1::KogitoJobsService,
        }
    }

    pub fn from_kind(kind: &str) -> Option<ServiceKind> {
        [
            ServiceKind::App,
            ServiceKind::Runtime,
            ServiceKind::DataIndex,
            ServiceKind::JobsService,
        ]
        .iter()
        .copied()
        .find(|k| k.k8s_type().kind == kind)
    }
}

/// A request to reconcile one custom resource. The custom resource is fetched when the pass starts, so
/// requests only need to say which one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconcileRequest {
    pub kind: ServiceKind,
    pub id: ObjectId,
}

impl ReconcileRequest {
    pub fn new(kind: ServiceKind, namespace: impl Into<String>, name: impl Into<String>) -> ReconcileRequest {
        ReconcileRequest {
            kind,
            id: ObjectId::new(namespace, name),
        }
    }
}

impl Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.kind.k8s_type().kind, self.id)
    }
}

/// What the runner should do after a pass
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// reconcile again after this long, even if nothing changes in the meantime
    pub requeue_after: Option<Duration>,
    /// the error that ended the pass, which is also recorded as a `Failed` condition
    pub error: Option<ReconcileError>,
    pub status_updated: bool,
}

impl ReconcileOutcome {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// What the workload of a service looks like at the end of a pass
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkloadState {
    pub available: bool,
    /// the message of a `Progressing=False` condition, which means the rollout gave up
    pub rollout_failure: Option<String>,
    pub conditions: Vec<DeploymentCondition>,
    pub image: Option<String>,
    pub external_uri: Option<String>,
}

impl WorkloadState {
    pub fn from_deployment_config(dc: &DeploymentConfig) -> WorkloadState {
        let (available, conditions) = match dc.status.as_ref() {
            Some(status) => (status.available_replicas > 0, status.conditions.clone()),
            None => (false, Vec::new()),
        };
        WorkloadState::new(available, conditions)
    }

    pub fn from_deployment(deployment: &Deployment) -> WorkloadState {
        let status = match deployment.status.as_ref() {
            Some(status) => status,
            None => return WorkloadState::default(),
        };
        let available = status.available_replicas.unwrap_or(0) > 0;
        let conditions = status
            .conditions
            .iter()
            .flatten()
            .map(|c| DeploymentCondition {
                type_: c.type_.clone(),
                status: c.status.clone(),
                last_update_time: c.last_update_time.clone(),
                last_transition_time: c.last_transition_time.clone(),
                reason: c.reason.clone(),
                message: c.message.clone(),
            })
            .collect();
        WorkloadState::new(available, conditions)
    }

    fn new(available: bool, conditions: Vec<DeploymentCondition>) -> WorkloadState {
        let rollout_failure = conditions
            .iter()
            .find(|c| c.type_ == CONDITION_PROGRESSING && c.status == CONDITION_STATUS_FALSE)
            .map(|c| {
                c.message
                    .clone()
                    .or_else(|| c.reason.clone())
                    .unwrap_or_else(|| "rollout did not progress".to_owned())
            });
        WorkloadState {
            available,
            rollout_failure,
            conditions,
            image: None,
            external_uri: None,
        }
    }

    fn with_image(mut self, image: Option<&ImageStreamTag>) -> Self {
        self.image = image
            .map(|tag| tag.docker_image_reference().to_owned())
            .filter(|reference| !reference.is_empty());
        self
    }

    fn with_route(mut self, route: Option<&Route>) -> Self {
        self.external_uri = route.and_then(Route::external_uri);
        self
    }
}

#[derive(Debug)]
struct RolloutFailed(String);

impl Display for RolloutFailed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "deployment is not available: {}", self.0)
    }
}

/// Records the outcome of a pass in the status. Returns the reason of the `Failed` condition, if one
/// was recorded.
pub fn track_status<S: ServiceStatus>(
    status: &mut S,
    workload: &WorkloadState,
    error: Option<&ReconcileError>,
) -> Option<ReasonType> {
    status.set_deployment_conditions(workload.conditions.clone());
    if workload.image.is_some() {
        status.set_image(workload.image.clone());
    }
    status.set_external_uri(workload.external_uri.clone());

    let conditions = status.conditions_mut();
    match (error, workload.rollout_failure.as_ref()) {
        (Some(error), _) => {
            conditions.set_failed(error.reason(), error);
            Some(error.reason())
        }
        (None, Some(message)) => {
            let reason = ReasonType::DeploymentNotAvailable;
            conditions.set_failed(reason, &RolloutFailed(message.clone()));
            Some(reason)
        }
        (None, None) if workload.available => {
            conditions.set_deployed();
            None
        }
        (None, None) => {
            conditions.set_provisioning();
            None
        }
    }
}

/// Runs reconciliation passes. Passes for different custom resources may run at the same time, but the
/// caller must never run two passes for the same one concurrently.
#[derive(Debug, Clone)]
pub struct Reconciler {
    config: OperatorConfig,
    clients: Clients,
    metrics: Metrics,
    backoff: ErrorBackoff,
}

impl Reconciler {
    pub fn new(config: OperatorConfig, clients: Clients, metrics: Metrics) -> Reconciler {
        let backoff = ErrorBackoff::new(config.backoff.clone());
        Reconciler {
            config,
            clients,
            metrics,
            backoff,
        }
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Fetches the custom resource and runs a pass for it. Returns `None` if the custom resource no
    /// longer exists or is in a namespace this operator does not watch.
    pub fn reconcile_request(&self, request: &ReconcileRequest) -> Option<ReconcileOutcome> {
        if !self.config.watches_namespace(&request.id.namespace) {
            log::debug!("Ignoring {}, its namespace is not watched", request);
            return None;
        }
        match request.kind {
            ServiceKind::App => self.fetch_and_run(&request.id, |app: &KogitoApp| self.reconcile_app(app)),
            ServiceKind::Runtime => {
                self.fetch_and_run(&request.id, |svc: &KogitoRuntime| self.reconcile_service(svc))
            }
            ServiceKind::DataIndex => {
                self.fetch_and_run(&request.id, |svc: &KogitoDataIndex| self.reconcile_service(svc))
            }
            ServiceKind::JobsService => {
                self.fetch_and_run(&request.id, |svc: &KogitoJobsService| self.reconcile_service(svc))
            }
        }
    }

    fn fetch_and_run<T: KubeObject>(
        &self,
        id: &ObjectId,
        pass: impl FnOnce(&T) -> ReconcileOutcome,
    ) -> Option<ReconcileOutcome> {
        match self.clients.store.fetch_object::<T>(id.as_id_ref()) {
            Ok(Some(instance)) => Some(pass(&instance)),
            Ok(None) => {
                log::info!("{} {} no longer exists", T::k8s_type().kind, id);
                self.backoff.reset_backoff(id);
                None
            }
            Err(e) => {
                log::error!("Failed to fetch {} {}: {}", T::k8s_type().kind, id, e);
                self.metrics.pass_error(T::k8s_type(), e.reason());
                Some(ReconcileOutcome {
                    requeue_after: self.backoff.next_error_backoff(id),
                    error: Some(e),
                    status_updated: false,
                })
            }
        }
    }

    pub fn reconcile_app(&self, app: &KogitoApp) -> ReconcileOutcome {
        let k8s_type = KogitoApp::k8s_type();
        let _timer = self.metrics.pass_started(k8s_type);
        log::info!("Starting reconciliation of {} {}", k8s_type.kind, app.object_id());

        let ctx = AppChain::new(&self.config, &self.clients, &self.metrics, app);
        let (bundle, mut error) = match ctx.run() {
            Ok(bundle) => (bundle, None),
            Err(chain_error) => {
                log::error!("Reconciliation of {} stopped: {}", app.object_id(), chain_error);
                (chain_error.bundle, Some(chain_error.error))
            }
        };
        if error.is_none() {
            match manage_app(&ctx, &bundle).into_result() {
                Ok(true) => log::info!("Updated resources of {} to match its spec", app.object_id()),
                Ok(false) => {}
                Err(e) => error = Some(e),
            }
        }
        if error.is_none() {
            error = bundle.builds.failure_error();
        }

        let workload = match bundle.deployment_config.as_ref() {
            Some(dc) => WorkloadState::from_deployment_config(&dc.object),
            None => WorkloadState::default(),
        }
        .with_image(bundle.image.as_ref())
        .with_route(bundle.route.as_ref().map(|r| &r.object));

        let mut status = app.status().cloned().unwrap_or_default();
        status.builds = bundle.builds.builds.clone();
        status.latest_build = bundle.builds.latest_build.clone();
        self.finish(app, status, &workload, error)
    }

    pub fn reconcile_service<S: RuntimeService>(&self, service: &S) -> ReconcileOutcome {
        let k8s_type = S::k8s_type();
        let _timer = self.metrics.pass_started(k8s_type);
        log::info!("Starting reconciliation of {} {}", k8s_type.kind, service.object_id());

        let ctx = ServiceChain::new(&self.config, &self.clients, &self.metrics, service);
        let (bundle, error) = match ctx.run() {
            Ok(bundle) => (bundle, None),
            Err(chain_error) => {
                log::error!("Reconciliation of {} stopped: {}", service.object_id(), chain_error);
                (chain_error.bundle, Some(chain_error.error))
            }
        };

        let workload = match bundle.deployment.as_ref() {
            Some(deployment) => WorkloadState::from_deployment(&deployment.object),
            None => WorkloadState::default(),
        }
        .with_image(bundle.image.as_ref())
        .with_route(bundle.route.as_ref().map(|r| &r.object));

        let status = service.status().cloned().unwrap_or_default();
        self.finish(service, status, &workload, error)
    }

    fn finish<T: KogitoService>(
        &self,
        instance: &T,
        mut status: T::Status,
        workload: &WorkloadState,
        mut error: Option<ReconcileError>,
    ) -> ReconcileOutcome {
        let k8s_type = T::k8s_type();
        let id = instance.object_id();
        let failure = track_status(&mut status, workload, error.as_ref());

        let mut status_updated = false;
        if instance.status() != Some(&status) {
            let mut updated = instance.clone();
            *updated.status_mut() = status;
            match self.clients.store.update_object_status(&updated) {
                Ok(_) => status_updated = true,
                Err(e) => {
                    log::error!("Failed to write the status of {}: {}", id, e);
                    if error.is_none() {
                        error = Some(e);
                    }
                }
            }
        } else {
            log::debug!("Status of {} is unchanged", id);
        }

        let requeue_after = match (error.as_ref(), failure) {
            (Some(e), _) => {
                self.metrics.pass_error(k8s_type, e.reason());
                self.backoff.next_error_backoff(&id)
            }
            (None, Some(reason)) => {
                self.metrics.pass_error(k8s_type, reason);
                self.backoff.next_error_backoff(&id)
            }
            (None, None) if workload.available => {
                self.backoff.reset_backoff(&id);
                None
            }
            (None, None) => {
                self.backoff.reset_backoff(&id);
                Some(self.config.provisioning_requeue)
            }
        };
        log::info!(
            "Finished reconciliation of {} {}, requeue after: {:?}",
            k8s_type.kind,
            id,
            requeue_after
        );
        ReconcileOutcome {
            requeue_after,
            error,
            status_updated,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::conditions::ConditionType;
    use crate::crd::KogitoServiceStatus;
    use crate::openshift::apps::DeploymentConfigStatus;

    fn dc_with_status(available_replicas: i32, conditions: Vec<DeploymentCondition>) -> DeploymentConfig {
        let mut dc = DeploymentConfig::default();
        dc.status = Some(DeploymentConfigStatus {
            available_replicas,
            conditions,
            ..Default::default()
        });
        dc
    }

    fn condition(type_: &str, status: &str, message: &str) -> DeploymentCondition {
        DeploymentCondition {
            type_: type_.to_owned(),
            status: status.to_owned(),
            message: Some(message.to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn kinds_are_looked_up_by_name() {
        assert_eq!(Some(ServiceKind::DataIndex), ServiceKind::from_kind("KogitoDataIndex"));
        assert_eq!(None, ServiceKind::from_kind("Deployment"));
        let request = ReconcileRequest::new(ServiceKind::App, "kogito", "example");
        assert_eq!("KogitoApp kogito/example", request.to_string());
    }

    #[test]
    fn available_workload_is_deployed_once() {
        let workload = WorkloadState::from_deployment_config(&dc_with_status(
            1,
            vec![condition("Available", "True", "minimum replicas available")],
        ));
        let mut status = KogitoServiceStatus::default();
        assert_eq!(None, track_status(&mut status, &workload, None));
        assert_eq!(None, track_status(&mut status, &workload, None));
        assert_eq!(1, status.conditions.len());
        assert_eq!(Some(ConditionType::Deployed), status.conditions.last_type());
        assert_eq!(1, status.deployment_conditions.len());
    }

    #[test]
    fn stalled_rollout_is_a_failure() {
        let workload = WorkloadState::from_deployment_config(&dc_with_status(
            0,
            vec![condition(CONDITION_PROGRESSING, "False", "replication controller timed out")],
        ));
        let mut status = KogitoServiceStatus::default();
        assert_eq!(
            Some(ReasonType::DeploymentNotAvailable),
            track_status(&mut status, &workload, None)
        );
        let last = status.conditions.last().unwrap();
        assert_eq!(ConditionType::Failed, last.type_);
        assert!(last.message.contains("replication controller timed out"));
    }

    #[test]
    fn errors_win_over_the_workload_state() {
        let workload = WorkloadState {
            available: true,
            ..Default::default()
        };
        let mut status = KogitoServiceStatus::default();
        let error = ReconcileError::structural("no output image");
        assert_eq!(
            Some(ReasonType::MissingDependency),
            track_status(&mut status, &workload, Some(&error))
        );
        assert_eq!(Some(ConditionType::Failed), status.conditions.last_type());
    }

    #[test]
    fn missing_workload_is_provisioning() {
        let mut status = KogitoServiceStatus::default();
        status.image = Some("quay.io/kiegroup/kogito-data-index:0.9.0".to_owned());
        track_status(&mut status, &WorkloadState::default(), None);
        assert_eq!(Some(ConditionType::Provisioning), status.conditions.last_type());
        assert_eq!(Some("quay.io/kiegroup/kogito-data-index:0.9.0"), status.image.as_deref());
    }
}
