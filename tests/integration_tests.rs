use kogito_operator::builder::AppChain;
use kogito_operator::conditions::{ConditionType, MAX_CONDITIONS};
use kogito_operator::error::Operation;
use kogito_operator::openshift::apps::DeploymentConfig;
use kogito_operator::openshift::build::{BuildConfig, BuildPhase};
use kogito_operator::openshift::image::{ImageStream, ImageStreamTag};
use kogito_operator::openshift::monitoring::ServiceMonitor;
use kogito_operator::openshift::route::Route;
use kogito_operator::prelude::*;
use kogito_operator::serde_json::{self, json, Value};
use kogito_operator::testkit::{FakeCluster, RecordingHooks};

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};

use std::sync::Arc;
use std::time::Duration;

const NAMESPACE: &str = "kogito";
const EXPOSE_SERVICES: &str = "io.openshift.expose-services";

fn setup() -> Arc<FakeCluster> {
    let _ = env_logger::try_init();
    FakeCluster::new()
}

fn config() -> OperatorConfig {
    OperatorConfig::new("kogito-operator-test")
        .within_namespace(NAMESPACE)
        .with_provisioning_requeue(Duration::from_secs(5))
}

fn reconciler(cluster: &Arc<FakeCluster>) -> Reconciler {
    Reconciler::new(config(), cluster.clients(), Metrics::new())
}

fn app_json(name: &str) -> Value {
    json!({
        "apiVersion": "app.kiegroup.org/v1alpha1",
        "kind": "KogitoApp",
        "metadata": { "namespace": NAMESPACE, "name": name },
        "spec": {
            "serviceLabels": { "team": "kie" },
            "build": {
                "gitSource": {
                    "uri": "https://github.com/kiegroup/kogito-examples",
                    "contextDir": "process-quarkus-example"
                }
            }
        }
    })
}

fn create_app(cluster: &FakeCluster, name: &str) -> KogitoApp {
    let app: KogitoApp = serde_json::from_value(app_json(name)).expect("invalid KogitoApp");
    cluster.put(&app)
}

fn current_app(cluster: &FakeCluster, name: &str) -> KogitoApp {
    cluster.get(NAMESPACE, name).expect("KogitoApp is gone")
}

fn add_runtime_image(cluster: &FakeCluster, app: &str) {
    cluster.add_image(
        NAMESPACE,
        app,
        "latest",
        &[(EXPOSE_SERVICES, "8080:http"), ("prometheus.io/scrape", "true")],
    );
}

fn last_condition<S: ServiceStatus>(status: Option<&S>) -> (ConditionType, Option<ReasonType>) {
    let last = status
        .and_then(|s| s.conditions().last())
        .expect("no condition was recorded");
    (last.type_, last.reason)
}

#[test]
fn app_settles_on_a_stable_state() {
    let cluster = setup();
    create_app(&cluster, "example");
    add_runtime_image(&cluster, "example");
    let reconciler = reconciler(&cluster);

    let outcome = reconciler.reconcile_app(&current_app(&cluster, "example"));
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
    assert!(outcome.status_updated);

    assert!(cluster.get::<BuildConfig>(NAMESPACE, "example-builder").is_some());
    assert!(cluster.get::<BuildConfig>(NAMESPACE, "example").is_some());
    assert!(cluster.get::<ImageStream>(NAMESPACE, "example-builder").is_some());
    assert!(cluster.get::<ImageStream>(NAMESPACE, "example").is_some());
    assert!(cluster.get::<DeploymentConfig>(NAMESPACE, "example").is_some());
    assert!(cluster.get::<Route>(NAMESPACE, "example").is_some());
    assert!(cluster.get::<ServiceMonitor>(NAMESPACE, "example").is_some());
    let service = cluster.get::<Service>(NAMESPACE, "example").unwrap();
    let labels = service.metadata.labels.unwrap();
    assert_eq!(Some("example"), labels.get("app").map(String::as_str));
    assert_eq!(Some("kie"), labels.get("team").map(String::as_str));

    // a second pass over an unchanged cluster must not write anything
    cluster.reset_call_counts();
    let outcome = reconciler.reconcile_app(&current_app(&cluster, "example"));
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
    assert!(!outcome.status_updated);
    assert_eq!(0, cluster.total_calls(Operation::Create));
    assert_eq!(0, cluster.total_calls(Operation::Update));
    assert_eq!(0, cluster.total_calls(Operation::UpdateStatus));
    assert_eq!(0, cluster.total_calls(Operation::Instantiate));

    let metrics = reconciler.metrics();
    assert_eq!(2, metrics.created_count(k8s_types::build_openshift_io::v1::BuildConfig));
    assert_eq!(1, metrics.builds_triggered_count());
}

#[test]
fn builds_are_created_in_dependency_order_and_triggered_once() {
    let cluster = setup();
    create_app(&cluster, "example");
    let reconciler = reconciler(&cluster);

    let outcome = reconciler.reconcile_app(&current_app(&cluster, "example"));
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
    assert_eq!(Some(Duration::from_secs(5)), outcome.requeue_after);

    let s2i = cluster.get::<BuildConfig>(NAMESPACE, "example-builder").unwrap();
    let runtime = cluster.get::<BuildConfig>(NAMESPACE, "example").unwrap();
    assert_eq!(s2i.spec.output.to.as_ref(), Some(&runtime.spec.source.images[0].from));
    assert_eq!(1, cluster.builds_of(NAMESPACE, "example-builder").len());
    assert!(cluster.builds_of(NAMESPACE, "example").is_empty());

    // no image yet, so nothing is deployed
    assert!(cluster.get::<DeploymentConfig>(NAMESPACE, "example").is_none());
    assert!(cluster.get::<Service>(NAMESPACE, "example").is_none());

    let app = current_app(&cluster, "example");
    let status = app.status.as_ref().unwrap();
    assert_eq!(vec!["example-builder-1"], status.builds.new);
    assert_eq!(Some("example-builder-1"), status.latest_build.as_deref());
    assert_eq!((ConditionType::Provisioning, None), last_condition(app.status.as_ref()));

    reconciler.reconcile_app(&app);
    assert_eq!(1, cluster.builds_of(NAMESPACE, "example-builder").len());
    assert_eq!(1, cluster.call_count(Operation::Instantiate, k8s_types::build_openshift_io::v1::BuildConfig));
}

#[test]
fn pending_image_is_not_an_error() {
    let cluster = setup();
    let app = create_app(&cluster, "example");
    let config = config();
    let clients = cluster.clients();
    let metrics = Metrics::new();

    let chain = AppChain::new(&config, &clients, &metrics, &app);
    let bundle = chain.run().expect("chain failed while waiting for an image");
    assert!(bundle.is_pending());
    assert!(bundle.deployment_config.is_none());
    assert!(!bundle.deployment_config_is_new());
    assert!(bundle.build_triggered);

    add_runtime_image(&cluster, "example");
    let bundle = chain.run().expect("chain failed once the image exists");
    assert!(!bundle.is_pending());
    assert!(bundle.deployment_config_is_new());
    assert!(!bundle.build_triggered);
}

#[test]
fn failing_step_stops_the_pass() {
    let cluster = setup();
    create_app(&cluster, "example");
    add_runtime_image(&cluster, "example");
    let bc_type = k8s_types::build_openshift_io::v1::BuildConfig;
    cluster.fail_on(Operation::Create, bc_type, "admission webhook denied the request");
    let reconciler = reconciler(&cluster);

    let outcome = reconciler.reconcile_app(&current_app(&cluster, "example"));
    let error = outcome.error.expect("pass should have failed");
    assert_eq!(ReasonType::CreateResourceFailed, error.reason());
    assert!(outcome.requeue_after.is_some());

    assert_eq!(1, cluster.call_count(Operation::Create, bc_type));
    assert_eq!(0, cluster.calls_for_type(k8s_types::image_openshift_io::v1::ImageStream));
    assert_eq!(0, cluster.calls_for_type(k8s_types::apps_openshift_io::v1::DeploymentConfig));
    assert_eq!(0, cluster.calls_for_type(k8s_types::core::v1::Service));
    assert_eq!(0, cluster.total_calls(Operation::Instantiate));

    let app = current_app(&cluster, "example");
    assert_eq!(
        (ConditionType::Failed, Some(ReasonType::CreateResourceFailed)),
        last_condition(app.status.as_ref())
    );

    cluster.clear_failures();
    let outcome = reconciler.reconcile_app(&app);
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
    assert!(cluster.get::<DeploymentConfig>(NAMESPACE, "example").is_some());
}

#[test]
fn condition_history_keeps_the_newest_failures() {
    let cluster = setup();
    create_app(&cluster, "example");
    cluster.fail_on(
        Operation::Create,
        k8s_types::core::v1::ServiceAccount,
        "quota exceeded",
    );
    let reconciler = reconciler(&cluster);

    for _ in 0..7 {
        let outcome = reconciler.reconcile_app(&current_app(&cluster, "example"));
        assert!(outcome.is_error());
    }
    let app = current_app(&cluster, "example");
    let conditions = app.status().unwrap().conditions();
    assert_eq!(MAX_CONDITIONS, conditions.len());
    assert!(conditions.iter().all(|c| c.type_ == ConditionType::Failed));
}

#[test]
fn first_build_is_started_after_an_interrupted_pass() {
    let cluster = setup();
    create_app(&cluster, "example");
    let stream_type = k8s_types::image_openshift_io::v1::ImageStream;
    cluster.fail_on(Operation::Create, stream_type, "etcd timeout");
    let reconciler = reconciler(&cluster);

    let outcome = reconciler.reconcile_app(&current_app(&cluster, "example"));
    assert!(outcome.is_error());
    assert!(cluster.get::<BuildConfig>(NAMESPACE, "example-builder").is_some());
    assert!(cluster.builds_of(NAMESPACE, "example-builder").is_empty());

    cluster.clear_failures();
    let outcome = reconciler.reconcile_app(&current_app(&cluster, "example"));
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
    assert_eq!(1, cluster.builds_of(NAMESPACE, "example-builder").len());
    let app = current_app(&cluster, "example");
    assert_eq!(vec!["example-builder-1"], app.status.as_ref().unwrap().builds.new);

    for _ in 0..3 {
        reconciler.reconcile_app(&current_app(&cluster, "example"));
    }
    assert_eq!(1, cluster.builds_of(NAMESPACE, "example-builder").len());
}

#[test]
fn panicking_build_client_does_not_fail_the_pass() {
    let cluster = setup();
    let app = create_app(&cluster, "example");
    cluster.panic_on_instantiate();
    let config = config();
    let clients = cluster.clients();
    let metrics = Metrics::new();

    let bundle = AppChain::new(&config, &clients, &metrics, &app)
        .run()
        .expect("chain failed with a panicking build client");
    assert!(!bundle.build_triggered);
    assert!(bundle.is_pending());
    assert_eq!(0, metrics.builds_triggered_count());

    let outcome = reconciler(&cluster).reconcile_app(&current_app(&cluster, "example"));
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
    assert!(cluster.builds_of(NAMESPACE, "example-builder").is_empty());
}

#[test]
fn service_monitor_is_skipped_without_the_monitoring_crd() {
    let cluster = setup();
    create_app(&cluster, "example");
    add_runtime_image(&cluster, "example");
    let monitor_type = k8s_types::monitoring_coreos_com::v1::ServiceMonitor;
    cluster.remove_type(monitor_type);
    let reconciler = reconciler(&cluster);

    let outcome = reconciler.reconcile_app(&current_app(&cluster, "example"));
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
    assert!(cluster.get::<Route>(NAMESPACE, "example").is_some());
    assert!(cluster.get::<ServiceMonitor>(NAMESPACE, "example").is_none());
    assert_eq!(0, cluster.calls_for_type(monitor_type));
}

#[test]
fn failed_build_is_reported() {
    let cluster = setup();
    create_app(&cluster, "example");
    let reconciler = reconciler(&cluster);
    reconciler.reconcile_app(&current_app(&cluster, "example"));

    cluster.set_build_phase(NAMESPACE, "example-builder-1", BuildPhase::Failed);
    let outcome = reconciler.reconcile_app(&current_app(&cluster, "example"));
    let error = outcome.error.expect("failed build should be reported");
    assert_eq!(ReasonType::BuildS2IFailed, error.reason());

    let app = current_app(&cluster, "example");
    assert_eq!(vec!["example-builder-1"], app.status.as_ref().unwrap().builds.failed);
    assert_eq!(
        (ConditionType::Failed, Some(ReasonType::BuildS2IFailed)),
        last_condition(app.status.as_ref())
    );
}

#[test]
fn changes_to_the_app_are_applied_to_existing_resources() {
    let cluster = setup();
    create_app(&cluster, "example");
    add_runtime_image(&cluster, "example");
    let reconciler = reconciler(&cluster);
    reconciler.reconcile_app(&current_app(&cluster, "example"));

    let mut app = current_app(&cluster, "example");
    app.spec.service.replicas = Some(3);
    app.spec.build.git_source.as_mut().unwrap().reference = Some("stable".to_owned());
    app.spec.service.service_labels.insert("tier".to_owned(), "backend".to_owned());
    let app = cluster.put(&app);

    cluster.reset_call_counts();
    let outcome = reconciler.reconcile_app(&app);
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);

    let dc_type = k8s_types::apps_openshift_io::v1::DeploymentConfig;
    let bc_type = k8s_types::build_openshift_io::v1::BuildConfig;
    assert_eq!(1, cluster.call_count(Operation::Update, dc_type));
    assert_eq!(1, cluster.call_count(Operation::Update, bc_type));
    assert_eq!(1, cluster.call_count(Operation::Update, k8s_types::core::v1::Service));
    assert_eq!(1, cluster.call_count(Operation::Update, k8s_types::route_openshift_io::v1::Route));
    assert_eq!(1, cluster.call_count(Operation::Instantiate, bc_type));
    assert_eq!(2, cluster.builds_of(NAMESPACE, "example-builder").len());

    let dc = cluster.get::<DeploymentConfig>(NAMESPACE, "example").unwrap();
    assert_eq!(Some(3), dc.spec.replicas);
    let s2i = cluster.get::<BuildConfig>(NAMESPACE, "example-builder").unwrap();
    assert_eq!(
        Some("stable"),
        s2i.spec.source.git.as_ref().and_then(|git| git.reference.as_deref())
    );
    let service = cluster.get::<Service>(NAMESPACE, "example").unwrap();
    assert_eq!(
        Some("backend"),
        service.metadata.labels.unwrap().get("tier").map(String::as_str)
    );
}

#[test]
fn hooks_run_around_every_create() {
    let cluster = setup();
    create_app(&cluster, "example");
    add_runtime_image(&cluster, "example");
    let hooks = Arc::new(RecordingHooks::new());
    let reconciler = Reconciler::new(config(), cluster.clients_with_hooks(hooks.clone()), Metrics::new());

    reconciler.reconcile_app(&current_app(&cluster, "example"));
    let calls = hooks.calls();
    let pre_created = calls
        .iter()
        .filter(|c| c.pre)
        .map(|c| (c.kind, c.name.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        vec![
            ("ServiceAccount", "example"),
            ("RoleBinding", "example-view"),
            ("BuildConfig", "example-builder"),
            ("BuildConfig", "example"),
            ("ImageStream", "example-builder"),
            ("ImageStream", "example"),
            ("DeploymentConfig", "example"),
            ("Service", "example"),
            ("Route", "example"),
            ("ServiceMonitor", "example"),
        ],
        pre_created
    );
    assert!(calls.iter().filter(|c| !c.pre).all(|c| c.was_new));

    reconciler.reconcile_app(&current_app(&cluster, "example"));
    let second_pass = &hooks.calls()[calls.len()..];
    assert_eq!(10, second_pass.len());
    assert!(second_pass.iter().all(|c| !c.pre && !c.was_new));
}

#[test]
fn failing_pre_create_hook_prevents_the_create() {
    let cluster = setup();
    create_app(&cluster, "example");
    add_runtime_image(&cluster, "example");
    let hooks = Arc::new(RecordingHooks::failing_pre_create_for(k8s_types::core::v1::Service));
    let reconciler = Reconciler::new(config(), cluster.clients_with_hooks(hooks), Metrics::new());

    let outcome = reconciler.reconcile_app(&current_app(&cluster, "example"));
    let error = outcome.error.expect("hook failure should fail the pass");
    assert_eq!(ReasonType::CreateResourceFailed, error.reason());
    assert!(cluster.get::<DeploymentConfig>(NAMESPACE, "example").is_some());
    assert!(cluster.get::<Service>(NAMESPACE, "example").is_none());
    assert!(cluster.get::<Route>(NAMESPACE, "example").is_none());
}

#[test]
fn service_account_creation_can_be_disabled() {
    let cluster = setup();
    create_app(&cluster, "example");
    add_runtime_image(&cluster, "example");
    let reconciler = Reconciler::new(
        config().without_service_accounts().without_service_monitors(),
        cluster.clients(),
        Metrics::new(),
    );

    let outcome = reconciler.reconcile_app(&current_app(&cluster, "example"));
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
    assert_eq!(0, cluster.calls_for_type(k8s_types::core::v1::ServiceAccount));
    assert_eq!(0, cluster.calls_for_type(k8s_types::monitoring_coreos_com::v1::ServiceMonitor));
    assert!(cluster.get::<DeploymentConfig>(NAMESPACE, "example").is_some());
}

fn data_index(cluster: &FakeCluster) -> KogitoDataIndex {
    let data_index: KogitoDataIndex = serde_json::from_value(json!({
        "apiVersion": "app.kiegroup.org/v1alpha1",
        "kind": "KogitoDataIndex",
        "metadata": { "namespace": NAMESPACE, "name": "data-index" },
        "spec": {
            "replicas": 2,
            "infra": {
                "infinispan": {
                    "uri": "infinispan:11222",
                    "credentials": { "username": "developer", "password": "secret" }
                },
                "kafka": { "bootstrapServers": "kafka:9092" }
            }
        }
    }))
    .expect("invalid KogitoDataIndex");
    cluster.put(&data_index)
}

#[test]
fn runtime_service_is_deployed_once_its_image_is_imported() {
    let cluster = setup();
    data_index(&cluster);
    let reconciler = reconciler(&cluster);
    let request = ReconcileRequest::new(ServiceKind::DataIndex, NAMESPACE, "data-index");

    let outcome = reconciler.reconcile_request(&request).expect("data index is gone");
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
    assert_eq!(Some(Duration::from_secs(5)), outcome.requeue_after);
    assert!(cluster.get::<Secret>(NAMESPACE, "data-index-infra-credentials").is_some());
    let properties = cluster.get::<ConfigMap>(NAMESPACE, "data-index-properties").unwrap();
    let file = &properties.data.unwrap()["application.properties"];
    assert!(file.contains("kafka.bootstrap.servers=kafka:9092"));
    assert!(!file.contains("secret"));
    assert!(cluster.get::<ImageStream>(NAMESPACE, "kogito-data-index").is_some());
    assert!(cluster.get::<ImageStreamTag>(NAMESPACE, "kogito-data-index:0.9.0").is_some());
    assert!(cluster.get::<Deployment>(NAMESPACE, "data-index").is_none());

    cluster.add_image(NAMESPACE, "kogito-data-index", "0.9.0", &[(EXPOSE_SERVICES, "8080:http")]);
    let outcome = reconciler.reconcile_request(&request).unwrap();
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);

    let deployment = cluster.get::<Deployment>(NAMESPACE, "data-index").unwrap();
    let spec = deployment.spec.unwrap();
    assert_eq!(Some(2), spec.replicas);
    let container = &spec.template.spec.unwrap().containers[0];
    let env = container.env.as_ref().unwrap();
    assert!(env.iter().any(|e| e.name == "KAFKA_BOOTSTRAP_SERVERS"));
    let password = env
        .iter()
        .find(|e| e.name == "QUARKUS_INFINISPAN_CLIENT_AUTH_PASSWORD")
        .unwrap();
    assert!(password.value.is_none());
    assert!(cluster.get::<Service>(NAMESPACE, "data-index").is_some());
    assert!(cluster.get::<Route>(NAMESPACE, "data-index").is_some());

    let status = cluster.get::<KogitoDataIndex>(NAMESPACE, "data-index").unwrap().status.unwrap();
    assert!(status.image.unwrap().contains("kogito-data-index"));

    cluster.reset_call_counts();
    reconciler.reconcile_request(&request).unwrap();
    assert_eq!(0, cluster.total_calls(Operation::Create));
    assert_eq!(0, cluster.total_calls(Operation::Update));
}

#[test]
fn runtime_service_follows_changes_to_its_spec() {
    let cluster = setup();
    data_index(&cluster);
    cluster.add_image(NAMESPACE, "kogito-data-index", "0.9.0", &[]);
    let reconciler = reconciler(&cluster);
    let request = ReconcileRequest::new(ServiceKind::DataIndex, NAMESPACE, "data-index");
    reconciler.reconcile_request(&request).unwrap();

    let mut data_index = cluster.get::<KogitoDataIndex>(NAMESPACE, "data-index").unwrap();
    data_index.spec.service.replicas = Some(1);
    data_index.spec.service.infra.kafka = None;
    cluster.put(&data_index);

    cluster.reset_call_counts();
    let outcome = reconciler.reconcile_request(&request).unwrap();
    assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
    assert_eq!(1, cluster.call_count(Operation::Update, k8s_types::apps::v1::Deployment));
    assert_eq!(1, cluster.call_count(Operation::Update, k8s_types::core::v1::ConfigMap));

    let deployment = cluster.get::<Deployment>(NAMESPACE, "data-index").unwrap();
    assert_eq!(Some(1), deployment.spec.unwrap().replicas);
    let properties = cluster.get::<ConfigMap>(NAMESPACE, "data-index-properties").unwrap();
    assert!(!properties.data.unwrap()["application.properties"].contains("kafka"));

    data_index.spec.service.infra = Default::default();
    cluster.put(&data_index);
    reconciler.reconcile_request(&request).unwrap();
    let deployment = cluster.get::<Deployment>(NAMESPACE, "data-index").unwrap();
    let pod = deployment.spec.unwrap().template.spec.unwrap();
    assert!(pod.volumes.is_none());
    assert!(pod.containers[0].volume_mounts.is_none());
}

#[test]
fn deleted_resources_are_not_reconciled() {
    let cluster = setup();
    let reconciler = reconciler(&cluster);
    let request = ReconcileRequest::new(ServiceKind::Runtime, NAMESPACE, "gone");
    assert!(reconciler.reconcile_request(&request).is_none());

    let other_namespace = ReconcileRequest::new(ServiceKind::App, "elsewhere", "example");
    assert!(reconciler.reconcile_request(&other_namespace).is_none());
    assert_eq!(1, cluster.total_calls(Operation::Fetch));
}
