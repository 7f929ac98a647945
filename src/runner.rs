//! Drives reconciliation passes from a stream of requests. The runner is the only place where anything
//! runs concurrently: a single task owns the queue, each pass runs on the blocking pool, and at most one
//! pass per custom resource is in flight at any time. Requests that arrive for a custom resource whose
//! pass is still running are coalesced into a single follow up pass.
use crate::reconcile::{ReconcileRequest, Reconciler};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use std::collections::HashSet;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Anything that can run a pass for a request. Returns how long to wait before the next pass, if
/// another pass is needed even without a new request.
pub trait Reconcile: Send + Sync + 'static {
    fn reconcile(&self, request: &ReconcileRequest) -> Option<Duration>;
}

impl Reconcile for Reconciler {
    fn reconcile(&self, request: &ReconcileRequest) -> Option<Duration> {
        self.reconcile_request(request)
            .and_then(|outcome| outcome.requeue_after)
    }
}

#[derive(Debug)]
enum Message {
    Request(ReconcileRequest),
    Finished {
        request: ReconcileRequest,
        requeue_after: Option<Duration>,
    },
    Shutdown,
}

#[derive(Debug)]
pub struct RunnerStoppedError;

impl Display for RunnerStoppedError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("the runner has stopped")
    }
}

impl std::error::Error for RunnerStoppedError {}

/// A handle to a running runner. Dropping it does not stop the runner, `shutdown` does.
#[derive(Debug)]
pub struct RunnerHandle {
    sender: UnboundedSender<Message>,
    task: JoinHandle<()>,
}

impl RunnerHandle {
    pub fn enqueue(&self, request: ReconcileRequest) -> Result<(), RunnerStoppedError> {
        self.sender
            .send(Message::Request(request))
            .map_err(|_| RunnerStoppedError)
    }

    /// A sender that can be handed to whatever watches the custom resources
    pub fn requester(&self) -> Requester {
        Requester {
            sender: self.sender.clone(),
        }
    }

    /// Stops accepting requests and waits for the runner task to exit. Passes that already started
    /// run to completion on the blocking pool.
    pub async fn shutdown(self) {
        let _ = self.sender.send(Message::Shutdown);
        if let Err(e) = self.task.await {
            log::error!("Runner task failed: {}", e);
        }
    }
}

/// Cloneable sender of reconcile requests
#[derive(Debug, Clone)]
pub struct Requester {
    sender: UnboundedSender<Message>,
}

impl Requester {
    pub fn enqueue(&self, request: ReconcileRequest) -> Result<(), RunnerStoppedError> {
        self.sender
            .send(Message::Request(request))
            .map_err(|_| RunnerStoppedError)
    }
}

/// Starts the runner on the current tokio runtime. At most `max_concurrent_passes` passes run at the
/// same time.
pub fn start<R: Reconcile>(reconciler: Arc<R>, max_concurrent_passes: usize) -> RunnerHandle {
    let (sender, receiver) = unbounded_channel();
    let state = RunnerState {
        reconciler,
        sender: sender.clone(),
        permits: Arc::new(Semaphore::new(max_concurrent_passes.max(1))),
        in_flight: HashSet::new(),
        follow_ups: HashSet::new(),
    };
    let task = tokio::spawn(state.run(receiver));
    RunnerHandle { sender, task }
}

/// Starts a runner for the given reconciler, using the concurrency limit from its configuration
pub fn start_reconciler(reconciler: Reconciler) -> RunnerHandle {
    let max = reconciler.config().max_concurrent_passes;
    start(Arc::new(reconciler), max)
}

struct RunnerState<R: Reconcile> {
    reconciler: Arc<R>,
    sender: UnboundedSender<Message>,
    permits: Arc<Semaphore>,
    in_flight: HashSet<ReconcileRequest>,
    follow_ups: HashSet<ReconcileRequest>,
}

impl<R: Reconcile> RunnerState<R> {
    async fn run(mut self, mut receiver: UnboundedReceiver<Message>) {
        log::info!("Starting reconciliation runner");
        while let Some(message) = receiver.recv().await {
            log::trace!("Received: {:?}", message);
            match message {
                Message::Request(request) => self.request_received(request),
                Message::Finished {
                    request,
                    requeue_after,
                } => self.pass_finished(request, requeue_after),
                Message::Shutdown => break,
            }
        }
        log::info!(
            "Shutting down reconciliation runner with {} passes in flight",
            self.in_flight.len()
        );
    }

    fn request_received(&mut self, request: ReconcileRequest) {
        if self.in_flight.contains(&request) {
            if self.follow_ups.insert(request.clone()) {
                log::debug!("Pass for {} is in flight, a follow up pass is queued", request);
            }
            return;
        }
        self.start_pass(request);
    }

    fn pass_finished(&mut self, request: ReconcileRequest, requeue_after: Option<Duration>) {
        self.in_flight.remove(&request);
        if self.follow_ups.remove(&request) {
            log::debug!("Starting follow up pass for {}", request);
            self.start_pass(request);
        } else if let Some(delay) = requeue_after {
            self.schedule_requeue(request, delay);
        }
    }

    fn start_pass(&mut self, request: ReconcileRequest) {
        self.in_flight.insert(request.clone());
        let reconciler = self.reconciler.clone();
        let permits = self.permits.clone();
        let sender = self.sender.clone();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let start_time = Instant::now();
            let pass_request = request.clone();
            let result =
                tokio::task::spawn_blocking(move || reconciler.reconcile(&pass_request)).await;
            let requeue_after = match result {
                Ok(requeue_after) => requeue_after,
                Err(e) => {
                    log::error!("Pass for {} did not complete: {}", request, e);
                    None
                }
            };
            log::debug!(
                "Pass for {} took {}ms, requeue after: {:?}",
                request,
                start_time.elapsed().as_millis(),
                requeue_after
            );
            let message = Message::Finished {
                request,
                requeue_after,
            };
            if sender.send(message).is_err() {
                log::debug!("Runner stopped before a pass finished");
            }
        });
    }

    fn schedule_requeue(&self, request: ReconcileRequest, delay: Duration) {
        log::trace!("Scheduling {} to run again in {:?}", request, delay);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(Message::Request(request)).is_err() {
                log::debug!("Runner stopped before a requeue was due");
            }
        });
    }
}
