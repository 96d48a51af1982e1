//! QueuedExecutionService - single worker draining a FIFO of actions
//!
//! Actions are executed in submission order by one background task. A
//! synchronous path executes on the caller instead, after every queued
//! action has completed, so both paths observe a single order.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::time;
use tracing::{debug, error, info, instrument, warn};

use contracts::MetricsConfig;

use crate::error::DispatcherError;
use crate::metrics::{MetricsSnapshot, ServiceMetrics};

/// How long the idle worker waits on the channel before re-checking its exit condition
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle state
///
/// NEW -> STARTING -> RUNNING -> STOPPING -> TERMINATED, with FAILED
/// reachable from STARTING, RUNNING and STOPPING. No transition leaves
/// TERMINATED or FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    New,
    Starting,
    Running,
    Stopping,
    Terminated,
    Failed,
}

impl ServiceState {
    /// States in which submitted actions are accepted
    pub fn accepts_work(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    pub fn is_final(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "NEW",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Terminated => "TERMINATED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Where a submitted action runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Enqueued for the worker; the caller does not wait
    #[default]
    Queued,
    /// Executed on the caller once the queue has drained
    Synchronous,
}

impl ExecutionMode {
    pub fn from_config(config: &MetricsConfig) -> Self {
        if config.synchronous {
            Self::Synchronous
        } else {
            Self::Queued
        }
    }
}

/// What happens when an action returns an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Clear the queue and mark the service failed on the first error
    pub fail_on_error: bool,
    /// With `fail_on_error`: also move to FAILED and return the error
    pub verbose_errors: bool,
}

impl FailurePolicy {
    /// Log and continue
    pub fn lenient() -> Self {
        Self {
            fail_on_error: false,
            verbose_errors: false,
        }
    }

    /// Fail on first error and surface it
    pub fn strict() -> Self {
        Self {
            fail_on_error: true,
            verbose_errors: true,
        }
    }

    pub fn from_config(config: &MetricsConfig) -> Self {
        Self {
            fail_on_error: config.fail_on_error,
            verbose_errors: config.verbose_error_output,
        }
    }
}

/// Behaviour plugged into a [`QueuedExecutionService`]
///
/// `start_up` and `before_shut_down` run on the caller of
/// [`QueuedExecutionService::start`] / [`QueuedExecutionService::stop`] and
/// may use [`QueuedExecutionService::execute_synchronously`]. `post_shut_down`
/// runs on the worker once the queue is drained.
pub trait ServiceHooks: Sized + Send + Sync + 'static {
    type Action: fmt::Debug + Send + 'static;

    /// Name used in logs and metrics
    fn service_name(&self) -> &str;

    fn execute(
        &self,
        action: Self::Action,
    ) -> impl Future<Output = Result<(), DispatcherError>> + Send;

    /// Called for every queued action thrown away without running
    fn on_discard(&self, _action: Self::Action) {}

    fn start_up(
        &self,
        service: &QueuedExecutionService<Self>,
    ) -> impl Future<Output = Result<(), DispatcherError>> + Send {
        let _ = service;
        async { Ok(()) }
    }

    fn before_shut_down(
        &self,
        service: &QueuedExecutionService<Self>,
    ) -> impl Future<Output = Result<(), DispatcherError>> + Send {
        let _ = service;
        async { Ok(()) }
    }

    fn post_shut_down(&self) -> impl Future<Output = Result<(), DispatcherError>> + Send {
        async { Ok(()) }
    }
}

/// Handle to a queued execution service; clones share the same service
pub struct QueuedExecutionService<H: ServiceHooks> {
    inner: Arc<Inner<H>>,
}

impl<H: ServiceHooks> Clone for QueuedExecutionService<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<H: ServiceHooks> {
    hooks: H,
    policy: FailurePolicy,
    tx: mpsc::UnboundedSender<H::Action>,
    /// Held by the worker while it waits for work
    rx: AsyncMutex<mpsc::UnboundedReceiver<H::Action>>,
    /// Actions sitting in the channel
    depth: AtomicUsize,
    state: watch::Sender<ServiceState>,
    /// Actions queued but not yet finished, including the one in flight
    outstanding: watch::Sender<usize>,
    failed: AtomicBool,
    failure: Mutex<Option<String>>,
    shut_down_hook_done: AtomicBool,
    metrics: ServiceMetrics,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<H: ServiceHooks> QueuedExecutionService<H> {
    pub fn new(hooks: H, policy: FailurePolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                hooks,
                policy,
                tx,
                rx: AsyncMutex::new(rx),
                depth: AtomicUsize::new(0),
                state: watch::Sender::new(ServiceState::New),
                outstanding: watch::Sender::new(0),
                failed: AtomicBool::new(false),
                failure: Mutex::new(None),
                shut_down_hook_done: AtomicBool::new(false),
                metrics: ServiceMetrics::new(),
            }),
        }
    }

    pub fn hooks(&self) -> &H {
        &self.inner.hooks
    }

    pub fn name(&self) -> &str {
        self.inner.hooks.service_name()
    }

    pub fn policy(&self) -> FailurePolicy {
        self.inner.policy
    }

    pub fn state(&self) -> ServiceState {
        *self.inner.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    /// Whether an action failed under a fail-on-error policy
    pub fn has_failed(&self) -> bool {
        self.inner.failed.load(Ordering::SeqCst)
    }

    pub fn failure_cause(&self) -> Option<String> {
        lock(&self.inner.failure).clone()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.depth.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Enqueue an action for the worker
    ///
    /// Returns `false` when the action was dropped because the service is not
    /// in STARTING, RUNNING or STOPPING, or the worker has already exited.
    /// Never blocks.
    pub fn queue(&self, action: H::Action) -> bool {
        let state = self.state();
        if !state.accepts_work() {
            self.drop_action(state, &action);
            return false;
        }

        debug!(service = %self.name(), ?action, "Queueing action");
        self.inner.outstanding.send_modify(|n| *n += 1);
        let depth = self.inner.depth.fetch_add(1, Ordering::SeqCst) + 1;

        if let Err(mpsc::error::SendError(action)) = self.inner.tx.send(action) {
            self.inner.depth.fetch_sub(1, Ordering::SeqCst);
            self.settle(1);
            self.drop_action(self.state(), &action);
            return false;
        }

        self.inner.metrics.inc_queued_count();
        self.inner.metrics.set_queue_len(depth);
        observability::record_action_queued(self.name());
        observability::record_queue_depth(self.name(), depth);
        true
    }

    /// Execute an action on the caller
    ///
    /// Subject to the same state gate as [`queue`](Self::queue). Outside
    /// STARTING the call first waits until every queued action has finished.
    /// Must not be called from within an action. Returns `Ok(false)` when the
    /// action was dropped.
    pub async fn execute_synchronously(&self, action: H::Action) -> Result<bool, DispatcherError> {
        let state = self.state();
        if !state.accepts_work() {
            self.drop_action(state, &action);
            return Ok(false);
        }

        if state != ServiceState::Starting {
            self.await_queue_drained().await;
            let state = self.state();
            if !state.accepts_work() {
                self.drop_action(state, &action);
                return Ok(false);
            }
        }

        self.do_execute(action, false).await?;
        Ok(true)
    }

    /// Submit an action in the given mode
    pub async fn submit(&self, action: H::Action, mode: ExecutionMode) -> Result<bool, DispatcherError> {
        match mode {
            ExecutionMode::Queued => Ok(self.queue(action)),
            ExecutionMode::Synchronous => self.execute_synchronously(action).await,
        }
    }

    /// NEW -> STARTING -> RUNNING
    ///
    /// Runs the start-up hook on the caller before spawning the worker.
    /// A failing hook leaves the service FAILED.
    #[instrument(name = "service_start", skip(self), fields(service = %self.name()))]
    pub async fn start(&self) -> Result<(), DispatcherError> {
        let mut previous = ServiceState::New;
        let transitioned = self.inner.state.send_if_modified(|state| {
            previous = *state;
            if *state == ServiceState::New {
                *state = ServiceState::Starting;
                true
            } else {
                false
            }
        });
        if !transitioned {
            return Err(DispatcherError::illegal_state(ServiceState::New, previous));
        }

        if let Err(e) = self.inner.hooks.start_up(self).await {
            error!(service = %self.name(), error = %e, "Start-up hook failed");
            self.fail(e.to_string()).await;
            self.release().await;
            return Err(DispatcherError::StartUp(Box::new(e)));
        }

        if self.state() == ServiceState::Failed {
            self.release().await;
            return Err(self.failed_error());
        }

        tokio::spawn(self.clone().run());

        self.inner.state.send_if_modified(|state| {
            if *state == ServiceState::Starting {
                *state = ServiceState::Running;
                true
            } else {
                false
            }
        });
        info!(service = %self.name(), "Service running");
        Ok(())
    }

    /// RUNNING -> STOPPING
    ///
    /// Runs the before-shut-down hook on the caller, then lets the worker
    /// drain the queue and terminate. Observe termination through
    /// [`await_terminated`](Self::await_terminated). Stopping a NEW service
    /// terminates it directly; stopping a stopped or failed one is a no-op.
    #[instrument(name = "service_stop", skip(self), fields(service = %self.name()))]
    pub async fn stop(&self) -> Result<(), DispatcherError> {
        let mut previous = ServiceState::New;
        self.inner.state.send_if_modified(|state| {
            previous = *state;
            match *state {
                ServiceState::New => {
                    *state = ServiceState::Terminated;
                    true
                }
                ServiceState::Running => {
                    *state = ServiceState::Stopping;
                    true
                }
                _ => false,
            }
        });

        match previous {
            ServiceState::New => {
                debug!(service = %self.name(), "Service stopped before it was started");
                Ok(())
            }
            ServiceState::Stopping | ServiceState::Terminated | ServiceState::Failed => Ok(()),
            ServiceState::Starting => Err(DispatcherError::illegal_state(
                ServiceState::Running,
                previous,
            )),
            ServiceState::Running => {
                debug!(service = %self.name(), queued = self.queue_len(), "Shutting down, draining queue");

                let result = self.inner.hooks.before_shut_down(self).await;
                if let Err(e) = &result {
                    error!(service = %self.name(), error = %e, "Before-shut-down hook failed, discarding queue");
                    let cleared = self.clear_queue().await;
                    self.record_dropped("cleared", cleared);
                }

                self.inner.shut_down_hook_done.store(true, Ordering::SeqCst);
                result
            }
        }
    }

    /// Wait until the service leaves NEW/STARTING
    ///
    /// Fails if the service does not end up RUNNING.
    pub async fn await_running(&self, timeout: Duration) -> Result<(), DispatcherError> {
        let state = self
            .await_state(timeout, ServiceState::Running, |s| {
                !matches!(s, ServiceState::New | ServiceState::Starting)
            })
            .await?;
        match state {
            ServiceState::Running => Ok(()),
            ServiceState::Failed => Err(self.failed_error()),
            other => Err(DispatcherError::illegal_state(ServiceState::Running, other)),
        }
    }

    /// Wait until the service reaches TERMINATED or FAILED
    pub async fn await_terminated(&self, timeout: Duration) -> Result<(), DispatcherError> {
        let state = self
            .await_state(timeout, ServiceState::Terminated, |s| s.is_final())
            .await?;
        match state {
            ServiceState::Terminated => Ok(()),
            _ => Err(self.failed_error()),
        }
    }

    async fn await_state(
        &self,
        timeout: Duration,
        target: ServiceState,
        reached: impl FnMut(&ServiceState) -> bool,
    ) -> Result<ServiceState, DispatcherError> {
        let mut rx = self.inner.state.subscribe();
        let waited = time::timeout(timeout, rx.wait_for(reached)).await;
        match waited {
            Ok(Ok(state)) => Ok(*state),
            Ok(Err(_)) => Ok(self.state()),
            Err(_) => Err(DispatcherError::Timeout { target, timeout }),
        }
    }

    /// Worker loop
    async fn run(self) {
        debug!(service = %self.name(), "Worker started");

        loop {
            if self.state() == ServiceState::Failed || self.drained() {
                break;
            }

            let next = {
                let mut rx = self.inner.rx.lock().await;
                time::timeout(POLL_INTERVAL, rx.recv()).await
            };
            match next {
                Ok(Some(action)) => self.run_queued(action).await,
                Ok(None) => break,
                Err(_) => {}
            }
        }

        // Refuse new sends, then settle whatever got in before the close
        let leftovers: Vec<H::Action> = {
            let mut rx = self.inner.rx.lock().await;
            rx.close();
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        for action in leftovers {
            if self.state() == ServiceState::Failed {
                self.dequeued();
                self.discard(action);
                self.record_dropped("cleared", 1);
                self.settle(1);
            } else {
                self.run_queued(action).await;
            }
        }

        self.release().await;

        let terminated = self.inner.state.send_if_modified(|state| {
            if *state == ServiceState::Stopping {
                *state = ServiceState::Terminated;
                true
            } else {
                false
            }
        });
        if terminated {
            info!(service = %self.name(), "Service terminated");
        } else {
            warn!(service = %self.name(), state = %self.state(), "Worker exited without termination");
        }
    }

    async fn run_queued(&self, action: H::Action) {
        self.dequeued();
        if let Err(e) = self.do_execute(action, true).await {
            debug!(service = %self.name(), error = %e, "Queued action failed");
        }
        self.settle(1);
    }

    /// Stopping, hook finished, nothing left to run
    fn drained(&self) -> bool {
        self.state() == ServiceState::Stopping
            && self.inner.shut_down_hook_done.load(Ordering::SeqCst)
            && self.queue_len() == 0
    }

    /// Execute one action under the failure policy
    ///
    /// With `fail_on_error` the first error discards the queue and marks the
    /// service failed. Only `verbose_errors` also moves it to FAILED and
    /// returns the error; otherwise it keeps running so the shut-down hooks
    /// still get their turn.
    async fn do_execute(&self, action: H::Action, queued: bool) -> Result<(), DispatcherError> {
        debug!(service = %self.name(), ?action, "Executing action");
        let started = Instant::now();
        let result = self.inner.hooks.execute(action).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let e = match result {
            Ok(()) => {
                self.inner.metrics.record_executed(elapsed_ms);
                observability::record_action_executed(self.name(), queued, elapsed_ms);
                return Ok(());
            }
            Err(e) => e,
        };

        self.inner.metrics.inc_failure_count();
        observability::record_action_failed(self.name());

        if !self.inner.policy.fail_on_error {
            warn!(service = %self.name(), error = %e, "Error executing action");
            return Ok(());
        }

        if self.inner.policy.verbose_errors {
            error!(service = %self.name(), error = %e, "Error executing action, shutting down due to failure");
            self.fail(e.to_string()).await;
            return Err(e);
        }

        error!(service = %self.name(), error = %e, "Error executing action, discarding queued actions");
        let cleared = self.clear_queue().await;
        self.record_dropped("cleared", cleared);
        self.mark_failed(e.to_string());
        Ok(())
    }

    /// Clear the queue, record the cause and move to FAILED
    async fn fail(&self, cause: String) {
        let cleared = self.clear_queue().await;
        self.record_dropped("cleared", cleared);
        self.mark_failed(cause);
        self.inner.state.send_if_modified(|state| {
            if state.accepts_work() {
                *state = ServiceState::Failed;
                true
            } else {
                false
            }
        });
    }

    fn mark_failed(&self, cause: String) {
        lock(&self.inner.failure).get_or_insert(cause);
        self.inner.failed.store(true, Ordering::SeqCst);
    }

    async fn clear_queue(&self) -> usize {
        let mut count = 0;
        {
            let mut rx = self.inner.rx.lock().await;
            while let Ok(action) = rx.try_recv() {
                self.dequeued();
                self.discard(action);
                count += 1;
            }
        }
        if count > 0 {
            debug!(service = %self.name(), count, "Discarding queued actions");
            self.settle(count);
        }
        count
    }

    fn discard(&self, action: H::Action) {
        debug!(service = %self.name(), ?action, "Discarding action");
        self.inner.hooks.on_discard(action);
    }

    /// An action left the channel
    fn dequeued(&self) {
        let depth = self
            .inner
            .depth
            .fetch_sub(1, Ordering::SeqCst)
            .saturating_sub(1);
        self.inner.metrics.set_queue_len(depth);
        observability::record_queue_depth(self.name(), depth);
    }

    /// `count` outstanding actions are finished or gone
    fn settle(&self, count: usize) {
        self.inner
            .outstanding
            .send_modify(|n| *n = n.saturating_sub(count));
    }

    fn drop_action(&self, state: ServiceState, action: &H::Action) {
        debug!(service = %self.name(), %state, ?action, "Service is not running, dropping action");
        self.record_dropped("state", 1);
    }

    fn record_dropped(&self, reason: &'static str, count: usize) {
        if count > 0 {
            self.inner.metrics.add_dropped_count(count);
            observability::record_actions_dropped(self.name(), reason, count);
        }
    }

    async fn await_queue_drained(&self) {
        let mut rx = self.inner.outstanding.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Run the post-shut-down hook; errors are logged
    async fn release(&self) {
        if let Err(e) = self.inner.hooks.post_shut_down().await {
            error!(service = %self.name(), error = %e, "Post-shut-down hook failed");
        }
    }

    fn failed_error(&self) -> DispatcherError {
        DispatcherError::Failed {
            cause: self
                .failure_cause()
                .unwrap_or_else(|| "unknown failure".to_string()),
        }
    }
}

impl<H: ServiceHooks> fmt::Debug for QueuedExecutionService<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedExecutionService")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("queue_len", &self.queue_len())
            .field("failed", &self.has_failed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ContractError;
    use std::collections::HashSet;
    use tokio::sync::Semaphore;

    const WAIT: Duration = Duration::from_secs(5);

    /// Records actions; action 1 optionally blocks on a gate
    #[derive(Default)]
    struct Recorder {
        attempted: Mutex<Vec<u32>>,
        executed: Mutex<Vec<u32>>,
        discarded: Mutex<Vec<u32>>,
        fail_on: HashSet<u32>,
        gate: Option<Arc<Semaphore>>,
        fail_start: bool,
        sync_on_start: bool,
        flush_on_shut_down: bool,
        released: AtomicBool,
    }

    impl Recorder {
        fn executed(&self) -> Vec<u32> {
            lock(&self.executed).clone()
        }
    }

    impl ServiceHooks for Recorder {
        type Action = u32;

        fn service_name(&self) -> &str {
            "recorder"
        }

        async fn execute(&self, action: u32) -> Result<(), DispatcherError> {
            if action == 1 {
                if let Some(gate) = &self.gate {
                    gate.acquire().await.map(|permit| permit.forget()).ok();
                }
            }
            lock(&self.attempted).push(action);
            if self.fail_on.contains(&action) {
                return Err(ContractError::sink_request("recorder", format!("action {action}")).into());
            }
            // Later actions finish faster than earlier ones
            time::sleep(Duration::from_millis(u64::from(10_u32.saturating_sub(action)))).await;
            lock(&self.executed).push(action);
            Ok(())
        }

        fn on_discard(&self, action: u32) {
            lock(&self.discarded).push(action);
        }

        async fn start_up(&self, service: &QueuedExecutionService<Self>) -> Result<(), DispatcherError> {
            if self.fail_start {
                return Err(ContractError::sink_connection("recorder", "unreachable").into());
            }
            if self.sync_on_start {
                service.execute_synchronously(0).await?;
            }
            Ok(())
        }

        async fn before_shut_down(&self, service: &QueuedExecutionService<Self>) -> Result<(), DispatcherError> {
            if self.flush_on_shut_down {
                service.execute_synchronously(99).await?;
            }
            Ok(())
        }

        async fn post_shut_down(&self) -> Result<(), DispatcherError> {
            self.released.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn gated(recorder: Recorder, policy: FailurePolicy) -> (QueuedExecutionService<Recorder>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let hooks = Recorder {
            gate: Some(Arc::clone(&gate)),
            ..recorder
        };
        (QueuedExecutionService::new(hooks, policy), gate)
    }

    #[tokio::test]
    async fn test_actions_execute_in_submission_order() {
        let service = QueuedExecutionService::new(Recorder::default(), FailurePolicy::lenient());
        service.start().await.unwrap();

        for action in 1..=8 {
            assert!(service.queue(action));
        }
        service.stop().await.unwrap();
        service.await_terminated(WAIT).await.unwrap();

        assert_eq!(service.hooks().executed(), (1..=8).collect::<Vec<_>>());
        assert_eq!(service.state(), ServiceState::Terminated);
        assert!(service.hooks().released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stop_drains_queue_including_late_submissions() {
        let (service, gate) = gated(Recorder::default(), FailurePolicy::lenient());
        service.start().await.unwrap();

        for action in 1..=5 {
            service.queue(action);
        }
        service.stop().await.unwrap();
        assert_eq!(service.state(), ServiceState::Stopping);

        // Still accepted while draining
        assert!(service.queue(6));
        gate.add_permits(1);

        service.await_terminated(WAIT).await.unwrap();
        assert_eq!(service.hooks().executed(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_shut_down_flush_runs_after_queued_actions() {
        let (service, gate) = gated(
            Recorder {
                flush_on_shut_down: true,
                ..Recorder::default()
            },
            FailurePolicy::strict(),
        );
        service.start().await.unwrap();
        for action in 1..=3 {
            service.queue(action);
        }

        let stopper = service.clone();
        let stop = tokio::spawn(async move { stopper.stop().await });
        time::sleep(Duration::from_millis(50)).await;
        assert!(!stop.is_finished(), "flush must wait for the queue");

        gate.add_permits(1);
        stop.await.unwrap().unwrap();
        service.await_terminated(WAIT).await.unwrap();

        assert_eq!(service.hooks().executed(), vec![1, 2, 3, 99]);
    }

    #[tokio::test]
    async fn test_queue_drops_outside_accepting_states() {
        let service = QueuedExecutionService::new(Recorder::default(), FailurePolicy::strict());
        assert!(!service.queue(1));
        assert!(!service.execute_synchronously(2).await.unwrap());

        service.start().await.unwrap();
        service.stop().await.unwrap();
        service.await_terminated(WAIT).await.unwrap();

        assert!(!service.queue(3));
        assert!(service.hooks().executed().is_empty());
        assert_eq!(service.metrics().dropped_count, 3);
    }

    #[tokio::test]
    async fn test_synchronous_execution_during_start_up() {
        let service = QueuedExecutionService::new(
            Recorder {
                sync_on_start: true,
                ..Recorder::default()
            },
            FailurePolicy::strict(),
        );
        service.start().await.unwrap();
        service.await_running(WAIT).await.unwrap();
        assert_eq!(service.hooks().executed(), vec![0]);

        service.stop().await.unwrap();
        service.await_terminated(WAIT).await.unwrap();
    }

    #[tokio::test]
    async fn test_lenient_policy_continues_after_failure() {
        let (service, gate) = gated(
            Recorder {
                fail_on: HashSet::from([2]),
                ..Recorder::default()
            },
            FailurePolicy::lenient(),
        );
        service.start().await.unwrap();
        for action in 1..=3 {
            service.queue(action);
        }
        gate.add_permits(1);

        service.stop().await.unwrap();
        service.await_terminated(WAIT).await.unwrap();

        assert_eq!(service.hooks().executed(), vec![1, 3]);
        assert!(!service.has_failed());
        assert_eq!(service.metrics().failure_count, 1);
    }

    #[tokio::test]
    async fn test_strict_policy_clears_queue_and_fails() {
        let (service, gate) = gated(
            Recorder {
                fail_on: HashSet::from([2]),
                ..Recorder::default()
            },
            FailurePolicy::strict(),
        );
        service.start().await.unwrap();
        for action in 1..=3 {
            service.queue(action);
        }
        gate.add_permits(1);

        let result = service.await_terminated(WAIT).await;
        assert!(matches!(result, Err(DispatcherError::Failed { .. })));
        assert_eq!(service.state(), ServiceState::Failed);
        assert!(service.has_failed());
        assert_eq!(*lock(&service.hooks().attempted), vec![1, 2]);
        assert_eq!(service.hooks().executed(), vec![1]);
        assert_eq!(*lock(&service.hooks().discarded), vec![3]);
        assert!(service.failure_cause().unwrap().contains("action 2"));

        // Absorbing
        assert!(!service.queue(4));
        assert!(service.stop().await.is_ok());
        assert_eq!(service.state(), ServiceState::Failed);
    }

    #[tokio::test]
    async fn test_quiet_fail_on_error_keeps_running_for_shut_down() {
        let (service, gate) = gated(
            Recorder {
                fail_on: HashSet::from([2]),
                flush_on_shut_down: true,
                ..Recorder::default()
            },
            FailurePolicy {
                fail_on_error: true,
                verbose_errors: false,
            },
        );
        service.start().await.unwrap();
        for action in 1..=3 {
            service.queue(action);
        }
        gate.add_permits(1);

        service.stop().await.unwrap();
        service.await_terminated(WAIT).await.unwrap();

        assert!(service.has_failed());
        assert_eq!(service.state(), ServiceState::Terminated);
        assert_eq!(*lock(&service.hooks().attempted), vec![1, 2, 99]);
        assert_eq!(service.hooks().executed(), vec![1, 99]);
        assert_eq!(*lock(&service.hooks().discarded), vec![3]);
        assert_eq!(service.metrics().dropped_count, 1);
        assert!(service.hooks().released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_quiet_fail_on_error_synchronous_returns_ok() {
        let service = QueuedExecutionService::new(
            Recorder {
                fail_on: HashSet::from([7]),
                ..Recorder::default()
            },
            FailurePolicy {
                fail_on_error: true,
                verbose_errors: false,
            },
        );
        service.start().await.unwrap();

        assert!(service.submit(7, ExecutionMode::Synchronous).await.unwrap());
        assert!(service.has_failed());
        assert!(service.is_running());
        assert!(service.queue(8));

        service.stop().await.unwrap();
        service.await_terminated(WAIT).await.unwrap();
        assert_eq!(service.hooks().executed(), vec![8]);
    }

    #[tokio::test]
    async fn test_queue_is_rejected_once_the_channel_is_closed() {
        let service = QueuedExecutionService::new(Recorder::default(), FailurePolicy::lenient());
        service.start().await.unwrap();
        service.inner.rx.lock().await.close();

        assert!(!service.queue(1));
        assert_eq!(*service.inner.outstanding.borrow(), 0);
        assert_eq!(service.queue_len(), 0);
        assert_eq!(service.metrics().dropped_count, 1);

        // Nothing left outstanding, so the synchronous path does not wait
        let sync = time::timeout(WAIT, service.execute_synchronously(2)).await;
        assert!(sync.unwrap().unwrap());
        assert_eq!(service.hooks().executed(), vec![2]);
    }

    #[tokio::test]
    async fn test_every_accepted_action_runs_while_stopping() {
        let service = QueuedExecutionService::new(Recorder::default(), FailurePolicy::lenient());
        service.start().await.unwrap();

        let producer = service.clone();
        let producer = tokio::spawn(async move {
            let mut accepted = 0;
            for action in 10..200 {
                if producer.queue(action) {
                    accepted += 1;
                }
                tokio::task::yield_now().await;
            }
            accepted
        });

        service.stop().await.unwrap();
        service.await_terminated(WAIT).await.unwrap();
        let accepted = producer.await.unwrap();

        assert_eq!(service.hooks().executed().len(), accepted);
        assert_eq!(*service.inner.outstanding.borrow(), 0);
        assert_eq!(service.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_strict_synchronous_failure_surfaces_to_caller() {
        let service = QueuedExecutionService::new(
            Recorder {
                fail_on: HashSet::from([7]),
                ..Recorder::default()
            },
            FailurePolicy::strict(),
        );
        service.start().await.unwrap();

        let result = service.submit(7, ExecutionMode::Synchronous).await;
        assert!(result.is_err());
        assert_eq!(service.state(), ServiceState::Failed);
    }

    #[tokio::test]
    async fn test_start_up_failure_enters_failed() {
        let service = QueuedExecutionService::new(
            Recorder {
                fail_start: true,
                ..Recorder::default()
            },
            FailurePolicy::lenient(),
        );

        let result = service.start().await;
        assert!(matches!(result, Err(DispatcherError::StartUp(_))));
        assert_eq!(service.state(), ServiceState::Failed);
        assert!(matches!(
            service.await_running(WAIT).await,
            Err(DispatcherError::Failed { .. })
        ));
        assert!(service.hooks().released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let service = QueuedExecutionService::new(Recorder::default(), FailurePolicy::lenient());
        service.start().await.unwrap();
        assert!(matches!(
            service.start().await,
            Err(DispatcherError::IllegalState { .. })
        ));

        service.stop().await.unwrap();
        service.await_terminated(WAIT).await.unwrap();
        assert!(service.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_before_start_terminates() {
        let service = QueuedExecutionService::new(Recorder::default(), FailurePolicy::lenient());
        service.stop().await.unwrap();
        assert_eq!(service.state(), ServiceState::Terminated);
        service.await_terminated(Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_await_running_times_out() {
        let service = QueuedExecutionService::new(Recorder::default(), FailurePolicy::lenient());
        let result = service.await_running(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(DispatcherError::Timeout { .. })));
    }
}
