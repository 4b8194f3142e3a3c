//! Runtime: per-instance replay passes, activity dispatch, rehydration.
//!
//! Ownership model: exactly one replay pass per instance at a time (guarded
//! by a per-instance lock), so history appends for schedules and terminal
//! events have a single writer. Activity completions are appended from
//! dispatcher tasks; the store's idempotent append makes at-least-once
//! delivery safe.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use crate::history::{Event, HistoryReader};
use crate::providers::{HistoryStore, InMemoryHistoryStore, StorageError};
use crate::{run_turn, Action};

pub mod registry;
pub mod status;

pub use registry::{ActivityRegistry, WorkflowRegistry};
pub use status::{WaitError, WorkflowStatus};

/// Bounded attempts for appends issued under the instance lock. Exhaustion
/// fails the pass loudly; the instance stays re-drivable.
const APPEND_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Global cap on concurrently running activity invocations.
    pub max_concurrent_activities: usize,
    /// Poll interval of `wait_for_workflow`.
    pub wait_poll_interval: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_concurrent_activities: 64,
            wait_poll_interval: Duration::from_millis(25),
        }
    }
}

pub struct Runtime {
    store: Arc<dyn HistoryStore>,
    activities: ActivityRegistry,
    workflows: WorkflowRegistry,
    options: RuntimeOptions,
    instance_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Tasks currently handed to the dispatcher, keyed by (instance, task id).
    /// Prevents double dispatch when several passes observe the same
    /// unresolved task.
    in_flight: Mutex<HashSet<(String, u64)>>,
    permits: Arc<Semaphore>,
}

impl Runtime {
    /// Start with the default in-memory store.
    pub async fn start(activities: ActivityRegistry, workflows: WorkflowRegistry) -> Arc<Self> {
        Self::start_with_store(Arc::new(InMemoryHistoryStore::new()), activities, workflows).await
    }

    pub async fn start_with_store(
        store: Arc<dyn HistoryStore>,
        activities: ActivityRegistry,
        workflows: WorkflowRegistry,
    ) -> Arc<Self> {
        Self::start_with_options(store, activities, workflows, RuntimeOptions::default()).await
    }

    pub async fn start_with_options(
        store: Arc<dyn HistoryStore>,
        activities: ActivityRegistry,
        workflows: WorkflowRegistry,
        options: RuntimeOptions,
    ) -> Arc<Self> {
        // Best effort; the host may have installed its own subscriber.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let runtime = Arc::new(Self {
            store,
            activities,
            workflows,
            permits: Arc::new(Semaphore::new(options.max_concurrent_activities)),
            options,
            instance_locks: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        });
        runtime.rehydrate().await;
        runtime
    }

    pub fn store(&self) -> Arc<dyn HistoryStore> {
        self.store.clone()
    }

    /// Resume every non-terminal instance found in the store. The replay
    /// pass re-dispatches only tasks without a recorded completion, so work
    /// finished before the crash is not repeated.
    async fn rehydrate(self: &Arc<Self>) {
        for instance in self.store.list_instances().await {
            let history = self.store.read(&instance).await;
            if history.is_empty() || HistoryReader::from_history(&history).is_terminal {
                continue;
            }
            info!(instance = %instance, "rehydrating instance");
            let rt = self.clone();
            tokio::spawn(async move { rt.run_instance_once(&instance).await });
        }
    }

    async fn instance_lock(&self, instance: &str) -> Arc<Mutex<()>> {
        let mut locks = self.instance_locks.lock().await;
        locks
            .entry(instance.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Record the start event for a freshly created instance and kick off
    /// its first replay pass. The caller (client) has already created the
    /// instance in the store.
    pub(crate) async fn activate(
        self: &Arc<Self>,
        instance: &str,
        workflow: &str,
        input: &str,
    ) -> Result<(), StorageError> {
        let started = Event::WorkflowStarted {
            name: workflow.to_string(),
            input: input.to_string(),
            started_at_ms: now_ms(),
        };
        if let Err(e) = self
            .append_with_retry(instance, vec![started], Some(APPEND_ATTEMPTS))
            .await
        {
            // The id is already reserved in the store. Mark it terminal so
            // it cannot read as Running forever with nothing driving it.
            error!(instance = %instance, workflow = %workflow, error = %e, "failed to record workflow start");
            self.finish(instance, Err(format!("failed to record workflow start: {e}")))
                .await;
            return Err(e);
        }
        let rt = self.clone();
        let instance = instance.to_string();
        tokio::spawn(async move { rt.run_instance_once(&instance).await });
        Ok(())
    }

    /// Append with exponential backoff on retryable errors. `max_attempts`
    /// of `None` retries forever; used for completions, whose loss would
    /// leave the instance hung.
    async fn append_with_retry(
        &self,
        instance: &str,
        events: Vec<Event>,
        max_attempts: Option<u32>,
    ) -> Result<(), StorageError> {
        let mut attempts: u32 = 0;
        loop {
            match self.store.append(instance, events.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && max_attempts.map_or(true, |max| attempts + 1 < max) => {
                    let delay = Duration::from_millis(10) * 2u32.pow(attempts.min(6));
                    warn!(instance = %instance, error = %e, attempt = attempts, "append failed, retrying");
                    attempts += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One replay pass: replay the workflow against current history, persist
    /// new schedules, dispatch unresolved tasks, finish if the turn produced
    /// output.
    ///
    /// Boxed return: the completion path (`spawn_task` → `on_task_outcome`)
    /// recurses back into this function, and the cycle needs an erased
    /// future type to stay `Send`.
    fn run_instance_once<'a>(
        self: &'a Arc<Self>,
        instance: &'a str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let lock = self.instance_lock(instance).await;
            let _guard = lock.lock().await;

            let history = self.store.read(instance).await;
            if history.is_empty() {
                debug!(instance = %instance, "no history yet, skipping pass");
                return;
            }
            let reader = HistoryReader::from_history(&history);
            if reader.is_terminal {
                return;
            }
            let (name, input) = match (reader.workflow_name, reader.input) {
                (Some(n), Some(i)) => (n, i),
                _ => {
                    self.finish(instance, Err("history has no start event".to_string()))
                        .await;
                    return;
                }
            };
            let handler = match self.workflows.get(&name) {
                Some(h) => h,
                None => {
                    error!(instance = %instance, workflow = %name, "unregistered workflow");
                    self.finish(instance, Err(format!("unregistered workflow: {name}")))
                        .await;
                    return;
                }
            };

            let turn = run_turn(instance, history, move |ctx| {
                let handler = handler.clone();
                let input = input.clone();
                async move { handler.invoke(ctx, input).await }
            });

            if let Some(detail) = turn.nondeterminism {
                error!(instance = %instance, workflow = %name, %detail, "determinism violation");
                self.finish(instance, Err(format!("determinism violation: {detail}")))
                    .await;
                return;
            }

            if !turn.actions.is_empty() {
                let scheduled: Vec<Event> = turn
                    .actions
                    .iter()
                    .map(|Action::ScheduleActivity { id, name, input }| Event::TaskScheduled {
                        id: *id,
                        name: name.clone(),
                        input: input.clone(),
                    })
                    .collect();
                if let Err(e) = self
                    .append_with_retry(instance, scheduled, Some(APPEND_ATTEMPTS))
                    .await
                {
                    error!(instance = %instance, error = %e, "failed to persist scheduled tasks");
                    self.finish(instance, Err(format!("storage failure: {e}"))).await;
                    return;
                }
            }

            if let Some(output) = turn.output {
                self.finish(instance, output).await;
                return;
            }

            // Re-read: the appended schedules are part of the unresolved set.
            let history = self.store.read(instance).await;
            let pending = HistoryReader::unresolved_tasks(&history);
            if pending.is_empty() {
                error!(instance = %instance, workflow = %name, "workflow suspended on a non-durable future");
                self.finish(
                    instance,
                    Err("determinism violation: workflow suspended on a non-durable future".to_string()),
                )
                .await;
                return;
            }
            for (id, name, input) in pending {
                let key = (instance.to_string(), id);
                {
                    let mut in_flight = self.in_flight.lock().await;
                    if !in_flight.insert(key) {
                        continue;
                    }
                }
                let rt = self.clone();
                let instance = instance.to_string();
                tokio::spawn(async move { rt.spawn_task(instance, id, name, input).await });
            }
        })
    }

    /// Run one activity invocation and feed its outcome back as a
    /// completion event plus another replay pass.
    async fn spawn_task(self: Arc<Self>, instance: String, id: u64, name: String, input: String) {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(p) => p,
            // Semaphore closed only on shutdown.
            Err(_) => return,
        };
        let outcome = match self.activities.get(&name) {
            Some(handler) => {
                debug!(instance = %instance, task_id = id, activity = %name, "invoking activity");
                // Nested spawn so a panicking handler is contained as a
                // JoinError instead of unwinding the dispatcher.
                match tokio::spawn(async move { handler.invoke(input).await }).await {
                    Ok(result) => result,
                    Err(join_err) if join_err.is_panic() => {
                        Err(format!("activity panicked: {join_err}"))
                    }
                    Err(join_err) => Err(format!("activity cancelled: {join_err}")),
                }
            }
            None => {
                warn!(instance = %instance, task_id = id, activity = %name, "unregistered activity");
                Err(format!("unregistered activity: {name}"))
            }
        };
        drop(permit);
        self.on_task_outcome(&instance, id, outcome).await;
    }

    async fn on_task_outcome(self: &Arc<Self>, instance: &str, id: u64, outcome: Result<String, String>) {
        self.in_flight
            .lock()
            .await
            .remove(&(instance.to_string(), id));

        // The terminal check and the completion append must be one atomic
        // step under the instance lock, or a concurrent terminate could land
        // its terminal event between them and the completion would follow it
        // in the log. Released before the next pass, which takes it again.
        let lock = self.instance_lock(instance).await;
        {
            let _guard = lock.lock().await;
            let history = self.store.read(instance).await;
            if HistoryReader::from_history(&history).is_terminal {
                debug!(instance = %instance, task_id = id, "dropping completion for terminal instance");
                return;
            }
            let completion = match outcome {
                Ok(result) => Event::TaskCompleted { id, result },
                Err(error) => Event::TaskFailed { id, error },
            };
            // Unbounded retry: losing a completion would hang the instance.
            if let Err(e) = self.append_with_retry(instance, vec![completion], None).await {
                error!(instance = %instance, task_id = id, error = %e, "completion append failed permanently");
                return;
            }
        }
        self.run_instance_once(instance).await;
    }

    /// Write the terminal event for a finished or failed workflow.
    async fn finish(&self, instance: &str, output: Result<String, String>) {
        let event = match output {
            Ok(output) => {
                info!(instance = %instance, "workflow completed");
                Event::WorkflowCompleted { output }
            }
            Err(error) => {
                warn!(instance = %instance, error = %error, "workflow failed");
                Event::WorkflowFailed { error }
            }
        };
        if let Err(e) = self
            .append_with_retry(instance, vec![event], Some(APPEND_ATTEMPTS))
            .await
        {
            error!(instance = %instance, error = %e, "failed to persist terminal event");
        }
    }

    /// Cancel a running instance. No-op when already terminal. Results of
    /// activities still in flight are dropped when they land.
    pub async fn terminate_instance(&self, instance: &str, reason: &str) {
        let lock = self.instance_lock(instance).await;
        let _guard = lock.lock().await;
        let history = self.store.read(instance).await;
        if HistoryReader::from_history(&history).is_terminal {
            return;
        }
        warn!(instance = %instance, reason = %reason, "terminating instance");
        if let Err(e) = self
            .append_with_retry(
                instance,
                vec![Event::WorkflowTerminated {
                    reason: reason.to_string(),
                }],
                Some(APPEND_ATTEMPTS),
            )
            .await
        {
            error!(instance = %instance, error = %e, "failed to persist termination");
        }
    }

    pub async fn status(&self, instance: &str) -> WorkflowStatus {
        if !self.store.exists(instance).await {
            return WorkflowStatus::NotFound;
        }
        WorkflowStatus::from_history(&self.store.read(instance).await)
    }

    /// Poll until the instance reaches a terminal state or `timeout` passes.
    pub async fn wait_for_workflow(
        &self,
        instance: &str,
        timeout: Duration,
    ) -> Result<WorkflowStatus, WaitError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.status(instance).await {
                WorkflowStatus::NotFound => {
                    return Err(WaitError::Other(format!("unknown instance: {instance}")))
                }
                status if status.is_terminal() => return Ok(status),
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(WaitError::Timeout);
            }
            tokio::time::sleep(self.options.wait_poll_interval).await;
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
