//! weft: durable workflow orchestration via deterministic history replay.
//!
//! Workflow code is an ordinary async function that suspends only on durable
//! futures (`schedule_activity`, `join`). It is never kept alive across a
//! suspension: whenever new information arrives, the whole function is re-run
//! from the top against the instance's recorded history, fast-forwarding
//! through already-finished work. Activity results, and nothing else, are
//! persisted; the Nth activity request always receives task id N, which is
//! the correlation key between a schedule and its completion.
//!
//! ```no_run
//! use weft::{ActivityRegistry, Client, Runtime, WorkflowContext, WorkflowRegistry};
//!
//! # async fn demo() {
//! let activities = ActivityRegistry::builder()
//!     .register("Hello", |city: String| async move { format!("{city}-Hello") })
//!     .build();
//! let workflows = WorkflowRegistry::builder()
//!     .register("HelloFanOut", |ctx: WorkflowContext, _input: String| async move {
//!         let tasks = ["Tokyo", "Seattle", "London"]
//!             .iter()
//!             .map(|city| ctx.schedule_activity("Hello", *city))
//!             .collect();
//!         let results: Result<Vec<_>, String> = ctx.join(tasks).await.into_iter().collect();
//!         Ok(results?.join(","))
//!     })
//!     .build();
//! let rt = Runtime::start(activities, workflows).await;
//! let client = Client::new(rt);
//! let instance = client.start("HelloFanOut", "").await.unwrap();
//! # }
//! ```
//!
//! Determinism is a correctness precondition: workflow code must not read
//! real time, draw randomness, or do I/O directly. Anything non-deterministic
//! belongs in an activity so its result is captured in history. The runtime
//! detects the common violations (schedule mismatch against history,
//! suspension on a non-durable future) and fails the instance loudly.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

pub mod client;
pub mod futures;
pub mod gateway;
pub mod history;
pub mod providers;
pub mod runtime;

pub use client::{Client, ClientError};
pub use futures::{ActivityFuture, JoinFuture};
pub use history::Event;
pub use runtime::registry::{ActivityRegistry, WorkflowRegistry};
pub use runtime::status::{WaitError, WorkflowStatus};
pub use runtime::{Runtime, RuntimeOptions};

/// Side effect requested by workflow code during a turn, to be materialized
/// by the runtime (persist `TaskScheduled`, hand the invocation to the
/// activity dispatcher). Actions are pure data and carry no side effects
/// themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ScheduleActivity { id: u64, name: String, input: String },
}

#[derive(Debug)]
pub(crate) struct CtxInner {
    pub(crate) instance: String,
    pub(crate) history: Vec<Event>,
    pub(crate) next_task_id: u64,
    pub(crate) actions: Vec<Action>,
    pub(crate) nondeterminism: Option<String>,
}

impl CtxInner {
    fn new(instance: String, history: Vec<Event>) -> Self {
        Self {
            instance,
            history,
            next_task_id: 0,
            actions: Vec::new(),
            nondeterminism: None,
        }
    }

    pub(crate) fn record_action(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// True while recorded schedules at or ahead of the current task id
    /// remain, i.e. the code path being executed already ran in an earlier
    /// pass.
    pub(crate) fn is_replaying(&self) -> bool {
        let next = self.next_task_id;
        self.history
            .iter()
            .any(|e| matches!(e, Event::TaskScheduled { id, .. } if *id >= next))
    }
}

/// Handle given to workflow code; the only sanctioned way for it to interact
/// with the outside world.
#[derive(Clone)]
pub struct WorkflowContext {
    pub(crate) inner: Arc<Mutex<CtxInner>>,
}

impl WorkflowContext {
    pub(crate) fn new(instance: String, history: Vec<Event>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CtxInner::new(instance, history))),
        }
    }

    /// Instance id this workflow execution belongs to.
    pub fn instance(&self) -> String {
        self.inner.lock().unwrap().instance.clone()
    }

    /// Request one activity invocation and suspend until its result is known.
    ///
    /// The returned future is inert until polled; task ids are claimed in
    /// poll order, so awaiting futures in a different order than they were
    /// created is fine as long as that order is deterministic.
    pub fn schedule_activity(&self, name: impl Into<String>, input: impl Into<String>) -> ActivityFuture {
        ActivityFuture::new(self.clone(), name.into(), input.into())
    }

    /// Fan-out/fan-in: suspend until every child has a result, then yield the
    /// results in request order. Completion arrival order is irrelevant.
    pub fn join(&self, children: Vec<ActivityFuture>) -> JoinFuture {
        JoinFuture::new(children)
    }

    /// Whether the current code path is a replay of an earlier pass.
    pub fn is_replaying(&self) -> bool {
        self.inner.lock().unwrap().is_replaying()
    }

    /// Replay-gated log: emitted only the first time this code path runs.
    pub fn trace_info(&self, msg: impl AsRef<str>) {
        if !self.is_replaying() {
            tracing::info!(target: "weft::workflow", instance = %self.instance(), "{}", msg.as_ref());
        }
    }

    pub fn trace_warn(&self, msg: impl AsRef<str>) {
        if !self.is_replaying() {
            tracing::warn!(target: "weft::workflow", instance = %self.instance(), "{}", msg.as_ref());
        }
    }

    pub fn trace_error(&self, msg: impl AsRef<str>) {
        if !self.is_replaying() {
            tracing::error!(target: "weft::workflow", instance = %self.instance(), "{}", msg.as_ref());
        }
    }
}

/// Outcome of one replay pass over a workflow function.
#[derive(Debug)]
pub struct TurnResult {
    /// Newly requested side effects, in request order.
    pub actions: Vec<Action>,
    /// Terminal return of the workflow, if it ran to completion this pass.
    pub output: Option<Result<String, String>>,
    /// Set when the code's schedule requests diverged from recorded history.
    pub nondeterminism: Option<String>,
}

fn noop_waker() -> Waker {
    unsafe fn clone(_: *const ()) -> RawWaker {
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    unsafe fn wake(_: *const ()) {}
    unsafe fn wake_by_ref(_: *const ()) {}
    unsafe fn drop(_: *const ()) {}
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);
    unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
}

fn poll_once<F: Future>(fut: &mut F) -> Poll<F::Output> {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    // Safety: fut lives on the caller's stack for the duration of the call
    // and is never moved after being pinned here.
    let pinned = unsafe { std::pin::Pin::new_unchecked(fut) };
    pinned.poll(&mut cx)
}

/// Execute one replay pass: re-run the workflow function from its start
/// against `history`, fast-forwarding through recorded results, and stop at
/// the first suspension point with no recorded completion.
///
/// Pure with respect to the outside world; the runtime materializes the
/// returned actions. The future is polled exactly once; durable futures
/// resolve synchronously from history, so a single poll reaches either the
/// terminal return or the next suspension point.
pub fn run_turn<F, Fut>(instance: &str, history: Vec<Event>, workflow: F) -> TurnResult
where
    F: FnOnce(WorkflowContext) -> Fut,
    Fut: Future<Output = Result<String, String>>,
{
    let ctx = WorkflowContext::new(instance.to_string(), history);
    let mut fut = workflow(ctx.clone());
    let output = match poll_once(&mut fut) {
        Poll::Ready(out) => Some(out),
        Poll::Pending => None,
    };
    let mut inner = ctx.inner.lock().unwrap();
    TurnResult {
        actions: std::mem::take(&mut inner.actions),
        output,
        nondeterminism: inner.nondeterminism.take(),
    }
}
