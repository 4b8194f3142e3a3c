//! Durable futures: the only things workflow code may await.
//!
//! These futures never register wakers. They resolve synchronously from
//! recorded history or stay `Pending` forever within a turn; the runtime
//! discards the whole workflow future at the first unresolved suspension and
//! re-runs it when a completion lands.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::history::Event;
use crate::{Action, WorkflowContext};

/// Result of a single activity invocation, recorded in history.
pub type ActivityResult = Result<String, String>;

/// Awaitable handle for one scheduled activity.
///
/// The task id is claimed on first poll, so ids line up with the order
/// workflow code actually awaits work, deterministically across passes. On
/// the claiming poll the future either validates the recorded
/// `TaskScheduled` against its own name and input, or records a schedule
/// action for the runtime to persist and dispatch.
pub struct ActivityFuture {
    ctx: WorkflowContext,
    name: String,
    input: String,
    claimed_id: Cell<Option<u64>>,
}

// No self-references; polling through &mut is fine.
const _: fn() = || {
    fn assert_unpin<T: Unpin>() {}
    assert_unpin::<ActivityFuture>();
};

impl ActivityFuture {
    pub(crate) fn new(ctx: WorkflowContext, name: String, input: String) -> Self {
        Self {
            ctx,
            name,
            input,
            claimed_id: Cell::new(None),
        }
    }

    fn claim(&self) -> Option<u64> {
        if let Some(id) = self.claimed_id.get() {
            return Some(id);
        }
        let mut inner = self.ctx.inner.lock().unwrap();
        let id = inner.next_task_id;
        inner.next_task_id += 1;

        let recorded = inner.history.iter().find_map(|e| match e {
            Event::TaskScheduled {
                id: eid,
                name,
                input,
            } if *eid == id => Some((name.clone(), input.clone())),
            _ => None,
        });
        match recorded {
            Some((name, input)) => {
                if name != self.name || input != self.input {
                    inner.nondeterminism = Some(format!(
                        "task {id}: history recorded {name}({input}), code requested {}({})",
                        self.name, self.input
                    ));
                    return None;
                }
            }
            None => {
                inner.record_action(Action::ScheduleActivity {
                    id,
                    name: self.name.clone(),
                    input: self.input.clone(),
                });
            }
        }
        self.claimed_id.set(Some(id));
        Some(id)
    }
}

impl Future for ActivityFuture {
    type Output = ActivityResult;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let id = match this.claim() {
            Some(id) => id,
            // Determinism violation was recorded; stall this pass.
            None => return Poll::Pending,
        };
        let inner = this.ctx.inner.lock().unwrap();
        for event in &inner.history {
            match event {
                Event::TaskCompleted { id: eid, result } if *eid == id => {
                    return Poll::Ready(Ok(result.clone()));
                }
                Event::TaskFailed { id: eid, error } if *eid == id => {
                    return Poll::Ready(Err(error.clone()));
                }
                _ => {}
            }
        }
        Poll::Pending
    }
}

/// Fan-in over a set of activity futures.
///
/// Polls every child each pass so all of them claim their ids and get
/// scheduled together, then resolves once each child has a recorded result.
/// Output order is the order the children were handed in, independent of
/// completion arrival order.
pub struct JoinFuture {
    children: Vec<ActivityFuture>,
    results: Vec<Option<ActivityResult>>,
}

impl JoinFuture {
    pub(crate) fn new(children: Vec<ActivityFuture>) -> Self {
        let results = children.iter().map(|_| None).collect();
        Self { children, results }
    }
}

impl Future for JoinFuture {
    type Output = Vec<ActivityResult>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut all_ready = true;
        for (child, slot) in this.children.iter_mut().zip(this.results.iter_mut()) {
            if slot.is_some() {
                continue;
            }
            match Pin::new(child).poll(cx) {
                Poll::Ready(res) => *slot = Some(res),
                Poll::Pending => all_ready = false,
            }
        }
        if all_ready {
            let results = this
                .results
                .iter_mut()
                .map(|slot| slot.take().expect("all join slots resolved"))
                .collect();
            Poll::Ready(results)
        } else {
            Poll::Pending
        }
    }
}
