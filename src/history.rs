//! Event model for the per-instance append-only history.
//!
//! History is the sole persisted source of orchestration truth: the replay
//! executor reconstructs all in-memory state from it on every pass, and the
//! runtime never keeps a side channel of its own. Events are immutable once
//! written and their position in the log is the replay order.

use serde::{Deserialize, Serialize};

/// A single record in an instance's history.
///
/// `TaskScheduled`/`TaskCompleted`/`TaskFailed` correlate through the task id,
/// which is assigned 0, 1, 2, … in the exact order workflow code requests
/// activities during a replay pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// First event of every instance; carries the workflow name and input.
    WorkflowStarted {
        name: String,
        input: String,
        started_at_ms: u64,
    },
    /// An activity invocation was requested by workflow code.
    TaskScheduled { id: u64, name: String, input: String },
    /// The activity correlated by `id` finished successfully.
    TaskCompleted { id: u64, result: String },
    /// The activity correlated by `id` failed; the error is handed back to
    /// workflow code, which decides whether it is fatal.
    TaskFailed { id: u64, error: String },
    /// Terminal: workflow code returned successfully.
    WorkflowCompleted { output: String },
    /// Terminal: workflow code returned an error, or the runtime failed the
    /// instance (determinism violation, unregistered workflow, storage loss).
    WorkflowFailed { error: String },
    /// Terminal: the instance was cancelled from outside. Results of
    /// still-running activities are dropped once this is written.
    WorkflowTerminated { reason: String },
}

impl Event {
    /// True for events that end the instance's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::WorkflowCompleted { .. } | Event::WorkflowFailed { .. } | Event::WorkflowTerminated { .. }
        )
    }
}

/// Metadata derived from an instance's history in one scan.
#[derive(Debug, Clone, Default)]
pub struct HistoryReader {
    /// Workflow name from `WorkflowStarted`.
    pub workflow_name: Option<String>,
    /// Original input from `WorkflowStarted`.
    pub input: Option<String>,
    /// Wall-clock start time recorded by the client gateway.
    pub started_at_ms: Option<u64>,
    /// Whether a terminal event is present.
    pub is_terminal: bool,
}

impl HistoryReader {
    pub fn from_history(history: &[Event]) -> Self {
        let mut reader = Self::default();
        for event in history {
            match event {
                Event::WorkflowStarted {
                    name,
                    input,
                    started_at_ms,
                } => {
                    reader.workflow_name = Some(name.clone());
                    reader.input = Some(input.clone());
                    reader.started_at_ms = Some(*started_at_ms);
                }
                e if e.is_terminal() => reader.is_terminal = true,
                _ => {}
            }
        }
        reader
    }

    /// Scheduled tasks with no completion or failure yet, in schedule order.
    ///
    /// These are exactly the tasks the runtime must (re-)dispatch: freshly
    /// scheduled ones, and ones orphaned by a crash between dispatch and the
    /// completion append.
    pub fn unresolved_tasks(history: &[Event]) -> Vec<(u64, String, String)> {
        let mut scheduled: Vec<(u64, String, String)> = Vec::new();
        for event in history {
            match event {
                Event::TaskScheduled { id, name, input } => {
                    scheduled.push((*id, name.clone(), input.clone()));
                }
                Event::TaskCompleted { id, .. } | Event::TaskFailed { id, .. } => {
                    scheduled.retain(|(sid, _, _)| sid != id);
                }
                _ => {}
            }
        }
        scheduled
    }
}
