//! Instance status, derived from history on demand and never stored.

use crate::history::Event;

/// Lifecycle state of a workflow instance. Terminal states are absorbing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowStatus {
    /// No instance with this id was ever started.
    NotFound,
    /// Started and not yet terminal.
    Running,
    Completed { output: String },
    Failed { error: String },
    Terminated { reason: String },
}

impl WorkflowStatus {
    /// Derive the status for an instance known to exist. The first terminal
    /// event wins; later events cannot change it.
    pub fn from_history(history: &[Event]) -> Self {
        for event in history {
            match event {
                Event::WorkflowCompleted { output } => {
                    return WorkflowStatus::Completed {
                        output: output.clone(),
                    }
                }
                Event::WorkflowFailed { error } => {
                    return WorkflowStatus::Failed {
                        error: error.clone(),
                    }
                }
                Event::WorkflowTerminated { reason } => {
                    return WorkflowStatus::Terminated {
                        reason: reason.clone(),
                    }
                }
                _ => {}
            }
        }
        WorkflowStatus::Running
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed { .. }
                | WorkflowStatus::Failed { .. }
                | WorkflowStatus::Terminated { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            WorkflowStatus::NotFound => "NotFound",
            WorkflowStatus::Running => "Running",
            WorkflowStatus::Completed { .. } => "Completed",
            WorkflowStatus::Failed { .. } => "Failed",
            WorkflowStatus::Terminated { .. } => "Terminated",
        }
    }
}

/// Failure modes of `Runtime::wait_for_workflow`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// The deadline passed while the instance was still running.
    Timeout,
    Other(String),
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::Timeout => write!(f, "timed out waiting for workflow"),
            WaitError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for WaitError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_until_terminal_event() {
        let mut history = vec![Event::WorkflowStarted {
            name: "W".to_string(),
            input: String::new(),
            started_at_ms: 0,
        }];
        assert_eq!(WorkflowStatus::from_history(&history), WorkflowStatus::Running);

        history.push(Event::WorkflowCompleted {
            output: "done".to_string(),
        });
        let status = WorkflowStatus::from_history(&history);
        assert!(status.is_terminal());
        assert_eq!(status.label(), "Completed");
    }

    #[test]
    fn first_terminal_event_wins() {
        let history = vec![
            Event::WorkflowTerminated {
                reason: "cancel".to_string(),
            },
            Event::WorkflowCompleted {
                output: "late".to_string(),
            },
        ];
        assert_eq!(
            WorkflowStatus::from_history(&history),
            WorkflowStatus::Terminated {
                reason: "cancel".to_string()
            }
        );
    }
}
