//! History storage contract and implementations.
//!
//! A provider owns the append-only event log per instance. Appends must be
//! atomic with respect to concurrent readers and idempotent for completion
//! and terminal events, so at-least-once delivery from the dispatcher cannot
//! corrupt a history.

use async_trait::async_trait;

use crate::history::Event;

pub mod fs;
pub mod in_memory;

pub use fs::FsHistoryStore;
pub use in_memory::InMemoryHistoryStore;

/// Storage failure with a retryability classification.
///
/// Retryable errors are transient (I/O hiccups, contention) and callers are
/// expected to retry with backoff. Permanent errors (duplicate instance,
/// history cap exceeded) must not be retried.
#[derive(Debug, Clone)]
pub struct StorageError {
    pub operation: String,
    pub message: String,
    pub retryable: bool,
}

impl StorageError {
    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.retryable { "retryable" } else { "permanent" };
        write!(f, "{} failed ({kind}): {}", self.operation, self.message)
    }
}

impl std::error::Error for StorageError {}

/// Append-only per-instance event log.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Register a new instance with an empty history. Fails with a permanent
    /// error if the instance already exists, in any state; instance ids are
    /// never reusable.
    async fn create_instance(&self, instance: &str) -> Result<(), StorageError>;

    /// Full history in append order. Unknown instances read as empty.
    async fn read(&self, instance: &str) -> Vec<Event>;

    /// Append events atomically. Completion and terminal events already
    /// present are silently dropped (idempotent delivery).
    async fn append(&self, instance: &str, events: Vec<Event>) -> Result<(), StorageError>;

    async fn exists(&self, instance: &str) -> bool;

    async fn list_instances(&self) -> Vec<String>;

    /// Drop all state. Test utility.
    async fn reset(&self);
}

/// Dedupe key for events that may be delivered more than once. Schedule and
/// start events are written exactly once by the single-writer replay pass and
/// carry no key.
fn completion_key(event: &Event) -> Option<(u64, &'static str)> {
    match event {
        Event::TaskCompleted { id, .. } => Some((*id, "task_completed")),
        Event::TaskFailed { id, .. } => Some((*id, "task_failed")),
        Event::WorkflowCompleted { .. } => Some((0, "workflow_completed")),
        Event::WorkflowFailed { .. } => Some((0, "workflow_failed")),
        Event::WorkflowTerminated { .. } => Some((0, "workflow_terminated")),
        _ => None,
    }
}

/// Filter `new` down to events not already represented in `existing`.
/// Shared by providers so both apply the same idempotence rules.
pub(crate) fn filter_duplicates(existing: &[Event], new: Vec<Event>) -> Vec<Event> {
    let seen: std::collections::HashSet<(u64, &'static str)> =
        existing.iter().filter_map(completion_key).collect();
    new.into_iter()
        .filter(|e| match completion_key(e) {
            Some(key) => !seen.contains(&key),
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_completions_are_filtered() {
        let existing = vec![Event::TaskCompleted {
            id: 3,
            result: "r".to_string(),
        }];
        let filtered = filter_duplicates(
            &existing,
            vec![
                Event::TaskCompleted {
                    id: 3,
                    result: "r".to_string(),
                },
                Event::TaskFailed {
                    id: 3,
                    error: "e".to_string(),
                },
                Event::TaskCompleted {
                    id: 4,
                    result: "r".to_string(),
                },
            ],
        );
        // Same id but a different kind is kept; the exact duplicate is not.
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn schedules_always_pass_through() {
        let existing = vec![Event::TaskScheduled {
            id: 0,
            name: "A".to_string(),
            input: "x".to_string(),
        }];
        let filtered = filter_duplicates(
            &existing,
            vec![Event::TaskScheduled {
                id: 1,
                name: "A".to_string(),
                input: "y".to_string(),
            }],
        );
        assert_eq!(filtered.len(), 1);
    }
}
