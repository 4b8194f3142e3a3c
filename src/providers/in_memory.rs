//! In-memory history store. Default for tests and single-process runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{filter_duplicates, HistoryStore, StorageError};
use crate::history::Event;

/// Runaway-workflow guard. A well-formed instance in this runtime stays far
/// below this; hitting it means an unbounded scheduling loop.
const CAP: usize = 1024;

#[derive(Default)]
pub struct InMemoryHistoryStore {
    inner: Mutex<HashMap<String, Vec<Event>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn create_instance(&self, instance: &str) -> Result<(), StorageError> {
        let mut map = self.inner.lock().await;
        if map.contains_key(instance) {
            return Err(StorageError::permanent(
                "create_instance",
                format!("instance already exists: {instance}"),
            ));
        }
        map.insert(instance.to_string(), Vec::new());
        Ok(())
    }

    async fn read(&self, instance: &str) -> Vec<Event> {
        self.inner
            .lock()
            .await
            .get(instance)
            .cloned()
            .unwrap_or_default()
    }

    async fn append(&self, instance: &str, events: Vec<Event>) -> Result<(), StorageError> {
        let mut map = self.inner.lock().await;
        let history = map.entry(instance.to_string()).or_default();
        let fresh = filter_duplicates(history, events);
        if history.len() + fresh.len() > CAP {
            return Err(StorageError::permanent(
                "append",
                format!("history cap ({CAP}) exceeded for {instance}"),
            ));
        }
        history.extend(fresh);
        Ok(())
    }

    async fn exists(&self, instance: &str) -> bool {
        self.inner.lock().await.contains_key(instance)
    }

    async fn list_instances(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn reset(&self) {
        self.inner.lock().await.clear();
    }
}
