//! Filesystem history store: one JSONL file per instance.
//!
//! Appends happen under a process-wide writer lock and are flushed through a
//! full-file rewrite via a temp file and rename, so readers always observe a
//! complete history. Intended for single-process durability (survive a
//! restart), not for multi-writer deployments.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{filter_duplicates, HistoryStore, StorageError};
use crate::history::Event;

pub struct FsHistoryStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsHistoryStore {
    /// Open (and create) the store rooted at `root`. With `reset_on_create`
    /// any existing histories under the root are removed first.
    pub fn new(root: impl AsRef<Path>, reset_on_create: bool) -> Self {
        let root = root.as_ref().to_path_buf();
        if reset_on_create {
            let _ = std::fs::remove_dir_all(&root);
        }
        let _ = std::fs::create_dir_all(&root);
        Self {
            root,
            write_lock: Mutex::new(()),
        }
    }

    fn instance_path(&self, instance: &str) -> PathBuf {
        // Instance ids are uuids or caller-chosen tokens; encode path
        // separators defensively so an id cannot escape the root.
        let safe: String = instance
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.root.join(format!("{safe}.jsonl"))
    }

    async fn read_file(&self, instance: &str) -> Vec<Event> {
        let path = self.instance_path(instance);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    async fn write_file(&self, instance: &str, history: &[Event]) -> Result<(), StorageError> {
        let mut out = String::new();
        for event in history {
            let line = serde_json::to_string(event)
                .map_err(|e| StorageError::permanent("append", format!("serialize event: {e}")))?;
            out.push_str(&line);
            out.push('\n');
        }
        let path = self.instance_path(instance);
        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, out)
            .await
            .map_err(|e| StorageError::retryable("append", format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::retryable("append", format!("rename {}: {e}", path.display())))
    }
}

#[async_trait]
impl HistoryStore for FsHistoryStore {
    async fn create_instance(&self, instance: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let path = self.instance_path(instance);
        if path.exists() {
            return Err(StorageError::permanent(
                "create_instance",
                format!("instance already exists: {instance}"),
            ));
        }
        tokio::fs::write(&path, "")
            .await
            .map_err(|e| StorageError::retryable("create_instance", format!("{e}")))
    }

    async fn read(&self, instance: &str) -> Vec<Event> {
        self.read_file(instance).await
    }

    async fn append(&self, instance: &str, events: Vec<Event>) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut history = self.read_file(instance).await;
        let fresh = filter_duplicates(&history, events);
        if fresh.is_empty() {
            return Ok(());
        }
        history.extend(fresh);
        self.write_file(instance, &history).await
    }

    async fn exists(&self, instance: &str) -> bool {
        self.instance_path(instance).exists()
    }

    async fn list_instances(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(_) => return names,
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(".jsonl") {
                names.push(stem.to_string());
            }
        }
        names.sort();
        names
    }

    async fn reset(&self) {
        let _guard = self.write_lock.lock().await;
        let _ = tokio::fs::remove_dir_all(&self.root).await;
        let _ = tokio::fs::create_dir_all(&self.root).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_events() -> Vec<Event> {
        vec![
            Event::WorkflowStarted {
                name: "W".to_string(),
                input: "in".to_string(),
                started_at_ms: 1,
            },
            Event::TaskScheduled {
                id: 0,
                name: "A".to_string(),
                input: "x".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FsHistoryStore::new(dir.path(), false);
            store.create_instance("i1").await.unwrap();
            store.append("i1", sample_events()).await.unwrap();
        }
        let store = FsHistoryStore::new(dir.path(), false);
        assert!(store.exists("i1").await);
        assert_eq!(store.read("i1").await, sample_events());
        assert_eq!(store.list_instances().await, vec!["i1".to_string()]);
    }

    #[tokio::test]
    async fn reset_on_create_clears_previous_runs() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FsHistoryStore::new(dir.path(), false);
            store.create_instance("i1").await.unwrap();
        }
        let store = FsHistoryStore::new(dir.path(), true);
        assert!(!store.exists("i1").await);
    }

    #[tokio::test]
    async fn duplicate_instance_rejected_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsHistoryStore::new(dir.path(), false);
        store.create_instance("i1").await.unwrap();
        let second = FsHistoryStore::new(dir.path(), false);
        let err = second.create_instance("i1").await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn duplicate_completions_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsHistoryStore::new(dir.path(), false);
        store.create_instance("i1").await.unwrap();
        let completion = Event::TaskCompleted {
            id: 0,
            result: "r".to_string(),
        };
        store.append("i1", vec![completion.clone()]).await.unwrap();
        store.append("i1", vec![completion]).await.unwrap();
        assert_eq!(store.read("i1").await.len(), 1);
    }
}
