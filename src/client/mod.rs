//! Control-plane client: start, query, wait, terminate.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::providers::StorageError;
use crate::runtime::status::{WaitError, WorkflowStatus};
use crate::runtime::Runtime;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// An instance with this id already exists. Instance ids are never
    /// reusable, even after a terminal state.
    #[error("instance already exists: {0}")]
    DuplicateInstance(String),
    #[error("unknown instance: {0}")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Cheap-clone handle over a running [`Runtime`].
#[derive(Clone)]
pub struct Client {
    runtime: Arc<Runtime>,
}

impl Client {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// Start a workflow under a generated instance id and return the id.
    pub async fn start(&self, workflow: &str, input: &str) -> Result<String, ClientError> {
        let instance = uuid::Uuid::new_v4().to_string();
        self.start_with_id(&instance, workflow, input).await?;
        Ok(instance)
    }

    /// Start a workflow under a caller-chosen instance id.
    pub async fn start_with_id(
        &self,
        instance: &str,
        workflow: &str,
        input: &str,
    ) -> Result<(), ClientError> {
        match self.runtime.store().create_instance(instance).await {
            Ok(()) => {}
            Err(e) if !e.is_retryable() => {
                return Err(ClientError::DuplicateInstance(instance.to_string()))
            }
            Err(e) => return Err(ClientError::Storage(e)),
        }
        info!(instance = %instance, workflow = %workflow, "starting workflow");
        self.runtime.activate(instance, workflow, input).await?;
        Ok(())
    }

    pub async fn status(&self, instance: &str) -> WorkflowStatus {
        self.runtime.status(instance).await
    }

    /// Block until the instance is terminal or `timeout` passes.
    pub async fn wait(&self, instance: &str, timeout: Duration) -> Result<WorkflowStatus, WaitError> {
        self.runtime.wait_for_workflow(instance, timeout).await
    }

    /// Cancel a running instance. Idempotent for already-terminal instances.
    pub async fn terminate(&self, instance: &str, reason: &str) -> Result<(), ClientError> {
        if !self.runtime.store().exists(instance).await {
            return Err(ClientError::NotFound(instance.to_string()));
        }
        self.runtime.terminate_instance(instance, reason).await;
        Ok(())
    }
}
