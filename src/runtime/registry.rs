//! Name-to-handler tables for activities and workflows.
//!
//! Registration is explicit and happens before the runtime starts; a name is
//! looked up at dispatch time and an unknown name is a recorded failure, not
//! a panic. Duplicate registration is a programming error and panics at
//! build time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::WorkflowContext;

/// An activity implementation. Activities are the only place for I/O,
/// clocks, and randomness; the runtime records their results in history and
/// may re-invoke them after a crash, so they must be idempotent.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn invoke(&self, input: String) -> Result<String, String>;
}

/// A workflow implementation. Must be deterministic: replayed many times
/// against recorded history.
#[async_trait]
pub trait WorkflowHandler: Send + Sync {
    async fn invoke(&self, ctx: WorkflowContext, input: String) -> Result<String, String>;
}

struct FnActivity<F>(F);

#[async_trait]
impl<F, Fut> ActivityHandler for FnActivity<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, String>> + Send + 'static,
{
    async fn invoke(&self, input: String) -> Result<String, String> {
        (self.0)(input).await
    }
}

struct FnWorkflow<F>(F);

#[async_trait]
impl<F, Fut> WorkflowHandler for FnWorkflow<F>
where
    F: Fn(WorkflowContext, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, String>> + Send + 'static,
{
    async fn invoke(&self, ctx: WorkflowContext, input: String) -> Result<String, String> {
        (self.0)(ctx, input).await
    }
}

/// Immutable, cheaply clonable activity table.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    handlers: Arc<HashMap<String, Arc<dyn ActivityHandler>>>,
}

impl ActivityRegistry {
    pub fn builder() -> ActivityRegistryBuilder {
        ActivityRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActivityHandler>> {
        self.handlers.get(name).cloned()
    }
}

#[derive(Default)]
pub struct ActivityRegistryBuilder {
    handlers: HashMap<String, Arc<dyn ActivityHandler>>,
}

impl ActivityRegistryBuilder {
    /// Register an infallible activity.
    ///
    /// # Panics
    /// Panics if `name` is already registered.
    pub fn register<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        self.register_result(name, move |input| {
            let fut = f(input);
            async move { Ok(fut.await) }
        })
    }

    /// Register a fallible activity; `Err` becomes a `TaskFailed` event.
    ///
    /// # Panics
    /// Panics if `name` is already registered.
    pub fn register_result<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        let name = name.into();
        if self
            .handlers
            .insert(name.clone(), Arc::new(FnActivity(f)))
            .is_some()
        {
            panic!("activity already registered: {name}");
        }
        self
    }

    pub fn build(self) -> ActivityRegistry {
        ActivityRegistry {
            handlers: Arc::new(self.handlers),
        }
    }
}

/// Immutable, cheaply clonable workflow table.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    handlers: Arc<HashMap<String, Arc<dyn WorkflowHandler>>>,
}

impl WorkflowRegistry {
    pub fn builder() -> WorkflowRegistryBuilder {
        WorkflowRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn WorkflowHandler>> {
        self.handlers.get(name).cloned()
    }
}

#[derive(Default)]
pub struct WorkflowRegistryBuilder {
    handlers: HashMap<String, Arc<dyn WorkflowHandler>>,
}

impl WorkflowRegistryBuilder {
    /// # Panics
    /// Panics if `name` is already registered.
    pub fn register<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(WorkflowContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        let name = name.into();
        if self
            .handlers
            .insert(name.clone(), Arc::new(FnWorkflow(f)))
            .is_some()
        {
            panic!("workflow already registered: {name}");
        }
        self
    }

    pub fn build(self) -> WorkflowRegistry {
        WorkflowRegistry {
            handlers: Arc::new(self.handlers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_activity_is_invocable() {
        let registry = ActivityRegistry::builder()
            .register("Echo", |input: String| async move { input })
            .build();
        let handler = registry.get("Echo").unwrap();
        assert_eq!(handler.invoke("hi".to_string()).await, Ok("hi".to_string()));
        assert!(registry.get("Missing").is_none());
    }

    #[test]
    #[should_panic(expected = "activity already registered")]
    fn duplicate_activity_registration_panics() {
        let _ = ActivityRegistry::builder()
            .register("Echo", |input: String| async move { input })
            .register("Echo", |input: String| async move { input });
    }

    #[test]
    #[should_panic(expected = "workflow already registered")]
    fn duplicate_workflow_registration_panics() {
        let _ = WorkflowRegistry::builder()
            .register("W", |_ctx: WorkflowContext, input: String| async move { Ok(input) })
            .register("W", |_ctx: WorkflowContext, input: String| async move { Ok(input) });
    }
}
