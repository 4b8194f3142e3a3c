//! weft-server: HTTP workflow host with a filesystem-backed history store
//! and a pair of demo workflows.
//!
//! Configuration via environment:
//! - `WEFT_DATA_DIR`  history root (default `./weft-data`)
//! - `WEFT_ADDR`      listen address (default `127.0.0.1:8080`)
//! - `RUST_LOG`       tracing filter

use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::info;

use weft::providers::FsHistoryStore;
use weft::{ActivityRegistry, Client, Runtime, WorkflowRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let data_dir = std::env::var("WEFT_DATA_DIR").unwrap_or_else(|_| "./weft-data".to_string());
    let addr = std::env::var("WEFT_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

    let activities = ActivityRegistry::builder()
        .register("Hello", |city: String| async move { format!("{city}-Hello") })
        .build();

    let workflows = WorkflowRegistry::builder()
        .register("HelloChain", |ctx: weft::WorkflowContext, _input: String| async move {
            let mut results = Vec::new();
            for city in ["Tokyo", "Seattle", "London"] {
                results.push(ctx.schedule_activity("Hello", city).await?);
            }
            serde_json::to_string(&results).map_err(|e| e.to_string())
        })
        .register("HelloFanOut", |ctx: weft::WorkflowContext, _input: String| async move {
            let tasks = ["Tokyo", "Seattle", "London"]
                .iter()
                .map(|city| ctx.schedule_activity("Hello", *city))
                .collect();
            let results: Result<Vec<_>, String> = ctx.join(tasks).await.into_iter().collect();
            Ok(results?.join(","))
        })
        .build();

    let store = Arc::new(FsHistoryStore::new(&data_dir, false));
    let runtime = Runtime::start_with_store(store, activities, workflows).await;
    let client = Client::new(runtime);

    let app = weft::gateway::router(client).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, data_dir = %data_dir, "weft-server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
