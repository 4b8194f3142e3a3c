//! End-to-end greeting scenarios: sequential chaining and parallel fan-out.

use std::sync::Arc;
use std::time::Duration;

use weft::providers::FsHistoryStore;
use weft::{ActivityRegistry, Client, Runtime, WorkflowContext, WorkflowRegistry, WorkflowStatus};

fn hello_activities() -> ActivityRegistry {
    ActivityRegistry::builder()
        .register("Hello", |city: String| async move { format!("{city}-Hello") })
        .build()
}

/// Hello with per-city delays chosen so completions arrive in reverse
/// request order.
fn slow_hello_activities() -> ActivityRegistry {
    ActivityRegistry::builder()
        .register("Hello", |city: String| async move {
            let delay = match city.as_str() {
                "Tokyo" => 120,
                "Seattle" => 80,
                _ => 10,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            format!("{city}-Hello")
        })
        .build()
}

async fn hello_chain(ctx: WorkflowContext, _input: String) -> Result<String, String> {
    let mut results = Vec::new();
    for city in ["Tokyo", "Seattle", "London"] {
        results.push(ctx.schedule_activity("Hello", city).await?);
    }
    serde_json::to_string(&results).map_err(|e| e.to_string())
}

async fn hello_fan_out(ctx: WorkflowContext, _input: String) -> Result<String, String> {
    let tasks = ["Tokyo", "Seattle", "London"]
        .iter()
        .map(|city| ctx.schedule_activity("Hello", *city))
        .collect();
    let results: Result<Vec<_>, String> = ctx.join(tasks).await.into_iter().collect();
    Ok(results?.join(","))
}

#[tokio::test]
async fn sequential_chain_greets_three_cities_in_order() {
    let workflows = WorkflowRegistry::builder().register("HelloChain", hello_chain).build();
    let rt = Runtime::start(hello_activities(), workflows).await;
    let client = Client::new(rt);

    let instance = client.start("HelloChain", "").await.unwrap();
    let status = client.wait(&instance, Duration::from_secs(5)).await.unwrap();
    match status {
        WorkflowStatus::Completed { output } => {
            let cities: Vec<String> = serde_json::from_str(&output).unwrap();
            assert_eq!(cities, vec!["Tokyo-Hello", "Seattle-Hello", "London-Hello"]);
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn deep_sequential_chain_completes() {
    // Ten chained activities, so the completion-driven replay loop (pass,
    // dispatch, completion, next pass) runs many levels deep.
    let activities = ActivityRegistry::builder()
        .register("Inc", |input: String| async move {
            let n: u64 = input.parse().unwrap_or(0);
            (n + 1).to_string()
        })
        .build();
    let workflows = WorkflowRegistry::builder()
        .register("Count", |ctx: WorkflowContext, input: String| async move {
            let mut value = input;
            for _ in 0..10 {
                value = ctx.schedule_activity("Inc", value).await?;
            }
            Ok(value)
        })
        .build();
    let rt = Runtime::start(activities, workflows).await;
    let client = Client::new(rt);

    let instance = client.start("Count", "0").await.unwrap();
    let status = client.wait(&instance, Duration::from_secs(5)).await.unwrap();
    assert_eq!(
        status,
        WorkflowStatus::Completed {
            output: "10".to_string()
        }
    );
}

#[tokio::test]
async fn fan_out_reassembles_results_in_request_order() {
    // Tokyo is requested first but finishes last; the join must not care.
    let workflows = WorkflowRegistry::builder()
        .register("HelloFanOut", hello_fan_out)
        .build();
    let rt = Runtime::start(slow_hello_activities(), workflows).await;
    let client = Client::new(rt);

    let instance = client.start("HelloFanOut", "").await.unwrap();
    let status = client.wait(&instance, Duration::from_secs(5)).await.unwrap();
    assert_eq!(
        status,
        WorkflowStatus::Completed {
            output: "Tokyo-Hello,Seattle-Hello,London-Hello".to_string()
        }
    );
}

#[tokio::test]
async fn fan_out_branches_run_concurrently() {
    // Two slow instances side by side; concurrent dispatch keeps total time
    // near a single instance's longest branch.
    let workflows = WorkflowRegistry::builder()
        .register("HelloFanOut", hello_fan_out)
        .build();
    let rt = Runtime::start(slow_hello_activities(), workflows).await;
    let client = Client::new(rt);

    let started = std::time::Instant::now();
    let a = client.start("HelloFanOut", "").await.unwrap();
    let b = client.start("HelloFanOut", "").await.unwrap();
    let (ra, rb) = futures::future::join(
        client.wait(&a, Duration::from_secs(5)),
        client.wait(&b, Duration::from_secs(5)),
    )
    .await;
    assert!(ra.unwrap().is_terminal());
    assert!(rb.unwrap().is_terminal());
    // Sequential execution would need at least 2 * (120 + 80 + 10) ms.
    assert!(started.elapsed() < Duration::from_millis(400));
}

#[tokio::test]
async fn chain_completes_against_filesystem_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsHistoryStore::new(dir.path(), true));
    let workflows = WorkflowRegistry::builder().register("HelloChain", hello_chain).build();
    let rt = Runtime::start_with_store(store.clone(), hello_activities(), workflows).await;
    let client = Client::new(rt);

    let instance = client.start("HelloChain", "").await.unwrap();
    let status = client.wait(&instance, Duration::from_secs(5)).await.unwrap();
    assert!(matches!(status, WorkflowStatus::Completed { .. }));

    // History is on disk and readable by a fresh handle.
    let reopened = FsHistoryStore::new(dir.path(), false);
    use weft::providers::HistoryStore;
    let history = reopened.read(&instance).await;
    assert!(history.iter().any(|e| e.is_terminal()));
}
