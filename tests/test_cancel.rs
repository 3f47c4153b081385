//! Cancellation, dropped run handles and panicking computations

mod common;

use common::{add, engine};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskflow::{args, Engine, FlowError, InvocationStatus, RetryPolicy, TaskContext, TaskDefinition};

/// Waits until the run is cancelled, then records that it noticed
fn cooperative(engine: &Engine, noticed: Arc<AtomicBool>) -> TaskDefinition {
    engine
        .define(
            "cooperative",
            move |_args: Vec<Value>, ctx: TaskContext| {
                let noticed = Arc::clone(&noticed);
                async move {
                    tokio::select! {
                        _ = ctx.cancelled() => noticed.store(true, Ordering::SeqCst),
                        _ = tokio::time::sleep(Duration::from_secs(10)) => {}
                    }
                    anyhow::Ok(json!("finished anyway"))
                }
            },
            RetryPolicy::none(),
        )
        .unwrap()
}

async fn eventually(flag: &AtomicBool) -> bool {
    for _ in 0..100 {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_cancel_stops_running_and_queued_work() {
    let engine = engine(1);
    let noticed = Arc::new(AtomicBool::new(false));
    let slow = cooperative(&engine, Arc::clone(&noticed));
    let calls = Arc::new(AtomicUsize::new(0));
    let add = add(&engine, Arc::clone(&calls));

    let run = engine.start_run("cancel").unwrap();
    let running = run.submit(&slow, args![]).unwrap();
    let queued = run.submit(&add, args![1, 2]).unwrap();
    let downstream = run.submit(&add, args![&running, 1]).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(run.status(running.invocation()), Some(InvocationStatus::Running));
    assert_eq!(run.status(queued.invocation()), Some(InvocationStatus::Ready));

    run.cancel("operator request");
    let report = run.join().await;

    assert_eq!(report.metrics.cancelled, 3);
    for fut in [&running, &queued, &downstream] {
        match fut.resolve().await.unwrap_err() {
            FlowError::Cancelled { reason, .. } => assert_eq!(reason, "operator request"),
            other => panic!("unexpected error {other:?}"),
        }
    }
    assert!(eventually(&noticed).await, "computation never saw the cancellation");
    // The late "finished anyway" result is discarded
    assert_eq!(run.status(running.invocation()), Some(InvocationStatus::Cancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_submissions_after_cancel_are_cancelled() {
    let engine = engine(2);
    let add = add(&engine, Arc::new(AtomicUsize::new(0)));

    let run = engine.start_run("late_submit").unwrap();
    run.cancel("done early");
    let fut = run.submit(&add, args![1, 1]).unwrap();

    assert!(matches!(fut.try_get(), Some(Err(FlowError::Cancelled { .. }))));
    let report = run.join().await;
    assert_eq!(report.status(fut.invocation()), Some(InvocationStatus::Cancelled));
}

#[tokio::test]
async fn test_dropping_the_run_cancels_open_work() {
    let engine = engine(1);
    let noticed = Arc::new(AtomicBool::new(false));
    let slow = cooperative(&engine, Arc::clone(&noticed));

    let run = engine.start_run("dropped").unwrap();
    let fut = run.submit(&slow, args![]).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(run);

    let err = tokio::time::timeout(Duration::from_secs(1), fut.resolve())
        .await
        .expect("future left hanging after the run was dropped")
        .unwrap_err();
    assert_eq!(err.category(), "cancelled");
    assert!(eventually(&noticed).await);
}

#[tokio::test]
async fn test_panicking_computation_fails_the_invocation() {
    let engine = engine(2);
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let shaky = engine
        .define(
            "shaky",
            move |_args: Vec<Value>, ctx: TaskContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if ctx.attempt() == 1 {
                        panic!("first attempt blew up");
                    }
                    anyhow::Ok(json!("recovered"))
                }
            },
            RetryPolicy::fixed(2, Duration::ZERO),
        )
        .unwrap();
    let add = add(&engine, Arc::new(AtomicUsize::new(0)));

    let run = engine.start_run("panics").unwrap();
    let recovered = run.submit(&shaky, args![]).unwrap();
    let sum = run.submit(&add, args![1, 1]).unwrap();
    let report = run.complete().await.unwrap();

    assert_eq!(recovered.resolve().await.unwrap(), json!("recovered"));
    assert_eq!(sum.resolve().await.unwrap(), json!(2));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(report.metrics.retries, 1);
}

#[tokio::test]
async fn test_panic_on_last_attempt_is_reported() {
    let engine = engine(1);
    let broken = engine
        .define_blocking("broken", |_| panic!("always"), RetryPolicy::none())
        .unwrap();

    let run = engine.start_run("panic_fail").unwrap();
    let fut = run.submit(&broken, args![]).unwrap();
    let report = run.join().await;

    assert_eq!(report.status(fut.invocation()), Some(InvocationStatus::Failed));
    let err = fut.resolve().await.unwrap_err();
    assert!(err.to_string().contains("panicked"), "{err}");
}
