//! Retry policies, timeouts and retry worker pools

mod common;

use common::engine;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskflow::{
    args, Backoff, BufferingEventSink, Engine, EngineConfig, FlowError, InvocationStatus, RetryOn,
    RetryPolicy, RunEvent, TaskBuilder, TaskContext, TaskDefinition,
};

/// Fails until it has been called `failures` times, then returns "ok"
fn flaky(
    engine: &Engine,
    name: &str,
    failures: u32,
    policy: RetryPolicy,
) -> (TaskDefinition, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let def = engine
        .define_blocking(
            name,
            move |_| {
                let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if call <= failures {
                    anyhow::bail!("attempt {} failed", call);
                }
                Ok(json!("ok"))
            },
            policy,
        )
        .unwrap();
    (def, calls)
}

#[tokio::test]
async fn test_fails_twice_then_succeeds() {
    let sink = Arc::new(BufferingEventSink::new());
    let engine = engine(2).with_event_sink(sink.clone());
    let (def, calls) = flaky(&engine, "flaky", 2, RetryPolicy::fixed(3, Duration::from_millis(10)));

    let run = engine.start_run("retry").unwrap();
    let fut = run.submit(&def, args![]).unwrap();
    let report = run.complete().await.unwrap();

    assert_eq!(fut.resolve().await.unwrap(), json!("ok"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.get(fut.invocation()).unwrap().attempts, 3);
    assert_eq!(report.metrics.retries, 2);

    let retries: Vec<u32> = sink
        .payloads()
        .into_iter()
        .filter_map(|event| match event {
            RunEvent::RetryScheduled { attempt, .. } => Some(attempt),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2]);
}

#[tokio::test]
async fn test_exhausted_retries_keep_last_error() {
    let engine = engine(2);
    let (def, calls) = flaky(&engine, "hopeless", 10, RetryPolicy::fixed(3, Duration::ZERO));

    let run = engine.start_run("exhaust").unwrap();
    let fut = run.submit(&def, args![]).unwrap();
    let report = run.join().await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.status(fut.invocation()), Some(InvocationStatus::Failed));
    match fut.resolve().await.unwrap_err() {
        FlowError::TaskExecution { attempt, source, .. } => {
            assert_eq!(attempt, 3);
            assert_eq!(source.to_string(), "attempt 3 failed");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_retry_predicate_can_refuse() {
    let engine = engine(1);
    let policy = RetryPolicy::fixed(5, Duration::ZERO)
        .retry_if(|err| !err.to_string().contains("attempt 1"));
    let (def, calls) = flaky(&engine, "picky", 3, policy);

    let run = engine.start_run("predicate").unwrap();
    let fut = run.submit(&def, args![]).unwrap();
    run.join().await;

    assert!(fut.resolve().await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_backoff_does_not_hold_a_worker() {
    // One worker: while the flaky task waits out a long backoff, the quick
    // task must still get to run.
    let engine = engine(1);
    let policy = RetryPolicy::fixed(2, Duration::from_millis(300));
    let (flaky_def, _) = flaky(&engine, "slow_retry", 1, policy);
    let quick = engine
        .define_blocking("quick", |_| Ok(json!("quick")), RetryPolicy::none())
        .unwrap();

    let run = engine.start_run("backoff").unwrap();
    let slow = run.submit(&flaky_def, args![]).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let fast = run.submit(&quick, args![]).unwrap();

    let quick_value = tokio::time::timeout(Duration::from_millis(200), fast.resolve())
        .await
        .expect("quick task was starved by a backoff");
    assert_eq!(quick_value.unwrap(), json!("quick"));
    assert_eq!(run.status(slow.invocation()), Some(InvocationStatus::AwaitingRetry));

    assert_eq!(slow.resolve().await.unwrap(), json!("ok"));
    run.join().await;
}

#[tokio::test]
async fn test_timeout_is_retried_and_reported() {
    let engine = engine(2);
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let def = TaskBuilder::new("sometimes_slow")
        .timeout(Duration::from_millis(50))
        .retry(RetryPolicy::fixed(2, Duration::ZERO).with_condition(RetryOn::TimeoutsOnly))
        .build(move |_args: Vec<Value>, ctx: TaskContext| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if ctx.attempt() == 1 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                anyhow::Ok(json!(ctx.attempt()))
            }
        })
        .unwrap();
    let def = engine.register(def).unwrap();

    let run = engine.start_run("timeouts").unwrap();
    let fut = run.submit(&def, args![]).unwrap();
    assert_eq!(fut.resolve().await.unwrap(), json!(2));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    run.join().await;
}

#[tokio::test]
async fn test_timed_out_blocking_attempt_is_not_overlapped_by_its_retry() {
    let engine = engine(1);
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicU32::new(0));
    let (c, p, n) = (Arc::clone(&current), Arc::clone(&peak), Arc::clone(&calls));
    let def = TaskBuilder::new("stuck")
        .timeout(Duration::from_millis(50))
        .retry(RetryPolicy::fixed(3, Duration::ZERO))
        .build_blocking(move |_| {
            n.fetch_add(1, Ordering::SeqCst);
            let now = c.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            c.fetch_sub(1, Ordering::SeqCst);
            Ok(json!("late"))
        })
        .unwrap();
    let def = engine.register(def).unwrap();

    let run = engine.start_run("stuck_blocking").unwrap();
    let fut = run.submit(&def, args![]).unwrap();
    let err = fut.resolve().await.unwrap_err();
    assert!(matches!(err, FlowError::Timeout { attempt: 3, .. }), "got {err:?}");

    // Every attempt's body has returned by the time the failure is final.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(current.load(Ordering::SeqCst), 0);
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    let report = run.join().await;
    assert_eq!(report.metrics.max_running, 1);
    assert_eq!(report.metrics.retries, 2);
}

#[tokio::test]
async fn test_default_timeout_fails_without_retry() {
    let config = EngineConfig::builder()
        .max_concurrency(2)
        .default_timeout(Some(Duration::from_millis(30)))
        .build()
        .unwrap();
    let engine = Engine::new(config).unwrap();
    let sleepy = engine
        .define(
            "sleepy",
            |_args: Vec<Value>, _ctx: TaskContext| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                anyhow::Ok(Value::Null)
            },
            RetryPolicy::none(),
        )
        .unwrap();

    let run = engine.start_run("default_timeout").unwrap();
    let fut = run.submit(&sleepy, args![]).unwrap();
    let err = fut.resolve().await.unwrap_err();
    assert!(matches!(err, FlowError::Timeout { attempt: 1, .. }), "got {err:?}");
    assert_eq!(err.category(), "timeout");
    run.join().await;
}

#[tokio::test]
async fn test_dedicated_retry_pool() {
    let config = EngineConfig::builder()
        .max_concurrency(1)
        .dedicated_retry_slots(1)
        .build()
        .unwrap();
    let engine = Engine::new(config).unwrap();
    let (def, calls) = flaky(
        &engine,
        "flaky",
        1,
        RetryPolicy::exponential(3, Duration::from_millis(50))
            .with_backoff(Backoff::Fixed(Duration::from_millis(50))),
    );
    let blocker = engine
        .define(
            "blocker",
            |_args: Vec<Value>, _ctx: TaskContext| async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                anyhow::Ok(json!("done"))
            },
            RetryPolicy::none(),
        )
        .unwrap();

    let run = engine.start_run("dedicated").unwrap();
    let flaky_fut = run.submit(&def, args![]).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    // The first attempt has failed and the only fresh slot is now busy for
    // a while. The retry comes due meanwhile and must use its own slot.
    let blocked = run.submit(&blocker, args![]).unwrap();

    let value = tokio::time::timeout(Duration::from_millis(200), flaky_fut.resolve())
        .await
        .expect("retry waited for the fresh pool");
    assert_eq!(value.unwrap(), json!("ok"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(blocked.resolve().await.unwrap(), json!("done"));
    run.join().await;
}
