//! Lifecycle events reported to a custom sink

mod common;

use common::{add, always_fail, engine};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use taskflow::{
    args, BufferingEventSink, EventSink, InvocationId, InvocationStatus, Run, RunEvent,
    RunEventEnvelope,
};

fn kinds_for(sink: &BufferingEventSink, invocation: InvocationId) -> Vec<&'static str> {
    sink.payloads()
        .into_iter()
        .filter(|event| event.invocation() == Some(invocation))
        .map(|event| match event {
            RunEvent::Submitted { .. } => "submitted",
            RunEvent::Started { .. } => "started",
            RunEvent::RetryScheduled { .. } => "retry",
            RunEvent::Succeeded { .. } => "succeeded",
            RunEvent::Failed { .. } => "failed",
            RunEvent::DependencyFailed { .. } => "dependency_failed",
            RunEvent::Cancelled { .. } => "cancelled",
            RunEvent::RunCancelled { .. } => "run_cancelled",
        })
        .collect()
}

#[tokio::test]
async fn test_events_follow_the_lifecycle() {
    let sink = Arc::new(BufferingEventSink::new());
    let engine = engine(2).with_event_sink(sink.clone());
    let add = add(&engine, Arc::new(AtomicUsize::new(0)));
    let fail = always_fail(&engine, "fail");

    let run = engine.start_run("events").unwrap();
    let ok = run.submit(&add, args![1, 2]).unwrap();
    let bad = run.submit(&fail, args![]).unwrap();
    let skipped = run.submit(&add, args![&ok, &bad]).unwrap();
    run.join().await;

    assert_eq!(kinds_for(&sink, ok.invocation()), vec!["submitted", "started", "succeeded"]);
    assert_eq!(kinds_for(&sink, bad.invocation()), vec!["submitted", "started", "failed"]);
    assert_eq!(
        kinds_for(&sink, skipped.invocation()),
        vec!["submitted", "dependency_failed"]
    );

    let envelopes = sink.events();
    assert!(envelopes.windows(2).all(|pair| pair[0].sequence < pair[1].sequence));
    assert!(envelopes.iter().all(|e| e.run_name == "events" && e.run_id == run.id().to_string()));

    let submitted = envelopes
        .iter()
        .find_map(|e| match &e.event {
            RunEvent::Submitted {
                invocation,
                upstream,
                ..
            } if *invocation == skipped.invocation() => Some(upstream.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(submitted, vec![ok.invocation(), bad.invocation()]);
}

#[tokio::test]
async fn test_run_cancellation_is_announced_once() {
    let sink = Arc::new(BufferingEventSink::new());
    let engine = engine(1).with_event_sink(sink.clone());

    let run = engine.start_run("cancel_events").unwrap();
    run.cancel("first");
    run.cancel("second");
    run.join().await;

    let announced: Vec<String> = sink
        .payloads()
        .into_iter()
        .filter_map(|event| match event {
            RunEvent::RunCancelled { reason } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(announced, vec!["first".to_string()]);
}

/// Looks up the run's view of every invocation it hears about
#[derive(Default)]
struct StatusRecorder {
    run: Mutex<Option<Run>>,
    seen: Mutex<Vec<(InvocationId, Option<InvocationStatus>)>>,
}

impl EventSink for StatusRecorder {
    fn emit(&self, envelope: &RunEventEnvelope) {
        let Some(invocation) = envelope.event.invocation() else {
            return;
        };
        if let Some(run) = self.run.lock().as_ref() {
            let status = run.status(invocation);
            let _ = run.report();
            self.seen.lock().push((invocation, status));
        }
    }
}

#[tokio::test]
async fn test_sink_may_query_the_run() {
    let recorder = Arc::new(StatusRecorder::default());
    let engine = engine(2).with_event_sink(recorder.clone());
    let add = add(&engine, Arc::new(AtomicUsize::new(0)));

    let run = engine.start_run("reentrant").unwrap();
    *recorder.run.lock() = Some(run.clone());
    let first = run.submit(&add, args![1, 2]).unwrap();
    let second = run.submit(&add, args![&first, 3]).unwrap();

    tokio::time::timeout(Duration::from_secs(5), run.join())
        .await
        .expect("sink deadlocked the run");
    assert_eq!(second.resolve().await.unwrap(), serde_json::json!(6));

    let seen = recorder.seen.lock().clone();
    // submitted, started and succeeded for each invocation
    assert_eq!(seen.len(), 6);
    assert!(seen.iter().all(|(_, status)| status.is_some()));
    assert_eq!(
        seen.last().copied(),
        Some((second.invocation(), Some(InvocationStatus::Succeeded)))
    );

    // Break the run <-> sink cycle so dropping the run shuts it down
    recorder.run.lock().take();
}
