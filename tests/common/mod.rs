//! Shared helpers for the integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskflow::{
    Arity, Engine, EngineConfig, RetryPolicy, TaskBuilder, TaskContext, TaskDefinition,
};

pub fn engine(max_concurrency: usize) -> Engine {
    let config = EngineConfig::builder()
        .max_concurrency(max_concurrency)
        .log_level("debug")
        .build()
        .unwrap();
    Engine::new(config).unwrap()
}

pub fn partial_engine(max_concurrency: usize) -> Engine {
    let config = EngineConfig::builder()
        .max_concurrency(max_concurrency)
        .partial_results(true)
        .build()
        .unwrap();
    Engine::new(config).unwrap()
}

pub fn int(value: &Value) -> i64 {
    value.as_i64().unwrap_or_default()
}

/// `add(a, b) = a + b`, counting how often it actually runs
pub fn add(engine: &Engine, calls: Arc<AtomicUsize>) -> TaskDefinition {
    let def = TaskBuilder::new("add")
        .arity(Arity::Fixed(2))
        .build_blocking(move |args| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!(int(&args[0]) + int(&args[1])))
        })
        .unwrap();
    engine.register(def).unwrap()
}

/// A task that always raises
pub fn always_fail(engine: &Engine, name: &str) -> TaskDefinition {
    engine
        .define_blocking(name, |_| anyhow::bail!("always fails"), RetryPolicy::none())
        .unwrap()
}

/// Tracks how many computations run at once and in which order they start
#[derive(Default)]
pub struct Probe {
    current: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn work(&self, label: String, duration: Duration) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.lock().push(label);
        tokio::time::sleep(duration).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }
}

/// Sleeps for `millis`, records itself in `probe`, returns its label
pub fn probed(engine: &Engine, name: &str, probe: Arc<Probe>, millis: u64) -> TaskDefinition {
    engine
        .define(
            name,
            move |args: Vec<Value>, _ctx: TaskContext| {
                let probe = Arc::clone(&probe);
                async move {
                    let label = args
                        .first()
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    probe.work(label.clone(), Duration::from_millis(millis)).await;
                    anyhow::Ok(json!(label))
                }
            },
            RetryPolicy::none(),
        )
        .unwrap()
}
