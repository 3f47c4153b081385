//! Random numbers flowing through a few arithmetic tasks.
//!
//! `get_number` draws are independent and run side by side; `add`,
//! `multiply` and `mean` start as soon as their inputs exist.

use anyhow::Result;
use serde_json::{json, Value};
use std::time::Duration;
use taskflow::core::logging;
use taskflow::{
    args, Arity, Engine, EngineConfig, FlowError, RetryPolicy, TaskBuilder, TaskContext,
    TaskDefinition,
};
use tracing::{info, Level};

fn number(value: &Value) -> f64 {
    value.as_f64().unwrap_or_default()
}

fn get_number() -> Result<TaskDefinition> {
    let def = TaskBuilder::new("get_number")
        .description("random n with min <= n <= max")
        .arity(Arity::Fixed(2))
        .retry(RetryPolicy::fixed(2, Duration::from_millis(100)))
        .build(|args: Vec<Value>, ctx: TaskContext| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let min = args[0].as_i64().unwrap_or(1);
            let max = args[1].as_i64().unwrap_or(100).max(min);
            let n = fastrand::i64(min..=max);
            info!(invocation = %ctx.invocation(), n, "random number");
            anyhow::Ok(json!(n))
        })?;
    Ok(def)
}

fn slow_binary(name: &str, delay: Duration, op: fn(f64, f64) -> f64) -> Result<TaskDefinition> {
    let label = name.to_string();
    let def = TaskBuilder::new(name)
        .arity(Arity::Fixed(2))
        .build(move |args: Vec<Value>, _ctx: TaskContext| {
            let label = label.clone();
            async move {
                tokio::time::sleep(delay).await;
                let result = op(number(&args[0]), number(&args[1]));
                info!(task = label.as_str(), result, "computed");
                anyhow::Ok(json!(result))
            }
        })?;
    Ok(def)
}

fn mean() -> Result<TaskDefinition> {
    let def = TaskBuilder::new("mean")
        .arity(Arity::AtLeast(1))
        .build_blocking(|args| {
            std::thread::sleep(Duration::from_millis(800));
            let m = args.iter().map(number).sum::<f64>() / args.len() as f64;
            info!(mean = m, "mean");
            Ok(json!(m))
        })?;
    Ok(def)
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(Level::INFO)?;

    let config = EngineConfig::builder().max_concurrency(4).build()?;
    let engine = Engine::new(config)?;
    let get_number = engine.register(get_number()?)?;
    let add = engine.register(slow_binary("add", Duration::from_millis(700), |a, b| a + b)?)?;
    let multiply = engine.register(slow_binary("multiply", Duration::from_millis(500), |a, b| a * b)?)?;
    let mean = engine.register(mean()?)?;

    let started = std::time::Instant::now();
    let (r, m) = engine
        .run_flow("analysis", |run| async move {
            let n1 = run.submit(&get_number, args![1, 100])?;
            let n2 = run.submit(&get_number, args![1, 100])?;
            let temp_sum = run.submit(&add, args![&n1, &n2])?;
            let n3 = run.submit(&get_number, args![1, 100])?;
            let r = run.submit(&multiply, args![&n3, &temp_sum])?;
            let m = run.submit(&mean, args![&n1, &n2, &n3])?;
            Ok::<_, FlowError>((r, m))
        })
        .await?;

    println!("arbitrary calc: r={}, mean={}", r, m);
    println!("finished in {:.2?}", started.elapsed());
    Ok(())
}
