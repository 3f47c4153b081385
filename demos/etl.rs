//! extract >> transform >> load
//!
//! `transform` consumes the extracted values directly. `load` is ordered
//! after `transform` with `wait_for` and reads the same value it produced.

use anyhow::Result;
use serde_json::{json, Value};
use std::time::Duration;
use taskflow::core::logging;
use taskflow::{args, Engine, EngineConfig, RetryPolicy, SubmitOptions};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(Level::INFO)?;

    let config = EngineConfig::builder().max_concurrency(2).build()?;
    let engine = Engine::new(config)?;
    let retry_once = RetryPolicy::fixed(2, Duration::from_millis(200));

    let extract = engine.define_blocking(
        "extract",
        |_| {
            let data: Vec<i64> = (0..5).map(|_| fastrand::i64(1..=100)).collect();
            info!(?data, "extracted");
            Ok(json!(data))
        },
        retry_once.clone(),
    )?;
    let transform = engine.define_blocking(
        "transform",
        |args| {
            let transformed: Vec<i64> = args[0]
                .as_array()
                .map(|data| data.iter().filter_map(Value::as_i64).map(|x| x * 2).collect())
                .unwrap_or_default();
            info!(?transformed, "transformed");
            Ok(json!(transformed))
        },
        retry_once.clone(),
    )?;
    let load = engine.define_blocking(
        "load",
        |args| {
            let loaded = args[0].as_array().map(Vec::len).unwrap_or_default();
            info!(loaded, "total items processed");
            Ok(json!(loaded))
        },
        retry_once,
    )?;

    let run = engine.start_run("simple_data_pipeline")?;
    let extracted = run.submit(&extract, args![])?;
    let transformed = run.submit(&transform, args![&extracted])?;
    let loaded = run.submit_with(
        &load,
        args![&transformed],
        SubmitOptions::wait_for([&transformed]),
    )?;
    let report = run.complete().await?;

    println!("{}", run.to_dot());
    println!("loaded {} items", loaded.resolve().await?);
    println!(
        "succeeded={} retries={} elapsed={:?}",
        report.metrics.succeeded, report.metrics.retries, report.metrics.elapsed
    );
    Ok(())
}
