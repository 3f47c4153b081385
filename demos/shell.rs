//! Shell commands as tasks: a directory listing, a chained pipeline and a
//! sequence that keeps going past a failing command.

use anyhow::Result;
use std::collections::BTreeMap;
use std::time::Duration;
use taskflow::core::logging;
use taskflow::{args, Engine, EngineConfig, FlowError, RetryPolicy, ShellCommand};
use tracing::Level;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(Level::INFO)?;

    let config = EngineConfig::builder()
        .max_concurrency(3)
        .default_timeout(Some(Duration::from_secs(30)))
        .partial_results(true)
        .build()?;
    let engine = Engine::new(config)?;

    let listing = engine.register(
        ShellCommand::new(["ls -la"])
            .working_dir(std::env::current_dir()?)
            .stream_output(true)
            .return_all(true)
            .into_definition("list_files")?,
    )?;
    let pipeline = engine.register(
        ShellCommand::new([
            "echo 'Step 1: Getting system info'",
            "uname -a",
            "echo 'Step 2: Listing current directory'",
            "ls -1",
        ])
        .stream_output(true)
        .into_definition_with_retry("pipeline", RetryPolicy::fixed(2, Duration::from_secs(1)))?,
    )?;
    let tolerant = engine.register(
        ShellCommand::new([
            "echo 'This will succeed'",
            "nonexistent_command_12345",
            "echo 'Still running after the failure'",
        ])
        .stream_output(true)
        .continue_on_error(true)
        .return_all(true)
        .into_definition("keeps_going")?,
    )?;

    let results = engine
        .run_flow("shell_workflow", |run| async move {
            let mut results = BTreeMap::new();
            results.insert("build".to_string(), run.submit(&listing, args![])?);
            results.insert("pipeline".to_string(), run.submit(&pipeline, args![])?);
            results.insert("errors".to_string(), run.submit(&tolerant, args![])?);
            Ok::<_, FlowError>(results)
        })
        .await?;

    for (name, value) in &results {
        println!("== {name} ==");
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}
