//! Tasks that run shell commands.
//!
//! ```ignore
//! let listing = ShellCommand::new(["ls -la"])
//!     .working_dir(std::env::current_dir()?)
//!     .return_all(true)
//!     .into_definition("list_files")?;
//! let out = run.submit(&listing, args![])?;
//! ```

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::core::errors::Result;
use crate::task::{Arity, Computation, RetryPolicy, TaskBuilder, TaskContext, TaskDefinition};

/// A sequence of shell commands run one after another.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    commands: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    stream_output: bool,
    continue_on_error: bool,
    return_all: bool,
    shell: String,
}

/// What one command produced
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn to_json(&self) -> Value {
        json!({
            "command": self.command,
            "stdout": self.stdout,
            "stderr": self.stderr,
            "exit_code": self.exit_code,
        })
    }
}

impl ShellCommand {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: BTreeMap::new(),
            stream_output: false,
            continue_on_error: false,
            return_all: false,
            shell: "sh".to_string(),
        }
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Log every output line as it arrives
    pub fn stream_output(mut self, enabled: bool) -> Self {
        self.stream_output = enabled;
        self
    }

    /// Keep going after a command exits non-zero
    pub fn continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = enabled;
        self
    }

    /// Return every command's output instead of the last stdout
    pub fn return_all(mut self, enabled: bool) -> Self {
        self.return_all = enabled;
        self
    }

    /// Shell program, invoked as `<shell> -c <command>`
    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Wrap as a zero-argument task definition
    pub fn into_definition(self, name: impl Into<String>) -> Result<TaskDefinition> {
        self.builder_for(name).build(self)
    }

    /// Same as [`ShellCommand::into_definition`] with a retry policy
    pub fn into_definition_with_retry(
        self,
        name: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<TaskDefinition> {
        self.builder_for(name).retry(retry).build(self)
    }

    fn builder_for(&self, name: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(name)
            .arity(Arity::Fixed(0))
            .description(self.commands.join(" && "))
    }

    /// Run all commands and collect their outputs. Stops at the first
    /// non-zero exit unless `continue_on_error` is set.
    pub async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<Vec<CommandOutput>> {
        let mut outputs = Vec::with_capacity(self.commands.len());
        for command in &self.commands {
            if ctx.is_cancelled() {
                return Err(anyhow!("cancelled before running `{}`", command));
            }
            let output = self.run_one(command, ctx).await?;
            if !output.success() {
                if self.continue_on_error {
                    warn!(task = ctx.task_name(), command = command.as_str(), exit_code = ?output.exit_code, "command failed, continuing");
                } else {
                    return Err(anyhow!(
                        "command `{}` exited with {:?}: {}",
                        command,
                        output.exit_code,
                        output.stderr.trim()
                    ));
                }
            }
            outputs.push(output);
        }
        Ok(outputs)
    }

    async fn run_one(&self, command: &str, ctx: &TaskContext) -> anyhow::Result<CommandOutput> {
        debug!(task = ctx.task_name(), command, "running shell command");
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to start `{}`", command))?;
        let stdout = child.stdout.take().context("stdout not captured")?;
        let stderr = child.stderr.take().context("stderr not captured")?;

        let task = ctx.task_name();
        let (stdout, stderr, status) = tokio::try_join!(
            collect_lines(stdout, self.stream_output, task, "stdout"),
            collect_lines(stderr, self.stream_output, task, "stderr"),
            async { child.wait().await.map_err(anyhow::Error::from) },
        )?;

        Ok(CommandOutput {
            command: command.to_string(),
            stdout,
            stderr,
            exit_code: status.code(),
        })
    }
}

async fn collect_lines<R>(
    reader: R,
    stream: bool,
    task: &str,
    channel: &'static str,
) -> anyhow::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut collected = String::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        // Output is not required to be UTF-8.
        let decoded = String::from_utf8_lossy(&buf);
        let line = decoded.trim_end_matches(&['\n', '\r'][..]);
        if stream {
            info!(task, channel, "{}", line);
        }
        collected.push_str(line);
        collected.push('\n');
    }
    Ok(collected)
}

#[async_trait]
impl Computation for ShellCommand {
    async fn call(&self, _args: Vec<Value>, ctx: TaskContext) -> anyhow::Result<Value> {
        let outputs = self.execute(&ctx).await?;
        if self.return_all {
            return Ok(Value::Array(outputs.iter().map(CommandOutput::to_json).collect()));
        }
        let last = outputs
            .last()
            .map(|output| output.stdout.trim().to_string())
            .unwrap_or_default();
        Ok(Value::String(last))
    }
}
