//! System Command Runner
//!
//! Executes structured commands with `tokio::process`. Arguments go straight
//! to `execve`; nothing is ever handed to a shell. Child processes are not
//! killed when the awaiting future is dropped, so a caller that gives up
//! leaves the backend operation to finish on its own.

use crate::domain::ports::{CommandOutput, CommandRunner, CommandSpec, PipelineOutput};
use crate::error::{Error, Result};
use crate::metrics::CommandMetrics;
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

/// [`CommandRunner`] backed by the host's process table
#[derive(Clone, Default)]
pub struct SystemCommandRunner {
    metrics: Option<CommandMetrics>,
}

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: CommandMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args).kill_on_drop(false);
        command
    }

    fn observe(&self, spec: &CommandSpec, outcome: &str, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.observe(&spec.program, outcome, started.elapsed());
        }
    }
}

/// Map a spawn failure; a missing binary is its own error
fn spawn_error(spec: &CommandSpec, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::CommandUnavailable {
            program: spec.program.clone(),
        }
    } else {
        Error::Io(e)
    }
}

/// Exit code, or 128 + signal for signal-terminated processes
fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

fn captured(output: std::process::Output) -> CommandOutput {
    CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: exit_code(&output.status),
    }
}

fn outcome(output: &CommandOutput) -> &'static str {
    if output.success() {
        "ok"
    } else {
        "failed"
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec, "Executing command");
        let started = Instant::now();

        let output = Self::command(spec)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                self.observe(spec, "unavailable", started);
                spawn_error(spec, e)
            })?;
        let output = captured(output);

        self.observe(spec, outcome(&output), started);
        if !output.success() {
            warn!(
                command = %spec,
                exit_code = output.exit_code,
                stderr = %output.stderr.trim(),
                "Command failed"
            );
        }
        Ok(output)
    }

    async fn pipe(&self, producer: &CommandSpec, consumer: &CommandSpec) -> Result<PipelineOutput> {
        debug!(producer = %producer, consumer = %consumer, "Executing pipeline");
        let started = Instant::now();

        let mut producer_child = Self::command(producer)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(producer, e))?;

        let producer_stdout = producer_child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("producer stdout was not captured".into()))?;
        let consumer_stdin: Stdio = producer_stdout.try_into()?;

        let consumer_child = match Self::command(consumer)
            .stdin(consumer_stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                // Without a reader the producer would block on a full pipe
                if let Err(kill_err) = producer_child.kill().await {
                    warn!("Failed to stop producer {}: {}", producer, kill_err);
                }
                return Err(spawn_error(consumer, e));
            }
        };

        let (producer_result, consumer_result) = tokio::join!(
            producer_child.wait_with_output(),
            consumer_child.wait_with_output()
        );
        let output = PipelineOutput {
            producer: captured(producer_result?),
            consumer: captured(consumer_result?),
        };

        self.observe(producer, outcome(&output.producer), started);
        self.observe(consumer, outcome(&output.consumer), started);
        Ok(output)
    }
}
