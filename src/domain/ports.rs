//! Domain Ports - Capabilities the storage core consumes
//!
//! The core never spawns processes or reads CPU information directly; it goes
//! through these traits so orchestration logic runs unchanged against the
//! host or against scripted fakes.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Command Types
// =============================================================================

/// A structured command invocation: program plus argument vector.
///
/// Arguments are passed to the OS as-is and never joined into a shell string,
/// so user-controlled names and device paths cannot inject extra commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program to execute (binary name or absolute path)
    pub program: String,
    /// Argument vector, excluding the program itself
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Create a command with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Full argv, program first
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl std::fmt::Display for CommandSpec {
    // Display only; never fed back to a shell
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert a non-zero exit into `CommandExecution`, keeping stderr verbatim
    pub fn into_stdout(self, command: &CommandSpec) -> Result<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(crate::error::Error::CommandExecution {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// Outputs of a two-stage producer | consumer pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineOutput {
    /// Producer stage (stdout was consumed by the pipe)
    pub producer: CommandOutput,
    /// Consumer stage
    pub consumer: CommandOutput,
}

// =============================================================================
// Command Runner Port
// =============================================================================

/// Port for process execution
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output.
    ///
    /// A non-zero exit is returned as `Ok` with the exit code set; only a
    /// failure to launch the process is an `Err`.
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput>;

    /// Run `producer | consumer`, capturing both stages independently
    async fn pipe(&self, producer: &CommandSpec, consumer: &CommandSpec)
        -> Result<PipelineOutput>;
}

// =============================================================================
// CPU Inspector Port
// =============================================================================

/// Port for CPU and architecture inspection
#[async_trait]
pub trait CpuInspector: Send + Sync {
    /// Machine architecture string (as `uname -m` reports it)
    async fn architecture(&self) -> Result<String>;

    /// Raw `/proc/cpuinfo`-style text
    async fn cpuinfo(&self) -> Result<String>;

    /// Raw `lscpu`-style text
    async fn lscpu(&self) -> Result<String>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type CommandRunnerRef = Arc<dyn CommandRunner>;
pub type CpuInspectorRef = Arc<dyn CpuInspector>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use assert_matches::assert_matches;

    #[test]
    fn test_command_spec_display_quotes_whitespace() {
        let cmd = CommandSpec::new("zfs")
            .arg("create")
            .args(["-o", "quota=10G"])
            .arg("tank/my data");
        assert_eq!(cmd.to_string(), "zfs create -o quota=10G \"tank/my data\"");
        assert_eq!(cmd.argv(), vec!["zfs", "create", "-o", "quota=10G", "tank/my data"]);
    }

    #[test]
    fn test_into_stdout_maps_exit_code() {
        let cmd = CommandSpec::new("zpool").arg("scrub").arg("tank");
        assert_eq!(
            CommandOutput::ok("done").into_stdout(&cmd).unwrap(),
            "done"
        );

        let err = CommandOutput::failed(1, "cannot open 'tank': no such pool")
            .into_stdout(&cmd)
            .unwrap_err();
        assert_matches!(
            err,
            Error::CommandExecution { exit_code: 1, ref stderr, .. }
                if stderr == "cannot open 'tank': no such pool"
        );
    }
}
