//! Core remote execution types and the process runner abstraction.

use std::ffi::OsString;
use std::process::Command;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| RemoteError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Connection details for the host that receives provisioning scripts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteTarget {
    /// DNS name or IP address of the host.
    pub host: String,
    /// TCP port for SSH.
    pub port: u16,
    /// Login user on the remote host.
    pub user: String,
    /// Private key used to authenticate, when not left to the SSH defaults.
    pub identity_file: Option<Utf8PathBuf>,
}

/// A script body bound for a remote host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommand {
    /// Human readable label used in logs (typically the script file name).
    pub label: String,
    /// Shell script text, already variable-substituted.
    pub body: String,
    /// Execution trigger tied to the identity of the compute resource.
    pub trigger: String,
    /// Names of resources and steps that completed before this command.
    pub dependencies: Vec<String>,
}

/// Output captured from a remote command executed over SSH.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommandOutput {
    /// Exit code reported by the remote command, if any.
    pub exit_code: Option<i32>,
    /// Captured standard output stream.
    pub stdout: String,
    /// Captured standard error stream.
    pub stderr: String,
}

impl RemoteCommandOutput {
    /// Returns `true` when the remote command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Capability for running a script on a remote host.
pub trait RemoteExecutor {
    /// Executes `command` against `target` and returns its captured output.
    ///
    /// A non-zero exit status is not an error at this layer; callers inspect
    /// [`RemoteCommandOutput::is_success`].
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the transport cannot be started.
    fn execute(
        &self,
        target: &RemoteTarget,
        command: &RemoteCommand,
    ) -> Result<RemoteCommandOutput, RemoteError>;
}

/// Errors surfaced while executing commands locally or remotely.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}: set DEVSTEAD_SSH_{env_suffix} or add {field} to devstead.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
}
