//! Remote script execution over the system SSH client.
//!
//! Scripts are shipped as a single `bash -c` argument so the remote shell
//! sees exactly the substituted text, with the execution trigger exported
//! into the environment and a hard time limit applied by `timeout(1)`.

use std::ffi::OsString;

use shell_escape::unix::escape;
use tracing::debug;

mod config;
mod types;
mod util;

pub use camino::Utf8PathBuf;
pub use config::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_SSH_PORT, DEFAULT_STEP_TIMEOUT_SECS, RemoteConfig,
};
pub use types::{
    CommandOutput, CommandRunner, ProcessCommandRunner, RemoteCommand, RemoteCommandOutput,
    RemoteError, RemoteExecutor, RemoteTarget,
};
pub use util::expand_tilde;

/// Environment variable carrying the execution trigger into every script.
pub const TRIGGER_ENV: &str = "DEVSTEAD_TRIGGER";

/// Environment variable listing, comma separated, what completed before a
/// script started.
pub const DEPENDS_ON_ENV: &str = "DEVSTEAD_DEPENDS_ON";

/// Grace period given to a timed-out script before it is killed.
const KILL_AFTER_SECS: u64 = 30;

/// Keep-alive interval passed to `ssh -o ServerAliveInterval`.
const SERVER_ALIVE_INTERVAL_SECS: u64 = 15;

/// Runs scripts on a remote host by invoking the `ssh` binary.
#[derive(Clone, Debug)]
pub struct SshExecutor<R: CommandRunner> {
    config: RemoteConfig,
    runner: R,
}

impl SshExecutor<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: RemoteConfig) -> Result<Self, RemoteError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> SshExecutor<R> {
    /// Creates an executor using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: RemoteConfig, runner: R) -> Result<Self, RemoteError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn build_ssh_args(&self, target: &RemoteTarget, command: &RemoteCommand) -> Vec<OsString> {
        let mut args = self.common_ssh_options(target);
        args.push(OsString::from(format!("{}@{}", target.user, target.host)));
        args.push(OsString::from(self.build_remote_command(command)));
        args
    }

    fn common_ssh_options(&self, target: &RemoteTarget) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(target.port.to_string()),
        ];

        if let Some(ref identity_file) = target.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file.as_str())));
        }

        args.push(OsString::from("-o"));
        args.push(OsString::from("BatchMode=yes"));

        if !self.config.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.known_hosts_file
            )));
        }

        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "ConnectTimeout={}",
            self.config.connect_timeout_secs
        )));
        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "ServerAliveInterval={SERVER_ALIVE_INTERVAL_SECS}"
        )));

        args
    }

    fn build_remote_command(&self, command: &RemoteCommand) -> String {
        let trigger = escape(command.trigger.as_str().into());
        let depends_on = command.dependencies.join(",");
        let body = escape(command.body.as_str().into());
        let env = format!(
            "{TRIGGER_ENV}={trigger} {DEPENDS_ON_ENV}={}",
            escape(depends_on.as_str().into())
        );
        if self.config.step_timeout_secs == 0 {
            return format!("{env} bash -c {body}");
        }
        format!(
            "{env} timeout --kill-after={KILL_AFTER_SECS} {} bash -c {body}",
            self.config.step_timeout_secs
        )
    }
}

impl<R: CommandRunner> RemoteExecutor for SshExecutor<R> {
    fn execute(
        &self,
        target: &RemoteTarget,
        command: &RemoteCommand,
    ) -> Result<RemoteCommandOutput, RemoteError> {
        let args = self.build_ssh_args(target, command);
        debug!(
            host = %target.host,
            label = %command.label,
            "running remote command"
        );
        let output = self.runner.run(&self.config.ssh_bin, &args)?;

        Ok(RemoteCommandOutput {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
