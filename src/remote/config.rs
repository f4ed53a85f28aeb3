//! SSH transport configuration.
//!
//! [`RemoteConfig`] captures how the system `ssh` client is invoked when
//! provisioning scripts run against the new host. Values are layered by
//! `ortho-config` from defaults, `devstead.toml`, and `DEVSTEAD_SSH_*`
//! environment variables.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::ConfigError;

use super::types::RemoteError;

/// Default SSH port exposed by freshly provisioned instances.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default connect timeout passed to `ssh -o ConnectTimeout`.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default upper bound for a single provisioning script.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 1800;

/// SSH client settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DEVSTEAD_SSH",
    discovery(
        app_name = "devstead",
        env_var = "DEVSTEAD_CONFIG_PATH",
        config_file_name = "devstead.toml",
        dotfile_name = ".devstead.toml",
        project_file_name = "devstead.toml"
    )
)]
pub struct RemoteConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `ssh-keygen` executable.
    #[ortho_config(default = "ssh-keygen".to_owned())]
    pub ssh_keygen_bin: String,
    /// TCP port used to reach the instance.
    #[ortho_config(default = DEFAULT_SSH_PORT)]
    pub port: u16,
    /// Seconds to wait for the TCP connection before giving up.
    #[ortho_config(default = DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout_secs: u64,
    /// Seconds a single script may run before the remote `timeout` kills it.
    /// Zero disables the limit.
    #[ortho_config(default = DEFAULT_STEP_TIMEOUT_SECS)]
    pub step_timeout_secs: u64,
    /// Whether to enforce host key checking; ephemeral instances reuse
    /// addresses, so the default is off.
    #[ortho_config(default = false)]
    pub strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null` for ephemeral hosts.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub known_hosts_file: String,
}

impl RemoteConfig {
    /// Loads configuration from defaults, configuration files, and
    /// environment variables without parsing process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("devstead")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures required values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] naming the first empty field.
    pub fn validate(&self) -> Result<(), RemoteError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.ssh_keygen_bin, "ssh_keygen_bin")?;
        if self.port == 0 {
            return Err(RemoteError::InvalidConfig {
                field: String::from("port"),
            });
        }
        if self.connect_timeout_secs == 0 {
            return Err(RemoteError::InvalidConfig {
                field: String::from("connect_timeout_secs"),
            });
        }
        Ok(())
    }

    fn require_value(value: &str, field: &str) -> Result<(), RemoteError> {
        if value.trim().is_empty() {
            return Err(RemoteError::InvalidConfig {
                field: field.to_owned(),
            });
        }
        Ok(())
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            ssh_keygen_bin: String::from("ssh-keygen"),
            port: DEFAULT_SSH_PORT,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            strict_host_key_checking: false,
            known_hosts_file: String::from("/dev/null"),
        }
    }
}
