//! Configuration loading via `ortho-config`.
//!
//! [`DevServerConfig`] is the raw, layered view (defaults, `devstead.toml`,
//! `DEVSTEAD_*` environment variables). [`DevServerConfig::into_settings`]
//! validates it once into an immutable [`Settings`] snapshot that the rest
//! of the crate reads from.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{ConfigDiscovery, OrthoConfig, toml};
use serde::Deserialize;
use thiserror::Error;

use crate::files::{self, FileError};
use crate::remote::expand_tilde;

const APP_NAME: &str = "devstead";
const CONFIG_ENV_VAR: &str = "DEVSTEAD_CONFIG_PATH";
const CONFIG_FILE_NAME: &str = "devstead.toml";
const DOTFILE_NAME: &str = ".devstead.toml";
const PROJECT_FILE_NAME: &str = "devstead.toml";
const VARIABLES_SECTION: &str = "variables";

/// Default remote account created for the developer.
pub const DEFAULT_USERNAME: &str = "coder";
/// Default operating system distribution selecting the script set.
pub const DEFAULT_OS_DIST: &str = "ubuntu";
/// Default boot disk size in gigabytes.
pub const DEFAULT_DISK_SIZE_GB: u32 = 128;
/// Default time allowed for the bootstrap payload to finish.
pub const DEFAULT_BOOT_TIMEOUT_SECS: u64 = 900;
/// Default interval between boot completion probes.
pub const DEFAULT_BOOT_POLL_INTERVAL_SECS: u64 = 5;
/// Longest accepted wait for the bootstrap payload, one day.
pub const MAX_BOOT_TIMEOUT_SECS: u64 = 86_400;

/// Development server settings loaded from layered sources.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DEVSTEAD",
    discovery(
        app_name = "devstead",
        env_var = "DEVSTEAD_CONFIG_PATH",
        config_file_name = "devstead.toml",
        dotfile_name = ".devstead.toml",
        project_file_name = "devstead.toml"
    )
)]
pub struct DevServerConfig {
    /// Short host name; combined with `hosted_zone` to form the domain.
    pub hostname: Option<String>,
    /// DNS zone the host is published under.
    pub hosted_zone: Option<String>,
    /// Operator email, used for certificate registration.
    pub email: Option<String>,
    /// Account created on the server for the developer.
    #[ortho_config(default = DEFAULT_USERNAME.to_owned())]
    pub username: String,
    /// Login user for SSH; defaults per distribution when unset.
    pub ssh_user: Option<String>,
    /// Distribution whose script set is used.
    #[ortho_config(default = DEFAULT_OS_DIST.to_owned())]
    pub os_dist: String,
    /// Compute flavour requested from the backend.
    #[ortho_config(default = "t3.large".to_owned())]
    pub instance_type: String,
    /// Boot disk size in gigabytes.
    #[ortho_config(default = DEFAULT_DISK_SIZE_GB)]
    pub disk_size_gb: u32,
    /// Root of the `<os_dist>/{userdata,provisioning}` script tree.
    #[ortho_config(default = "scripts".to_owned())]
    pub scripts_dir: String,
    /// Directory holding SSH keys and the client configuration file.
    #[ortho_config(default = "~/.ssh".to_owned())]
    pub ssh_dir: String,
    /// Directory holding the provisioning completion ledger.
    #[ortho_config(default = "~/.local/state/devstead".to_owned())]
    pub state_dir: String,
    /// OpenSSH public key to install instead of generating a pair.
    pub public_key: Option<String>,
    /// Base64 encoded private key matching `public_key`.
    pub private_key: Option<String>,
    /// Whether GitHub repositories are cloned onto the server.
    #[ortho_config(default = false)]
    pub github_enabled: bool,
    /// GitHub access token.
    pub github_token: Option<String>,
    /// GitHub account name.
    pub github_username: Option<String>,
    /// Comma separated GitHub repositories to preload.
    pub github_repositories: Option<String>,
    /// Whether GitLab repositories are cloned onto the server.
    #[ortho_config(default = false)]
    pub gitlab_enabled: bool,
    /// GitLab access token.
    pub gitlab_token: Option<String>,
    /// GitLab account name.
    pub gitlab_username: Option<String>,
    /// Comma separated GitLab repositories to preload.
    pub gitlab_repositories: Option<String>,
    /// Seconds to wait for the bootstrap payload to finish.
    #[ortho_config(default = DEFAULT_BOOT_TIMEOUT_SECS)]
    pub boot_timeout_secs: u64,
    /// Seconds between boot completion probes.
    #[ortho_config(default = DEFAULT_BOOT_POLL_INTERVAL_SECS)]
    pub boot_poll_interval_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to {CONFIG_FILE_NAME}",
            self.description, self.env_var, self.toml_key
        ))
    }
}

const HOSTNAME: FieldMetadata = FieldMetadata::new("host name", "DEVSTEAD_HOSTNAME", "hostname");
const HOSTED_ZONE: FieldMetadata =
    FieldMetadata::new("hosted DNS zone", "DEVSTEAD_HOSTED_ZONE", "hosted_zone");
const EMAIL: FieldMetadata = FieldMetadata::new("operator email", "DEVSTEAD_EMAIL", "email");
const USERNAME: FieldMetadata =
    FieldMetadata::new("remote username", "DEVSTEAD_USERNAME", "username");
const OS_DIST: FieldMetadata =
    FieldMetadata::new("OS distribution", "DEVSTEAD_OS_DIST", "os_dist");
const GITHUB_TOKEN: FieldMetadata =
    FieldMetadata::new("GitHub token", "DEVSTEAD_GITHUB_TOKEN", "github_token");
const GITHUB_USERNAME: FieldMetadata =
    FieldMetadata::new("GitHub username", "DEVSTEAD_GITHUB_USERNAME", "github_username");
const GITLAB_TOKEN: FieldMetadata =
    FieldMetadata::new("GitLab token", "DEVSTEAD_GITLAB_TOKEN", "gitlab_token");
const GITLAB_USERNAME: FieldMetadata =
    FieldMetadata::new("GitLab username", "DEVSTEAD_GITLAB_USERNAME", "gitlab_username");
const PUBLIC_KEY: FieldMetadata = FieldMetadata::new(
    "public key for the supplied private key",
    "DEVSTEAD_PUBLIC_KEY",
    "public_key",
);

/// Source-control provider settings used to preload repositories.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SourceControl {
    /// Whether the provider is in use.
    pub enabled: bool,
    /// Access token; empty when disabled.
    pub token: String,
    /// Account name; empty when disabled.
    pub username: String,
    /// Repositories to clone, in configuration order.
    pub repositories: Vec<String>,
}

/// Operator supplied key pair.
#[derive(Clone, Eq, PartialEq)]
pub struct SuppliedKeys {
    /// OpenSSH public key line.
    pub public: String,
    /// Decoded private key, when supplied.
    pub private: Option<String>,
}

impl std::fmt::Debug for SuppliedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuppliedKeys")
            .field("public", &self.public)
            .field("private", &self.private.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Timing policy for waiting on the bootstrap payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BootPolicy {
    /// Upper bound on the wait.
    pub timeout: Duration,
    /// Delay between probes.
    pub poll_interval: Duration,
}

impl Default for BootPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_BOOT_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_BOOT_POLL_INTERVAL_SECS),
        }
    }
}

/// Validated, immutable view of the deployment configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Settings {
    /// Short host name.
    pub hostname: String,
    /// DNS zone.
    pub hosted_zone: String,
    /// `<hostname>.<hosted_zone>`.
    pub domain_name: String,
    /// Operator email.
    pub email: String,
    /// Developer account on the server.
    pub username: String,
    /// SSH login user.
    pub ssh_user: String,
    /// Distribution selecting the script set.
    pub os_dist: String,
    /// Compute flavour.
    pub instance_type: String,
    /// Boot disk size in gigabytes.
    pub disk_size_gb: u32,
    /// Root of the script tree.
    pub scripts_dir: Utf8PathBuf,
    /// Directory for keys and the SSH client configuration.
    pub ssh_dir: Utf8PathBuf,
    /// Directory for the completion ledger.
    pub state_dir: Utf8PathBuf,
    /// Operator supplied keys; `None` means a pair is generated.
    pub keys: Option<SuppliedKeys>,
    /// GitHub settings.
    pub github: SourceControl,
    /// GitLab settings.
    pub gitlab: SourceControl,
    /// Extra placeholder substitutions from the `[variables]` table.
    pub variables: BTreeMap<String, String>,
    /// Boot wait policy.
    pub boot: BootPolicy,
}

impl Settings {
    /// Directory holding the bootstrap script manifest.
    #[must_use]
    pub fn userdata_dir(&self) -> Utf8PathBuf {
        self.scripts_dir.join(&self.os_dist).join("userdata")
    }

    /// Directory holding the post-boot provisioning manifest.
    #[must_use]
    pub fn provisioning_dir(&self) -> Utf8PathBuf {
        self.scripts_dir.join(&self.os_dist).join("provisioning")
    }

    /// Private key path used for this host.
    #[must_use]
    pub fn identity_file(&self) -> Utf8PathBuf {
        self.ssh_dir.join(&self.domain_name)
    }

    /// Completion ledger path for this host.
    #[must_use]
    pub fn ledger_file(&self) -> Utf8PathBuf {
        self.state_dir.join(format!("{}.json", self.domain_name))
    }
}

impl DevServerConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from(APP_NAME)])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads layered configuration plus the `[variables]` table and
    /// validates both into [`Settings`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load_settings() -> Result<Settings, ConfigError> {
        let config = Self::load_without_cli_args()?;
        let variables = load_variables(&default_discovery())?;
        config.into_settings(variables)
    }

    /// Validates required values and derives the immutable [`Settings`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the environment variable
    /// and TOML key for the first missing value, or
    /// [`ConfigError::Invalid`] for values that are present but unusable.
    pub fn into_settings(
        self,
        variables: BTreeMap<String, String>,
    ) -> Result<Settings, ConfigError> {
        let hostname = require(self.hostname.as_deref(), &HOSTNAME)?;
        let hosted_zone = require(self.hosted_zone.as_deref(), &HOSTED_ZONE)?
            .trim_end_matches('.')
            .to_owned();
        let email = require(self.email.as_deref(), &EMAIL)?;
        let username = require(Some(self.username.as_str()), &USERNAME)?;
        let os_dist = require(Some(self.os_dist.as_str()), &OS_DIST)?;

        if !self.github_enabled && !self.gitlab_enabled {
            return Err(ConfigError::Invalid(String::from(
                "enable GitHub or GitLab: set DEVSTEAD_GITHUB_ENABLED or \
                 DEVSTEAD_GITLAB_ENABLED, or add github_enabled or gitlab_enabled to devstead.toml",
            )));
        }
        let github = source_control(
            self.github_enabled,
            self.github_token.as_deref(),
            self.github_username.as_deref(),
            self.github_repositories.as_deref(),
            (&GITHUB_TOKEN, &GITHUB_USERNAME),
        )?;
        let gitlab = source_control(
            self.gitlab_enabled,
            self.gitlab_token.as_deref(),
            self.gitlab_username.as_deref(),
            self.gitlab_repositories.as_deref(),
            (&GITLAB_TOKEN, &GITLAB_USERNAME),
        )?;

        if self.disk_size_gb == 0 {
            return Err(ConfigError::Invalid(String::from(
                "disk_size_gb must be greater than zero",
            )));
        }
        if self.boot_timeout_secs > MAX_BOOT_TIMEOUT_SECS {
            return Err(ConfigError::Invalid(format!(
                "boot_timeout_secs must not exceed {MAX_BOOT_TIMEOUT_SECS}: set \
                 DEVSTEAD_BOOT_TIMEOUT_SECS or boot_timeout_secs in devstead.toml"
            )));
        }
        if self.boot_poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "boot_poll_interval_secs must be greater than zero",
            )));
        }

        let keys = supplied_keys(self.public_key.as_deref(), self.private_key.as_deref())?;
        let ssh_user = self
            .ssh_user
            .as_deref()
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .map_or_else(|| default_ssh_user(&os_dist).to_owned(), str::to_owned);

        Ok(Settings {
            domain_name: format!("{hostname}.{hosted_zone}"),
            hostname,
            hosted_zone,
            email,
            username,
            ssh_user,
            os_dist,
            instance_type: self.instance_type.trim().to_owned(),
            disk_size_gb: self.disk_size_gb,
            scripts_dir: Utf8PathBuf::from(expand_tilde(&self.scripts_dir)),
            ssh_dir: Utf8PathBuf::from(expand_tilde(&self.ssh_dir)),
            state_dir: Utf8PathBuf::from(expand_tilde(&self.state_dir)),
            keys,
            github,
            gitlab,
            variables,
            boot: BootPolicy {
                timeout: Duration::from_secs(self.boot_timeout_secs),
                poll_interval: Duration::from_secs(self.boot_poll_interval_secs),
            },
        })
    }
}

/// SSH login user baked into the distribution's cloud image.
#[must_use]
pub fn default_ssh_user(os_dist: &str) -> &'static str {
    if os_dist.eq_ignore_ascii_case("arch") {
        "arch"
    } else {
        "ubuntu"
    }
}

fn require(value: Option<&str>, metadata: &FieldMetadata) -> Result<String, ConfigError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| metadata.missing())
}

fn source_control(
    enabled: bool,
    token: Option<&str>,
    username: Option<&str>,
    repositories: Option<&str>,
    (token_meta, username_meta): (&FieldMetadata, &FieldMetadata),
) -> Result<SourceControl, ConfigError> {
    if !enabled {
        return Ok(SourceControl::default());
    }
    Ok(SourceControl {
        enabled,
        token: require(token, token_meta)?,
        username: require(username, username_meta)?,
        repositories: split_list(repositories.unwrap_or_default()),
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

fn supplied_keys(
    public: Option<&str>,
    private: Option<&str>,
) -> Result<Option<SuppliedKeys>, ConfigError> {
    let trimmed_public = public.map(str::trim).filter(|key| !key.is_empty());
    let trimmed_private = private.map(str::trim).filter(|key| !key.is_empty());
    match (trimmed_public, trimmed_private) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err(PUBLIC_KEY.missing()),
        (Some(public_key), encoded) => Ok(Some(SuppliedKeys {
            public: public_key.to_owned(),
            private: encoded.map(decode_private_key).transpose()?,
        })),
    }
}

fn decode_private_key(encoded: &str) -> Result<String, ConfigError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|err| ConfigError::Invalid(format!("private_key is not valid base64: {err}")))?;
    String::from_utf8(bytes)
        .map_err(|_| ConfigError::Invalid(String::from("private_key does not decode to UTF-8 text")))
}

/// Builds the discovery used for `devstead.toml`.
#[must_use]
pub fn default_discovery() -> ConfigDiscovery {
    ConfigDiscovery::builder(APP_NAME)
        .env_var(CONFIG_ENV_VAR)
        .config_file_name(CONFIG_FILE_NAME)
        .dotfile_name(DOTFILE_NAME)
        .project_file_name(PROJECT_FILE_NAME)
        .build()
}

/// Reads the `[variables]` table from the first discovered configuration
/// file. Missing files or tables yield an empty map.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, is not valid TOML,
/// or the table holds non-string values.
pub fn load_variables(
    discovery: &ConfigDiscovery,
) -> Result<BTreeMap<String, String>, ConfigError> {
    for candidate in discovery.utf8_candidates() {
        if let Some(contents) = files::read_optional(&candidate)? {
            return parse_variables(&candidate, &contents);
        }
    }
    Ok(BTreeMap::new())
}

fn parse_variables(
    path: &Utf8Path,
    contents: &str,
) -> Result<BTreeMap<String, String>, ConfigError> {
    let value: toml::Value = toml::from_str(contents)
        .map_err(|err| ConfigError::Parse(format!("{path}: {err}")))?;
    let Some(section) = value.get(VARIABLES_SECTION) else {
        return Ok(BTreeMap::new());
    };
    let table = section.as_table().ok_or_else(|| {
        ConfigError::Invalid(format!("[{VARIABLES_SECTION}] in {path} must be a table"))
    })?;
    table
        .iter()
        .map(|(key, raw)| {
            raw.as_str()
                .map(|text| (key.clone(), text.to_owned()))
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "{VARIABLES_SECTION}.{key} in {path} must be a string"
                    ))
                })
        })
        .collect()
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader or TOML parser.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when a configuration file cannot be read.
    #[error(transparent)]
    Io(#[from] FileError),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
