//! Idempotent maintenance of the OpenSSH client configuration file.
//!
//! The file is treated as a keyed collection of `Host` records. Existing
//! records survive untouched unless a new record claims the same host
//! pattern, in which case the whole record is replaced. Output is sorted by
//! host pattern with fields in a fixed order, so repeated runs produce
//! byte-identical files.

use std::collections::BTreeMap;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

mod error;
mod parse;
mod store;

pub use error::SshConfigError;
pub use parse::{parse, render};
pub use store::{SshConfigStore, read_entries, write_entries};

/// Host pattern matching every host, used for client-wide defaults.
pub const WILDCARD_HOST: &str = "*";

/// SSH client options retained when parsing a configuration file.
///
/// Variants are declared in output order; options outside this set are
/// dropped during parsing.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FieldName {
    /// `HostName`
    HostName,
    /// `User`
    User,
    /// `Port`
    Port,
    /// `IdentityFile`
    IdentityFile,
    /// `ForwardAgent`
    ForwardAgent,
    /// `ForwardX11`
    ForwardX11,
    /// `StrictHostKeyChecking`
    StrictHostKeyChecking,
    /// `IdentityAgent`
    IdentityAgent,
    /// `TCPKeepAlive`
    TcpKeepAlive,
    /// `ProxyCommand`
    ProxyCommand,
    /// `LocalForward`
    LocalForward,
    /// `RemoteForward`
    RemoteForward,
    /// `LogLevel`
    LogLevel,
    /// `PasswordAuthentication`
    PasswordAuthentication,
    /// `PubkeyAuthentication`
    PubkeyAuthentication,
    /// `Compression`
    Compression,
    /// `ControlMaster`
    ControlMaster,
    /// `ControlPath`
    ControlPath,
    /// `DynamicForward`
    DynamicForward,
    /// `ServerAliveInterval`
    ServerAliveInterval,
    /// `ControlPersist`
    ControlPersist,
}

impl FieldName {
    /// Every recognised option in output order.
    pub const ALL: [Self; 21] = [
        Self::HostName,
        Self::User,
        Self::Port,
        Self::IdentityFile,
        Self::ForwardAgent,
        Self::ForwardX11,
        Self::StrictHostKeyChecking,
        Self::IdentityAgent,
        Self::TcpKeepAlive,
        Self::ProxyCommand,
        Self::LocalForward,
        Self::RemoteForward,
        Self::LogLevel,
        Self::PasswordAuthentication,
        Self::PubkeyAuthentication,
        Self::Compression,
        Self::ControlMaster,
        Self::ControlPath,
        Self::DynamicForward,
        Self::ServerAliveInterval,
        Self::ControlPersist,
    ];

    /// Canonical spelling written to the configuration file.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HostName => "HostName",
            Self::User => "User",
            Self::Port => "Port",
            Self::IdentityFile => "IdentityFile",
            Self::ForwardAgent => "ForwardAgent",
            Self::ForwardX11 => "ForwardX11",
            Self::StrictHostKeyChecking => "StrictHostKeyChecking",
            Self::IdentityAgent => "IdentityAgent",
            Self::TcpKeepAlive => "TCPKeepAlive",
            Self::ProxyCommand => "ProxyCommand",
            Self::LocalForward => "LocalForward",
            Self::RemoteForward => "RemoteForward",
            Self::LogLevel => "LogLevel",
            Self::PasswordAuthentication => "PasswordAuthentication",
            Self::PubkeyAuthentication => "PubkeyAuthentication",
            Self::Compression => "Compression",
            Self::ControlMaster => "ControlMaster",
            Self::ControlPath => "ControlPath",
            Self::DynamicForward => "DynamicForward",
            Self::ServerAliveInterval => "ServerAliveInterval",
            Self::ControlPersist => "ControlPersist",
        }
    }

    /// Looks up an option keyword, ignoring ASCII case as `ssh` does.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str().eq_ignore_ascii_case(keyword))
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `Host` record and its recognised options.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigEntry {
    /// Host pattern that keys the record; may be a wildcard.
    pub host: String,
    /// Recognised options, iterated in output order.
    pub fields: BTreeMap<FieldName, String>,
}

impl ConfigEntry {
    /// Creates an empty record for `host`.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds or replaces an option, returning the updated record.
    #[must_use]
    pub fn with(mut self, field: FieldName, value: impl Into<String>) -> Self {
        self.fields.insert(field, value.into());
        self
    }

    /// Returns the value of `field`, if set.
    #[must_use]
    pub fn get(&self, field: FieldName) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }
}

/// Records keyed by host pattern in ascending order.
pub type ConfigEntries = BTreeMap<String, ConfigEntry>;

/// Inserts every record from `updates` into `existing`, replacing whole
/// records that share a host pattern.
#[must_use]
pub fn merge(mut existing: ConfigEntries, updates: ConfigEntries) -> ConfigEntries {
    existing.extend(updates);
    existing
}

/// Builds the record pair that makes a freshly provisioned host reachable
/// by name: the host itself, plus a wildcard record disabling host key
/// checks so reprovisioned hosts with new keys stay reachable.
#[must_use]
pub fn host_records(host: &str, user: &str, identity_file: &Utf8Path) -> ConfigEntries {
    let wildcard =
        ConfigEntry::new(WILDCARD_HOST).with(FieldName::StrictHostKeyChecking, "no");
    let entry = ConfigEntry::new(host)
        .with(FieldName::HostName, host)
        .with(FieldName::User, user)
        .with(FieldName::Port, "22")
        .with(FieldName::IdentityFile, identity_file.as_str());
    [wildcard, entry]
        .into_iter()
        .map(|record| (record.host.clone(), record))
        .collect()
}

/// Abstraction over SSH client configuration writers for dependency
/// injection.
pub trait HostConfigWriter {
    /// Ensures the configuration contains a record for `host` logging in as
    /// `user` with `identity_file`, plus the wildcard defaults record.
    ///
    /// Returns the path of the file that was written.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError`] when the existing file cannot be read or
    /// parsed, or the new file cannot be written. Nothing is written when
    /// parsing fails.
    fn ensure_host_entry(
        &self,
        host: &str,
        user: &str,
        identity_file: &Utf8Path,
    ) -> Result<Utf8PathBuf, SshConfigError>;
}

#[cfg(test)]
mod tests;
