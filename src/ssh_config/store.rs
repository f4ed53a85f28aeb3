//! File-backed SSH configuration store.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::files;

use super::{ConfigEntries, HostConfigWriter, SshConfigError, host_records, merge, parse, render};

const CONFIG_FILE_NAME: &str = "config";

/// Reads and parses the configuration at `path`.
///
/// A missing file yields an empty collection.
///
/// # Errors
///
/// Returns [`SshConfigError::Io`] when the file cannot be read, or
/// [`SshConfigError::Parse`] naming `path` when a line is malformed.
pub fn read_entries(path: &Utf8Path) -> Result<ConfigEntries, SshConfigError> {
    let Some(contents) = files::read_optional(path)? else {
        debug!(path = %path, "ssh config absent; starting empty");
        return Ok(ConfigEntries::new());
    };
    parse(&contents).map_err(|err| SshConfigError::Parse {
        path: path.to_path_buf(),
        source: Box::new(err),
    })
}

/// Replaces the file at `path` with the rendered `entries`.
///
/// The write is atomic and leaves the file readable by its owner only.
///
/// # Errors
///
/// Returns [`SshConfigError::Io`] when the file cannot be written.
pub fn write_entries(path: &Utf8Path, entries: &ConfigEntries) -> Result<(), SshConfigError> {
    files::write_private(path, &render(entries))?;
    Ok(())
}

/// SSH client configuration file rooted at a fixed path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshConfigStore {
    path: Utf8PathBuf,
}

impl SshConfigStore {
    /// Builds a store for an explicit configuration file path.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Builds a store for `<ssh_dir>/config`.
    #[must_use]
    pub fn in_ssh_dir(ssh_dir: &Utf8Path) -> Self {
        Self::new(ssh_dir.join(CONFIG_FILE_NAME))
    }

    /// Returns the path of the managed file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Merges `updates` into the stored records and rewrites the file.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError`] when reading, parsing, or writing fails.
    /// A parse failure leaves the file untouched.
    pub fn upsert(&self, updates: ConfigEntries) -> Result<ConfigEntries, SshConfigError> {
        let existing = read_entries(&self.path)?;
        let merged = merge(existing, updates);
        write_entries(&self.path, &merged)?;
        Ok(merged)
    }
}

impl HostConfigWriter for SshConfigStore {
    fn ensure_host_entry(
        &self,
        host: &str,
        user: &str,
        identity_file: &Utf8Path,
    ) -> Result<Utf8PathBuf, SshConfigError> {
        let merged = self.upsert(host_records(host, user, identity_file))?;
        info!(
            path = %self.path,
            host,
            records = merged.len(),
            "updated ssh client config"
        );
        Ok(self.path.clone())
    }
}
