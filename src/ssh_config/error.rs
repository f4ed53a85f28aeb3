//! Errors raised while reading, merging, or writing the SSH client
//! configuration file.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::files::FileError;

/// Errors raised by the SSH configuration store.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SshConfigError {
    /// Raised when a non-blank, non-comment line lacks a value.
    #[error("malformed ssh config line {line}: {text:?}")]
    Malformed {
        /// One-based line number of the offending line.
        line: usize,
        /// Raw text of the offending line.
        text: String,
    },
    /// Raised when a malformed line is found while loading a file.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File that failed to parse.
        path: Utf8PathBuf,
        /// Underlying parse failure.
        #[source]
        source: Box<Self>,
    },
    /// Raised when file system operations fail.
    #[error(transparent)]
    Io(#[from] FileError),
}
