//! Bootstrap payload assembly.
//!
//! The payload handed to a new host at first boot is every `up` script of
//! the distribution's `userdata` manifest, substituted and joined with a
//! `###` separator line. The result is plain text so any provider's
//! user-data field can carry it.

use camino::Utf8Path;
use thiserror::Error;
use tracing::debug;

use crate::files::{self, FileError};
use crate::provision::{Manifest, ManifestError};
use crate::variables::VariableResolver;

/// Separator placed between concatenated bootstrap scripts.
pub const SCRIPT_SEPARATOR: &str = "\n###\n";

/// Errors raised while building the bootstrap payload.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum UserDataError {
    /// Raised when the bootstrap manifest cannot be loaded.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    /// Raised when a listed script cannot be read.
    #[error(transparent)]
    Script(#[from] FileError),
    /// Raised when the assembled payload is empty or only whitespace.
    #[error("bootstrap payload from {path} is empty")]
    Empty {
        /// Directory the manifest was read from.
        path: String,
    },
}

/// Builds the bootstrap payload from the manifest in `directory`.
///
/// # Errors
///
/// Returns [`UserDataError`] when the manifest or a script is missing, or
/// when the resulting payload would be empty.
pub fn build_user_data<V>(directory: &Utf8Path, resolver: &V) -> Result<String, UserDataError>
where
    V: VariableResolver + ?Sized,
{
    let manifest = Manifest::load(directory)?;
    let scripts = manifest
        .steps()
        .iter()
        .map(|step| {
            files::read_to_string(&step.create).map(|text| resolver.resolve(&text))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let payload = scripts.join(SCRIPT_SEPARATOR);

    if payload.trim().is_empty() {
        return Err(UserDataError::Empty {
            path: directory.to_string(),
        });
    }
    debug!(
        scripts = scripts.len(),
        bytes = payload.len(),
        "assembled bootstrap payload"
    );
    Ok(payload)
}
