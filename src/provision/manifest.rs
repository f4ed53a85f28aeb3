//! Loading of `sequence.yml` script manifests.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::files::{self, FileError};

/// File name of the manifest inside a script directory.
pub const MANIFEST_FILE_NAME: &str = "sequence.yml";

/// Errors raised while loading a manifest.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ManifestError {
    /// Raised when the script directory does not exist.
    #[error("script directory missing: {path}")]
    MissingDirectory {
        /// Directory that was expected to hold scripts.
        path: Utf8PathBuf,
    },
    /// Raised when the directory has no `sequence.yml`.
    #[error("manifest missing: {path}")]
    MissingManifest {
        /// Expected manifest path.
        path: Utf8PathBuf,
    },
    /// Raised when the manifest is not valid YAML of the expected shape.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Parser message.
        message: String,
    },
    /// Raised when an entry names a script that does not exist.
    #[error("entry {position} in {manifest} references missing script {script}")]
    MissingScript {
        /// Manifest path.
        manifest: Utf8PathBuf,
        /// Zero-based position of the entry.
        position: usize,
        /// Resolved script path.
        script: Utf8PathBuf,
    },
    /// Raised when two entries resolve to the same step name.
    #[error("entry {position} in {manifest} repeats step {name} from entry {first}")]
    DuplicateStep {
        /// Manifest path.
        manifest: Utf8PathBuf,
        /// Step name shared by both entries.
        name: String,
        /// Zero-based position of the earlier entry.
        first: usize,
        /// Zero-based position of the repeating entry.
        position: usize,
    },
    /// Raised when file system operations fail.
    #[error(transparent)]
    Io(#[from] FileError),
}

#[derive(Debug, Default, Deserialize)]
struct RawManifest {
    #[serde(default)]
    sequence: Vec<Option<RawStep>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStep {
    #[serde(default)]
    up: Option<String>,
    #[serde(default)]
    down: Option<String>,
}

/// One create/teardown script pair.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisioningStep {
    /// Zero-based position of the entry in the manifest.
    pub position: usize,
    /// Display name, the create script's file name; unique within a manifest.
    pub name: String,
    /// Script run when provisioning.
    pub create: Utf8PathBuf,
    /// Script run when tearing down, if any.
    pub teardown: Option<Utf8PathBuf>,
}

/// Ordered steps loaded from a script directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Manifest {
    directory: Utf8PathBuf,
    steps: Vec<ProvisioningStep>,
}

impl Manifest {
    /// Loads `<directory>/sequence.yml`, resolving script paths relative to
    /// `directory`.
    ///
    /// Entries without an `up` script are skipped. Every referenced script
    /// must exist and step names must be unique; nothing is executed if any
    /// check fails.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when the directory, manifest, or a script is
    /// missing, the manifest cannot be parsed, or two entries share a step
    /// name.
    pub fn load(directory: &Utf8Path) -> Result<Self, ManifestError> {
        if !files::path_exists(directory)? {
            return Err(ManifestError::MissingDirectory {
                path: directory.to_path_buf(),
            });
        }
        let manifest_path = directory.join(MANIFEST_FILE_NAME);
        let Some(contents) = files::read_optional(&manifest_path)? else {
            return Err(ManifestError::MissingManifest {
                path: manifest_path,
            });
        };

        let raw = parse_manifest(&manifest_path, &contents)?;
        let mut steps: Vec<ProvisioningStep> = Vec::with_capacity(raw.sequence.len());
        for (position, slot) in raw.sequence.into_iter().enumerate() {
            let Some(entry) = slot else { continue };
            let Some(up) = non_empty(entry.up) else {
                debug!(position, manifest = %manifest_path, "skipping entry without up script");
                continue;
            };
            let create = resolve_script(directory, &manifest_path, position, &up)?;
            let teardown = non_empty(entry.down)
                .map(|down| resolve_script(directory, &manifest_path, position, &down))
                .transpose()?;
            let name = create.file_name().unwrap_or(up.as_str()).to_owned();
            if let Some(earlier) = steps.iter().find(|step| step.name == name) {
                return Err(ManifestError::DuplicateStep {
                    manifest: manifest_path,
                    name,
                    first: earlier.position,
                    position,
                });
            }
            steps.push(ProvisioningStep {
                position,
                name,
                create,
                teardown,
            });
        }

        Ok(Self {
            directory: directory.to_path_buf(),
            steps,
        })
    }

    /// Builds a manifest from already resolved steps.
    #[must_use]
    pub fn from_steps(directory: impl Into<Utf8PathBuf>, steps: Vec<ProvisioningStep>) -> Self {
        Self {
            directory: directory.into(),
            steps,
        }
    }

    /// Directory the manifest was loaded from.
    #[must_use]
    pub fn directory(&self) -> &Utf8Path {
        &self.directory
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[ProvisioningStep] {
        &self.steps
    }

    /// Returns `true` when the manifest has no runnable entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn parse_manifest(path: &Utf8Path, contents: &str) -> Result<RawManifest, ManifestError> {
    if contents.trim().is_empty() {
        return Ok(RawManifest::default());
    }
    serde_yaml::from_str(contents).map_err(|err| ManifestError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty())
}

fn resolve_script(
    directory: &Utf8Path,
    manifest: &Utf8Path,
    position: usize,
    relative: &str,
) -> Result<Utf8PathBuf, ManifestError> {
    let script = directory.join(relative);
    if !files::path_exists(&script)? {
        return Err(ManifestError::MissingScript {
            manifest: manifest.to_path_buf(),
            position,
            script,
        });
    }
    Ok(script)
}
