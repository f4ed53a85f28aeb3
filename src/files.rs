//! Capability-scoped file helpers shared by the stores in this crate.
//!
//! Reads go through `cap-std` ambient directories. Writes land in a
//! temporary file beside the destination and are renamed into place, so
//! readers never observe a half-written file.

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::debug;

/// Permission bits applied to files holding secrets or SSH client settings.
pub const PRIVATE_FILE_MODE: u32 = 0o600;

/// Permission bits applied to directories created for private files.
pub const PRIVATE_DIR_MODE: u32 = 0o700;

/// File system failure tagged with the path that caused it.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("failed to access {path}: {message}")]
pub struct FileError {
    /// Path that could not be accessed.
    pub path: Utf8PathBuf,
    /// Human-readable error message.
    pub message: String,
}

impl FileError {
    fn new(path: &Utf8Path, err: &impl ToString) -> Self {
        Self {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &str), FileError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| FileError {
        path: path.to_path_buf(),
        message: String::from("path is missing a file name"),
    })?;
    Ok((parent, file_name))
}

/// Returns whether `path` names an existing file or directory.
///
/// A missing parent directory counts as "does not exist".
///
/// # Errors
///
/// Returns [`FileError`] when the parent directory cannot be opened for a
/// reason other than absence.
pub fn path_exists(path: &Utf8Path) -> Result<bool, FileError> {
    if path.file_name().is_none() {
        return dir_exists(path);
    }
    let (parent, file_name) = split(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir
            .try_exists(file_name)
            .map_err(|err| FileError::new(path, &err)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(FileError::new(parent, &err)),
    }
}

/// Paths such as `.`, `..`, or `/` have no final component and are probed
/// by opening them directly.
fn dir_exists(path: &Utf8Path) -> Result<bool, FileError> {
    let dir = if path.as_str().is_empty() {
        Utf8Path::new(".")
    } else {
        path
    };
    match Dir::open_ambient_dir(dir, ambient_authority()) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(FileError::new(dir, &err)),
    }
}

/// Reads `path` into a string.
///
/// # Errors
///
/// Returns [`FileError`] when the file or its directory cannot be read.
pub fn read_to_string(path: &Utf8Path) -> Result<String, FileError> {
    let (parent, file_name) = split(path)?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| FileError::new(parent, &err))?;
    dir.read_to_string(file_name)
        .map_err(|err| FileError::new(path, &err))
}

/// Reads `path` when it exists, returning `None` otherwise.
///
/// # Errors
///
/// Returns [`FileError`] for any failure other than absence.
pub fn read_optional(path: &Utf8Path) -> Result<Option<String>, FileError> {
    if !path_exists(path)? {
        return Ok(None);
    }
    read_to_string(path).map(Some)
}

/// Atomically replaces `path` with `contents`, owner read/write only.
///
/// The parent directory is created with owner-only access when absent.
///
/// # Errors
///
/// Returns [`FileError`] when the directory, temporary file, or rename fails.
pub fn write_private(path: &Utf8Path, contents: &str) -> Result<(), FileError> {
    let (parent, _) = split(path)?;
    ensure_private_dir(parent)?;

    let mut staged =
        tempfile::NamedTempFile::new_in(parent).map_err(|err| FileError::new(parent, &err))?;
    staged
        .write_all(contents.as_bytes())
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|err| FileError::new(path, &err))?;
    set_mode(staged.path(), PRIVATE_FILE_MODE).map_err(|err| FileError::new(path, &err))?;
    staged
        .persist(path)
        .map_err(|err| FileError::new(path, &err.error))?;
    debug!(path = %path, bytes = contents.len(), "wrote private file");
    Ok(())
}

/// Restricts an existing file to owner read/write.
///
/// # Errors
///
/// Returns [`FileError`] when permissions cannot be changed.
pub fn restrict_to_owner(path: &Utf8Path) -> Result<(), FileError> {
    set_mode(path.as_std_path(), PRIVATE_FILE_MODE).map_err(|err| FileError::new(path, &err))
}

/// Removes `path` when present.
///
/// # Errors
///
/// Returns [`FileError`] when the file exists but cannot be removed.
pub fn remove_if_exists(path: &Utf8Path) -> Result<(), FileError> {
    let (parent, file_name) = split(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => match dir.remove_file(file_name) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(FileError::new(path, &err)),
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(FileError::new(parent, &err)),
    }
}

/// Creates `dir` and its ancestors when absent; a newly created leaf is
/// restricted to its owner.
///
/// # Errors
///
/// Returns [`FileError`] when the directory cannot be created.
pub fn ensure_private_dir(dir: &Utf8Path) -> Result<(), FileError> {
    if path_exists(dir)? {
        return Ok(());
    }
    Dir::create_ambient_dir_all(dir, ambient_authority())
        .map_err(|err| FileError::new(dir, &err))?;
    set_mode(dir.as_std_path(), PRIVATE_DIR_MODE).map_err(|err| FileError::new(dir, &err))
}

#[cfg(unix)]
fn set_mode(path: &std::path::Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &std::path::Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
