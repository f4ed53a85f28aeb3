//! Completion ledger recording which steps already ran for a trigger.
//!
//! A step is considered complete for a trigger when the ledger holds the
//! same trigger, step name, and digest of the substituted script text. A
//! new trigger (the host was recreated) or an edited script both force the
//! step to run again.

use std::cell::RefCell;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::files::{self, FileError};

/// Errors raised by ledger implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LedgerError {
    /// Raised when the ledger file holds invalid JSON.
    #[error("failed to parse ledger {path}: {message}")]
    Parse {
        /// Ledger path.
        path: Utf8PathBuf,
        /// Parser message.
        message: String,
    },
    /// Raised when the ledger cannot be serialised.
    #[error("failed to encode ledger {path}: {message}")]
    Encode {
        /// Ledger path.
        path: Utf8PathBuf,
        /// Serialiser message.
        message: String,
    },
    /// Raised when file system operations fail.
    #[error(transparent)]
    Io(#[from] FileError),
}

/// One completed step.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LedgerRecord {
    /// Trigger the step ran under.
    pub trigger: String,
    /// Step name.
    pub step: String,
    /// Hex SHA-256 of the substituted script text.
    pub digest: String,
}

/// Hex SHA-256 digest of a script body.
#[must_use]
pub fn script_digest(body: &str) -> String {
    format!("{:x}", Sha256::digest(body.as_bytes()))
}

/// Storage for completed steps.
pub trait CompletionLedger {
    /// Returns `true` when `record` was already completed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the ledger cannot be read.
    fn is_complete(&self, record: &LedgerRecord) -> Result<bool, LedgerError>;

    /// Stores `record`, discarding records of any other trigger.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the ledger cannot be updated.
    fn record(&self, record: LedgerRecord) -> Result<(), LedgerError>;

    /// Forgets every record for `trigger`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the ledger cannot be updated.
    fn clear(&self, trigger: &str) -> Result<(), LedgerError>;
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
struct LedgerState {
    #[serde(default)]
    records: Vec<LedgerRecord>,
}

impl LedgerState {
    fn contains(&self, record: &LedgerRecord) -> bool {
        self.records.contains(record)
    }

    fn insert(&mut self, record: LedgerRecord) {
        self.records
            .retain(|existing| existing.trigger == record.trigger && existing.step != record.step);
        self.records.push(record);
    }

    fn clear(&mut self, trigger: &str) {
        self.records.retain(|existing| existing.trigger != trigger);
    }
}

/// In-memory ledger, used when no state should persist between runs.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: RefCell<LedgerState>,
}

impl MemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of stored records.
    #[must_use]
    pub fn records(&self) -> Vec<LedgerRecord> {
        self.state.borrow().records.clone()
    }
}

impl CompletionLedger for MemoryLedger {
    fn is_complete(&self, record: &LedgerRecord) -> Result<bool, LedgerError> {
        Ok(self.state.borrow().contains(record))
    }

    fn record(&self, record: LedgerRecord) -> Result<(), LedgerError> {
        self.state.borrow_mut().insert(record);
        Ok(())
    }

    fn clear(&self, trigger: &str) -> Result<(), LedgerError> {
        self.state.borrow_mut().clear(trigger);
        Ok(())
    }
}

/// JSON file ledger persisted under the state directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileLedger {
    path: Utf8PathBuf,
}

impl FileLedger {
    /// Creates a ledger stored at `path`; the file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the ledger file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn load(&self) -> Result<LedgerState, LedgerError> {
        let Some(contents) = files::read_optional(&self.path)? else {
            return Ok(LedgerState::default());
        };
        if contents.trim().is_empty() {
            return Ok(LedgerState::default());
        }
        serde_json::from_str(&contents).map_err(|err| LedgerError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }

    fn save(&self, state: &LedgerState) -> Result<(), LedgerError> {
        let rendered = serde_json::to_string_pretty(state).map_err(|err| LedgerError::Encode {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        files::write_private(&self.path, &rendered)?;
        Ok(())
    }
}

impl CompletionLedger for FileLedger {
    fn is_complete(&self, record: &LedgerRecord) -> Result<bool, LedgerError> {
        Ok(self.load()?.contains(record))
    }

    fn record(&self, record: LedgerRecord) -> Result<(), LedgerError> {
        let mut state = self.load()?;
        state.insert(record);
        self.save(&state)
    }

    fn clear(&self, trigger: &str) -> Result<(), LedgerError> {
        let mut state = self.load()?;
        state.clear(trigger);
        if state.records.is_empty() {
            files::remove_if_exists(&self.path)?;
            return Ok(());
        }
        self.save(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn record(trigger: &str, step: &str, body: &str) -> LedgerRecord {
        LedgerRecord {
            trigger: trigger.to_owned(),
            step: step.to_owned(),
            digest: script_digest(body),
        }
    }

    #[test]
    fn digest_is_stable_hex() {
        assert_eq!(
            script_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[rstest]
    #[case::same("i-1", "echo hi", true)]
    #[case::new_trigger("i-2", "echo hi", false)]
    #[case::edited_script("i-1", "echo bye", false)]
    fn memory_ledger_matches_trigger_and_digest(
        #[case] trigger: &str,
        #[case] body: &str,
        #[case] expected: bool,
    ) {
        let ledger = MemoryLedger::new();
        ledger
            .record(record("i-1", "01.sh", "echo hi"))
            .unwrap_or_else(|err| panic!("record: {err}"));

        let complete = ledger
            .is_complete(&record(trigger, "01.sh", body))
            .unwrap_or_else(|err| panic!("query: {err}"));
        assert_eq!(complete, expected);
    }

    #[test]
    fn recording_under_new_trigger_drops_stale_records() {
        let ledger = MemoryLedger::new();
        for entry in [
            record("i-1", "01.sh", "a"),
            record("i-1", "02.sh", "b"),
            record("i-2", "01.sh", "a"),
        ] {
            ledger
                .record(entry)
                .unwrap_or_else(|err| panic!("record: {err}"));
        }
        assert_eq!(ledger.records(), vec![record("i-2", "01.sh", "a")]);
    }

    #[test]
    fn file_ledger_persists_and_clears() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
        let path = root.join("state").join("dev.example.com.json");
        let first = record("i-1", "01.sh", "echo hi");

        FileLedger::new(path.clone())
            .record(first.clone())
            .unwrap_or_else(|err| panic!("record: {err}"));
        let reopened = FileLedger::new(path.clone());
        assert!(
            reopened
                .is_complete(&first)
                .unwrap_or_else(|err| panic!("query: {err}"))
        );

        reopened
            .clear("i-1")
            .unwrap_or_else(|err| panic!("clear: {err}"));
        assert!(!path.exists());
        assert!(
            !reopened
                .is_complete(&first)
                .unwrap_or_else(|err| panic!("query: {err}"))
        );
    }

    #[test]
    fn file_ledger_reports_corrupt_json() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = tmp.path().join("ledger.json");
        std::fs::write(&path, "{not json").unwrap_or_else(|err| panic!("seed: {err}"));
        let utf8 = Utf8PathBuf::from_path_buf(path)
            .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));

        let err = FileLedger::new(utf8)
            .is_complete(&record("i", "s", "b"))
            .expect_err("corrupt ledger should fail");
        assert!(matches!(err, LedgerError::Parse { .. }));
    }
}
