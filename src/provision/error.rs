//! Errors raised while running a provisioning sequence.

use thiserror::Error;

use crate::files::FileError;
use crate::remote::RemoteError;

use super::SequenceReport;
use super::ledger::LedgerError;

/// Errors raised by [`super::Sequencer`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SequenceError {
    /// Raised when a script cannot be read before substitution.
    #[error("failed to read script for step {step}: {source}")]
    Script {
        /// Step whose script could not be read.
        step: String,
        /// Underlying file error.
        #[source]
        source: FileError,
    },
    /// Raised when the remote transport could not run a step at all.
    #[error("failed to run step {step}: {source}")]
    Remote {
        /// Step that could not be started.
        step: String,
        /// Transport failure.
        #[source]
        source: RemoteError,
    },
    /// Raised when a step exits unsuccessfully; later steps are not run.
    #[error(
        "step {step} failed with status {status}: {detail}",
        status = status_text(*exit_code),
        detail = stderr.trim()
    )]
    StepFailed {
        /// Failing step name.
        step: String,
        /// Exit status reported by the remote command, if any.
        exit_code: Option<i32>,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
        /// Final state of every step in the sequence.
        report: Box<SequenceReport>,
    },
    /// Raised when the completion ledger cannot be read or updated.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

fn status_text(code: Option<i32>) -> String {
    code.map_or_else(|| String::from("unknown"), |value| value.to_string())
}
