//! Ordered, fail-fast execution of provisioning scripts on a remote host.
//!
//! A [`Manifest`] lists create/teardown script pairs. [`Sequencer::run`]
//! substitutes and executes each create script in order, handing every step
//! the trigger and the names of everything that completed before it. The
//! first failure stops the sequence. [`Sequencer::teardown`] walks the
//! teardown scripts in reverse.

use std::fmt;

use camino::Utf8Path;
use tracing::{debug, info, warn};

use crate::files;
use crate::remote::{RemoteCommand, RemoteExecutor, RemoteTarget};
use crate::variables::VariableResolver;

mod error;
mod ledger;
mod manifest;

pub use error::SequenceError;
pub use ledger::{
    CompletionLedger, FileLedger, LedgerError, LedgerRecord, MemoryLedger, script_digest,
};
pub use manifest::{MANIFEST_FILE_NAME, Manifest, ManifestError, ProvisioningStep};

/// Lifecycle of a single step within one sequence run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepState {
    /// Not yet reached.
    Pending,
    /// Script text read and placeholders resolved.
    Substituted,
    /// Handed to the remote executor.
    Executing,
    /// Exited with status zero.
    Succeeded,
    /// Exited unsuccessfully; the sequence stopped here.
    Failed,
    /// Already completed for this trigger with identical script text.
    Skipped,
}

impl StepState {
    /// Returns `true` once the step needs no further work.
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Substituted => "substituted",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Outcome of one step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StepReport {
    /// Step name.
    pub name: String,
    /// Final state.
    pub state: StepState,
    /// Exit status, when the step was executed.
    pub exit_code: Option<i32>,
}

/// Outcome of a whole sequence, in execution order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SequenceReport {
    /// Every step with its final state.
    pub steps: Vec<StepReport>,
}

impl SequenceReport {
    fn pending<'a>(names: impl Iterator<Item = &'a str>) -> Self {
        Self {
            steps: names
                .map(|name| StepReport {
                    name: name.to_owned(),
                    state: StepState::Pending,
                    exit_code: None,
                })
                .collect(),
        }
    }

    fn transition(&mut self, index: usize, state: StepState) {
        if let Some(step) = self.steps.get_mut(index) {
            debug!(step = %step.name, from = %step.state, to = %state, "step transition");
            step.state = state;
        }
    }

    fn set_exit_code(&mut self, index: usize, exit_code: Option<i32>) {
        if let Some(step) = self.steps.get_mut(index) {
            step.exit_code = exit_code;
        }
    }

    /// Names of steps in `state`, in execution order.
    #[must_use]
    pub fn names_in(&self, state: StepState) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|step| step.state == state)
            .map(|step| step.name.as_str())
            .collect()
    }
}

/// Runs manifests against a remote host.
pub struct Sequencer<'a, E, V, L>
where
    E: RemoteExecutor,
    V: VariableResolver,
    L: CompletionLedger,
{
    executor: &'a E,
    resolver: &'a V,
    ledger: &'a L,
    force: bool,
}

impl<'a, E, V, L> Sequencer<'a, E, V, L>
where
    E: RemoteExecutor,
    V: VariableResolver,
    L: CompletionLedger,
{
    /// Builds a sequencer from its collaborators.
    #[must_use]
    pub const fn new(executor: &'a E, resolver: &'a V, ledger: &'a L) -> Self {
        Self {
            executor,
            resolver,
            ledger,
            force: false,
        }
    }

    /// When `force` is set, steps run even if the ledger marks them complete.
    #[must_use]
    pub const fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Executes every create script in order.
    ///
    /// Each step receives `trigger` and a dependency list made of
    /// `dependencies` followed by the names of all earlier steps.
    ///
    /// # Errors
    ///
    /// Returns [`SequenceError::StepFailed`] with the failing step's output
    /// when a script exits unsuccessfully, after which no later step runs.
    /// Other variants report unreadable scripts, transport failures, or
    /// ledger failures.
    pub fn run(
        &self,
        manifest: &Manifest,
        target: &RemoteTarget,
        trigger: &str,
        dependencies: &[String],
    ) -> Result<SequenceReport, SequenceError> {
        let steps = manifest.steps();
        let mut report = SequenceReport::pending(steps.iter().map(|step| step.name.as_str()));
        let mut completed = dependencies.to_vec();
        info!(
            steps = steps.len(),
            host = %target.host,
            trigger,
            "starting provisioning sequence"
        );

        for (index, step) in steps.iter().enumerate() {
            let body = self.substitute(&step.name, &step.create)?;
            report.transition(index, StepState::Substituted);

            let record = LedgerRecord {
                trigger: trigger.to_owned(),
                step: step.name.clone(),
                digest: script_digest(&body),
            };
            if !self.force && self.ledger.is_complete(&record)? {
                info!(step = %step.name, "step already completed for trigger; skipping");
                report.transition(index, StepState::Skipped);
                completed.push(step.name.clone());
                continue;
            }

            let command = RemoteCommand {
                label: step.name.clone(),
                body,
                trigger: trigger.to_owned(),
                dependencies: completed.clone(),
            };
            self.execute_step(&mut report, index, target, &command)?;
            self.ledger.record(record)?;
            completed.push(step.name.clone());
        }

        info!(steps = steps.len(), "provisioning sequence finished");
        Ok(report)
    }

    /// Executes teardown scripts in reverse manifest order, then forgets
    /// the trigger's completed steps.
    ///
    /// # Errors
    ///
    /// Returns [`SequenceError`] on the first failing teardown script; the
    /// ledger is left untouched in that case.
    pub fn teardown(
        &self,
        manifest: &Manifest,
        target: &RemoteTarget,
        trigger: &str,
    ) -> Result<SequenceReport, SequenceError> {
        let steps: Vec<(&str, &Utf8Path)> = manifest
            .steps()
            .iter()
            .rev()
            .filter_map(|step| {
                step.teardown
                    .as_deref()
                    .map(|script| (step.name.as_str(), script))
            })
            .collect();
        let mut report = SequenceReport::pending(steps.iter().map(|(name, _)| *name));
        let mut completed = Vec::with_capacity(steps.len());
        info!(steps = steps.len(), host = %target.host, trigger, "starting teardown");

        for (index, (name, script)) in steps.iter().enumerate() {
            let body = self.substitute(name, script)?;
            report.transition(index, StepState::Substituted);
            let command = RemoteCommand {
                label: (*name).to_owned(),
                body,
                trigger: trigger.to_owned(),
                dependencies: completed.clone(),
            };
            self.execute_step(&mut report, index, target, &command)?;
            completed.push((*name).to_owned());
        }

        self.ledger.clear(trigger)?;
        info!(steps = steps.len(), "teardown finished");
        Ok(report)
    }

    fn substitute(&self, step: &str, script: &Utf8Path) -> Result<String, SequenceError> {
        let text = files::read_to_string(script).map_err(|source| SequenceError::Script {
            step: step.to_owned(),
            source,
        })?;
        Ok(self.resolver.resolve(&text))
    }

    fn execute_step(
        &self,
        report: &mut SequenceReport,
        index: usize,
        target: &RemoteTarget,
        command: &RemoteCommand,
    ) -> Result<(), SequenceError> {
        report.transition(index, StepState::Executing);
        info!(step = %command.label, position = index, "running step");

        let output = match self.executor.execute(target, command) {
            Ok(output) => output,
            Err(source) => {
                report.transition(index, StepState::Failed);
                return Err(SequenceError::Remote {
                    step: command.label.clone(),
                    source,
                });
            }
        };
        report.set_exit_code(index, output.exit_code);

        if output.is_success() {
            report.transition(index, StepState::Succeeded);
            return Ok(());
        }

        report.transition(index, StepState::Failed);
        warn!(
            step = %command.label,
            exit_code = ?output.exit_code,
            "step failed; stopping sequence"
        );
        Err(SequenceError::StepFailed {
            step: command.label.clone(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            report: Box::new(report.clone()),
        })
    }
}
