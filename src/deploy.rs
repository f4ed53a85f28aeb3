//! Orchestrates bringing a development server up and tearing it down.
//!
//! `up` resolves credentials, assembles the bootstrap payload, asks the
//! backend for an instance, waits for the first-boot payload to finish, and
//! then runs the provisioning sequence against the new host. Nothing is
//! destroyed automatically when a later stage fails; the error names the
//! instance so the operator can inspect it or run `down`.

use std::time::Instant;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::backend::{
    Backend, BackendError, InstanceHandle, InstanceNetworking, InstanceRequestBuilder,
};
use crate::config::{BootPolicy, Settings};
use crate::credentials::{CredentialError, CredentialResolver};
use crate::provision::{
    CompletionLedger, Manifest, ManifestError, SequenceError, SequenceReport, Sequencer,
};
use crate::remote::{
    CommandRunner, RemoteCommand, RemoteError, RemoteExecutor, RemoteTarget,
};
use crate::ssh_config::HostConfigWriter;
use crate::user_data::{UserDataError, build_user_data};
use crate::variables::TemplateVariables;

/// Marker file written once the first-boot payload has finished.
pub const BOOT_FINISHED_MARKER: &str = "/var/lib/cloud/instance/boot-finished";

const BOOT_CHECK_LABEL: &str = "boot-finished";

/// Errors surfaced while deploying or removing a development server.
#[derive(Debug, Error)]
pub enum DeployError<BackendErr>
where
    BackendErr: std::error::Error + 'static,
{
    /// Raised when the key pair cannot be resolved.
    #[error("failed to resolve SSH credentials: {0}")]
    Credentials(#[from] CredentialError),
    /// Raised when the bootstrap payload cannot be built.
    #[error("failed to build bootstrap payload: {0}")]
    UserData(#[from] UserDataError),
    /// Raised when the provisioning manifest cannot be loaded.
    #[error("failed to load provisioning manifest: {0}")]
    Manifest(#[from] ManifestError),
    /// Raised when the instance request is incomplete.
    #[error("invalid instance request: {0}")]
    Request(#[from] BackendError),
    /// Raised when provisioning a new instance fails.
    #[error("failed to create instance: {0}")]
    Create(#[source] BackendErr),
    /// Raised when the instance does not become reachable.
    #[error("instance {instance_id} did not become ready: {source}")]
    Wait {
        /// Instance left running for inspection.
        instance_id: String,
        /// Provider-specific error.
        #[source]
        source: BackendErr,
    },
    /// Raised when the first-boot payload cannot be confirmed.
    #[error(transparent)]
    Boot(#[from] BootError),
    /// Raised when a provisioning or teardown step fails.
    #[error("provisioning instance {instance_id} failed: {source}")]
    Sequence {
        /// Instance the sequence ran against.
        instance_id: String,
        /// Sequencer failure, including the failing step's output.
        #[source]
        source: Box<SequenceError>,
    },
    /// Raised when destroying the instance fails.
    #[error("failed to destroy instance {instance_id}: {source}")]
    Destroy {
        /// Instance that could not be destroyed.
        instance_id: String,
        /// Provider-specific error.
        #[source]
        source: BackendErr,
    },
}

/// Errors raised while waiting for the first-boot payload.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BootError {
    /// Raised when the boot probe cannot reach the host.
    #[error("boot check on {instance_id} failed: {source}")]
    Check {
        /// Instance being probed.
        instance_id: String,
        /// Transport failure.
        #[source]
        source: RemoteError,
    },
    /// Raised when the first-boot payload does not finish in time.
    #[error("instance {instance_id} did not finish booting within {timeout_secs} seconds")]
    Timeout {
        /// Instance being probed.
        instance_id: String,
        /// Configured wait.
        timeout_secs: u64,
    },
}

/// Result of a successful `up`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployOutcome {
    /// Created instance.
    pub handle: InstanceHandle,
    /// How the instance was reached.
    pub networking: InstanceNetworking,
    /// Final state of every provisioning step.
    pub report: SequenceReport,
    /// Whether a key pair was generated during this run.
    pub credentials_created: bool,
}

/// Dependency list handed to the first provisioning step.
#[must_use]
pub fn provisioning_dependencies(instance_id: &str, domain_name: &str) -> Vec<String> {
    vec![format!("instance:{instance_id}"), format!("dns:{domain_name}")]
}

/// Builds the SSH target for `host` using the settings' login user and key.
#[must_use]
pub fn remote_target(settings: &Settings, host: &str, port: u16) -> RemoteTarget {
    RemoteTarget {
        host: host.to_owned(),
        port,
        user: settings.ssh_user.clone(),
        identity_file: Some(settings.identity_file()),
    }
}

/// Polls for [`BOOT_FINISHED_MARKER`] until it exists or `policy.timeout`
/// elapses. The marker is probed at least once. A timeout too large to
/// represent as a deadline waits indefinitely.
///
/// # Errors
///
/// Returns [`BootError::Check`] when the probe cannot be sent and
/// [`BootError::Timeout`] when the marker never appears.
pub async fn wait_for_boot<E>(
    executor: &E,
    target: &RemoteTarget,
    instance_id: &str,
    policy: BootPolicy,
) -> Result<(), BootError>
where
    E: RemoteExecutor,
{
    let deadline = Instant::now().checked_add(policy.timeout);
    let probe = RemoteCommand {
        label: BOOT_CHECK_LABEL.to_owned(),
        body: format!("test -f {BOOT_FINISHED_MARKER}"),
        trigger: instance_id.to_owned(),
        dependencies: Vec::new(),
    };

    loop {
        let output = executor
            .execute(target, &probe)
            .map_err(|source| BootError::Check {
                instance_id: instance_id.to_owned(),
                source,
            })?;
        if output.is_success() {
            info!(host = %target.host, "first boot finished");
            return Ok(());
        }
        if deadline.is_some_and(|limit| Instant::now() >= limit) {
            return Err(BootError::Timeout {
                instance_id: instance_id.to_owned(),
                timeout_secs: policy.timeout.as_secs(),
            });
        }
        debug!(
            host = %target.host,
            interval_ms = policy.poll_interval.as_millis(),
            "first boot still running"
        );
        sleep(policy.poll_interval).await;
    }
}

/// Executes the deploy flow using the provided collaborators.
#[derive(Debug)]
pub struct DeployOrchestrator<B, R, E, W> {
    backend: B,
    runner: R,
    executor: E,
    writer: W,
    ssh_keygen_bin: String,
}

impl<B, R, E, W> DeployOrchestrator<B, R, E, W>
where
    B: Backend,
    R: CommandRunner,
    E: RemoteExecutor,
    W: HostConfigWriter,
{
    /// Creates a new orchestrator.
    #[must_use]
    pub fn new(
        backend: B,
        runner: R,
        executor: E,
        writer: W,
        ssh_keygen_bin: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            runner,
            executor,
            writer,
            ssh_keygen_bin: ssh_keygen_bin.into(),
        }
    }

    /// Returns the backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Brings the development server up and provisions it.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError`] naming the stage that failed. Instances are
    /// never destroyed on failure.
    pub async fn up<L>(
        &self,
        settings: &Settings,
        ledger: &L,
    ) -> Result<DeployOutcome, DeployError<B::Error>>
    where
        L: CompletionLedger,
    {
        let credentials =
            CredentialResolver::new(&self.runner, &self.writer, &self.ssh_keygen_bin)
                .resolve(settings)?;
        let variables = TemplateVariables::from_settings(settings);
        let user_data = build_user_data(&settings.userdata_dir(), &variables)?;
        let manifest = Manifest::load(&settings.provisioning_dir())?;
        let request = InstanceRequestBuilder::from_settings(settings)
            .public_key(&credentials.public_key)
            .user_data(user_data)
            .build()?;

        info!(host = %request.name, instance_type = %request.instance_type, "creating instance");
        let handle = self
            .backend
            .create(&request)
            .await
            .map_err(DeployError::Create)?;
        let networking = self
            .backend
            .wait_for_ready(&handle)
            .await
            .map_err(|source| DeployError::Wait {
                instance_id: handle.id.clone(),
                source,
            })?;

        let target = RemoteTarget {
            identity_file: Some(credentials.identity_file.clone()),
            ..remote_target(settings, &networking.host, networking.ssh_port)
        };
        wait_for_boot(&self.executor, &target, &handle.id, settings.boot).await?;

        let dependencies = provisioning_dependencies(&handle.id, &settings.domain_name);
        let report = Sequencer::new(&self.executor, &variables, ledger)
            .run(&manifest, &target, &handle.id, &dependencies)
            .map_err(|source| DeployError::Sequence {
                instance_id: handle.id.clone(),
                source: Box::new(source),
            })?;

        info!(instance = %handle.id, host = %networking.host, "development server ready");
        Ok(DeployOutcome {
            handle,
            networking,
            report,
            credentials_created: credentials.created,
        })
    }

    /// Runs the teardown scripts against the instance over `ssh_port`, then
    /// destroys it.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError`] when the manifest cannot be loaded, a
    /// teardown script fails (the instance is kept), or destroy fails.
    pub async fn down<L>(
        &self,
        settings: &Settings,
        handle: InstanceHandle,
        ssh_port: u16,
        ledger: &L,
    ) -> Result<SequenceReport, DeployError<B::Error>>
    where
        L: CompletionLedger,
    {
        let variables = TemplateVariables::from_settings(settings);
        let manifest = Manifest::load(&settings.provisioning_dir())?;
        let target = remote_target(settings, &handle.name, ssh_port);

        let report = Sequencer::new(&self.executor, &variables, ledger)
            .teardown(&manifest, &target, &handle.id)
            .map_err(|source| DeployError::Sequence {
                instance_id: handle.id.clone(),
                source: Box::new(source),
            })?;

        let instance_id = handle.id.clone();
        info!(instance = %instance_id, "destroying instance");
        self.backend
            .destroy(handle)
            .await
            .map_err(|source| DeployError::Destroy {
                instance_id,
                source,
            })?;
        Ok(report)
    }
}
