//! Core library for the devstead development server provisioner.
//!
//! The crate merges host entries into the local SSH client configuration,
//! assembles a first-boot payload from distribution scripts, and runs an
//! ordered, fail-fast sequence of provisioning scripts on the new host over
//! the system `ssh` client. Compute and DNS resources are reached through the
//! [`Backend`] abstraction.

pub mod backend;
pub mod config;
pub mod credentials;
pub mod deploy;
pub mod files;
pub mod provision;
pub mod remote;
pub mod ssh_config;
pub mod test_support;
pub mod user_data;
pub mod variables;

pub use backend::{
    Backend, InstanceHandle, InstanceNetworking, InstanceRequest, InstanceRequestBuilder,
};
pub use config::{DevServerConfig, Settings};
pub use deploy::{DeployError, DeployOrchestrator, DeployOutcome};
pub use provision::{Manifest, SequenceError, SequenceReport, Sequencer};
pub use remote::{RemoteExecutor, SshExecutor};
pub use ssh_config::{HostConfigWriter, SshConfigStore};
pub use variables::{TemplateVariables, VariableResolver};
