//! Command-line interface definitions for the `devstead` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `devstead` binary.
#[derive(Debug, Parser)]
#[command(
    name = "devstead",
    about = "Provision and configure a cloud development server",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Resolve SSH credentials and merge the host into the SSH client config.
    #[command(
        name = "ssh-config",
        about = "Resolve SSH credentials and merge the host into ~/.ssh/config"
    )]
    SshConfig,
    /// Print the first-boot payload built from the userdata scripts.
    #[command(name = "user-data", about = "Print the first-boot payload")]
    UserData,
    /// Wait for first boot, then run the provisioning scripts.
    #[command(
        name = "provision",
        about = "Wait for first boot, then run the provisioning scripts over SSH"
    )]
    Provision(ProvisionCommand),
    /// Run the teardown scripts in reverse order.
    #[command(name = "teardown", about = "Run the teardown scripts in reverse order")]
    Teardown(TeardownCommand),
}

/// Arguments for the `devstead provision` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ProvisionCommand {
    /// Identifier of the compute instance; steps already completed for it are
    /// skipped.
    #[arg(long, value_name = "ID")]
    pub(crate) instance_id: String,
    /// Re-run every step even when it already completed for this instance.
    #[arg(long)]
    pub(crate) force: bool,
}

/// Arguments for the `devstead teardown` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct TeardownCommand {
    /// Identifier of the compute instance the scripts ran against.
    #[arg(long, value_name = "ID")]
    pub(crate) instance_id: String,
}
