//! Binary entry point for the devstead CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use devstead::config::{ConfigError, DevServerConfig, Settings};
use devstead::credentials::{CredentialError, CredentialResolver};
use devstead::deploy::{BootError, provisioning_dependencies, remote_target, wait_for_boot};
use devstead::provision::{
    FileLedger, Manifest, ManifestError, SequenceError, SequenceReport, Sequencer,
};
use devstead::remote::{ProcessCommandRunner, RemoteConfig, RemoteError, SshExecutor};
use devstead::ssh_config::{HostConfigWriter, SshConfigError, SshConfigStore};
use devstead::user_data::{UserDataError, build_user_data};
use devstead::variables::TemplateVariables;

mod cli;

use cli::{Cli, ProvisionCommand, TeardownCommand};

const LOG_ENV_VAR: &str = "DEVSTEAD_LOG";
const DEFAULT_LOG_FILTER: &str = "devstead=info";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("remote execution error: {0}")]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("ssh config error: {0}")]
    SshConfig(#[from] SshConfigError),
    #[error(transparent)]
    UserData(#[from] UserDataError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Boot(#[from] BootError),
    #[error(transparent)]
    Sequence(#[from] Box<SequenceError>),
    #[error("failed to write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let settings = DevServerConfig::load_settings()?;
    match cli {
        Cli::SshConfig => ssh_config_command(&settings, io::stdout()),
        Cli::UserData => user_data_command(&settings, io::stdout()),
        Cli::Provision(args) => provision_command(&settings, &args, io::stdout()).await,
        Cli::Teardown(args) => teardown_command(&settings, &args, io::stdout()),
    }
}

fn ssh_config_command(settings: &Settings, out: impl Write) -> Result<(), CliError> {
    let remote = RemoteConfig::load_without_cli_args()?;
    let store = SshConfigStore::in_ssh_dir(&settings.ssh_dir);
    let runner = ProcessCommandRunner;
    let credentials =
        CredentialResolver::new(&runner, &store, &remote.ssh_keygen_bin).resolve(settings)?;
    let path = store.ensure_host_entry(
        &settings.domain_name,
        &settings.ssh_user,
        &credentials.identity_file,
    )?;
    write_lines(
        out,
        &[format!(
            "updated {path} for {} (identity {})",
            settings.domain_name, credentials.identity_file
        )],
    )
}

fn user_data_command(settings: &Settings, mut out: impl Write) -> Result<(), CliError> {
    let variables = TemplateVariables::from_settings(settings);
    let payload = build_user_data(&settings.userdata_dir(), &variables)?;
    out.write_all(payload.as_bytes())
        .and_then(|()| out.flush())
        .map_err(|err| CliError::Output(err.to_string()))
}

async fn provision_command(
    settings: &Settings,
    args: &ProvisionCommand,
    out: impl Write,
) -> Result<(), CliError> {
    let remote = RemoteConfig::load_without_cli_args()?;
    let target = remote_target(settings, &settings.domain_name, remote.port);
    let manifest = Manifest::load(&settings.provisioning_dir())?;
    let executor = SshExecutor::with_process_runner(remote)?;
    wait_for_boot(&executor, &target, &args.instance_id, settings.boot).await?;

    let variables = TemplateVariables::from_settings(settings);
    let ledger = FileLedger::new(settings.ledger_file());
    let dependencies = provisioning_dependencies(&args.instance_id, &settings.domain_name);
    let report = Sequencer::new(&executor, &variables, &ledger)
        .force(args.force)
        .run(&manifest, &target, &args.instance_id, &dependencies)
        .map_err(Box::new)?;
    write_report(out, &report)
}

fn teardown_command(
    settings: &Settings,
    args: &TeardownCommand,
    out: impl Write,
) -> Result<(), CliError> {
    let remote = RemoteConfig::load_without_cli_args()?;
    let target = remote_target(settings, &settings.domain_name, remote.port);
    let manifest = Manifest::load(&settings.provisioning_dir())?;
    let executor = SshExecutor::with_process_runner(remote)?;
    let variables = TemplateVariables::from_settings(settings);
    let ledger = FileLedger::new(settings.ledger_file());
    let report = Sequencer::new(&executor, &variables, &ledger)
        .teardown(&manifest, &target, &args.instance_id)
        .map_err(Box::new)?;
    write_report(out, &report)
}

fn write_report(out: impl Write, report: &SequenceReport) -> Result<(), CliError> {
    let lines: Vec<String> = report
        .steps
        .iter()
        .map(|step| format!("{}: {}", step.name, step.state))
        .collect();
    write_lines(out, &lines)
}

fn write_lines(mut out: impl Write, lines: &[String]) -> Result<(), CliError> {
    lines
        .iter()
        .try_for_each(|line| writeln!(out, "{line}"))
        .map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "devstead: {err}").ok();
    if let Some(stdout) = failed_step_output(err) {
        writeln!(target, "--- step output ---\n{stdout}").ok();
    }
}

fn failed_step_output(err: &CliError) -> Option<&str> {
    let CliError::Sequence(source) = err else {
        return None;
    };
    match source.as_ref() {
        SequenceError::StepFailed { stdout, .. } => {
            Some(stdout.trim_end()).filter(|text| !text.trim().is_empty())
        }
        _ => None,
    }
}
