//! SSH key pair resolution for the development server.
//!
//! Operator supplied keys win. Without them the key pair lives at
//! `<ssh_dir>/<domain>` and is generated with the system `ssh-keygen` the
//! first time it is needed. A freshly generated pair is also registered in
//! the SSH client configuration so `ssh <domain>` works immediately.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::info;

use crate::config::Settings;
use crate::files::{self, FileError};
use crate::remote::{CommandRunner, RemoteError};
use crate::ssh_config::{HostConfigWriter, SshConfigError};

/// Key type passed to `ssh-keygen`.
pub const KEY_TYPE: &str = "ed25519";

/// Errors raised while resolving credentials.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CredentialError {
    /// Raised when `ssh-keygen` could not be started.
    #[error("failed to run key generator: {0}")]
    Spawn(#[from] RemoteError),
    /// Raised when `ssh-keygen` exits unsuccessfully.
    #[error("{program} exited with status {status}: {stderr}")]
    Keygen {
        /// Key generator binary.
        program: String,
        /// Exit status, or `unknown` when the process was killed.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when key files cannot be read or written.
    #[error(transparent)]
    Io(#[from] FileError),
    /// Raised when the SSH client configuration cannot be updated.
    #[error(transparent)]
    SshConfig(#[from] SshConfigError),
}

/// Resolved key material for one host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Credentials {
    /// OpenSSH public key line installed on the server.
    pub public_key: String,
    /// Private key file used by the SSH client.
    pub identity_file: Utf8PathBuf,
    /// Whether this call generated the key pair.
    pub created: bool,
}

/// Resolves credentials using a command runner for `ssh-keygen` and a
/// writer for the SSH client configuration.
pub struct CredentialResolver<'a, R, W>
where
    R: CommandRunner,
    W: HostConfigWriter,
{
    runner: &'a R,
    writer: &'a W,
    ssh_keygen_bin: &'a str,
}

impl<'a, R, W> CredentialResolver<'a, R, W>
where
    R: CommandRunner,
    W: HostConfigWriter,
{
    /// Builds a resolver.
    #[must_use]
    pub const fn new(runner: &'a R, writer: &'a W, ssh_keygen_bin: &'a str) -> Self {
        Self {
            runner,
            writer,
            ssh_keygen_bin,
        }
    }

    /// Returns the key pair for `settings.domain_name`.
    ///
    /// Supplied keys are used as-is, writing a supplied private key to the
    /// identity file. An existing pair at the identity path is reused.
    /// Otherwise a new pair is generated and the host entry is merged into
    /// the SSH client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when key generation, file access, or the
    /// configuration update fails.
    pub fn resolve(&self, settings: &Settings) -> Result<Credentials, CredentialError> {
        let identity_file = settings.identity_file();

        if let Some(keys) = &settings.keys {
            if let Some(private) = &keys.private {
                files::write_private(&identity_file, private)?;
            }
            info!(host = %settings.domain_name, "using supplied SSH key pair");
            return Ok(Credentials {
                public_key: keys.public.clone(),
                identity_file,
                created: false,
            });
        }

        let existing_public = if files::path_exists(&identity_file)? {
            files::read_optional(&public_key_path(&identity_file))?
        } else {
            None
        };
        if let Some(public_key) = existing_public {
            info!(path = %identity_file, "reusing existing SSH key pair");
            return Ok(Credentials {
                public_key: public_key.trim().to_owned(),
                identity_file,
                created: false,
            });
        }

        let public_key = self.generate(&identity_file, &settings.domain_name)?;
        self.writer
            .ensure_host_entry(&settings.domain_name, &settings.ssh_user, &identity_file)?;
        Ok(Credentials {
            public_key,
            identity_file,
            created: true,
        })
    }

    fn generate(&self, identity_file: &Utf8Path, comment: &str) -> Result<String, CredentialError> {
        if let Some(dir) = identity_file.parent() {
            files::ensure_private_dir(dir)?;
        }
        let args: Vec<OsString> = [
            "-q",
            "-t",
            KEY_TYPE,
            "-N",
            "",
            "-C",
            comment,
            "-f",
            identity_file.as_str(),
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        let output = self.runner.run(self.ssh_keygen_bin, &args)?;
        if !output.is_success() {
            return Err(CredentialError::Keygen {
                program: self.ssh_keygen_bin.to_owned(),
                status: output
                    .code
                    .map_or_else(|| String::from("unknown"), |code| code.to_string()),
                stderr: output.stderr.trim().to_owned(),
            });
        }

        files::restrict_to_owner(identity_file)?;
        let public_key = files::read_to_string(&public_key_path(identity_file))?;
        info!(path = %identity_file, "generated SSH key pair");
        Ok(public_key.trim().to_owned())
    }
}

fn public_key_path(identity_file: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{identity_file}.pub"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SuppliedKeys;
    use crate::test_support::{FakeKeygen, MemoryHostConfig, ScriptedRunner, sample_settings};
    use tempfile::TempDir;

    fn settings_in(tmp: &TempDir) -> Settings {
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
        Settings {
            ssh_dir: root.join(".ssh"),
            ..sample_settings()
        }
    }

    #[test]
    fn generates_pair_and_registers_host() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let settings = settings_in(&tmp);
        let keygen = FakeKeygen::new();
        let writer = MemoryHostConfig::new();

        let credentials = CredentialResolver::new(&keygen, &writer, "ssh-keygen")
            .resolve(&settings)
            .unwrap_or_else(|err| panic!("resolve: {err}"));

        assert!(credentials.created);
        assert_eq!(credentials.public_key, "ssh-ed25519 AAAAfake devbox.example.com");
        assert_eq!(credentials.identity_file, settings.ssh_dir.join("devbox.example.com"));

        let invocations = keygen.invocations();
        let commands: Vec<String> = invocations
            .iter()
            .map(|call| call.command_string())
            .collect();
        assert_eq!(
            commands,
            vec![format!(
                "ssh-keygen -q -t ed25519 -N  -C devbox.example.com -f {}",
                credentials.identity_file
            )]
        );

        let calls = writer.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls.iter().all(|call| call.host == "devbox.example.com"
            && call.user == "ubuntu"
            && call.identity_file == credentials.identity_file));
    }

    #[cfg(unix)]
    #[test]
    fn generated_private_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let settings = settings_in(&tmp);
        let keygen = FakeKeygen::new();
        let writer = MemoryHostConfig::new();
        let credentials = CredentialResolver::new(&keygen, &writer, "ssh-keygen")
            .resolve(&settings)
            .unwrap_or_else(|err| panic!("resolve: {err}"));

        let mode = std::fs::metadata(&credentials.identity_file)
            .unwrap_or_else(|err| panic!("metadata: {err}"))
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, files::PRIVATE_FILE_MODE);
    }

    #[test]
    fn existing_pair_is_reused() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let settings = settings_in(&tmp);
        let keygen = FakeKeygen::new();
        let writer = MemoryHostConfig::new();
        let resolver = CredentialResolver::new(&keygen, &writer, "ssh-keygen");

        resolver
            .resolve(&settings)
            .unwrap_or_else(|err| panic!("first resolve: {err}"));
        let second = resolver
            .resolve(&settings)
            .unwrap_or_else(|err| panic!("second resolve: {err}"));

        assert!(!second.created);
        assert_eq!(keygen.invocations().len(), 1);
        assert_eq!(writer.calls().len(), 1);
    }

    #[test]
    fn supplied_keys_skip_generation() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let settings = Settings {
            keys: Some(SuppliedKeys {
                public: String::from("ssh-ed25519 AAAAsupplied ops"),
                private: Some(String::from("PRIVATE")),
            }),
            ..settings_in(&tmp)
        };
        let runner = ScriptedRunner::new();
        let writer = MemoryHostConfig::new();

        let credentials = CredentialResolver::new(&runner, &writer, "ssh-keygen")
            .resolve(&settings)
            .unwrap_or_else(|err| panic!("resolve: {err}"));

        assert!(!credentials.created);
        assert_eq!(credentials.public_key, "ssh-ed25519 AAAAsupplied ops");
        assert!(runner.invocations().is_empty());
        assert!(writer.calls().is_empty());
        let written = files::read_to_string(&credentials.identity_file)
            .unwrap_or_else(|err| panic!("read: {err}"));
        assert_eq!(written, "PRIVATE");
    }

    #[test]
    fn keygen_failure_is_reported() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let settings = settings_in(&tmp);
        let runner = ScriptedRunner::new();
        runner.push_output(Some(1), "", "unknown key type\n");
        let writer = MemoryHostConfig::new();

        let err = CredentialResolver::new(&runner, &writer, "ssh-keygen")
            .resolve(&settings)
            .expect_err("keygen failure should surface");

        assert_eq!(
            err,
            CredentialError::Keygen {
                program: String::from("ssh-keygen"),
                status: String::from("1"),
                stderr: String::from("unknown key type"),
            }
        );
        assert!(writer.calls().is_empty());
    }
}
