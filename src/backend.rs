//! Backend abstraction for the compute and DNS resources behind a
//! development server.
//!
//! A backend turns an [`InstanceRequest`] into a running host reachable at
//! its DNS name. Concrete providers live outside this crate; orchestration
//! only relies on the three operations of [`Backend`].

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::config::Settings;

/// Parameters required to create a development server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceRequest {
    /// Fully qualified DNS name the host is published under.
    pub name: String,
    /// Commercial type or flavour to request (for example `t3.large`).
    pub instance_type: String,
    /// Distribution whose image the host boots from.
    pub os_dist: String,
    /// Boot disk size in gigabytes.
    pub disk_size_gb: u32,
    /// OpenSSH public key authorised for the login user.
    pub public_key: String,
    /// Bootstrap payload executed at first boot.
    pub user_data: String,
}

impl InstanceRequest {
    /// Starts a builder for an [`InstanceRequest`].
    #[must_use]
    pub fn builder() -> InstanceRequestBuilder {
        InstanceRequestBuilder::new()
    }

    /// Validates the request, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when a string field is empty or
    /// the disk size is zero.
    pub fn validate(&self) -> Result<(), BackendError> {
        let fields = [
            ("name", &self.name),
            ("instance_type", &self.instance_type),
            ("os_dist", &self.os_dist),
            ("public_key", &self.public_key),
            ("user_data", &self.user_data),
        ];
        if let Some((field, _)) = fields.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(BackendError::Validation((*field).to_owned()));
        }
        if self.disk_size_gb == 0 {
            return Err(BackendError::Validation(String::from("disk_size_gb")));
        }
        Ok(())
    }
}

/// Builder for [`InstanceRequest`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceRequestBuilder {
    name: String,
    instance_type: String,
    os_dist: String,
    disk_size_gb: u32,
    public_key: String,
    user_data: String,
}

impl InstanceRequestBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the host name, flavour, distribution and disk size from
    /// validated settings.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new()
            .name(&settings.domain_name)
            .instance_type(&settings.instance_type)
            .os_dist(&settings.os_dist)
            .disk_size_gb(settings.disk_size_gb)
    }

    /// Sets the DNS name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the instance type.
    #[must_use]
    pub fn instance_type(mut self, value: impl Into<String>) -> Self {
        self.instance_type = value.into();
        self
    }

    /// Sets the distribution.
    #[must_use]
    pub fn os_dist(mut self, value: impl Into<String>) -> Self {
        self.os_dist = value.into();
        self
    }

    /// Sets the boot disk size.
    #[must_use]
    pub const fn disk_size_gb(mut self, value: u32) -> Self {
        self.disk_size_gb = value;
        self
    }

    /// Sets the authorised public key.
    #[must_use]
    pub fn public_key(mut self, value: impl Into<String>) -> Self {
        self.public_key = value.into();
        self
    }

    /// Sets the bootstrap payload. It is passed through untrimmed.
    #[must_use]
    pub fn user_data(mut self, value: impl Into<String>) -> Self {
        self.user_data = value.into();
        self
    }

    /// Builds and validates the [`InstanceRequest`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when any required field is empty.
    pub fn build(self) -> Result<InstanceRequest, BackendError> {
        let request = InstanceRequest {
            name: self.name.trim().to_owned(),
            instance_type: self.instance_type.trim().to_owned(),
            os_dist: self.os_dist.trim().to_owned(),
            disk_size_gb: self.disk_size_gb,
            public_key: self.public_key.trim().to_owned(),
            user_data: self.user_data,
        };
        request.validate()?;
        Ok(request)
    }
}

/// Handle returned by a backend once an instance has been created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceHandle {
    /// Provider specific identifier for the instance. Used as the
    /// provisioning trigger.
    pub id: String,
    /// DNS name the instance was created under.
    pub name: String,
}

/// Connection details for reaching an instance once it is ready.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceNetworking {
    /// Address or DNS name to connect to.
    pub host: String,
    /// TCP port for SSH.
    pub ssh_port: u16,
}

/// Errors raised by backends.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface implemented by compute and DNS providers.
pub trait Backend {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates the instance and its DNS record, returning a handle used for
    /// subsequent calls.
    fn create<'a>(
        &'a self,
        request: &'a InstanceRequest,
    ) -> BackendFuture<'a, InstanceHandle, Self::Error>;

    /// Blocks until the instance is reachable over SSH and returns
    /// networking info.
    fn wait_for_ready<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> BackendFuture<'a, InstanceNetworking, Self::Error>;

    /// Destroys the instance and its DNS record.
    fn destroy(&self, handle: InstanceHandle) -> BackendFuture<'_, (), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_settings;
    use rstest::rstest;

    fn complete() -> InstanceRequestBuilder {
        InstanceRequestBuilder::from_settings(&sample_settings())
            .public_key("ssh-ed25519 AAAA dev")
            .user_data("#!/bin/bash\necho hi\n")
    }

    #[test]
    fn builder_copies_settings_and_trims() {
        let request = complete()
            .public_key("  ssh-ed25519 AAAA dev \n")
            .build()
            .unwrap_or_else(|err| panic!("build: {err}"));

        assert_eq!(request.name, "devbox.example.com");
        assert_eq!(request.instance_type, "t3.large");
        assert_eq!(request.os_dist, "ubuntu");
        assert_eq!(request.disk_size_gb, 128);
        assert_eq!(request.public_key, "ssh-ed25519 AAAA dev");
        assert_eq!(request.user_data, "#!/bin/bash\necho hi\n");
    }

    #[rstest]
    #[case::name(complete().name(" "), "name")]
    #[case::instance_type(complete().instance_type(""), "instance_type")]
    #[case::public_key(complete().public_key(""), "public_key")]
    #[case::user_data(complete().user_data("\n"), "user_data")]
    #[case::disk(complete().disk_size_gb(0), "disk_size_gb")]
    fn builder_rejects_missing_fields(
        #[case] builder: InstanceRequestBuilder,
        #[case] field: &str,
    ) {
        let err = builder.build().expect_err("incomplete request should fail");
        assert_eq!(err, BackendError::Validation(field.to_owned()));
    }
}
