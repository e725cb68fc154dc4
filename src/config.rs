//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::files;
use crate::incus::settings::{
    DEFAULT_CPU_COUNT, DEFAULT_DISK_MIB, DEFAULT_IP_POLL_ATTEMPTS, DEFAULT_IP_POLL_INTERVAL_SECS,
    DEFAULT_MEMORY_MIB, DEFAULT_NETWORK, DEFAULT_PROFILE, DEFAULT_PROJECT, DEFAULT_SSH_PORT,
    DEFAULT_SSH_USER, DEFAULT_STORAGE, DriverSettings, PollSettings,
};

/// Default location of the machine store.
pub const DEFAULT_STORE_PATH: &str = "~/.incus-machine";

const PEM_MARKER: &str = "-----BEGIN";
const CONFIG_FILE: &str = "incus-machine.toml";

/// Incus driver configuration derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "INCUS",
    discovery(
        app_name = "incus-machine",
        env_var = "INCUS_MACHINE_CONFIG_PATH",
        config_file_name = "incus-machine.toml",
        dotfile_name = ".incus-machine.toml",
        project_file_name = "incus-machine.toml"
    )
)]
pub struct IncusConfig {
    /// Server URL, for example `https://incus.example.com:8443`.
    #[ortho_config(default = String::new())]
    pub url: String,
    /// TLS client certificate, either PEM text or a path to a PEM file.
    #[ortho_config(default = String::new())]
    pub tls_client_cert: String,
    /// TLS client key, either PEM text or a path to a PEM file.
    #[ortho_config(default = String::new())]
    pub tls_client_key: String,
    /// Virtual CPU count.
    #[ortho_config(default = DEFAULT_CPU_COUNT)]
    pub cpu_count: u32,
    /// Memory size in MiB.
    #[ortho_config(default = DEFAULT_MEMORY_MIB)]
    pub memory_size: u64,
    /// Root disk size in MiB.
    #[ortho_config(default = DEFAULT_DISK_MIB)]
    pub disk_size: u64,
    /// Project the instance is created in.
    #[ortho_config(default = DEFAULT_PROJECT.to_owned())]
    pub project: String,
    /// Profile applied to the instance.
    #[ortho_config(default = DEFAULT_PROFILE.to_owned())]
    pub profile: String,
    /// Network the instance's NIC attaches to.
    #[ortho_config(default = DEFAULT_NETWORK.to_owned())]
    pub network_name: String,
    /// Storage pool backing the root disk.
    #[ortho_config(default = DEFAULT_STORAGE.to_owned())]
    pub storage_name: String,
    /// Image alias, looked up on the server first and then on the public
    /// image server. Required.
    #[ortho_config(default = String::new())]
    pub image_name: String,
    /// Optional path to a cloud-init user-data file.
    pub cloudinit_userdata: Option<String>,
    /// SSH port the host tool connects to.
    #[ortho_config(default = DEFAULT_SSH_PORT)]
    pub ssh_port: u16,
    /// SSH user the host tool connects as.
    #[ortho_config(default = DEFAULT_SSH_USER.to_owned())]
    pub ssh_user: String,
    /// Directory holding per-machine state. Supports `~/`.
    #[ortho_config(default = DEFAULT_STORE_PATH.to_owned())]
    pub store_path: String,
    /// Seconds between state queries while waiting for an address.
    #[ortho_config(default = DEFAULT_IP_POLL_INTERVAL_SECS)]
    pub ip_poll_interval_secs: u64,
    /// Maximum number of state queries while waiting for an address.
    #[ortho_config(default = DEFAULT_IP_POLL_ATTEMPTS)]
    pub ip_poll_attempts: u32,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl IncusConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to {CONFIG_FILE}",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::Invalid(format!(
                "{} must be greater than zero (check {} or {} in {CONFIG_FILE})",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("incus-machine")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages say how to provide a
    /// missing value through the environment or the configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a size or polling bound is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.url,
            &FieldMetadata::new("Incus server URL", "INCUS_URL", "url"),
        )?;
        Self::require_field(
            &self.tls_client_cert,
            &FieldMetadata::new(
                "TLS client certificate",
                "INCUS_TLS_CLIENT_CERT",
                "tls_client_cert",
            ),
        )?;
        Self::require_field(
            &self.tls_client_key,
            &FieldMetadata::new("TLS client key", "INCUS_TLS_CLIENT_KEY", "tls_client_key"),
        )?;
        Self::require_field(
            &self.image_name,
            &FieldMetadata::new("image alias", "INCUS_IMAGE_NAME", "image_name"),
        )?;
        Self::require_positive(
            u64::from(self.cpu_count),
            &FieldMetadata::new("CPU count", "INCUS_CPU_COUNT", "cpu_count"),
        )?;
        Self::require_positive(
            self.memory_size,
            &FieldMetadata::new("memory size", "INCUS_MEMORY_SIZE", "memory_size"),
        )?;
        Self::require_positive(
            self.disk_size,
            &FieldMetadata::new("disk size", "INCUS_DISK_SIZE", "disk_size"),
        )?;
        Self::require_positive(
            self.ip_poll_interval_secs,
            &FieldMetadata::new(
                "IP poll interval",
                "INCUS_IP_POLL_INTERVAL_SECS",
                "ip_poll_interval_secs",
            ),
        )?;
        Self::require_positive(
            u64::from(self.ip_poll_attempts),
            &FieldMetadata::new(
                "IP poll attempts",
                "INCUS_IP_POLL_ATTEMPTS",
                "ip_poll_attempts",
            ),
        )?;
        Ok(())
    }

    /// Validates the configuration and converts it into driver settings.
    ///
    /// Credentials given as file paths are read so the settings always carry
    /// PEM text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or a credential file
    /// cannot be read.
    pub fn settings(&self) -> Result<DriverSettings, ConfigError> {
        self.validate()?;
        Ok(DriverSettings {
            url: self.url.trim().to_owned(),
            tls_client_cert: read_pem(&self.tls_client_cert)?,
            tls_client_key: read_pem(&self.tls_client_key)?,
            cpu_count: self.cpu_count,
            memory_mib: self.memory_size,
            disk_mib: self.disk_size,
            project: self.project.clone(),
            profile: self.profile.clone(),
            network_name: self.network_name.clone(),
            storage_name: self.storage_name.clone(),
            image_name: self.image_name.clone(),
            cloud_init_user_data: self.cloudinit_userdata.clone().unwrap_or_default(),
            ssh_port: self.ssh_port,
            ssh_user: self.ssh_user.clone(),
            ip_poll: PollSettings {
                interval_secs: self.ip_poll_interval_secs,
                attempts: self.ip_poll_attempts,
            },
        })
    }
}

fn read_pem(value: &str) -> Result<String, ConfigError> {
    if value.contains(PEM_MARKER) {
        return Ok(value.to_owned());
    }
    let path = files::expand_tilde(value.trim());
    files::read_to_string(&path).map_err(|err| ConfigError::CredentialRead {
        path: path.to_string(),
        message: err.to_string(),
    })
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Raised when a credential file cannot be read.
    #[error("failed to read credential file `{path}`: {message}")]
    CredentialRead {
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
