//! Persisted driver settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Default number of virtual CPUs.
pub const DEFAULT_CPU_COUNT: u32 = 1;
/// Default memory size in MiB.
pub const DEFAULT_MEMORY_MIB: u64 = 1024;
/// Default root disk size in MiB.
pub const DEFAULT_DISK_MIB: u64 = 10240;
/// Default project.
pub const DEFAULT_PROJECT: &str = "default";
/// Default profile.
pub const DEFAULT_PROFILE: &str = "default";
/// Default network.
pub const DEFAULT_NETWORK: &str = "incusbr0";
/// Default storage pool.
pub const DEFAULT_STORAGE: &str = "local";
/// SSH port reported when none is configured.
pub const DEFAULT_SSH_PORT: u16 = 22;
/// SSH user reported when none is configured.
pub const DEFAULT_SSH_USER: &str = "root";
/// Seconds between instance state queries while waiting for an address.
pub const DEFAULT_IP_POLL_INTERVAL_SECS: u64 = 5;
/// Maximum number of instance state queries while waiting for an address.
pub const DEFAULT_IP_POLL_ATTEMPTS: u32 = 100;

/// Bounds on the address polling loop.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PollSettings {
    /// Seconds slept between consecutive queries.
    pub interval_secs: u64,
    /// Maximum number of queries.
    pub attempts: u32,
}

impl PollSettings {
    /// Sleep between consecutive queries.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_IP_POLL_INTERVAL_SECS,
            attempts: DEFAULT_IP_POLL_ATTEMPTS,
        }
    }
}

/// Settings a driver is created with and that are stored with the machine.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct DriverSettings {
    /// Server URL.
    pub url: String,
    /// PEM encoded TLS client certificate.
    pub tls_client_cert: String,
    /// PEM encoded TLS client key.
    pub tls_client_key: String,
    /// Virtual CPU count.
    pub cpu_count: u32,
    /// Memory in MiB.
    pub memory_mib: u64,
    /// Root disk size in MiB.
    pub disk_mib: u64,
    /// Project the instance lives in.
    pub project: String,
    /// Profile applied to the instance.
    pub profile: String,
    /// Network the primary NIC attaches to.
    pub network_name: String,
    /// Storage pool for the root disk.
    pub storage_name: String,
    /// Image alias.
    pub image_name: String,
    /// Path to an optional user-data file; empty when unused.
    pub cloud_init_user_data: String,
    /// SSH port, `0` meaning unset.
    pub ssh_port: u16,
    /// SSH user, empty meaning unset.
    pub ssh_user: String,
    /// Address polling bounds.
    pub ip_poll: PollSettings,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            tls_client_cert: String::new(),
            tls_client_key: String::new(),
            cpu_count: DEFAULT_CPU_COUNT,
            memory_mib: DEFAULT_MEMORY_MIB,
            disk_mib: DEFAULT_DISK_MIB,
            project: DEFAULT_PROJECT.to_owned(),
            profile: DEFAULT_PROFILE.to_owned(),
            network_name: DEFAULT_NETWORK.to_owned(),
            storage_name: DEFAULT_STORAGE.to_owned(),
            image_name: String::new(),
            cloud_init_user_data: String::new(),
            ssh_port: DEFAULT_SSH_PORT,
            ssh_user: DEFAULT_SSH_USER.to_owned(),
            ip_poll: PollSettings::default(),
        }
    }
}

impl DriverSettings {
    /// Checks the connection settings, resource sizes and polling bounds.
    ///
    /// Resource names are checked by the pre-create check, where an empty
    /// name is reported against the resource it names.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for an empty URL or credential
    /// and [`ConfigError::Invalid`] for a zero size or polling budget.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, field) in [
            (&self.url, "url"),
            (&self.tls_client_cert, "tls_client_cert"),
            (&self.tls_client_key, "tls_client_key"),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(format!("{field} must be set")));
            }
        }
        for (value, field) in [
            (u64::from(self.cpu_count), "cpu_count"),
            (self.memory_mib, "memory_mib"),
            (self.disk_mib, "disk_mib"),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{field} must be at least 1")));
            }
        }
        if self.ip_poll.attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "ip_poll_attempts must be at least 1",
            )));
        }
        Ok(())
    }
}
