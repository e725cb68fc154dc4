//! Incus implementation of the machine lifecycle.
//!
//! [`IncusDriver`] owns one virtual machine. A pre-create check resolves the
//! image, network, storage pool and profile against the server; Create then
//! submits the instance, waits for the create operation and polls the
//! instance state until the guest reports a routable IPv4 address.

pub mod api;
pub mod client;
mod error;
mod lifecycle;
mod resolver;
pub mod settings;
pub mod types;

use std::net::IpAddr;

use camino::{Utf8Path, Utf8PathBuf};

use crate::driver::{DriverFuture, MachineDriver, MachineState};
use crate::ssh_key::{KeyProvider, SshKeygen};
use client::{ConnectionSettings, Connector, InstanceServer, RestConnector};
use types::ResolvedResources;

pub use error::IncusDriverError;
pub use settings::{DriverSettings, PollSettings};

/// Name under which the driver registers with the host tool.
pub const DRIVER_NAME: &str = "incus";
/// Public image server consulted when an alias is not on the Incus server.
pub const IMAGE_SERVER: &str = "https://images.linuxcontainers.org";
/// Docker daemon TLS port.
pub const DOCKER_PORT: u16 = 2376;

/// Driver managing a single Incus virtual machine.
pub struct IncusDriver<C: Connector = RestConnector, K: KeyProvider = SshKeygen> {
    connector: C,
    keys: K,
    settings: DriverSettings,
    machine_name: String,
    ssh_key_path: Utf8PathBuf,
    server: Option<C::Server>,
    resolved: Option<ResolvedResources>,
    ssh_public_key: Option<String>,
    ip_address: Option<IpAddr>,
}

impl IncusDriver {
    /// Creates a driver talking to a real server and generating keys with
    /// `ssh-keygen`.
    #[must_use]
    pub fn new(
        machine_name: impl Into<String>,
        ssh_key_path: impl Into<Utf8PathBuf>,
        settings: DriverSettings,
    ) -> Self {
        Self::with_parts(
            RestConnector,
            SshKeygen::with_process_runner(),
            machine_name,
            ssh_key_path,
            settings,
        )
    }
}

impl<C: Connector, K: KeyProvider> IncusDriver<C, K> {
    /// Creates a driver from explicit collaborators.
    #[must_use]
    pub fn with_parts(
        connector: C,
        keys: K,
        machine_name: impl Into<String>,
        ssh_key_path: impl Into<Utf8PathBuf>,
        settings: DriverSettings,
    ) -> Self {
        Self {
            connector,
            keys,
            settings,
            machine_name: machine_name.into(),
            ssh_key_path: ssh_key_path.into(),
            server: None,
            resolved: None,
            ssh_public_key: None,
            ip_address: None,
        }
    }

    /// Settings the driver was created with.
    #[must_use]
    pub const fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Instance name, which is also its identity on the server.
    #[must_use]
    pub fn machine_name(&self) -> &str {
        &self.machine_name
    }

    /// Private key path; the public half lives next to it with `.pub`.
    #[must_use]
    pub fn ssh_key_path(&self) -> &Utf8Path {
        &self.ssh_key_path
    }

    /// Resources produced by the pre-create check, if it has run.
    #[must_use]
    pub const fn resolved(&self) -> Option<&ResolvedResources> {
        self.resolved.as_ref()
    }

    /// Public key injected into the instance, once Create has read it.
    #[must_use]
    pub fn ssh_public_key(&self) -> Option<&str> {
        self.ssh_public_key.as_deref()
    }

    /// Recorded instance address.
    #[must_use]
    pub const fn ip_address(&self) -> Option<IpAddr> {
        self.ip_address
    }

    /// Restores an address recorded by an earlier process.
    #[must_use]
    pub const fn with_ip_address(mut self, address: Option<IpAddr>) -> Self {
        self.ip_address = address;
        self
    }

    fn recorded_ip(&self) -> Result<IpAddr, IncusDriverError> {
        self.ip_address.ok_or(IncusDriverError::MissingIp)
    }

    fn docker_url(&self, state: MachineState) -> Result<String, IncusDriverError> {
        if state != MachineState::Running {
            return Err(IncusDriverError::NotRunning {
                instance: self.machine_name.clone(),
                state: state.to_string(),
            });
        }
        let ip = self.recorded_ip()?;
        Ok(match ip {
            IpAddr::V4(v4) => format!("tcp://{v4}:{DOCKER_PORT}"),
            IpAddr::V6(v6) => format!("tcp://[{v6}]:{DOCKER_PORT}"),
        })
    }
}

/// Returns the server handle in `slot`, connecting and selecting the project
/// on first use.
async fn connected<'s, C: Connector>(
    connector: &C,
    slot: &'s mut Option<C::Server>,
    settings: &DriverSettings,
) -> Result<&'s C::Server, IncusDriverError> {
    let server = match slot.take() {
        Some(server) => server,
        None => {
            let connection = ConnectionSettings {
                endpoint: settings.url.clone(),
                tls_client_cert: settings.tls_client_cert.clone(),
                tls_client_key: settings.tls_client_key.clone(),
            };
            let server =
                connector
                    .connect(&connection)
                    .await
                    .map_err(|err| IncusDriverError::Connect {
                        endpoint: settings.url.clone(),
                        message: err.to_string(),
                    })?;
            server
                .get_project(&settings.project)
                .await
                .map_err(|err| IncusDriverError::lookup("project", &settings.project, err))?;
            server.use_project(&settings.project)
        }
    };
    Ok(slot.insert(server))
}

impl<C, K> MachineDriver for IncusDriver<C, K>
where
    C: Connector,
    K: KeyProvider + Send + Sync,
{
    type Error = IncusDriverError;

    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn pre_create_check(&mut self) -> DriverFuture<'_, (), Self::Error> {
        Box::pin(self.resolve())
    }

    fn create(&mut self) -> DriverFuture<'_, IpAddr, Self::Error> {
        Box::pin(self.create_instance())
    }

    fn start(&mut self) -> DriverFuture<'_, (), Self::Error> {
        Box::pin(self.change_state(lifecycle::Transition::Start))
    }

    fn stop(&mut self) -> DriverFuture<'_, (), Self::Error> {
        Box::pin(self.change_state(lifecycle::Transition::Stop))
    }

    fn kill(&mut self) -> DriverFuture<'_, (), Self::Error> {
        Box::pin(self.change_state(lifecycle::Transition::Kill))
    }

    fn restart(&mut self) -> DriverFuture<'_, (), Self::Error> {
        Box::pin(self.change_state(lifecycle::Transition::Restart))
    }

    fn remove(&mut self) -> DriverFuture<'_, (), Self::Error> {
        Box::pin(self.remove_instance())
    }

    fn upgrade(&mut self) -> DriverFuture<'_, (), Self::Error> {
        Box::pin(async { Err(IncusDriverError::Unsupported("upgrade")) })
    }

    fn state(&mut self) -> DriverFuture<'_, MachineState, Self::Error> {
        Box::pin(self.machine_state())
    }

    fn url(&mut self) -> DriverFuture<'_, String, Self::Error> {
        Box::pin(async move {
            let state = self.machine_state().await?;
            self.docker_url(state)
        })
    }

    fn ip(&self) -> Result<IpAddr, Self::Error> {
        self.recorded_ip()
    }

    fn ssh_port(&self) -> u16 {
        if self.settings.ssh_port == 0 {
            settings::DEFAULT_SSH_PORT
        } else {
            self.settings.ssh_port
        }
    }

    fn ssh_username(&self) -> String {
        if self.settings.ssh_user.is_empty() {
            settings::DEFAULT_SSH_USER.to_owned()
        } else {
            self.settings.ssh_user.clone()
        }
    }
}

#[cfg(test)]
mod tests;
