//! Lifecycle contract the host orchestration tool drives every provider
//! through.

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// Machine state as reported to the host tool.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum MachineState {
    /// The instance is absent or in a state with no host equivalent.
    #[default]
    None,
    /// The instance is running.
    Running,
    /// The instance is frozen.
    Paused,
    /// The instance is stopped.
    Stopped,
    /// The instance is booting or shutting down.
    Starting,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "None",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
        })
    }
}

/// Future returned by driver operations.
pub type DriverFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Operations every machine driver provides.
///
/// A driver manages exactly one instance and is driven by a single caller,
/// so every state-changing call takes `&mut self`.
pub trait MachineDriver {
    /// Provider specific error type returned by the driver.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Short provider name, used by the host tool to pick the driver.
    fn driver_name(&self) -> &'static str;

    /// Validates settings and resolves server resources ahead of creation.
    fn pre_create_check(&mut self) -> DriverFuture<'_, (), Self::Error>;

    /// Creates and boots the instance, returning its routable address.
    fn create(&mut self) -> DriverFuture<'_, IpAddr, Self::Error>;

    /// Boots a stopped instance.
    fn start(&mut self) -> DriverFuture<'_, (), Self::Error>;

    /// Requests a clean shutdown.
    fn stop(&mut self) -> DriverFuture<'_, (), Self::Error>;

    /// Forces the instance off.
    fn kill(&mut self) -> DriverFuture<'_, (), Self::Error>;

    /// Reboots the instance.
    fn restart(&mut self) -> DriverFuture<'_, (), Self::Error>;

    /// Deletes the instance.
    fn remove(&mut self) -> DriverFuture<'_, (), Self::Error>;

    /// Upgrades the container runtime inside the instance.
    fn upgrade(&mut self) -> DriverFuture<'_, (), Self::Error>;

    /// Reports the current machine state.
    fn state(&mut self) -> DriverFuture<'_, MachineState, Self::Error>;

    /// Docker daemon URL for the running instance.
    fn url(&mut self) -> DriverFuture<'_, String, Self::Error>;

    /// Recorded instance address.
    ///
    /// # Errors
    ///
    /// Fails when no address has been recorded.
    fn ip(&self) -> Result<IpAddr, Self::Error>;

    /// Host the SSH client connects to.
    ///
    /// # Errors
    ///
    /// Fails when no address has been recorded.
    fn ssh_hostname(&self) -> Result<IpAddr, Self::Error> {
        self.ip()
    }

    /// Port the SSH client connects to.
    fn ssh_port(&self) -> u16;

    /// User the SSH client logs in as.
    fn ssh_username(&self) -> String;
}
