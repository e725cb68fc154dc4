//! Core library for the `incus-machine` provisioning driver.
//!
//! The crate exposes a machine lifecycle abstraction and an Incus
//! implementation that creates virtual machines on an Incus server
//! (pre-create check → create → wait for an address → start/stop/remove),
//! together with the per-machine state store the CLI uses between runs.

pub mod cloud_init;
pub mod command;
pub mod config;
pub mod driver;
mod files;
pub mod incus;
pub mod ssh_key;
pub mod store;
pub mod test_support;

pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{ConfigError, IncusConfig};
pub use driver::{DriverFuture, MachineDriver, MachineState};
pub use incus::{
    DRIVER_NAME, DriverSettings, IMAGE_SERVER, IncusDriver, IncusDriverError, PollSettings,
};
pub use ssh_key::{KeyError, KeyProvider, SshKeygen};
pub use store::{MachineRecord, MachineStore, StoreError};
