//! Command-line interface definitions for the `incus-machine` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `incus-machine` binary.
#[derive(Debug, Parser)]
#[command(
    name = "incus-machine",
    about = "Create and manage virtual machines on an Incus server",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Directory holding machine state (defaults to `store_path` from
    /// configuration, then `~/.incus-machine`).
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) store_path: Option<String>,
    /// Lifecycle operation to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Lifecycle operations, each acting on one named machine.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Resolve resources, create the instance and wait for its address.
    #[command(name = "create")]
    Create(MachineArgs),
    /// Boot a stopped instance.
    #[command(name = "start")]
    Start(MachineArgs),
    /// Shut the instance down cleanly.
    #[command(name = "stop")]
    Stop(MachineArgs),
    /// Reboot the instance.
    #[command(name = "restart")]
    Restart(MachineArgs),
    /// Force the instance off.
    #[command(name = "kill")]
    Kill(MachineArgs),
    /// Delete the instance and its local state.
    #[command(name = "rm")]
    Rm(RmArgs),
    /// Print the machine state.
    #[command(name = "status")]
    Status(MachineArgs),
    /// Print the Docker daemon URL.
    #[command(name = "url")]
    Url(MachineArgs),
    /// Print the recorded IP address.
    #[command(name = "ip")]
    Ip(MachineArgs),
    /// Print SSH connection details.
    #[command(name = "ssh-info")]
    SshInfo(MachineArgs),
    /// Upgrade the container runtime (not supported).
    #[command(name = "upgrade")]
    Upgrade(MachineArgs),
}

/// Arguments shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct MachineArgs {
    /// Machine name, also used as the instance name.
    pub(crate) name: String,
}

/// Arguments for `rm`.
#[derive(Debug, Args)]
pub(crate) struct RmArgs {
    /// Machine name, also used as the instance name.
    pub(crate) name: String,
    /// Remove local state even when the instance cannot be deleted.
    #[arg(short, long)]
    pub(crate) force: bool,
}
