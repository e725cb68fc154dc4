//! Request fragments produced by pre-create resolution.
//!
//! Devices are modelled as a tagged enum and only flattened into the untyped
//! key/value map that Incus expects when a request is serialised.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Interface name used for the primary guest NIC.
pub const GUEST_NIC_NAME: &str = "eth0";
/// Device name under which the root disk is attached.
pub const ROOT_DISK_NAME: &str = "root";
/// Mount path of the root disk inside the guest.
pub const ROOT_DISK_PATH: &str = "/";

const SOURCE_TYPE_IMAGE: &str = "image";

/// Source from which an instance is created.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InstanceSource {
    /// Source discriminator; always `image` for this driver.
    #[serde(rename = "type")]
    pub kind: String,
    /// Image alias to instantiate.
    pub alias: String,
    /// Remote image server URL, absent for images already on the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Transfer protocol for the remote image server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl InstanceSource {
    /// Image resolved from the server's own alias catalog.
    #[must_use]
    pub fn local(alias: impl Into<String>) -> Self {
        Self {
            kind: SOURCE_TYPE_IMAGE.to_owned(),
            alias: alias.into(),
            server: None,
            protocol: None,
        }
    }

    /// Image fetched by the server from a remote catalog.
    #[must_use]
    pub fn remote(
        alias: impl Into<String>,
        server: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            kind: SOURCE_TYPE_IMAGE.to_owned(),
            alias: alias.into(),
            server: Some(server.into()),
            protocol: Some(protocol.into()),
        }
    }

    /// Returns `true` when the image comes from a remote catalog.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        self.server.is_some()
    }
}

/// A device attached to the instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Device {
    /// NIC bridged onto a host bridge network.
    BridgedNic {
        /// Bridge network name, also used as the device name.
        network: String,
    },
    /// NIC attached to an overlay (OVN) network.
    OverlayNic {
        /// Overlay network name.
        network: String,
    },
    /// Root disk carved out of a storage pool.
    Disk {
        /// Storage pool name.
        pool: String,
        /// Disk size in mebibytes.
        size_mib: u64,
    },
}

impl Device {
    /// Returns `true` for NICs attached to an overlay network.
    #[must_use]
    pub const fn is_overlay(&self) -> bool {
        matches!(self, Self::OverlayNic { .. })
    }

    /// Flattens the device into the key/value map Incus expects.
    #[must_use]
    pub fn to_wire(&self) -> BTreeMap<String, String> {
        let pairs: Vec<(&str, String)> = match self {
            Self::BridgedNic { network } => vec![
                ("name", network.clone()),
                ("type", String::from("nic")),
                ("nictype", String::from("bridged")),
                ("parent", network.clone()),
            ],
            Self::OverlayNic { network } => vec![
                ("name", GUEST_NIC_NAME.to_owned()),
                ("type", String::from("nic")),
                ("network", network.clone()),
            ],
            Self::Disk { pool, size_mib } => vec![
                ("type", String::from("disk")),
                ("path", ROOT_DISK_PATH.to_owned()),
                ("pool", pool.clone()),
                ("size", format!("{size_mib}MiB")),
            ],
        };
        pairs
            .into_iter()
            .map(|(key, value)| (key.to_owned(), value))
            .collect()
    }
}

/// CPU and memory limits applied through instance configuration keys.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResourceLimits {
    /// Number of virtual CPUs.
    pub cpu: u32,
    /// Memory size in mebibytes.
    pub memory_mib: u64,
}

impl ResourceLimits {
    /// Renders the limits as instance configuration keys.
    #[must_use]
    pub fn to_wire(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (String::from("limits.cpu"), self.cpu.to_string()),
            (String::from("limits.memory"), format!("{}MiB", self.memory_mib)),
        ])
    }
}

/// Everything pre-create resolution produces. Built once, never mutated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedResources {
    pub(crate) source: InstanceSource,
    pub(crate) nic: Device,
    pub(crate) disk: Device,
    pub(crate) limits: ResourceLimits,
}

impl ResolvedResources {
    /// Image source for the creation request.
    #[must_use]
    pub const fn source(&self) -> &InstanceSource {
        &self.source
    }

    /// Primary NIC.
    #[must_use]
    pub const fn nic(&self) -> &Device {
        &self.nic
    }

    /// Root disk.
    #[must_use]
    pub const fn disk(&self) -> &Device {
        &self.disk
    }

    /// CPU and memory limits.
    #[must_use]
    pub const fn limits(&self) -> ResourceLimits {
        self.limits
    }

    /// Whether the NIC sits on an overlay network, which lowers the guest MTU.
    #[must_use]
    pub const fn overlay_network(&self) -> bool {
        self.nic.is_overlay()
    }
}
