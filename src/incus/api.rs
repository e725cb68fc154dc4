//! Wire types for the subset of the Incus REST API the driver uses.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::types::InstanceSource;

/// Instance type marker for virtual machines.
pub const INSTANCE_TYPE_VM: &str = "virtual-machine";

const ADDRESS_FAMILY_INET: &str = "inet";
const ADDRESS_SCOPE_LOCAL: &str = "local";

/// Status codes reported for instances and operations.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(from = "u16", into = "u16")]
pub enum StatusCode {
    /// Operation created (100).
    OperationCreated,
    /// Started (101).
    Started,
    /// Stopped (102).
    Stopped,
    /// Running (103).
    Running,
    /// Cancelling (104).
    Cancelling,
    /// Pending (105).
    Pending,
    /// Starting (106).
    Starting,
    /// Stopping (107).
    Stopping,
    /// Aborting (108).
    Aborting,
    /// Freezing (109).
    Freezing,
    /// Frozen (110).
    Frozen,
    /// Thawed (111).
    Thawed,
    /// Error (112).
    Error,
    /// Ready (113).
    Ready,
    /// Success (200).
    Success,
    /// Failure (400).
    Failure,
    /// Cancelled (401).
    Cancelled,
    /// Any code this driver does not know about.
    Unknown(u16),
}

impl StatusCode {
    /// Numeric code as sent on the wire.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::OperationCreated => 100,
            Self::Started => 101,
            Self::Stopped => 102,
            Self::Running => 103,
            Self::Cancelling => 104,
            Self::Pending => 105,
            Self::Starting => 106,
            Self::Stopping => 107,
            Self::Aborting => 108,
            Self::Freezing => 109,
            Self::Frozen => 110,
            Self::Thawed => 111,
            Self::Error => 112,
            Self::Ready => 113,
            Self::Success => 200,
            Self::Failure => 400,
            Self::Cancelled => 401,
            Self::Unknown(code) => code,
        }
    }

    /// Statuses that mean the instance will not come up on its own while
    /// waiting for an address.
    #[must_use]
    pub const fn is_terminal_failure(self) -> bool {
        matches!(
            self,
            Self::Aborting
                | Self::Freezing
                | Self::Frozen
                | Self::Thawed
                | Self::Error
                | Self::Failure
                | Self::Cancelled
        )
    }
}

impl From<u16> for StatusCode {
    fn from(value: u16) -> Self {
        match value {
            100 => Self::OperationCreated,
            101 => Self::Started,
            102 => Self::Stopped,
            103 => Self::Running,
            104 => Self::Cancelling,
            105 => Self::Pending,
            106 => Self::Starting,
            107 => Self::Stopping,
            108 => Self::Aborting,
            109 => Self::Freezing,
            110 => Self::Frozen,
            111 => Self::Thawed,
            112 => Self::Error,
            113 => Self::Ready,
            200 => Self::Success,
            400 => Self::Failure,
            401 => Self::Cancelled,
            other => Self::Unknown(other),
        }
    }
}

impl From<StatusCode> for u16 {
    fn from(value: StatusCode) -> Self {
        value.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OperationCreated => "Operation created",
            Self::Started => "Started",
            Self::Stopped => "Stopped",
            Self::Running => "Running",
            Self::Cancelling => "Cancelling",
            Self::Pending => "Pending",
            Self::Starting => "Starting",
            Self::Stopping => "Stopping",
            Self::Aborting => "Aborting",
            Self::Freezing => "Freezing",
            Self::Frozen => "Frozen",
            Self::Thawed => "Thawed",
            Self::Error => "Error",
            Self::Ready => "Ready",
            Self::Success => "Success",
            Self::Failure => "Failure",
            Self::Cancelled => "Cancelled",
            Self::Unknown(code) => return write!(f, "Unknown({code})"),
        };
        f.write_str(name)
    }
}

/// One address reported on a guest interface.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NetworkAddress {
    /// Address family, `inet` or `inet6`.
    pub family: String,
    /// Textual address.
    pub address: String,
    /// Prefix length.
    #[serde(default)]
    pub netmask: String,
    /// Address scope, for example `global`, `link` or `local`.
    #[serde(default)]
    pub scope: String,
}

impl NetworkAddress {
    /// Parses the address when it is an IPv4 address outside the local scope.
    #[must_use]
    pub fn routable_ipv4(&self) -> Option<IpAddr> {
        if self.family != ADDRESS_FAMILY_INET || self.scope == ADDRESS_SCOPE_LOCAL {
            return None;
        }
        self.address.parse::<IpAddr>().ok().filter(IpAddr::is_ipv4)
    }
}

/// Runtime state of one guest interface.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NetworkState {
    /// Addresses assigned to the interface.
    #[serde(default)]
    pub addresses: Vec<NetworkAddress>,
}

/// Runtime state of an instance (`GET /1.0/instances/{name}/state`).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InstanceState {
    /// Status code of the instance.
    pub status_code: StatusCode,
    /// Per-interface network state, keyed by interface name. Absent while the
    /// guest agent has not reported yet.
    #[serde(default)]
    pub network: Option<BTreeMap<String, NetworkState>>,
}

impl InstanceState {
    /// State with no network information.
    #[must_use]
    pub const fn new(status_code: StatusCode) -> Self {
        Self {
            status_code,
            network: None,
        }
    }

    /// Adds an address to interface `interface`.
    #[must_use]
    pub fn with_address(
        mut self,
        interface: &str,
        family: &str,
        address: &str,
        scope: &str,
    ) -> Self {
        self.network
            .get_or_insert_with(BTreeMap::new)
            .entry(interface.to_owned())
            .or_default()
            .addresses
            .push(NetworkAddress {
                family: family.to_owned(),
                address: address.to_owned(),
                netmask: String::new(),
                scope: scope.to_owned(),
            });
        self
    }

    /// First non-local IPv4 address across all interfaces.
    #[must_use]
    pub fn routable_ipv4(&self) -> Option<IpAddr> {
        self.network
            .iter()
            .flat_map(BTreeMap::values)
            .flat_map(|interface| interface.addresses.iter())
            .find_map(NetworkAddress::routable_ipv4)
    }
}

/// Instance creation request (`POST /1.0/instances`).
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct InstancesPost {
    /// Instance name.
    pub name: String,
    /// Instance type marker.
    #[serde(rename = "type")]
    pub instance_type: String,
    /// Start the instance once created.
    pub start: bool,
    /// Image source.
    pub source: InstanceSource,
    /// Profiles applied at creation.
    pub profiles: Vec<String>,
    /// Free-form description.
    pub description: String,
    /// Instance configuration keys.
    pub config: BTreeMap<String, String>,
    /// Devices keyed by device name.
    pub devices: BTreeMap<String, BTreeMap<String, String>>,
}

/// State-change actions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateAction {
    /// Boot the instance.
    Start,
    /// Shut the instance down.
    Stop,
    /// Reboot the instance.
    Restart,
}

impl fmt::Display for StateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        })
    }
}

/// Instance state change request (`PUT /1.0/instances/{name}/state`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct InstanceStatePut {
    /// Requested action.
    pub action: StateAction,
    /// Seconds to wait for a clean shutdown; `-1` leaves it to the server.
    pub timeout: i32,
    /// Skip the clean shutdown.
    pub force: bool,
    /// Preserve runtime state across the stop.
    pub stateful: bool,
}

impl InstanceStatePut {
    /// Builds a request for `action`.
    #[must_use]
    pub const fn new(action: StateAction, force: bool) -> Self {
        Self {
            action,
            timeout: -1,
            force,
            stateful: false,
        }
    }
}

/// Handle on a server-side background operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Operation {
    /// Operation URL path, for example `/1.0/operations/<uuid>`.
    pub path: String,
}

/// Network as described by `GET /1.0/networks/{name}`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct NetworkInfo {
    /// Network name.
    #[serde(default)]
    pub name: String,
    /// Network type (`bridge`, `ovn`, `macvlan`, ...).
    #[serde(rename = "type")]
    pub network_type: String,
}

/// Image alias entry.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ImageAlias {
    /// Alias name.
    pub name: String,
    /// Fingerprint the alias points at.
    #[serde(default)]
    pub target: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(StatusCode::Aborting)]
    #[case(StatusCode::Freezing)]
    #[case(StatusCode::Frozen)]
    #[case(StatusCode::Thawed)]
    #[case(StatusCode::Error)]
    #[case(StatusCode::Failure)]
    #[case(StatusCode::Cancelled)]
    fn terminal_failure_statuses(#[case] status: StatusCode) {
        assert!(status.is_terminal_failure());
    }

    #[rstest]
    #[case(StatusCode::Running)]
    #[case(StatusCode::Starting)]
    #[case(StatusCode::Stopped)]
    #[case(StatusCode::Pending)]
    #[case(StatusCode::Unknown(999))]
    fn non_terminal_statuses(#[case] status: StatusCode) {
        assert!(!status.is_terminal_failure());
    }

    #[test]
    fn status_code_round_trips_through_number() {
        assert_eq!(StatusCode::from(110), StatusCode::Frozen);
        assert_eq!(u16::from(StatusCode::Cancelled), 401);
        assert_eq!(StatusCode::from(42), StatusCode::Unknown(42));
    }

    #[test]
    fn instance_state_parses_server_payload() {
        let payload = serde_json::json!({
            "status": "Running",
            "status_code": 103,
            "network": {
                "lo": {"addresses": [
                    {"family": "inet", "address": "127.0.0.1", "netmask": "8", "scope": "local"}
                ]},
                "enp5s0": {"addresses": [
                    {"family": "inet6", "address": "fe80::1", "netmask": "64", "scope": "link"},
                    {"family": "inet", "address": "10.42.0.17", "netmask": "24", "scope": "global"}
                ]}
            }
        });
        let state: InstanceState = serde_json::from_value(payload)
            .unwrap_or_else(|err| panic!("parse state: {err}"));
        assert_eq!(state.status_code, StatusCode::Running);
        assert_eq!(
            state.routable_ipv4(),
            "10.42.0.17".parse::<IpAddr>().ok()
        );
    }

    #[test]
    fn instance_state_tolerates_null_network() {
        let state: InstanceState =
            serde_json::from_value(serde_json::json!({"status_code": 106, "network": null}))
                .unwrap_or_else(|err| panic!("parse state: {err}"));
        assert_eq!(state.routable_ipv4(), None);
    }

    #[test]
    fn local_scope_and_ipv6_are_not_routable() {
        let state = InstanceState::new(StatusCode::Running)
            .with_address("lo", "inet", "127.0.0.1", "local")
            .with_address("eth0", "inet6", "2001:db8::5", "global");
        assert_eq!(state.routable_ipv4(), None);
    }

    #[test]
    fn state_put_serialises_action_lowercase() {
        let json = serde_json::to_value(InstanceStatePut::new(StateAction::Stop, true))
            .unwrap_or_else(|err| panic!("serialise: {err}"));
        assert_eq!(
            json,
            serde_json::json!({"action": "stop", "timeout": -1, "force": true, "stateful": false})
        );
    }
}
