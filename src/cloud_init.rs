//! Cloud-init payloads attached to new instances.
//!
//! Every instance receives vendor-data that authorises the machine's SSH key
//! and installs the packages the host tool expects. Operators can layer their
//! own user-data on top from a file, and instances on overlay networks get a
//! network-config that lowers the guest MTU to fit the encapsulation.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::files;

/// Instance configuration key carrying vendor-data.
pub const VENDOR_DATA_KEY: &str = "cloud-init.vendor-data";
/// Instance configuration key carrying user-data.
pub const USER_DATA_KEY: &str = "cloud-init.user-data";
/// Instance configuration key carrying network-config.
pub const NETWORK_CONFIG_KEY: &str = "cloud-init.network-config";

const VENDOR_DATA_HEAD: &str = "#cloud-config
allow_public_ssh_keys: true
ssh_authorized_keys:
";

const VENDOR_DATA_TAIL: &str = "no_ssh_fingerprints: false
ssh:
  emit_keys_to_console: false
disable_root: false
package_update: true
packages:
  - openssh-server
  - curl
  - iptables
  - open-iscsi
";

/// Network-config for guests on an overlay network. Both the predictable and
/// the legacy interface names are covered since images differ.
pub const OVERLAY_NETWORK_CONFIG: &str = "#cloud-config
network:
  version: 1
  config:
  - type: physical
    name: enp5s0
    mtu: 1442
    subnets:
    - type: dhcp
  - type: physical
    name: eth0
    mtu: 1442
    subnets:
    - type: dhcp
";

/// Errors raised while loading user-data.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum CloudInitError {
    /// Raised when reading the user-data file fails.
    #[error("failed to read cloud-init user-data file `{path}`: {message}")]
    FileRead {
        /// Expanded path that failed to read.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
}

/// Renders vendor-data authorising `public_key`.
#[must_use]
pub fn render_vendor_data(public_key: &str) -> String {
    format!(
        "{VENDOR_DATA_HEAD}  - {}\n{VENDOR_DATA_TAIL}",
        public_key.trim()
    )
}

/// Loads user-data from `path`. An empty path means no user-data.
///
/// A leading `~/` expands to the home directory. The file content is
/// returned verbatim.
///
/// # Errors
///
/// Returns [`CloudInitError::FileRead`] when the file cannot be read.
pub fn load_user_data(path: &str) -> Result<Option<String>, CloudInitError> {
    if path.trim().is_empty() {
        return Ok(None);
    }
    let expanded = files::expand_tilde(path);
    files::read_to_string(&expanded)
        .map(Some)
        .map_err(|err| CloudInitError::FileRead {
            path: expanded,
            message: err.to_string(),
        })
}
