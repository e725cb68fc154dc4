//! Error types for the Incus driver.

use thiserror::Error;

use super::api::StatusCode;
use super::client::ClientError;
use crate::config::ConfigError;
use crate::ssh_key::KeyError;

/// Errors raised by [`IncusDriver`](super::IncusDriver).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum IncusDriverError {
    /// Raised when a required setting is empty.
    #[error("{0} must be set")]
    MissingField(&'static str),
    /// Raised when a named server resource does not exist.
    #[error("{resource} {name} not found: {message}")]
    NotFound {
        /// Kind of resource, for example `network`.
        resource: &'static str,
        /// Name that was looked up.
        name: String,
        /// Detail from the lookup.
        message: String,
    },
    /// Raised when the selected network is neither a bridge nor an overlay.
    #[error("network {name} has unsupported type {network_type}")]
    UnsupportedNetworkType {
        /// Network name.
        name: String,
        /// Type reported by the server.
        network_type: String,
    },
    /// Raised when the server connection cannot be established.
    #[error("failed to connect to {endpoint}: {message}")]
    Connect {
        /// Server URL.
        endpoint: String,
        /// Underlying client error.
        message: String,
    },
    /// Wrapper for other server client failures.
    #[error("provider error: {0}")]
    Provider(#[from] ClientError),
    /// Raised when an asynchronous operation reports failure.
    #[error("{action} operation on instance {instance} failed: {message}")]
    Operation {
        /// Action that was requested.
        action: &'static str,
        /// Instance name.
        instance: String,
        /// Error reported by the operation.
        message: String,
    },
    /// Raised when polling observes a status the instance cannot recover from.
    #[error("instance state is {0}")]
    InstanceStatus(StatusCode),
    /// Raised when no routable address appears within the polling budget.
    #[error("instance {instance} reported no IPv4 address after {attempts} attempts")]
    AddressTimeout {
        /// Instance name.
        instance: String,
        /// Number of state queries made.
        attempts: u32,
    },
    /// Raised for lifecycle operations this driver does not provide.
    #[error("{0} is not supported by the incus driver")]
    Unsupported(&'static str),
    /// Raised when Create runs before the pre-create check.
    #[error("pre-create check has not run; resources are unresolved")]
    NotResolved,
    /// Raised when the Docker URL is requested for an instance that is not running.
    #[error("instance {instance} is not running (state {state})")]
    NotRunning {
        /// Instance name.
        instance: String,
        /// Observed machine state.
        state: String,
    },
    /// Raised when the IP address has not been recorded yet.
    #[error("IP address is not set")]
    MissingIp,
    /// Raised when the SSH key pair cannot be prepared.
    #[error(transparent)]
    SshKey(#[from] KeyError),
    /// Raised when the driver settings fail validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl IncusDriverError {
    /// Classifies a lookup failure: a missing entity becomes
    /// [`IncusDriverError::NotFound`], anything else stays a provider error.
    pub(crate) fn lookup(resource: &'static str, name: &str, err: ClientError) -> Self {
        if err.is_not_found() {
            Self::NotFound {
                resource,
                name: name.to_owned(),
                message: err.to_string(),
            }
        } else {
            Self::Provider(err)
        }
    }

    /// Wraps a failed state change or deletion.
    pub(crate) fn operation(action: &'static str, instance: &str, err: &ClientError) -> Self {
        let message = match err {
            ClientError::OperationFailed { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self::Operation {
            action,
            instance: instance.to_owned(),
            message,
        }
    }
}
