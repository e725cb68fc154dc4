//! Capabilities the driver consumes from the Incus server and from the public
//! image index, plus their HTTP implementations.

mod rest;
mod simplestreams;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use super::api::{
    ImageAlias, InstanceState, InstanceStatePut, InstancesPost, NetworkInfo, Operation,
};

pub use rest::{RestClient, RestConnector};
pub use simplestreams::SimpleStreamsIndex;

/// Errors raised by server and image index clients.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClientError {
    /// Raised when the requested entity does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Path or name of the missing entity.
        resource: String,
    },
    /// Raised when the server answers with an error envelope.
    #[error("server returned error {code}: {message}")]
    Api {
        /// Error code from the response.
        code: u16,
        /// Error text from the response.
        message: String,
    },
    /// Raised when the request could not be delivered.
    #[error("transport error: {message}")]
    Transport {
        /// Underlying HTTP client error.
        message: String,
    },
    /// Raised when a response body cannot be parsed.
    #[error("failed to decode response: {message}")]
    Decode {
        /// Underlying parse error.
        message: String,
    },
    /// Raised when the TLS client credentials are unusable.
    #[error("invalid TLS client credentials: {message}")]
    Credentials {
        /// Reason the credentials were refused.
        message: String,
    },
    /// Raised when a background operation finishes unsuccessfully.
    #[error("operation {operation} failed: {message}")]
    OperationFailed {
        /// Operation path.
        operation: String,
        /// Error reported by the operation.
        message: String,
    },
}

impl ClientError {
    /// Returns `true` for [`ClientError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Future returned by client operations.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Endpoint and TLS client credentials used to reach the server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionSettings {
    /// Server URL, for example `https://incus.example.com:8443`.
    pub endpoint: String,
    /// PEM encoded client certificate.
    pub tls_client_cert: String,
    /// PEM encoded client private key.
    pub tls_client_key: String,
}

/// Operations the driver performs against an Incus server.
///
/// Every lookup is scoped to the project selected with
/// [`InstanceServer::use_project`].
pub trait InstanceServer: Send + Sync {
    /// Checks that `name` exists.
    fn get_project<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()>;

    /// Returns a handle whose calls are scoped to `project`.
    #[must_use]
    fn use_project(&self, project: &str) -> Self
    where
        Self: Sized;

    /// Checks that profile `name` exists.
    fn get_profile<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()>;

    /// Fetches network `name`.
    fn get_network<'a>(&'a self, name: &'a str) -> ClientFuture<'a, NetworkInfo>;

    /// Checks that storage pool `name` exists.
    fn get_storage_pool<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()>;

    /// Fetches image alias `name` from the server's own catalog.
    fn get_image_alias<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ImageAlias>;

    /// Submits an instance creation request.
    fn create_instance<'a>(&'a self, request: &'a InstancesPost) -> ClientFuture<'a, Operation>;

    /// Requests a state change for instance `name`.
    fn update_instance_state<'a>(
        &'a self,
        name: &'a str,
        state: InstanceStatePut,
    ) -> ClientFuture<'a, Operation>;

    /// Requests deletion of instance `name`.
    fn delete_instance<'a>(&'a self, name: &'a str) -> ClientFuture<'a, Operation>;

    /// Fetches the runtime state of instance `name`.
    fn get_instance_state<'a>(&'a self, name: &'a str) -> ClientFuture<'a, InstanceState>;

    /// Blocks until `operation` completes, returning its failure as an error.
    fn wait<'a>(&'a self, operation: &'a Operation) -> ClientFuture<'a, ()>;
}

/// Read-only public image catalog.
pub trait ImageIndex: Send + Sync {
    /// Looks up alias `name`.
    fn get_image_alias<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ImageAlias>;
}

/// Opens connections to servers and image indexes.
pub trait Connector: Send + Sync {
    /// Authenticated server handle.
    type Server: InstanceServer;
    /// Anonymous image index handle.
    type Index: ImageIndex;

    /// Connects to the server described by `settings`.
    fn connect<'a>(&'a self, settings: &'a ConnectionSettings) -> ClientFuture<'a, Self::Server>;

    /// Connects anonymously to the simplestreams index at `url`.
    fn connect_image_index<'a>(&'a self, url: &'a str) -> ClientFuture<'a, Self::Index>;
}
