//! Incus REST client over mutually authenticated TLS.

use std::time::Duration;

use reqwest::{Client, Identity, RequestBuilder, Url};
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use tracing::debug;

use super::{ClientError, ClientFuture, Connector, ConnectionSettings, InstanceServer};
use crate::incus::api::{
    ImageAlias, InstanceState, InstanceStatePut, InstancesPost, NetworkInfo, Operation, StatusCode,
};
use crate::incus::client::SimpleStreamsIndex;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const API_VERSION: &str = "1.0";
const ENVELOPE_ERROR: &str = "error";

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    error_code: u16,
    #[serde(default)]
    error: String,
    #[serde(default)]
    operation: String,
    metadata: Option<T>,
}

#[derive(Deserialize)]
struct OperationMetadata {
    status_code: StatusCode,
    #[serde(default)]
    status: String,
    #[serde(default)]
    err: String,
}

#[derive(Deserialize)]
struct ServerInfo {
    #[serde(default)]
    auth: String,
}

impl ServerInfo {
    const TRUSTED: &'static str = "trusted";

    fn require_trusted(&self) -> Result<(), ClientError> {
        if self.auth == Self::TRUSTED {
            return Ok(());
        }
        Err(ClientError::Credentials {
            message: format!(
                "server does not trust the client certificate (auth: {})",
                self.auth
            ),
        })
    }
}

fn transport(err: &reqwest::Error) -> ClientError {
    ClientError::Transport {
        message: err.to_string(),
    }
}

/// Connector producing [`RestClient`] handles.
#[derive(Clone, Copy, Debug, Default)]
pub struct RestConnector;

impl Connector for RestConnector {
    type Server = RestClient;
    type Index = SimpleStreamsIndex;

    fn connect<'a>(&'a self, settings: &'a ConnectionSettings) -> ClientFuture<'a, RestClient> {
        Box::pin(async move {
            let client = RestClient::new(settings)?;
            client.get_server_info().await?;
            Ok(client)
        })
    }

    fn connect_image_index<'a>(&'a self, url: &'a str) -> ClientFuture<'a, SimpleStreamsIndex> {
        Box::pin(async move { SimpleStreamsIndex::new(url) })
    }
}

/// Handle on an Incus server, optionally scoped to a project.
#[derive(Clone, Debug)]
pub struct RestClient {
    http: Client,
    base: Url,
    project: Option<String>,
}

impl RestClient {
    /// Builds a client authenticating with the PEM credentials in `settings`.
    ///
    /// The server certificate is not verified; Incus servers commonly run
    /// with self-signed certificates.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Credentials`] when the PEM material is invalid
    /// and [`ClientError::Transport`] when the endpoint cannot be parsed.
    pub fn new(settings: &ConnectionSettings) -> Result<Self, ClientError> {
        let pem = format!(
            "{}\n{}",
            settings.tls_client_cert.trim(),
            settings.tls_client_key.trim()
        );
        let identity =
            Identity::from_pem(pem.as_bytes()).map_err(|err| ClientError::Credentials {
                message: err.to_string(),
            })?;
        let http = Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .danger_accept_invalid_certs(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| transport(&err))?;
        let base = Url::parse(&settings.endpoint).map_err(|err| ClientError::Transport {
            message: format!("invalid endpoint {}: {err}", settings.endpoint),
        })?;
        Ok(Self {
            http,
            base,
            project: None,
        })
    }

    fn url(&self, segments: &[&str], scoped: bool) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::Transport {
                message: format!("endpoint {} cannot be used as a base URL", self.base),
            })?
            .pop_if_empty()
            .push(API_VERSION)
            .extend(segments);
        if scoped && let Some(project) = &self.project {
            url.query_pairs_mut().append_pair("project", project);
        }
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: &str,
    ) -> Result<Envelope<T>, ClientError> {
        let response = request.send().await.map_err(|err| transport(&err))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|err| transport(&err))?;

        let envelope: Envelope<T> = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(_) if status == reqwest::StatusCode::NOT_FOUND => {
                return Err(ClientError::NotFound {
                    resource: resource.to_owned(),
                });
            }
            Err(err) => {
                return Err(ClientError::Decode {
                    message: format!("{resource} (HTTP {status}): {err}"),
                });
            }
        };

        if envelope.kind == ENVELOPE_ERROR || !status.is_success() {
            let code = if envelope.error_code == 0 {
                status.as_u16()
            } else {
                envelope.error_code
            };
            if code == reqwest::StatusCode::NOT_FOUND.as_u16() {
                return Err(ClientError::NotFound {
                    resource: resource.to_owned(),
                });
            }
            return Err(ClientError::Api {
                code,
                message: envelope.error,
            });
        }

        Ok(envelope)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        scoped: bool,
        resource: &str,
    ) -> Result<T, ClientError> {
        let url = self.url(segments, scoped)?;
        debug!(%url, "GET");
        let request = self.http.get(url).timeout(REQUEST_TIMEOUT);
        self.send::<T>(request, resource)
            .await?
            .metadata
            .ok_or_else(|| ClientError::Decode {
                message: format!("{resource}: response carried no metadata"),
            })
    }

    async fn submit(
        &self,
        request: RequestBuilder,
        resource: &str,
    ) -> Result<Operation, ClientError> {
        let envelope = self
            .send::<IgnoredAny>(request.timeout(REQUEST_TIMEOUT), resource)
            .await?;
        if envelope.operation.is_empty() {
            return Err(ClientError::Decode {
                message: format!("{resource}: expected a background operation"),
            });
        }
        Ok(Operation {
            path: envelope.operation,
        })
    }

    async fn get_server_info(&self) -> Result<(), ClientError> {
        self.fetch::<ServerInfo>(&[], false, "server")
            .await?
            .require_trusted()
    }
}

impl InstanceServer for RestClient {
    fn get_project<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.fetch::<IgnoredAny>(&["projects", name], false, &format!("project {name}"))
                .await?;
            Ok(())
        })
    }

    fn use_project(&self, project: &str) -> Self {
        Self {
            project: Some(project.to_owned()),
            ..self.clone()
        }
    }

    fn get_profile<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.fetch::<IgnoredAny>(&["profiles", name], true, &format!("profile {name}"))
                .await?;
            Ok(())
        })
    }

    fn get_network<'a>(&'a self, name: &'a str) -> ClientFuture<'a, NetworkInfo> {
        Box::pin(async move {
            self.fetch(&["networks", name], true, &format!("network {name}"))
                .await
        })
    }

    fn get_storage_pool<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.fetch::<IgnoredAny>(
                &["storage-pools", name],
                true,
                &format!("storage pool {name}"),
            )
            .await?;
            Ok(())
        })
    }

    fn get_image_alias<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ImageAlias> {
        Box::pin(async move {
            self.fetch(&["images", "aliases", name], true, &format!("image alias {name}"))
                .await
        })
    }

    fn create_instance<'a>(&'a self, request: &'a InstancesPost) -> ClientFuture<'a, Operation> {
        Box::pin(async move {
            let url = self.url(&["instances"], true)?;
            debug!(%url, instance = %request.name, "POST");
            self.submit(
                self.http.post(url).json(request),
                &format!("instance {}", request.name),
            )
            .await
        })
    }

    fn update_instance_state<'a>(
        &'a self,
        name: &'a str,
        state: InstanceStatePut,
    ) -> ClientFuture<'a, Operation> {
        Box::pin(async move {
            let url = self.url(&["instances", name, "state"], true)?;
            debug!(%url, action = %state.action, force = state.force, "PUT");
            self.submit(self.http.put(url).json(&state), &format!("instance {name}"))
                .await
        })
    }

    fn delete_instance<'a>(&'a self, name: &'a str) -> ClientFuture<'a, Operation> {
        Box::pin(async move {
            let url = self.url(&["instances", name], true)?;
            debug!(%url, "DELETE");
            self.submit(self.http.delete(url), &format!("instance {name}"))
                .await
        })
    }

    fn get_instance_state<'a>(&'a self, name: &'a str) -> ClientFuture<'a, InstanceState> {
        Box::pin(async move {
            self.fetch(&["instances", name, "state"], true, &format!("instance {name}"))
                .await
        })
    }

    fn wait<'a>(&'a self, operation: &'a Operation) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let mut segments: Vec<&str> = operation
                .path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .skip_while(|segment| *segment == API_VERSION)
                .collect();
            segments.push("wait");
            let url = self.url(&segments, true)?;
            debug!(%url, "waiting for operation");
            // No request timeout: image downloads can keep an operation busy for minutes.
            let request = self.http.get(url);
            let metadata = self
                .send::<OperationMetadata>(request, &format!("operation {}", operation.path))
                .await?
                .metadata
                .ok_or_else(|| ClientError::Decode {
                    message: format!("operation {}: response carried no metadata", operation.path),
                })?;

            if metadata.status_code == StatusCode::Success {
                return Ok(());
            }
            let message = if metadata.err.is_empty() {
                metadata.status
            } else {
                metadata.err
            };
            Err(ClientError::OperationFailed {
                operation: operation.path.clone(),
                message,
            })
        })
    }
}
