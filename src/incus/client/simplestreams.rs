//! Anonymous, read-only client for simplestreams image indexes.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{ClientError, ClientFuture, ImageIndex};
use crate::incus::api::ImageAlias;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const INDEX_PATH: &str = "streams/v1/index.json";
const IMAGE_DATATYPE: &str = "image-downloads";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

#[derive(Deserialize)]
struct StreamIndex {
    #[serde(default)]
    index: BTreeMap<String, IndexEntry>,
}

#[derive(Deserialize)]
struct IndexEntry {
    #[serde(default)]
    datatype: String,
    path: String,
}

#[derive(Deserialize)]
struct ProductCatalog {
    #[serde(default)]
    products: BTreeMap<String, Product>,
}

#[derive(Deserialize)]
struct Product {
    #[serde(default)]
    aliases: String,
    #[serde(default)]
    arch: String,
}

impl Product {
    fn matches(&self, alias: &str) -> bool {
        self.aliases
            .split(',')
            .map(str::trim)
            .filter(|candidate| !candidate.is_empty())
            .any(|candidate| {
                candidate == alias
                    || alias
                        .strip_prefix(candidate)
                        .and_then(|rest| rest.strip_prefix('/'))
                        .is_some_and(|arch| arch == self.arch)
            })
    }
}

/// Public image index reached over the simplestreams protocol.
#[derive(Clone, Debug)]
pub struct SimpleStreamsIndex {
    base: Url,
}

impl SimpleStreamsIndex {
    /// Protocol name Incus uses for simplestreams image servers.
    pub const PROTOCOL: &'static str = "simplestreams";

    /// Creates a handle on the index at `url`. No request is made until a
    /// lookup happens.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when `url` is not a valid base URL.
    pub fn new(url: &str) -> Result<Self, ClientError> {
        let normalised = if url.ends_with('/') {
            url.to_owned()
        } else {
            format!("{url}/")
        };
        let base = Url::parse(&normalised).map_err(|err| ClientError::Transport {
            message: format!("invalid image server {url}: {err}"),
        })?;
        Ok(Self { base })
    }

    async fn fetch_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.base.join(path).map_err(|err| ClientError::Transport {
            message: format!("invalid index path {path}: {err}"),
        })?;
        let response = HTTP_CLIENT
            .get(url)
            .send()
            .await
            .map_err(|err| ClientError::Transport {
                message: err.to_string(),
            })?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound {
                resource: path.to_owned(),
            });
        }
        if !status.is_success() {
            return Err(ClientError::Api {
                code: status.as_u16(),
                message: format!("GET {path} failed"),
            });
        }
        let body = response.bytes().await.map_err(|err| ClientError::Transport {
            message: err.to_string(),
        })?;
        serde_json::from_slice(&body).map_err(|err| ClientError::Decode {
            message: format!("{path}: {err}"),
        })
    }

    async fn lookup_alias(&self, name: &str) -> Result<ImageAlias, ClientError> {
        let index: StreamIndex = self.fetch_json(INDEX_PATH).await?;
        for entry in index
            .index
            .values()
            .filter(|entry| entry.datatype == IMAGE_DATATYPE)
        {
            let catalog: ProductCatalog = self.fetch_json(&entry.path).await?;
            if let Some(product) = find_product(&catalog, name) {
                return Ok(ImageAlias {
                    name: name.to_owned(),
                    target: product.to_owned(),
                });
            }
        }
        Err(ClientError::NotFound {
            resource: format!("image alias {name}"),
        })
    }
}

fn find_product<'c>(catalog: &'c ProductCatalog, alias: &str) -> Option<&'c str> {
    catalog
        .products
        .iter()
        .find(|(_, product)| product.matches(alias))
        .map(|(key, _)| key.as_str())
}

impl ImageIndex for SimpleStreamsIndex {
    fn get_image_alias<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ImageAlias> {
        Box::pin(self.lookup_alias(name))
    }
}
