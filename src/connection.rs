use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{
    Client, Response, Url,
    header::{ACCEPT_ENCODING, HeaderMap, HeaderValue},
};
use serde::Serialize;
use tracing::debug;

use crate::{config::Configuration, decode, error::DownloadError};

/// Network handle to the versioning backend.
///
/// Auth headers are only attached to requests for the backend's own origin.
/// Signed URLs pointing elsewhere carry their own authorization.
#[derive(Clone, Debug)]
pub struct Connection {
    client: Client,
    base_url: Url,
    auth: HeaderMap,
    locator_timeout: Option<Duration>,
}

/// Identifies this client to the backend in `Grpc-Metadata-source`.
const CLIENT_SOURCE: &str = concat!("datablob/", env!("CARGO_PKG_VERSION"));

impl Connection {
    pub fn new(client: Client, mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Self {
            client,
            base_url,
            auth: HeaderMap::new(),
            locator_timeout: None,
        }
    }

    pub fn from_config(config: &Configuration) -> Result<Self> {
        // Artifact bodies may take arbitrarily long, so only stalls are fatal
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .read_timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let mut connection = Self::new(client, config.base_url()?);
        connection.locator_timeout = Some(config.timeout);

        if let Some(credentials) = &config.credentials {
            let mut auth = HeaderMap::new();
            auth.insert(
                "grpc-metadata-email",
                HeaderValue::from_str(&credentials.email).context("Invalid email header")?,
            );
            let mut dev_key =
                HeaderValue::from_str(&credentials.dev_key).context("Invalid developer key")?;
            dev_key.set_sensitive(true);
            auth.insert("grpc-metadata-developer_key", dev_key);
            auth.insert(
                "grpc-metadata-source",
                HeaderValue::from_static(CLIENT_SOURCE),
            );
            connection.auth = auth;
        }

        Ok(connection)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build a backend URL from path segments, percent-encoding each one.
    pub fn api_url(&self, segments: &[&str]) -> Result<Url, DownloadError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| DownloadError::Transport {
                url: self.base_url.to_string(),
                status: None,
                detail: "backend URL cannot have path segments appended".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn is_backend(&self, url: &Url) -> bool {
        url.origin() == self.base_url.origin()
    }

    /// GET an artifact, advertising the content encodings the decoder
    /// understands. Fails on any non-success status without reading the body.
    pub async fn get_artifact(&self, url: Url) -> Result<Response, DownloadError> {
        let builder = self
            .client
            .get(url.clone())
            .header(ACCEPT_ENCODING, decode::ACCEPT_ENCODING);
        self.send(builder, &url).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &T,
    ) -> Result<Response, DownloadError> {
        let mut builder = self.client.post(url.clone()).json(body);
        if let Some(timeout) = self.locator_timeout {
            builder = builder.timeout(timeout);
        }
        self.send(builder, &url).await
    }

    async fn send(
        &self,
        mut builder: reqwest::RequestBuilder,
        url: &Url,
    ) -> Result<Response, DownloadError> {
        if self.is_backend(url) {
            builder = builder.headers(self.auth.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|err| DownloadError::transport(url, err))?;

        debug!(url = %url, status = %response.status(), "response received");

        response
            .error_for_status()
            .map_err(|err| DownloadError::transport(url, err))
    }
}
