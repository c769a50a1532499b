use futures::future::BoxFuture;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{connection::Connection, error::DownloadError};

/// The part of a commit a dataset blob needs in order to fetch its
/// components: a network connection, and a way to exchange
/// `(blob path, component path, method)` for a short-lived signed URL.
pub trait Commit: Send + Sync {
    fn connection(&self) -> &Connection;

    fn url_for_artifact<'a>(
        &'a self,
        blob_path: &'a str,
        component_path: &'a str,
        method: Method,
    ) -> BoxFuture<'a, Result<Url, DownloadError>>;
}

#[derive(Serialize)]
struct GetUrlForBlobVersioned<'a> {
    location: Vec<&'a str>,
    path_dataset_component_blob_path: &'a str,
    method: &'a str,
}

#[derive(Deserialize)]
struct GetUrlForBlobVersionedResponse {
    #[serde(default)]
    url: String,
}

/// A commit that lives in a repository on the versioning backend.
#[derive(Clone, Debug)]
pub struct RemoteCommit {
    connection: Connection,
    repository_id: String,
    commit_sha: String,
}

impl RemoteCommit {
    pub fn new(
        connection: Connection,
        repository_id: impl Into<String>,
        commit_sha: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            repository_id: repository_id.into(),
            commit_sha: commit_sha.into(),
        }
    }

    pub fn repository_id(&self) -> &str {
        &self.repository_id
    }

    pub fn commit_sha(&self) -> &str {
        &self.commit_sha
    }

    async fn negotiate(
        &self,
        blob_path: &str,
        component_path: &str,
        method: Method,
    ) -> Result<Url, DownloadError> {
        let endpoint = self.connection.api_url(&[
            "api",
            "v1",
            "modeldb",
            "versioning",
            "repositories",
            &self.repository_id,
            "commits",
            &self.commit_sha,
            "getUrlForBlobVersioned",
        ])?;

        let request = GetUrlForBlobVersioned {
            location: blob_path.split('/').filter(|s| !s.is_empty()).collect(),
            path_dataset_component_blob_path: component_path,
            method: method.as_str(),
        };

        let response = self.connection.post_json(endpoint.clone(), &request).await?;
        let body: GetUrlForBlobVersionedResponse = response
            .json()
            .await
            .map_err(|err| DownloadError::transport(&endpoint, err))?;

        if body.url.is_empty() {
            return Err(DownloadError::Transport {
                url: endpoint.to_string(),
                status: None,
                detail: format!("backend returned no URL for {component_path:?} in {blob_path:?}"),
            });
        }

        let url = Url::parse(&body.url).map_err(|err| DownloadError::Transport {
            url: endpoint.to_string(),
            status: None,
            detail: format!("backend returned an invalid URL: {err}"),
        })?;

        debug!(blob_path, component_path, %method, host = ?url.host_str(), "negotiated artifact URL");

        Ok(url)
    }
}

impl Commit for RemoteCommit {
    fn connection(&self) -> &Connection {
        &self.connection
    }

    fn url_for_artifact<'a>(
        &'a self,
        blob_path: &'a str,
        component_path: &'a str,
        method: Method,
    ) -> BoxFuture<'a, Result<Url, DownloadError>> {
        Box::pin(self.negotiate(blob_path, component_path, method))
    }
}
