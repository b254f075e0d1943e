//! Snapshot fetcher: one request/response call returning the current runs.

use url::Url;

use crate::domain::{Run, RunQuery};
use crate::error::{Result, SyncError};

/// Default path of the run listing endpoint.
pub const DEFAULT_RUNS_PATH: &str = "/api/runs";

/// Source of authoritative run snapshots.
///
/// Implementations are stateless; paging is the server's concern.
#[async_trait::async_trait]
pub trait SnapshotFetcher: Send + Sync + std::fmt::Debug {
    /// Fetch runs matching `query`, most recent first.
    async fn fetch(&self, query: &RunQuery) -> Result<Vec<Run>>;
}

/// [`SnapshotFetcher`] backed by the HTTP run listing endpoint.
#[derive(Debug, Clone)]
pub struct HttpSnapshotFetcher {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpSnapshotFetcher {
    /// Create a fetcher for `{base_url}{path}`.
    ///
    /// `path` is resolved under the base URL's path, so a base of
    /// `http://host/prefix` and `/api/runs` give `http://host/prefix/api/runs`.
    pub fn new(base_url: &Url, path: &str) -> Result<Self> {
        Self::with_client(base_url, path, reqwest::Client::new())
    }

    /// Create a fetcher with a custom reqwest client.
    pub fn with_client(base_url: &Url, path: &str, http: reqwest::Client) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: join_endpoint(base_url, path)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl SnapshotFetcher for HttpSnapshotFetcher {
    #[tracing::instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn fetch(&self, query: &RunQuery) -> Result<Vec<Run>> {
        let response = self
            .http
            .get(self.endpoint.clone())
            .query(&query.query_pairs())
            .send()
            .await
            .map_err(|e| SyncError::fetch_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            return Err(SyncError::Fetch {
                status: Some(status.as_u16()),
                message,
            });
        }

        let runs: Vec<Run> = response
            .json()
            .await
            .map_err(|e| SyncError::fetch_transport(&e))?;
        tracing::debug!(count = runs.len(), "snapshot fetched");
        Ok(runs)
    }
}

/// Resolve an endpoint path beneath `base_url`, keeping any path prefix.
pub(crate) fn join_endpoint(base_url: &Url, path: &str) -> Result<Url> {
    let mut base = base_url.clone();
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    Ok(base.join(path.trim_start_matches('/'))?)
}
