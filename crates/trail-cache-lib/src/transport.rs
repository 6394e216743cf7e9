//! Fetching cell payloads
//!
//! The scheduler only needs bytes for a request; where they come from is up to the
//! [`Transport`]. [`DirectoryTransport`] reads a fixture tree from disk and
//! [`HttpTransport`] (feature `http`) talks to the tile server.

use crate::Result;
use crate::cell::{CellId, Tier};
use std::future::Future;
use std::path::{Path, PathBuf};

/// What to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchRequest {
    /// One cell of a tier
    Cell { tier: Tier, cell: CellId },
    /// A single trail and its paths, independent of the viewport
    Pin { entity_id: u64, precise: bool },
}

impl FetchRequest {
    /// Server path for this request
    pub fn endpoint(&self) -> String {
        match self {
            FetchRequest::Cell { tier, cell } => {
                format!("/api/fetch_{}/{}", tier.url_segment(), cell.to_token())
            }
            FetchRequest::Pin { .. } => "/api/data_packed".to_owned(),
        }
    }
}

/// Source of cell payloads
///
/// The returned future must own everything it needs: it is spawned and may outlive the call.
/// Dropping it aborts the request.
pub trait Transport: Send + Sync + 'static {
    fn fetch(&self, request: &FetchRequest) -> impl Future<Output = Result<Vec<u8>>> + Send + 'static;
}

/// Reads payloads from `<root>/<tier>/<token>.bin` and `<root>/pin/<id>.bin`
///
/// Missing files are served as empty payloads, like a sparse cell on the server.
#[derive(Debug, Clone)]
pub struct DirectoryTransport {
    root: PathBuf,
}

impl DirectoryTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the payload for a request
    pub fn file_for(&self, request: &FetchRequest) -> PathBuf {
        match request {
            FetchRequest::Cell { tier, cell } => self
                .root
                .join(tier.name())
                .join(format!("{}.bin", cell.to_token())),
            FetchRequest::Pin { entity_id, .. } => {
                self.root.join("pin").join(format!("{entity_id}.bin"))
            }
        }
    }
}

impl Transport for DirectoryTransport {
    fn fetch(&self, request: &FetchRequest) -> impl Future<Output = Result<Vec<u8>>> + Send + 'static {
        let path = self.file_for(request);
        async move {
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(bytes),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                    tracing::trace!(path = %path.display(), "No payload file, serving empty cell");
                    Ok(Vec::new())
                }
                Err(error) => Err(error.into()),
            }
        }
    }
}

#[cfg(feature = "http")]
pub use http::HttpTransport;

#[cfg(feature = "http")]
mod http {
    use super::{FetchRequest, Transport};
    use crate::{CacheError, Result};
    use std::future::Future;

    /// Fetches payloads from the tile server over HTTP
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        client: reqwest::Client,
        base_url: String,
    }

    impl HttpTransport {
        pub fn new(base_url: impl Into<String>) -> Self {
            Self::with_client(reqwest::Client::new(), base_url)
        }

        pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
            let base_url = base_url.into().trim_end_matches('/').to_owned();
            Self { client, base_url }
        }
    }

    impl Transport for HttpTransport {
        fn fetch(
            &self,
            request: &FetchRequest,
        ) -> impl Future<Output = Result<Vec<u8>>> + Send + 'static {
            let url = format!("{}{}", self.base_url, request.endpoint());
            let builder = match request {
                FetchRequest::Cell { .. } => self.client.get(&url),
                FetchRequest::Pin {
                    entity_id,
                    precise,
                } => self.client.post(&url).json(&serde_json::json!({
                    "trail_id": entity_id.to_string(),
                    "precise": precise,
                })),
            };

            async move {
                let response = builder
                    .send()
                    .await
                    .map_err(|error| CacheError::Transport(error.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(CacheError::Status {
                        status: status.as_u16(),
                        url,
                    });
                }
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|error| CacheError::Transport(error.to_string()))?;
                Ok(bytes.to_vec())
            }
        }
    }
}
