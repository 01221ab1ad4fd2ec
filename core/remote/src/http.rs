//! HTTP client for a JSONPlaceholder-style REST backend.

use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use postsync_common::{Comment, Error, Post, PostId, Result};

use crate::api::{PostsApi, SyncTransport};

/// Default remote base URL.
pub const DEFAULT_BASE_URL: &str = "https://jsonplaceholder.typicode.com";

/// Remote client speaking JSON over HTTP.
///
/// Request timeouts are the HTTP client's own; nothing is layered on top.
pub struct HttpRemote {
    http: Client,
    base: Url,
}

impl HttpRemote {
    /// Create a client for `base_url`.
    ///
    /// # Errors
    /// - `InvalidInput` if `base_url` is not an absolute http(s) URL
    /// - `Transport` if the HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid base URL {}: {}", base_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(format!(
                "Unsupported URL scheme: {}",
                base.scheme()
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .user_agent("postsync/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, base })
    }

    /// Resolve an endpoint path against the base URL.
    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::InvalidInput(format!("Invalid endpoint {}: {}", path, e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        debug!("Sending request to: {}", url);

        let response = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Request to {} failed: {}", path, e)))?;

        self.handle_response(response).await
    }

    async fn acknowledge(&self, id: PostId, favorite: bool) -> Result<()> {
        let url = self.endpoint(&format!("posts/{}", id))?;
        debug!("Acknowledging favorite={} for post {}", favorite, id);

        let response = self
            .http
            .patch(url)
            .json(&serde_json::json!({ "favorite": favorite }))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Acknowledgment for post {} failed: {}", id, e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Transport(format!("API error: {}", status)))
        }
    }

    /// Check the status and decode the body.
    ///
    /// The body is read in full before decoding so a dropped connection
    /// surfaces as `Transport` and a malformed payload as `Decode`.
    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let status = response.status();
        debug!("Received response with status code: {}", status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("API error: {} - {}", status, body)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read response: {}", e)))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Decode(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl PostsApi for HttpRemote {
    async fn list_posts(&self) -> Result<Vec<Post>> {
        self.get_json("posts").await
    }

    async fn list_comments(&self, post_id: PostId) -> Result<Vec<Comment>> {
        self.get_json(&format!("posts/{}/comments", post_id)).await
    }
}

#[async_trait]
impl SyncTransport for HttpRemote {
    async fn confirm_favorite(&self, id: PostId) -> Result<()> {
        self.acknowledge(id, true).await
    }

    async fn confirm_unfavorite(&self, id: PostId) -> Result<()> {
        self.acknowledge(id, false).await
    }
}
