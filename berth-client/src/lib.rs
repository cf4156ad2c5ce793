//! Berth Hosting Client
//!
//! HTTP client for the code-hosting platform API. Berth only needs commit
//! statuses: the pipeline runner posts `pending`, then `success` or
//! `failure`, for the commit under test.
//!
//! # Example
//!
//! ```no_run
//! use berth_client::HostingClient;
//! use berth_core::dto::status::{CommitState, CommitStatus};
//!
//! # async fn example() -> berth_client::Result<()> {
//! let client = HostingClient::new("https://api.github.com", "ghp_token");
//! let status = CommitStatus::new(CommitState::Pending, "berth/test");
//! client.post_status("acme/banking", "4f2a9c1", &status).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
mod statuses;

pub use error::{ClientError, Result};
pub use statuses::split_repo;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

const USER_AGENT: &str = concat!("berth/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the hosting platform API
#[derive(Debug, Clone)]
pub struct HostingClient {
    /// API base URL (e.g., "https://api.github.com")
    base_url: String,
    /// Bearer token
    token: String,
    /// HTTP client instance
    client: Client,
}

impl HostingClient {
    /// Create a new hosting client
    ///
    /// # Arguments
    /// * `base_url` - The API base URL
    /// * `token` - Token sent as `Authorization: Bearer`
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            client: Client::new(),
        }
    }

    /// Get the API base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
    }

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
