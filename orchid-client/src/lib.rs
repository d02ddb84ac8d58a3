//! Orchid HTTP Client
//!
//! A small, typed client for a remote Orchid server. The engine's remote
//! dispatcher and the CLI's `--remote` mode both go through it.
//!
//! # Example
//!
//! ```no_run
//! use orchid_client::OrchidClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrchidClient::new("http://localhost:3000").with_secret("s3cret");
//!
//!     let execution = client.run_job("build").await?;
//!     let mut output = client.stream_output(execution.id).await?;
//!     while let Some(line) = output.next_line().await? {
//!         println!("{}", line);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod executions;
mod output;

pub use error::{ClientError, Result};
pub use output::{LineBuffer, OutputLines};

use orchid_core::domain::server::RemoteServer;
use orchid_core::dto::{ErrorResponse, SECRET_HEADER};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;

/// HTTP client for the Orchid server API
#[derive(Debug, Clone)]
pub struct OrchidClient {
    /// Base URL of the server (e.g., "http://localhost:3000")
    base_url: String,
    /// Shared secret sent in the `X-Orchid-Secret` header
    secret: Option<String>,
    /// HTTP client instance
    client: Client,
}

impl OrchidClient {
    /// Create a new client
    ///
    /// # Example
    /// ```
    /// use orchid_client::OrchidClient;
    ///
    /// let client = OrchidClient::new("http://localhost:3000");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    /// Keep in mind that a total request timeout also bounds output streaming.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: None,
            client,
        }
    }

    /// Create a client for the server described in `server.json`
    pub fn from_server(server: &RemoteServer) -> Self {
        let client = Self::new(server.base_url());
        match server.secret() {
            Some(secret) => client.with_secret(secret),
            None => client,
        }
    }

    /// Attach a shared secret to every request
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Get the base URL of the server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds a request for the given path segments, escaping each segment
    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::InvalidRequest(format!("Invalid base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidRequest("Base URL cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(segments);

        let mut request = self.client.request(method, url);
        if let Some(secret) = &self.secret {
            request = request.header(SECRET_HEADER, secret);
        }
        Ok(request)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        Self::check_status(response).await.map(|_| ())
    }

    /// Turns a non-success status into an [`ClientError::ApiError`]
    ///
    /// The server answers errors with `{"error": "..."}`; other bodies are
    /// passed through as text.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error)
            .unwrap_or(body);

        Err(ClientError::api_error(status.as_u16(), message))
    }
}
