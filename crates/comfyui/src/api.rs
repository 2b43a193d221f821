//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (image upload, workflow submission,
//! history retrieval, image retrieval, health probe) using [`reqwest`].
//! Every request carries its own deadline; a request that exceeds it is
//! cancelled and reported as [`ComfyUIApiError::Timeout`].

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sketchforge_core::outcome::{AssetHandle, ImageRef};

use crate::workflow::WorkflowGraph;

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    request_timeout: Duration,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i32,
}

/// Body of a `POST /prompt` request.
#[derive(Serialize)]
struct SubmitRequest<'a> {
    prompt: &'a WorkflowGraph,
    client_id: &'a str,
}

/// One job's record from `GET /history/{prompt_id}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub status: Option<HistoryStatus>,
    /// Per-stage outputs keyed by stage id.
    #[serde(default)]
    pub outputs: HashMap<String, StageOutput>,
}

/// Execution status recorded alongside a history entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryStatus {
    /// `success` or `error` (older engines: `failed`).
    #[serde(default)]
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
}

impl HistoryStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self.status_str.as_str(), "error" | "failed")
    }
}

/// Output recorded for a single stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StageOutput {
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, body decode, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The request did not complete within its deadline.
    #[error("{endpoint} request timed out after {}ms", timeout.as_millis())]
    Timeout {
        endpoint: &'static str,
        timeout: Duration,
    },

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The workflow failed local validation and was never sent.
    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    /// * `request_timeout` - Deadline applied to every request.
    pub fn new(api_url: String, request_timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, request_timeout)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling).
    pub fn with_client(client: reqwest::Client, api_url: String, request_timeout: Duration) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    /// HTTP API base URL without a trailing slash.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Upload a PNG into the engine's `input` namespace.
    ///
    /// Sends `POST /upload/image` as multipart form data with
    /// `overwrite=true`, so re-uploading under the same filename replaces
    /// the stored asset.
    pub async fn upload_image(
        &self,
        filename: &str,
        png: Vec<u8>,
    ) -> Result<AssetHandle, ComfyUIApiError> {
        let request = self.upload_request(filename, png)?;
        let response = self.send(request, "upload").await?;
        Self::parse_response(response).await
    }

    fn upload_request(
        &self,
        filename: &str,
        png: Vec<u8>,
    ) -> Result<reqwest::RequestBuilder, ComfyUIApiError> {
        let part = reqwest::multipart::Part::bytes(png)
            .file_name(filename.to_string())
            .mime_str("image/png")?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("type", "input")
            .text("overwrite", "true");

        Ok(self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form))
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow and client
    /// ID. Returns the server-assigned `prompt_id` and queue position.
    pub async fn submit_workflow(
        &self,
        workflow: &WorkflowGraph,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let request = self.submit_request(workflow, client_id);
        let response = self.send(request, "submit").await?;
        Self::parse_response(response).await
    }

    fn submit_request(&self, workflow: &WorkflowGraph, client_id: &str) -> reqwest::RequestBuilder {
        let body = SubmitRequest {
            prompt: workflow,
            client_id,
        };
        self.client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
    }

    /// Retrieve the recorded history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. ComfyUI answers `{}`
    /// until the job has finished, which maps to `Ok(None)`.
    pub async fn get_history(
        &self,
        prompt_id: &str,
    ) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        let request = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id));

        let response = self.send(request, "history").await?;
        let mut history: HashMap<String, HistoryEntry> = Self::parse_response(response).await?;
        Ok(history.remove(prompt_id))
    }

    /// Fetch `GET /system_stats`, used as a lightweight health probe.
    pub async fn system_stats(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        let request = self.client.get(format!("{}/system_stats", self.api_url));
        let response = self.send(request, "system_stats").await?;
        Self::parse_response(response).await
    }

    /// Build the retrievable URL for an output image.
    ///
    /// `{base}/view?filename=..&subfolder=..&type=..` with the query
    /// components percent-encoded.
    pub fn view_url(&self, image: &ImageRef) -> Result<String, ComfyUIApiError> {
        let request = self.view_request(image).build()?;
        Ok(request.url().to_string())
    }

    /// Download the raw bytes of an output image.
    pub async fn fetch_image(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self.send(self.view_request(image), "view").await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    fn view_request(&self, image: &ImageRef) -> reqwest::RequestBuilder {
        self.client.get(format!("{}/view", self.api_url)).query(&[
            ("filename", image.filename.as_str()),
            ("subfolder", image.subfolder.as_str()),
            ("type", image.storage_type.as_str()),
        ])
    }

    /// Send a request under the per-request deadline, reporting an
    /// elapsed deadline as [`ComfyUIApiError::Timeout`].
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &'static str,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        request
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ComfyUIApiError::Timeout {
                        endpoint,
                        timeout: self.request_timeout,
                    }
                } else {
                    ComfyUIApiError::Request(e)
                }
            })
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
