//! Seams between the pipeline stages and a concrete engine.
//!
//! [`RenderEngine`] covers the request/response endpoints and
//! [`EventSource`] the push channel. [`ComfyUIApi`] and [`ComfyUIClient`]
//! are the production implementations; tests substitute in-memory fakes.

use async_trait::async_trait;
use sketchforge_core::outcome::{AssetHandle, ImageRef};

use crate::api::{ComfyUIApi, ComfyUIApiError, HistoryEntry, SubmitResponse};
use crate::client::{ComfyUIClient, ComfyUIClientError, ComfyUIConnection};
use crate::messages::ComfyUIMessage;
use crate::workflow::WorkflowGraph;

/// Request/response operations against a generation engine.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Store a PNG in the engine's input namespace, overwriting any asset
    /// with the same filename.
    async fn upload_image(&self, filename: &str, png: Vec<u8>)
        -> Result<AssetHandle, ComfyUIApiError>;

    /// Queue a workflow under `client_id`.
    async fn submit_workflow(
        &self,
        workflow: &WorkflowGraph,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError>;

    /// Recorded history for a job, `None` while it has not finished.
    async fn get_history(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError>;

    /// Health probe payload.
    async fn system_stats(&self) -> Result<serde_json::Value, ComfyUIApiError>;

    /// Raw bytes of an output image.
    async fn fetch_image(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError>;

    /// Retrievable URL for an output image.
    fn view_url(&self, image: &ImageRef) -> Result<String, ComfyUIApiError>;
}

/// Opens event-stream subscriptions scoped to a client id.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn subscribe(
        &self,
        client_id: &str,
    ) -> Result<Box<dyn EventSubscription>, ComfyUIClientError>;
}

/// One open event-stream subscription.
#[async_trait]
pub trait EventSubscription: Send {
    /// Next typed message; `None` once the stream has ended.
    async fn next_message(&mut self) -> Option<Result<ComfyUIMessage, ComfyUIClientError>>;

    /// Close the underlying connection.
    async fn close(&mut self);
}

#[async_trait]
impl RenderEngine for ComfyUIApi {
    async fn upload_image(
        &self,
        filename: &str,
        png: Vec<u8>,
    ) -> Result<AssetHandle, ComfyUIApiError> {
        ComfyUIApi::upload_image(self, filename, png).await
    }

    async fn submit_workflow(
        &self,
        workflow: &WorkflowGraph,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        ComfyUIApi::submit_workflow(self, workflow, client_id).await
    }

    async fn get_history(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        ComfyUIApi::get_history(self, prompt_id).await
    }

    async fn system_stats(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        ComfyUIApi::system_stats(self).await
    }

    async fn fetch_image(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError> {
        ComfyUIApi::fetch_image(self, image).await
    }

    fn view_url(&self, image: &ImageRef) -> Result<String, ComfyUIApiError> {
        ComfyUIApi::view_url(self, image)
    }
}

#[async_trait]
impl EventSource for ComfyUIClient {
    async fn subscribe(
        &self,
        client_id: &str,
    ) -> Result<Box<dyn EventSubscription>, ComfyUIClientError> {
        let connection = self.connect(client_id).await?;
        Ok(Box::new(connection))
    }
}

#[async_trait]
impl EventSubscription for ComfyUIConnection {
    async fn next_message(&mut self) -> Option<Result<ComfyUIMessage, ComfyUIClientError>> {
        ComfyUIConnection::next_message(self).await
    }

    async fn close(&mut self) {
        ComfyUIConnection::close(self).await
    }
}
