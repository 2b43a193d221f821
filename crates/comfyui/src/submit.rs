//! Job submission.

use chrono::Utc;
use sketchforge_core::outcome::Job;
use sketchforge_core::types::SessionId;

use crate::api::ComfyUIApiError;
use crate::engine::RenderEngine;
use crate::workflow::WorkflowGraph;

/// Validate and queue `workflow` under the process session id.
///
/// The session id lets this process pick its jobs' messages out of the
/// shared event stream. An invalid graph is refused before any request.
pub async fn submit_job(
    engine: &dyn RenderEngine,
    workflow: &WorkflowGraph,
    session: &SessionId,
) -> Result<Job, ComfyUIApiError> {
    workflow
        .validate()
        .map_err(|e| ComfyUIApiError::InvalidWorkflow(e.to_string()))?;

    let response = engine.submit_workflow(workflow, session.as_str()).await?;

    tracing::info!(
        prompt_id = %response.prompt_id,
        queue_position = response.number,
        client_id = %session,
        "Workflow submitted to ComfyUI",
    );

    Ok(Job {
        id: response.prompt_id,
        submitted_at: Utc::now(),
    })
}
