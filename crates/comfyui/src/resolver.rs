//! Result resolution: job history -> ordered output images.

use sketchforge_core::outcome::{ErrorKind, ImageRef, JobOutcome};

use crate::api::{ComfyUIApiError, HistoryEntry};
use crate::engine::RenderEngine;
use crate::workflow::OUTPUT_STAGE;

/// Fetch the recorded history for `prompt_id` and extract its images.
///
/// Called once the watcher has seen completion. A missing record or an
/// empty output stage is a protocol violation and is not retried.
pub async fn resolve(engine: &dyn RenderEngine, prompt_id: &str) -> JobOutcome {
    match engine.get_history(prompt_id).await {
        Ok(Some(entry)) => resolve_entry(&entry),
        Ok(None) => JobOutcome::failure(
            ErrorKind::ProtocolError,
            format!("No history recorded for completed job {prompt_id}"),
        ),
        Err(e) => JobOutcome::failure(ErrorKind::TransportError, e.to_string()),
    }
}

/// Extract the output stage's images from a history record, preserving
/// the engine's order.
pub fn resolve_entry(entry: &HistoryEntry) -> JobOutcome {
    if let Some(status) = entry.status.as_ref().filter(|s| s.is_failed()) {
        return JobOutcome::failure(
            ErrorKind::ExecutionFailed,
            format!("ComfyUI reported status '{}'", status.status_str),
        );
    }

    let Some(output) = entry.outputs.get(OUTPUT_STAGE) else {
        return JobOutcome::failure(
            ErrorKind::ProtocolError,
            format!("No images returned from ComfyUI: output stage {OUTPUT_STAGE} missing"),
        );
    };

    if output.images.is_empty() {
        return JobOutcome::failure(
            ErrorKind::ProtocolError,
            format!("No images returned from ComfyUI: output stage {OUTPUT_STAGE} is empty"),
        );
    }

    JobOutcome::Success {
        images: output.images.clone(),
    }
}

/// Map image descriptors to retrievable URLs, one per descriptor, in order.
pub fn image_urls(
    engine: &dyn RenderEngine,
    images: &[ImageRef],
) -> Result<Vec<String>, ComfyUIApiError> {
    images.iter().map(|image| engine.view_url(image)).collect()
}
