use sketchforge_comfyui::api::ComfyUIApiError;
use sketchforge_comfyui::upload::UploadError;
use sketchforge_core::error::CoreError;
use sketchforge_core::outcome::ErrorKind;

/// Any failure of a render, tagged with the stage that produced it.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("{0}")]
    InvalidRequest(#[from] CoreError),

    #[error("{0}")]
    Upload(#[from] UploadError),

    #[error("Submission failed: {0}")]
    Submit(ComfyUIApiError),

    #[error("Timed out waiting for render after {0}s")]
    TimedOut(u64),

    /// Terminal failure reported by the watcher or the resolver.
    #[error("{detail}")]
    Job { kind: ErrorKind, detail: String },

    #[error("Failed to build image URL: {0}")]
    ImageUrl(ComfyUIApiError),

    #[error("Image download failed: {0}")]
    Download(ComfyUIApiError),
}

impl RenderError {
    /// Classify into the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) | Self::Upload(UploadError::Encode(_)) => {
                ErrorKind::InvalidRequest
            }
            Self::Upload(UploadError::Api(_)) | Self::Download(_) => ErrorKind::TransportError,
            Self::Submit(ComfyUIApiError::InvalidWorkflow(_)) | Self::ImageUrl(_) => {
                ErrorKind::ProtocolError
            }
            Self::Submit(_) => ErrorKind::TransportError,
            Self::TimedOut(_) => ErrorKind::Timeout,
            Self::Job { kind, .. } => *kind,
        }
    }
}
