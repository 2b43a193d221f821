//! Job identity, outcomes, and the result handed back to the caller.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Why a generation failed.
///
/// `Display` renders the variant name; failure messages returned to the
/// caller are always prefixed with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// The request was rejected before any network call.
    InvalidRequest,
    /// A single HTTP request failed, returned non-2xx, or timed out.
    TransportError,
    /// The engine answered but violated the expected output contract.
    ProtocolError,
    /// The engine reported that execution of the job failed.
    ExecutionFailed,
    /// The overall job deadline elapsed.
    Timeout,
    /// The polling fallback ran out of attempts.
    Exhausted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidRequest => "InvalidRequest",
            Self::TransportError => "TransportError",
            Self::ProtocolError => "ProtocolError",
            Self::ExecutionFailed => "ExecutionFailed",
            Self::Timeout => "Timeout",
            Self::Exhausted => "Exhausted",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Engine-side handles
// ---------------------------------------------------------------------------

/// Stored location of an uploaded input image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetHandle {
    /// Filename as stored by the engine.
    pub name: String,
    /// Sub-directory inside the storage namespace (often empty).
    #[serde(default)]
    pub subfolder: String,
    /// Storage namespace, e.g. `input`.
    #[serde(rename = "type", default)]
    pub storage_type: String,
}

impl AssetHandle {
    /// Path the engine's image loader expects (`subfolder/name` or `name`).
    pub fn load_path(&self) -> String {
        if self.subfolder.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.subfolder, self.name)
        }
    }
}

/// A submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Opaque identifier assigned by the engine.
    pub id: String,
    pub submitted_at: Timestamp,
}

/// An output image descriptor as recorded by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub storage_type: String,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Terminal state of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Output images in the order the engine recorded them.
    Success { images: Vec<ImageRef> },
    Failure { reason: ErrorKind, detail: String },
}

impl JobOutcome {
    pub fn failure(reason: ErrorKind, detail: impl Into<String>) -> Self {
        Self::Failure {
            reason,
            detail: detail.into(),
        }
    }
}

/// What the caller (canvas/UI layer) receives from `generate`.
///
/// Either every requested image URL is present or none are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateResult {
    pub success: bool,
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerateResult {
    pub fn succeeded(images: Vec<String>) -> Self {
        Self {
            success: true,
            images,
            error: None,
        }
    }

    /// Failure with a `"<Kind>: <detail>"` message.
    pub fn failed(reason: ErrorKind, detail: &str) -> Self {
        Self {
            success: false,
            images: Vec::new(),
            error: Some(format!("{reason}: {detail}")),
        }
    }
}
