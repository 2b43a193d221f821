//! Progress events emitted while a render is in flight.
//!
//! Purely informational: the pipeline broadcasts them so a UI can show
//! progress, and nothing in the pipeline waits on them.

use serde::Serialize;

/// A render lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RenderEvent {
    /// The workflow was queued.
    Submitted { prompt_id: String },

    /// Step-level progress of the sampler.
    Progress {
        prompt_id: String,
        value: i32,
        max: i32,
        /// Completion percentage (0-100).
        percent: i16,
    },

    /// The event stream was lost; completion is now detected by polling.
    FellBackToPolling { prompt_id: String, reason: String },

    /// The job finished and its images were resolved.
    Completed { prompt_id: String, image_count: usize },

    /// The job failed, timed out, or produced no usable output.
    Failed {
        prompt_id: Option<String>,
        error: String,
    },
}

/// Integer percentage for `value` of `max`, clamped to `0..=100`.
pub fn progress_percent(value: i32, max: i32) -> i16 {
    if max <= 0 {
        return 0;
    }
    let percent = (f64::from(value) / f64::from(max)) * 100.0;
    percent.clamp(0.0, 100.0) as i16
}
