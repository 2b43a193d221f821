//! Sketch-to-render orchestration.
//!
//! Composes the ComfyUI stages into a single `generate(request)` call and
//! a `check_connection()` probe for the canvas/UI layer.

pub mod config;
pub mod error;
pub mod pipeline;

pub use config::EngineConfig;
pub use error::RenderError;
pub use pipeline::{RenderOutput, RenderPipeline};
