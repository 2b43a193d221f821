//! ComfyUI REST and WebSocket client library.
//!
//! Provides the stages of one render job against a ComfyUI server:
//! asset upload, workflow construction, submission, completion watching
//! (event stream with a polling fallback), and result resolution. The
//! [`engine`] traits decouple the stages from the concrete HTTP and
//! WebSocket clients.

pub mod api;
pub mod client;
pub mod engine;
pub mod events;
pub mod messages;
pub mod resolver;
pub mod submit;
pub mod upload;
pub mod watcher;
pub mod workflow;
