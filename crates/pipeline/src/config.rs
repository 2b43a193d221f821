use std::time::Duration;

use sketchforge_comfyui::watcher::WatchConfig;
use sketchforge_comfyui::workflow::WorkflowSettings;

/// Default ComfyUI HTTP base URL.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8188";

/// Engine connection and render configuration loaded from environment
/// variables.
///
/// Every field has a default suitable for a local ComfyUI install.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// HTTP base URL (default: `http://127.0.0.1:8188`).
    pub api_url: String,
    /// Event-stream base URL (default: derived from `api_url`).
    pub ws_url: String,
    /// Per-request deadline (default: 5s).
    pub request_timeout: Duration,
    /// Completion-watch bounds (default: 120s deadline, 1.5s x 60 polls).
    pub watch: WatchConfig,
    /// Fixed workflow parameters.
    pub workflow: WorkflowSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                                      |
    /// |--------------------------------|----------------------------------------------|
    /// | `COMFYUI_URL`                  | `http://127.0.0.1:8188`                      |
    /// | `COMFYUI_WS_URL`               | `COMFYUI_URL` with `ws`/`wss` scheme         |
    /// | `COMFYUI_REQUEST_TIMEOUT_SECS` | `5`                                          |
    /// | `COMFYUI_RENDER_TIMEOUT_SECS`  | `120`                                        |
    /// | `COMFYUI_POLL_INTERVAL_MS`     | `1500`                                       |
    /// | `COMFYUI_POLL_MAX_ATTEMPTS`    | `60`                                         |
    /// | `COMFYUI_CHECKPOINT`           | `sd3.5_large_fp8_scaled.safetensors`         |
    /// | `COMFYUI_CONTROLNET`           | `sd3.5_large_controlnet_canny.safetensors`   |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_url = lookup("COMFYUI_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let ws_url = lookup("COMFYUI_WS_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| derive_ws_url(&api_url));

        let watch_defaults = WatchConfig::default();
        let watch = WatchConfig {
            deadline: Duration::from_secs(parse_or(
                &lookup,
                "COMFYUI_RENDER_TIMEOUT_SECS",
                watch_defaults.deadline.as_secs(),
            )),
            poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "COMFYUI_POLL_INTERVAL_MS",
                watch_defaults.poll_interval.as_millis() as u64,
            )),
            max_poll_attempts: parse_or(
                &lookup,
                "COMFYUI_POLL_MAX_ATTEMPTS",
                watch_defaults.max_poll_attempts,
            ),
        };

        let mut workflow = WorkflowSettings::default();
        if let Some(checkpoint) = lookup("COMFYUI_CHECKPOINT").filter(|v| !v.trim().is_empty()) {
            workflow.checkpoint = checkpoint;
        }
        if let Some(control_net) = lookup("COMFYUI_CONTROLNET").filter(|v| !v.trim().is_empty()) {
            workflow.control_net = control_net;
        }

        Self {
            api_url,
            ws_url,
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "COMFYUI_REQUEST_TIMEOUT_SECS",
                5,
            )),
            watch,
            workflow,
        }
    }
}

/// Swap an HTTP base URL's scheme for the matching WebSocket scheme.
pub fn derive_ws_url(api_url: &str) -> String {
    if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{api_url}")
    }
}

/// Parse `key` or fall back to `default`, warning on malformed values.
fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
    }
}
