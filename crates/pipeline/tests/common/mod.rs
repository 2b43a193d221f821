//! In-memory engine and event-source fakes shared by the pipeline tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sketchforge_comfyui::api::{ComfyUIApiError, HistoryEntry, HistoryStatus, StageOutput, SubmitResponse};
use sketchforge_comfyui::client::ComfyUIClientError;
use sketchforge_comfyui::engine::{EventSource, EventSubscription, RenderEngine};
use sketchforge_comfyui::messages::{parse_message, ComfyUIMessage};
use sketchforge_comfyui::workflow::{WorkflowGraph, OUTPUT_STAGE};
use sketchforge_core::bitmap::Bitmap;
use sketchforge_core::outcome::{AssetHandle, ImageRef};
use sketchforge_core::request::GenerationRequest;
use sketchforge_core::types::SessionId;
use sketchforge_pipeline::RenderPipeline;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub const SESSION: &str = "test-session";

/// A small opaque canvas.
pub fn canvas() -> Bitmap {
    Bitmap::from_rgba(4, 4, vec![200; 4 * 4 * 4]).unwrap()
}

pub fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest::new(prompt, canvas())
}

pub fn output_image(filename: &str) -> ImageRef {
    ImageRef {
        filename: filename.to_string(),
        subfolder: String::new(),
        storage_type: "output".to_string(),
    }
}

/// A successful history record with `images` on the output stage.
pub fn history_with(images: Vec<ImageRef>) -> HistoryEntry {
    HistoryEntry {
        status: Some(HistoryStatus {
            status_str: "success".to_string(),
            completed: true,
        }),
        outputs: HashMap::from([(OUTPUT_STAGE.to_string(), StageOutput { images })]),
    }
}

/// URL the fake engine produces for `filename`.
pub fn fake_url(filename: &str) -> String {
    format!("http://engine.test/view?filename={filename}&subfolder=&type=output")
}

pub fn pipeline(engine: &Arc<FakeEngine>, events: &Arc<ScriptedEvents>) -> RenderPipeline {
    RenderPipeline::new(
        Arc::clone(engine) as Arc<dyn RenderEngine>,
        Arc::clone(events) as Arc<dyn EventSource>,
        SessionId::from_string(SESSION),
    )
}

// ---------------------------------------------------------------------------
// Fake engine
// ---------------------------------------------------------------------------

/// Records every call and answers from configured state.
///
/// History lookups return `None` for the first `empty_polls` calls, then
/// the record configured for the requested job id (if any).
pub struct FakeEngine {
    stored_name: Option<String>,
    fail_upload: bool,
    fail_submit: bool,
    healthy: bool,
    prompt_ids: Mutex<VecDeque<String>>,
    histories: Mutex<HashMap<String, HistoryEntry>>,
    empty_polls: u32,
    history_fails_from: Option<u32>,
    pub uploads: Mutex<Vec<String>>,
    pub submissions: Mutex<Vec<(serde_json::Value, String)>>,
    pub history_calls: AtomicU32,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            stored_name: None,
            fail_upload: false,
            fail_submit: false,
            healthy: true,
            prompt_ids: Mutex::new(VecDeque::new()),
            histories: Mutex::new(HashMap::new()),
            empty_polls: 0,
            history_fails_from: None,
            uploads: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
            history_calls: AtomicU32::new(0),
        }
    }

    /// Name the engine reports for stored uploads (default: the upload filename).
    pub fn storing_as(mut self, name: &str) -> Self {
        self.stored_name = Some(name.to_string());
        self
    }

    /// Job ids handed out by successive submissions.
    pub fn assigning(self, ids: &[&str]) -> Self {
        *self.prompt_ids.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_history(self, prompt_id: &str, entry: HistoryEntry) -> Self {
        self.histories
            .lock()
            .unwrap()
            .insert(prompt_id.to_string(), entry);
        self
    }

    pub fn empty_for(mut self, polls: u32) -> Self {
        self.empty_polls = polls;
        self
    }

    /// History lookups from call index `call` onwards fail.
    pub fn history_fails_from(mut self, call: u32) -> Self {
        self.history_fails_from = Some(call);
        self
    }

    pub fn failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    pub fn failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn history_call_count(&self) -> u32 {
        self.history_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn upload_image(&self, filename: &str, png: Vec<u8>) -> Result<AssetHandle, ComfyUIApiError> {
        assert!(!png.is_empty());
        self.uploads.lock().unwrap().push(filename.to_string());
        if self.fail_upload {
            return Err(ComfyUIApiError::ApiError {
                status: 413,
                body: "payload too large".to_string(),
            });
        }
        Ok(AssetHandle {
            name: self.stored_name.clone().unwrap_or_else(|| filename.to_string()),
            subfolder: String::new(),
            storage_type: "input".to_string(),
        })
    }

    async fn submit_workflow(
        &self,
        workflow: &WorkflowGraph,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::to_value(workflow).unwrap();
        self.submissions
            .lock()
            .unwrap()
            .push((body, client_id.to_string()));
        if self.fail_submit {
            return Err(ComfyUIApiError::ApiError {
                status: 400,
                body: "prompt_outputs_failed_validation".to_string(),
            });
        }
        let prompt_id = self
            .prompt_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "job".to_string());
        Ok(SubmitResponse {
            prompt_id,
            number: 0,
        })
    }

    async fn get_history(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        let call = self.history_calls.fetch_add(1, Ordering::SeqCst);
        if self.history_fails_from.is_some_and(|from| call >= from) {
            return Err(ComfyUIApiError::ApiError {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        if call < self.empty_polls {
            return Ok(None);
        }
        Ok(self.histories.lock().unwrap().get(prompt_id).cloned())
    }

    async fn system_stats(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        if self.healthy {
            Ok(serde_json::json!({"system": {"os": "posix"}, "devices": []}))
        } else {
            Err(ComfyUIApiError::Timeout {
                endpoint: "system_stats",
                timeout: std::time::Duration::from_secs(5),
            })
        }
    }

    async fn fetch_image(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError> {
        Ok(image.filename.as_bytes().to_vec())
    }

    fn view_url(&self, image: &ImageRef) -> Result<String, ComfyUIApiError> {
        Ok(fake_url(&image.filename))
    }
}

// ---------------------------------------------------------------------------
// Scripted event source
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum Step {
    Message(String),
    Error,
    End,
}

pub fn msg(json: &str) -> Step {
    Step::Message(json.to_string())
}

pub fn executed(prompt_id: &str) -> Step {
    msg(&format!(
        r#"{{"type":"executed","data":{{"prompt_id":"{prompt_id}"}}}}"#
    ))
}

pub fn progress(value: i32, max: i32) -> Step {
    msg(&format!(
        r#"{{"type":"progress","data":{{"value":{value},"max":{max}}}}}"#
    ))
}

/// Every subscription replays the same script, then stays silent.
pub struct ScriptedEvents {
    script: Vec<Step>,
    pub subscriptions: AtomicU32,
    pub closed: Arc<AtomicU32>,
    pub subscribed_ids: Mutex<Vec<String>>,
}

impl ScriptedEvents {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            subscriptions: AtomicU32::new(0),
            closed: Arc::new(AtomicU32::new(0)),
            subscribed_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn subscription_count(&self) -> u32 {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedSubscription {
    steps: VecDeque<Step>,
    closed: Arc<AtomicU32>,
    is_closed: AtomicBool,
}

#[async_trait]
impl EventSource for ScriptedEvents {
    async fn subscribe(&self, client_id: &str) -> Result<Box<dyn EventSubscription>, ComfyUIClientError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.subscribed_ids
            .lock()
            .unwrap()
            .push(client_id.to_string());
        Ok(Box::new(ScriptedSubscription {
            steps: self.script.iter().cloned().collect(),
            closed: Arc::clone(&self.closed),
            is_closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl EventSubscription for ScriptedSubscription {
    async fn next_message(&mut self) -> Option<Result<ComfyUIMessage, ComfyUIClientError>> {
        match self.steps.pop_front() {
            Some(Step::Message(json)) => Some(Ok(parse_message(&json).unwrap())),
            Some(Step::Error) => Some(Err(ComfyUIClientError::Protocol(
                "connection reset".to_string(),
            ))),
            Some(Step::End) => None,
            None => futures_pending().await,
        }
    }

    async fn close(&mut self) {
        if !self.is_closed.swap(true, Ordering::SeqCst) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Never resolves; models a silent but open connection.
async fn futures_pending<T>() -> T {
    std::future::pending().await
}
