//! The render orchestrator.
//!
//! [`RenderPipeline`] runs one job end to end, strictly in sequence:
//! upload -> build -> submit -> watch -> resolve. [`RenderPipeline::generate`]
//! is the boundary towards the canvas/UI layer and never returns an
//! error; [`RenderPipeline::render`] exposes the typed failure instead.
//!
//! No state is shared between calls except the read-only session id, so
//! overlapping `generate` calls need no locking. Each call opens its own
//! event-stream subscription and filters messages by its job id.

use std::sync::Arc;

use serde::Serialize;
use sketchforge_comfyui::api::ComfyUIApi;
use sketchforge_comfyui::client::ComfyUIClient;
use sketchforge_comfyui::engine::{EventSource, RenderEngine};
use sketchforge_comfyui::events::RenderEvent;
use sketchforge_comfyui::resolver::{image_urls, resolve, resolve_entry};
use sketchforge_comfyui::submit::submit_job;
use sketchforge_comfyui::upload::upload_bitmap;
use sketchforge_comfyui::watcher::{CompletionWatcher, WatchConfig, WatchOutcome};
use sketchforge_comfyui::workflow::{build_render_workflow, WorkflowSettings};
use sketchforge_core::outcome::{GenerateResult, ImageRef, Job, JobOutcome};
use sketchforge_core::request::GenerationRequest;
use sketchforge_core::types::SessionId;
use tokio::sync::broadcast;

use crate::config::EngineConfig;
use crate::error::RenderError;

/// Broadcast channel capacity for render events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Images produced by one successful render.
#[derive(Debug, Clone, Serialize)]
pub struct RenderOutput {
    pub prompt_id: String,
    /// Descriptors in the order the engine recorded them.
    pub images: Vec<ImageRef>,
    /// One retrievable URL per descriptor, same order.
    pub urls: Vec<String>,
}

/// Orchestrates render jobs against one engine.
pub struct RenderPipeline {
    engine: Arc<dyn RenderEngine>,
    events: Arc<dyn EventSource>,
    session: SessionId,
    watch: WatchConfig,
    workflow: WorkflowSettings,
    event_tx: broadcast::Sender<RenderEvent>,
}

impl RenderPipeline {
    /// Create a pipeline over explicit engine and event-source
    /// implementations, with default watch bounds and workflow settings.
    pub fn new(
        engine: Arc<dyn RenderEngine>,
        events: Arc<dyn EventSource>,
        session: SessionId,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            engine,
            events,
            session,
            watch: WatchConfig::default(),
            workflow: WorkflowSettings::default(),
            event_tx,
        }
    }

    /// Create a pipeline talking to the ComfyUI server described by `config`.
    pub fn from_config(config: &EngineConfig, session: SessionId) -> Self {
        let engine = Arc::new(ComfyUIApi::new(
            config.api_url.clone(),
            config.request_timeout,
        ));
        let events = Arc::new(ComfyUIClient::new(config.ws_url.clone()));
        Self::new(engine, events, session)
            .with_watch_config(config.watch.clone())
            .with_workflow_settings(config.workflow.clone())
    }

    pub fn with_watch_config(mut self, watch: WatchConfig) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_workflow_settings(mut self, workflow: WorkflowSettings) -> Self {
        self.workflow = workflow;
        self
    }

    /// The session id attached to every submission.
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Subscribe to render lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<RenderEvent> {
        self.event_tx.subscribe()
    }

    /// Run a render and report the outcome as a [`GenerateResult`].
    ///
    /// Every failure is converted to `success: false` with a
    /// `"<Kind>: <detail>"` message; nothing propagates past this call.
    pub async fn generate(&self, request: &GenerationRequest) -> GenerateResult {
        match self.render(request).await {
            Ok(output) => GenerateResult::succeeded(output.urls),
            Err(e) => GenerateResult::failed(e.kind(), &e.to_string()),
        }
    }

    /// Run a render, returning the typed failure on error.
    pub async fn render(&self, request: &GenerationRequest) -> Result<RenderOutput, RenderError> {
        let job = match self.submit(request).await {
            Ok(job) => job,
            Err(e) => {
                self.report_failure(None, &e);
                return Err(e);
            }
        };

        match self.complete(&job).await {
            Ok(output) => {
                tracing::info!(
                    prompt_id = %job.id,
                    image_count = output.urls.len(),
                    elapsed_ms = (chrono::Utc::now() - job.submitted_at).num_milliseconds(),
                    "Generation succeeded",
                );
                self.emit(RenderEvent::Completed {
                    prompt_id: job.id.clone(),
                    image_count: output.urls.len(),
                });
                Ok(output)
            }
            Err(e) => {
                self.report_failure(Some(&job.id), &e);
                Err(e)
            }
        }
    }

    /// Probe the engine once; `true` if it answered successfully.
    pub async fn check_connection(&self) -> bool {
        match self.engine.system_stats().await {
            Ok(stats) => {
                tracing::info!(stats = %stats, "ComfyUI reachable");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "ComfyUI connection check failed");
                false
            }
        }
    }

    /// Download one output image.
    pub async fn download(&self, image: &ImageRef) -> Result<Vec<u8>, RenderError> {
        self.engine
            .fetch_image(image)
            .await
            .map_err(RenderError::Download)
    }

    // ---- stages ----

    /// Validate, upload, build, and submit.
    async fn submit(&self, request: &GenerationRequest) -> Result<Job, RenderError> {
        request.validate()?;

        let asset = upload_bitmap(self.engine.as_ref(), request.init_image()).await?;
        let workflow = build_render_workflow(request, &asset, &self.workflow);
        let job = submit_job(self.engine.as_ref(), &workflow, &self.session)
            .await
            .map_err(RenderError::Submit)?;

        self.emit(RenderEvent::Submitted {
            prompt_id: job.id.clone(),
        });
        Ok(job)
    }

    /// Watch and resolve.
    async fn complete(&self, job: &Job) -> Result<RenderOutput, RenderError> {
        let watcher = CompletionWatcher::new(
            self.engine.as_ref(),
            self.events.as_ref(),
            &self.session,
            &self.watch,
        )
        .with_events(&self.event_tx);

        let polled = match watcher.watch(&job.id).await {
            WatchOutcome::Completed { via, entry } => {
                tracing::debug!(prompt_id = %job.id, ?via, "Resolving outputs");
                entry
            }
            WatchOutcome::Failed { reason, detail } => {
                return Err(RenderError::Job {
                    kind: reason,
                    detail,
                });
            }
            WatchOutcome::TimedOut => {
                return Err(RenderError::TimedOut(self.watch.deadline.as_secs()));
            }
        };

        // A record already fetched by polling is resolved as-is.
        let outcome = match polled {
            Some(entry) => resolve_entry(&entry),
            None => resolve(self.engine.as_ref(), &job.id).await,
        };

        match outcome {
            JobOutcome::Success { images } => {
                let urls = image_urls(self.engine.as_ref(), &images).map_err(RenderError::ImageUrl)?;
                Ok(RenderOutput {
                    prompt_id: job.id.clone(),
                    images,
                    urls,
                })
            }
            JobOutcome::Failure { reason, detail } => Err(RenderError::Job {
                kind: reason,
                detail,
            }),
        }
    }

    // ---- helpers ----

    fn report_failure(&self, prompt_id: Option<&str>, error: &RenderError) {
        tracing::error!(
            prompt_id = prompt_id.unwrap_or("-"),
            kind = %error.kind(),
            error = %error,
            "Generation failed",
        );
        self.emit(RenderEvent::Failed {
            prompt_id: prompt_id.map(str::to_string),
            error: format!("{}: {error}", error.kind()),
        });
    }

    fn emit(&self, event: RenderEvent) {
        let _ = self.event_tx.send(event);
    }
}
