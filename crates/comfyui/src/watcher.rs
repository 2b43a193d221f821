//! Completion detection for a submitted job.
//!
//! The watcher first subscribes to the event stream and waits for a
//! terminal message for the job. If the stream cannot be opened, errors,
//! or ends before that, it falls back once to polling the history
//! endpoint at a fixed interval. The overall deadline, armed before
//! subscribing, bounds only the stream phase; once polling starts it
//! runs its full attempt budget:
//!
//! ```text
//! Idle -> Subscribing -> Waiting ----------------> Completed | Failed
//!   |          |            |
//!   |          +------------+--> Polling ---------> Completed | Exhausted
//!   +--- (deadline while Subscribing/Waiting) ----> TimedOut
//! ```
//!
//! Polling never falls back to the stream.

use std::time::Duration;

use sketchforge_core::outcome::ErrorKind;
use sketchforge_core::types::SessionId;
use tokio::sync::broadcast;
use tokio::time::{sleep, sleep_until, Instant};

use crate::api::HistoryEntry;
use crate::engine::{EventSource, EventSubscription, RenderEngine};
use crate::events::{progress_percent, RenderEvent};
use crate::messages::JobSignal;

/// Tunable bounds for completion detection.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Deadline for the event-stream phase, from subscription until a
    /// terminal signal. Does not cut the polling fallback short.
    pub deadline: Duration,
    /// Delay between history polls on the fallback path.
    pub poll_interval: Duration,
    /// Maximum number of history polls on the fallback path.
    pub max_poll_attempts: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(120),
            poll_interval: Duration::from_millis(1500),
            max_poll_attempts: 60,
        }
    }
}

/// Which path observed completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionChannel {
    EventStream,
    Polling,
}

/// Terminal state of a watch.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    /// The job finished. `entry` carries the history record when polling
    /// already fetched it.
    Completed {
        via: CompletionChannel,
        entry: Option<HistoryEntry>,
    },
    /// The engine reported failure, or polling ran out of attempts.
    Failed { reason: ErrorKind, detail: String },
    /// The deadline elapsed while waiting on the event stream.
    TimedOut,
}

/// Result of the event-stream phase.
enum StreamPhase {
    Terminal(WatchOutcome),
    Lost(String),
}

/// Result of reading the stream until something relevant happens.
enum StreamSignal {
    Finished,
    Failed(String),
    Lost(String),
}

/// Watches one job at a time against an engine and its event source.
pub struct CompletionWatcher<'a> {
    engine: &'a dyn RenderEngine,
    events: &'a dyn EventSource,
    session: &'a SessionId,
    config: &'a WatchConfig,
    event_tx: Option<&'a broadcast::Sender<RenderEvent>>,
}

impl<'a> CompletionWatcher<'a> {
    pub fn new(
        engine: &'a dyn RenderEngine,
        events: &'a dyn EventSource,
        session: &'a SessionId,
        config: &'a WatchConfig,
    ) -> Self {
        Self {
            engine,
            events,
            session,
            config,
            event_tx: None,
        }
    }

    /// Forward progress and fallback notices to `tx`.
    pub fn with_events(mut self, tx: &'a broadcast::Sender<RenderEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Wait until `prompt_id` reaches a terminal state, the stream-phase
    /// deadline elapses, or the polling fallback runs out of attempts.
    pub async fn watch(&self, prompt_id: &str) -> WatchOutcome {
        let deadline = Instant::now() + self.config.deadline;

        let reason = match self.watch_stream(prompt_id, deadline).await {
            StreamPhase::Terminal(outcome) => return outcome,
            StreamPhase::Lost(reason) => reason,
        };

        tracing::warn!(
            prompt_id = %prompt_id,
            reason = %reason,
            "Event stream lost, falling back to history polling",
        );
        self.emit(RenderEvent::FellBackToPolling {
            prompt_id: prompt_id.to_string(),
            reason,
        });

        self.poll_history(prompt_id).await
    }

    // ---- event-stream path ----

    async fn watch_stream(&self, prompt_id: &str, deadline: Instant) -> StreamPhase {
        let subscribed = tokio::select! {
            result = self.events.subscribe(self.session.as_str()) => result,
            _ = sleep_until(deadline) => {
                return StreamPhase::Terminal(self.timed_out(prompt_id));
            }
        };

        let mut subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(e) => return StreamPhase::Lost(e.to_string()),
        };
        tracing::debug!(prompt_id = %prompt_id, "Waiting for completion on event stream");

        let signal = tokio::select! {
            signal = self.wait_for_signal(subscription.as_mut(), prompt_id) => Some(signal),
            _ = sleep_until(deadline) => None,
        };

        // Every exit from the stream phase releases the socket.
        subscription.close().await;

        match signal {
            None => StreamPhase::Terminal(self.timed_out(prompt_id)),
            Some(StreamSignal::Finished) => {
                tracing::info!(prompt_id = %prompt_id, "Generation finished (event stream)");
                StreamPhase::Terminal(WatchOutcome::Completed {
                    via: CompletionChannel::EventStream,
                    entry: None,
                })
            }
            Some(StreamSignal::Failed(detail)) => {
                tracing::error!(prompt_id = %prompt_id, detail = %detail, "Execution error");
                StreamPhase::Terminal(WatchOutcome::Failed {
                    reason: ErrorKind::ExecutionFailed,
                    detail,
                })
            }
            Some(StreamSignal::Lost(reason)) => StreamPhase::Lost(reason),
        }
    }

    async fn wait_for_signal(
        &self,
        subscription: &mut dyn EventSubscription,
        prompt_id: &str,
    ) -> StreamSignal {
        loop {
            match subscription.next_message().await {
                Some(Ok(message)) => match message.signal_for(prompt_id) {
                    JobSignal::Finished => return StreamSignal::Finished,
                    JobSignal::Failed { detail } => return StreamSignal::Failed(detail),
                    JobSignal::Progress { value, max } => {
                        let percent = progress_percent(value, max);
                        tracing::debug!(prompt_id = %prompt_id, value, max, percent, "Generation progress");
                        self.emit(RenderEvent::Progress {
                            prompt_id: prompt_id.to_string(),
                            value,
                            max,
                            percent,
                        });
                    }
                    JobSignal::Ignored => {}
                },
                Some(Err(e)) => return StreamSignal::Lost(e.to_string()),
                None => {
                    return StreamSignal::Lost(
                        "event stream closed before completion".to_string(),
                    )
                }
            }
        }
    }

    // ---- polling path ----

    async fn poll_history(&self, prompt_id: &str) -> WatchOutcome {
        let attempts = self.config.max_poll_attempts;

        for attempt in 1..=attempts {
            match self.engine.get_history(prompt_id).await {
                Ok(Some(entry)) => {
                    tracing::info!(prompt_id = %prompt_id, attempt, "Generation finished (history poll)");
                    return WatchOutcome::Completed {
                        via: CompletionChannel::Polling,
                        entry: Some(entry),
                    };
                }
                Ok(None) => {
                    tracing::debug!(prompt_id = %prompt_id, attempt, "History not yet recorded");
                }
                Err(e) => {
                    tracing::debug!(prompt_id = %prompt_id, attempt, error = %e, "History poll failed, retrying");
                }
            }
            if attempt < attempts {
                sleep(self.config.poll_interval).await;
            }
        }

        tracing::error!(prompt_id = %prompt_id, attempts, "History polling exhausted");
        WatchOutcome::Failed {
            reason: ErrorKind::Exhausted,
            detail: format!("No history recorded for job {prompt_id} after {attempts} polling attempts"),
        }
    }

    // ---- helpers ----

    fn timed_out(&self, prompt_id: &str) -> WatchOutcome {
        tracing::error!(
            prompt_id = %prompt_id,
            deadline_secs = self.config.deadline.as_secs(),
            "Timed out waiting for render",
        );
        WatchOutcome::TimedOut
    }

    fn emit(&self, event: RenderEvent) {
        if let Some(tx) = self.event_tx {
            // No subscribers is fine; events are informational.
            let _ = tx.send(event);
        }
    }
}
