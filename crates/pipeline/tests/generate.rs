//! End-to-end tests for `RenderPipeline` against in-memory fakes.
//!
//! Time is paused so deadline and polling behaviour runs instantly.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::*;
use sketchforge_comfyui::events::RenderEvent;
use sketchforge_comfyui::upload::upload_filename;
use sketchforge_core::outcome::ErrorKind;
use sketchforge_pipeline::RenderError;

// ---------------------------------------------------------------------------
// Test: happy path over the event stream
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn red_chair_completes_over_event_stream() {
    let engine = Arc::new(
        FakeEngine::new()
            .storing_as("sketch_171.png")
            .assigning(&["abc123"])
            .with_history(
                "abc123",
                history_with(vec![output_image("out_1.png"), output_image("out_2.png")]),
            ),
    );
    let events = Arc::new(ScriptedEvents::new(vec![progress(5, 25), executed("abc123")]));
    let pipeline = pipeline(&engine, &events);

    let result = pipeline
        .generate(&request("a red chair").with_num_images(2))
        .await;

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(
        result.images,
        vec![fake_url("out_1.png"), fake_url("out_2.png")]
    );
    assert!(result.error.is_none());

    let submissions = engine.submissions.lock().unwrap();
    assert_eq!(submissions.len(), 1);
    let (workflow, client_id) = &submissions[0];
    assert_eq!(client_id, SESSION);
    assert_eq!(workflow["45"]["inputs"]["image"], "sketch_171.png");
    assert_eq!(workflow["51"]["inputs"]["strength"], 0.65);
    assert_eq!(workflow["33"]["inputs"]["batch_size"], 2);
    assert_eq!(workflow["6"]["inputs"]["text"], "a red chair");

    assert_eq!(events.subscribed_ids.lock().unwrap().as_slice(), [SESSION]);
    assert_eq!(events.closed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn style_label_reaches_conditioning_text() {
    let engine = Arc::new(
        FakeEngine::new()
            .assigning(&["s1"])
            .with_history("s1", history_with(vec![output_image("a.png")])),
    );
    let events = Arc::new(ScriptedEvents::new(vec![executed("s1")]));
    let pipeline = pipeline(&engine, &events);

    let result = pipeline
        .generate(&request("a lighthouse").with_style("watercolor"))
        .await;

    assert!(result.success);
    let submissions = engine.submissions.lock().unwrap();
    assert_eq!(
        submissions[0].0["6"]["inputs"]["text"],
        "a lighthouse, watercolor style"
    );
}

// ---------------------------------------------------------------------------
// Test: invalid requests touch nothing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn empty_prompt_is_rejected_before_any_io() {
    let engine = Arc::new(FakeEngine::new());
    let events = Arc::new(ScriptedEvents::new(vec![]));
    let pipeline = pipeline(&engine, &events);

    let result = pipeline.generate(&request("   ")).await;

    assert!(!result.success);
    assert!(result.images.is_empty());
    assert!(result.error.unwrap().starts_with("InvalidRequest"));
    assert_eq!(engine.upload_count(), 0);
    assert_eq!(engine.submission_count(), 0);
    assert_eq!(events.subscription_count(), 0);
}

// ---------------------------------------------------------------------------
// Test: fallback to polling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn stream_error_falls_back_to_polling() {
    let engine = Arc::new(
        FakeEngine::new()
            .assigning(&["xyz"])
            .empty_for(10)
            .with_history("xyz", history_with(vec![output_image("xyz_1.png")])),
    );
    let events = Arc::new(ScriptedEvents::new(vec![progress(3, 25), Step::Error]));
    let pipeline = pipeline(&engine, &events);
    let mut rx = pipeline.subscribe();

    let result = pipeline.generate(&request("a castle")).await;

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(result.images, vec![fake_url("xyz_1.png")]);
    // 10 empty polls, then the successful poll's record is resolved directly.
    assert_eq!(engine.history_call_count(), 11);
    assert_eq!(events.subscription_count(), 1);
    assert_eq!(events.closed_count(), 1);

    assert_matches!(rx.try_recv().unwrap(), RenderEvent::Submitted { prompt_id } if prompt_id == "xyz");
    assert_matches!(rx.try_recv().unwrap(), RenderEvent::Progress { value: 3, max: 25, .. });
    assert_matches!(rx.try_recv().unwrap(), RenderEvent::FellBackToPolling { .. });
    assert_matches!(rx.try_recv().unwrap(), RenderEvent::Completed { image_count: 1, .. });
}

#[tokio::test(start_paused = true)]
async fn polled_record_survives_later_history_outage() {
    let engine = Arc::new(
        FakeEngine::new()
            .assigning(&["flaky"])
            .empty_for(3)
            .with_history("flaky", history_with(vec![output_image("flaky_1.png")]))
            .history_fails_from(4),
    );
    let events = Arc::new(ScriptedEvents::new(vec![Step::Error]));
    let pipeline = pipeline(&engine, &events);

    let result = pipeline.generate(&request("a windmill")).await;

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(result.images, vec![fake_url("flaky_1.png")]);
    assert_eq!(engine.history_call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn clean_stream_close_also_falls_back() {
    let engine = Arc::new(
        FakeEngine::new()
            .assigning(&["closed"])
            .with_history("closed", history_with(vec![output_image("c.png")])),
    );
    let events = Arc::new(ScriptedEvents::new(vec![Step::End]));
    let pipeline = pipeline(&engine, &events);

    let result = pipeline.generate(&request("a bridge")).await;

    assert!(result.success);
    assert_eq!(result.images, vec![fake_url("c.png")]);
}

// ---------------------------------------------------------------------------
// Test: terminal failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn silent_stream_times_out() {
    let engine = Arc::new(FakeEngine::new().assigning(&["slow"]));
    let events = Arc::new(ScriptedEvents::new(vec![progress(1, 25)]));
    let pipeline = pipeline(&engine, &events);

    let result = pipeline.generate(&request("a slow render")).await;

    assert!(!result.success);
    assert!(result.images.is_empty());
    assert!(result.error.unwrap().contains("Timeout"));
    assert_eq!(engine.history_call_count(), 0);
    assert_eq!(events.closed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_output_reports_no_images() {
    let engine = Arc::new(
        FakeEngine::new()
            .assigning(&["blank"])
            .with_history("blank", history_with(vec![])),
    );
    let events = Arc::new(ScriptedEvents::new(vec![executed("blank")]));
    let pipeline = pipeline(&engine, &events);

    let result = pipeline.generate(&request("nothing at all")).await;

    assert!(!result.success);
    assert!(result.images.is_empty());
    assert!(result.error.unwrap().contains("No images"));
}

#[tokio::test(start_paused = true)]
async fn execution_error_is_reported() {
    let engine = Arc::new(FakeEngine::new().assigning(&["boom"]));
    let events = Arc::new(ScriptedEvents::new(vec![msg(
        r#"{"type":"execution_error","data":{"prompt_id":"boom","node_id":"3","exception_message":"CUDA out of memory","exception_type":"RuntimeError"}}"#,
    )]));
    let pipeline = pipeline(&engine, &events);

    let err = pipeline.render(&request("a huge render")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
    assert!(err.to_string().contains("CUDA out of memory"));
}

#[tokio::test(start_paused = true)]
async fn upload_failure_stops_the_job() {
    let engine = Arc::new(FakeEngine::new().failing_upload());
    let events = Arc::new(ScriptedEvents::new(vec![]));
    let pipeline = pipeline(&engine, &events);

    let err = pipeline.render(&request("a tree")).await.unwrap_err();

    assert_matches!(err, RenderError::Upload(_));
    assert_eq!(err.kind(), ErrorKind::TransportError);
    assert_eq!(engine.submission_count(), 0);
    assert_eq!(events.subscription_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn submit_failure_stops_the_job() {
    let engine = Arc::new(FakeEngine::new().failing_submit());
    let events = Arc::new(ScriptedEvents::new(vec![]));
    let pipeline = pipeline(&engine, &events);
    let mut rx = pipeline.subscribe();

    let result = pipeline.generate(&request("a tree")).await;

    assert!(!result.success);
    assert!(result.error.unwrap().starts_with("TransportError"));
    assert_eq!(engine.upload_count(), 1);
    assert_eq!(events.subscription_count(), 0);
    assert_eq!(engine.history_call_count(), 0);
    assert_matches!(rx.try_recv().unwrap(), RenderEvent::Failed { prompt_id: None, .. });
}

// ---------------------------------------------------------------------------
// Test: upload naming
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn identical_canvases_upload_under_one_name() {
    let engine = Arc::new(
        FakeEngine::new()
            .assigning(&["one", "two"])
            .with_history("one", history_with(vec![output_image("1.png")]))
            .with_history("two", history_with(vec![output_image("2.png")])),
    );
    let events = Arc::new(ScriptedEvents::new(vec![executed("one"), executed("two")]));
    let pipeline = pipeline(&engine, &events);

    pipeline.generate(&request("first")).await;
    pipeline.generate(&request("second")).await;

    let expected = upload_filename(&canvas().encode_png().unwrap());
    let uploads = engine.uploads.lock().unwrap();
    assert_eq!(uploads.as_slice(), [expected.clone(), expected]);
}

// ---------------------------------------------------------------------------
// Test: concurrent jobs
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn concurrent_jobs_only_see_their_own_completion() {
    let engine = Arc::new(
        FakeEngine::new()
            .assigning(&["first", "second"])
            .with_history("first", history_with(vec![output_image("first.png")]))
            .with_history("second", history_with(vec![output_image("second.png")])),
    );
    // Both subscriptions see both completions; each job must pick its own.
    let events = Arc::new(ScriptedEvents::new(vec![
        executed("second"),
        executed("first"),
    ]));
    let pipeline = pipeline(&engine, &events);

    let (job_a, job_b) = (request("job a"), request("job b"));
    let (a, b) = tokio::join!(pipeline.generate(&job_a), pipeline.generate(&job_b));

    assert!(a.success && b.success);
    let mut urls = vec![a.images[0].clone(), b.images[0].clone()];
    urls.sort();
    assert_eq!(urls, vec![fake_url("first.png"), fake_url("second.png")]);
    assert_eq!(events.subscription_count(), 2);
    assert_eq!(events.closed_count(), 2);
}

// ---------------------------------------------------------------------------
// Test: connection check
// ---------------------------------------------------------------------------

#[tokio::test]
async fn check_connection_reflects_engine_health() {
    let events = Arc::new(ScriptedEvents::new(vec![]));

    let healthy = Arc::new(FakeEngine::new());
    assert!(pipeline(&healthy, &events).check_connection().await);

    let down = Arc::new(FakeEngine::new().unhealthy());
    assert!(!pipeline(&down, &events).check_connection().await);
}

// ---------------------------------------------------------------------------
// Test: downloads
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn render_output_images_can_be_downloaded() {
    let engine = Arc::new(
        FakeEngine::new()
            .assigning(&["dl"])
            .with_history("dl", history_with(vec![output_image("dl_1.png")])),
    );
    let events = Arc::new(ScriptedEvents::new(vec![executed("dl")]));
    let pipeline = pipeline(&engine, &events);

    let output = pipeline.render(&request("a boat")).await.unwrap();
    assert_eq!(output.prompt_id, "dl");

    let bytes = pipeline.download(&output.images[0]).await.unwrap();
    assert_eq!(bytes, b"dl_1.png");
}
