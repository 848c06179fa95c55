//! Integration tests for the controller used by the front-ends.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bnb4_core::ui::{BufferSink, JobOutcome, Tone};
use bnb4_core::{
    ConverterBuilder, ConverterController, ConverterError, Device, Settings, SettingsStore,
};
use common::*;
use tempfile::TempDir;
use tokio::sync::Notify;

struct Harness {
    _temp: TempDir,
    output: std::path::PathBuf,
    settings_path: std::path::PathBuf,
    controller: Arc<ConverterController>,
    sink: BufferSink,
}

fn harness(script: Script) -> Harness {
    let temp = TempDir::new().unwrap();
    let settings_path = temp.path().join("gui_settings.json");
    let output = temp.path().join("output");
    let sink = BufferSink::new();

    let converter = ConverterBuilder::new(temp.path().join("data"))
        .settings_path(&settings_path)
        .toolkit_factory(FakeFactory::new(script))
        .sink(Arc::new(sink.clone()))
        .hard_stop_grace(Duration::from_secs(60))
        .build()
        .unwrap();

    converter
        .controller
        .update_form(|form, _| {
            form.output_path = output.to_string_lossy().to_string();
            Ok(())
        })
        .unwrap();

    Harness {
        _temp: temp,
        output,
        settings_path,
        controller: converter.controller,
        sink,
    }
}

async fn wait_until_idle(controller: &ConverterController) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        controller.tick();
        if !controller.view().is_running() {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "job did not finish");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_empty_custom_source_is_a_user_error() {
    let h = harness(Script::default());
    assert!(h.controller.select_model("  Custom model"));

    let result = h.controller.start();

    assert!(matches!(result, Err(ConverterError::MissingSource)));
    let view = h.controller.view();
    assert!(view.can_start);
    assert_eq!(view.status.tone, Tone::Idle);
    assert!(!h.controller.is_running());
}

#[tokio::test]
async fn test_full_run_updates_view_and_sink() {
    let h = harness(Script::default());
    assert!(h.controller.select_model("  Qwen2.5-7B-Instruct"));

    h.controller.start().unwrap();
    assert!(!h.controller.view().can_start);
    wait_until_idle(&h.controller).await;

    let view = h.controller.view();
    assert_eq!(view.progress, 100);
    assert_eq!(view.outcome, Some(JobOutcome::Completed));
    assert_eq!(view.status.tone, Tone::Success);
    assert!(view.can_start);

    let saved = h.output.join("Qwen2.5-7B-Instruct-bnb4");
    assert!(saved.join("tokenizer.json").exists());
    assert!(h
        .sink
        .lines()
        .contains(&format!("Model saved: {}", saved.display())));
    assert!(view.log.iter().all(|line| line.starts_with('[')));
}

#[tokio::test]
async fn test_cancel_marks_outcome_cancelled() {
    let gate = Arc::new(Notify::new());
    let h = harness(Script {
        tokenizer_gate: Some(gate.clone()),
        ..Script::default()
    });

    h.controller.start().unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while h.controller.view().progress < 40 {
        h.controller.tick();
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(h.controller.cancel());
    assert_eq!(h.controller.view().status.text, "Stopping...");
    gate.notify_one();
    wait_until_idle(&h.controller).await;

    let view = h.controller.view();
    assert_eq!(view.outcome, Some(JobOutcome::Cancelled));
    assert!(h
        .sink
        .lines()
        .contains(&"Operation cancelled by user".to_string()));
    assert!(!h.controller.cancel());
}

#[tokio::test]
async fn test_failed_run_is_not_shown_as_success() {
    let h = harness(Script {
        load_error: Some(bnb4_core::toolkit::ToolkitErrorKind::NotFound),
        ..Script::default()
    });

    h.controller.start().unwrap();
    wait_until_idle(&h.controller).await;

    let view = h.controller.view();
    assert_eq!(view.outcome, Some(JobOutcome::Failed));
    assert_eq!(view.status.tone, Tone::Error);
    assert!(view.progress < 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_immediate_failure_with_running_poller_leaves_view_idle() {
    let h = harness(Script {
        spawn_fails: true,
        ..Script::default()
    });
    let poller = h.controller.spawn_poller(Duration::from_micros(50));

    for _ in 0..20 {
        h.controller.start().unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while h.controller.is_running() || h.controller.view().is_running() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "view stuck: supervisor active={}, can_start={}",
                h.controller.is_running(),
                h.controller.view().can_start
            );
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let view = h.controller.view();
        assert!(view.can_start);
        assert_eq!(view.outcome, Some(JobOutcome::Failed));
    }
    assert!(h
        .sink
        .lines()
        .iter()
        .any(|line| line.starts_with("Error: Python environment not ready")));
    poller.abort();
}

#[tokio::test]
async fn test_poller_relays_messages() {
    let h = harness(Script::default());
    let poller = h.controller.spawn_poller(Duration::from_millis(10));

    h.controller.start().unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while h.controller.view().outcome.is_none() {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.controller.view().outcome, Some(JobOutcome::Completed));
    poller.abort();
}

#[tokio::test]
async fn test_settings_are_loaded_and_saved() {
    let temp = TempDir::new().unwrap();
    let settings_path = temp.path().join("gui_settings.json");
    SettingsStore::new(&settings_path)
        .save(&Settings {
            model: "  Mistral-7B-Instruct-v0.3".to_string(),
            context_length: 16384,
            device: Device::Auto,
            ..Settings::default()
        })
        .unwrap();

    let converter = ConverterBuilder::new(temp.path().join("data"))
        .settings_path(&settings_path)
        .toolkit_factory(FakeFactory::new(Script::default()))
        .build()
        .unwrap();
    let controller = converter.controller;

    let form = controller.form();
    assert_eq!(form.choice, "  Mistral-7B-Instruct-v0.3");
    assert_eq!(form.source, "mistralai/Mistral-7B-Instruct-v0.3");
    assert_eq!(form.context_length, 16384);
    assert_eq!(form.device, Device::Auto);

    controller
        .update_form(|form, _| form.set_context_length(65536))
        .unwrap();
    controller.shutdown().await;

    let saved = SettingsStore::new(&settings_path).load();
    assert_eq!(saved.context_length, 65536);
    assert_eq!(saved.model, "  Mistral-7B-Instruct-v0.3");
}

#[tokio::test]
async fn test_shutdown_cancels_running_job_and_saves() {
    let h = harness(Script {
        hang_in_load: true,
        ..Script::default()
    });

    h.controller.start().unwrap();
    h.controller.shutdown().await;

    assert!(!h.controller.is_running());
    assert!(h.controller.view().can_start);
    assert!(h.settings_path.exists());
}
