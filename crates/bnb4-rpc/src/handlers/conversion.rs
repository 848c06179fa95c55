//! Conversion job handlers.

use crate::server::AppState;
use serde_json::{json, Value};
use tracing::info;

/// Start a job from the current form.
pub async fn start_conversion(state: &AppState, _params: &Value) -> bnb4_core::Result<Value> {
    let job_id = state.controller.start()?;
    info!("Started conversion {}", job_id);
    Ok(json!({
        "success": true,
        "job_id": job_id
    }))
}

pub async fn cancel_conversion(state: &AppState, _params: &Value) -> bnb4_core::Result<Value> {
    let cancelled = state.controller.cancel();
    Ok(json!({
        "success": true,
        "cancelled": cancelled
    }))
}

/// Drain pending worker messages and report the display state.
pub async fn get_job_status(state: &AppState, _params: &Value) -> bnb4_core::Result<Value> {
    state.controller.tick();
    Ok(json!({
        "success": true,
        "running": state.controller.is_running(),
        "job_id": state.controller.active_job_id(),
        "view": state.controller.view()
    }))
}

pub async fn clear_log(state: &AppState, _params: &Value) -> bnb4_core::Result<Value> {
    state.controller.clear_log();
    Ok(json!({"success": true}))
}
