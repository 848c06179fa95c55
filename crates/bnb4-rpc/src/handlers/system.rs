//! System, environment and settings handlers.

use crate::server::AppState;
use serde_json::{json, Value};

pub async fn get_system_info(state: &AppState, _params: &Value) -> bnb4_core::Result<Value> {
    let info = state.controller.system_info().await;
    Ok(json!({
        "success": true,
        "summary": info.summary(),
        "info": info
    }))
}

pub async fn get_environment_status(
    state: &AppState,
    _params: &Value,
) -> bnb4_core::Result<Value> {
    Ok(json!({
        "success": true,
        "status": state.environment.status()
    }))
}

/// Create the Python environment if needed. Can take minutes on first run.
pub async fn setup_environment(state: &AppState, _params: &Value) -> bnb4_core::Result<Value> {
    state.environment.ensure().await?;
    Ok(json!({
        "success": true,
        "status": state.environment.status()
    }))
}

pub async fn save_settings(state: &AppState, _params: &Value) -> bnb4_core::Result<Value> {
    state.controller.save_settings()?;
    Ok(json!({
        "success": true,
        "path": state.controller.settings_store().path()
    }))
}

/// Re-read the settings file into the form.
pub async fn load_settings(state: &AppState, _params: &Value) -> bnb4_core::Result<Value> {
    state.controller.load_settings();
    Ok(json!({
        "success": true,
        "form": state.controller.form()
    }))
}
