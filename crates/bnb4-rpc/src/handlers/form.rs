//! Catalog and form handlers.

use super::{get_bool_param, get_str_param, get_u64_param, require_str_param};
use crate::server::AppState;
use bnb4_core::{ConverterError, Device, QuantType};
use serde_json::{json, Value};

pub async fn get_catalog(state: &AppState, _params: &Value) -> bnb4_core::Result<Value> {
    let catalog = state.controller.catalog();
    Ok(json!({
        "success": true,
        "choices": catalog.choice_labels(),
        "groups": catalog.groups(),
        "defaultChoice": catalog.default_choice(),
    }))
}

pub async fn get_form(state: &AppState, _params: &Value) -> bnb4_core::Result<Value> {
    Ok(json!({
        "success": true,
        "form": state.controller.form()
    }))
}

/// Select a picker label. Group headers leave the form unchanged.
pub async fn select_model(state: &AppState, params: &Value) -> bnb4_core::Result<Value> {
    let label = require_str_param(params, "model", "model")?;
    let changed = state.controller.select_model(&label);
    Ok(json!({
        "success": true,
        "changed": changed,
        "form": state.controller.form()
    }))
}

/// Apply any subset of the form fields. Values are validated before the form
/// is touched, so a rejected request changes nothing.
pub async fn update_form(state: &AppState, params: &Value) -> bnb4_core::Result<Value> {
    let model = get_str_param(params, "model", "model").map(String::from);
    let source = get_str_param(params, "source", "source").map(String::from);
    let output_path = get_str_param(params, "output_path", "outputPath").map(String::from);
    let safe_serialization = get_bool_param(params, "safe_serialization", "safeSerialization");

    let context_length = get_u64_param(params, "context_length", "contextLength")
        .map(|value| {
            u32::try_from(value).map_err(|_| ConverterError::Validation {
                field: "context_length".to_string(),
                message: format!("{} is not a supported context length", value),
            })
        })
        .transpose()?;

    let device = get_str_param(params, "device", "device")
        .map(|value| {
            Device::parse(value).ok_or_else(|| ConverterError::InvalidParams {
                message: format!("Invalid device: {}", value),
            })
        })
        .transpose()?;

    let quant_type = get_str_param(params, "quant_type", "quantType")
        .map(|value| {
            QuantType::parse(value).ok_or_else(|| ConverterError::InvalidParams {
                message: format!("Invalid quantization type: {}", value),
            })
        })
        .transpose()?;

    let form = state.controller.update_form(|form, catalog| {
        let mut next = form.clone();
        if let Some(label) = &model {
            if !next.select_model(catalog, label) {
                return Err(ConverterError::Validation {
                    field: "model".to_string(),
                    message: format!("{:?} is not a selectable model", label),
                });
            }
        }
        if let Some(source) = &source {
            next.set_source(source)?;
        }
        if let Some(context_length) = context_length {
            next.set_context_length(context_length)?;
        }
        if let Some(output_path) = output_path {
            next.output_path = output_path;
        }
        if let Some(device) = device {
            next.device = device;
        }
        if let Some(safe) = safe_serialization {
            next.safe_serialization = safe;
        }
        if let Some(quant_type) = quant_type {
            next.quant_type = quant_type;
        }
        *form = next;
        Ok(())
    })?;

    Ok(json!({
        "success": true,
        "form": form
    }))
}
