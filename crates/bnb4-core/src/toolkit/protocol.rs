//! JSON-lines protocol spoken with the helper process.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{ToolkitError, ToolkitErrorKind, ToolkitResult};

/// Encode one request line, newline included.
pub(crate) fn request_line(id: u64, op: &str, args: Value) -> ToolkitResult<String> {
    let mut request = match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(ToolkitError::new(
                op,
                ToolkitErrorKind::Failed,
                format!("request arguments must be an object, got {other}"),
            ))
        }
    };
    request.insert("id".to_string(), Value::from(id));
    request.insert("op".to_string(), Value::from(op));

    let mut line = serde_json::to_string(&Value::Object(request))
        .map_err(|e| ToolkitError::new(op, ToolkitErrorKind::Failed, e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// One response line from the helper.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HelperResponse {
    #[serde(default)]
    pub id: Option<u64>,
    pub ok: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<HelperError>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HelperError {
    #[serde(default = "default_kind")]
    pub kind: ToolkitErrorKind,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub traceback: Option<String>,
}

fn default_kind() -> ToolkitErrorKind {
    ToolkitErrorKind::Failed
}

impl HelperResponse {
    /// Parse a stdout line. Anything that is not a response yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }

    pub fn into_result(self, op: &str) -> ToolkitResult<Value> {
        if self.ok {
            return Ok(self.result);
        }
        let error = self.error.unwrap_or(HelperError {
            kind: ToolkitErrorKind::Failed,
            message: "helper reported failure without details".to_string(),
            traceback: None,
        });
        Err(ToolkitError {
            operation: op.to_string(),
            kind: error.kind,
            message: error.message,
            traceback: error.traceback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_line() {
        let line = request_line(3, "load_tokenizer", json!({"source": "org/m", "max_length": 4096})).unwrap();
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["op"], "load_tokenizer");
        assert_eq!(value["max_length"], 4096);

        assert!(request_line(1, "shutdown", Value::Null).is_ok());
        assert!(request_line(1, "save", json!([1, 2])).is_err());
    }

    #[test]
    fn test_parse_ignores_noise() {
        assert!(HelperResponse::parse("Loading checkpoint shards: 50%").is_none());
        assert!(HelperResponse::parse("{not json").is_none());
        let response = HelperResponse::parse(r#"{"id":1,"ok":true,"result":null}"#).unwrap();
        assert_eq!(response.id, Some(1));
        assert!(response.into_result("shutdown").is_ok());
    }

    #[test]
    fn test_error_response() {
        let response = HelperResponse::parse(
            r#"{"id":2,"ok":false,"error":{"kind":"not_found","message":"no preprocessor_config.json","traceback":"tb"}}"#,
        )
        .unwrap();
        let err = response.into_result("load_image_processor").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.operation, "load_image_processor");
        assert_eq!(err.traceback.as_deref(), Some("tb"));
    }

    #[test]
    fn test_error_without_details() {
        let response = HelperResponse::parse(r#"{"id":2,"ok":false}"#).unwrap();
        let err = response.into_result("save").unwrap_err();
        assert_eq!(err.kind, ToolkitErrorKind::Failed);
    }
}
