//! Line-delimited JSON protocol spoken with account workers.
//!
//! ```text
//! → {"id": 7, "operation": "get_segments", "parameters": {...}}\n
//! ← {"id": 7, "result": {"data": [...], "links": {"next": null}}}\n
//! ← {"id": 7, "error": {"code": 429, "message": "rate limited"}}\n
//! ```
//!
//! Every connection starts with an `initialize` exchange; the worker must
//! answer with the same `protocolVersion`.

use crate::error::{IntegrationError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const HANDSHAKE_OPERATION: &str = "initialize";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub operation: String,
    #[serde(default)]
    pub parameters: Value,
}

impl Request {
    pub fn handshake(id: u64) -> Self {
        Self {
            id,
            operation: HANDSHAKE_OPERATION.to_string(),
            parameters: json!({
                "protocolVersion": PROTOCOL_VERSION,
                "client": {"name": "calendar-pipeline", "version": env!("CARGO_PKG_VERSION")},
            }),
        }
    }

    /// Encode as one protocol line, newline included.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl Response {
    pub fn from_line(line: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }

    /// Turn a response into the call result.
    pub fn into_result(self, operation: &str) -> Result<Value> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(IntegrationError::Remote {
                operation: operation.to_string(),
                code: error.code,
                message: error.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(IntegrationError::protocol(
                operation,
                "response carries neither result nor error",
            )),
        }
    }
}

/// One page of records from a fetch operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    pub records: Vec<Value>,
    pub next: Option<String>,
}

impl Page {
    /// Accepts `{"data": [...], "links": {"next": ...}}` or a bare array.
    pub fn from_result(operation: &str, result: Value) -> Result<Self> {
        match result {
            Value::Array(records) => Ok(Self { records, next: None }),
            Value::Object(mut object) => {
                let records = match object.remove("data") {
                    Some(Value::Array(records)) => records,
                    Some(Value::Null) | None => Vec::new(),
                    Some(_) => {
                        return Err(IntegrationError::protocol(operation, "'data' is not an array"))
                    }
                };
                let next = object
                    .get("links")
                    .and_then(|links| links.get("next"))
                    .and_then(Value::as_str)
                    .filter(|next| !next.is_empty())
                    .map(str::to_string);
                Ok(Self { records, next })
            }
            other => Err(IntegrationError::protocol(
                operation,
                format!("unexpected result payload: {}", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line() {
        let request = Request {
            id: 3,
            operation: "get_flows".into(),
            parameters: json!({"account_id": "a"}),
        };
        let line = request.to_line().unwrap();
        assert!(line.ends_with('\n'));
        let decoded: Request = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_response_error_maps_to_remote() {
        let response =
            Response::from_line(r#"{"id": 1, "error": {"code": 429, "message": "slow down"}}"#).unwrap();
        match response.into_result("get_metrics") {
            Err(IntegrationError::Remote { code, message, .. }) => {
                assert_eq!(code, Some(429));
                assert_eq!(message, "slow down");
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[test]
    fn test_response_without_result_is_protocol_error() {
        let response = Response::from_line(r#"{"id": 1}"#).unwrap();
        assert!(matches!(
            response.into_result("get_lists"),
            Err(IntegrationError::RpcProtocol { .. })
        ));
    }

    #[test]
    fn test_page_shapes() {
        let page = Page::from_result(
            "get_catalog_items",
            json!({"data": [{"id": 1}], "links": {"next": "cursor-2"}}),
        )
        .unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.next.as_deref(), Some("cursor-2"));

        let page = Page::from_result("get_lists", json!([{"id": 1}, {"id": 2}])).unwrap();
        assert_eq!(page.records.len(), 2);
        assert!(page.next.is_none());

        let page = Page::from_result("get_lists", json!({"data": [], "links": {"next": null}})).unwrap();
        assert!(page.records.is_empty());

        assert!(Page::from_result("get_lists", json!("nope")).is_err());
        assert!(Page::from_result("get_lists", json!({"data": 5})).is_err());
    }
}
