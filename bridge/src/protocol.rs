//! JSON-RPC 2.0 message types for the `tools/call` exchange.

use serde::{Deserialize, Serialize};

pub const JSONRPC_VERSION: &str = "2.0";

pub const TOOLS_CALL: &str = "tools/call";

#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: ToolCallParams<'a>,
}

#[derive(Debug, Serialize)]
pub struct ToolCallParams<'a> {
    pub name: &'a str,
    pub arguments: &'a serde_json::Value,
}

/// Build the single `tools/call` request an invocation sends.
#[must_use]
pub fn tool_call<'a>(id: u64, name: &'a str, arguments: &'a serde_json::Value) -> Request<'a> {
    Request {
        jsonrpc: JSONRPC_VERSION,
        id,
        method: TOOLS_CALL,
        params: ToolCallParams { name, arguments },
    }
}

/// Error object carried by a JSON-RPC error response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Payload of a correlated response.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Result(serde_json::Value),
    Error(RpcError),
}

/// Check whether one output line is the response to request `id`.
///
/// Anything else (non-JSON text, notifications, requests, responses for
/// other ids, error objects without a usable shape) yields `None`.
#[must_use]
pub fn match_reply(line: &[u8], id: u64) -> Option<Reply> {
    let frame: serde_json::Value = serde_json::from_slice(line).ok()?;
    let obj = frame.as_object()?;

    if obj.contains_key("method") || obj.get("id")?.as_u64()? != id {
        return None;
    }

    match obj.get("error") {
        Some(err) if !err.is_null() => {
            let err = serde_json::from_value::<RpcError>(err.clone()).ok()?;
            Some(Reply::Error(err))
        }
        _ => obj.get("result").cloned().map(Reply::Result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let args = serde_json::json!({"patientId": "p-1"});
        let req = tool_call(3, "generate_prescription", &args);
        let wire = serde_json::to_string(&req).unwrap();
        assert_eq!(
            wire,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"generate_prescription","arguments":{"patientId":"p-1"}}}"#
        );
    }

    #[test]
    fn test_matching_result() {
        let line = br#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#;
        assert_eq!(
            match_reply(line, 1),
            Some(Reply::Result(serde_json::json!({"ok": true})))
        );
    }

    #[test]
    fn test_null_result_is_a_reply() {
        let line = br#"{"jsonrpc":"2.0","id":4,"result":null}"#;
        assert_eq!(match_reply(line, 4), Some(Reply::Result(serde_json::Value::Null)));
    }

    #[test]
    fn test_matching_error() {
        let line = br#"{"jsonrpc":"2.0","id":1,"error":{"code":400,"message":"bad input"}}"#;
        assert_eq!(
            match_reply(line, 1),
            Some(Reply::Error(RpcError {
                code: 400,
                message: "bad input".into(),
                data: None,
            }))
        );
    }

    #[test]
    fn test_error_wins_over_result() {
        let line = br#"{"id":2,"result":1,"error":{"code":-1,"message":"x","data":[1]}}"#;
        let Some(Reply::Error(err)) = match_reply(line, 2) else {
            panic!("expected error reply");
        };
        assert_eq!(err.data, Some(serde_json::json!([1])));
    }

    #[test]
    fn test_null_error_falls_back_to_result() {
        let line = br#"{"id":2,"result":"done","error":null}"#;
        assert_eq!(match_reply(line, 2), Some(Reply::Result("done".into())));
    }

    #[test]
    fn test_other_id_is_ignored() {
        let line = br#"{"jsonrpc":"2.0","id":2,"result":{}}"#;
        assert_eq!(match_reply(line, 1), None);
    }

    #[test]
    fn test_string_id_is_ignored() {
        let line = br#"{"jsonrpc":"2.0","id":"1","result":{}}"#;
        assert_eq!(match_reply(line, 1), None);
    }

    #[test]
    fn test_garbage_and_non_objects_are_ignored() {
        assert_eq!(match_reply(b"Server listening on stdio", 1), None);
        assert_eq!(match_reply(b"", 1), None);
        assert_eq!(match_reply(b"[1,2,3]", 1), None);
        assert_eq!(match_reply(b"42", 1), None);
    }

    #[test]
    fn test_requests_and_notifications_are_ignored() {
        let req = br#"{"jsonrpc":"2.0","id":1,"method":"sampling/create","params":{}}"#;
        let note = br#"{"jsonrpc":"2.0","method":"notifications/progress"}"#;
        assert_eq!(match_reply(req, 1), None);
        assert_eq!(match_reply(note, 1), None);
    }

    #[test]
    fn test_response_without_payload_is_ignored() {
        assert_eq!(match_reply(br#"{"jsonrpc":"2.0","id":1}"#, 1), None);
    }

    #[test]
    fn test_malformed_error_object_is_ignored() {
        let line = br#"{"jsonrpc":"2.0","id":1,"error":"boom"}"#;
        assert_eq!(match_reply(line, 1), None);
    }
}
