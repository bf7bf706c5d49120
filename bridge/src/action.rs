//! Inbound action boundary.
//!
//! The route layer receives `{ "action": "<tool>", ...params }`, hands it to
//! [`ToolBridge::dispatch`], and renders the outcome with
//! [`ActionResponse`]. Authentication and HTTP concerns stay with the
//! caller; this module only reshapes parameters and maps failures.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ToolBridge;
use crate::error::BridgeError;

pub const DOCTOR_ID_KEY: &str = "doctorId";
pub const DOCTOR_NAME_KEY: &str = "doctorName";

const FALLBACK_DOCTOR_ID: &str = "unknown";
const FALLBACK_DOCTOR_NAME: &str = "Unknown Doctor";

/// Request body as posted by the UI.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// Authenticated identity of whoever made the request, if known.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub doctor_id: Option<String>,
    pub doctor_name: Option<String>,
}

/// A tool name plus fully reshaped arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub tool: String,
    pub arguments: Value,
}

impl ActionRequest {
    /// Reshape into a tool call, defaulting missing doctor identity fields.
    ///
    /// Identifiers the request already carries are relayed as-is, even when
    /// they disagree with `caller`.
    pub fn into_tool_call(self, caller: Option<&Caller>) -> Result<ToolCall, BridgeError> {
        let tool = self.action.trim();
        if tool.is_empty() {
            return Err(BridgeError::Invocation("action must not be empty".into()));
        }
        let tool = tool.to_string();

        let mut params = self.params;
        let caller_id = caller.and_then(|c| c.doctor_id.as_deref());
        let caller_name = caller.and_then(|c| c.doctor_name.as_deref());

        if let (Some(supplied), Some(authenticated)) =
            (params.get(DOCTOR_ID_KEY).and_then(Value::as_str), caller_id)
            && supplied != authenticated
        {
            tracing::debug!(
                action = %tool,
                supplied,
                authenticated,
                "Relaying doctorId that differs from the authenticated caller"
            );
        }

        fill_missing(
            &mut params,
            DOCTOR_ID_KEY,
            caller_id.unwrap_or(FALLBACK_DOCTOR_ID),
        );
        fill_missing(
            &mut params,
            DOCTOR_NAME_KEY,
            caller_name.unwrap_or(FALLBACK_DOCTOR_NAME),
        );

        Ok(ToolCall {
            tool,
            arguments: Value::Object(params),
        })
    }
}

fn fill_missing(params: &mut Map<String, Value>, key: &str, value: &str) {
    let missing = match params.get(key) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    };
    if missing {
        params.insert(key.to_string(), Value::String(value.to_string()));
    }
}

impl ToolBridge {
    /// Reshape an inbound action and invoke it with the default timeout.
    pub async fn dispatch(
        &self,
        request: ActionRequest,
        caller: Option<&Caller>,
    ) -> Result<Value, BridgeError> {
        let call = request.into_tool_call(caller)?;
        self.invoke(&call.tool, &call.arguments).await
    }
}

/// Body the route layer sends back, plus the status to send it with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResponse {
    #[serde(skip)]
    pub status: u16,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    /// Raw helper diagnostics (stderr or JSON-RPC error data).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl ActionResponse {
    #[must_use]
    pub fn from_result(result: Result<Value, BridgeError>) -> Self {
        match result {
            Ok(data) => Self {
                status: 200,
                success: true,
                data: Some(data),
                message: None,
                kind: None,
                detail: None,
            },
            Err(err) => Self::from_error(&err),
        }
    }

    #[must_use]
    pub fn from_error(err: &BridgeError) -> Self {
        let detail = match err {
            BridgeError::Tool { data, .. } => data.clone(),
            _ => err.stderr().map(|s| Value::String(s.trim().to_string())),
        };
        Self {
            status: err.http_status(),
            success: false,
            data: None,
            message: Some(err.to_string()),
            kind: Some(err.kind().label()),
            detail,
        }
    }
}
