//! Helper-process bridge for JSON-RPC tool calls.
//!
//! Each call spawns the configured helper, writes one `tools/call` request
//! line to its stdin, and waits for the response carrying the same id on
//! stdout. The helper is always killed and reaped before the call returns.

pub mod action;
pub mod codec;
pub mod error;
pub mod process;
pub mod protocol;
pub mod types;

mod invocation;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::invocation::Invocation;

pub use action::{ActionRequest, ActionResponse, Caller, ToolCall};
pub use error::{BridgeError, FailureKind};
pub use types::{BridgeConfig, DEFAULT_TIMEOUT_MS, HelperConfig};

/// Entry point for tool invocations.
///
/// Holds no per-call state besides the request-id counter, so one bridge
/// can serve any number of concurrent calls; each runs its own helper.
#[derive(Debug)]
pub struct ToolBridge {
    config: BridgeConfig,
    next_id: AtomicU64,
}

impl ToolBridge {
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Call `tool` with the configured default timeout.
    pub async fn invoke<A>(&self, tool: &str, arguments: &A) -> Result<Value, BridgeError>
    where
        A: Serialize + ?Sized,
    {
        self.invoke_with_timeout(tool, arguments, self.config.default_timeout())
            .await
    }

    /// Call `tool` and wait at most `timeout` for its response.
    ///
    /// `arguments` must serialize to a JSON object (`null` is sent as `{}`).
    /// Invalid input fails before a process is spawned.
    pub async fn invoke_with_timeout<A>(
        &self,
        tool: &str,
        arguments: &A,
        timeout: Duration,
    ) -> Result<Value, BridgeError>
    where
        A: Serialize + ?Sized,
    {
        if tool.trim().is_empty() {
            return Err(BridgeError::Invocation("tool name must not be empty".into()));
        }
        if timeout.is_zero() {
            return Err(BridgeError::Invocation("timeout must be positive".into()));
        }
        let arguments = arguments_object(arguments)?;

        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Invocation::new(&self.config, request_id, tool, arguments, timeout)
            .run()
            .await
    }
}

fn arguments_object<A: Serialize + ?Sized>(arguments: &A) -> Result<Value, BridgeError> {
    let value = serde_json::to_value(arguments)
        .map_err(|e| BridgeError::Invocation(format!("arguments are not serializable: {e}")))?;
    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Map::new())),
        other => Err(BridgeError::Invocation(format!(
            "arguments must be a JSON object, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
