//! Configuration consumed by [`ToolBridge`](crate::ToolBridge).
//!
//! The bridge never reads process-wide state at call time; everything it
//! needs to launch a helper is captured here at construction.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Default per-call deadline.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default cap on captured helper stderr.
pub const DEFAULT_MAX_STDERR_BYTES: usize = 64 * 1024;

/// Configuration for the bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Working directory for every helper process (the application root).
    pub app_root: PathBuf,
    /// Program that implements the tools.
    pub helper: HelperConfig,
    /// Deadline applied when a caller does not pass one. Default: 30000.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Bytes of helper stderr retained for failure reports. Default: 64 KiB.
    #[serde(default = "default_max_stderr_bytes")]
    pub max_stderr_bytes: usize,
}

/// How to launch the helper.
#[derive(Debug, Clone, Deserialize)]
pub struct HelperConfig {
    /// Executable (e.g. "node").
    pub command: String,
    /// Arguments, typically the helper script (e.g. `["mcp-server.js"]`).
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the helper, on top of the inherited environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_stderr_bytes() -> usize {
    DEFAULT_MAX_STDERR_BYTES
}

impl HelperConfig {
    #[must_use]
    pub fn new(
        command: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

impl BridgeConfig {
    #[must_use]
    pub fn new(app_root: impl Into<PathBuf>, helper: HelperConfig) -> Self {
        Self {
            app_root: app_root.into(),
            helper,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_stderr_bytes: DEFAULT_MAX_STDERR_BYTES,
        }
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_max_stderr_bytes(mut self, max: usize) -> Self {
        self.max_stderr_bytes = max;
        self
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}
