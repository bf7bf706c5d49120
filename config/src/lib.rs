//! Configuration loading for the medrx tool bridge.
//!
//! ```toml
//! [bridge]
//! app_root = "/srv/medrx"
//! default_timeout_ms = 30000
//!
//! [bridge.helper]
//! command = "node"
//! args = ["mcp-server.js"]
//! env = { OPENAI_API_KEY = "${OPENAI_API_KEY}" }
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use medrx_bridge::{BridgeConfig, HelperConfig};
use serde::Deserialize;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "MEDRX_CONFIG";

#[derive(Debug, Default, Deserialize)]
pub struct MedrxConfig {
    pub bridge: Option<BridgeSection>,
}

#[derive(Debug, Deserialize)]
pub struct BridgeSection {
    /// Helper working directory. Relative paths resolve against the
    /// directory holding the config file; unset means the current directory.
    pub app_root: Option<PathBuf>,
    pub default_timeout_ms: Option<u64>,
    pub max_stderr_bytes: Option<usize>,
    pub helper: HelperSection,
}

#[derive(Debug, Deserialize)]
pub struct HelperSection {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Replace `${VAR}` with the variable's value (empty if unset).
///
/// An unterminated `${` is kept literally.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

impl MedrxConfig {
    /// Load from [`config_path`]. `Ok(None)` when no file exists.
    pub fn load() -> Result<Option<Self>> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file");
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("parsing config at {}", path.display()))?;
        Ok(Some(config))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Build the bridge configuration, expanding `${VAR}` references in the
    /// helper command, arguments and environment.
    ///
    /// `config_dir` anchors a relative `app_root`.
    pub fn bridge_config(&self, config_dir: &Path) -> Result<BridgeConfig> {
        let Some(section) = &self.bridge else {
            bail!("missing [bridge] section");
        };

        let command = expand_env_vars(&section.helper.command);
        if command.trim().is_empty() {
            bail!("bridge.helper.command must not be empty");
        }
        let mut helper = HelperConfig::new(
            command,
            section.helper.args.iter().map(|arg| expand_env_vars(arg)),
        );
        for (key, value) in &section.helper.env {
            helper = helper.with_env(key.clone(), expand_env_vars(value));
        }

        let app_root = match &section.app_root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => config_dir.join(root),
            None => env::current_dir().context("resolving current directory as app root")?,
        };

        let mut config = BridgeConfig::new(app_root, helper);
        if let Some(ms) = section.default_timeout_ms {
            if ms == 0 {
                bail!("bridge.default_timeout_ms must be positive");
            }
            config.default_timeout_ms = ms;
        }
        if let Some(max) = section.max_stderr_bytes {
            config = config.with_max_stderr_bytes(max);
        }
        Ok(config)
    }
}

/// `$MEDRX_CONFIG`, else `~/.medrx/config.toml`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV)
        && !path.is_empty()
    {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".medrx").join("config.toml"))
}
