//! medrx CLI - invoke helper tools from the terminal.
//!
//! ```text
//! medrx invoke generate_prescription --args '{"patientId":"p-1"}'
//! echo '{"action":"generate_prescription","patientId":"p-1"}' | medrx action -
//! ```
//!
//! Results and failures are printed to stdout as the same JSON body the
//! route layer would return; logs go to stderr.

use std::io::{Read, stdin};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use medrx_bridge::{ActionRequest, ActionResponse, Caller, ToolBridge};
use medrx_config::MedrxConfig;

#[derive(Debug, Parser)]
#[command(name = "medrx")]
#[command(about = "Invoke medrx helper tools over JSON-RPC", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Config file (defaults to ~/.medrx/config.toml).
    #[arg(short, long, global = true, env = "MEDRX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Call a tool by name.
    Invoke {
        tool: String,
        /// Tool arguments as a JSON object.
        #[arg(short, long, default_value = "{}")]
        args: String,
        /// Override the configured timeout.
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },
    /// Relay an `{"action": ..., ...params}` request body ("-" reads stdin).
    Action {
        body: String,
        #[arg(long)]
        doctor_id: Option<String>,
        #[arg(long)]
        doctor_name: Option<String>,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // stdout carries the JSON result.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load_bridge(config_path: Option<&Path>) -> Result<ToolBridge> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => MedrxConfig::path().context("cannot determine config location")?,
    };
    let Some(config) = MedrxConfig::load_from(&path)? else {
        bail!("no config file at {}", path.display());
    };
    let config_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let bridge_config = config.bridge_config(config_dir)?;
    tracing::debug!(
        helper = %bridge_config.helper.command,
        app_root = %bridge_config.app_root.display(),
        "Bridge configured"
    );
    Ok(ToolBridge::new(bridge_config))
}

fn parse_json(text: &str, what: &str) -> Result<Value> {
    serde_json::from_str(text).with_context(|| format!("{what} is not valid JSON"))
}

fn read_body(body: &str) -> Result<String> {
    if body != "-" {
        return Ok(body.to_string());
    }
    let mut buf = String::new();
    stdin()
        .read_to_string(&mut buf)
        .context("reading request body from stdin")?;
    Ok(buf)
}

async fn run(cli: Cli) -> Result<ActionResponse> {
    let bridge = load_bridge(cli.config.as_deref())?;

    let result = match cli.command {
        Command::Invoke {
            tool,
            args,
            timeout_ms,
        } => {
            let arguments = parse_json(&args, "--args")?;
            match timeout_ms {
                Some(ms) => {
                    bridge
                        .invoke_with_timeout(&tool, &arguments, Duration::from_millis(ms))
                        .await
                }
                None => bridge.invoke(&tool, &arguments).await,
            }
        }
        Command::Action {
            body,
            doctor_id,
            doctor_name,
        } => {
            let body = parse_json(&read_body(&body)?, "request body")?;
            let request: ActionRequest =
                serde_json::from_value(body).context("request body must contain an \"action\"")?;
            let caller = (doctor_id.is_some() || doctor_name.is_some()).then(|| Caller {
                doctor_id,
                doctor_name,
            });
            bridge.dispatch(request, caller.as_ref()).await
        }
    };

    Ok(ActionResponse::from_result(result))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let response = run(cli).await?;
    let rendered = serde_json::to_string_pretty(&response).context("rendering response")?;
    println!("{rendered}");

    if response.success {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::debug!(status = response.status, "Invocation failed");
        Ok(ExitCode::FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_invoke() {
        let cli = Cli::try_parse_from([
            "medrx",
            "invoke",
            "generate_prescription",
            "--args",
            r#"{"patientId":"p-1"}"#,
            "--timeout-ms",
            "500",
        ])
        .unwrap();
        match cli.command {
            Command::Invoke {
                tool,
                args,
                timeout_ms,
            } => {
                assert_eq!(tool, "generate_prescription");
                assert_eq!(args, r#"{"patientId":"p-1"}"#);
                assert_eq!(timeout_ms, Some(500));
            }
            Command::Action { .. } => panic!("expected invoke"),
        }
    }

    #[test]
    fn test_invoke_args_default_to_empty_object() {
        let cli = Cli::try_parse_from(["medrx", "invoke", "x"]).unwrap();
        let Command::Invoke { args, .. } = cli.command else {
            panic!("expected invoke");
        };
        assert_eq!(args, "{}");
    }

    #[test]
    fn test_parse_action_with_caller() {
        let cli = Cli::try_parse_from([
            "medrx",
            "--config",
            "/tmp/medrx.toml",
            "action",
            "-",
            "--doctor-id",
            "d-1",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/medrx.toml")));
        let Command::Action {
            body,
            doctor_id,
            doctor_name,
        } = cli.command
        else {
            panic!("expected action");
        };
        assert_eq!(body, "-");
        assert_eq!(doctor_id.as_deref(), Some("d-1"));
        assert_eq!(doctor_name, None);
    }

    #[test]
    fn test_parse_json_error_names_input() {
        let err = parse_json("{nope", "--args").unwrap_err();
        assert!(err.to_string().contains("--args"));
    }

    #[test]
    fn test_read_body_passes_literal_through() {
        assert_eq!(read_body(r#"{"action":"x"}"#).unwrap(), r#"{"action":"x"}"#);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let err = load_bridge(Some(Path::new("/nonexistent/medrx/config.toml"))).unwrap_err();
        assert!(err.to_string().contains("no config file"));
    }
}
