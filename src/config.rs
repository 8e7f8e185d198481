//! Environment configuration.

use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use agent_client::DEFAULT_ENDPOINT_URL;
use agent_endpoint::{DEFAULT_ENDPOINT_HOST, DEFAULT_ENDPOINT_PORT};
use agent_provider_codex_cli::DEFAULT_CODEX_PROGRAM;
use agent_provider_mock::MOCK_HANDLER_ID;
use relay_hub::DEFAULT_RELAY_PORT;

pub const DEFAULT_STORE_FILE: &str = ".agent-bridge-sessions.json";

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub provider: String,
    pub host: IpAddr,
    pub port: u16,
    pub relay_port: u16,
    pub relay_url: Option<String>,
    pub endpoint_url: String,
    pub codex_bin: String,
    pub codex_model: Option<String>,
    pub store_path: PathBuf,
    pub log_json: bool,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            provider: env_string_opt("AGENT_BRIDGE_PROVIDER")
                .unwrap_or_else(|| MOCK_HANDLER_ID.to_string()),
            host: env_parse_or("AGENT_BRIDGE_HOST", DEFAULT_ENDPOINT_HOST),
            port: env_parse_or("AGENT_BRIDGE_PORT", DEFAULT_ENDPOINT_PORT),
            relay_port: env_parse_or("AGENT_BRIDGE_RELAY_PORT", DEFAULT_RELAY_PORT),
            relay_url: env_string_opt("AGENT_BRIDGE_RELAY_URL"),
            endpoint_url: env_string_opt("AGENT_BRIDGE_ENDPOINT_URL")
                .unwrap_or_else(|| DEFAULT_ENDPOINT_URL.to_string()),
            codex_bin: env_string_opt("AGENT_BRIDGE_CODEX_BIN")
                .unwrap_or_else(|| DEFAULT_CODEX_PROGRAM.to_string()),
            codex_model: env_string_opt("AGENT_BRIDGE_CODEX_MODEL"),
            store_path: env_string_opt("AGENT_BRIDGE_STORE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE)),
            log_json: env_flag("AGENT_BRIDGE_LOG_JSON"),
        }
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key).map(|value| value == "1").unwrap_or(false)
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

/// Unparseable values fall back to `default`.
fn env_parse_or<T: FromStr>(key: &str, default: T) -> T {
    env_string_opt(key)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}
