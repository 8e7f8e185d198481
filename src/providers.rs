use std::sync::Arc;

use agent_provider::AgentHandler;
use agent_provider_codex_cli::{CodexCliConfig, CodexCliHandler, CODEX_CLI_HANDLER_ID};
use agent_provider_mock::{MockHandler, MOCK_HANDLER_ID};

use crate::config::EnvConfig;

pub const DEFAULT_PROVIDER_ID: &str = MOCK_HANDLER_ID;

/// Resolves the handler selected by `provider_id`.
pub fn handler_for_id(
    provider_id: &str,
    config: &EnvConfig,
) -> Result<Arc<dyn AgentHandler>, String> {
    match provider_id {
        MOCK_HANDLER_ID => Ok(Arc::new(MockHandler::default())),
        CODEX_CLI_HANDLER_ID => {
            let mut codex = CodexCliConfig::new(&config.codex_bin);
            if let Some(model) = &config.codex_model {
                codex = codex.with_model(model);
            }
            if let Ok(cwd) = std::env::current_dir() {
                codex = codex.with_cwd(cwd);
            }
            Ok(Arc::new(CodexCliHandler::new(codex)))
        }
        unknown => Err(format!(
            "Unsupported provider '{unknown}'. Available providers: {MOCK_HANDLER_ID}, {CODEX_CLI_HANDLER_ID}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EnvConfig {
        EnvConfig {
            provider: DEFAULT_PROVIDER_ID.to_string(),
            host: agent_endpoint::DEFAULT_ENDPOINT_HOST,
            port: 0,
            relay_port: 0,
            relay_url: None,
            endpoint_url: agent_client::DEFAULT_ENDPOINT_URL.to_string(),
            codex_bin: "codex".to_string(),
            codex_model: Some("gpt-5-codex".to_string()),
            store_path: "sessions.json".into(),
            log_json: false,
        }
    }

    #[test]
    fn handler_for_id_supports_mock() {
        let handler = handler_for_id("mock", &config()).expect("mock handler should resolve");
        assert_eq!(handler.profile().handler_id, "mock");
    }

    #[test]
    fn handler_for_id_builds_codex_with_configured_model() {
        let handler = handler_for_id("codex", &config()).expect("codex handler should resolve");
        assert_eq!(handler.profile().handler_id, "codex");
        assert_eq!(
            handler.default_options().get("model").and_then(|value| value.as_str()),
            Some("gpt-5-codex")
        );
    }

    #[test]
    fn handler_for_id_rejects_unknown_provider() {
        let error = match handler_for_id("custom", &config()) {
            Ok(_) => panic!("unknown providers should fail"),
            Err(error) => error,
        };

        assert!(error.contains("Unsupported provider 'custom'"));
    }
}
