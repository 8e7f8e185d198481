use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque backend-specific option record.
pub type AgentOptions = Map<String, Value>;

/// Input required to start one agent invocation.
///
/// Immutable once sent; resumed sessions rebuild it from the session store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    /// Ordered context fragments produced by the selection collaborator.
    pub content: Vec<String>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: AgentOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AgentContext {
    #[must_use]
    pub fn new(content: Vec<String>, prompt: impl Into<String>) -> Self {
        Self {
            content,
            prompt: prompt.into(),
            options: AgentOptions::new(),
            session_id: None,
        }
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Returns the session id when present and non-blank.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Joins the prompt and the context fragments into the text handed to a
    /// vendor process.
    #[must_use]
    pub fn render_prompt(&self) -> String {
        let fragments: Vec<&str> = self
            .content
            .iter()
            .map(String::as_str)
            .filter(|fragment| !fragment.trim().is_empty())
            .collect();

        if fragments.is_empty() {
            return self.prompt.clone();
        }

        format!("{}\n\n{}", self.prompt, fragments.join("\n\n"))
    }
}

/// Merges option layers into one record.
///
/// Precedence, highest first: `call` (per-call options) > `caller`
/// (caller-level defaults) > `backend` (handler defaults). Keys are replaced
/// whole; nested objects are not merged. An explicit `null` in a higher layer
/// still replaces the lower value.
#[must_use]
pub fn merge_options(
    backend: &AgentOptions,
    caller: &AgentOptions,
    call: &AgentOptions,
) -> AgentOptions {
    let mut merged = AgentOptions::new();
    for layer in [backend, caller, call] {
        for (key, value) in layer {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}
