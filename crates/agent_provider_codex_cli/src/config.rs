use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default executable name looked up on `PATH`.
pub const DEFAULT_CODEX_PROGRAM: &str = "codex";

/// Process configuration for the Codex CLI handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexCliConfig {
    /// Executable to spawn.
    pub program: String,
    /// Arguments placed before the generated `exec` arguments.
    pub leading_args: Vec<String>,
    /// Working directory for the agent process.
    pub cwd: Option<PathBuf>,
    /// Default model, exposed as the handler's backend option layer.
    pub model: Option<String>,
    /// Extra environment variables for the agent process.
    pub env: BTreeMap<String, String>,
}

impl Default for CodexCliConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_CODEX_PROGRAM.to_string(),
            leading_args: Vec::new(),
            cwd: None,
            model: None,
            env: BTreeMap::new(),
        }
    }
}

impl CodexCliConfig {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn insert_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}
