use serde::Deserialize;
use validator::Validate;

use crate::orchestrator::ChatSettings;

/// Main configuration for the tutor controller
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct Config {
    /// Log level (e.g., info, debug, trace)
    pub log_level: String,

    /// `memory` (volatile) or `sqlite` (durable, uses `database_url`)
    #[validate(custom(function = "validate_memory_backend"))]
    pub memory_backend: String,

    /// Database URL for the sqlite backend
    pub database_url: String,

    /// Session cap before least-recently-accessed eviction
    #[validate(range(min = 1, max = 1_000_000))]
    pub max_sessions: usize,

    /// Default age for `prune`
    #[validate(range(min = 1))]
    pub session_max_age_hours: u64,

    /// Directory holding `<mode>_mode_prompt.md` files
    pub prompts_dir: String,

    /// Refuse to start when any mode prompt fails to preload
    pub strict_prompt_preload: bool,

    /// LLM bridge base URL
    pub llm_bridge_url: String,

    /// Model requested from the bridge; bridge default when unset
    pub chat_model: Option<String>,

    /// Ollama base URL
    pub ollama_url: String,

    /// Embedding model name (Ollama)
    pub embedding_model: String,

    #[validate(range(min = 1))]
    pub embedding_dim: usize,

    /// Chroma base URL
    pub chroma_url: String,

    /// Collection holding course-material chunks
    pub chroma_collection: String,

    #[validate(range(min = 1))]
    pub max_context_chars: usize,

    pub max_history_messages: usize,

    #[validate(range(min = 1))]
    pub history_message_chars: usize,

    #[validate(range(min = 1, max = 100))]
    pub default_top_k: usize,

    /// Ask the model for a short title on a session's first turn
    pub title_generation_enabled: bool,
}

fn validate_memory_backend(value: &str) -> Result<(), validator::ValidationError> {
    match value {
        "memory" | "sqlite" => Ok(()),
        _ => Err(validator::ValidationError::new("unknown_memory_backend")),
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let home = dirs::home_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        Self::load_from(&format!("{}/.tutor/config", home))
    }

    /// Defaults, then the optional file at `path` (any format `config`
    /// understands), then `TUTOR__*` environment overrides.
    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .set_default("log_level", "info")?
            .set_default("memory_backend", "memory")?
            .set_default("database_url", "sqlite://tutor.db")?
            .set_default("max_sessions", 1000)?
            .set_default("session_max_age_hours", 24)?
            .set_default("prompts_dir", "prompts")?
            .set_default("strict_prompt_preload", false)?
            .set_default("llm_bridge_url", "http://localhost:5001")?
            .set_default("ollama_url", "http://localhost:11434")?
            .set_default("embedding_model", "nomic-embed-text:latest")?
            .set_default("embedding_dim", 768)?
            .set_default("chroma_url", "http://localhost:8000")?
            .set_default("chroma_collection", "course_materials")?
            .set_default("max_context_chars", 8000)?
            .set_default("max_history_messages", 10)?
            .set_default("history_message_chars", 500)?
            .set_default("default_top_k", 5)?
            .set_default("title_generation_enabled", true)?
            .add_source(config::File::with_name(path).required(false))
            // Environment overrides: TUTOR__MAX_SESSIONS, TUTOR__CHROMA_URL, etc.
            .add_source(config::Environment::with_prefix("TUTOR").separator("__"))
            .build()?;

        let cfg: Config = settings.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    pub fn chat_settings(&self) -> ChatSettings {
        ChatSettings {
            max_context_chars: self.max_context_chars,
            max_history_messages: self.max_history_messages,
            history_message_chars: self.history_message_chars,
            default_top_k: self.default_top_k,
            generate_titles: self.title_generation_enabled,
        }
    }

    pub fn uses_sqlite(&self) -> bool {
        self.memory_backend == "sqlite"
    }
}
