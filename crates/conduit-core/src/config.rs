//! Runtime configuration (spec §6 Configuration).
//!
//! Mirrors the teacher's flat `Config::from_env()` shape: every field is an
//! env var with a sane default, except secrets and the database URL, which
//! are required.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Config {
    /// `<provider>:<model>` used for the Dispatcher's tool-calling turns
    pub chat_model: String,
    /// `<provider>:<model>` used for the Analyzer's structured-output turn
    pub analysis_model: String,

    pub openai_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,

    pub embedding_api_url: String,
    pub embedding_api_key: String,
    pub embedding_model: String,

    /// Ceiling on tool-call round trips within a single dispatch (spec §4.5)
    pub max_agent_steps: u32,
    /// Number of prior turns folded into analyzer/dispatcher prompts (spec §4.1)
    pub max_conversation_history: usize,

    /// Default cache TTL in seconds; per-domain overrides live in cache.rs (spec §4.6)
    pub cache_ttl_seconds: u64,
    pub redis_host: String,
    pub redis_port: u16,

    pub database_url: String,

    pub broker_api_base: String,
    pub broker_api_key: String,

    pub top_tools_catalog_path: Option<String>,

    /// When true, an authorization gap degrades to a conversational response
    /// instead of surfacing a connect-app prompt (spec §9 Open Questions)
    pub degraded_mode: bool,

    pub http_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            chat_model: std::env::var("CHAT_MODEL")
                .unwrap_or_else(|_| "openai:gpt-4o-mini".to_string()),
            analysis_model: std::env::var("ANALYSIS_MODEL")
                .unwrap_or_else(|_| "google:gemini-2.0-flash".to_string()),

            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            google_api_key: std::env::var("GOOGLE_API_KEY").ok(),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),

            embedding_api_url: std::env::var("EMBEDDING_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            embedding_api_key: std::env::var("EMBEDDING_API_KEY").unwrap_or_default(),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),

            max_agent_steps: std::env::var("MAX_AGENT_STEPS")
                .unwrap_or_else(|_| "8".to_string())
                .parse()
                .unwrap_or(8),
            max_conversation_history: std::env::var("MAX_CONVERSATION_HISTORY")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),

            cache_ttl_seconds: std::env::var("CACHE_TTL")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
            redis_host: std::env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
            redis_port: std::env::var("REDIS_PORT")
                .unwrap_or_else(|_| "6379".to_string())
                .parse()
                .unwrap_or(6379),

            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,

            broker_api_base: std::env::var("BROKER_API_BASE")
                .unwrap_or_else(|_| "https://backend.composio.dev/api/v3".to_string()),
            broker_api_key: std::env::var("BROKER_API_KEY")
                .context("BROKER_API_KEY must be set")?,

            top_tools_catalog_path: std::env::var("TOP_TOOLS_CATALOG_PATH").ok(),

            degraded_mode: std::env::var("DEGRADED_MODE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),

            http_port: std::env::var("HTTP_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("HTTP_PORT must be a valid port number")?,
        })
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }
}
