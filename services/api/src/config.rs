use panelist_core::EngineConfig;
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub vision_endpoint: String,
    pub question_bank_path: String,
    pub seed_path: Option<String>,
    pub engine: EngineConfig,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// This function will look for a `.env` file in the current directory
    /// and load the following variables:
    ///
    /// *   `BIND_ADDRESS`: The address and port to bind the server to (e.g., "0.0.0.0:3000").
    /// *   `OPENAI_API_KEY`: Your secret key for the OpenAI API. Required.
    /// *   `CHAT_MODEL`: (Optional) The model used for evaluation, follow-ups, and
    ///     report summaries. Defaults to "gpt-4o".
    /// *   `EMBEDDING_MODEL`: (Optional) The embedding model for question selection
    ///     and relevance scoring. Defaults to "text-embedding-3-small".
    /// *   `VISION_ENDPOINT`: (Optional) URL of the affect-classifier sidecar.
    ///     Defaults to "http://127.0.0.1:5001/analyze"; an unreachable sidecar
    ///     degrades to neutral rather than failing.
    /// *   `QUESTION_BANK_PATH`: (Optional) Path to the question bank JSON file.
    ///     Defaults to "question_bank.json".
    /// *   `SEED_PATH`: (Optional) Path to a JSON file of job postings and
    ///     candidates to load at startup.
    /// *   `MAX_AI_TURNS`: (Optional) AI questions per session before closing.
    /// *   `FOLLOW_UP_THRESHOLD`: (Optional) Score under which a follow-up is asked.
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let embedding_model = std::env::var("EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let vision_endpoint = std::env::var("VISION_ENDPOINT")
            .unwrap_or_else(|_| "http://127.0.0.1:5001/analyze".to_string());

        let question_bank_path = std::env::var("QUESTION_BANK_PATH")
            .unwrap_or_else(|_| "question_bank.json".to_string());
        let seed_path = std::env::var("SEED_PATH").ok();

        let mut engine = EngineConfig::default();
        if let Ok(raw) = std::env::var("MAX_AI_TURNS") {
            engine.max_ai_turns = raw.parse().map_err(|_| {
                ConfigError::InvalidValue("MAX_AI_TURNS".to_string(), raw.clone())
            })?;
        }
        if let Ok(raw) = std::env::var("FOLLOW_UP_THRESHOLD") {
            engine.follow_up_threshold = raw.parse().map_err(|_| {
                ConfigError::InvalidValue("FOLLOW_UP_THRESHOLD".to_string(), raw.clone())
            })?;
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            chat_model,
            embedding_model,
            vision_endpoint,
            question_bank_path,
            seed_path,
            engine,
            log_level,
        })
    }
}
