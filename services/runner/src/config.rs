use async_openai::config::OpenAIConfig;
use parley_core::EngineConfig;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Language model backends reachable through an OpenAI-compatible API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

impl Provider {
    pub fn api_base(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1/",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub chat_model: String,
    pub summary_model: String,
    pub log_level: Level,
    pub engine: EngineConfig,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let provider_str = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "gemini" => Provider::Gemini,
            other => {
                return Err(ConfigError::InvalidValue(
                    "LLM_PROVIDER".to_string(),
                    format!("'{other}' is not one of 'openai', 'gemini'"),
                ));
            }
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let summary_model = std::env::var("SUMMARY_MODEL").unwrap_or_else(|_| chat_model.clone());

        let log_level = log_level()?;

        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            max_reprompts: parse_var("MAX_REPROMPTS", defaults.max_reprompts)?,
            max_steps_per_turn: parse_var("MAX_STEPS_PER_TURN", defaults.max_steps_per_turn)?,
        };
        if engine.max_steps_per_turn == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_STEPS_PER_TURN".to_string(),
                "must allow at least one model turn".to_string(),
            ));
        }

        match provider {
            Provider::OpenAI => {
                if openai_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                    ));
                }
            }
            Provider::Gemini => {
                if gemini_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "GEMINI_API_KEY must be set for 'gemini' provider".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            provider,
            openai_api_key,
            gemini_api_key,
            chat_model,
            summary_model,
            log_level,
            engine,
        })
    }

    /// Client configuration for the selected provider.
    pub fn openai_config(&self) -> OpenAIConfig {
        let api_key = match self.provider {
            Provider::OpenAI => self.openai_api_key.as_deref(),
            Provider::Gemini => self.gemini_api_key.as_deref(),
        };
        OpenAIConfig::new()
            .with_api_key(api_key.unwrap_or_default())
            .with_api_base(self.provider.api_base())
    }
}

/// Reads `RUST_LOG` as a single level, defaulting to INFO.
pub fn log_level() -> Result<Level, ConfigError> {
    let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
    log_level_str.parse::<Level>().map_err(|_| {
        ConfigError::InvalidValue(
            "RUST_LOG".to_string(),
            format!("'{}' is not a valid log level", log_level_str),
        )
    })
}

fn parse_var(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{raw}': {e}"))),
        Err(_) => Ok(default),
    }
}
