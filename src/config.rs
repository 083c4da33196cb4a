use crate::processing::{ParameterError, RunParameters};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";
const DEFAULT_DATA_DIR: &str = "data/raw";
const DEFAULT_LOG_FILE: &str = "logs/reportsynth.log";
const DEFAULT_LOG_FILTER: &str = "info";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Default run parameters fall outside the ranges offered by the shell.
    #[error("Invalid default run parameters: {0}")]
    InvalidDefaults(#[from] ParameterError),
    /// Configuration was already installed for this process.
    #[error("Configuration already initialized")]
    AlreadyInitialized,
}

/// Runtime configuration for the Report Synthesizer.
#[derive(Debug, Clone)]
pub struct Config {
    /// Completion backend used for the map and reduce stages.
    pub llm_provider: LlmProvider,
    /// Credential for the OpenAI-compatible backend.
    pub openai_api_key: Option<String>,
    /// Root URL of the OpenAI-compatible API (including `/v1`).
    pub openai_base_url: String,
    /// Root URL of the Ollama runtime.
    pub ollama_url: String,
    /// Completion model identifier passed to the provider.
    pub llm_model: String,
    /// Per-request timeout applied to every completion call.
    pub llm_timeout_secs: u64,
    /// Retry budget for transient backend failures.
    pub llm_max_retries: u32,
    /// Maximum number of map requests in flight.
    pub map_concurrency: usize,
    /// Token budget for the summaries block of a single reduce prompt.
    pub reduce_token_max: usize,
    /// Directory scanned for PDF reports.
    pub data_dir: PathBuf,
    /// Initial value of the temperature control.
    pub default_temperature: f32,
    /// Initial value of the chunk-size control.
    pub default_chunk_size: usize,
    /// Initial value of the chunk-overlap control.
    pub default_chunk_overlap: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Log filter and destination.
    pub log: LogSettings,
}

/// Where logs go and how much is written.
///
/// Read separately from [`Config`] so tracing can start before the backend settings are
/// validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directives, from `RUST_LOG`.
    pub filter: String,
    /// Log file, from `REPORTSYNTH_LOG_FILE`.
    pub file: PathBuf,
}

impl LogSettings {
    /// Read log settings from the environment. Call after `.env` has been loaded.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read log settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            filter: optional("RUST_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            file: optional("REPORTSYNTH_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        }
    }
}

/// Supported completion backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    /// Hosted OpenAI (or compatible) chat completions API.
    OpenAI,
    /// Local Ollama runtime.
    Ollama,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let llm_provider = match optional("LLM_PROVIDER") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("LLM_PROVIDER".to_string()))?,
            None => LlmProvider::OpenAI,
        };

        let openai_api_key = optional("OPENAI_API_KEY");
        if llm_provider == LlmProvider::OpenAI && openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".to_string()));
        }

        let llm_model = optional("LLM_MODEL").unwrap_or_else(|| match llm_provider {
            LlmProvider::OpenAI => DEFAULT_OPENAI_MODEL.to_string(),
            LlmProvider::Ollama => DEFAULT_OLLAMA_MODEL.to_string(),
        });

        let config = Self {
            llm_provider,
            openai_api_key,
            openai_base_url: optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            ollama_url: optional("OLLAMA_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            llm_model,
            llm_timeout_secs: parse_or(optional("LLM_TIMEOUT_SECS"), "LLM_TIMEOUT_SECS", 60)?,
            llm_max_retries: parse_or(optional("LLM_MAX_RETRIES"), "LLM_MAX_RETRIES", 2)?,
            map_concurrency: parse_or(optional("MAP_CONCURRENCY"), "MAP_CONCURRENCY", 4)?.max(1),
            reduce_token_max: parse_or(optional("REDUCE_TOKEN_MAX"), "REDUCE_TOKEN_MAX", 3000)?,
            data_dir: optional("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            default_temperature: parse_or(
                optional("DEFAULT_TEMPERATURE"),
                "DEFAULT_TEMPERATURE",
                0.0,
            )?,
            default_chunk_size: parse_or(
                optional("DEFAULT_CHUNK_SIZE"),
                "DEFAULT_CHUNK_SIZE",
                800,
            )?,
            default_chunk_overlap: parse_or(
                optional("DEFAULT_CHUNK_OVERLAP"),
                "DEFAULT_CHUNK_OVERLAP",
                150,
            )?,
            server_port: optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
            log: LogSettings::from_lookup(&lookup),
        };

        config.default_parameters(String::new())?;
        Ok(config)
    }

    /// Build run parameters from the configured control defaults.
    pub fn default_parameters(&self, question: String) -> Result<RunParameters, ParameterError> {
        RunParameters::new(
            question,
            self.default_temperature,
            self.default_chunk_size,
            self.default_chunk_overlap,
        )
    }

    /// Timeout applied to each completion request.
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs.max(1))
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T, ConfigError> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

impl FromStr for LlmProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, if startup validation has run.
pub fn get_config() -> Option<&'static Config> {
    CONFIG.get()
}

/// Load `.env` from the working directory into the process environment.
///
/// Variables already set in the environment win over the file.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Load configuration from the environment (and `.env`) and install it in the global cache.
///
/// Startup must stop when this returns an error; nothing downstream runs without a valid
/// backend credential.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    load_dotenv();
    let config = Config::from_env()?;
    tracing::debug!(
        provider = ?config.llm_provider,
        model = %config.llm_model,
        data_dir = %config.data_dir.display(),
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    CONFIG.get().ok_or(ConfigError::AlreadyInitialized)
}
