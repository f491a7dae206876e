//! Application Configuration Module
//!
//! Loads settings from environment variables (and a `.env` file when present)
//! into a single struct that is handed to the rest of the service at start-up.

use secrecy::SecretString;
use std::env;
use std::path::PathBuf;
use tracing::Level;

/// Captures shorter than this are treated as "nothing recorded".
pub const MIN_CAPTURE_MS: u64 = 300;
/// Capacity of the channel carrying sequencer commands to the console.
pub const COMMAND_CHANNEL_SIZE: usize = 64;

#[derive(Debug)]
pub struct Config {
    pub openai_api_key: SecretString,
    pub openai_base_url: Option<String>,
    pub chat_model: String,
    pub transcription_model: String,
    pub speech_model: String,
    pub chat_temperature: f32,
    pub memory_token_limit: usize,
    pub audio_input_dir: PathBuf,
    pub audio_output_dir: PathBuf,
    pub history_path: PathBuf,
    pub prompts_dir: Option<PathBuf>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for {var}: {value}")]
    InvalidNumber { var: &'static str, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `OPENAI_API_KEY`: Required. Used for chat, transcription and speech.
    // *   `OPENAI_BASE_URL`: Optional. Points the client at a compatible endpoint or proxy.
    // *   `CHAT_MODEL` / `TRANSCRIPTION_MODEL` / `SPEECH_MODEL`: Defaults to "gpt-4o-mini", "whisper-1", "tts-1".
    // *   `CHAT_TEMPERATURE`: Defaults to 0.5.
    // *   `MEMORY_TOKEN_LIMIT`: Token budget of the conversation memory. Defaults to 1000.
    // *   `AUDIO_INPUT_DIR` / `AUDIO_OUTPUT_DIR`: Scratch directories. Default to "audio/input" and "audio/output".
    // *   `HISTORY_PATH`: Defaults to "conversation_history.json".
    // *   `PROMPTS_DIR`: Optional directory of `*.md` template overrides.
    // *   `INPUT_DEVICE` / `OUTPUT_DEVICE`: Optional audio device names.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or_default = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let openai_api_key = var("OPENAI_API_KEY")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let chat_temperature = match var("CHAT_TEMPERATURE") {
            Some(value) => value.parse::<f32>().map_err(|_| ConfigError::InvalidNumber {
                var: "CHAT_TEMPERATURE",
                value,
            })?,
            None => 0.5,
        };
        let memory_token_limit = match var("MEMORY_TOKEN_LIMIT") {
            Some(value) => value.parse::<usize>().map_err(|_| ConfigError::InvalidNumber {
                var: "MEMORY_TOKEN_LIMIT",
                value,
            })?,
            None => 1000,
        };

        // Configure logging level from RUST_LOG, with a sensible default.
        let log_level_str = or_default("RUST_LOG", "INFO");
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            openai_api_key,
            openai_base_url: var("OPENAI_BASE_URL"),
            chat_model: or_default("CHAT_MODEL", "gpt-4o-mini"),
            transcription_model: or_default("TRANSCRIPTION_MODEL", "whisper-1"),
            speech_model: or_default("SPEECH_MODEL", "tts-1"),
            chat_temperature,
            memory_token_limit,
            audio_input_dir: PathBuf::from(or_default("AUDIO_INPUT_DIR", "audio/input")),
            audio_output_dir: PathBuf::from(or_default("AUDIO_OUTPUT_DIR", "audio/output")),
            history_path: PathBuf::from(or_default("HISTORY_PATH", "conversation_history.json")),
            prompts_dir: var("PROMPTS_DIR").map(PathBuf::from),
            input_device: var("INPUT_DEVICE"),
            output_device: var("OUTPUT_DEVICE"),
            log_level,
        })
    }
}
