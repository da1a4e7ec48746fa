// src/config.rs
// Application configuration: file, environment and validation

use crate::pipeline::PipelineSettings;
use crate::stt::{PollBackoff, TranscriptionOptions};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

pub const DEFAULT_INPUT_DIR: &str = "./audio_chunks";
pub const DEFAULT_STAGING_DIR: &str = "./tmp";
pub const DEFAULT_OUTPUT_PATH: &str = "./composite_summary.txt";
pub const DEFAULT_EXTENSION: &str = "mp3";
pub const DEFAULT_LANGUAGE: &str = "ar";
pub const DEFAULT_MODE: &str = "advanced";
pub const DEFAULT_TARGET_LANGUAGE: &str = "en";

pub const ENV_INPUT_DIR: &str = "SEGMENT_DIGEST_INPUT_DIR";
pub const ENV_STAGING_DIR: &str = "SEGMENT_DIGEST_STAGING_DIR";
pub const ENV_OUTPUT: &str = "SEGMENT_DIGEST_OUTPUT";
pub const ENV_MAX_IN_FLIGHT: &str = "SEGMENT_DIGEST_MAX_IN_FLIGHT";
pub const ENV_NEURALSPACE_KEY: &str = "NEURALSPACE_API_KEY";
pub const ENV_NEURALSPACE_URL: &str = "NEURALSPACE_BASE_URL";
pub const ENV_OPENAI_KEY: &str = "OPENAI_API_KEY";
pub const ENV_OPENAI_URL: &str = "OPENAI_BASE_URL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Missing credential: set {0}")]
    MissingCredential(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub input_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub output_path: PathBuf,
    pub audio_extension: String,
    pub max_in_flight: usize,
    pub transcription: TranscriptionConfig,
    pub poll: PollConfig,
    pub submit: SubmitConfig,
    pub summary: SummaryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from(DEFAULT_INPUT_DIR),
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            audio_extension: DEFAULT_EXTENSION.to_string(),
            max_in_flight: 8,
            transcription: TranscriptionConfig::default(),
            poll: PollConfig::default(),
            submit: SubmitConfig::default(),
            summary: SummaryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub language_id: String,
    pub mode: String,
    pub summarize: bool,
    pub sentiment_detect: bool,
    pub target_languages: Vec<String>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            language_id: DEFAULT_LANGUAGE.to_string(),
            mode: DEFAULT_MODE.to_string(),
            summarize: true,
            sentiment_detect: true,
            target_languages: vec![DEFAULT_TARGET_LANGUAGE.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_000,
            max_delay_ms: 30_000,
            timeout_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    pub max_retries: u8,
    pub retry_base_delay_ms: u64,
    pub breaker_threshold: u32,
    pub breaker_window_secs: u64,
    pub breaker_cooldown_secs: u64,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay_ms: 2_000,
            breaker_threshold: 5,
            breaker_window_secs: 300,
            breaker_cooldown_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: f32,
    pub instruction: String,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            model: crate::summary::DEFAULT_MODEL.to_string(),
            max_tokens: None,
            temperature: 0.3,
            instruction: crate::pipeline::prompt::DEFAULT_INSTRUCTION.to_string(),
        }
    }
}

/// API keys and endpoint overrides, read from the environment
#[derive(Clone)]
pub struct Credentials {
    pub neuralspace_api_key: String,
    pub neuralspace_base_url: Option<String>,
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            neuralspace_api_key: required_env(ENV_NEURALSPACE_KEY)?,
            neuralspace_base_url: optional_env(ENV_NEURALSPACE_URL),
            openai_api_key: required_env(ENV_OPENAI_KEY)?,
            openai_base_url: optional_env(ENV_OPENAI_URL),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("neuralspace_api_key", &mask_key(&self.neuralspace_api_key))
            .field("neuralspace_base_url", &self.neuralspace_base_url)
            .field("openai_api_key", &mask_key(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .finish()
    }
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    optional_env(name).ok_or(ConfigError::MissingCredential(name))
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn mask_key(key: &str) -> String {
    let visible: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("***{}", visible)
}

impl AppConfig {
    /// Load from a JSON file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_json::from_str::<AppConfig>(&raw).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => AppConfig::default(),
        };

        config.apply_env_overrides()?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(dir) = optional_env(ENV_INPUT_DIR) {
            self.input_dir = PathBuf::from(dir);
        }
        if let Some(dir) = optional_env(ENV_STAGING_DIR) {
            self.staging_dir = PathBuf::from(dir);
        }
        if let Some(path) = optional_env(ENV_OUTPUT) {
            self.output_path = PathBuf::from(path);
        }
        if let Some(raw) = optional_env(ENV_MAX_IN_FLIGHT) {
            self.max_in_flight = raw.parse().map_err(|_| {
                ConfigError::Invalid(format!("{} must be a positive integer, got {:?}", ENV_MAX_IN_FLIGHT, raw))
            })?;
        }
        Ok(())
    }

    pub fn normalize(&mut self) {
        self.audio_extension = normalize_extension(&self.audio_extension);
        self.transcription.language_id = self.transcription.language_id.trim().to_string();
        self.transcription.mode = self.transcription.mode.trim().to_lowercase();

        let mut seen: Vec<String> = Vec::new();
        for lang in &self.transcription.target_languages {
            let lang = lang.trim();
            if !lang.is_empty() && !seen.iter().any(|s| s.eq_ignore_ascii_case(lang)) {
                seen.push(lang.to_string());
            }
        }
        self.transcription.target_languages = seen;

        if self.summary.instruction.trim().is_empty() {
            self.summary.instruction = crate::pipeline::prompt::DEFAULT_INSTRUCTION.to_string();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid("max_in_flight must be at least 1".to_string()));
        }
        if self.audio_extension.is_empty() {
            return Err(ConfigError::Invalid("audio_extension must not be empty".to_string()));
        }
        if !is_language_code(&self.transcription.language_id) {
            return Err(ConfigError::Invalid(format!(
                "language_id {:?} is not a language code",
                self.transcription.language_id
            )));
        }
        if self.transcription.target_languages.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one translation target language is required".to_string(),
            ));
        }
        if let Some(bad) = self
            .transcription
            .target_languages
            .iter()
            .find(|l| !is_language_code(l))
        {
            return Err(ConfigError::Invalid(format!(
                "target language {:?} is not a language code",
                bad
            )));
        }
        if self.transcription.mode.is_empty() {
            return Err(ConfigError::Invalid("transcription mode must not be empty".to_string()));
        }
        if self.poll.initial_delay_ms == 0 {
            return Err(ConfigError::Invalid("poll.initial_delay_ms must be positive".to_string()));
        }
        if self.poll.max_delay_ms < self.poll.initial_delay_ms {
            return Err(ConfigError::Invalid(
                "poll.max_delay_ms must not be below poll.initial_delay_ms".to_string(),
            ));
        }
        if self.poll.timeout_secs == 0 {
            return Err(ConfigError::Invalid("poll.timeout_secs must be positive".to_string()));
        }
        if self.input_dir == self.staging_dir {
            return Err(ConfigError::Invalid(
                "input_dir and staging_dir must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn transcription_options(&self) -> TranscriptionOptions {
        TranscriptionOptions {
            language_id: self.transcription.language_id.clone(),
            mode: self.transcription.mode.clone(),
            summarize: self.transcription.summarize,
            sentiment_detect: self.transcription.sentiment_detect,
            target_languages: self.transcription.target_languages.clone(),
        }
    }

    pub fn poll_backoff(&self) -> PollBackoff {
        PollBackoff::new(
            Duration::from_millis(self.poll.initial_delay_ms),
            Duration::from_millis(self.poll.max_delay_ms),
            Duration::from_secs(self.poll.timeout_secs),
        )
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_in_flight: self.max_in_flight,
            submit_max_retries: self.submit.max_retries,
            submit_retry_base_delay: Duration::from_millis(self.submit.retry_base_delay_ms),
            breaker_threshold: self.submit.breaker_threshold,
            breaker_window: Duration::from_secs(self.submit.breaker_window_secs),
            breaker_cooldown: Duration::from_secs(self.submit.breaker_cooldown_secs),
            target_languages: self.transcription.target_languages.clone(),
            instruction: self.summary.instruction.clone(),
        }
    }
}

pub fn normalize_extension(input: &str) -> String {
    input.trim().trim_start_matches('.').to_lowercase()
}

/// BCP-47-like: primary subtag of 2-3 letters plus optional subtags
pub fn is_language_code(code: &str) -> bool {
    static LANG_RE: OnceLock<Regex> = OnceLock::new();
    let re = LANG_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z]{2,3}(-[A-Za-z0-9]{2,8})*$").expect("valid language regex")
    });
    re.is_match(code)
}
