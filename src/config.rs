use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::prompt::SYSTEM_INSTRUCTION;

pub const TELEGRAM_TOKEN_VAR: &str = "TELEGRAM_TOKEN";
pub const GEMINI_API_KEY_VAR: &str = "GEMINI_API_KEY";

/// Gemini harm categories that accept a blocking threshold.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment,
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech,
    #[serde(rename = "HARM_CATEGORY_SEXUALLY_EXPLICIT")]
    SexuallyExplicit,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS_CONTENT")]
    DangerousContent,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockThreshold {
    BlockNone,
    BlockOnlyHigh,
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: BlockThreshold,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    /// Read from `TELEGRAM_TOKEN`, never from the config file.
    #[serde(skip)]
    pub bot_token: String,
    /// Empty means everyone may use the bot.
    #[serde(default)]
    pub allowed_user_ids: Vec<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    /// Read from `GEMINI_API_KEY`, never from the config file.
    #[serde(skip)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    #[serde(default = "default_safety_settings")]
    pub safety_settings: Vec<SafetySetting>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            system_instruction: default_system_instruction(),
            safety_settings: default_safety_settings(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractorConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_chars: default_max_chars(),
            user_agent: default_user_agent(),
        }
    }
}

impl ExtractorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    /// Telegram bots cannot download files above 20 MB.
    #[serde(default = "default_max_video_bytes")]
    pub max_video_bytes: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Unset keeps polling until the provider reports a terminal state.
    #[serde(default)]
    pub max_poll_attempts: Option<u32>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_video_bytes: default_max_video_bytes(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: None,
        }
    }
}

impl MediaConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_system_instruction() -> String {
    SYSTEM_INSTRUCTION.to_string()
}

/// Sensitive news topics are the usual subject of fake news, so most
/// categories are left unblocked.
fn default_safety_settings() -> Vec<SafetySetting> {
    vec![
        SafetySetting {
            category: HarmCategory::Harassment,
            threshold: BlockThreshold::BlockNone,
        },
        SafetySetting {
            category: HarmCategory::HateSpeech,
            threshold: BlockThreshold::BlockNone,
        },
        SafetySetting {
            category: HarmCategory::SexuallyExplicit,
            threshold: BlockThreshold::BlockOnlyHigh,
        },
        SafetySetting {
            category: HarmCategory::DangerousContent,
            threshold: BlockThreshold::BlockNone,
        },
    ]
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_chars() -> usize {
    15_000
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64)".to_string()
}

fn default_max_video_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_poll_interval_ms() -> u64 {
    3000
}

impl Config {
    /// Load settings from an optional TOML file and secrets from the process
    /// environment. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = if path.exists() {
            Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?,
            )
        } else {
            None
        };

        Self::from_parts(content.as_deref(), |name| std::env::var(name).ok())
    }

    /// Build the config from file content and an environment lookup.
    pub fn from_parts<F>(content: Option<&str>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Config = match content {
            Some(content) => toml::from_str(content).context("Failed to parse config file")?,
            None => Config::default(),
        };

        config.telegram.bot_token = required_secret(&env, TELEGRAM_TOKEN_VAR)?;
        config.gemini.api_key = required_secret(&env, GEMINI_API_KEY_VAR)?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.extractor.timeout_secs == 0 {
            anyhow::bail!("extractor.timeout_secs must be greater than zero");
        }
        if self.extractor.max_chars == 0 {
            anyhow::bail!("extractor.max_chars must be greater than zero");
        }
        if self.gemini.model.trim().is_empty() {
            anyhow::bail!("gemini.model must not be empty");
        }
        Ok(())
    }
}

fn required_secret<F>(env: &F, name: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .with_context(|| format!("Missing required environment variable {name}"))
}
