mod agent;
mod config;
mod extractor;
mod llm;
mod platform;
mod prompt;
mod staging;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::agent::FactChecker;
use crate::config::Config;
use crate::extractor::WebExtractor;
use crate::llm::GeminiClient;
use crate::staging::MediaStager;

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up TELEGRAM_TOKEN / GEMINI_API_KEY from a local .env if present
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,factcheck_bot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Model: {}", config.gemini.model);
    info!("  Safety settings: {}", config.gemini.safety_settings.len());
    info!(
        "  Extractor: {}s timeout, {} chars max",
        config.extractor.timeout_secs, config.extractor.max_chars
    );
    info!(
        "  Video limit: {} bytes, poll every {}ms (max attempts: {:?})",
        config.media.max_video_bytes, config.media.poll_interval_ms, config.media.max_poll_attempts
    );
    info!("  Allowed users: {:?}", config.telegram.allowed_user_ids);

    let provider = Arc::new(GeminiClient::new(config.gemini.clone()));
    let extractor = Arc::new(WebExtractor::new(&config.extractor)?);
    let stager = MediaStager::new(provider.clone(), &config.media);
    let checker = Arc::new(FactChecker::new(
        provider,
        extractor,
        stager,
        config.gemini.system_instruction.clone(),
    ));

    info!("Fact-checker bot is starting...");
    platform::telegram::run(checker, config.telegram).await?;

    Ok(())
}
