use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::config::ExtractorConfig;

/// Turns a link into a bounded plain-text excerpt. Never fails: problems are
/// reported inside the returned text.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> String;
}

pub struct WebExtractor {
    client: reqwest::Client,
    max_chars: usize,
}

impl WebExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .context("Failed to build HTTP client for page extraction")?;
        Ok(Self {
            client,
            max_chars: config.max_chars,
        })
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let body = self
            .client
            .get(url)
            .send()
            .await
            .context("request failed")?
            .text()
            .await
            .context("failed to read response body")?;

        // HTML parsing is CPU-bound, keep it off the async workers
        let max_chars = self.max_chars;
        tokio::task::spawn_blocking(move || truncate_chars(&paragraph_text(&body), max_chars))
            .await
            .context("HTML parsing task failed")
    }
}

#[async_trait]
impl PageExtractor for WebExtractor {
    async fn extract(&self, url: &str) -> String {
        match self.fetch(url).await {
            Ok(text) => {
                debug!("Extracted {} chars from {}", text.chars().count(), url);
                text
            }
            Err(e) => {
                warn!("Failed to extract {}: {:#}", url, e);
                format!("[Failed to extract webpage content: {e:#}]")
            }
        }
    }
}

/// Visible text of every `<p>` element, joined by single spaces.
pub fn paragraph_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("p") else {
        return String::new();
    };
    document
        .select(&selector)
        .map(|p| p.text().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}
