use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::{GeminiConfig, SafetySetting};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Processing state of an uploaded file on the provider side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    #[default]
    StateUnspecified,
    Processing,
    Active,
    Failed,
}

/// Provider-side handle to an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Resource name, e.g. `files/abc-123`
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub state: FileState,
}

/// Generative model that accepts a prompt plus an optional uploaded file.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn upload_file(&self, path: &Path, mime_type: &str) -> Result<RemoteFile>;

    async fn get_file(&self, name: &str) -> Result<RemoteFile>;

    async fn delete_file(&self, name: &str) -> Result<()>;

    async fn generate(&self, prompt: &str, media: Option<&RemoteFile>) -> Result<String>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    safety_settings: &'a [SafetySetting],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Part<'a> {
    Text(&'a str),
    FileData {
        #[serde(rename = "mimeType")]
        mime_type: &'a str,
        #[serde(rename = "fileUri")]
        file_uri: &'a str,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

/// Client for the Gemini REST API (v1beta).
pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn request_body<'a>(&'a self, prompt: &'a str, media: Option<&'a RemoteFile>) -> GenerateRequest<'a> {
        let mut parts = Vec::with_capacity(2);
        if let Some(file) = media {
            parts.push(Part::FileData {
                mime_type: &file.mime_type,
                file_uri: &file.uri,
            });
        }
        parts.push(Part::Text(prompt));

        GenerateRequest {
            contents: vec![Content { role: "user", parts }],
            safety_settings: &self.config.safety_settings,
        }
    }
}

async fn ensure_success(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if !status.is_success() {
        let error_body = response.text().await.unwrap_or_default();
        anyhow::bail!("Gemini {} failed ({}): {}", action, status, error_body);
    }
    Ok(response)
}

/// Concatenate the text parts of the first candidate. A reply without text
/// means the prompt or the answer was blocked.
fn verdict_text(response: GenerateResponse) -> Result<String> {
    let block_reason = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason);

    let Some(candidate) = response.candidates.into_iter().next() else {
        anyhow::bail!(
            "Gemini returned no answer (block reason: {})",
            block_reason.as_deref().unwrap_or("unknown")
        );
    };

    let text: String = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| part.text)
        .collect();

    if text.trim().is_empty() {
        anyhow::bail!(
            "Gemini returned an empty answer (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        );
    }
    Ok(text)
}

#[async_trait]
impl InferenceProvider for GeminiClient {
    async fn upload_file(&self, path: &Path, mime_type: &str) -> Result<RemoteFile> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read staged file: {}", path.display()))?;
        let display_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        debug!("Starting Gemini upload of {} ({} bytes)", display_name, bytes.len());

        let start = self
            .client
            .post(self.url("upload/v1beta/files"))
            .header(API_KEY_HEADER, &self.config.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .context("Failed to start Gemini upload")?;
        let start = ensure_success(start, "upload start").await?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|value| value.to_str().ok())
            .context("Gemini upload start returned no upload URL")?
            .to_string();

        let response = self
            .client
            .post(upload_url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await
            .context("Failed to send file to Gemini")?;
        let uploaded: UploadResponse = ensure_success(response, "upload")
            .await?
            .json()
            .await
            .context("Failed to parse Gemini upload response")?;

        debug!(
            "Uploaded {} as {} (state {:?})",
            display_name, uploaded.file.name, uploaded.file.state
        );
        Ok(uploaded.file)
    }

    async fn get_file(&self, name: &str) -> Result<RemoteFile> {
        let response = self
            .client
            .get(self.url(&format!("v1beta/{name}")))
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to query Gemini file {name}"))?;

        ensure_success(response, "file lookup")
            .await?
            .json()
            .await
            .context("Failed to parse Gemini file state")
    }

    async fn delete_file(&self, name: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("v1beta/{name}")))
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to delete Gemini file {name}"))?;
        ensure_success(response, "file deletion").await?;
        Ok(())
    }

    async fn generate(&self, prompt: &str, media: Option<&RemoteFile>) -> Result<String> {
        let url = self.url(&format!(
            "v1beta/models/{}:generateContent",
            self.config.model
        ));

        debug!("Sending request to Gemini: {}", url);

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&self.request_body(prompt, media))
            .send()
            .await
            .context("Failed to send request to Gemini")?;

        let parsed: GenerateResponse = ensure_success(response, "request")
            .await?
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        verdict_text(parsed)
    }
}
