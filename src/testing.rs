//! In-crate fakes for the chat platform, the inference provider and the page
//! extractor.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::extractor::PageExtractor;
use crate::llm::{FileState, InferenceProvider, RemoteFile};
use crate::platform::{ChatSession, ReplyError, TextFormat};

#[derive(Default)]
pub struct FakeSession {
    /// Every status text that was accepted, in order
    pub statuses: Vec<(String, TextFormat)>,
    pub followups: Vec<(String, TextFormat)>,
    pub downloads: Vec<PathBuf>,
    pub edit_attempts: usize,
    pub reject_html: bool,
    pub fail_edits: bool,
    pub fail_download: bool,
}

impl FakeSession {
    pub fn last_status(&self) -> Option<(String, TextFormat)> {
        self.statuses.last().cloned()
    }

    pub fn status_texts(&self) -> Vec<&str> {
        self.statuses.iter().map(|(text, _)| text.as_str()).collect()
    }

    fn accept(&self, format: TextFormat) -> Result<(), ReplyError> {
        if self.fail_edits {
            return Err(ReplyError::Other(anyhow::anyhow!("network down")));
        }
        if self.reject_html && format == TextFormat::Html {
            return Err(ReplyError::UnsupportedFormatting(
                "can't parse entities".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatSession for FakeSession {
    async fn edit_status(&mut self, text: &str, format: TextFormat) -> Result<(), ReplyError> {
        self.edit_attempts += 1;
        self.accept(format)?;
        self.statuses.push((text.to_string(), format));
        Ok(())
    }

    async fn send_followup(&mut self, text: &str, format: TextFormat) -> Result<(), ReplyError> {
        self.accept(format)?;
        self.followups.push((text.to_string(), format));
        Ok(())
    }

    async fn download_file(&mut self, _file_id: &str, dest: &Path) -> anyhow::Result<()> {
        self.downloads.push(dest.to_path_buf());
        if self.fail_download {
            anyhow::bail!("download interrupted");
        }
        tokio::fs::write(dest, b"fake media bytes").await?;
        Ok(())
    }
}

pub struct FakeProvider {
    verdict: String,
    upload_state: FileState,
    poll_states: Mutex<VecDeque<FileState>>,
    fail_generate: bool,
    calls: Mutex<Vec<String>>,
    prompts: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeProvider {
    pub fn new(verdict: &str) -> Self {
        Self {
            verdict: verdict.to_string(),
            upload_state: FileState::Active,
            poll_states: Mutex::new(VecDeque::new()),
            fail_generate: false,
            calls: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_upload_state(mut self, state: FileState) -> Self {
        self.upload_state = state;
        self
    }

    pub fn with_poll_states(self, states: Vec<FileState>) -> Self {
        *self.poll_states.lock().unwrap() = states.into();
        self
    }

    pub fn failing_generate(mut self) -> Self {
        self.fail_generate = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<(String, Option<String>)> {
        self.prompts.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn remote(&self, state: FileState) -> RemoteFile {
        RemoteFile {
            name: "files/fake-1".to_string(),
            uri: "https://files.example/fake-1".to_string(),
            mime_type: "video/mp4".to_string(),
            state,
        }
    }
}

#[async_trait]
impl InferenceProvider for FakeProvider {
    async fn upload_file(&self, path: &Path, _mime_type: &str) -> anyhow::Result<RemoteFile> {
        self.record("upload");
        // The staged file must be on disk at upload time
        tokio::fs::read(path).await?;
        Ok(self.remote(self.upload_state))
    }

    async fn get_file(&self, _name: &str) -> anyhow::Result<RemoteFile> {
        self.record("get_file");
        let state = self
            .poll_states
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(FileState::Processing);
        Ok(self.remote(state))
    }

    async fn delete_file(&self, name: &str) -> anyhow::Result<()> {
        self.record(&format!("delete:{name}"));
        Ok(())
    }

    async fn generate(&self, prompt: &str, media: Option<&RemoteFile>) -> anyhow::Result<String> {
        self.record("generate");
        self.prompts
            .lock()
            .unwrap()
            .push((prompt.to_string(), media.map(|m| m.name.clone())));
        if self.fail_generate {
            anyhow::bail!("quota exceeded");
        }
        Ok(self.verdict.clone())
    }
}

#[derive(Default)]
pub struct FakeExtractor {
    pub urls: Mutex<Vec<String>>,
}

#[async_trait]
impl PageExtractor for FakeExtractor {
    async fn extract(&self, url: &str) -> String {
        self.urls.lock().unwrap().push(url.to_string());
        format!("excerpt of {url}")
    }
}
