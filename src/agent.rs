use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::extractor::PageExtractor;
use crate::llm::{InferenceProvider, RemoteFile};
use crate::platform::{
    deliver_reply, ChatSession, IncomingMessage, MediaRef, MessageContent, ReplyError, TextFormat,
};
use crate::prompt::{self, ExtractedContent};
use crate::staging::{MediaStager, StageError, StagedMedia};

const TEXT_STATUS: &str = "⏳ Analyzing text...";
const TEXT_ANALYSIS_STATUS: &str = "🧠 Fact-checking with Gemini AI...";
const MEDIA_ANALYSIS_STATUS: &str = "🧠 Analyzing media content for manipulation and context...";

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Reply(#[from] ReplyError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CheckError {
    /// Text shown to the user in place of the verdict.
    pub fn user_message(&self) -> String {
        match self {
            CheckError::Stage(
                e @ (StageError::TooLarge { .. }
                | StageError::ProcessingFailed
                | StageError::ProcessingTimedOut { .. }),
            ) => format!("❌ {e}"),
            CheckError::Stage(StageError::Other(e))
            | CheckError::Stage(StageError::Reply(ReplyError::Other(e)))
            | CheckError::Reply(ReplyError::Other(e))
            | CheckError::Other(e) => format!("❌ An error occurred: {e:#}"),
            other => format!("❌ An error occurred: {other}"),
        }
    }
}

/// Runs the fact-checking workflow for one incoming message at a time.
/// Platform-agnostic: talks to the chat through a [`ChatSession`].
pub struct FactChecker {
    provider: Arc<dyn InferenceProvider>,
    extractor: Arc<dyn PageExtractor>,
    stager: MediaStager,
    instruction: String,
}

impl FactChecker {
    pub fn new(
        provider: Arc<dyn InferenceProvider>,
        extractor: Arc<dyn PageExtractor>,
        stager: MediaStager,
        instruction: String,
    ) -> Self {
        Self {
            provider,
            extractor,
            stager,
            instruction,
        }
    }

    /// Handle one message end to end. Failures are reported to the user by
    /// editing the status message and never escape this call.
    pub async fn handle(&self, session: &mut dyn ChatSession, message: IncomingMessage) {
        let result = match message.content {
            MessageContent::Text(text) => {
                info!("Text from {}: {} chars", message.user_name, text.chars().count());
                self.check_text(session, &text).await
            }
            MessageContent::Media { media, caption } => {
                info!(
                    "{} from {} ({} bytes)",
                    media.kind, message.user_name, media.size
                );
                self.check_media(session, &media, caption.as_deref()).await
            }
        };

        let Err(e) = result else {
            return;
        };

        match &e {
            CheckError::Stage(StageError::TooLarge { size, limit }) => {
                info!("Rejected {} byte video (limit {} bytes)", size, limit)
            }
            other => error!("Fact-check failed: {:#}", other),
        }

        if let Err(report_err) = session
            .edit_status(&e.user_message(), TextFormat::Plain)
            .await
        {
            error!("Failed to report error to user: {:#}", report_err);
        }
    }

    async fn check_text(&self, session: &mut dyn ChatSession, text: &str) -> Result<(), CheckError> {
        session.edit_status(TEXT_STATUS, TextFormat::Plain).await?;

        let urls = prompt::find_urls(text);
        let mut extracted = Vec::with_capacity(urls.len());
        if !urls.is_empty() {
            session
                .edit_status(
                    &format!(
                        "🔗 Found {} link(s). Extracting webpage content...",
                        urls.len()
                    ),
                    TextFormat::Plain,
                )
                .await?;
            for url in urls {
                extracted.push(ExtractedContent {
                    url: url.to_string(),
                    text: self.extractor.extract(url).await,
                });
            }
        }

        let prompt = prompt::text_prompt(&self.instruction, text, &extracted);

        session
            .edit_status(TEXT_ANALYSIS_STATUS, TextFormat::Plain)
            .await?;
        let verdict = self.analyze(&prompt, None).await?;
        deliver_reply(session, &verdict).await?;
        Ok(())
    }

    async fn check_media(
        &self,
        session: &mut dyn ChatSession,
        media: &MediaRef,
        caption: Option<&str>,
    ) -> Result<(), CheckError> {
        self.stager.check_size(media)?;

        session
            .edit_status(&format!("📥 Downloading {}...", media.kind), TextFormat::Plain)
            .await?;

        let staged = self.stager.stage(session, media).await?;
        let outcome = self.analyze_staged(session, media, &staged, caption).await;
        self.stager.release(staged).await;
        outcome
    }

    async fn analyze_staged(
        &self,
        session: &mut dyn ChatSession,
        media: &MediaRef,
        staged: &StagedMedia,
        caption: Option<&str>,
    ) -> Result<(), CheckError> {
        session
            .edit_status(MEDIA_ANALYSIS_STATUS, TextFormat::Plain)
            .await?;

        let prompt = prompt::media_prompt(&self.instruction, media.kind, caption);
        let verdict = self.analyze(&prompt, Some(&staged.remote)).await?;
        deliver_reply(session, &verdict).await?;
        Ok(())
    }

    /// Send the prompt, with an optional staged file, and return the raw reply.
    async fn analyze(&self, prompt: &str, media: Option<&RemoteFile>) -> Result<String> {
        info!(
            "Requesting verdict ({} prompt chars, media: {})",
            prompt.chars().count(),
            media.map_or("none", |m| m.name.as_str())
        );
        let verdict = self.provider.generate(prompt, media).await?;
        info!("Verdict received: {} chars", verdict.chars().count());
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;
    use crate::llm::FileState;
    use crate::platform::MediaKind;
    use crate::testing::{FakeExtractor, FakeProvider, FakeSession};

    const VERDICT: &str = "🚨 **Verdict:** Fake\n\n📝 **Explanation:** Made up.";

    fn checker(provider: Arc<FakeProvider>, extractor: Arc<FakeExtractor>) -> FactChecker {
        let stager = MediaStager::new(
            provider.clone(),
            &MediaConfig {
                poll_interval_ms: 0,
                ..MediaConfig::default()
            },
        );
        FactChecker::new(provider, extractor, stager, "INSTRUCTION".to_string())
    }

    fn text(body: &str) -> IncomingMessage {
        IncomingMessage {
            user_name: "alice".to_string(),
            content: MessageContent::Text(body.to_string()),
        }
    }

    fn media(kind: MediaKind, size: u64, caption: Option<&str>) -> IncomingMessage {
        IncomingMessage {
            user_name: "bob".to_string(),
            content: MessageContent::Media {
                media: MediaRef {
                    kind,
                    file_id: "file-1".to_string(),
                    size,
                    mime_type: None,
                },
                caption: caption.map(str::to_string),
            },
        }
    }

    #[tokio::test]
    async fn test_text_with_link_scenario() {
        let provider = Arc::new(FakeProvider::new(VERDICT));
        let extractor = Arc::new(FakeExtractor::default());
        let mut session = FakeSession::default();

        checker(provider.clone(), extractor.clone())
            .handle(
                &mut session,
                text("Is this claim true? https://example.com/article"),
            )
            .await;

        assert_eq!(
            *extractor.urls.lock().unwrap(),
            vec!["https://example.com/article"]
        );

        let prompts = provider.prompts();
        assert_eq!(prompts.len(), 1);
        let (prompt, media) = &prompts[0];
        assert!(media.is_none());
        assert!(prompt.starts_with("INSTRUCTION"));
        assert!(prompt.contains("Is this claim true? https://example.com/article"));
        assert!(prompt.contains(
            "--- Content from https://example.com/article ---\nexcerpt of https://example.com/article"
        ));

        assert_eq!(
            session.status_texts()[..3],
            [
                TEXT_STATUS,
                "🔗 Found 1 link(s). Extracting webpage content...",
                TEXT_ANALYSIS_STATUS
            ]
        );
        let (last, format) = session.last_status().unwrap();
        assert!(last.starts_with("🚨"));
        assert_eq!(format, TextFormat::Html);
    }

    #[tokio::test]
    async fn test_links_extracted_serially_in_order() {
        let provider = Arc::new(FakeProvider::new(VERDICT));
        let extractor = Arc::new(FakeExtractor::default());
        let mut session = FakeSession::default();

        checker(provider.clone(), extractor.clone())
            .handle(
                &mut session,
                text("compare https://a.example/1 with https://b.example/2"),
            )
            .await;

        assert_eq!(
            *extractor.urls.lock().unwrap(),
            vec!["https://a.example/1", "https://b.example/2"]
        );
        assert!(session
            .status_texts()
            .contains(&"🔗 Found 2 link(s). Extracting webpage content..."));
    }

    #[tokio::test]
    async fn test_plain_text_skips_extraction() {
        let provider = Arc::new(FakeProvider::new(VERDICT));
        let extractor = Arc::new(FakeExtractor::default());
        let mut session = FakeSession::default();

        checker(provider.clone(), extractor.clone())
            .handle(&mut session, text("Vaccines contain microchips"))
            .await;

        assert!(extractor.urls.lock().unwrap().is_empty());
        assert_eq!(provider.calls(), vec!["generate"]);
        assert_eq!(
            session.status_texts()[..2],
            [TEXT_STATUS, TEXT_ANALYSIS_STATUS]
        );
    }

    #[tokio::test]
    async fn test_oversized_video_scenario() {
        let provider = Arc::new(FakeProvider::new(VERDICT));
        let mut session = FakeSession::default();

        checker(provider.clone(), Arc::new(FakeExtractor::default()))
            .handle(&mut session, media(MediaKind::Video, 25 * 1024 * 1024, None))
            .await;

        assert!(session.downloads.is_empty());
        assert!(provider.calls().is_empty());
        assert_eq!(
            session.status_texts(),
            vec!["❌ This video is too large. Telegram bots can only process files up to 20MB."]
        );
    }

    #[tokio::test]
    async fn test_video_dispatched_after_third_poll() {
        let provider = Arc::new(
            FakeProvider::new(VERDICT)
                .with_upload_state(FileState::Processing)
                .with_poll_states(vec![
                    FileState::Processing,
                    FileState::Processing,
                    FileState::Active,
                ]),
        );
        let mut session = FakeSession::default();

        checker(provider.clone(), Arc::new(FakeExtractor::default()))
            .handle(
                &mut session,
                media(MediaKind::Video, 5 * 1024 * 1024, Some("Flood in Paris")),
            )
            .await;

        assert_eq!(
            provider.calls(),
            vec![
                "upload",
                "get_file",
                "get_file",
                "get_file",
                "generate",
                "delete:files/fake-1"
            ]
        );
        let (prompt, media_name) = &provider.prompts()[0];
        assert!(prompt.contains("Here is a video shared by the user. User's caption: 'Flood in Paris'."));
        assert_eq!(media_name.as_deref(), Some("files/fake-1"));

        assert_eq!(session.status_texts()[0], "📥 Downloading video...");
        assert!(session.last_status().unwrap().0.starts_with("🚨"));
        assert!(!session.downloads[0].exists());
    }

    #[tokio::test]
    async fn test_photo_cleanup_after_analysis_error() {
        let provider = Arc::new(FakeProvider::new(VERDICT).failing_generate());
        let mut session = FakeSession::default();

        checker(provider.clone(), Arc::new(FakeExtractor::default()))
            .handle(&mut session, media(MediaKind::Photo, 100_000, None))
            .await;

        assert_eq!(
            provider.calls(),
            vec!["upload", "generate", "delete:files/fake-1"]
        );
        assert!(!session.downloads[0].exists());
        assert_eq!(
            session.last_status(),
            Some((
                "❌ An error occurred: quota exceeded".to_string(),
                TextFormat::Plain
            ))
        );
    }

    #[tokio::test]
    async fn test_video_processing_failure_reported() {
        let provider = Arc::new(
            FakeProvider::new(VERDICT)
                .with_upload_state(FileState::Processing)
                .with_poll_states(vec![FileState::Failed]),
        );
        let mut session = FakeSession::default();

        checker(provider.clone(), Arc::new(FakeExtractor::default()))
            .handle(&mut session, media(MediaKind::Video, 1024, None))
            .await;

        assert!(!provider.calls().contains(&"generate".to_string()));
        assert!(!session.downloads[0].exists());
        assert_eq!(
            session.last_status().unwrap().0,
            "❌ Gemini failed to process the video."
        );
    }

    #[tokio::test]
    async fn test_rejected_formatting_delivers_same_text() {
        let provider = Arc::new(FakeProvider::new(VERDICT));
        let mut session = FakeSession {
            reject_html: true,
            ..FakeSession::default()
        };

        checker(provider, Arc::new(FakeExtractor::default()))
            .handle(&mut session, text("claim"))
            .await;

        assert_eq!(
            session.last_status(),
            Some((VERDICT.to_string(), TextFormat::Plain))
        );
    }

    #[tokio::test]
    async fn test_text_analysis_error_reported() {
        let provider = Arc::new(FakeProvider::new(VERDICT).failing_generate());
        let mut session = FakeSession::default();

        checker(provider, Arc::new(FakeExtractor::default()))
            .handle(&mut session, text("claim"))
            .await;

        assert_eq!(
            session.last_status().unwrap().0,
            "❌ An error occurred: quota exceeded"
        );
    }

    #[test]
    fn test_reply_failure_keeps_error_chain() {
        let cause = || {
            ReplyError::Other(
                anyhow::anyhow!("Bad Request: message is too long").context("Telegram request failed"),
            )
        };
        let expected = "❌ An error occurred: Telegram request failed: Bad Request: message is too long";

        assert_eq!(CheckError::Reply(cause()).user_message(), expected);
        assert_eq!(
            CheckError::Stage(StageError::Reply(cause())).user_message(),
            expected
        );
    }
}
