use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::config::MediaConfig;
use crate::llm::{FileState, InferenceProvider, RemoteFile};
use crate::platform::{ChatSession, MediaKind, MediaRef, ReplyError, TextFormat};

const UPLOADING_STATUS: &str = "☁️ Uploading media to Gemini AI for analysis...";
const PROCESSING_STATUS: &str =
    "⚙️ Processing video frames and audio (this may take a few seconds)...";

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("This video is too large. Telegram bots can only process files up to {}MB.", format_mib(.limit))]
    TooLarge { size: u64, limit: u64 },
    #[error("Gemini failed to process the video.")]
    ProcessingFailed,
    #[error("Gemini did not finish processing the video after {attempts} status checks.")]
    ProcessingTimedOut { attempts: u32 },
    #[error(transparent)]
    Reply(#[from] ReplyError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

const MIB: u64 = 1024 * 1024;

/// Whole mebibytes print without a fraction, anything else to one decimal.
fn format_mib(bytes: &u64) -> String {
    let bytes = *bytes;
    if bytes % MIB == 0 {
        (bytes / MIB).to_string()
    } else {
        format!("{:.1}", bytes as f64 / MIB as f64)
    }
}

/// How long to wait for the provider to finish processing a video.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` polls until the provider reports a terminal state
    pub max_attempts: Option<u32>,
}

impl From<&MediaConfig> for PollPolicy {
    fn from(config: &MediaConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_attempts: config.max_poll_attempts,
        }
    }
}

/// Media that has been downloaded locally and uploaded to the provider.
/// Must be handed back to [`MediaStager::release`] once analysis is done.
#[derive(Debug)]
pub struct StagedMedia {
    pub remote: RemoteFile,
    local: TempPath,
}

impl StagedMedia {
    pub fn local_path(&self) -> &std::path::Path {
        &self.local
    }
}

pub struct MediaStager {
    provider: Arc<dyn InferenceProvider>,
    max_video_bytes: u64,
    poll: PollPolicy,
}

impl MediaStager {
    pub fn new(provider: Arc<dyn InferenceProvider>, config: &MediaConfig) -> Self {
        Self {
            provider,
            max_video_bytes: config.max_video_bytes,
            poll: PollPolicy::from(config),
        }
    }

    /// Videos above the platform download limit are refused up front.
    pub fn check_size(&self, media: &MediaRef) -> Result<(), StageError> {
        if media.kind == MediaKind::Video && media.size > self.max_video_bytes {
            return Err(StageError::TooLarge {
                size: media.size,
                limit: self.max_video_bytes,
            });
        }
        Ok(())
    }

    /// Download `media` to a temporary file, upload it to the provider and,
    /// for videos, wait until the provider has processed it.
    ///
    /// On error nothing is left behind: the temporary file is removed when
    /// dropped and an uploaded file is deleted from the provider.
    pub async fn stage(
        &self,
        session: &mut dyn ChatSession,
        media: &MediaRef,
    ) -> Result<StagedMedia, StageError> {
        self.check_size(media)?;

        let local = tempfile::Builder::new()
            .prefix("factcheck-")
            .suffix(media.kind.file_suffix())
            .tempfile()
            .context("Failed to create temporary file")?
            .into_temp_path();

        session
            .download_file(&media.file_id, &local)
            .await
            .with_context(|| format!("Failed to download {}", media.kind))?;
        debug!("Downloaded {} to {}", media.kind, local.display());

        session
            .edit_status(UPLOADING_STATUS, TextFormat::Plain)
            .await?;
        let remote = self.provider.upload_file(&local, media.mime_type()).await?;
        info!("Uploaded {} as {}", media.kind, remote.name);

        match self.await_ready(session, media.kind, remote.clone()).await {
            Ok(remote) => Ok(StagedMedia { remote, local }),
            Err(e) => {
                self.delete_remote(&remote.name).await;
                Err(e)
            }
        }
    }

    async fn await_ready(
        &self,
        session: &mut dyn ChatSession,
        kind: MediaKind,
        mut remote: RemoteFile,
    ) -> Result<RemoteFile, StageError> {
        // Photos are usable as soon as the upload returns
        if kind != MediaKind::Video {
            return Ok(remote);
        }

        session
            .edit_status(PROCESSING_STATUS, TextFormat::Plain)
            .await?;

        let mut attempts = 0u32;
        while remote.state == FileState::Processing {
            if self.poll.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(StageError::ProcessingTimedOut { attempts });
            }
            tokio::time::sleep(self.poll.interval).await;
            remote = self.provider.get_file(&remote.name).await?;
            attempts += 1;
            debug!(
                "Poll {} for {}: state {:?}",
                attempts, remote.name, remote.state
            );
        }

        if remote.state == FileState::Failed {
            return Err(StageError::ProcessingFailed);
        }
        Ok(remote)
    }

    /// Delete the provider copy and the local file. Failures are logged only.
    pub async fn release(&self, staged: StagedMedia) {
        self.delete_remote(&staged.remote.name).await;

        let path = staged.local_path().to_path_buf();
        match staged.local.close() {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }

    async fn delete_remote(&self, name: &str) {
        match self.provider.delete_file(name).await {
            Ok(()) => debug!("Deleted remote file {}", name),
            Err(e) => warn!("Failed to delete remote file {}: {:#}", name, e),
        }
    }
}
