pub mod telegram;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

/// Telegram rejects messages above 4096 characters
pub const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn default_mime_type(self) -> &'static str {
        match self {
            MediaKind::Photo => "image/jpeg",
            MediaKind::Video => "video/mp4",
        }
    }

    pub fn file_suffix(self) -> &'static str {
        match self {
            MediaKind::Photo => ".jpg",
            MediaKind::Video => ".mp4",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Photo => write!(f, "photo"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// A photo or video hosted by the chat platform, not yet downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    /// Platform-specific file identifier used to download the content
    pub file_id: String,
    /// Size in bytes as reported by the platform
    pub size: u64,
    pub mime_type: Option<String>,
}

impl MediaRef {
    pub fn mime_type(&self) -> &str {
        self.mime_type
            .as_deref()
            .unwrap_or_else(|| self.kind.default_mime_type())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// Plain text, possibly containing links
    Text(String),
    Media {
        media: MediaRef,
        caption: Option<String>,
    },
}

/// A message received from the chat platform
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Display name of the sender, used for logging
    pub user_name: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    /// Text is already rendered as Telegram HTML
    Html,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    /// The platform could not parse the rich-text entities of the message.
    #[error("formatting rejected: {0}")]
    UnsupportedFormatting(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The outbound side of one incoming message: a single status message that
/// is edited in place, follow-up messages, and access to hosted files.
#[async_trait]
pub trait ChatSession: Send {
    /// Replace the text of the status message, sending it first if this
    /// session has not posted one yet.
    async fn edit_status(&mut self, text: &str, format: TextFormat) -> Result<(), ReplyError>;

    /// Send an additional message after the status message.
    async fn send_followup(&mut self, text: &str, format: TextFormat) -> Result<(), ReplyError>;

    /// Download a hosted file into `dest`, which already exists and is empty.
    async fn download_file(&mut self, file_id: &str, dest: &Path) -> anyhow::Result<()>;
}

/// Deliver a model reply: the first chunk replaces the status message, the
/// rest follow as new messages. Each chunk is tried as HTML and falls back to
/// the identical plain text when the platform rejects the formatting.
pub async fn deliver_reply(session: &mut dyn ChatSession, text: &str) -> Result<(), ReplyError> {
    for (index, chunk) in split_message(text, MAX_MESSAGE_CHARS).iter().enumerate() {
        let html = render_html(chunk);
        let first = index == 0;

        let rich = if first {
            session.edit_status(&html, TextFormat::Html).await
        } else {
            session.send_followup(&html, TextFormat::Html).await
        };

        match rich {
            Err(ReplyError::UnsupportedFormatting(reason)) => {
                debug!("Rich text rejected ({}), resending as plain text", reason);
                if first {
                    session.edit_status(chunk, TextFormat::Plain).await?;
                } else {
                    session.send_followup(chunk, TextFormat::Plain).await?;
                }
            }
            other => other?,
        }
    }
    Ok(())
}

/// Escape `text` for Telegram HTML and turn balanced `**bold**` markers into
/// `<b>` tags. An unpaired trailing marker is kept literally.
pub fn render_html(text: &str) -> String {
    let escaped = html_escape::encode_text(text);
    let pieces: Vec<&str> = escaped.split("**").collect();
    let balanced = pieces.len() % 2 == 1;

    let mut out = String::with_capacity(escaped.len() + pieces.len() * 4);
    for (i, piece) in pieces.iter().enumerate() {
        if i > 0 {
            if !balanced && i == pieces.len() - 1 {
                out.push_str("**");
            } else if i % 2 == 1 {
                out.push_str("<b>");
            } else {
                out.push_str("</b>");
            }
        }
        out.push_str(piece);
    }
    out
}

/// Split long messages for Telegram's character limit, preferring newline
/// and then space boundaries. Lengths are counted in characters.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        // Byte offset just past the first `max_chars` characters
        let end = rest
            .char_indices()
            .nth(max_chars)
            .map(|(pos, _)| pos)
            .unwrap_or(rest.len());

        let actual_end = if end < rest.len() {
            rest[..end]
                .rfind('\n')
                .or_else(|| rest[..end].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(rest[..actual_end].to_string());
        rest = &rest[actual_end..];
    }

    chunks
}
