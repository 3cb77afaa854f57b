use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, MessageId, ParseMode};
use teloxide::utils::command::BotCommands;
use teloxide::{ApiError, RequestError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::agent::FactChecker;
use crate::config::TelegramConfig;
use crate::platform::{
    ChatSession, IncomingMessage, MediaKind, MediaRef, MessageContent, ReplyError, TextFormat,
};

const WELCOME: &str = "👋 Welcome to the <b>AI Fact-Checker Bot</b>!\n\n\
     I can help you identify fake news, deepfakes, and misleading posts. \
     Here is what you can send me:\n\
     🔗 <b>Links:</b> Send a news article or blog post URL.\n\
     📝 <b>Text:</b> Forward suspicious messages or claims.\n\
     📸 <b>Images:</b> Send photos (with or without captions) to check for manipulation.\n\
     🎥 <b>Videos:</b> Send short video clips to analyze the context.\n\n\
     Send me something to verify!";

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
enum Command {
    #[command(description = "Show what the bot can check.")]
    Start,
    #[command(description = "Show what the bot can check.")]
    Help,
}

/// Status message and file access for one incoming Telegram message.
pub struct TelegramSession {
    bot: Bot,
    chat_id: ChatId,
    status: Option<MessageId>,
}

impl TelegramSession {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self {
            bot,
            chat_id,
            status: None,
        }
    }
}

fn classify(err: RequestError) -> ReplyError {
    match err {
        RequestError::Api(api @ ApiError::CantParseEntities(..)) => {
            ReplyError::UnsupportedFormatting(api.to_string())
        }
        other => ReplyError::Other(anyhow::Error::new(other).context("Telegram request failed")),
    }
}

/// An unchanged edit is not a failure: the status already shows `text`.
fn edit_outcome<T>(result: Result<T, RequestError>) -> Result<(), ReplyError> {
    match result {
        Ok(_) => Ok(()),
        Err(RequestError::Api(ApiError::MessageNotModified)) => {
            debug!("Status message unchanged");
            Ok(())
        }
        Err(e) => Err(classify(e)),
    }
}

fn parse_mode(format: TextFormat) -> Option<ParseMode> {
    match format {
        TextFormat::Plain => None,
        TextFormat::Html => Some(ParseMode::Html),
    }
}

impl TelegramSession {
    async fn send(&self, text: &str, format: TextFormat) -> Result<Message, ReplyError> {
        let mut request = self.bot.send_message(self.chat_id, text);
        if let Some(mode) = parse_mode(format) {
            request = request.parse_mode(mode);
        }
        request.await.map_err(classify)
    }
}

#[async_trait]
impl ChatSession for TelegramSession {
    async fn edit_status(&mut self, text: &str, format: TextFormat) -> Result<(), ReplyError> {
        let Some(message_id) = self.status else {
            let sent = self.send(text, format).await?;
            self.status = Some(sent.id);
            return Ok(());
        };

        let mut request = self.bot.edit_message_text(self.chat_id, message_id, text);
        if let Some(mode) = parse_mode(format) {
            request = request.parse_mode(mode);
        }
        edit_outcome(request.await)
    }

    async fn send_followup(&mut self, text: &str, format: TextFormat) -> Result<(), ReplyError> {
        self.send(text, format).await.map(|_| ())
    }

    async fn download_file(&mut self, file_id: &str, dest: &Path) -> Result<()> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .context("Failed to look up file on Telegram")?;

        let mut out = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to open {}", dest.display()))?;
        self.bot
            .download_file(&file.path, &mut out)
            .await
            .context("Failed to download file from Telegram")?;
        out.flush().await.context("Failed to flush downloaded file")?;
        Ok(())
    }
}

/// Map a Telegram message to the content the fact checker understands.
/// Photos resolve to their largest size.
fn incoming_message(msg: &Message) -> Option<IncomingMessage> {
    let content = if let Some(text) = msg.text() {
        MessageContent::Text(text.to_string())
    } else if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        MessageContent::Media {
            media: MediaRef {
                kind: MediaKind::Photo,
                file_id: photo.file.id.0.clone(),
                size: u64::from(photo.file.size),
                mime_type: None,
            },
            caption: msg.caption().map(str::to_string),
        }
    } else if let Some(video) = msg.video() {
        MessageContent::Media {
            media: MediaRef {
                kind: MediaKind::Video,
                file_id: video.file.id.0.clone(),
                size: u64::from(video.file.size),
                mime_type: video.mime_type.as_ref().map(ToString::to_string),
            },
            caption: msg.caption().map(str::to_string),
        }
    } else {
        return None;
    };

    let user_name = msg
        .from
        .as_ref()
        .map(|user| user.first_name.clone())
        .unwrap_or_else(|| "unknown".to_string());

    Some(IncomingMessage { user_name, content })
}

/// An empty allowlist admits everyone; otherwise the sender must be listed.
fn is_allowed(allowed_user_ids: &[u64], sender: Option<u64>) -> bool {
    allowed_user_ids.is_empty() || sender.is_some_and(|id| allowed_user_ids.contains(&id))
}

/// Slash-prefixed text that did not parse as a known [`Command`].
fn is_unknown_command(text: Option<&str>) -> bool {
    text.is_some_and(|t| t.starts_with('/'))
}

/// Run the Telegram bot until interrupted
pub async fn run(checker: Arc<FactChecker>, config: TelegramConfig) -> Result<()> {
    let bot = Bot::new(&config.bot_token);
    let allowed_user_ids = Arc::new(config.allowed_user_ids);

    info!("Starting Telegram platform...");

    let handler = Update::filter_message()
        .filter(move |msg: Message| {
            let allowed = is_allowed(&allowed_user_ids, msg.from.as_ref().map(|user| user.id.0));
            if !allowed {
                debug!("Ignoring message from unlisted user in chat {}", msg.chat.id.0);
            }
            allowed
        })
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(
            dptree::filter(|msg: Message| is_unknown_command(msg.text())).endpoint(ignore_command),
        )
        .branch(dptree::endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![checker])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_command(bot: Bot, msg: Message, cmd: Command) -> ResponseResult<()> {
    match cmd {
        Command::Start | Command::Help => {
            bot.send_message(msg.chat.id, WELCOME)
                .parse_mode(ParseMode::Html)
                .await?;
        }
    }
    Ok(())
}

/// Unknown commands are never fact-checked
async fn ignore_command() -> ResponseResult<()> {
    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, checker: Arc<FactChecker>) -> ResponseResult<()> {
    let Some(incoming) = incoming_message(&msg) else {
        return Ok(());
    };

    let mut session = TelegramSession::new(bot, msg.chat.id);
    checker.handle(&mut session, incoming).await;
    Ok(())
}
