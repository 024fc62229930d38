use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serenity::http::Http;
use serenity::model::id::{ChannelId, MessageId};
use tokio_retry::RetryIf;

use crate::config::SummarizerConfig;
use crate::error::FetchError;

// Discord caps history pages at 100 messages per request
const PAGE_LIMIT: usize = 100;

/// One message as fetched from the platform, before any filtering.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: u64,
    pub author_id: u64,
    pub author_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_bot: bool,
    pub attachments: Vec<String>,
    pub reply_to: Option<ReplyContext>,
}

/// The message a reply points at, as far as the transcript needs it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyContext {
    pub author_name: String,
    pub content: String,
}

/// How far back to read the channel.
#[derive(Debug, Clone)]
pub enum FetchWindow {
    /// At most this many messages, newest first.
    Count(usize),
    /// Everything at or after this instant.
    Since(DateTime<Utc>),
}

/// Seam over the platform's paged history API so the fetch loop can be
/// tested against scripted pages.
#[async_trait]
pub trait HistorySource: Sync {
    /// Return up to `limit` messages strictly older than `before`
    /// (or the newest messages when `before` is `None`), newest first.
    async fn page_before(
        &self,
        channel: ChannelId,
        before: Option<MessageId>,
        limit: u8,
    ) -> Result<Vec<RawMessage>, FetchError>;
}

/// Production source backed by serenity's HTTP client.
pub struct DiscordHistory<'a> {
    http: &'a Http,
}

impl<'a> DiscordHistory<'a> {
    pub fn new(http: &'a Http) -> Self {
        Self { http }
    }
}

#[async_trait]
impl HistorySource for DiscordHistory<'_> {
    async fn page_before(
        &self,
        channel: ChannelId,
        before: Option<MessageId>,
        limit: u8,
    ) -> Result<Vec<RawMessage>, FetchError> {
        let messages = channel
            .messages(self.http, |retriever| {
                let retriever = retriever.limit(u64::from(limit));
                match before {
                    Some(id) => retriever.before(id),
                    None => retriever,
                }
            })
            .await
            .map_err(map_serenity_error)?;

        Ok(messages.into_iter().map(raw_from_discord).collect())
    }
}

fn raw_from_discord(msg: serenity::model::channel::Message) -> RawMessage {
    // Prefer the guild nickname when Discord sent member data along
    let author_name = msg
        .member
        .as_ref()
        .and_then(|m| m.nick.clone())
        .unwrap_or_else(|| msg.author.name.clone());

    let timestamp = DateTime::<Utc>::from_timestamp(msg.timestamp.unix_timestamp(), 0)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    // Replies carry the referenced message along; bot-authored references
    // add no conversational context worth quoting.
    let reply_to = msg
        .referenced_message
        .as_deref()
        .filter(|referenced| !referenced.author.bot)
        .map(|referenced| ReplyContext {
            author_name: referenced
                .member
                .as_ref()
                .and_then(|m| m.nick.clone())
                .unwrap_or_else(|| referenced.author.name.clone()),
            content: referenced.content.clone(),
        });

    RawMessage {
        id: msg.id.0,
        author_id: msg.author.id.0,
        author_name,
        content: msg.content,
        timestamp,
        is_bot: msg.author.bot,
        attachments: msg.attachments.into_iter().map(|a| a.filename).collect(),
        reply_to,
    }
}

fn map_serenity_error(err: serenity::Error) -> FetchError {
    if let serenity::Error::Http(http_err) = &err {
        if let serenity::http::HttpError::UnsuccessfulRequest(resp) = http_err.as_ref() {
            return match resp.status_code.as_u16() {
                429 => FetchError::RateLimited { retry_after: None },
                401 | 403 => FetchError::PermissionDenied,
                _ => FetchError::TransientNetwork(err.to_string()),
            };
        }
    }
    FetchError::TransientNetwork(err.to_string())
}

/// Read the requested window of channel history, newest first from the
/// platform, and return it in chronological order. `before` anchors the
/// window (pass the invoking message's id so the command itself is not
/// summarized). The configured fetch ceiling bounds the total regardless
/// of what the caller asked for. Transient page failures are retried with
/// jittered exponential backoff; permission failures are not.
pub async fn fetch_window<S: HistorySource>(
    source: &S,
    channel: ChannelId,
    window: &FetchWindow,
    before: Option<MessageId>,
    config: &SummarizerConfig,
) -> Result<Vec<RawMessage>, FetchError> {
    let ceiling = config.max_fetch_messages;
    let target = match window {
        FetchWindow::Count(n) => (*n).min(ceiling),
        FetchWindow::Since(_) => ceiling,
    };

    let mut collected: Vec<RawMessage> = Vec::new();
    let mut before = before;

    'paging: while collected.len() < target {
        let remaining = target - collected.len();
        let page_size = remaining.min(PAGE_LIMIT) as u8;

        let page = RetryIf::spawn(
            config.retry_delays(),
            || source.page_before(channel, before, page_size),
            FetchError::is_retryable,
        )
        .await?;

        if page.is_empty() {
            break;
        }
        debug!("📄 Fetched history page of {} messages", page.len());

        // Pages arrive newest first; the page's last entry is the cursor
        // for the next (older) page.
        before = page.last().map(|m| MessageId(m.id));

        for msg in page {
            if let FetchWindow::Since(cutoff) = window {
                if msg.timestamp < *cutoff {
                    break 'paging;
                }
            }
            collected.push(msg);
            if collected.len() >= target {
                break 'paging;
            }
        }
    }

    collected.reverse();
    info!(
        "📥 Fetched {} raw messages from channel {}",
        collected.len(),
        channel
    );
    Ok(collected)
}
