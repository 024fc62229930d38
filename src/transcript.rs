use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::fetch::RawMessage;

// Quoted reply context is clipped to this many characters
const REPLY_EXCERPT_CHARS: usize = 100;

static USER_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@!?\d+>").expect("user mention regex"));
static ROLE_MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"<@&\d+>").expect("role mention regex"));
static CHANNEL_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<#\d+>").expect("channel mention regex"));

/// One kept message rendered down to a single logical transcript line.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedLine {
    pub timestamp: DateTime<Utc>,
    pub author_name: String,
    pub text: String,
    pub reply: Option<ReplyNote>,
}

/// Who a reply answers and a short quote of what was said.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyNote {
    pub author_name: String,
    pub excerpt: String,
}

impl NormalizedLine {
    /// The textual form handed to the model, e.g. `[08-29 14:03] alice: hi`
    /// or `[08-29 14:05] bob (replying to alice: "hi"): hello`.
    pub fn render(&self) -> String {
        let stamp = self.timestamp.format("%m-%d %H:%M");
        match &self.reply {
            Some(reply) => format!(
                "[{}] {} (replying to {}: \"{}\"): {}",
                stamp, self.author_name, reply.author_name, reply.excerpt, self.text
            ),
            None => format!("[{}] {}: {}", stamp, self.author_name, self.text),
        }
    }
}

/// Turn raw history into the normalized transcript: drop bot and empty
/// messages, dedupe by message id, scrub control characters and mention
/// tokens, collapse whitespace, and order chronologically (message id breaks
/// timestamp ties). Pure and deterministic.
pub fn preprocess(messages: Vec<RawMessage>) -> Vec<NormalizedLine> {
    let mut kept: Vec<(u64, NormalizedLine)> = messages
        .into_iter()
        .filter(|msg| !msg.is_bot)
        .filter_map(|msg| {
            let text = render_body(&msg);
            if text.is_empty() {
                return None;
            }
            let reply = msg.reply_to.as_ref().and_then(|r| {
                let cleaned = clean_text(&r.content);
                if cleaned.is_empty() {
                    return None;
                }
                Some(ReplyNote {
                    author_name: r.author_name.clone(),
                    excerpt: excerpt_of(&cleaned),
                })
            });
            Some((
                msg.id,
                NormalizedLine {
                    timestamp: msg.timestamp,
                    author_name: msg.author_name,
                    text,
                    reply,
                },
            ))
        })
        .collect();

    // Sorting before deduping makes the result independent of the order in
    // which duplicate deliveries arrived; the id set catches duplicates
    // even when their timestamps disagree.
    kept.sort_by(|a, b| {
        a.1.timestamp
            .cmp(&b.1.timestamp)
            .then_with(|| a.0.cmp(&b.0))
    });
    let mut seen = HashSet::new();
    kept.retain(|(id, _)| seen.insert(*id));

    kept.into_iter().map(|(_, line)| line).collect()
}

fn excerpt_of(text: &str) -> String {
    if text.chars().count() <= REPLY_EXCERPT_CHARS {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(REPLY_EXCERPT_CHARS).collect();
    clipped.push_str("...");
    clipped
}

fn render_body(msg: &RawMessage) -> String {
    let mut text = clean_text(&msg.content);

    if !msg.attachments.is_empty() {
        let listing = format!("(attached: {})", msg.attachments.join(", "));
        if text.is_empty() {
            text = listing;
        } else {
            text.push(' ');
            text.push_str(&listing);
        }
    }
    text
}

/// Strip control characters, neutralize mention tokens so reposting the
/// summary cannot ping anyone, and collapse runs of whitespace.
fn clean_text(raw: &str) -> String {
    let without_controls: String = raw
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();

    let scrubbed = USER_MENTION.replace_all(&without_controls, "@user");
    let scrubbed = ROLE_MENTION.replace_all(&scrubbed, "@role");
    let scrubbed = CHANNEL_MENTION.replace_all(&scrubbed, "#channel");

    scrubbed.split_whitespace().collect::<Vec<_>>().join(" ")
}
