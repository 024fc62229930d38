use chrono::{Duration as ChronoDuration, Utc};
use log::{error, info, warn};
use serenity::client::Context;
use serenity::framework::standard::{macros::command, Args, CommandResult};
use serenity::model::channel::Message;
use std::time::{Duration, Instant};

use crate::chunk::HeuristicEstimator;
use crate::config::SummarizerConfig;
use crate::error::SummarizeError;
use crate::fetch::{DiscordHistory, FetchWindow};
use crate::llm::{HttpChatApi, SummarizerClient};
use crate::pipeline::{self, RunOutcome};
use crate::respond::split_for_posting;
use crate::{CooldownMap, ModelLimiterKey, SummarizerConfigKey};

// Messages summarized when the command is invoked with no argument
const DEFAULT_COUNT: usize = 50;

/// What the user asked for, before it is anchored to a wall-clock instant.
#[derive(Debug, PartialEq, Eq)]
enum WindowRequest {
    Count(usize),
    Back(ChronoDuration),
}

fn usage(config: &SummarizerConfig) -> String {
    format!(
        "**Usage:** `^sum [count | <n>m | <n>h | <n>d]`, e.g. `^sum 100` or `^sum 2h`. \
         Counts must be between {} and {}.",
        config.min_requested_messages, config.max_requested_messages
    )
}

fn parse_request(input: &str, config: &SummarizerConfig) -> Result<WindowRequest, String> {
    let input = input.trim();
    if input.is_empty() {
        let default = DEFAULT_COUNT.clamp(
            config.min_requested_messages,
            config.max_requested_messages,
        );
        return Ok(WindowRequest::Count(default));
    }

    if let Ok(count) = input.parse::<usize>() {
        if count < config.min_requested_messages || count > config.max_requested_messages {
            return Err(format!(
                "Please request between {} and {} messages.",
                config.min_requested_messages, config.max_requested_messages
            ));
        }
        return Ok(WindowRequest::Count(count));
    }

    if let Some(unit) = input.chars().last() {
        let value = &input[..input.len() - unit.len_utf8()];
        if let Ok(amount) = value.parse::<i64>() {
            if amount > 0 {
                match unit {
                    'm' => return Ok(WindowRequest::Back(ChronoDuration::minutes(amount))),
                    'h' => return Ok(WindowRequest::Back(ChronoDuration::hours(amount))),
                    'd' => return Ok(WindowRequest::Back(ChronoDuration::days(amount))),
                    _ => {}
                }
            }
        }
    }

    Err(usage(config))
}

/// Sliding-window cooldown bookkeeping. Returns how long the user still has
/// to wait, or records this use and returns `None`.
fn cooldown_remaining(
    history: &mut Vec<Instant>,
    now: Instant,
    window: Duration,
    max_uses: usize,
) -> Option<Duration> {
    history.retain(|t| now.saturating_duration_since(*t) < window);
    if history.len() >= max_uses {
        // Entries are in insertion order, so the front expires first
        let oldest = history[0];
        return Some(window - now.saturating_duration_since(oldest));
    }
    history.push(now);
    None
}

#[command]
#[aliases("summarize")]
pub async fn sum(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let started = Instant::now();
    info!(
        "📝 Sum command from {} ({}) in channel {}",
        msg.author.name, msg.author.id, msg.channel_id
    );

    let (config, limiter) = {
        let data = ctx.data.read().await;
        let config = data
            .get::<SummarizerConfigKey>()
            .cloned()
            .ok_or("summarizer configuration missing from client data")?;
        let limiter = data
            .get::<ModelLimiterKey>()
            .cloned()
            .ok_or("model rate limiter missing from client data")?;
        (config, limiter)
    };

    let request = match parse_request(args.message(), &config) {
        Ok(request) => request,
        Err(reply) => {
            msg.reply(ctx, &reply).await?;
            return Ok(());
        }
    };

    // The guild owner is exempt from the cooldown
    let exempt = msg
        .guild(&ctx.cache)
        .map(|guild| guild.owner_id == msg.author.id)
        .unwrap_or(false);
    if !exempt {
        let wait = {
            let mut data = ctx.data.write().await;
            let cooldowns = data
                .get_mut::<CooldownMap>()
                .ok_or("cooldown map missing from client data")?;
            let history = cooldowns.entry(msg.author.id).or_default();
            cooldown_remaining(
                history,
                Instant::now(),
                config.cooldown_window,
                config.cooldown_max_uses,
            )
        };
        if let Some(wait) = wait {
            warn!(
                "⏳ User {} hit the summarize cooldown ({}s left)",
                msg.author.id,
                wait.as_secs()
            );
            msg.reply(
                ctx,
                &format!(
                    "⏳ You're summarizing too often. Try again in about {} seconds.",
                    wait.as_secs().max(1)
                ),
            )
            .await?;
            return Ok(());
        }
    }

    let window = match request {
        WindowRequest::Count(n) => FetchWindow::Count(n),
        WindowRequest::Back(span) => FetchWindow::Since(Utc::now() - span),
    };

    let mut progress = msg.reply(ctx, "🔄 Collecting messages and summarizing...").await?;

    let api = match HttpChatApi::new(&config) {
        Ok(api) => api,
        Err(e) => {
            error!("❌ Failed to build the model HTTP client: {}", e);
            progress
                .edit(ctx, |m| {
                    m.content("🛠️ The summarizer is unavailable right now. Try again later.")
                })
                .await?;
            return Ok(());
        }
    };
    let client = SummarizerClient::new(api, limiter, &config);
    let estimator = HeuristicEstimator::new(config.chars_per_token);
    let source = DiscordHistory::new(&ctx.http);

    let outcome = match tokio::time::timeout(
        config.run_timeout,
        pipeline::run(
            &source,
            msg.channel_id,
            &window,
            Some(msg.id),
            &client,
            &estimator,
            &config,
        ),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(SummarizeError::RunTimedOut),
    };

    match outcome {
        Ok(RunOutcome::NoMessages) => {
            progress
                .edit(ctx, |m| {
                    m.content("📭 Nothing to summarize in that window.")
                })
                .await?;
        }
        Ok(RunOutcome::Summary(result)) => {
            info!(
                "✅ Summarized {} messages in {:.1?}: {} chunks, {} rounds, {} model calls ({} raw attempts)",
                result.source_messages,
                started.elapsed(),
                result.chunks_processed,
                result.reduction_rounds,
                result.model_calls,
                client.attempts_made()
            );

            let full = format!(
                "**Summary of the last {} messages:** (requested by <@{}>)\n{}",
                result.source_messages,
                msg.author.id,
                result.summary.trim()
            );
            let limit = config.max_discord_message_length - config.response_format_padding;
            let segments = split_for_posting(&full, limit);
            for (i, segment) in segments.iter().enumerate() {
                if i == 0 {
                    progress.edit(ctx, |m| m.content(segment)).await?;
                } else {
                    msg.channel_id.say(ctx, segment).await?;
                }
            }
        }
        Err(err) => {
            error!(
                "❌ Summarization failed for user {} in channel {}: {:?}",
                msg.author.id, msg.channel_id, err
            );
            progress.edit(ctx, |m| m.content(err.user_message())).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SummarizerConfig {
        SummarizerConfig::default()
    }

    #[test]
    fn empty_argument_uses_the_default_count() {
        assert_eq!(
            parse_request("", &config()).unwrap(),
            WindowRequest::Count(DEFAULT_COUNT)
        );
        assert_eq!(
            parse_request("   ", &config()).unwrap(),
            WindowRequest::Count(DEFAULT_COUNT)
        );
    }

    #[test]
    fn counts_inside_the_bounds_are_accepted() {
        assert_eq!(
            parse_request("100", &config()).unwrap(),
            WindowRequest::Count(100)
        );
        assert_eq!(
            parse_request("5", &config()).unwrap(),
            WindowRequest::Count(5)
        );
        assert_eq!(
            parse_request("200", &config()).unwrap(),
            WindowRequest::Count(200)
        );
    }

    #[test]
    fn counts_outside_the_bounds_are_rejected_with_the_limits() {
        let err = parse_request("3", &config()).unwrap_err();
        assert!(err.contains('5') && err.contains("200"));
        assert!(parse_request("5000", &config()).is_err());
    }

    #[test]
    fn duration_suffixes_parse_to_time_windows() {
        assert_eq!(
            parse_request("90m", &config()).unwrap(),
            WindowRequest::Back(ChronoDuration::minutes(90))
        );
        assert_eq!(
            parse_request("2h", &config()).unwrap(),
            WindowRequest::Back(ChronoDuration::hours(2))
        );
        assert_eq!(
            parse_request("1d", &config()).unwrap(),
            WindowRequest::Back(ChronoDuration::days(1))
        );
    }

    #[test]
    fn garbage_arguments_get_the_usage_line() {
        for bad in ["abc", "12x", "h", "-5m", "0h", "2 h"] {
            let err = parse_request(bad, &config()).unwrap_err();
            assert!(err.contains("Usage"), "{:?} should show usage", bad);
        }
    }

    #[test]
    fn cooldown_admits_up_to_the_limit_then_blocks() {
        let window = Duration::from_secs(600);
        let mut history = Vec::new();
        let base = Instant::now();

        assert!(cooldown_remaining(&mut history, base, window, 3).is_none());
        assert!(cooldown_remaining(&mut history, base, window, 3).is_none());
        assert!(cooldown_remaining(&mut history, base, window, 3).is_none());

        let wait = cooldown_remaining(&mut history, base, window, 3);
        assert!(wait.is_some());
        assert!(wait.unwrap() <= window);
        // The refused use was not recorded
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn cooldown_entries_expire_with_the_window() {
        let window = Duration::from_secs(600);
        let mut history = Vec::new();
        let base = Instant::now();

        for _ in 0..3 {
            assert!(cooldown_remaining(&mut history, base, window, 3).is_none());
        }

        // Past the window, the slate is clean again
        let later = base + window + Duration::from_secs(1);
        assert!(cooldown_remaining(&mut history, later, window, 3).is_none());
        assert_eq!(history.len(), 1);
    }
}
