use log::info;
use serenity::model::id::{ChannelId, MessageId};

use crate::chunk::{build_chunks, TokenEstimator};
use crate::config::SummarizerConfig;
use crate::error::SummarizeError;
use crate::fetch::{fetch_window, FetchWindow, HistorySource};
use crate::llm::ModelClient;
use crate::reduce::{ReduceEngine, SummarizationResult};
use crate::transcript::preprocess;

/// Result of one summarization invocation. An empty window is a normal
/// outcome, not an error.
#[derive(Debug)]
pub enum RunOutcome {
    Summary(SummarizationResult),
    NoMessages,
}

/// One full run: fetch the window, normalize it, chunk it, map/reduce it.
/// The caller owns the wall-clock ceiling (wrap this future in
/// `tokio::time::timeout`); dropping the future cancels any in-flight
/// network calls.
pub async fn run<S: HistorySource>(
    source: &S,
    channel: ChannelId,
    window: &FetchWindow,
    before: Option<MessageId>,
    client: &dyn ModelClient,
    estimator: &dyn TokenEstimator,
    config: &SummarizerConfig,
) -> Result<RunOutcome, SummarizeError> {
    let raw = fetch_window(source, channel, window, before, config).await?;
    let lines = preprocess(raw);
    if lines.is_empty() {
        info!("📭 Channel {} had no summarizable messages in the window", channel);
        return Ok(RunOutcome::NoMessages);
    }
    let source_messages = lines.len();

    let rendered: Vec<String> = lines.iter().map(|line| line.render()).collect();
    let chunks = build_chunks(&rendered, config.chunk_token_budget, estimator);
    info!(
        "✂️ {} transcript lines packed into {} chunks",
        source_messages,
        chunks.len()
    );

    let engine = ReduceEngine::new(client, estimator, config);
    let result = engine.run(chunks, source_messages).await?;
    Ok(RunOutcome::Summary(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::HeuristicEstimator;
    use crate::error::ModelError;
    use crate::fetch::RawMessage;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedHistory {
        messages: Vec<RawMessage>,
    }

    #[async_trait]
    impl HistorySource for FixedHistory {
        async fn page_before(
            &self,
            _channel: ChannelId,
            before: Option<serenity::model::id::MessageId>,
            limit: u8,
        ) -> Result<Vec<RawMessage>, crate::error::FetchError> {
            // Newest first, like the platform
            let mut newest_first: Vec<RawMessage> =
                self.messages.iter().rev().cloned().collect();
            if let Some(cursor) = before {
                newest_first.retain(|m| m.id < cursor.0);
            }
            newest_first.truncate(limit as usize);
            Ok(newest_first)
        }
    }

    struct CountingClient {
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl CountingClient {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelClient for CountingClient {
        async fn complete(
            &self,
            _instruction: &str,
            content: &str,
            _max_tokens: usize,
        ) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(content.to_string());
            Ok("a tidy summary".to_string())
        }
    }

    fn msg(id: u64, content: &str) -> RawMessage {
        RawMessage {
            id,
            author_id: 7,
            author_name: "alice".to_string(),
            content: content.to_string(),
            timestamp: DateTime::<Utc>::from_timestamp(1_000 + id as i64, 0).unwrap(),
            is_bot: false,
            attachments: Vec::new(),
            reply_to: None,
        }
    }

    fn config() -> SummarizerConfig {
        let mut config = SummarizerConfig::default();
        config.backoff_base_ms = 1;
        config
    }

    #[tokio::test]
    async fn empty_window_is_no_messages_with_zero_model_calls() {
        let source = FixedHistory { messages: vec![] };
        let client = CountingClient::new();
        let estimator = HeuristicEstimator::new(4);

        let outcome = run(
            &source,
            ChannelId(1),
            &FetchWindow::Count(50),
            None,
            &client,
            &estimator,
            &config(),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, RunOutcome::NoMessages));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bot_only_history_is_also_no_messages() {
        let mut only_bots = vec![msg(1, "beep"), msg(2, "boop")];
        for m in &mut only_bots {
            m.is_bot = true;
        }
        let source = FixedHistory {
            messages: only_bots,
        };
        let client = CountingClient::new();
        let estimator = HeuristicEstimator::new(4);

        let outcome = run(
            &source,
            ChannelId(1),
            &FetchWindow::Count(50),
            None,
            &client,
            &estimator,
            &config(),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, RunOutcome::NoMessages));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn small_history_flows_end_to_end() {
        let messages: Vec<RawMessage> = (1..=20)
            .map(|id| msg(id, &format!("talking about topic number {}", id)))
            .collect();
        let source = FixedHistory { messages };
        let client = CountingClient::new();
        let estimator = HeuristicEstimator::new(4);

        let outcome = run(
            &source,
            ChannelId(1),
            &FetchWindow::Count(20),
            None,
            &client,
            &estimator,
            &config(),
        )
        .await
        .unwrap();

        let result = match outcome {
            RunOutcome::Summary(result) => result,
            RunOutcome::NoMessages => panic!("expected a summary"),
        };
        assert_eq!(result.summary, "a tidy summary");
        assert_eq!(result.source_messages, 20);
        // 20 short lines fit one chunk: one map call plus one reduce call
        assert_eq!(result.chunks_processed, 1);
        assert_eq!(result.model_calls, 2);

        // The first model call sees the rendered transcript in order
        let seen = client.seen.lock().unwrap();
        assert!(seen[0].contains("alice: talking about topic number 1"));
        assert!(seen[0].contains("alice: talking about topic number 20"));
        let first = seen[0].find("topic number 1\n").unwrap();
        let last = seen[0].find("topic number 20").unwrap();
        assert!(first < last);
    }

    #[tokio::test]
    async fn fetch_failure_surfaces_as_a_fetch_error() {
        struct DeniedHistory;

        #[async_trait]
        impl HistorySource for DeniedHistory {
            async fn page_before(
                &self,
                _channel: ChannelId,
                _before: Option<serenity::model::id::MessageId>,
                _limit: u8,
            ) -> Result<Vec<RawMessage>, crate::error::FetchError> {
                Err(crate::error::FetchError::PermissionDenied)
            }
        }

        let client = CountingClient::new();
        let estimator = HeuristicEstimator::new(4);

        let err = run(
            &DeniedHistory,
            ChannelId(1),
            &FetchWindow::Count(50),
            None,
            &client,
            &estimator,
            &config(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            SummarizeError::Fetch(crate::error::FetchError::PermissionDenied)
        ));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }
}
