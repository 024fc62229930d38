use futures_util::{stream, StreamExt, TryStreamExt};
use log::{debug, info};

use crate::chunk::{build_chunks, Chunk, TokenEstimator};
use crate::config::SummarizerConfig;
use crate::error::SummarizeError;
use crate::llm::ModelClient;

const MAP_INSTRUCTION: &str = "You are a concise summarizer. Briefly summarize this slice of a \
    Discord conversation, keeping the order of events and who said what. Stick to what was \
    actually said.";

const REDUCE_INSTRUCTION: &str = "You're a friendly group member catching someone up on what \
    they missed in the Discord chat. Combine the partial summaries below into one natural, \
    accurate summary. Keep the order of events, don't invent names or facts, and don't offer \
    follow-up questions. Just deliver the summary and stop.";

/// Where the engine currently is in its map/reduce loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReducePhase {
    Mapping,
    Reducing,
    Done,
    Failed,
}

/// The summary output of one model call.
#[derive(Debug, Clone)]
pub struct SummaryFragment {
    pub index: usize,
    pub text: String,
    pub token_estimate: usize,
}

/// Terminal artifact of a successful run.
#[derive(Debug, Clone)]
pub struct SummarizationResult {
    pub summary: String,
    pub source_messages: usize,
    pub chunks_processed: usize,
    pub reduction_rounds: usize,
    pub model_calls: usize,
}

/// Hierarchical summarization: summarize every chunk independently (map),
/// then summarize the ordered concatenation of the fragments (reduce),
/// re-chunking and recursing while the concatenation stays over budget.
pub struct ReduceEngine<'a> {
    client: &'a dyn ModelClient,
    estimator: &'a dyn TokenEstimator,
    config: &'a SummarizerConfig,
}

impl<'a> ReduceEngine<'a> {
    pub fn new(
        client: &'a dyn ModelClient,
        estimator: &'a dyn TokenEstimator,
        config: &'a SummarizerConfig,
    ) -> Self {
        Self {
            client,
            estimator,
            config,
        }
    }

    pub async fn run(
        &self,
        chunks: Vec<Chunk>,
        source_messages: usize,
    ) -> Result<SummarizationResult, SummarizeError> {
        let chunks_processed = chunks.len();
        let mut model_calls = 0usize;
        let mut rounds = 0usize;
        let mut phase = ReducePhase::Mapping;

        let outcome = self
            .drive(chunks, &mut model_calls, &mut rounds, &mut phase)
            .await;

        match outcome {
            Ok(summary) => {
                info!(
                    "🧮 Reduce engine done: {} chunks, {} rounds, {} model calls",
                    chunks_processed, rounds, model_calls
                );
                Ok(SummarizationResult {
                    summary,
                    source_messages,
                    chunks_processed,
                    reduction_rounds: rounds,
                    model_calls,
                })
            }
            Err(err) => {
                let failed_in = phase;
                phase = ReducePhase::Failed;
                debug!(
                    "💥 Reduce engine entered {:?} during {:?} after {} model calls",
                    phase, failed_in, model_calls
                );
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        chunks: Vec<Chunk>,
        model_calls: &mut usize,
        rounds: &mut usize,
        phase: &mut ReducePhase,
    ) -> Result<String, SummarizeError> {
        *phase = ReducePhase::Mapping;
        let mut fragments = self.map_chunks(&chunks).await?;
        *model_calls += fragments.len();

        *phase = ReducePhase::Reducing;
        loop {
            let combined = fragments
                .iter()
                .map(|f| f.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            let combined_tokens = self.estimator.estimate(&combined);

            if combined_tokens <= self.config.reduce_input_budget {
                *rounds += 1;
                let summary = self
                    .client
                    .complete(REDUCE_INSTRUCTION, &combined, self.config.final_max_tokens)
                    .await
                    .map_err(SummarizeError::from)?;
                *model_calls += 1;
                *phase = ReducePhase::Done;
                return Ok(summary);
            }

            *rounds += 1;
            if *rounds > self.config.max_reduction_rounds {
                return Err(SummarizeError::ReductionDidNotConverge {
                    rounds: self.config.max_reduction_rounds,
                });
            }

            debug!(
                "🔁 Reduction round {}: ~{} tokens of fragments over the {} budget, re-chunking",
                rounds, combined_tokens, self.config.reduce_input_budget
            );
            let texts: Vec<String> = fragments.into_iter().map(|f| f.text).collect();
            let rechunked = build_chunks(&texts, self.config.chunk_token_budget, self.estimator);
            fragments = self.map_chunks(&rechunked).await?;
            *model_calls += fragments.len();
        }
    }

    /// Summarize each chunk with bounded concurrency. Completion order is
    /// free; `buffered` restores original sequence order in the output.
    async fn map_chunks(&self, chunks: &[Chunk]) -> Result<Vec<SummaryFragment>, SummarizeError> {
        let futures: Vec<_> = chunks.iter().map(|chunk| async move {
            let text = self
                .client
                .complete(
                    MAP_INSTRUCTION,
                    &chunk.text(),
                    self.config.fragment_max_tokens,
                )
                .await
                .map_err(|source| SummarizeError::ChunkSummarizationFailed {
                    chunk_index: chunk.index,
                    source,
                })?;
            Ok(SummaryFragment {
                index: chunk.index,
                token_estimate: self.estimator.estimate(&text),
                text,
            })
        }).collect();

        stream::iter(futures)
            .buffered(self.config.map_concurrency.max(1))
            .try_collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::HeuristicEstimator;
    use crate::error::ModelError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes a fixed-length placeholder per call and counts calls.
    struct EchoClient {
        calls: AtomicUsize,
        placeholder: String,
    }

    impl EchoClient {
        fn new(len: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                placeholder: "s".repeat(len),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelClient for EchoClient {
        async fn complete(
            &self,
            _instruction: &str,
            _content: &str,
            _max_tokens: usize,
        ) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.placeholder.clone())
        }
    }

    /// Fails whenever the content contains the poison marker.
    struct PoisonClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelClient for PoisonClient {
        async fn complete(
            &self,
            _instruction: &str,
            content: &str,
            _max_tokens: usize,
        ) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if content.contains("POISON") {
                Err(ModelError::Unavailable)
            } else {
                Ok("fine".to_string())
            }
        }
    }

    fn config() -> SummarizerConfig {
        let mut config = SummarizerConfig::default();
        config.chunk_token_budget = 500;
        config.reduce_input_budget = 500;
        config.map_concurrency = 2;
        config
    }

    fn chunks_of(lines_per_chunk: usize, count: usize) -> Vec<Chunk> {
        let estimator = HeuristicEstimator::new(4);
        let lines: Vec<String> = (0..lines_per_chunk * count).map(|_| "y".repeat(76)).collect();
        let chunks = build_chunks(&lines, 500, &estimator);
        assert_eq!(chunks.len(), count);
        chunks
    }

    #[tokio::test]
    async fn k_chunks_cost_k_map_calls_plus_one_reduce_call() {
        let estimator = HeuristicEstimator::new(4);
        let config = config();
        let client = EchoClient::new(40);
        let engine = ReduceEngine::new(&client, &estimator, &config);

        let chunks = chunks_of(25, 4);
        let result = engine.run(chunks, 100).await.unwrap();

        assert_eq!(client.calls(), 5);
        assert_eq!(result.model_calls, 5);
        assert_eq!(result.chunks_processed, 4);
        assert_eq!(result.reduction_rounds, 1);
    }

    #[tokio::test]
    async fn fifty_short_messages_two_chunks_three_calls() {
        let estimator = HeuristicEstimator::new(4);
        let config = config();
        let client = EchoClient::new(40);
        let engine = ReduceEngine::new(&client, &estimator, &config);

        // 50 lines of ~20 tokens each against a 500-token budget
        let chunks = chunks_of(25, 2);
        let result = engine.run(chunks, 50).await.unwrap();

        assert_eq!(result.chunks_processed, 2);
        assert_eq!(client.calls(), 3);
        assert_eq!(result.model_calls, 3);
        assert_eq!(result.source_messages, 50);
    }

    #[tokio::test]
    async fn oversized_fragments_trigger_another_round() {
        let estimator = HeuristicEstimator::new(4);
        let mut config = config();
        // Fragments of ~100 tokens each; 8 of them never fit a budget of 150,
        // but one re-chunked pass brings the count down far enough.
        config.reduce_input_budget = 150;
        config.chunk_token_budget = 500;
        let client = EchoClient::new(396);
        let engine = ReduceEngine::new(&client, &estimator, &config);

        let chunks = chunks_of(25, 8);
        let result = engine.run(chunks, 200).await.unwrap();

        assert!(result.reduction_rounds >= 2);
        assert!(result.model_calls > 9);
    }

    #[tokio::test]
    async fn never_shrinking_fragments_hit_the_round_ceiling() {
        let estimator = HeuristicEstimator::new(4);
        let mut config = config();
        config.reduce_input_budget = 10;
        config.max_reduction_rounds = 3;
        // Every summary is ~100 tokens, so the concatenation never fits.
        let client = EchoClient::new(396);
        let engine = ReduceEngine::new(&client, &estimator, &config);

        let chunks = chunks_of(25, 2);
        let err = engine.run(chunks, 50).await.unwrap_err();

        assert!(matches!(
            err,
            SummarizeError::ReductionDidNotConverge { rounds: 3 }
        ));
    }

    #[tokio::test]
    async fn chunk_failure_names_the_chunk_and_skips_the_reduce_call() {
        let estimator = HeuristicEstimator::new(4);
        let mut config = config();
        config.map_concurrency = 1;
        let client = PoisonClient {
            calls: AtomicUsize::new(0),
        };
        let engine = ReduceEngine::new(&client, &estimator, &config);

        let lines = vec![
            "a perfectly ordinary line".to_string(),
            format!("POISON {}", "z".repeat(2000)),
        ];
        let chunks = build_chunks(&lines, 500, &estimator);
        assert_eq!(chunks.len(), 2);

        let err = engine.run(chunks, 2).await.unwrap_err();
        match err {
            SummarizeError::ChunkSummarizationFailed { chunk_index, .. } => {
                assert_eq!(chunk_index, 1);
            }
            other => panic!("expected ChunkSummarizationFailed, got {:?}", other),
        }
        // One call per chunk, no reduce call after the failure
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }
}
