use log::warn;

/// Token estimation strategy. Deliberately decoupled from any provider
/// tokenizer; implementations must be deterministic and conservative.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// Rough character-ratio heuristic: assume ~`chars_per_token` characters
/// per token and round up. Good enough for budgeting with headroom.
pub struct HeuristicEstimator {
    chars_per_token: usize,
}

impl HeuristicEstimator {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count() / self.chars_per_token + 1
    }
}

/// A token-budget-bounded contiguous slice of the transcript.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub lines: Vec<String>,
    pub token_estimate: usize,
    pub index: usize,
}

impl Chunk {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Greedy bin-packing of rendered lines into chunks under `budget` tokens.
/// A line is never split across chunks; a single line that alone exceeds
/// the budget is isolated in its own chunk and flagged in the log rather
/// than dropped or truncated.
pub fn build_chunks(lines: &[String], budget: usize, estimator: &dyn TokenEstimator) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;

    let seal = |lines: &mut Vec<String>, tokens: &mut usize, chunks: &mut Vec<Chunk>| {
        if !lines.is_empty() {
            chunks.push(Chunk {
                lines: std::mem::take(lines),
                token_estimate: *tokens,
                index: chunks.len(),
            });
            *tokens = 0;
        }
    };

    for line in lines {
        let line_tokens = estimator.estimate(line);

        if line_tokens > budget {
            // Oversized line: seal whatever is pending, then isolate it.
            seal(&mut current, &mut current_tokens, &mut chunks);
            warn!(
                "⚠️ Transcript line of ~{} tokens exceeds the chunk budget of {}, isolating it",
                line_tokens, budget
            );
            chunks.push(Chunk {
                lines: vec![line.clone()],
                token_estimate: line_tokens,
                index: chunks.len(),
            });
            continue;
        }

        if current_tokens + line_tokens > budget {
            seal(&mut current, &mut current_tokens, &mut chunks);
        }
        current.push(line.clone());
        current_tokens += line_tokens;
    }
    seal(&mut current, &mut current_tokens, &mut chunks);

    chunks
}
