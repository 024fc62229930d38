use std::time::Duration;
use thiserror::Error;

/// Errors raised while reading channel history from Discord.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Discord rate limited the history request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("missing permission to read the channel history")]
    PermissionDenied,

    #[error("transient network failure while fetching history: {0}")]
    TransientNetwork(String),
}

impl FetchError {
    /// Retryable categories back off locally; `PermissionDenied` never does.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::PermissionDenied)
    }
}

/// Errors raised by a single model invocation (or its retry envelope).
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model provider rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("model provider rejected credentials: {0}")]
    Auth(String),

    #[error("model provider quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("transient network failure calling the model: {0}")]
    TransientNetwork(String),

    #[error("model returned an empty or unparseable response")]
    EmptyOutput,

    #[error("model output invalid after retry")]
    InvalidOutput,

    #[error("model unavailable after exhausting retries")]
    Unavailable,
}

impl ModelError {
    /// Only these categories are retried with backoff. Auth and quota
    /// failures surface immediately; invalid output has its own single
    /// same-prompt retry in the client.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ModelError::RateLimited { .. } | ModelError::TransientNetwork(_)
        )
    }
}

/// Terminal failure taxonomy for one summarization run.
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("failed to fetch channel history: {0}")]
    Fetch(#[from] FetchError),

    #[error("summarization of chunk {chunk_index} failed: {source}")]
    ChunkSummarizationFailed {
        chunk_index: usize,
        #[source]
        source: ModelError,
    },

    #[error("reduction did not converge within {rounds} rounds")]
    ReductionDidNotConverge { rounds: usize },

    #[error("summarization service unavailable after retries")]
    SummarizationUnavailable,

    #[error("model produced invalid output")]
    ModelOutputInvalid,

    #[error("model provider authentication failed: {0}")]
    AuthFailed(String),

    #[error("model provider quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("summarization run exceeded its time ceiling")]
    RunTimedOut,
}

impl From<ModelError> for SummarizeError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Unavailable
            | ModelError::RateLimited { .. }
            | ModelError::TransientNetwork(_) => SummarizeError::SummarizationUnavailable,
            ModelError::InvalidOutput | ModelError::EmptyOutput => {
                SummarizeError::ModelOutputInvalid
            }
            ModelError::Auth(msg) => SummarizeError::AuthFailed(msg),
            ModelError::QuotaExhausted(msg) => SummarizeError::QuotaExhausted(msg),
        }
    }
}

impl SummarizeError {
    /// Short message shown in the channel; full detail goes to the log.
    pub fn user_message(&self) -> String {
        match self {
            SummarizeError::Fetch(FetchError::PermissionDenied) => {
                "❌ I don't have permission to read this channel's history.".to_string()
            }
            SummarizeError::Fetch(_) => {
                "❌ Couldn't fetch the channel history. Please try again in a moment.".to_string()
            }
            SummarizeError::ChunkSummarizationFailed { .. }
            | SummarizeError::SummarizationUnavailable => {
                "❌ The summarization service is unavailable right now. Please try again later."
                    .to_string()
            }
            SummarizeError::ReductionDidNotConverge { .. }
            | SummarizeError::ModelOutputInvalid => {
                "❌ Failed to produce a usable summary for this conversation.".to_string()
            }
            SummarizeError::AuthFailed(_) | SummarizeError::QuotaExhausted(_) => {
                "❌ Summarization is misconfigured or out of quota. Please contact an admin."
                    .to_string()
            }
            SummarizeError::RunTimedOut => {
                "⏰ Summarization took too long and was cancelled. Try a smaller window."
                    .to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_model_errors_are_retryable() {
        assert!(ModelError::RateLimited { retry_after: None }.is_transient());
        assert!(ModelError::TransientNetwork("reset".into()).is_transient());
        assert!(!ModelError::Auth("bad key".into()).is_transient());
        assert!(!ModelError::QuotaExhausted("0 left".into()).is_transient());
        assert!(!ModelError::EmptyOutput.is_transient());
    }

    #[test]
    fn permission_denied_is_not_retryable() {
        assert!(!FetchError::PermissionDenied.is_retryable());
        assert!(FetchError::RateLimited { retry_after: None }.is_retryable());
        assert!(FetchError::TransientNetwork("timeout".into()).is_retryable());
    }

    #[test]
    fn model_errors_map_into_run_taxonomy() {
        assert!(matches!(
            SummarizeError::from(ModelError::Unavailable),
            SummarizeError::SummarizationUnavailable
        ));
        assert!(matches!(
            SummarizeError::from(ModelError::InvalidOutput),
            SummarizeError::ModelOutputInvalid
        ));
        assert!(matches!(
            SummarizeError::from(ModelError::Auth("k".into())),
            SummarizeError::AuthFailed(_)
        ));
    }

    #[test]
    fn every_error_has_a_user_message() {
        let errors = vec![
            SummarizeError::Fetch(FetchError::PermissionDenied),
            SummarizeError::ChunkSummarizationFailed {
                chunk_index: 3,
                source: ModelError::Unavailable,
            },
            SummarizeError::ReductionDidNotConverge { rounds: 4 },
            SummarizeError::SummarizationUnavailable,
            SummarizeError::ModelOutputInvalid,
            SummarizeError::RunTimedOut,
        ];
        for e in errors {
            assert!(!e.user_message().is_empty());
        }
    }
}
