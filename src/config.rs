use log::{info, warn};
use std::collections::HashMap;
use std::fs;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

/// Pipeline configuration, loaded once at startup from sumbotconf.txt and
/// validated before the Discord client starts. Every key has a default so a
/// missing file still yields a working bot pointed at a local endpoint.
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,

    pub chunk_token_budget: usize,
    pub fragment_max_tokens: usize,
    pub final_max_tokens: usize,
    pub reduce_input_budget: usize,
    pub max_reduction_rounds: usize,
    pub chars_per_token: usize,

    pub call_timeout: Duration,
    pub run_timeout: Duration,
    pub max_retry_attempts: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_delay_ms: u64,

    pub max_fetch_messages: usize,
    pub min_requested_messages: usize,
    pub max_requested_messages: usize,
    pub map_concurrency: usize,

    pub rate_limit_per_minute: u32,
    pub rate_limit_burst: u32,

    pub max_discord_message_length: usize,
    pub response_format_padding: usize,

    pub cooldown_window: Duration,
    pub cooldown_max_uses: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234".to_string(),
            api_key: None,
            model: "mistral-small-latest".to_string(),
            temperature: 0.2,
            chunk_token_budget: 1500,
            fragment_max_tokens: 300,
            final_max_tokens: 450,
            reduce_input_budget: 1500,
            max_reduction_rounds: 4,
            chars_per_token: 4,
            call_timeout: Duration::from_secs(60),
            run_timeout: Duration::from_secs(120),
            max_retry_attempts: 4,
            backoff_base_ms: 100,
            backoff_max_delay_ms: 10_000,
            max_fetch_messages: 400,
            min_requested_messages: 5,
            max_requested_messages: 200,
            map_concurrency: 2,
            rate_limit_per_minute: 20,
            rate_limit_burst: 5,
            max_discord_message_length: 2000,
            response_format_padding: 50,
            cooldown_window: Duration::from_secs(600),
            cooldown_max_uses: 3,
        }
    }
}

impl SummarizerConfig {
    /// Jittered exponential retry delays for transient failures.
    /// `tokio_retry`'s exponential strategy multiplies the base each step,
    /// so the cap keeps late retries from outliving the call timeout.
    pub fn retry_delays(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(self.backoff_base_ms)
            .max_delay(Duration::from_millis(self.backoff_max_delay_ms))
            .map(jitter)
            .take(self.max_retry_attempts.saturating_sub(1))
    }
}

/// Load configuration from sumbotconf.txt using multi-path fallback.
/// Missing file or missing keys fall back to defaults; present keys must
/// parse or loading fails.
pub fn load_summarizer_config() -> Result<SummarizerConfig, String> {
    let config_paths = [
        "sumbotconf.txt",
        "../sumbotconf.txt",
        "../../sumbotconf.txt",
        "src/sumbotconf.txt",
    ];

    let mut map = HashMap::new();
    let mut source = None;

    for path in &config_paths {
        if let Ok(content) = fs::read_to_string(path) {
            // Remove BOM if present
            let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
            map = parse_key_values(content);
            source = Some(*path);
            break;
        }
    }

    match source {
        Some(path) => info!("✅ Summarizer configuration loaded from {}", path),
        None => warn!("⚠️ No sumbotconf.txt found in any expected location, using defaults"),
    }

    let config = apply_overrides(SummarizerConfig::default(), &map)?;
    validate(&config)?;
    Ok(config)
}

fn parse_key_values(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(equals_pos) = line.find('=') {
            let key = line[..equals_pos].trim().to_string();
            let value = line[equals_pos + 1..].trim().to_string();
            map.insert(key, value);
        }
    }
    map
}

fn parse_key<T: std::str::FromStr>(
    map: &HashMap<String, String>,
    key: &str,
    current: T,
) -> Result<T, String> {
    match map.get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("Invalid value '{}' for {}", raw, key)),
        None => Ok(current),
    }
}

fn apply_overrides(
    mut config: SummarizerConfig,
    map: &HashMap<String, String>,
) -> Result<SummarizerConfig, String> {
    if let Some(url) = map.get("LM_BASE_URL") {
        config.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(key) = map.get("LM_API_KEY") {
        if !key.is_empty() {
            config.api_key = Some(key.clone());
        }
    }
    if let Some(model) = map.get("DEFAULT_MODEL") {
        config.model = model.clone();
    }
    config.temperature = parse_key(map, "DEFAULT_TEMPERATURE", config.temperature)?;
    config.chunk_token_budget = parse_key(map, "CHUNK_TOKEN_BUDGET", config.chunk_token_budget)?;
    config.fragment_max_tokens = parse_key(map, "FRAGMENT_MAX_TOKENS", config.fragment_max_tokens)?;
    config.final_max_tokens = parse_key(map, "FINAL_MAX_TOKENS", config.final_max_tokens)?;
    config.reduce_input_budget = parse_key(map, "REDUCE_INPUT_BUDGET", config.reduce_input_budget)?;
    config.max_reduction_rounds =
        parse_key(map, "MAX_REDUCTION_ROUNDS", config.max_reduction_rounds)?;
    config.chars_per_token = parse_key(map, "CHARS_PER_TOKEN", config.chars_per_token)?;
    config.call_timeout = Duration::from_secs(parse_key(
        map,
        "MODEL_CALL_TIMEOUT_SECS",
        config.call_timeout.as_secs(),
    )?);
    config.run_timeout = Duration::from_secs(parse_key(
        map,
        "RUN_TIMEOUT_SECS",
        config.run_timeout.as_secs(),
    )?);
    config.max_retry_attempts = parse_key(map, "MAX_RETRY_ATTEMPTS", config.max_retry_attempts)?;
    config.backoff_base_ms = parse_key(map, "BACKOFF_BASE_MS", config.backoff_base_ms)?;
    config.backoff_max_delay_ms =
        parse_key(map, "BACKOFF_MAX_DELAY_MS", config.backoff_max_delay_ms)?;
    config.max_fetch_messages = parse_key(map, "MAX_FETCH_MESSAGES", config.max_fetch_messages)?;
    config.min_requested_messages =
        parse_key(map, "MIN_REQUESTED_MESSAGES", config.min_requested_messages)?;
    config.max_requested_messages =
        parse_key(map, "MAX_REQUESTED_MESSAGES", config.max_requested_messages)?;
    config.map_concurrency = parse_key(map, "MAP_CONCURRENCY", config.map_concurrency)?;
    config.rate_limit_per_minute =
        parse_key(map, "RATE_LIMIT_PER_MINUTE", config.rate_limit_per_minute)?;
    config.rate_limit_burst = parse_key(map, "RATE_LIMIT_BURST", config.rate_limit_burst)?;
    config.max_discord_message_length = parse_key(
        map,
        "MAX_DISCORD_MESSAGE_LENGTH",
        config.max_discord_message_length,
    )?;
    config.response_format_padding = parse_key(
        map,
        "RESPONSE_FORMAT_PADDING",
        config.response_format_padding,
    )?;
    config.cooldown_window = Duration::from_secs(parse_key(
        map,
        "COOLDOWN_WINDOW_SECS",
        config.cooldown_window.as_secs(),
    )?);
    config.cooldown_max_uses = parse_key(map, "COOLDOWN_MAX_USES", config.cooldown_max_uses)?;
    Ok(config)
}

fn validate(config: &SummarizerConfig) -> Result<(), String> {
    if config.base_url.is_empty() {
        return Err("LM_BASE_URL must not be empty".to_string());
    }
    if config.chunk_token_budget == 0 {
        return Err("CHUNK_TOKEN_BUDGET must be positive".to_string());
    }
    if config.fragment_max_tokens == 0 {
        return Err("FRAGMENT_MAX_TOKENS must be positive".to_string());
    }
    if config.final_max_tokens == 0 {
        return Err("FINAL_MAX_TOKENS must be positive".to_string());
    }
    if config.reduce_input_budget == 0 {
        return Err("REDUCE_INPUT_BUDGET must be positive".to_string());
    }
    if config.max_reduction_rounds == 0 {
        return Err("MAX_REDUCTION_ROUNDS must be positive".to_string());
    }
    if config.chars_per_token == 0 {
        return Err("CHARS_PER_TOKEN must be positive".to_string());
    }
    if config.max_retry_attempts == 0 {
        return Err("MAX_RETRY_ATTEMPTS must be positive".to_string());
    }
    if config.backoff_max_delay_ms == 0 {
        return Err("BACKOFF_MAX_DELAY_MS must be positive".to_string());
    }
    if config.map_concurrency == 0 {
        return Err("MAP_CONCURRENCY must be positive".to_string());
    }
    if config.max_fetch_messages == 0 {
        return Err("MAX_FETCH_MESSAGES must be positive".to_string());
    }
    if config.min_requested_messages > config.max_requested_messages {
        return Err("MIN_REQUESTED_MESSAGES must not exceed MAX_REQUESTED_MESSAGES".to_string());
    }
    if config.rate_limit_per_minute == 0 || config.rate_limit_burst == 0 {
        return Err("rate limit parameters must be positive".to_string());
    }
    if config.max_discord_message_length <= config.response_format_padding {
        return Err("MAX_DISCORD_MESSAGE_LENGTH must exceed RESPONSE_FORMAT_PADDING".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        validate(&SummarizerConfig::default()).unwrap();
    }

    #[test]
    fn overrides_apply_from_key_value_text() {
        let map = parse_key_values(
            "# comment line\n\
             CHUNK_TOKEN_BUDGET=500\n\
             MAP_CONCURRENCY = 4\n\
             LM_BASE_URL=http://10.0.0.2:8080/\n\
             \n\
             DEFAULT_MODEL=test-model",
        );
        let config = apply_overrides(SummarizerConfig::default(), &map).unwrap();
        assert_eq!(config.chunk_token_budget, 500);
        assert_eq!(config.map_concurrency, 4);
        assert_eq!(config.base_url, "http://10.0.0.2:8080");
        assert_eq!(config.model, "test-model");
        // Untouched keys keep their defaults
        assert_eq!(config.max_reduction_rounds, 4);
    }

    #[test]
    fn unparseable_value_is_rejected() {
        let map = parse_key_values("CHUNK_TOKEN_BUDGET=lots");
        let err = apply_overrides(SummarizerConfig::default(), &map).unwrap_err();
        assert!(err.contains("CHUNK_TOKEN_BUDGET"));
    }

    #[test]
    fn default_retry_delays_fit_inside_the_run_ceiling() {
        let config = SummarizerConfig::default();
        let delays: Vec<Duration> = config.retry_delays().collect();

        assert_eq!(delays.len(), config.max_retry_attempts - 1);
        let cap = Duration::from_millis(config.backoff_max_delay_ms);
        for delay in &delays {
            assert!(*delay <= cap, "delay {:?} exceeds the cap {:?}", delay, cap);
        }
        // Even fully serialized retries leave room for real work
        let total: Duration = delays.iter().sum();
        assert!(total < config.run_timeout);
        assert!(total < config.call_timeout);
    }

    #[test]
    fn degenerate_values_fail_validation() {
        let mut config = SummarizerConfig::default();
        config.chunk_token_budget = 0;
        assert!(validate(&config).is_err());

        let mut config = SummarizerConfig::default();
        config.min_requested_messages = 50;
        config.max_requested_messages = 10;
        assert!(validate(&config).is_err());

        let mut config = SummarizerConfig::default();
        config.response_format_padding = config.max_discord_message_length;
        assert!(validate(&config).is_err());
    }
}
