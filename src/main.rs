mod chunk;
mod config;
mod error;
mod fetch;
mod llm;
mod pipeline;
mod ratelimit;
mod reduce;
mod respond;
mod summarize;
mod transcript;

use serenity::{
    async_trait,
    client::{Client, Context, EventHandler},
    framework::standard::{macros::group, StandardFramework},
    model::gateway::Ready,
    model::id::UserId,
    prelude::GatewayIntents,
    prelude::TypeMapKey,
};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;

use crate::config::{load_summarizer_config, SummarizerConfig};
use crate::ratelimit::RateLimiter;
use crate::summarize::SUM_COMMAND;

// TypeMap key for the validated pipeline configuration
pub struct SummarizerConfigKey;
impl TypeMapKey for SummarizerConfigKey {
    type Value = Arc<SummarizerConfig>;
}

// TypeMap key for the model-endpoint rate limiter shared by all runs
pub struct ModelLimiterKey;
impl TypeMapKey for ModelLimiterKey {
    type Value = Arc<RateLimiter>;
}

// TypeMap key for per-user command cooldown bookkeeping
pub struct CooldownMap;
impl TypeMapKey for CooldownMap {
    type Value = HashMap<UserId, Vec<Instant>>;
}

#[group]
#[commands(sum)]
struct General;

struct Handler;

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _: Context, ready: Ready) {
        println!("✅ Bot connected as {}!", ready.user.name);
        log::info!("📊 Connected to {} guilds", ready.guilds.len());
    }
}

// Read botconfig.txt (DISCORD_TOKEN, PREFIX) with multi-path fallback and
// export the keys as environment variables.
fn load_bot_config() -> Result<(), String> {
    let config_paths = [
        "botconfig.txt",
        "../botconfig.txt",
        "../../botconfig.txt",
        "src/botconfig.txt",
    ];

    env::remove_var("DISCORD_TOKEN");
    env::remove_var("PREFIX");

    for config_path in &config_paths {
        if let Ok(content) = fs::read_to_string(config_path) {
            // Remove BOM if present
            let content = content.strip_prefix('\u{feff}').unwrap_or(&content);

            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some(equals_pos) = line.find('=') {
                    let key = line[..equals_pos].trim();
                    let value = line[equals_pos + 1..].trim();
                    env::set_var(key, value);
                }
            }

            println!("✅ Configuration loaded from {}", config_path);
            return Ok(());
        }
    }

    Err("No botconfig.txt file found in any expected location (., .., ../.., src/)".to_string())
}

#[tokio::main]
async fn main() {
    // Initialize logger - must be done before any logging calls
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error"))
        .format_timestamp_secs()
        .init();

    if let Err(error) = load_bot_config() {
        log::error!("❌ Failed to load botconfig.txt: {}", error);
        eprintln!("❌ Failed to load botconfig.txt: {}", error);
        eprintln!("Create a botconfig.txt file in the project root with: DISCORD_TOKEN=your_token_here and PREFIX=^");
        return;
    }

    let token = match env::var("DISCORD_TOKEN") {
        Ok(token) if token != "YOUR_BOT_TOKEN_HERE" && !token.is_empty() => token,
        Ok(_) => {
            log::error!("❌ DISCORD_TOKEN in botconfig.txt is set to placeholder value");
            eprintln!("❌ DISCORD_TOKEN in botconfig.txt is set to placeholder! Replace with your actual Discord bot token.");
            return;
        }
        Err(_) => {
            log::error!("❌ DISCORD_TOKEN not found in botconfig.txt file");
            eprintln!("❌ DISCORD_TOKEN not found in botconfig.txt file!");
            return;
        }
    };

    // The pipeline configuration is validated before the client starts so a
    // broken sumbotconf.txt fails fast instead of on the first command.
    let summarizer_config = match load_summarizer_config() {
        Ok(config) => Arc::new(config),
        Err(error) => {
            log::error!("❌ Invalid summarizer configuration: {}", error);
            eprintln!("❌ Invalid summarizer configuration: {}", error);
            return;
        }
    };

    let limiter = Arc::new(RateLimiter::new(
        summarizer_config.rate_limit_per_minute,
        summarizer_config.rate_limit_burst,
    ));

    let prefix = env::var("PREFIX").unwrap_or_else(|_| "^".to_string());
    println!("🤖 Starting summarizer bot with prefix: '{}'", prefix);

    let framework = StandardFramework::new()
        .configure(|c| {
            c.prefix(&prefix)
                .case_insensitivity(true)
                .no_dm_prefix(true)
                .with_whitespace(true)
        })
        .after(|_ctx, msg, command_name, result| {
            Box::pin(async move {
                if let Err(e) = result {
                    log::error!(
                        "❌ Command '{}' failed for user {} ({}): {:?}",
                        command_name,
                        msg.author.name,
                        msg.author.id,
                        e
                    );
                }
            })
        })
        .group(&GENERAL_GROUP);

    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;

    let mut client = match Client::builder(token, intents)
        .event_handler(Handler)
        .framework(framework)
        .await
    {
        Ok(client) => client,
        Err(e) => {
            log::error!("❌ Error creating Discord client: {:?}", e);
            eprintln!("❌ Error creating Discord client: {:?}", e);
            eprintln!("Check your token in botconfig.txt file");
            return;
        }
    };

    {
        let mut data = client.data.write().await;
        data.insert::<SummarizerConfigKey>(Arc::clone(&summarizer_config));
        data.insert::<ModelLimiterKey>(limiter);
        data.insert::<CooldownMap>(HashMap::new());
    }

    println!("🚀 Bot is running... press Ctrl+C to stop");
    tokio::select! {
        _ = signal::ctrl_c() => {
            println!("\n⏹️ Stopping bot gracefully...");
        }
        result = client.start() => {
            if let Err(why) = result {
                log::error!("❌ Client error: {:?}", why);
                eprintln!("❌ Client error: {:?}", why);
            }
        }
    }

    println!("👋 Bot shutdown complete");
}
