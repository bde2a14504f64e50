use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    /// The bot's own user id, used to tag its messages as `model` turns.
    pub bot_id: Option<u64>,
    pub guild_id: Option<u64>,
    pub database_url: String,
    pub database_pool_size: u32,
    pub embedding_url: String,
    /// Expected vector length. When unset, vectors only have to agree with
    /// each other within a response.
    pub embedding_dimensions: Option<usize>,
    pub embedding_timeout_secs: u64,
    // Caller-side retry policy for the embedding service
    pub embedding_max_attempts: u32,
    pub embedding_retry_backoff_ms: u64,
    // Indexing settings
    pub history_page_size: u8,
    pub index_batch_size: usize,
    // Retrieval settings
    pub search_limit: usize,
    pub user_history_limit: usize,
    pub thread_history_window: u8,
    pub thread_cache_capacity: usize,
}

pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:5000/embed-batch";

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let history_page_size: u8 = env_or("HISTORY_PAGE_SIZE", 100);
        if history_page_size == 0 || history_page_size > 100 {
            anyhow::bail!("HISTORY_PAGE_SIZE must be between 1 and 100");
        }

        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            bot_id: env::var("BOT_ID").ok().and_then(|id| id.parse().ok()),
            guild_id: env::var("GUILD_ID").ok().and_then(|id| id.parse().ok()),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "data/meng.db".to_string()),
            database_pool_size: env_or("DATABASE_POOL_SIZE", 4),
            embedding_url: env::var("EMBEDDING_URL")
                .unwrap_or_else(|_| DEFAULT_EMBEDDING_URL.to_string()),
            embedding_dimensions: env::var("EMBEDDING_DIMENSIONS")
                .ok()
                .and_then(|d| d.parse().ok()),
            embedding_timeout_secs: env_or("EMBEDDING_TIMEOUT_SECS", 30),
            embedding_max_attempts: env_or("EMBEDDING_MAX_ATTEMPTS", 1),
            embedding_retry_backoff_ms: env_or("EMBEDDING_RETRY_BACKOFF_MS", 500),
            history_page_size,
            index_batch_size: env_or::<usize>("INDEX_BATCH_SIZE", 100).max(1),
            search_limit: env_or("SEARCH_LIMIT", 10),
            user_history_limit: env_or("USER_HISTORY_LIMIT", 100),
            thread_history_window: env_or("THREAD_HISTORY_WINDOW", 100).clamp(1, 100),
            thread_cache_capacity: env_or("THREAD_CACHE_CAPACITY", 1000),
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("bot_id", &self.bot_id)
            .field("guild_id", &self.guild_id)
            .field("database_url", &self.database_url)
            .field("database_pool_size", &self.database_pool_size)
            .field("embedding_url", &self.embedding_url)
            .field("embedding_dimensions", &self.embedding_dimensions)
            .field("embedding_timeout_secs", &self.embedding_timeout_secs)
            .field("embedding_max_attempts", &self.embedding_max_attempts)
            .field(
                "embedding_retry_backoff_ms",
                &self.embedding_retry_backoff_ms,
            )
            .field("history_page_size", &self.history_page_size)
            .field("index_batch_size", &self.index_batch_size)
            .field("search_limit", &self.search_limit)
            .field("user_history_limit", &self.user_history_limit)
            .field("thread_history_window", &self.thread_history_window)
            .field("thread_cache_capacity", &self.thread_cache_capacity)
            .finish()
    }
}
