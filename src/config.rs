use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// Default configuration constants
const DEFAULT_API_BASE_URL: &str = "https://slack.com/api";
const DEFAULT_CHANNEL_PREFIX: &str = "forum-";
const DEFAULT_TTL_USERS_HOURS: u64 = 24;
const DEFAULT_TTL_CHANNELS_HOURS: u64 = 24;
const DEFAULT_TTL_MESSAGES_MINUTES: u64 = 30;
const DEFAULT_HISTORY_DAYS: u64 = 90;
const DEFAULT_PAGE_SIZE: u32 = 200;
const DEFAULT_MAX_PAGES_PER_CHANNEL: u32 = 20;
const DEFAULT_THREAD_REFRESH_DAYS: u64 = 14;
const DEFAULT_SYNC_INTERVAL_MINUTES: u64 = 30;
const DEFAULT_RECENCY_HALF_LIFE_DAYS: f64 = 90.0;
const DEFAULT_MAX_LIMIT: usize = 50;
const DEFAULT_ANSWER_WEIGHT: f64 = 3.0;
const DEFAULT_QUESTION_WEIGHT: f64 = 0.5;
const DEFAULT_MESSAGE_WEIGHT: f64 = 1.0;
const DEFAULT_REACTION_WEIGHT: f64 = 0.5;
const DEFAULT_MAX_REACTIONS: u32 = 10;
const DEFAULT_EXPERT_HALF_LIFE_DAYS: f64 = 90.0;
const DEFAULT_EXPERT_LOOKBACK_DAYS: u64 = 365;
const DEFAULT_EXPERT_MAX_CANDIDATES: usize = 500;
const DEFAULT_DOCS_TTL_HOURS: u64 = 24;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
const DEFAULT_MAX_DELAY_MS: u64 = 60000;
const DEFAULT_EXPONENTIAL_BASE: f64 = 2.0;
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_MAX_IDLE_PER_HOST: i32 = 10;
const DEFAULT_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 50;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub slack: SlackConfig,
    pub forum: ForumConfig,
    pub cache: CacheConfig,
    pub index: IndexConfig,
    pub search: SearchConfig,
    pub experts: ExpertsConfig,
    #[serde(default)]
    pub docs: DocsConfig,
    pub retry: RetryConfig,
    pub connection: ConnectionConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlackConfig {
    pub bot_token: Option<String>,
    pub user_token: Option<String>,
    pub api_base_url: String,
    #[serde(default)]
    pub workspace_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForumConfig {
    pub channel_prefix: String,
    pub include_private: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    pub data_path: String,
    pub ttl_users_hours: u64,
    pub ttl_channels_hours: u64,
    pub ttl_messages_minutes: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    pub history_days: u64,
    pub page_size: u32,
    pub max_pages_per_channel: u32,
    pub thread_refresh_days: u64,
    pub sync_interval_minutes: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    pub recency_half_life_days: f64,
    pub max_limit: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExpertsConfig {
    pub answer_weight: f64,
    pub question_weight: f64,
    pub message_weight: f64,
    pub reaction_weight: f64,
    pub max_reactions: u32,
    pub half_life_days: f64,
    pub lookback_days: u64,
    pub max_candidates: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocsConfig {
    #[serde(default)]
    pub sources: Vec<DocSource>,
    #[serde(default = "default_docs_ttl")]
    pub ttl_hours: u64,
}

/// An external documentation index: `index_url` serves a JSON array of
/// `{title, url, content}` objects.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DocSource {
    pub name: String,
    pub index_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    pub timeout_seconds: u64,
    pub max_idle_per_host: i32,
    pub pool_idle_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
}

fn default_docs_ttl() -> u64 {
    DEFAULT_DOCS_TTL_HOURS
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            user_token: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            workspace_url: None,
        }
    }
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            include_private: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_path: String::new(),
            ttl_users_hours: DEFAULT_TTL_USERS_HOURS,
            ttl_channels_hours: DEFAULT_TTL_CHANNELS_HOURS,
            ttl_messages_minutes: DEFAULT_TTL_MESSAGES_MINUTES,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            history_days: DEFAULT_HISTORY_DAYS,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages_per_channel: DEFAULT_MAX_PAGES_PER_CHANNEL,
            thread_refresh_days: DEFAULT_THREAD_REFRESH_DAYS,
            sync_interval_minutes: DEFAULT_SYNC_INTERVAL_MINUTES,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            recency_half_life_days: DEFAULT_RECENCY_HALF_LIFE_DAYS,
            max_limit: DEFAULT_MAX_LIMIT,
        }
    }
}

impl Default for ExpertsConfig {
    fn default() -> Self {
        Self {
            answer_weight: DEFAULT_ANSWER_WEIGHT,
            question_weight: DEFAULT_QUESTION_WEIGHT,
            message_weight: DEFAULT_MESSAGE_WEIGHT,
            reaction_weight: DEFAULT_REACTION_WEIGHT,
            max_reactions: DEFAULT_MAX_REACTIONS,
            half_life_days: DEFAULT_EXPERT_HALF_LIFE_DAYS,
            lookback_days: DEFAULT_EXPERT_LOOKBACK_DAYS,
            max_candidates: DEFAULT_EXPERT_MAX_CANDIDATES,
        }
    }
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            ttl_hours: DEFAULT_DOCS_TTL_HOURS,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            exponential_base: DEFAULT_EXPONENTIAL_BASE,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_idle_per_host: DEFAULT_MAX_IDLE_PER_HOST,
            pool_idle_timeout_seconds: DEFAULT_POOL_IDLE_TIMEOUT_SECONDS,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
        }
    }
}

impl Config {
    /// Layered settings that must also carry a Slack token.
    pub fn load(config_path: Option<&str>, data_path: &str) -> Result<Self> {
        let config = Self::load_settings(config_path, data_path)?;

        if config.slack.bot_token.is_none() && config.slack.user_token.is_none() {
            return Err(anyhow::anyhow!(
                "At least one token required: SLACK_BOT_TOKEN or SLACK_USER_TOKEN"
            ));
        }

        Ok(config)
    }

    /// Defaults, then the config file, then the environment. `data_path`
    /// is only the default for `cache.data_path`.
    pub fn load_settings(config_path: Option<&str>, data_path: &str) -> Result<Self> {
        let mut settings = config::Config::builder();

        // Default values
        settings = settings
            .set_default("slack.api_base_url", DEFAULT_API_BASE_URL)?
            .set_default("forum.channel_prefix", DEFAULT_CHANNEL_PREFIX)?
            .set_default("forum.include_private", false)?
            .set_default("cache.data_path", data_path)?
            .set_default("cache.ttl_users_hours", DEFAULT_TTL_USERS_HOURS)?
            .set_default("cache.ttl_channels_hours", DEFAULT_TTL_CHANNELS_HOURS)?
            .set_default("cache.ttl_messages_minutes", DEFAULT_TTL_MESSAGES_MINUTES)?
            .set_default("index.history_days", DEFAULT_HISTORY_DAYS)?
            .set_default("index.page_size", DEFAULT_PAGE_SIZE)?
            .set_default("index.max_pages_per_channel", DEFAULT_MAX_PAGES_PER_CHANNEL)?
            .set_default("index.thread_refresh_days", DEFAULT_THREAD_REFRESH_DAYS)?
            .set_default("index.sync_interval_minutes", DEFAULT_SYNC_INTERVAL_MINUTES)?
            .set_default(
                "search.recency_half_life_days",
                DEFAULT_RECENCY_HALF_LIFE_DAYS,
            )?
            .set_default("search.max_limit", DEFAULT_MAX_LIMIT as u64)?
            .set_default("experts.answer_weight", DEFAULT_ANSWER_WEIGHT)?
            .set_default("experts.question_weight", DEFAULT_QUESTION_WEIGHT)?
            .set_default("experts.message_weight", DEFAULT_MESSAGE_WEIGHT)?
            .set_default("experts.reaction_weight", DEFAULT_REACTION_WEIGHT)?
            .set_default("experts.max_reactions", DEFAULT_MAX_REACTIONS)?
            .set_default("experts.half_life_days", DEFAULT_EXPERT_HALF_LIFE_DAYS)?
            .set_default("experts.lookback_days", DEFAULT_EXPERT_LOOKBACK_DAYS)?
            .set_default(
                "experts.max_candidates",
                DEFAULT_EXPERT_MAX_CANDIDATES as u64,
            )?
            .set_default("docs.ttl_hours", DEFAULT_DOCS_TTL_HOURS)?
            .set_default("retry.max_attempts", DEFAULT_MAX_ATTEMPTS)?
            .set_default("retry.initial_delay_ms", DEFAULT_INITIAL_DELAY_MS)?
            .set_default("retry.max_delay_ms", DEFAULT_MAX_DELAY_MS)?
            .set_default("retry.exponential_base", DEFAULT_EXPONENTIAL_BASE)?
            .set_default("connection.timeout_seconds", DEFAULT_TIMEOUT_SECONDS)?
            .set_default("connection.max_idle_per_host", DEFAULT_MAX_IDLE_PER_HOST)?
            .set_default(
                "connection.pool_idle_timeout_seconds",
                DEFAULT_POOL_IDLE_TIMEOUT_SECONDS,
            )?
            .set_default(
                "rate_limit.requests_per_minute",
                DEFAULT_REQUESTS_PER_MINUTE,
            )?;

        // Load from config file if provided
        if let Some(path) = config_path
            && Path::new(path).exists()
        {
            settings = settings.add_source(config::File::with_name(path));
        }

        // Override with environment variables
        settings = settings.add_source(
            config::Environment::with_prefix("FORUM_QA")
                .prefix_separator("_")
                .separator("__"),
        );

        // Add Slack tokens from environment (at least one required)
        let bot_token = std::env::var("SLACK_BOT_TOKEN").ok();
        let user_token = std::env::var("SLACK_USER_TOKEN").ok();

        if let Some(token) = bot_token {
            settings = settings.set_override("slack.bot_token", Some(token))?;
        }

        if let Some(token) = user_token {
            settings = settings.set_override("slack.user_token", Some(token))?;
        }

        Ok(settings.build()?.try_deserialize()?)
    }

    /// SQLite index file inside `cache.data_path`.
    pub fn db_path(&self) -> PathBuf {
        Path::new(&self.cache.data_path).join("cache.db")
    }

    /// Clamp a caller-supplied result limit to `1..=search.max_limit`.
    pub fn clamp_limit(&self, limit: usize) -> usize {
        limit.clamp(1, self.search.max_limit.max(1))
    }
}
