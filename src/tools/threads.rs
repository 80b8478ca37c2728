use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

use super::message_utils::{UserNames, format_thread_messages, permalink, workspace_url};
use super::{IntoToolResponse, Tool, ToolResponse};
use crate::cache::{SqliteCache, StoredMessage};
use crate::config::Config;
use crate::error::{IntoMcpError, McpError, McpResult};
use crate::forum::ForumPolicy;
use crate::slack::ForumSource;
use crate::utils::{parse_params, resolve_forum_channel};

const MAX_THREAD_LIMIT: usize = 1000;

pub struct ReadThreadTool {
    cache: Arc<SqliteCache>,
    source: Arc<dyn ForumSource>,
    policy: ForumPolicy,
    /// Unanswered questions younger than this are re-checked upstream.
    refresh_window_secs: f64,
}

impl ReadThreadTool {
    pub fn new(cache: Arc<SqliteCache>, source: Arc<dyn ForumSource>, config: &Config) -> Self {
        Self {
            cache,
            source,
            policy: ForumPolicy::from_config(&config.forum),
            refresh_window_secs: (config.index.thread_refresh_days * 86_400) as f64,
        }
    }

    /// The index misses the thread, its parent, or some of its replies.
    /// A recent question with no indexed answer may have been answered
    /// after it was synced.
    fn is_incomplete(&self, thread: &[StoredMessage]) -> bool {
        match thread.first() {
            Some(parent) if parent.is_thread_parent() || parent.thread_ts.is_none() => {
                let replies = thread.len() as i64 - 1;
                let cutoff = Utc::now().timestamp() as f64 - self.refresh_window_secs;
                replies < parent.reply_count || (replies == 0 && parent.ts_epoch() >= cutoff)
            }
            _ => true,
        }
    }

    async fn load_thread(&self, channel_id: &str, thread_ts: &str) -> McpResult<Vec<StoredMessage>> {
        let cached = self
            .cache
            .get_thread(channel_id, thread_ts)
            .await
            .mcp_context("Failed to read thread")?;
        if !self.is_incomplete(&cached) {
            return Ok(cached);
        }

        debug!(channel_id, thread_ts, cached = cached.len(), "Thread incomplete in index, fetching");
        match self.source.fetch_replies(channel_id, thread_ts).await {
            Ok(replies) => {
                let stored: Vec<StoredMessage> = replies
                    .iter()
                    .filter_map(|m| StoredMessage::from_slack(channel_id, m))
                    .collect();
                self.cache
                    .upsert_messages(&stored)
                    .await
                    .mcp_context("Failed to store thread")?;
                self.cache
                    .get_thread(channel_id, thread_ts)
                    .await
                    .mcp_context("Failed to read thread")
            }
            Err(e) if !cached.is_empty() => {
                warn!(channel_id, thread_ts, error = %e, "Thread fetch failed, serving indexed copy");
                Ok(cached)
            }
            Err(e) => Err(McpError::NotFound(format!(
                "Thread {} not found: {}",
                thread_ts, e
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReadThreadParams {
    channel: String,
    thread_ts: String,
    #[serde(default = "retrieval_default_limit")]
    limit: usize,
}

fn retrieval_default_limit() -> usize {
    100
}

#[async_trait]
impl Tool for ReadThreadTool {
    fn description(&self) -> &str {
        "Read a forum thread: the question, every answer and who took part"
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let params: ReadThreadParams = parse_params(params)?;
        let limit = params.limit.clamp(1, MAX_THREAD_LIMIT);
        let channel = resolve_forum_channel(&params.channel, &self.cache, &self.policy).await?;

        // A reply ts reads the thread it belongs to
        let thread_ts = match self
            .cache
            .get_message(&channel.id, &params.thread_ts)
            .await
            .mcp_context("Failed to read message")?
        {
            Some(msg) => msg.thread_root().to_string(),
            None => params.thread_ts.clone(),
        };

        let mut thread = self.load_thread(&channel.id, &thread_ts).await?;
        if thread.is_empty() {
            return Err(McpError::NotFound(format!(
                "Thread {} not found in #{}",
                thread_ts, channel.name
            )));
        }

        let total = thread.len();
        thread.truncate(limit);

        let workspace = workspace_url(&self.cache).await;
        let mut names = UserNames::new(&self.cache);

        let mut participants: Vec<Value> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for msg in &thread {
            if let Some(user_id) = &msg.user_id
                && seen.insert(user_id.clone())
            {
                let mut participant = json!({ "user_id": user_id });
                if let Some(name) = names.get(user_id).await {
                    participant["user_name"] = json!(name);
                }
                participants.push(participant);
            }
        }

        let mut result = format_thread_messages(&thread, &mut names, workspace.as_deref()).await;
        result["channel_id"] = json!(channel.id);
        result["channel_name"] = json!(channel.name);
        result["participants"] = json!(participants);
        if let Some(url) = &workspace {
            result["permalink"] = json!(permalink(url, &channel.id, &thread_ts, None));
        }

        let returned = thread.len();
        Ok(ToolResponse::truncated(result, returned, total).into_response()?)
    }
}
