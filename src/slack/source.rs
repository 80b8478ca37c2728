use anyhow::Result;
use async_trait::async_trait;

use super::types::{SlackChannel, SlackMessage, SlackUser};

/// Read-only view of a Slack workspace used by the indexer and the thread
/// reader. `SlackClient` is the production implementation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ForumSource: Send + Sync {
    async fn fetch_users(&self) -> Result<Vec<SlackUser>>;

    async fn fetch_channels(&self, include_private: bool) -> Result<Vec<SlackChannel>>;

    async fn fetch_history(
        &self,
        channel_id: &str,
        oldest: Option<String>,
        latest: Option<String>,
        cursor: Option<String>,
        limit: u32,
    ) -> Result<(Vec<SlackMessage>, Option<String>)>;

    async fn fetch_replies(&self, channel_id: &str, thread_ts: &str) -> Result<Vec<SlackMessage>>;

    async fn workspace_url(&self) -> Result<Option<String>>;
}
