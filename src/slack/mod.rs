mod channels;
pub mod core;
pub mod error;
mod messages;
mod source;
pub mod types;
mod users;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Config;

pub use channels::SlackChannelsApi;
pub use error::{SlackError, SlackResult};
pub use messages::SlackMessagesApi;
#[cfg(test)]
pub use source::MockForumSource;
pub use source::ForumSource;
pub use users::SlackUsersApi;

use types::{SlackChannel, SlackMessage, SlackUser};

/// Slack Web API client grouped by resource, sharing one throttled core.
#[derive(Clone)]
pub struct SlackClient {
    pub users: SlackUsersApi,
    pub channels: SlackChannelsApi,
    pub messages: SlackMessagesApi,
}

impl SlackClient {
    pub fn new(config: &Config) -> SlackResult<Self> {
        let core = core::SlackCore::new(config)?;
        Ok(Self {
            users: SlackUsersApi::new(core.clone()),
            channels: SlackChannelsApi::new(core.clone()),
            messages: SlackMessagesApi::new(core),
        })
    }
}

#[async_trait]
impl ForumSource for SlackClient {
    async fn fetch_users(&self) -> Result<Vec<SlackUser>> {
        Ok(self.users.fetch_all_users().await?)
    }

    async fn fetch_channels(&self, include_private: bool) -> Result<Vec<SlackChannel>> {
        Ok(self.channels.fetch_all_channels(include_private).await?)
    }

    async fn fetch_history(
        &self,
        channel_id: &str,
        oldest: Option<String>,
        latest: Option<String>,
        cursor: Option<String>,
        limit: u32,
    ) -> Result<(Vec<SlackMessage>, Option<String>)> {
        Ok(self
            .messages
            .get_channel_history(
                channel_id,
                oldest.as_deref(),
                latest.as_deref(),
                cursor.as_deref(),
                limit,
            )
            .await?)
    }

    async fn fetch_replies(&self, channel_id: &str, thread_ts: &str) -> Result<Vec<SlackMessage>> {
        Ok(self
            .messages
            .get_thread_replies(channel_id, thread_ts)
            .await?)
    }

    async fn workspace_url(&self) -> Result<Option<String>> {
        Ok(self.users.auth_test().await?.url)
    }
}
