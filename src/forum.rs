//! The privacy boundary: only channels whose name carries the forum prefix
//! are ever read, stored or returned.

use crate::config::ForumConfig;
use crate::slack::types::SlackChannel;

#[derive(Debug, Clone)]
pub struct ForumPolicy {
    prefix: String,
    include_private: bool,
}

impl ForumPolicy {
    pub fn new(prefix: impl Into<String>, include_private: bool) -> Self {
        Self {
            prefix: prefix.into(),
            include_private,
        }
    }

    pub fn from_config(config: &ForumConfig) -> Self {
        Self::new(config.channel_prefix.clone(), config.include_private)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_forum_name(&self, name: &str) -> bool {
        !self.prefix.is_empty() && name.starts_with(&self.prefix) && name.len() > self.prefix.len()
    }

    pub fn admits(&self, channel: &SlackChannel) -> bool {
        if channel.is_im || channel.is_mpim || channel.is_archived {
            return false;
        }
        if channel.is_private && !self.include_private {
            return false;
        }
        self.is_forum_name(&channel.name)
    }

    /// Keep only admitted channels.
    pub fn filter(&self, channels: Vec<SlackChannel>) -> Vec<SlackChannel> {
        channels.into_iter().filter(|c| self.admits(c)).collect()
    }

    /// `rust` becomes `forum-rust`; names already carrying the prefix are unchanged.
    pub fn qualify(&self, name: &str) -> String {
        if name.starts_with(&self.prefix) {
            name.to_string()
        } else {
            format!("{}{}", self.prefix, name)
        }
    }
}

impl Default for ForumPolicy {
    fn default() -> Self {
        Self::from_config(&ForumConfig::default())
    }
}
