//! Shared fixtures for unit tests.

use crate::cache::StoredMessage;
use crate::config::Config;
use crate::slack::types::{SlackChannel, SlackMessage, SlackUser, SlackUserProfile};

/// Config pointing at a mock Slack API with fast retries.
pub fn test_config(base_url: &str) -> Config {
    let mut config = Config::default();
    config.slack.bot_token = Some("xoxb-test".to_string());
    config.slack.api_base_url = base_url.to_string();
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.rate_limit.requests_per_minute = 6000;
    config
}

pub fn create_test_user(id: &str, name: &str, email: Option<&str>, is_bot: bool) -> SlackUser {
    SlackUser {
        id: id.to_string(),
        name: name.to_string(),
        is_bot,
        is_admin: false,
        deleted: false,
        profile: Some(SlackUserProfile {
            real_name: Some(format!("Real {}", name)),
            display_name: Some(name.to_string()),
            email: email.map(|e| e.to_string()),
            title: None,
            status_text: None,
            status_emoji: None,
        }),
    }
}

pub fn create_test_channel(id: &str, name: &str) -> SlackChannel {
    SlackChannel {
        id: id.to_string(),
        name: name.to_string(),
        is_channel: true,
        is_private: false,
        is_archived: false,
        is_general: false,
        is_im: false,
        is_mpim: false,
        is_member: true,
        created: Some(1_600_000_000),
        creator: None,
        num_members: Some(12),
        topic: None,
        purpose: None,
    }
}

pub fn create_test_message(ts: &str, text: &str, user_id: Option<&str>) -> SlackMessage {
    SlackMessage {
        ts: ts.to_string(),
        user: user_id.map(|s| s.to_string()),
        text: text.to_string(),
        bot_id: None,
        thread_ts: None,
        reply_count: None,
        reply_users: None,
        reply_users_count: None,
        latest_reply: None,
        parent_user_id: None,
        reactions: None,
        subtype: None,
        edited: None,
    }
}

pub fn stored(
    channel_id: &str,
    ts: &str,
    thread_ts: Option<&str>,
    user_id: &str,
    text: &str,
) -> StoredMessage {
    StoredMessage {
        channel_id: channel_id.to_string(),
        ts: ts.to_string(),
        thread_ts: thread_ts.map(|t| t.to_string()),
        user_id: Some(user_id.to_string()),
        text: text.to_string(),
        reply_count: 0,
        reaction_count: 0,
        is_bot: false,
    }
}

/// A Slack ts `days_ago` days before now.
pub fn ts_days_ago(days_ago: f64) -> String {
    let now = chrono::Utc::now().timestamp() as f64;
    format!("{:.6}", now - days_ago * 86_400.0)
}
