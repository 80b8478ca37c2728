use crate::cache::helpers::WORKSPACE_URL;
use crate::cache::{SqliteCache, StoredMessage};
use crate::slack::types::SlackUser;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Remove fields with empty string values from JSON object
pub fn remove_empty_strings(value: &mut Value) {
    if let Some(obj) = value.as_object_mut() {
        obj.retain(|_, v| v.as_str().is_none_or(|s| !s.is_empty()));
    }
}

/// Convert Slack timestamp to ISO 8601 format
/// Slack timestamps are Unix timestamps with microseconds (e.g., "1234567890.123456")
pub fn slack_ts_to_iso8601(ts: &str) -> Option<String> {
    let (secs, micros) = ts.split_once('.').unwrap_or((ts, "0"));
    let seconds = secs.parse::<i64>().ok()?;
    let micros = format!("{:0<6}", micros).get(..6)?.parse::<u32>().ok()?;

    Utc.timestamp_opt(seconds, micros * 1000)
        .single()
        .map(|dt: DateTime<Utc>| dt.to_rfc3339())
}

/// Display name, then real name, then the username.
pub fn get_user_display_name(user: &SlackUser) -> &str {
    if let Some(profile) = &user.profile {
        if let Some(display_name) = &profile.display_name
            && !display_name.trim().is_empty()
        {
            return display_name;
        }
        if let Some(real_name) = &profile.real_name
            && !real_name.trim().is_empty()
        {
            return real_name;
        }
    }
    &user.name
}

/// Link to a message in the Slack web client. Replies link into their thread.
pub fn permalink(workspace_url: &str, channel_id: &str, ts: &str, thread_ts: Option<&str>) -> String {
    let base = format!(
        "{}/archives/{}/p{}",
        workspace_url.trim_end_matches('/'),
        channel_id,
        ts.replace('.', "")
    );
    match thread_ts {
        Some(thread_ts) if thread_ts != ts => {
            format!("{}?thread_ts={}&cid={}", base, thread_ts, channel_id)
        }
        _ => base,
    }
}

/// Workspace URL recorded by the last channel sync.
pub async fn workspace_url(cache: &Arc<SqliteCache>) -> Option<String> {
    cache.get_metadata(WORKSPACE_URL).await.ok().flatten()
}

/// Per-request memo of user id to display name.
pub struct UserNames<'a> {
    cache: &'a Arc<SqliteCache>,
    names: HashMap<String, Option<String>>,
}

impl<'a> UserNames<'a> {
    pub fn new(cache: &'a Arc<SqliteCache>) -> Self {
        Self {
            cache,
            names: HashMap::new(),
        }
    }

    pub async fn get(&mut self, user_id: &str) -> Option<String> {
        if let Some(name) = self.names.get(user_id) {
            return name.clone();
        }
        let name = match self.cache.get_user_by_id(user_id).await {
            Ok(Some(user)) => Some(get_user_display_name(&user).to_string()),
            _ => None,
        };
        self.names.insert(user_id.to_string(), name.clone());
        name
    }
}

/// Format an indexed message with user name resolution and a permalink.
pub async fn format_message(
    msg: &StoredMessage,
    names: &mut UserNames<'_>,
    workspace_url: Option<&str>,
) -> Value {
    let mut result = json!({
        "ts": msg.ts,
        "text": msg.text,
    });

    if let Some(iso_time) = slack_ts_to_iso8601(&msg.ts) {
        result["datetime"] = json!(iso_time);
    }

    if let Some(user_id) = &msg.user_id {
        result["user_id"] = json!(user_id);
        if let Some(name) = names.get(user_id).await {
            result["user_name"] = json!(name);
        }
    }

    if let Some(thread_ts) = &msg.thread_ts {
        result["thread_ts"] = json!(thread_ts);
        if msg.is_thread_reply() {
            result["is_thread_reply"] = json!(true);
        }
    }
    if msg.reply_count > 0 {
        result["reply_count"] = json!(msg.reply_count);
    }
    if msg.reaction_count > 0 {
        result["reaction_count"] = json!(msg.reaction_count);
    }
    if msg.is_bot {
        result["is_bot"] = json!(true);
    }

    if let Some(url) = workspace_url {
        result["permalink"] = json!(permalink(
            url,
            &msg.channel_id,
            &msg.ts,
            msg.thread_ts.as_deref()
        ));
    }

    remove_empty_strings(&mut result);
    result
}

/// Format thread messages with parent info only once
pub async fn format_thread_messages(
    messages: &[StoredMessage],
    names: &mut UserNames<'_>,
    workspace_url: Option<&str>,
) -> Value {
    let mut result = json!({});

    if let Some(first) = messages.first()
        && first.is_thread_parent()
    {
        let mut parent_info = json!({
            "parent_ts": first.ts,
            "parent_text": first.text,
            "reply_count": first.reply_count,
        });
        if let Some(iso_time) = slack_ts_to_iso8601(&first.ts) {
            parent_info["parent_datetime"] = json!(iso_time);
        }
        if let Some(user_id) = &first.user_id {
            parent_info["parent_user_id"] = json!(user_id);
            if let Some(name) = names.get(user_id).await {
                parent_info["parent_user_name"] = json!(name);
            }
        }
        remove_empty_strings(&mut parent_info);
        result["thread_info"] = parent_info;
    }

    let mut formatted = Vec::with_capacity(messages.len());
    for msg in messages {
        formatted.push(format_message(msg, names, workspace_url).await);
    }
    result["messages"] = json!(formatted);

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_test_user, stored};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    async fn setup_cache() -> Arc<SqliteCache> {
        let cache = Arc::new(
            SqliteCache::new(":memory:")
                .await
                .expect("Failed to create test cache"),
        );
        cache
            .save_users(vec![create_test_user("U123", "alice", None, false)])
            .await
            .unwrap();
        cache
    }

    #[rstest]
    #[case("1609459200.000000", Some("2021-01-01T00:00:00+00:00"))]
    #[case("1609459200.123456", Some("2021-01-01T00:00:00.123456+00:00"))]
    #[case("1609459200", Some("2021-01-01T00:00:00+00:00"))]
    #[case("invalid", None)]
    #[case("", None)]
    fn test_slack_ts_to_iso8601(#[case] ts: &str, #[case] expected: Option<&str>) {
        assert_eq!(slack_ts_to_iso8601(ts).as_deref(), expected);
    }

    #[test]
    fn test_get_user_display_name_fallbacks() {
        let mut user = create_test_user("U1", "alice", None, false);
        assert_eq!(get_user_display_name(&user), "alice");

        if let Some(profile) = &mut user.profile {
            profile.display_name = Some("   ".to_string());
        }
        assert_eq!(get_user_display_name(&user), "Real alice");

        if let Some(profile) = &mut user.profile {
            profile.real_name = None;
        }
        assert_eq!(get_user_display_name(&user), "alice");
    }

    #[test]
    fn test_remove_empty_strings_keeps_other_values() {
        let mut value = json!({"text": "", "count": 0, "name": "x", "flag": false});
        remove_empty_strings(&mut value);
        assert_eq!(value, json!({"count": 0, "name": "x", "flag": false}));
    }

    #[rstest]
    #[case("1700000000.123456", None, "https://acme.slack.com/archives/C1/p1700000000123456")]
    #[case("1700000000.123456", Some("1700000000.123456"), "https://acme.slack.com/archives/C1/p1700000000123456")]
    #[case(
        "1700000100.000200",
        Some("1700000000.123456"),
        "https://acme.slack.com/archives/C1/p1700000100000200?thread_ts=1700000000.123456&cid=C1"
    )]
    fn test_permalink(#[case] ts: &str, #[case] thread_ts: Option<&str>, #[case] expected: &str) {
        assert_eq!(permalink("https://acme.slack.com/", "C1", ts, thread_ts), expected);
    }

    #[tokio::test]
    async fn test_format_message_resolves_name_and_link() {
        let cache = setup_cache().await;
        let mut names = UserNames::new(&cache);
        let mut msg = stored("C1", "1609459250.000000", Some("1609459200.000000"), "U123", "Use a pool");
        msg.reaction_count = 3;

        let result = format_message(&msg, &mut names, Some("https://acme.slack.com/")).await;

        assert_eq!(result["user_name"], "alice");
        assert_eq!(result["is_thread_reply"], true);
        assert_eq!(result["reaction_count"], 3);
        assert_eq!(result["datetime"], "2021-01-01T00:00:50+00:00");
        assert!(result["permalink"].as_str().unwrap().contains("thread_ts=1609459200.000000"));
        assert!(result.get("reply_count").is_none());
    }

    #[tokio::test]
    async fn test_format_message_unknown_user_and_no_workspace() {
        let cache = setup_cache().await;
        let mut names = UserNames::new(&cache);
        let msg = stored("C1", "1609459200.000000", None, "U999", "hello");

        let result = format_message(&msg, &mut names, None).await;

        assert_eq!(result["user_id"], "U999");
        assert!(result.get("user_name").is_none());
        assert!(result.get("permalink").is_none());
    }

    #[tokio::test]
    async fn test_format_thread_messages_with_parent() {
        let cache = setup_cache().await;
        let mut names = UserNames::new(&cache);
        let mut parent = stored("C1", "1609459200.000000", Some("1609459200.000000"), "U123", "Question");
        parent.reply_count = 1;
        let reply = stored("C1", "1609459250.000000", Some("1609459200.000000"), "U456", "Answer");

        let result = format_thread_messages(&[parent, reply], &mut names, None).await;

        assert_eq!(result["thread_info"]["parent_text"], "Question");
        assert_eq!(result["thread_info"]["parent_user_name"], "alice");
        assert_eq!(result["thread_info"]["reply_count"], 1);
        assert_eq!(result["messages"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_format_thread_messages_without_parent() {
        let cache = setup_cache().await;
        let mut names = UserNames::new(&cache);
        let reply = stored("C1", "1609459250.000000", Some("1609459200.000000"), "U456", "Answer");

        let result = format_thread_messages(&[reply], &mut names, None).await;

        assert!(result.get("thread_info").is_none());
        assert_eq!(result["messages"].as_array().unwrap().len(), 1);
    }
}
