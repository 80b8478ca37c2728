use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackUserProfile {
    pub real_name: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub title: Option<String>,
    pub status_text: Option<String>,
    pub status_emoji: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackUser {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub deleted: bool,
    pub profile: Option<SlackUserProfile>,
}

impl SlackUser {
    // Helper methods for accessing profile fields
    pub fn real_name(&self) -> Option<&str> {
        self.profile.as_ref()?.real_name.as_deref()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.profile.as_ref()?.display_name.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.profile.as_ref()?.title.as_deref()
    }

    /// Slackbot is reported as a regular user with a fixed ID.
    pub fn is_automated(&self) -> bool {
        self.is_bot || self.id == "USLACKBOT"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackChannel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_channel: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_general: bool,
    #[serde(default)]
    pub is_im: bool,
    #[serde(default)]
    pub is_mpim: bool,
    #[serde(default)]
    pub is_member: bool,
    pub created: Option<i64>,
    pub creator: Option<String>,
    pub num_members: Option<i32>,
    pub topic: Option<ChannelTopic>,
    pub purpose: Option<ChannelPurpose>,
}

impl SlackChannel {
    pub fn topic_text(&self) -> Option<&str> {
        self.topic
            .as_ref()
            .map(|t| t.value.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn purpose_text(&self) -> Option<&str> {
        self.purpose
            .as_ref()
            .map(|p| p.value.as_str())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelTopic {
    pub value: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub last_set: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPurpose {
    pub value: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub last_set: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackMessage {
    pub ts: String,
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    pub bot_id: Option<String>,
    pub thread_ts: Option<String>,
    pub reply_count: Option<i32>,
    pub reply_users: Option<Vec<String>>,
    pub reply_users_count: Option<i32>,
    pub latest_reply: Option<String>,
    pub parent_user_id: Option<String>,
    pub reactions: Option<Vec<Reaction>>,
    pub subtype: Option<String>,
    pub edited: Option<EditedInfo>,
}

impl SlackMessage {
    pub fn is_thread_parent(&self) -> bool {
        self.thread_ts.as_deref() == Some(self.ts.as_str())
    }

    pub fn reaction_count(&self) -> i64 {
        self.reactions
            .as_ref()
            .map(|rs| rs.iter().map(|r| r.count.max(0) as i64).sum())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditedInfo {
    pub user: String,
    pub ts: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub name: String,
    #[serde(default)]
    pub users: Vec<String>,
    pub count: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl ResponseMetadata {
    /// Slack signals the last page with an empty cursor rather than omitting it.
    pub fn cursor(self) -> Option<String> {
        self.next_cursor.filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct UsersListResponse {
    #[serde(default)]
    pub members: Vec<SlackUser>,
    #[serde(default)]
    pub response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
pub struct ConversationsListResponse {
    #[serde(default)]
    pub channels: Vec<SlackChannel>,
    #[serde(default)]
    pub response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
pub struct MessagesPageResponse {
    #[serde(default)]
    pub messages: Vec<SlackMessage>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
pub struct AuthTestResponse {
    pub url: Option<String>,
    pub team: Option<String>,
    pub user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_deserializes_with_missing_optionals() {
        let msg: SlackMessage = serde_json::from_value(json!({
            "ts": "1700000000.000100",
            "user": "U1",
            "text": "How do I rotate the signing key?",
            "thread_ts": "1700000000.000100",
            "reply_count": 2,
            "reactions": [{"name": "eyes", "count": 2}, {"name": "+1", "count": 3, "users": ["U2"]}]
        }))
        .unwrap();

        assert!(msg.is_thread_parent());
        assert_eq!(msg.reaction_count(), 5);
        assert!(msg.bot_id.is_none());
    }

    #[test]
    fn test_empty_cursor_means_last_page() {
        let meta = ResponseMetadata {
            next_cursor: Some(String::new()),
        };
        assert_eq!(meta.cursor(), None);

        let meta = ResponseMetadata {
            next_cursor: Some("dXNlcjpVMDYx".to_string()),
        };
        assert_eq!(meta.cursor().as_deref(), Some("dXNlcjpVMDYx"));
    }

    #[test]
    fn test_channel_topic_text_filters_empty() {
        let channel: SlackChannel = serde_json::from_value(json!({
            "id": "C1",
            "name": "forum-rust",
            "topic": {"value": ""},
            "purpose": {"value": "Ask anything about Rust"}
        }))
        .unwrap();
        assert_eq!(channel.topic_text(), None);
        assert_eq!(channel.purpose_text(), Some("Ask anything about Rust"));
    }
}
