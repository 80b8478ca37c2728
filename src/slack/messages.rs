use super::core::SlackCore;
use super::error::SlackResult;
use super::types::{MessagesPageResponse, SlackMessage};

const REPLIES_PAGE_SIZE: u32 = 200;

#[derive(Clone)]
pub struct SlackMessagesApi {
    core: SlackCore,
}

impl SlackMessagesApi {
    pub fn new(core: SlackCore) -> Self {
        Self { core }
    }

    /// One page of top-level channel history between `oldest` and
    /// `latest`, both exclusive. Returns the messages and the cursor for
    /// the next page, if any.
    pub async fn get_channel_history(
        &self,
        channel_id: &str,
        oldest: Option<&str>,
        latest: Option<&str>,
        cursor: Option<&str>,
        limit: u32,
    ) -> SlackResult<(Vec<SlackMessage>, Option<String>)> {
        let mut params = vec![
            ("channel", channel_id.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(oldest) = oldest {
            params.push(("oldest", oldest.to_string()));
        }
        if let Some(latest) = latest {
            params.push(("latest", latest.to_string()));
        }
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }

        let body = self.core.get("conversations.history", &params).await?;
        let page: MessagesPageResponse = serde_json::from_value(body)?;
        let next_cursor = if page.has_more {
            page.response_metadata.cursor()
        } else {
            None
        };

        Ok((page.messages, next_cursor))
    }

    /// Every message of a thread, parent first.
    pub async fn get_thread_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> SlackResult<Vec<SlackMessage>> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut params = vec![
                ("channel", channel_id.to_string()),
                ("ts", thread_ts.to_string()),
                ("limit", REPLIES_PAGE_SIZE.to_string()),
            ];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }

            let body = self.core.get("conversations.replies", &params).await?;
            let page: MessagesPageResponse = serde_json::from_value(body)?;
            messages.extend(page.messages);

            cursor = if page.has_more {
                page.response_metadata.cursor()
            } else {
                None
            };
            if cursor.is_none() {
                break;
            }
        }

        Ok(messages)
    }
}
