use super::core::SlackCore;
use super::error::SlackResult;
use super::types::{ConversationsListResponse, SlackChannel};

const CHANNELS_PAGE_SIZE: u32 = 200;

#[derive(Clone)]
pub struct SlackChannelsApi {
    core: SlackCore,
}

impl SlackChannelsApi {
    pub fn new(core: SlackCore) -> Self {
        Self { core }
    }

    /// Fetch every non-archived channel visible to the token.
    pub async fn fetch_all_channels(&self, include_private: bool) -> SlackResult<Vec<SlackChannel>> {
        let types = if include_private {
            "public_channel,private_channel"
        } else {
            "public_channel"
        };

        let mut channels = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut params = vec![
                ("types", types.to_string()),
                ("exclude_archived", "true".to_string()),
                ("limit", CHANNELS_PAGE_SIZE.to_string()),
            ];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }

            let body = self.core.get("conversations.list", &params).await?;
            let page: ConversationsListResponse = serde_json::from_value(body)?;
            channels.extend(page.channels);

            cursor = page.response_metadata.cursor();
            if cursor.is_none() {
                break;
            }
        }

        Ok(channels)
    }
}
