use super::core::SlackCore;
use super::error::SlackResult;
use super::types::{AuthTestResponse, SlackUser, UsersListResponse};

const USERS_PAGE_SIZE: u32 = 200;

#[derive(Clone)]
pub struct SlackUsersApi {
    core: SlackCore,
}

impl SlackUsersApi {
    pub fn new(core: SlackCore) -> Self {
        Self { core }
    }

    /// Fetch the full user directory, following pagination cursors.
    pub async fn fetch_all_users(&self) -> SlackResult<Vec<SlackUser>> {
        let mut users = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut params = vec![("limit", USERS_PAGE_SIZE.to_string())];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }

            let body = self.core.get("users.list", &params).await?;
            let page: UsersListResponse = serde_json::from_value(body)?;
            users.extend(page.members);

            cursor = page.response_metadata.cursor();
            if cursor.is_none() {
                break;
            }
        }

        Ok(users)
    }

    /// Identify the token's workspace; `url` is the permalink base.
    pub async fn auth_test(&self) -> SlackResult<AuthTestResponse> {
        let body = self.core.get("auth.test", &[]).await?;
        Ok(serde_json::from_value(body)?)
    }
}
