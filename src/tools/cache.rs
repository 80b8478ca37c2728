use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use super::{IntoToolResponse, Tool, ToolResponse};
use crate::cache::CacheRefreshType;
use crate::error::{IntoMcpError, McpError, McpResult};
use crate::index::Indexer;
use crate::utils::parse_params;

pub struct RefreshCacheTool {
    indexer: Arc<Indexer>,
}

impl RefreshCacheTool {
    pub fn new(indexer: Arc<Indexer>) -> Self {
        Self { indexer }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshCacheParams {
    #[serde(rename = "type", default = "default_all")]
    refresh_type: String,
    #[serde(default)]
    force: bool,
}

fn default_all() -> String {
    "all".to_string()
}

#[async_trait]
impl Tool for RefreshCacheTool {
    fn description(&self) -> &str {
        "Sync the forum index from Slack (users/channels/messages/docs/all)"
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let params: RefreshCacheParams = parse_params(params)?;

        let refresh_type = CacheRefreshType::parse(&params.refresh_type).ok_or_else(|| {
            McpError::InvalidParameter(format!(
                "Unknown refresh type '{}', expected users, channels, messages, docs or all",
                params.refresh_type
            ))
        })?;

        let report = self
            .indexer
            .sync(refresh_type, params.force)
            .await
            .mcp_context("Sync failed")?;

        let mut result = json!(report);
        result["type"] = json!(params.refresh_type);
        Ok(ToolResponse::data(result).into_response()?)
    }
}
