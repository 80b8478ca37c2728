use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use super::{IntoToolResponse, Tool, ToolResponse};
use crate::cache::SqliteCache;
use crate::error::{IntoMcpError, McpError, McpResult};
use crate::utils::parse_params;

const MAX_ANALYTICS_DAYS: u32 = 365;

pub struct RecordFeedbackTool {
    cache: Arc<SqliteCache>,
}

pub struct GetAnalyticsTool {
    cache: Arc<SqliteCache>,
}

impl RecordFeedbackTool {
    pub fn new(cache: Arc<SqliteCache>) -> Self {
        Self { cache }
    }
}

impl GetAnalyticsTool {
    pub fn new(cache: Arc<SqliteCache>) -> Self {
        Self { cache }
    }
}

#[derive(Debug, Deserialize)]
struct FeedbackParams {
    call_id: String,
    helpful: bool,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnalyticsParams {
    #[serde(default = "default_days")]
    days: u32,
}

fn default_days() -> u32 {
    30
}

#[async_trait]
impl Tool for RecordFeedbackTool {
    fn description(&self) -> &str {
        "Record whether an earlier answer (by its call_id) was helpful"
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let params: FeedbackParams = parse_params(params)?;

        let recorded = self
            .cache
            .record_feedback(&params.call_id, params.helpful, params.comment.as_deref())
            .await
            .mcp_context("Failed to record feedback")?;
        if !recorded {
            return Err(McpError::NotFound(format!(
                "No tool call with id '{}'",
                params.call_id
            )));
        }

        Ok(ToolResponse::data(json!({ "recorded": true })).into_response()?)
    }
}

#[async_trait]
impl Tool for GetAnalyticsTool {
    fn description(&self) -> &str {
        "Usage summary: tool calls, top questions, unanswered searches and feedback"
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let params: AnalyticsParams = parse_params(params)?;
        let days = params.days.clamp(1, MAX_ANALYTICS_DAYS);

        let summary = self
            .cache
            .analytics_summary(days)
            .await
            .mcp_context("Failed to build analytics summary")?;

        Ok(ToolResponse::data(json!(summary)).into_response()?)
    }
}
