pub mod analytics;
pub mod cache;
pub mod experts;
pub mod message_utils;
pub mod response;
pub mod search;
pub mod threads;

use crate::error::McpResult;
use async_trait::async_trait;
use serde_json::Value;

pub use response::{IntoToolResponse, ToolResponse};

#[async_trait]
pub trait Tool: Send + Sync {
    fn description(&self) -> &str;
    async fn execute(&self, params: Value) -> McpResult<Value>;
}
