use crate::error::McpResult;
use serde_json::Value;

/// Unified response structure for all tools
#[derive(Debug)]
pub struct ToolResponse {
    pub data: Value,
    pub metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Default)]
pub struct ResponseMetadata {
    /// More items exist beyond the requested limit
    pub has_more: Option<bool>,

    /// Total count (only when different from returned items)
    pub total_count: Option<usize>,
}

impl ToolResponse {
    pub fn data(data: Value) -> Self {
        Self {
            data,
            metadata: None,
        }
    }

    /// A truncated listing: `returned` of `total` items.
    pub fn truncated(data: Value, returned: usize, total: usize) -> Self {
        Self {
            data,
            metadata: Some(ResponseMetadata {
                has_more: Some(total > returned),
                total_count: (total != returned).then_some(total),
            }),
        }
    }

    /// Convert to JSON Value for MCP protocol
    pub fn into_json(self) -> Value {
        let Some(metadata) = self.metadata else {
            return self.data;
        };

        let mut result = self.data;
        if let Some(has_more) = metadata.has_more {
            result["has_more"] = has_more.into();
        }
        if let Some(count) = metadata.total_count {
            result["total_count"] = count.into();
        }
        result
    }
}

/// Helper trait for converting tool results to responses
pub trait IntoToolResponse {
    fn into_response(self) -> McpResult<Value>;
}

impl IntoToolResponse for ToolResponse {
    fn into_response(self) -> McpResult<Value> {
        Ok(self.into_json())
    }
}
