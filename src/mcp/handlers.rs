use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{SqliteCache, ToolCallRecord};
use crate::config::Config;
use crate::error::McpError;
use crate::index::Indexer;
use crate::tools::{Tool, analytics, cache as cache_tools, experts, search, threads};

use super::types::{CallToolResult, Property, Tool as McpTool, ToolContent, ToolInputSchema};

pub struct RequestHandler {
    tools: HashMap<String, Box<dyn Tool + Send + Sync>>,
    cache: Arc<SqliteCache>,
}

macro_rules! register_tool {
    ($tools:expr, $name:expr, $tool:expr) => {
        $tools.insert($name.to_string(), Box::new($tool));
    };
}

impl RequestHandler {
    pub fn new(cache: Arc<SqliteCache>, indexer: Arc<Indexer>, config: Arc<Config>) -> Self {
        let mut tools: HashMap<String, Box<dyn Tool + Send + Sync>> = HashMap::new();

        // Retrieval
        register_tool!(
            tools,
            "search_messages",
            search::SearchMessagesTool::new(cache.clone(), config.clone())
        );
        register_tool!(
            tools,
            "read_thread",
            threads::ReadThreadTool::new(cache.clone(), indexer.source().clone(), &config)
        );
        register_tool!(
            tools,
            "find_experts",
            experts::FindExpertsTool::new(cache.clone(), config.clone())
        );
        register_tool!(
            tools,
            "search_docs",
            search::SearchDocsTool::new(cache.clone(), config.clone())
        );
        register_tool!(
            tools,
            "list_forum_channels",
            search::ListForumChannelsTool::new(cache.clone(), config.clone())
        );
        register_tool!(
            tools,
            "search_users",
            search::SearchUsersTool::new(cache.clone(), config.clone())
        );

        // Maintenance and feedback
        register_tool!(
            tools,
            "refresh_cache",
            cache_tools::RefreshCacheTool::new(indexer)
        );
        register_tool!(
            tools,
            "record_feedback",
            analytics::RecordFeedbackTool::new(cache.clone())
        );
        register_tool!(
            tools,
            "get_analytics",
            analytics::GetAnalyticsTool::new(cache.clone())
        );

        Self { tools, cache }
    }

    pub async fn list_tools(&self) -> Vec<McpTool> {
        let mut tool_list: Vec<McpTool> = self
            .tools
            .iter()
            .map(|(name, tool)| self.tool_to_mcp_tool(name, tool.as_ref()))
            .collect();
        tool_list.sort_by(|a, b| a.name.cmp(&b.name));
        tool_list
    }

    /// Runs a tool and records the call for analytics. Object results carry
    /// the `call_id` that `record_feedback` refers to.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, McpError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| McpError::NotFound(format!("Tool not found: {}", name)))?;

        let call_id = Uuid::new_v4().to_string();
        let query = arguments
            .get("query")
            .or_else(|| arguments.get("topic"))
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
            .map(str::to_string);

        let started = Instant::now();
        let outcome = tool.execute(arguments).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let record = ToolCallRecord {
            id: call_id.clone(),
            tool: name.to_string(),
            query,
            success: outcome.is_ok(),
            result_count: outcome.as_ref().ok().and_then(first_array_len),
            latency_ms,
            error: outcome.as_ref().err().map(|e| e.to_string()),
        };
        if let Err(e) = self.cache.record_tool_call(&record).await {
            warn!(tool = name, error = %e, "Failed to record tool call");
        }
        debug!(tool = name, latency_ms, success = record.success, "Tool call finished");

        let mut result = outcome?;
        if let Value::Object(map) = &mut result {
            map.insert("call_id".to_string(), Value::String(call_id));
        }

        let content = if let Some(text) = result.as_str() {
            vec![ToolContent::Text {
                text: text.to_string(),
            }]
        } else {
            vec![ToolContent::Text {
                text: serde_json::to_string_pretty(&result)?,
            }]
        };

        Ok(CallToolResult { content })
    }

    // Helper functions for creating tool schemas
    fn create_string_prop(description: &str) -> Property {
        Property {
            property_type: "string".to_string(),
            description: Some(description.to_string()),
            default: None,
            enum_values: None,
        }
    }

    fn create_number_prop(description: &str, default: i32) -> Property {
        Property {
            property_type: "number".to_string(),
            description: Some(description.to_string()),
            default: Some(Value::Number(default.into())),
            enum_values: None,
        }
    }

    fn create_bool_prop(description: &str, default: Option<bool>) -> Property {
        Property {
            property_type: "boolean".to_string(),
            description: Some(description.to_string()),
            default: default.map(Value::Bool),
            enum_values: None,
        }
    }

    fn create_enum_prop(description: &str, default: &str, options: Vec<&str>) -> Property {
        Property {
            property_type: "string".to_string(),
            description: Some(description.to_string()),
            default: Some(Value::String(default.to_string())),
            enum_values: Some(
                options
                    .into_iter()
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            ),
        }
    }

    fn tool_to_mcp_tool(&self, name: &str, tool: &(dyn Tool + Send + Sync)) -> McpTool {
        let (properties, required) = match name {
            "search_messages" => {
                let mut props = HashMap::new();
                props.insert(
                    "query".to_string(),
                    Self::create_string_prop("Words to search for in forum questions and answers"),
                );
                props.insert(
                    "channel".to_string(),
                    Self::create_string_prop(
                        "Forum channel ID or name, with or without the prefix (optional)",
                    ),
                );
                props.insert(
                    "since".to_string(),
                    Self::create_string_prop(
                        "Only messages after this date: YYYY-MM-DD, RFC 3339 or phrases like '2 weeks ago' (optional)",
                    ),
                );
                props.insert(
                    "limit".to_string(),
                    Self::create_number_prop("Maximum number of results (default: 10)", 10),
                );
                (props, vec!["query".to_string()])
            }
            "read_thread" => {
                let mut props = HashMap::new();
                props.insert(
                    "channel".to_string(),
                    Self::create_string_prop("Forum channel ID or name containing the thread"),
                );
                props.insert(
                    "thread_ts".to_string(),
                    Self::create_string_prop("Timestamp of the thread or of any reply in it"),
                );
                props.insert(
                    "limit".to_string(),
                    Self::create_number_prop("Maximum number of messages (default: 100)", 100),
                );
                (props, vec!["channel".to_string(), "thread_ts".to_string()])
            }
            "find_experts" => {
                let mut props = HashMap::new();
                props.insert(
                    "topic".to_string(),
                    Self::create_string_prop("Topic to find experts for"),
                );
                props.insert(
                    "channel".to_string(),
                    Self::create_string_prop("Restrict to one forum channel (optional)"),
                );
                props.insert(
                    "since".to_string(),
                    Self::create_string_prop("Only count activity after this date (optional)"),
                );
                props.insert(
                    "exclude_user".to_string(),
                    Self::create_string_prop("User ID or @name to leave out, usually the asker (optional)"),
                );
                props.insert(
                    "limit".to_string(),
                    Self::create_number_prop("Maximum number of experts (default: 5)", 5),
                );
                (props, vec!["topic".to_string()])
            }
            "search_docs" => {
                let mut props = HashMap::new();
                props.insert(
                    "query".to_string(),
                    Self::create_string_prop("Words to search for in external documentation"),
                );
                props.insert(
                    "limit".to_string(),
                    Self::create_number_prop("Maximum number of results (default: 10)", 10),
                );
                (props, vec!["query".to_string()])
            }
            "list_forum_channels" => {
                let mut props = HashMap::new();
                props.insert(
                    "query".to_string(),
                    Self::create_string_prop("Filter by channel name, topic or purpose (optional)"),
                );
                props.insert(
                    "limit".to_string(),
                    Self::create_number_prop("Maximum number of channels (default: 20)", 20),
                );
                (props, vec![])
            }
            "search_users" => {
                let mut props = HashMap::new();
                props.insert(
                    "query".to_string(),
                    Self::create_string_prop("Search query for user name or email"),
                );
                props.insert(
                    "limit".to_string(),
                    Self::create_number_prop("Maximum number of results (default: 10)", 10),
                );
                (props, vec!["query".to_string()])
            }
            "refresh_cache" => {
                let mut props = HashMap::new();
                props.insert(
                    "type".to_string(),
                    Self::create_enum_prop(
                        "Part of the index to sync",
                        "all",
                        vec!["users", "channels", "messages", "docs", "all"],
                    ),
                );
                props.insert(
                    "force".to_string(),
                    Self::create_bool_prop("Sync even parts that are still fresh", Some(false)),
                );
                (props, vec![])
            }
            "record_feedback" => {
                let mut props = HashMap::new();
                props.insert(
                    "call_id".to_string(),
                    Self::create_string_prop("The call_id returned with the answer"),
                );
                props.insert(
                    "helpful".to_string(),
                    Self::create_bool_prop("Whether the answer helped", None),
                );
                props.insert(
                    "comment".to_string(),
                    Self::create_string_prop("Free-form comment (optional)"),
                );
                (props, vec!["call_id".to_string(), "helpful".to_string()])
            }
            "get_analytics" => {
                let mut props = HashMap::new();
                props.insert(
                    "days".to_string(),
                    Self::create_number_prop("Days to summarize (default: 30)", 30),
                );
                (props, vec![])
            }
            _ => (HashMap::new(), vec![]),
        };

        McpTool {
            name: name.to_string(),
            description: tool.description().to_string(),
            input_schema: ToolInputSchema {
                schema_type: "object".to_string(),
                properties,
                required,
            },
        }
    }
}

/// Length of the first array in a result object, the tool's hit count.
fn first_array_len(result: &Value) -> Option<usize> {
    result
        .as_object()?
        .values()
        .find_map(|v| v.as_array().map(Vec::len))
}
