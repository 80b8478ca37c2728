use anyhow::Result;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::handlers::RequestHandler;
use super::types::*;

/// Consecutive EOF reads tolerated before the server stops.
const MAX_EMPTY_READS: u32 = 3;

pub struct McpServer {
    handler: Arc<RequestHandler>,
    initialized: RwLock<bool>,
}

impl McpServer {
    pub fn new(handler: RequestHandler) -> Self {
        Self {
            handler: Arc::new(handler),
            initialized: RwLock::new(false),
        }
    }

    pub async fn run(&self) -> Result<()> {
        let reader = BufReader::new(tokio::io::stdin());
        self.run_with(reader, tokio::io::stdout()).await
    }

    /// Serves newline-delimited JSON-RPC from `reader` until input ends.
    pub async fn run_with<R, W>(&self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buffer = String::new();
        let mut empty_reads = 0;

        loop {
            buffer.clear();

            match reader.read_line(&mut buffer).await {
                Ok(0) => {
                    empty_reads += 1;
                    if empty_reads > MAX_EMPTY_READS {
                        info!("Input closed, stopping MCP server");
                        break;
                    }
                    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
                    continue;
                }
                Ok(_) => {
                    empty_reads = 0;
                    let trimmed = buffer.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match self.process_request(trimmed).await {
                        Ok(Some(response)) => response,
                        // Notification
                        Ok(None) => continue,
                        Err(e) => {
                            error!("Error processing request: {}", e);
                            JsonRpcResponse::error(None, JsonRpcError::internal_error(e.to_string()))
                        }
                    };

                    let response_str = serde_json::to_string(&response)?;
                    writer.write_all(response_str.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await?;
                }
                Err(e) => {
                    error!("Error reading from stdin: {}", e);
                    break;
                }
            }
        }

        Ok(())
    }

    async fn process_request(&self, input: &str) -> Result<Option<JsonRpcResponse>> {
        let value: Value = match serde_json::from_str(input) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to parse request: {}", e);
                return Ok(Some(JsonRpcResponse::error(
                    None,
                    JsonRpcError::parse_error(),
                )));
            }
        };

        // Valid JSON that is not a request object
        let id = value.get("id").cloned();
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(req) => req,
            Err(e) => {
                warn!("Invalid request: {}", e);
                return Ok(Some(JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_request(),
                )));
            }
        };

        if request.jsonrpc != "2.0" {
            return Ok(Some(JsonRpcResponse::error(
                request.id.clone(),
                JsonRpcError::invalid_request(),
            )));
        }

        debug!(method = %request.method, "Request received");
        let is_notification = request.id.is_none();

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(request).await?,
            "initialized" | "notifications/initialized" => {
                *self.initialized.write().await = true;
                JsonRpcResponse::success(request.id, Value::Null)
            }
            "ping" => JsonRpcResponse::success(request.id, json!({})),
            "tools/list" => self.handle_list_tools(request).await?,
            "tools/call" => self.handle_call_tool(request).await?,
            "prompts/list" => JsonRpcResponse::success(request.id, json!({ "prompts": [] })),
            "resources/list" => JsonRpcResponse::success(request.id, json!({ "resources": [] })),
            method if method.starts_with("notifications/") => {
                debug!(method, "Ignoring notification");
                return Ok(None);
            }
            _ => {
                warn!("Unknown method: {}", request.method);
                JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::method_not_found(&request.method),
                )
            }
        };

        if is_notification {
            Ok(None)
        } else {
            Ok(Some(response))
        }
    }

    async fn handle_initialize(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let params: InitializeRequest = match request.params.map(serde_json::from_value) {
            Some(Ok(p)) => p,
            Some(Err(e)) => {
                return Ok(JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::invalid_params(format!("Invalid initialize params: {}", e)),
                ));
            }
            None => {
                return Ok(JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::invalid_params("Missing params".to_string()),
                ));
            }
        };

        let protocol_version = if params.protocol_version.starts_with("2025") {
            params.protocol_version.clone()
        } else {
            PROTOCOL_VERSION.to_string()
        };
        if let Some(client) = &params.client_info {
            info!(client = %client.name, version = %client.version, %protocol_version, "Client connected");
        }

        let result = InitializeResult {
            protocol_version,
            capabilities: ServerCapabilities {
                tools: HashMap::new(),
                prompts: HashMap::new(),
                resources: HashMap::new(),
                experimental: Default::default(),
            },
            server_info: ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        Ok(JsonRpcResponse::success(
            request.id,
            serde_json::to_value(result)?,
        ))
    }

    async fn handle_list_tools(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if !*self.initialized.read().await {
            return Ok(JsonRpcResponse::error(
                request.id,
                JsonRpcError::not_initialized(),
            ));
        }

        let tools = self.handler.list_tools().await;
        let result = ListToolsResult { tools };

        Ok(JsonRpcResponse::success(
            request.id,
            serde_json::to_value(result)?,
        ))
    }

    async fn handle_call_tool(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if !*self.initialized.read().await {
            return Ok(JsonRpcResponse::error(
                request.id,
                JsonRpcError::not_initialized(),
            ));
        }

        let params: CallToolRequest = match request.params.map(serde_json::from_value) {
            Some(Ok(p)) => p,
            Some(Err(e)) => {
                return Ok(JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::invalid_params(format!("Invalid tools/call params: {}", e)),
                ));
            }
            None => {
                return Ok(JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::invalid_params("Missing params".to_string()),
                ));
            }
        };

        match self.handler.call_tool(&params.name, params.arguments).await {
            Ok(result) => Ok(JsonRpcResponse::success(
                request.id,
                serde_json::to_value(result)?,
            )),
            Err(e) if e.is_client_error() => {
                warn!(tool = %params.name, "Tool rejected request: {}", e);
                Ok(JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::invalid_params(e.to_string()),
                ))
            }
            Err(e) => {
                error!(tool = %params.name, "Tool execution failed: {}", e);
                Ok(JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::internal_error(e.to_string()),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteCache;
    use crate::config::Config;
    use crate::index::Indexer;
    use crate::slack::MockForumSource;
    use crate::test_support::create_test_channel;
    use pretty_assertions::assert_eq;

    async fn server() -> McpServer {
        let cache = Arc::new(SqliteCache::new(":memory:").await.unwrap());
        cache
            .save_channels(vec![create_test_channel("C1", "forum-rust")])
            .await
            .unwrap();
        let indexer = Arc::new(Indexer::new(
            cache.clone(),
            Arc::new(MockForumSource::new()),
            Config::default(),
        ));
        McpServer::new(RequestHandler::new(cache, indexer, Arc::new(Config::default())))
    }

    /// Feeds the lines to a fresh server and returns every response line.
    async fn exchange(lines: &[&str]) -> Vec<Value> {
        let server = server().await;
        let input = lines.join("\n") + "\n";
        let mut output = Vec::new();
        server
            .run_with(BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    const INIT: &str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"test","version":"1"}}}"#;
    const INITIALIZED: &str = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;

    #[tokio::test]
    async fn test_initialize_then_list_tools() {
        let responses = exchange(&[
            INIT,
            INITIALIZED,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        ])
        .await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(responses[0]["result"]["serverInfo"]["name"], "forum-qa-mcp");
        assert_eq!(responses[1]["id"], 2);
        assert_eq!(responses[1]["result"]["tools"].as_array().unwrap().len(), 9);
    }

    #[tokio::test]
    async fn test_2025_protocol_version_is_echoed() {
        let responses = exchange(&[
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26"}}"#,
        ])
        .await;
        assert_eq!(responses[0]["result"]["protocolVersion"], "2025-03-26");
    }

    #[tokio::test]
    async fn test_tools_before_initialized_rejected() {
        let responses = exchange(&[r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#]).await;
        assert_eq!(responses[0]["id"], 7);
        assert_eq!(responses[0]["error"]["code"], error_codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let responses = exchange(&[
            "{not json",
            r#"{"jsonrpc":"1.0","id":3,"method":"ping"}"#,
            r#"{"jsonrpc":"2.0","id":4,"method":"sampling/createMessage"}"#,
            r#"{"jsonrpc":"2.0","id":5,"method":"ping"}"#,
        ])
        .await;

        assert_eq!(responses[0]["error"]["code"], error_codes::PARSE_ERROR);
        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[1]["error"]["code"], error_codes::INVALID_REQUEST);
        assert_eq!(responses[2]["error"]["code"], error_codes::METHOD_NOT_FOUND);
        assert_eq!(responses[3]["result"], json!({}));
    }

    #[tokio::test]
    async fn test_json_that_is_not_a_request_is_invalid() {
        let responses = exchange(&[
            r#"{"jsonrpc":"2.0","id":7}"#,
            r#"{"jsonrpc":"2.0","id":"abc","method":42}"#,
            r#"[1,2,3]"#,
        ])
        .await;

        assert_eq!(responses[0]["error"]["code"], error_codes::INVALID_REQUEST);
        assert_eq!(responses[0]["id"], 7);
        assert_eq!(responses[1]["error"]["code"], error_codes::INVALID_REQUEST);
        assert_eq!(responses[1]["id"], "abc");
        assert_eq!(responses[2]["error"]["code"], error_codes::INVALID_REQUEST);
        assert_eq!(responses[2]["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_tool_call_errors_map_to_codes() {
        let responses = exchange(&[
            INIT,
            INITIALIZED,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"search_messages","arguments":{"query":"x","channel":"random"}}}"#,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"list_forum_channels","arguments":{}}}"#,
        ])
        .await;

        assert_eq!(responses[1]["error"]["code"], error_codes::INVALID_PARAMS);
        let text = responses[2]["result"]["content"][0]["text"].as_str().unwrap();
        let body: Value = serde_json::from_str(text).unwrap();
        assert_eq!(body["channels"][0]["name"], "forum-rust");
        assert!(body["call_id"].is_string());
    }

    #[tokio::test]
    async fn test_empty_lists_for_prompts_and_resources() {
        let responses = exchange(&[
            r#"{"jsonrpc":"2.0","id":1,"method":"prompts/list"}"#,
            r#"{"jsonrpc":"2.0","id":2,"method":"resources/list"}"#,
        ])
        .await;
        assert_eq!(responses[0]["result"]["prompts"], json!([]));
        assert_eq!(responses[1]["result"]["resources"], json!([]));
    }
}
