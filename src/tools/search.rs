use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use super::message_utils::{UserNames, format_message, remove_empty_strings, workspace_url};
use super::{IntoToolResponse, Tool, ToolResponse};
use crate::cache::{MessageQuery, SqliteCache};
use crate::config::Config;
use crate::error::{IntoMcpError, McpError, McpResult};
use crate::forum::ForumPolicy;
use crate::ranking::rank_hits;
use crate::utils::{parse_params, parse_since, resolve_forum_channel};

/// FTS candidates fetched per requested result, re-ranked before truncation
const CANDIDATE_FACTOR: usize = 5;

pub struct SearchMessagesTool {
    cache: Arc<SqliteCache>,
    config: Arc<Config>,
    policy: ForumPolicy,
}

pub struct SearchUsersTool {
    cache: Arc<SqliteCache>,
    config: Arc<Config>,
}

pub struct ListForumChannelsTool {
    cache: Arc<SqliteCache>,
    config: Arc<Config>,
    policy: ForumPolicy,
}

pub struct SearchDocsTool {
    cache: Arc<SqliteCache>,
    config: Arc<Config>,
}

impl SearchMessagesTool {
    pub fn new(cache: Arc<SqliteCache>, config: Arc<Config>) -> Self {
        let policy = ForumPolicy::from_config(&config.forum);
        Self {
            cache,
            config,
            policy,
        }
    }
}

impl SearchUsersTool {
    pub fn new(cache: Arc<SqliteCache>, config: Arc<Config>) -> Self {
        Self { cache, config }
    }
}

impl ListForumChannelsTool {
    pub fn new(cache: Arc<SqliteCache>, config: Arc<Config>) -> Self {
        let policy = ForumPolicy::from_config(&config.forum);
        Self {
            cache,
            config,
            policy,
        }
    }
}

impl SearchDocsTool {
    pub fn new(cache: Arc<SqliteCache>, config: Arc<Config>) -> Self {
        Self { cache, config }
    }
}

#[derive(Debug, Deserialize)]
struct SearchMessagesParams {
    query: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    since: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct ListChannelsParams {
    #[serde(default)]
    query: String,
    #[serde(default = "default_channel_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    10
}

fn default_channel_limit() -> usize {
    20
}

fn require_query(query: &str) -> McpResult<()> {
    if query.trim().is_empty() {
        return Err(McpError::InvalidParameter(
            "'query' must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl Tool for SearchMessagesTool {
    fn description(&self) -> &str {
        "Search forum channel messages, ranked by relevance, engagement and recency"
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let params: SearchMessagesParams = parse_params(params)?;
        require_query(&params.query)?;
        let limit = self.config.clamp_limit(params.limit);

        let channel = match &params.channel {
            Some(channel) => Some(resolve_forum_channel(channel, &self.cache, &self.policy).await?),
            None => None,
        };
        let now = Utc::now();
        let since_epoch = match &params.since {
            Some(since) => Some(parse_since(since, now)?.timestamp() as f64),
            None => None,
        };

        let hits = self
            .cache
            .search_messages(&MessageQuery {
                text: &params.query,
                channel_id: channel.as_ref().map(|c| c.id.as_str()),
                since_epoch,
                limit: limit * CANDIDATE_FACTOR,
            })
            .await
            .mcp_context("Failed to search messages")?;

        let ranked = rank_hits(
            hits,
            now.timestamp() as f64,
            self.config.search.recency_half_life_days,
            limit,
        );

        let workspace = workspace_url(&self.cache).await;
        let mut names = UserNames::new(&self.cache);
        let mut results = Vec::with_capacity(ranked.len());
        for ranked_hit in ranked {
            let mut result =
                format_message(&ranked_hit.hit.message, &mut names, workspace.as_deref()).await;
            result["channel_id"] = json!(ranked_hit.hit.message.channel_id);
            result["channel_name"] = json!(ranked_hit.hit.channel_name);
            result["score"] = json!((ranked_hit.score * 1000.0).round() / 1000.0);
            results.push(result);
        }

        Ok(ToolResponse::data(json!({ "results": results })).into_response()?)
    }
}

#[async_trait]
impl Tool for SearchUsersTool {
    fn description(&self) -> &str {
        "Search people by name, title or email"
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let params: SearchParams = parse_params(params)?;
        let limit = self.config.clamp_limit(params.limit);

        let users = self
            .cache
            .search_users(&params.query, limit)
            .await
            .mcp_context("Failed to search users")?;

        let results: Vec<Value> = users
            .into_iter()
            .map(|user| {
                let mut result = json!({
                    "id": user.id,
                    "name": user.name,
                });

                if let Some(real_name) = user.real_name()
                    && !real_name.is_empty()
                {
                    result["real_name"] = json!(real_name);
                }
                if let Some(display_name) = user.display_name()
                    && !display_name.is_empty()
                    && display_name != user.name
                {
                    result["display_name"] = json!(display_name);
                }
                if let Some(title) = user.title()
                    && !title.is_empty()
                {
                    result["title"] = json!(title);
                }
                if user.deleted {
                    result["deleted"] = json!(true);
                }

                result
            })
            .collect();

        Ok(ToolResponse::data(json!({ "results": results })).into_response()?)
    }
}

#[async_trait]
impl Tool for ListForumChannelsTool {
    fn description(&self) -> &str {
        "List forum channels, optionally filtered by name, topic or purpose"
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let params: ListChannelsParams = parse_params(params)?;
        let limit = self.config.clamp_limit(params.limit);

        let channels = self
            .cache
            .search_channels(&params.query, limit)
            .await
            .mcp_context("Failed to search channels")?;

        let results: Vec<Value> = channels
            .into_iter()
            .filter(|channel| self.policy.admits(channel))
            .map(|channel| {
                let mut result = json!({
                    "id": channel.id,
                    "name": channel.name,
                    "topic": channel.topic_text().unwrap_or_default(),
                    "purpose": channel.purpose_text().unwrap_or_default(),
                });
                if let Some(num_members) = channel.num_members {
                    result["num_members"] = json!(num_members);
                }
                // Only include boolean flags when true
                if channel.is_private {
                    result["is_private"] = json!(true);
                }
                remove_empty_strings(&mut result);
                result
            })
            .collect();

        Ok(ToolResponse::data(json!({ "channels": results })).into_response()?)
    }
}

#[async_trait]
impl Tool for SearchDocsTool {
    fn description(&self) -> &str {
        "Search the external documentation sources"
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let params: SearchParams = parse_params(params)?;
        require_query(&params.query)?;
        let limit = self.config.clamp_limit(params.limit);

        let hits = self
            .cache
            .search_docs(&params.query, limit)
            .await
            .mcp_context("Failed to search docs")?;

        Ok(ToolResponse::data(json!({ "results": hits })).into_response()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DocEntry;
    use crate::cache::helpers::WORKSPACE_URL;
    use crate::slack::types::ChannelTopic;
    use crate::test_support::{create_test_channel, create_test_user, stored, ts_days_ago};
    use pretty_assertions::assert_eq;

    async fn setup() -> (Arc<SqliteCache>, Arc<Config>) {
        let cache = Arc::new(SqliteCache::new(":memory:").await.unwrap());
        let mut rust = create_test_channel("C1", "forum-rust");
        rust.topic = Some(ChannelTopic {
            value: "Ask anything about Rust".to_string(),
            creator: "U1".to_string(),
            last_set: 0,
        });
        cache
            .save_channels(vec![rust, create_test_channel("C2", "forum-infra")])
            .await
            .unwrap();
        cache
            .save_users(vec![
                create_test_user("U1", "alice", Some("alice@example.com"), false),
                create_test_user("U2", "bob", None, false),
            ])
            .await
            .unwrap();
        cache
            .set_metadata(WORKSPACE_URL, "https://acme.slack.com/")
            .await
            .unwrap();
        (cache, Arc::new(Config::default()))
    }

    #[tokio::test]
    async fn test_search_messages_ranks_and_links() {
        let (cache, config) = setup().await;
        let mut popular = stored("C1", &ts_days_ago(2.0), None, "U1", "tokio runtime panics on drop");
        popular.reaction_count = 6;
        cache
            .upsert_messages(&[
                popular,
                stored("C2", &ts_days_ago(300.0), None, "U2", "tokio runtime upgrade notes"),
                stored("C2", &ts_days_ago(1.0), None, "U2", "nothing relevant here"),
            ])
            .await
            .unwrap();

        let tool = SearchMessagesTool::new(cache, config);
        let result = tool.execute(json!({"query": "tokio runtime"})).await.unwrap();

        let results = result["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["channel_name"], "forum-rust");
        assert_eq!(results[0]["user_name"], "alice");
        assert!(results[0]["permalink"]
            .as_str()
            .unwrap()
            .starts_with("https://acme.slack.com/archives/C1/p"));
        assert!(results[0]["score"].as_f64().unwrap() >= results[1]["score"].as_f64().unwrap());
    }

    #[tokio::test]
    async fn test_search_messages_channel_and_since_filters() {
        let (cache, config) = setup().await;
        cache
            .upsert_messages(&[
                stored("C1", &ts_days_ago(40.0), None, "U1", "migrations are failing"),
                stored("C2", &ts_days_ago(2.0), None, "U2", "migrations are slow"),
            ])
            .await
            .unwrap();
        let tool = SearchMessagesTool::new(cache, config);

        let in_rust = tool
            .execute(json!({"query": "migrations", "channel": "rust"}))
            .await
            .unwrap();
        assert_eq!(in_rust["results"].as_array().unwrap().len(), 1);
        assert_eq!(in_rust["results"][0]["channel_id"], "C1");

        let recent = tool
            .execute(json!({
                "query": "migrations",
                "since": (Utc::now() - chrono::Duration::days(14)).to_rfc3339(),
            }))
            .await
            .unwrap();
        assert_eq!(recent["results"].as_array().unwrap().len(), 1);
        assert_eq!(recent["results"][0]["channel_id"], "C2");
    }

    #[tokio::test]
    async fn test_search_messages_rejects_out_of_bounds_channel() {
        let (cache, config) = setup().await;
        let tool = SearchMessagesTool::new(cache, config);

        let err = tool
            .execute(json!({"query": "salary", "channel": "C0HRPRIVATE"}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Forbidden(_)));

        let err = tool.execute(json!({"query": "  "})).await.unwrap_err();
        assert!(matches!(err, McpError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn test_list_forum_channels() {
        let (cache, config) = setup().await;
        let tool = ListForumChannelsTool::new(cache, config);

        let all = tool.execute(json!({})).await.unwrap();
        let channels = all["channels"].as_array().unwrap();
        assert_eq!(channels.len(), 2);
        let rust = channels.iter().find(|c| c["id"] == "C1").unwrap();
        assert_eq!(rust["topic"], "Ask anything about Rust");
        assert_eq!(rust["num_members"], 12);
        assert!(rust.get("purpose").is_none());
    }

    #[tokio::test]
    async fn test_search_users() {
        let (cache, config) = setup().await;
        let tool = SearchUsersTool::new(cache, config);

        let result = tool.execute(json!({"query": "alice"})).await.unwrap();
        let results = result["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["id"], "U1");
        assert_eq!(results[0]["real_name"], "Real alice");
    }

    #[tokio::test]
    async fn test_search_docs() {
        let (cache, config) = setup().await;
        cache
            .replace_docs(
                "handbook",
                &[DocEntry {
                    title: "Release process".to_string(),
                    url: "https://docs.example.com/release".to_string(),
                    content: "Tag the release and let CI publish the crate".to_string(),
                }],
            )
            .await
            .unwrap();
        let tool = SearchDocsTool::new(cache, config);

        let result = tool.execute(json!({"query": "release", "limit": 3})).await.unwrap();
        assert_eq!(result["results"][0]["source"], "handbook");
        assert_eq!(result["results"][0]["url"], "https://docs.example.com/release");
        assert!(result["results"][0].get("bm25").is_none());
    }
}
