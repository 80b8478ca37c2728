use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;

use super::message_utils::{get_user_display_name, permalink, slack_ts_to_iso8601, workspace_url};
use super::{IntoToolResponse, Tool, ToolResponse};
use crate::cache::{MessageQuery, SqliteCache};
use crate::config::Config;
use crate::error::{IntoMcpError, McpError, McpResult};
use crate::experts::rank_experts;
use crate::forum::ForumPolicy;
use crate::utils::{parse_params, parse_since, resolve_forum_channel};

pub struct FindExpertsTool {
    cache: Arc<SqliteCache>,
    config: Arc<Config>,
    policy: ForumPolicy,
}

impl FindExpertsTool {
    pub fn new(cache: Arc<SqliteCache>, config: Arc<Config>) -> Self {
        let policy = ForumPolicy::from_config(&config.forum);
        Self {
            cache,
            config,
            policy,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FindExpertsParams {
    topic: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    since: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    exclude_user: Option<String>,
}

fn default_limit() -> usize {
    5
}

#[async_trait]
impl Tool for FindExpertsTool {
    fn description(&self) -> &str {
        "Find people who answer questions about a topic in forum channels"
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let params: FindExpertsParams = parse_params(params)?;
        if params.topic.trim().is_empty() {
            return Err(McpError::InvalidParameter(
                "'topic' must not be empty".to_string(),
            ));
        }
        let limit = self.config.clamp_limit(params.limit);
        let experts_config = &self.config.experts;

        let channel = match &params.channel {
            Some(channel) => Some(resolve_forum_channel(channel, &self.cache, &self.policy).await?),
            None => None,
        };
        let now = Utc::now();
        let since = match &params.since {
            Some(since) => parse_since(since, now)?,
            None => now - chrono::Duration::days(experts_config.lookback_days as i64),
        };

        let hits = self
            .cache
            .search_messages(&MessageQuery {
                text: &params.topic,
                channel_id: channel.as_ref().map(|c| c.id.as_str()),
                since_epoch: Some(since.timestamp() as f64),
                limit: experts_config.max_candidates,
            })
            .await
            .mcp_context("Failed to search messages")?;

        // Bots, deactivated accounts and the asker never count as experts
        let mut excluded = HashSet::new();
        let authors: HashSet<&str> = hits
            .iter()
            .filter_map(|h| h.message.user_id.as_deref())
            .collect();
        let mut profiles = std::collections::HashMap::new();
        for author in authors {
            if let Some(user) = self
                .cache
                .get_user_by_id(author)
                .await
                .mcp_context("Failed to read user")?
            {
                if user.is_automated() || user.deleted {
                    excluded.insert(author.to_string());
                }
                profiles.insert(author.to_string(), user);
            }
        }
        if let Some(exclude) = params.exclude_user.as_deref() {
            let exclude = exclude.trim_start_matches('@');
            excluded.insert(exclude.to_string());
            excluded.extend(
                profiles
                    .values()
                    .filter(|u| u.name == exclude)
                    .map(|u| u.id.clone()),
            );
        }

        let mut ranked = rank_experts(&hits, experts_config, now.timestamp() as f64, &excluded);
        ranked.truncate(limit);

        let workspace = workspace_url(&self.cache).await;
        let experts: Vec<Value> = ranked
            .into_iter()
            .map(|expert| {
                let mut result = json!({
                    "user_id": expert.user_id,
                    "score": (expert.score * 100.0).round() / 100.0,
                    "answers": expert.answers,
                    "questions": expert.questions,
                    "messages": expert.messages,
                    "channels": expert.channels,
                });
                if let Some(user) = profiles.get(&expert.user_id) {
                    result["user_name"] = json!(get_user_display_name(user));
                    if let Some(title) = user.title().filter(|t| !t.is_empty()) {
                        result["title"] = json!(title);
                    }
                }
                if let Some(iso) = slack_ts_to_iso8601(&format!("{:.6}", expert.last_active_epoch)) {
                    result["last_active"] = json!(iso);
                }
                let samples: Vec<Value> = expert
                    .samples
                    .iter()
                    .map(|s| match &workspace {
                        Some(url) => json!(permalink(url, &s.channel_id, &s.ts, s.thread_ts.as_deref())),
                        None => json!({"channel_id": s.channel_id, "ts": s.ts}),
                    })
                    .collect();
                result["samples"] = json!(samples);
                result
            })
            .collect();

        Ok(ToolResponse::data(json!({ "experts": experts })).into_response()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::helpers::WORKSPACE_URL;
    use crate::test_support::{create_test_channel, create_test_user, stored, ts_days_ago};
    use pretty_assertions::assert_eq;

    async fn setup() -> Arc<SqliteCache> {
        let cache = Arc::new(SqliteCache::new(":memory:").await.unwrap());
        cache
            .save_channels(vec![
                create_test_channel("C1", "forum-data"),
                create_test_channel("C2", "forum-infra"),
            ])
            .await
            .unwrap();
        let mut departed = create_test_user("U4", "dave", None, false);
        departed.deleted = true;
        cache
            .save_users(vec![
                create_test_user("U1", "alice", None, false),
                create_test_user("U2", "bob", None, false),
                create_test_user("U3", "carol", None, false),
                create_test_user("B1", "deploybot", None, true),
                departed,
            ])
            .await
            .unwrap();

        let q1 = ts_days_ago(10.0);
        let q2 = ts_days_ago(5.0);
        let mut question = stored("C1", &q1, Some(&q1), "U1", "Postgres vacuum is stuck");
        question.reply_count = 2;
        let mut answer = stored("C1", &ts_days_ago(9.0), Some(&q1), "U2", "Run vacuum verbose on postgres");
        answer.reaction_count = 4;
        let mut second = stored("C2", &q2, Some(&q2), "U3", "postgres failover question");
        second.reply_count = 1;
        cache
            .upsert_messages(&[
                question,
                answer,
                stored("C1", &ts_days_ago(8.0), Some(&q1), "U4", "postgres autovacuum tuning"),
                second,
                stored("C2", &ts_days_ago(4.0), Some(&q2), "U2", "postgres uses patroni here"),
                stored("C2", &ts_days_ago(3.0), None, "B1", "postgres backup finished"),
            ])
            .await
            .unwrap();
        cache
            .set_metadata(WORKSPACE_URL, "https://acme.slack.com/")
            .await
            .unwrap();
        cache
    }

    #[tokio::test]
    async fn test_answerer_ranks_first_and_bots_and_deleted_are_dropped() {
        let cache = setup().await;
        let tool = FindExpertsTool::new(cache, Arc::new(Config::default()));

        let result = tool.execute(json!({"topic": "postgres"})).await.unwrap();
        let experts = result["experts"].as_array().unwrap();
        let ids: Vec<_> = experts.iter().map(|e| e["user_id"].as_str().unwrap()).collect();

        assert_eq!(ids[0], "U2");
        assert!(!ids.contains(&"B1"));
        assert!(!ids.contains(&"U4"));
        assert_eq!(experts[0]["answers"], 2);
        assert_eq!(experts[0]["user_name"], "bob");
        assert_eq!(experts[0]["channels"], json!(["forum-data", "forum-infra"]));
        assert!(experts[0]["samples"][0]
            .as_str()
            .unwrap()
            .starts_with("https://acme.slack.com/archives/"));
        assert!(experts[0]["last_active"].is_string());
    }

    #[tokio::test]
    async fn test_exclude_user_by_id_or_name_and_channel_filter() {
        let cache = setup().await;
        let tool = FindExpertsTool::new(cache, Arc::new(Config::default()));

        let result = tool
            .execute(json!({"topic": "postgres", "exclude_user": "@bob"}))
            .await
            .unwrap();
        let ids: Vec<_> = result["experts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["user_id"].as_str().unwrap().to_string())
            .collect();
        assert!(!ids.contains(&"U2".to_string()));

        let infra_only = tool
            .execute(json!({"topic": "postgres", "channel": "infra", "exclude_user": "U2"}))
            .await
            .unwrap();
        let experts = infra_only["experts"].as_array().unwrap();
        assert_eq!(experts.len(), 1);
        assert_eq!(experts[0]["user_id"], "U3");
        assert_eq!(experts[0]["questions"], 1);
    }

    #[tokio::test]
    async fn test_since_limits_lookback() {
        let cache = setup().await;
        let tool = FindExpertsTool::new(cache, Arc::new(Config::default()));

        let result = tool
            .execute(json!({
                "topic": "postgres",
                "since": (Utc::now() - chrono::Duration::days(6)).to_rfc3339(),
            }))
            .await
            .unwrap();
        let ids: Vec<_> = result["experts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["user_id"].as_str().unwrap().to_string())
            .collect();
        assert!(!ids.contains(&"U1".to_string()));
        assert!(ids.contains(&"U3".to_string()));
    }

    #[tokio::test]
    async fn test_empty_topic_rejected() {
        let cache = setup().await;
        let tool = FindExpertsTool::new(cache, Arc::new(Config::default()));
        let err = tool.execute(json!({"topic": " "})).await.unwrap_err();
        assert!(matches!(err, McpError::InvalidParameter(_)));
    }
}
