use crate::cache::SqliteCache;
use crate::error::{IntoMcpError, McpError, McpResult};
use crate::forum::ForumPolicy;
use crate::slack::types::SlackChannel;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_english::{Dialect, parse_date_string};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Parse JSON value into a typed parameter struct
pub fn parse_params<T: DeserializeOwned>(params: Value) -> McpResult<T> {
    serde_json::from_value(params)
        .map_err(|e| McpError::InvalidParameter(format!("Invalid parameters: {}", e)))
}

fn looks_like_channel_id(identifier: &str) -> bool {
    identifier.len() > 1
        && (identifier.starts_with('C') || identifier.starts_with('G'))
        && identifier
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Resolve a channel argument to a cached forum channel.
/// Supports:
/// - Channel IDs (C..., G...)
/// - #channel-name format
/// - Channel names
/// - Bare suffixes (`rust` for `forum-rust`)
///
/// Channels outside the forum boundary are `Forbidden`, unknown ones are
/// `InvalidParameter` with a suggestion when one is close.
pub async fn resolve_forum_channel(
    identifier: &str,
    cache: &Arc<SqliteCache>,
    policy: &ForumPolicy,
) -> McpResult<SlackChannel> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(McpError::InvalidParameter(
            "Channel must not be empty".to_string(),
        ));
    }

    if looks_like_channel_id(identifier) {
        // Only forum channels are cached, so a miss means out of bounds or unknown
        return match cache
            .get_channel_by_id(identifier)
            .await
            .mcp_context("Failed to look up channel")?
        {
            Some(channel) if policy.admits(&channel) => Ok(channel),
            _ => Err(McpError::Forbidden(format!(
                "Channel '{}' is not a forum channel",
                identifier
            ))),
        };
    }

    let name = identifier.strip_prefix('#').unwrap_or(identifier).to_lowercase();
    let qualified = policy.qualify(&name);

    if let Some(channel) = cache
        .get_channel_by_name(&qualified)
        .await
        .mcp_context("Failed to look up channel")?
        && policy.admits(&channel)
    {
        return Ok(channel);
    }

    let channels = cache
        .get_channels()
        .await
        .mcp_context("Failed to get channels")?;
    match suggest_channel(&name, &channels) {
        Some(suggestion) => Err(McpError::InvalidParameter(format!(
            "Forum channel '{}' not found. Did you mean '#{}'?",
            identifier, suggestion
        ))),
        // Nothing close among forum channels: most likely a channel outside the boundary
        None if !policy.is_forum_name(&name) => Err(McpError::Forbidden(format!(
            "Only channels starting with '{}' can be read",
            policy.prefix()
        ))),
        None => Err(McpError::InvalidParameter(format!(
            "Forum channel '{}' not found",
            identifier
        ))),
    }
}

/// Closest channel name by fuzzy score.
pub fn suggest_channel(query: &str, channels: &[SlackChannel]) -> Option<String> {
    let matcher = SkimMatcherV2::default();
    channels
        .iter()
        .filter_map(|c| matcher.fuzzy_match(&c.name, query).map(|score| (score, &c.name)))
        .max_by_key(|(score, _)| *score)
        .map(|(_, name)| name.clone())
}

/// Parse `since` as RFC 3339, `YYYY-MM-DD` or natural language
/// ("last monday", "2 weeks ago").
pub fn parse_since(input: &str, now: DateTime<Utc>) -> McpResult<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        && let Some(start) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(start.and_utc());
    }

    parse_date_string(input, now, Dialect::Us).map_err(|e| {
        McpError::InvalidParameter(format!("Could not understand date '{}': {}", input, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::create_test_channel;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    async fn setup() -> (Arc<SqliteCache>, ForumPolicy) {
        let cache = Arc::new(SqliteCache::new(":memory:").await.unwrap());
        cache
            .save_channels(vec![
                create_test_channel("C01RUST", "forum-rust"),
                create_test_channel("C02INFRA", "forum-infra"),
            ])
            .await
            .unwrap();
        (cache, ForumPolicy::default())
    }

    #[rstest]
    #[case("C01RUST")]
    #[case("#forum-rust")]
    #[case("forum-rust")]
    #[case("rust")]
    #[case("#Rust")]
    #[tokio::test]
    async fn test_resolve_accepts_every_form(#[case] identifier: &str) {
        let (cache, policy) = setup().await;
        let channel = resolve_forum_channel(identifier, &cache, &policy)
            .await
            .unwrap();
        assert_eq!(channel.id, "C01RUST");
    }

    #[tokio::test]
    async fn test_resolve_rejects_unknown_id_as_forbidden() {
        let (cache, policy) = setup().await;
        let err = resolve_forum_channel("C99SECRET", &cache, &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_resolve_rejects_non_forum_names() {
        let (cache, policy) = setup().await;
        let err = resolve_forum_channel("#team-payroll", &cache, &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_resolve_suggests_close_match() {
        let (cache, policy) = setup().await;
        let err = resolve_forum_channel("infr", &cache, &policy)
            .await
            .unwrap_err();
        match err {
            McpError::InvalidParameter(msg) => assert!(msg.contains("forum-infra"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_unknown_forum_name_is_invalid() {
        let (cache, policy) = setup().await;
        let err = resolve_forum_channel("forum-zzzz", &cache, &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidParameter(_)));
    }

    #[test]
    fn test_suggest_channel_none_without_match() {
        let channels = vec![create_test_channel("C1", "forum-rust")];
        assert_eq!(suggest_channel("zzzz", &channels), None);
    }

    #[rstest]
    #[case("2024-03-01T12:00:00Z", "2024-03-01T12:00:00+00:00")]
    #[case("2024-03-01", "2024-03-01T00:00:00+00:00")]
    fn test_parse_since_absolute(#[case] input: &str, #[case] expected: &str) {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_since(input, now).unwrap().to_rfc3339(), expected);
    }

    #[test]
    fn test_parse_since_relative() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let since = parse_since("2 weeks ago", now).unwrap();
        assert_eq!(since.date_naive(), NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
    }

    #[test]
    fn test_parse_since_rejects_garbage() {
        let err = parse_since("whenever you like", Utc::now()).unwrap_err();
        assert!(matches!(err, McpError::InvalidParameter(_)));
    }
}
