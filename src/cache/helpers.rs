use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::de::DeserializeOwned;

use super::sqlite_cache::SqliteCache;

pub const LAST_USER_SYNC: &str = "last_user_sync";
pub const LAST_CHANNEL_SYNC: &str = "last_channel_sync";
pub const LAST_MESSAGE_SYNC: &str = "last_message_sync";
pub const LAST_DOCS_SYNC: &str = "last_docs_sync";
pub const WORKSPACE_URL: &str = "workspace_url";

/// Decode the JSON `data` column of a row.
pub(super) fn json_row<T: DeserializeOwned>(row: &Row<'_>) -> rusqlite::Result<T> {
    let json: String = row.get(0)?;
    serde_json::from_str(&json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Turn free text into an FTS5 expression matching any of its terms.
/// bm25 then ranks rows matching more terms higher.
pub fn build_match_query(query: &str) -> String {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();

    terms.join(" OR ")
}

impl SqliteCache {
    pub(super) fn process_fts_query(&self, query: &str) -> String {
        let trimmed = query.trim();

        // Handle empty queries
        if trimmed.is_empty() {
            return String::new();
        }

        // Handle wildcard-only queries
        if trimmed == "*" || trimmed == "%" {
            return String::new();
        }

        // Escape and clean FTS5 special characters
        let cleaned = trimmed
            .replace("\"", "\"\"") // Escape quotes
            .replace("*", "") // Remove wildcards
            .replace("%", "") // Remove SQL wildcards
            .trim()
            .to_string();

        if cleaned.is_empty() {
            return String::new();
        }

        // Return as phrase search for better results
        format!("\"{}\"", cleaned)
    }

    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        let value = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Record that the data behind `key` was synced just now.
    pub async fn mark_synced(&self, key: &str) -> Result<()> {
        let now = serde_json::to_string(&Utc::now().to_rfc3339())?;
        self.set_metadata(key, &now).await
    }

    pub async fn last_synced(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let value = self.get_metadata(key).await?;
        Ok(value.and_then(|v| {
            DateTime::parse_from_rfc3339(v.trim_matches('"'))
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }))
    }

    /// A key never synced, or holding an unparseable time, is stale.
    pub async fn is_stale(&self, key: &str, ttl: Duration) -> Result<bool> {
        let threshold = Utc::now() - ttl;
        Ok(match self.last_synced(key).await? {
            Some(synced) => synced < threshold,
            None => true,
        })
    }
}
