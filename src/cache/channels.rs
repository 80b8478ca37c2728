use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use crate::slack::types::SlackChannel;

use super::helpers::{LAST_CHANNEL_SYNC, json_row};
use super::locks::LockKey;
use super::sqlite_cache::SqliteCache;

impl SqliteCache {
    /// Replace the forum channel list in one transaction. Callers filter
    /// through `ForumPolicy` first; an empty list is allowed and clears it.
    pub async fn save_channels(&self, channels: Vec<SlackChannel>) -> Result<()> {
        let synced_at = serde_json::to_string(&chrono::Utc::now().to_rfc3339())?;

        self.with_lock(LockKey::Channels, || {
            let conn = self.pool.get()?;
            let tx = conn.unchecked_transaction()?;

            tx.execute("DELETE FROM channels", [])?;
            {
                let mut stmt =
                    tx.prepare_cached("INSERT INTO channels (id, data) VALUES (?1, ?2)")?;
                for channel in &channels {
                    let json = serde_json::to_string(channel)?;
                    stmt.execute(params![&channel.id, json])?;
                }
            }

            tx.execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
                params![LAST_CHANNEL_SYNC, synced_at],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn get_channels(&self) -> Result<Vec<SlackChannel>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(
            "SELECT data FROM channels WHERE is_archived = 0 OR is_archived IS NULL ORDER BY name",
        )?;

        let channels = stmt
            .query_map([], json_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(channels)
    }

    pub async fn get_channel_by_id(&self, channel_id: &str) -> Result<Option<SlackChannel>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached("SELECT data FROM channels WHERE id = ?1")?;
        Ok(stmt.query_row(params![channel_id], json_row).optional()?)
    }

    pub async fn get_channel_by_name(&self, name: &str) -> Result<Option<SlackChannel>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached("SELECT data FROM channels WHERE name = ?1")?;
        Ok(stmt.query_row(params![name], json_row).optional()?)
    }

    pub async fn search_channels(&self, query: &str, limit: usize) -> Result<Vec<SlackChannel>> {
        let conn = self.pool.get()?;
        let processed_query = self.process_fts_query(query);

        if processed_query.is_empty() {
            let mut stmt = conn.prepare_cached(
                "SELECT data FROM channels
                 WHERE (is_archived = 0 OR is_archived IS NULL)
                 ORDER BY name
                 LIMIT ?1",
            )?;
            let channels = stmt
                .query_map(params![limit], json_row)?
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(channels);
        }

        // Name, topic and purpose are all searchable
        let fts_result = conn
            .prepare_cached(
                "SELECT c.data
                 FROM channels c
                 JOIN channels_fts f ON c.rowid = f.rowid
                 WHERE channels_fts MATCH ?1
                 AND (c.is_archived = 0 OR c.is_archived IS NULL)
                 ORDER BY rank
                 LIMIT ?2",
            )
            .and_then(|mut stmt| {
                stmt.query_map(params![&processed_query, limit], json_row)?
                    .collect::<Result<Vec<_>, _>>()
            });

        match fts_result {
            Ok(channels) => Ok(channels),
            Err(_) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT data FROM channels
                     WHERE (is_archived = 0 OR is_archived IS NULL)
                     AND name LIKE ?1
                     ORDER BY name
                     LIMIT ?2",
                )?;
                let like_query = format!("%{}%", query.trim());
                let channels = stmt
                    .query_map(params![like_query, limit], json_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(channels)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slack::types::ChannelPurpose;
    use crate::test_support::create_test_channel;

    async fn setup_cache() -> SqliteCache {
        SqliteCache::new(":memory:")
            .await
            .expect("Failed to create test cache")
    }

    #[tokio::test]
    async fn test_save_and_get_channels_sorted() {
        let cache = setup_cache().await;
        cache
            .save_channels(vec![
                create_test_channel("C2", "forum-rust"),
                create_test_channel("C1", "forum-infra"),
            ])
            .await
            .unwrap();

        let names: Vec<_> = cache
            .get_channels()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["forum-infra", "forum-rust"]);
    }

    #[tokio::test]
    async fn test_save_empty_channel_list_clears() {
        let cache = setup_cache().await;
        cache
            .save_channels(vec![create_test_channel("C1", "forum-rust")])
            .await
            .unwrap();
        cache.save_channels(vec![]).await.unwrap();

        assert!(cache.get_channels().await.unwrap().is_empty());
        assert!(cache.last_synced(LAST_CHANNEL_SYNC).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lookup_by_id_and_name() {
        let cache = setup_cache().await;
        cache
            .save_channels(vec![create_test_channel("C1", "forum-rust")])
            .await
            .unwrap();

        assert_eq!(
            cache.get_channel_by_id("C1").await.unwrap().unwrap().name,
            "forum-rust"
        );
        assert_eq!(
            cache.get_channel_by_name("forum-rust").await.unwrap().unwrap().id,
            "C1"
        );
        assert!(cache.get_channel_by_id("C9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_channels_matches_purpose() {
        let cache = setup_cache().await;
        let mut infra = create_test_channel("C1", "forum-infra");
        infra.purpose = Some(ChannelPurpose {
            value: "Kubernetes and deployment questions".to_string(),
            creator: "U1".to_string(),
            last_set: 0,
        });
        cache
            .save_channels(vec![infra, create_test_channel("C2", "forum-rust")])
            .await
            .unwrap();

        let results = cache.search_channels("kubernetes", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "C1");

        let all = cache.search_channels("", 10).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
