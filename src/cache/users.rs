use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use crate::slack::types::SlackUser;

use super::helpers::{LAST_USER_SYNC, json_row};
use super::locks::LockKey;
use super::sqlite_cache::SqliteCache;

impl SqliteCache {
    /// Replace the whole user directory in one transaction.
    pub async fn save_users(&self, users: Vec<SlackUser>) -> Result<()> {
        if users.is_empty() {
            return Err(anyhow::anyhow!("No users to save"));
        }

        let synced_at = serde_json::to_string(&chrono::Utc::now().to_rfc3339())?;

        self.with_lock(LockKey::Users, || {
            let conn = self.pool.get()?;
            let tx = conn.unchecked_transaction()?;
            let mut saved = 0;

            tx.execute("DELETE FROM users", [])?;
            {
                let mut stmt = tx.prepare_cached("INSERT INTO users (id, data) VALUES (?1, ?2)")?;
                for user in &users {
                    if let Ok(json) = serde_json::to_string(user)
                        && stmt.execute(params![&user.id, json]).is_ok()
                    {
                        saved += 1;
                    }
                }
            }

            if saved == 0 {
                // Dropping the transaction rolls back the delete
                return Err(anyhow::anyhow!("Failed to save any users"));
            }

            tx.execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
                params![LAST_USER_SYNC, synced_at],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Human users, sorted by handle.
    pub async fn get_users(&self) -> Result<Vec<SlackUser>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(
            "SELECT data FROM users WHERE is_bot = 0 OR is_bot IS NULL ORDER BY name",
        )?;

        let users = stmt
            .query_map([], json_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(users)
    }

    pub async fn get_user_by_id(&self, user_id: &str) -> Result<Option<SlackUser>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached("SELECT data FROM users WHERE id = ?1")?;
        let user = stmt.query_row(params![user_id], json_row).optional()?;
        Ok(user)
    }

    pub async fn search_users(&self, query: &str, limit: usize) -> Result<Vec<SlackUser>> {
        let conn = self.pool.get()?;
        let processed_query = self.process_fts_query(query);

        if processed_query.is_empty() {
            let mut stmt = conn.prepare_cached(
                "SELECT data FROM users WHERE is_bot = 0 OR is_bot IS NULL ORDER BY name LIMIT ?1",
            )?;
            let users = stmt
                .query_map(params![limit], json_row)?
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(users);
        }

        let fts_result = conn
            .prepare_cached(
                "SELECT u.data
                 FROM users u
                 JOIN users_fts f ON u.rowid = f.rowid
                 WHERE users_fts MATCH ?1
                 AND (u.is_bot = 0 OR u.is_bot IS NULL)
                 ORDER BY rank
                 LIMIT ?2",
            )
            .and_then(|mut stmt| {
                stmt.query_map(params![&processed_query, limit], json_row)?
                    .collect::<Result<Vec<_>, _>>()
            });

        match fts_result {
            Ok(users) => Ok(users),
            Err(_) => {
                // Fallback to LIKE search if FTS5 rejects the expression
                let mut stmt = conn.prepare_cached(
                    "SELECT data FROM users
                     WHERE (is_bot = 0 OR is_bot IS NULL)
                     AND (name LIKE ?1 OR display_name LIKE ?1 OR real_name LIKE ?1 OR email LIKE ?1)
                     ORDER BY name
                     LIMIT ?2",
                )?;

                let like_query = format!("%{}%", query.trim());
                let users = stmt
                    .query_map(params![like_query, limit], json_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(users)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::create_test_user;
    use fake::Fake;
    use fake::faker::internet::en::Username;
    use rstest::rstest;

    async fn setup_cache() -> SqliteCache {
        SqliteCache::new(":memory:")
            .await
            .expect("Failed to create test cache")
    }

    #[tokio::test]
    async fn test_save_users_empty_vec() {
        let cache = setup_cache().await;
        let result = cache.save_users(vec![]).await;
        assert_eq!(result.unwrap_err().to_string(), "No users to save");
    }

    #[tokio::test]
    async fn test_save_users_stamps_sync_time() {
        let cache = setup_cache().await;
        cache
            .save_users(vec![create_test_user("U1", "alice", Some("alice@example.com"), false)])
            .await
            .unwrap();

        assert!(cache.last_synced(LAST_USER_SYNC).await.unwrap().is_some());
        assert!(cache.get_user_by_id("U1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_save_users_replaces_existing() {
        let cache = setup_cache().await;
        cache
            .save_users(vec![
                create_test_user("U123", "alice", Some("alice@example.com"), false),
                create_test_user("U456", "bob", Some("bob@example.com"), false),
            ])
            .await
            .unwrap();

        cache
            .save_users(vec![
                create_test_user("U123", "alice_updated", Some("alice.new@example.com"), false),
                create_test_user("U789", "charlie", Some("charlie@example.com"), false),
            ])
            .await
            .unwrap();

        let all_users = cache.get_users().await.unwrap();
        assert_eq!(all_users.len(), 2);

        let alice = cache.get_user_by_id("U123").await.unwrap().unwrap();
        assert_eq!(alice.name, "alice_updated");
        assert!(cache.get_user_by_id("U456").await.unwrap().is_none());

        // The FTS index follows the swap
        assert!(cache.search_users("bob", 10).await.unwrap().is_empty());
        assert_eq!(cache.search_users("charlie", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_users_filters_bots_and_sorts() {
        let cache = setup_cache().await;
        cache
            .save_users(vec![
                create_test_user("U3", "charlie", None, false),
                create_test_user("B1", "deploybot", None, true),
                create_test_user("U1", "alice", None, false),
            ])
            .await
            .unwrap();

        let names: Vec<_> = cache
            .get_users()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.name)
            .collect();
        assert_eq!(names, vec!["alice", "charlie"]);

        // Lookup by ID still returns bots
        assert!(cache.get_user_by_id("B1").await.unwrap().unwrap().is_bot);
    }

    #[rstest]
    #[case("alice", 1)]
    #[case("bob", 1)]
    #[case("example.com", 2)]
    #[case("nobody", 0)]
    #[tokio::test]
    async fn test_search_users(#[case] query: &str, #[case] expected_count: usize) {
        let cache = setup_cache().await;
        cache
            .save_users(vec![
                create_test_user("U123", "alice", Some("alice@example.com"), false),
                create_test_user("U456", "bob", Some("bob@example.com"), false),
            ])
            .await
            .unwrap();

        let results = cache.search_users(query, 10).await.unwrap();
        assert_eq!(results.len(), expected_count);
    }

    #[tokio::test]
    async fn test_search_users_excludes_bots() {
        let cache = setup_cache().await;
        cache
            .save_users(vec![
                create_test_user("U1", "alice", None, false),
                create_test_user("B1", "helper", None, true),
            ])
            .await
            .unwrap();

        assert!(cache.search_users("helper", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_users_empty_query_respects_limit() {
        let cache = setup_cache().await;
        let users: Vec<SlackUser> = (0..5)
            .map(|i| {
                let name: String = Username().fake();
                create_test_user(&format!("U{i}"), &format!("{name}{i}"), None, false)
            })
            .collect();
        cache.save_users(users).await.unwrap();

        assert_eq!(cache.search_users("", 3).await.unwrap().len(), 3);
        assert_eq!(cache.search_users("*", 10).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_search_users_is_case_insensitive() {
        let cache = setup_cache().await;
        cache
            .save_users(vec![create_test_user("U1", "Alice", None, false)])
            .await
            .unwrap();

        assert_eq!(cache.search_users("alice", 10).await.unwrap().len(), 1);
        assert_eq!(cache.search_users("ALICE", 10).await.unwrap().len(), 1);
    }
}
