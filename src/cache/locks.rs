use std::fmt;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use super::sqlite_cache::SqliteCache;

/// A held lock expires after this long, so a crashed holder cannot block
/// other processes sharing the database for longer.
const LOCK_TTL_SECS: i64 = 60;
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 1000;

/// Directory tables rewritten wholesale by a sync. Several server
/// processes may share one database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKey {
    Users,
    Channels,
    Docs,
}

impl LockKey {
    fn as_str(self) -> &'static str {
        match self {
            LockKey::Users => "users_update",
            LockKey::Channels => "channels_update",
            LockKey::Docs => "docs_update",
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq)]
enum Attempt {
    Acquired,
    HeldBy(String),
}

impl SqliteCache {
    fn try_acquire(&self, conn: &Connection, key: LockKey) -> Result<Attempt> {
        let now = Utc::now().timestamp();

        // Expired locks belong to holders that died mid-sync
        let reclaimed = conn.execute("DELETE FROM locks WHERE expires_at < ?1", params![now])?;
        if reclaimed > 0 {
            warn!(reclaimed, "Took over expired cache locks");
        }

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO locks (key, instance_id, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key.as_str(), &self.instance_id, now, now + LOCK_TTL_SECS],
        )?;
        if inserted == 1 {
            return Ok(Attempt::Acquired);
        }

        let holder: Option<String> = conn
            .query_row(
                "SELECT instance_id FROM locks WHERE key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match holder {
            // Released between the insert and the lookup
            None => Attempt::HeldBy(String::new()),
            Some(holder) if holder == self.instance_id => Attempt::Acquired,
            Some(holder) => Attempt::HeldBy(holder),
        })
    }

    pub(super) async fn acquire_lock(&self, key: LockKey) -> Result<()> {
        let mut backoff = Duration::from_millis(INITIAL_BACKOFF_MS);
        let mut holder = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let state = {
                let conn = self.pool.get()?;
                self.try_acquire(&conn, key)?
            };
            match state {
                Attempt::Acquired => return Ok(()),
                Attempt::HeldBy(other) => {
                    debug!(%key, holder = %other, attempt, "Cache lock busy");
                    holder = other;
                }
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_millis(MAX_BACKOFF_MS));
            }
        }

        Err(anyhow::anyhow!(
            "Failed to acquire lock '{}' after {} attempts (held by {})",
            key,
            MAX_ATTEMPTS,
            holder
        ))
    }

    pub(super) async fn release_lock(&self, key: LockKey) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM locks WHERE key = ?1 AND instance_id = ?2",
            params![key.as_str(), &self.instance_id],
        )?;
        Ok(())
    }

    /// Runs `f` while holding `key`. The lock is released whether `f`
    /// succeeds or not.
    pub(super) async fn with_lock<F, R>(&self, key: LockKey, f: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>,
    {
        self.acquire_lock(key).await?;
        let result = f();

        if let Err(e) = self.release_lock(key).await {
            warn!(%key, error = %e, "Failed to release lock, it will expire");
        }

        result
    }
}

#[cfg(test)]
impl SqliteCache {
    /// Leaves the docs lock with another live process, so doc writes fail.
    pub(crate) fn hold_docs_lock_elsewhere(&self) -> Result<()> {
        let conn = self.pool.get()?;
        let now = Utc::now().timestamp();
        conn.execute(
            "INSERT OR REPLACE INTO locks (key, instance_id, acquired_at, expires_at)
             VALUES (?1, 'other-process', ?2, ?3)",
            params![LockKey::Docs.as_str(), now, now + 3600],
        )?;
        Ok(())
    }
}
