use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;

use crate::slack::types::SlackMessage;

use super::helpers::build_match_query;
use super::sqlite_cache::SqliteCache;

/// Subtypes that carry no question or answer content.
const SKIPPED_SUBTYPES: &[&str] = &[
    "channel_join",
    "channel_leave",
    "channel_topic",
    "channel_purpose",
    "channel_name",
    "channel_archive",
    "channel_unarchive",
    "pinned_item",
    "unpinned_item",
    "tombstone",
];

/// A forum message as persisted in the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    pub channel_id: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub user_id: Option<String>,
    pub text: String,
    pub reply_count: i64,
    pub reaction_count: i64,
    pub is_bot: bool,
}

impl StoredMessage {
    /// Returns `None` for messages that are not worth indexing.
    pub fn from_slack(channel_id: &str, msg: &SlackMessage) -> Option<Self> {
        if msg.text.trim().is_empty() {
            return None;
        }
        if let Some(subtype) = msg.subtype.as_deref()
            && SKIPPED_SUBTYPES.contains(&subtype)
        {
            return None;
        }

        Some(Self {
            channel_id: channel_id.to_string(),
            ts: msg.ts.clone(),
            thread_ts: msg.thread_ts.clone(),
            user_id: msg.user.clone(),
            text: msg.text.clone(),
            reply_count: msg.reply_count.unwrap_or(0).max(0) as i64,
            reaction_count: msg.reaction_count(),
            is_bot: msg.bot_id.is_some() || msg.subtype.as_deref() == Some("bot_message"),
        })
    }

    pub fn ts_epoch(&self) -> f64 {
        ts_to_epoch(&self.ts)
    }

    pub fn is_thread_parent(&self) -> bool {
        self.thread_ts.as_deref() == Some(self.ts.as_str())
    }

    pub fn is_thread_reply(&self) -> bool {
        matches!(&self.thread_ts, Some(t) if t != &self.ts)
    }

    /// The thread this message belongs to, or its own ts when standalone.
    pub fn thread_root(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

/// Slack history between two exclusive timestamps that has not been read yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryGap {
    pub oldest: String,
    pub latest: String,
}

pub fn ts_to_epoch(ts: &str) -> f64 {
    ts.parse::<f64>().unwrap_or(0.0)
}

/// Full-text match plus the context ranking and expert scoring need.
#[derive(Debug, Clone)]
pub struct MessageHit {
    pub message: StoredMessage,
    pub channel_name: String,
    /// FTS5 bm25; lower is better and matches are negative.
    pub bm25: f64,
    /// Author of the thread parent, when the hit is a reply.
    pub parent_user_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageQuery<'a> {
    pub text: &'a str,
    pub channel_id: Option<&'a str>,
    pub since_epoch: Option<f64>,
    pub limit: usize,
}

const MESSAGE_COLUMNS: &str =
    "m.channel_id, m.ts, m.thread_ts, m.user_id, m.text, m.reply_count, m.reaction_count, m.is_bot";

fn stored_message_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        channel_id: row.get(0)?,
        ts: row.get(1)?,
        thread_ts: row.get(2)?,
        user_id: row.get(3)?,
        text: row.get(4)?,
        reply_count: row.get(5)?,
        reaction_count: row.get(6)?,
        is_bot: row.get(7)?,
    })
}

impl SqliteCache {
    /// Insert or refresh messages; returns how many rows were written.
    pub async fn upsert_messages(&self, messages: &[StoredMessage]) -> Result<usize> {
        if messages.is_empty() {
            return Ok(0);
        }

        let conn = self.pool.get()?;
        let tx = conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO messages
                    (channel_id, ts, thread_ts, user_id, text, reply_count, reaction_count, is_bot, ts_epoch)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(channel_id, ts) DO UPDATE SET
                    thread_ts = excluded.thread_ts,
                    user_id = excluded.user_id,
                    text = excluded.text,
                    reply_count = excluded.reply_count,
                    reaction_count = excluded.reaction_count,
                    is_bot = excluded.is_bot,
                    indexed_at = unixepoch()",
            )?;

            for msg in messages {
                written += stmt.execute(params![
                    msg.channel_id,
                    msg.ts,
                    msg.thread_ts,
                    msg.user_id,
                    msg.text,
                    msg.reply_count,
                    msg.reaction_count,
                    msg.is_bot,
                    msg.ts_epoch(),
                ])?;
            }
        }
        tx.commit()?;

        Ok(written)
    }

    /// Full-text search over indexed forum messages, best bm25 first.
    /// Only messages of channels still in the forum channel list are returned.
    pub async fn search_messages(&self, query: &MessageQuery<'_>) -> Result<Vec<MessageHit>> {
        let match_expr = build_match_query(query.text);
        if match_expr.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}, c.name, bm25(messages_fts) AS score, p.user_id
             FROM messages_fts f
             JOIN messages m ON m.rowid = f.rowid
             JOIN channels c ON c.id = m.channel_id
             LEFT JOIN messages p
                ON p.channel_id = m.channel_id AND p.ts = m.thread_ts AND m.thread_ts != m.ts
             WHERE messages_fts MATCH ?1
             AND (?2 IS NULL OR m.channel_id = ?2)
             AND (?3 IS NULL OR m.ts_epoch >= ?3)
             ORDER BY score
             LIMIT ?4"
        );

        let mut stmt = conn.prepare_cached(&sql)?;
        let hits = stmt
            .query_map(
                params![match_expr, query.channel_id, query.since_epoch, query.limit],
                |row| {
                    Ok(MessageHit {
                        message: stored_message_row(row)?,
                        channel_name: row.get(8)?,
                        bm25: row.get(9)?,
                        parent_user_id: row.get(10)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(hits)
    }

    /// Parent first, then replies in chronological order.
    pub async fn get_thread(&self, channel_id: &str, thread_ts: &str) -> Result<Vec<StoredMessage>> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages m
             WHERE m.channel_id = ?1 AND (m.ts = ?2 OR m.thread_ts = ?2)
             ORDER BY (m.ts = ?2) DESC, m.ts_epoch ASC"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let messages = stmt
            .query_map(params![channel_id, thread_ts], stored_message_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    pub async fn get_message(&self, channel_id: &str, ts: &str) -> Result<Option<StoredMessage>> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.channel_id = ?1 AND m.ts = ?2");
        let mut stmt = conn.prepare_cached(&sql)?;
        Ok(stmt
            .query_row(params![channel_id, ts], stored_message_row)
            .optional()?)
    }

    /// Thread parents with replies posted at or after `since_epoch`,
    /// as `(channel_id, thread_ts)` pairs.
    pub async fn recent_thread_parents(&self, since_epoch: f64) -> Result<Vec<(String, String)>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(
            "SELECT channel_id, ts FROM messages
             WHERE thread_ts = ts AND reply_count > 0 AND ts_epoch >= ?1
             ORDER BY ts_epoch DESC",
        )?;
        let parents = stmt
            .query_map(params![since_epoch], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parents)
    }

    pub async fn message_count(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Newest top-level ts already indexed for a channel.
    pub async fn get_channel_cursor(&self, channel_id: &str) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        let cursor = conn
            .query_row(
                "SELECT latest_ts FROM channel_sync WHERE channel_id = ?1",
                params![channel_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor)
    }

    pub async fn set_channel_cursor(&self, channel_id: &str, latest_ts: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO channel_sync (channel_id, latest_ts, synced_at) VALUES (?1, ?2, unixepoch())
             ON CONFLICT(channel_id) DO UPDATE SET latest_ts = excluded.latest_ts, synced_at = excluded.synced_at",
            params![channel_id, latest_ts],
        )?;
        Ok(())
    }

    /// History range still owed to a channel after a capped sync round.
    pub async fn get_channel_gap(&self, channel_id: &str) -> Result<Option<HistoryGap>> {
        let conn = self.pool.get()?;
        let gap = conn
            .query_row(
                "SELECT oldest_ts, latest_ts FROM channel_backfill WHERE channel_id = ?1",
                params![channel_id],
                |row| {
                    Ok(HistoryGap {
                        oldest: row.get(0)?,
                        latest: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(gap)
    }

    /// Stores the pending range, or clears it when `gap` is `None`.
    pub async fn set_channel_gap(&self, channel_id: &str, gap: Option<&HistoryGap>) -> Result<()> {
        let conn = self.pool.get()?;
        match gap {
            Some(gap) => conn.execute(
                "INSERT INTO channel_backfill (channel_id, oldest_ts, latest_ts) VALUES (?1, ?2, ?3)
                 ON CONFLICT(channel_id) DO UPDATE SET oldest_ts = excluded.oldest_ts, latest_ts = excluded.latest_ts",
                params![channel_id, &gap.oldest, &gap.latest],
            )?,
            None => conn.execute(
                "DELETE FROM channel_backfill WHERE channel_id = ?1",
                params![channel_id],
            )?,
        };
        Ok(())
    }

    /// Drop messages and cursors of channels no longer in the forum list.
    pub async fn prune_orphans(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let tx = conn.unchecked_transaction()?;
        let removed = tx.execute(
            "DELETE FROM messages WHERE channel_id NOT IN (SELECT id FROM channels)",
            [],
        )?;
        tx.execute(
            "DELETE FROM channel_sync WHERE channel_id NOT IN (SELECT id FROM channels)",
            [],
        )?;
        tx.execute(
            "DELETE FROM channel_backfill WHERE channel_id NOT IN (SELECT id FROM channels)",
            [],
        )?;
        tx.commit()?;
        Ok(removed)
    }
}
