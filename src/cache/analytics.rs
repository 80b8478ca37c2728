use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use serde::Serialize;

use super::sqlite_cache::SqliteCache;

const TOP_QUERIES_LIMIT: usize = 10;

/// Tools whose empty results point at a documentation gap.
const SEARCH_TOOLS: &[&str] = &["search_messages", "search_docs", "find_experts"];

#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub id: String,
    pub tool: String,
    pub query: Option<String>,
    pub success: bool,
    pub result_count: Option<usize>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ToolUsage {
    pub calls: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryCount {
    pub query: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct FeedbackTotals {
    pub helpful: u64,
    pub not_helpful: u64,
    /// `None` until any feedback exists.
    pub helpful_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AnalyticsSummary {
    pub days: u32,
    pub total_calls: u64,
    pub success_rate: Option<f64>,
    pub by_tool: BTreeMap<String, ToolUsage>,
    pub top_queries: Vec<QueryCount>,
    /// Searches that found nothing, most frequent first.
    pub zero_result_searches: Vec<QueryCount>,
    pub feedback: FeedbackTotals,
}

impl SqliteCache {
    pub async fn record_tool_call(&self, record: &ToolCallRecord) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO tool_calls (id, tool, query, success, result_count, latency_ms, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.tool,
                record.query,
                record.success,
                record.result_count.map(|c| c as i64),
                record.latency_ms as i64,
                record.error,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Returns `false` when `call_id` does not name a recorded call.
    pub async fn record_feedback(
        &self,
        call_id: &str,
        helpful: bool,
        comment: Option<&str>,
    ) -> Result<bool> {
        let conn = self.pool.get()?;
        let exists = conn
            .query_row(
                "SELECT 1 FROM tool_calls WHERE id = ?1",
                params![call_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Ok(false);
        }

        conn.execute(
            "INSERT INTO feedback (call_id, helpful, comment, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![call_id, helpful, comment, Utc::now().timestamp()],
        )?;
        Ok(true)
    }

    pub async fn analytics_summary(&self, days: u32) -> Result<AnalyticsSummary> {
        let conn = self.pool.get()?;
        let since = Utc::now().timestamp() - i64::from(days) * 86_400;

        let mut by_tool = BTreeMap::new();
        let mut total_calls = 0;
        let mut total_failures = 0;
        {
            let mut stmt = conn.prepare_cached(
                "SELECT tool, COUNT(*), SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), AVG(latency_ms)
                 FROM tool_calls WHERE created_at >= ?1
                 GROUP BY tool",
            )?;
            let rows = stmt.query_map(params![since], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })?;
            for row in rows {
                let (tool, calls, failures, avg_latency_ms) = row?;
                total_calls += calls as u64;
                total_failures += failures as u64;
                by_tool.insert(
                    tool,
                    ToolUsage {
                        calls: calls as u64,
                        failures: failures as u64,
                        avg_latency_ms,
                    },
                );
            }
        }

        let top_queries = {
            let mut stmt = conn.prepare_cached(
                "SELECT lower(trim(query)) AS q, COUNT(*) AS n
                 FROM tool_calls
                 WHERE created_at >= ?1 AND query IS NOT NULL AND trim(query) != ''
                 GROUP BY q
                 ORDER BY n DESC, q ASC
                 LIMIT ?2",
            )?;
            stmt.query_map(params![since, TOP_QUERIES_LIMIT], |row| {
                Ok(QueryCount {
                    query: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?
        };

        let placeholders = SEARCH_TOOLS
            .iter()
            .map(|t| format!("'{}'", t))
            .collect::<Vec<_>>()
            .join(", ");
        let zero_result_searches = {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT lower(trim(query)) AS q, COUNT(*) AS n
                 FROM tool_calls
                 WHERE created_at >= ?1 AND success = 1 AND result_count = 0
                   AND query IS NOT NULL AND trim(query) != '' AND tool IN ({})
                 GROUP BY q
                 ORDER BY n DESC, q ASC
                 LIMIT ?2",
                placeholders
            ))?;
            stmt.query_map(params![since, TOP_QUERIES_LIMIT], |row| {
                Ok(QueryCount {
                    query: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?
        };

        let (helpful, not_helpful): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(CASE WHEN helpful = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN helpful = 0 THEN 1 ELSE 0 END), 0)
             FROM feedback WHERE created_at >= ?1",
            params![since],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let feedback_total = helpful + not_helpful;

        Ok(AnalyticsSummary {
            days,
            total_calls,
            success_rate: (total_calls > 0)
                .then(|| (total_calls - total_failures) as f64 / total_calls as f64),
            by_tool,
            top_queries,
            zero_result_searches,
            feedback: FeedbackTotals {
                helpful: helpful as u64,
                not_helpful: not_helpful as u64,
                helpful_ratio: (feedback_total > 0).then(|| helpful as f64 / feedback_total as f64),
            },
        })
    }
}
