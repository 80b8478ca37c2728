use anyhow::Result;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::helpers::build_match_query;
use super::locks::LockKey;
use super::sqlite_cache::SqliteCache;

/// One page of an external documentation index.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DocEntry {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocHit {
    pub source: String,
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(skip)]
    pub bm25: f64,
}

impl SqliteCache {
    /// Swap every page of `source` for `entries` in one transaction.
    pub async fn replace_docs(&self, source: &str, entries: &[DocEntry]) -> Result<usize> {
        self.with_lock(LockKey::Docs, || {
            let conn = self.pool.get()?;
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM docs WHERE source = ?1", params![source])?;

            let mut inserted = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO docs (source, title, url, content) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for entry in entries {
                    if entry.title.trim().is_empty() || entry.url.trim().is_empty() {
                        continue;
                    }
                    inserted +=
                        stmt.execute(params![source, entry.title, entry.url, entry.content])?;
                }
            }

            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    /// Drop pages of sources that are no longer configured.
    pub async fn retain_doc_sources(&self, sources: &[String]) -> Result<usize> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached("SELECT DISTINCT source FROM docs")?;
        let existing = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut removed = 0;
        for source in existing.iter().filter(|s| !sources.contains(s)) {
            removed += conn.execute("DELETE FROM docs WHERE source = ?1", params![source])?;
        }
        Ok(removed)
    }

    pub async fn search_docs(&self, query: &str, limit: usize) -> Result<Vec<DocHit>> {
        let match_expr = build_match_query(query);
        if match_expr.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(
            "SELECT d.source, d.title, d.url,
                    snippet(docs_fts, 1, '', '', '...', 24) AS snippet,
                    bm25(docs_fts, 5.0, 1.0) AS score
             FROM docs_fts f
             JOIN docs d ON d.rowid = f.rowid
             WHERE docs_fts MATCH ?1
             ORDER BY score
             LIMIT ?2",
        )?;

        let hits = stmt
            .query_map(params![match_expr, limit], |row| {
                Ok(DocHit {
                    source: row.get(0)?,
                    title: row.get(1)?,
                    url: row.get(2)?,
                    snippet: row.get(3)?,
                    bm25: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(hits)
    }

    pub async fn doc_count(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM docs", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, url: &str, content: &str) -> DocEntry {
        DocEntry {
            title: title.to_string(),
            url: url.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_replace_docs_swaps_one_source() {
        let cache = SqliteCache::new(":memory:").await.unwrap();
        cache
            .replace_docs("handbook", &[entry("Onboarding", "https://h/1", "Getting started")])
            .await
            .unwrap();
        cache
            .replace_docs("wiki", &[entry("Runbook", "https://w/1", "Restart the service")])
            .await
            .unwrap();
        cache
            .replace_docs("handbook", &[entry("Security", "https://h/2", "Rotate keys yearly")])
            .await
            .unwrap();

        assert_eq!(cache.doc_count().await.unwrap(), 2);
        assert!(cache.search_docs("onboarding", 10).await.unwrap().is_empty());
        assert_eq!(cache.search_docs("restart", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_docs_skips_entries_without_url() {
        let cache = SqliteCache::new(":memory:").await.unwrap();
        let inserted = cache
            .replace_docs("wiki", &[entry("No link", "", "body"), entry("Ok", "https://w/1", "body")])
            .await
            .unwrap();
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn test_search_docs_prefers_title_matches() {
        let cache = SqliteCache::new(":memory:").await.unwrap();
        cache
            .replace_docs(
                "handbook",
                &[
                    entry("Expense policy", "https://h/1", "Mentions deployment once"),
                    entry("Deployment guide", "https://h/2", "How we ship to production"),
                ],
            )
            .await
            .unwrap();

        let hits = cache.search_docs("deployment", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Deployment guide");
        assert_eq!(hits[0].source, "handbook");
    }

    #[tokio::test]
    async fn test_retain_doc_sources() {
        let cache = SqliteCache::new(":memory:").await.unwrap();
        cache
            .replace_docs("old", &[entry("A", "https://o/1", "x")])
            .await
            .unwrap();
        cache
            .replace_docs("kept", &[entry("B", "https://k/1", "y")])
            .await
            .unwrap();

        let removed = cache.retain_doc_sources(&["kept".to_string()]).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.doc_count().await.unwrap(), 1);
    }
}
