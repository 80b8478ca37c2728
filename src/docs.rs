//! Connector for external documentation indexes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::helpers::LAST_DOCS_SYNC;
use crate::cache::{DocEntry, SqliteCache};
use crate::config::{Config, DocSource};

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DocsRefresh {
    pub pages: usize,
    pub sources: usize,
    pub errors: Vec<String>,
}

pub struct DocsConnector {
    http: reqwest::Client,
    cache: Arc<SqliteCache>,
    sources: Vec<DocSource>,
    ttl_hours: u64,
}

impl DocsConnector {
    pub fn new(config: &Config, cache: Arc<SqliteCache>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.connection.timeout_seconds))
            .build()
            .context("Failed to build docs HTTP client")?;

        Ok(Self {
            http,
            cache,
            sources: config.docs.sources.clone(),
            ttl_hours: config.docs.ttl_hours,
        })
    }

    pub fn has_sources(&self) -> bool {
        !self.sources.is_empty()
    }

    pub async fn is_stale(&self) -> Result<bool> {
        self.cache
            .is_stale(LAST_DOCS_SYNC, chrono::Duration::hours(self.ttl_hours as i64))
            .await
    }

    /// Re-fetch every configured source. A source that fails keeps its
    /// previously indexed pages.
    pub async fn refresh(&self) -> Result<DocsRefresh> {
        let mut report = DocsRefresh::default();

        let names: Vec<String> = self.sources.iter().map(|s| s.name.clone()).collect();
        let removed = self.cache.retain_doc_sources(&names).await?;
        if removed > 0 {
            info!(removed, "Dropped pages of unconfigured doc sources");
        }

        for source in &self.sources {
            match self.fetch(source).await {
                Ok(entries) => {
                    let pages = self.cache.replace_docs(&source.name, &entries).await?;
                    info!(source = %source.name, pages, "Indexed doc source");
                    report.pages += pages;
                    report.sources += 1;
                }
                Err(e) => {
                    warn!(source = %source.name, error = %e, "Doc source refresh failed");
                    report.errors.push(format!("{}: {}", source.name, e));
                }
            }
        }

        self.cache.mark_synced(LAST_DOCS_SYNC).await?;
        Ok(report)
    }

    async fn fetch(&self, source: &DocSource) -> Result<Vec<DocEntry>> {
        let entries = self
            .http
            .get(&source.index_url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<DocEntry>>()
            .await
            .with_context(|| format!("Invalid doc index at {}", source.index_url))?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn connector(server: &MockServer, names: &[&str]) -> (DocsConnector, Arc<SqliteCache>) {
        let mut config = Config::default();
        config.docs.sources = names
            .iter()
            .map(|name| DocSource {
                name: name.to_string(),
                index_url: format!("{}/{}.json", server.uri(), name),
            })
            .collect();
        let cache = Arc::new(SqliteCache::new(":memory:").await.unwrap());
        (DocsConnector::new(&config, cache.clone()).unwrap(), cache)
    }

    #[tokio::test]
    async fn test_refresh_indexes_sources() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/handbook.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"title": "Deploying services", "url": "https://docs.example.com/deploy", "content": "Use the pipeline to deploy."},
                {"title": "On-call", "url": "https://docs.example.com/oncall"}
            ])))
            .mount(&server)
            .await;

        let (connector, cache) = connector(&server, &["handbook"]).await;
        assert!(connector.is_stale().await.unwrap());

        let report = connector.refresh().await.unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.sources, 1);
        assert!(report.errors.is_empty());
        assert!(!connector.is_stale().await.unwrap());

        let hits = cache.search_docs("deploy", 5).await.unwrap();
        assert_eq!(hits[0].url, "https://docs.example.com/deploy");
        assert_eq!(hits[0].source, "handbook");
    }

    #[tokio::test]
    async fn test_failing_source_keeps_previous_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wiki.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (connector, cache) = connector(&server, &["wiki"]).await;
        cache
            .replace_docs(
                "wiki",
                &[DocEntry {
                    title: "Kafka runbook".to_string(),
                    url: "https://wiki.example.com/kafka".to_string(),
                    content: "Consumer lag alerts".to_string(),
                }],
            )
            .await
            .unwrap();

        let report = connector.refresh().await.unwrap();
        assert_eq!(report.pages, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("wiki:"));
        assert_eq!(cache.search_docs("kafka", 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_drops_unconfigured_sources() {
        let server = MockServer::start().await;
        let (connector, cache) = connector(&server, &[]).await;
        cache
            .replace_docs(
                "retired",
                &[DocEntry {
                    title: "Old page".to_string(),
                    url: "https://old.example.com".to_string(),
                    content: "legacy deploy notes".to_string(),
                }],
            )
            .await
            .unwrap();

        assert!(!connector.has_sources());
        connector.refresh().await.unwrap();
        assert_eq!(cache.doc_count().await.unwrap(), 0);
    }
}
