//! Poll-based sync of forum channels into the local index.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::helpers::{LAST_CHANNEL_SYNC, LAST_MESSAGE_SYNC, LAST_USER_SYNC, WORKSPACE_URL};
use crate::cache::{CacheRefreshType, HistoryGap, SqliteCache, StoredMessage, ts_to_epoch};
use crate::config::Config;
use crate::docs::DocsConnector;
use crate::forum::ForumPolicy;
use crate::slack::ForumSource;
use crate::slack::types::SlackMessage;

const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SyncReport {
    pub users: usize,
    pub channels: usize,
    pub messages: usize,
    pub threads: usize,
    pub docs: usize,
    pub pruned: usize,
    /// Parts that were still fresh and therefore not synced.
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

impl SyncReport {
    fn merge(&mut self, other: ChannelSync) {
        self.messages += other.messages;
        self.threads += other.threads;
        self.errors.extend(other.errors);
    }
}

#[derive(Debug, Default)]
pub struct ChannelSync {
    pub messages: usize,
    pub threads: usize,
    pub errors: Vec<String>,
    /// Threads whose parent was read this round with nothing missing.
    seen_threads: HashSet<(String, String)>,
}

#[derive(Debug, Default)]
struct HistoryRead {
    newest: Option<String>,
    /// Oldest ts read before paging stopped at the page limit.
    cut_at: Option<String>,
}

pub struct Indexer {
    cache: Arc<SqliteCache>,
    source: Arc<dyn ForumSource>,
    config: Config,
    policy: ForumPolicy,
    docs: Option<Arc<DocsConnector>>,
    running: Mutex<()>,
}

impl Indexer {
    pub fn new(cache: Arc<SqliteCache>, source: Arc<dyn ForumSource>, config: Config) -> Self {
        let policy = ForumPolicy::from_config(&config.forum);
        Self {
            cache,
            source,
            config,
            policy,
            docs: None,
            running: Mutex::new(()),
        }
    }

    pub fn with_docs(mut self, docs: Arc<DocsConnector>) -> Self {
        self.docs = Some(docs);
        self
    }

    pub fn source(&self) -> &Arc<dyn ForumSource> {
        &self.source
    }

    pub async fn sync_users(&self) -> Result<usize> {
        let users = self.source.fetch_users().await?;
        let count = users.len();
        self.cache.save_users(users).await?;
        info!(count, "Synced users");
        Ok(count)
    }

    /// Returns `(forum channels, messages pruned)`.
    pub async fn sync_channels(&self) -> Result<(usize, usize)> {
        let all = self
            .source
            .fetch_channels(self.config.forum.include_private)
            .await?;
        let total = all.len();
        let forum = self.policy.filter(all);
        let count = forum.len();

        self.cache.save_channels(forum).await?;
        let pruned = self.cache.prune_orphans().await?;
        info!(count, total, pruned, "Synced forum channels");
        Ok((count, pruned))
    }

    pub async fn sync_workspace_url(&self) -> Result<Option<String>> {
        let url = match &self.config.slack.workspace_url {
            Some(url) => Some(url.clone()),
            None => self.source.workspace_url().await?,
        };

        if let Some(url) = &url {
            let normalized = format!("{}/", url.trim_end_matches('/'));
            self.cache.set_metadata(WORKSPACE_URL, &normalized).await?;
            return Ok(Some(normalized));
        }
        Ok(None)
    }

    /// Fetch new top-level messages of one channel plus the replies of
    /// every thread among them, then advance the channel cursor.
    ///
    /// A round reads back to the thread refresh window even when the
    /// cursor is newer, since a question only becomes a thread once its
    /// first reply lands. History skipped because paging hit
    /// `max_pages_per_channel` is kept as a gap and read in later rounds.
    pub async fn sync_channel(&self, channel_id: &str) -> Result<ChannelSync> {
        let mut result = ChannelSync::default();
        let stored_cursor = self.cache.get_channel_cursor(channel_id).await?;
        let oldest = self.history_start(stored_cursor.as_deref());

        let fresh = self
            .read_history(channel_id, &oldest, None, &mut result)
            .await?;

        if let Some(newest) = &fresh.newest
            && stored_cursor
                .as_deref()
                .is_none_or(|c| ts_to_epoch(newest) > ts_to_epoch(c))
        {
            self.cache.set_channel_cursor(channel_id, newest).await?;
        }

        let pending = self.cache.get_channel_gap(channel_id).await?;
        let gap = if let Some(cut_at) = fresh.cut_at {
            // Only the part above the old cursor was never read
            let floor = stored_cursor.unwrap_or_else(|| oldest.clone());
            let unread = (ts_to_epoch(&cut_at) > ts_to_epoch(&floor)).then(|| HistoryGap {
                oldest: floor,
                latest: cut_at,
            });
            match (unread, pending) {
                (Some(unread), Some(pending)) => Some(HistoryGap {
                    oldest: earlier(unread.oldest, pending.oldest),
                    latest: unread.latest,
                }),
                (unread, pending) => unread.or(pending),
            }
        } else if let Some(pending) = pending {
            let older = self
                .read_history(
                    channel_id,
                    &pending.oldest,
                    Some(&pending.latest),
                    &mut result,
                )
                .await?;
            older.cut_at.map(|cut_at| HistoryGap {
                oldest: pending.oldest,
                latest: cut_at,
            })
        } else {
            None
        };

        if let Some(gap) = &gap {
            debug!(
                channel_id,
                oldest = %gap.oldest,
                latest = %gap.latest,
                "History gap left for next round"
            );
        }
        self.cache.set_channel_gap(channel_id, gap.as_ref()).await?;

        debug!(
            channel_id,
            messages = result.messages,
            threads = result.threads,
            "Channel synced"
        );
        Ok(result)
    }

    /// Page through history between `oldest` and `latest`, indexing each
    /// page and the threads on it whose replies are not all indexed yet.
    async fn read_history(
        &self,
        channel_id: &str,
        oldest: &str,
        latest: Option<&str>,
        result: &mut ChannelSync,
    ) -> Result<HistoryRead> {
        let mut read = HistoryRead::default();
        let mut oldest_seen: Option<String> = None;
        let mut page_cursor: Option<String> = None;
        let mut pages = 0;

        loop {
            let (page, next) = self
                .source
                .fetch_history(
                    channel_id,
                    Some(oldest.to_string()),
                    latest.map(str::to_string),
                    page_cursor.take(),
                    self.config.index.page_size,
                )
                .await?;
            pages += 1;

            let mut batch = Vec::with_capacity(page.len());
            let mut parents = Vec::new();
            for msg in &page {
                let epoch = ts_to_epoch(&msg.ts);
                if read.newest.as_deref().is_none_or(|n| epoch > ts_to_epoch(n)) {
                    read.newest = Some(msg.ts.clone());
                }
                if oldest_seen.as_deref().is_none_or(|o| epoch < ts_to_epoch(o)) {
                    oldest_seen = Some(msg.ts.clone());
                }
                if msg.is_thread_parent() && msg.reply_count.unwrap_or(0) > 0 {
                    result
                        .seen_threads
                        .insert((channel_id.to_string(), msg.ts.clone()));
                    if self.missing_replies(channel_id, msg).await? {
                        parents.push(msg.ts.clone());
                    }
                }
                if let Some(stored) = StoredMessage::from_slack(channel_id, msg) {
                    batch.push(stored);
                }
            }
            result.messages += self.cache.upsert_messages(&batch).await?;

            for thread_ts in parents {
                match self.fetch_thread(channel_id, &thread_ts).await {
                    Ok(written) => {
                        result.messages += written;
                        result.threads += 1;
                    }
                    Err(e) => {
                        warn!(channel_id, thread_ts, error = %e, "Failed to fetch thread replies");
                        result
                            .seen_threads
                            .remove(&(channel_id.to_string(), thread_ts.clone()));
                        result
                            .errors
                            .push(format!("{}/{}: {}", channel_id, thread_ts, e));
                    }
                }
            }

            match next {
                Some(cursor) if pages < self.config.index.max_pages_per_channel => {
                    page_cursor = Some(cursor);
                }
                Some(_) => {
                    warn!(channel_id, pages, "Stopped paging at the per-channel page limit");
                    read.cut_at = oldest_seen;
                    break;
                }
                None => break,
            }
        }

        Ok(read)
    }

    /// Whether the index holds fewer replies than Slack reports for `parent`.
    async fn missing_replies(&self, channel_id: &str, parent: &SlackMessage) -> Result<bool> {
        let indexed = self.cache.get_thread(channel_id, &parent.ts).await?;
        let replies = indexed.iter().filter(|m| m.is_thread_reply()).count() as i64;
        Ok(replies < parent.reply_count.unwrap_or(0) as i64)
    }

    /// Re-fetch replies of recent threads not already seen in history this
    /// round; old questions keep collecting answers.
    pub async fn refresh_threads(&self, skip: &HashSet<(String, String)>) -> Result<ChannelSync> {
        let mut result = ChannelSync::default();
        let since = Utc::now().timestamp() as f64
            - (self.config.index.thread_refresh_days * SECONDS_PER_DAY) as f64;

        for (channel_id, thread_ts) in self.cache.recent_thread_parents(since).await? {
            let key = (channel_id.clone(), thread_ts.clone());
            if skip.contains(&key) {
                continue;
            }
            match self.fetch_thread(&channel_id, &thread_ts).await {
                Ok(written) => {
                    result.messages += written;
                    result.threads += 1;
                }
                Err(e) => {
                    warn!(channel_id, thread_ts, error = %e, "Failed to refresh thread");
                    result
                        .errors
                        .push(format!("{}/{}: {}", channel_id, thread_ts, e));
                }
            }
        }
        Ok(result)
    }

    /// Sync every cached forum channel; one failing channel does not stop the rest.
    pub async fn sync_messages(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut seen = HashSet::new();

        for channel in self.cache.get_channels().await? {
            if !self.policy.admits(&channel) {
                continue;
            }
            match self.sync_channel(&channel.id).await {
                Ok(mut synced) => {
                    seen.extend(std::mem::take(&mut synced.seen_threads));
                    report.merge(synced);
                }
                Err(e) => {
                    error!(channel = %channel.name, error = %e, "Channel sync failed");
                    report.errors.push(format!("{}: {}", channel.name, e));
                }
            }
        }

        report.merge(self.refresh_threads(&seen).await?);
        self.cache.mark_synced(LAST_MESSAGE_SYNC).await?;
        Ok(report)
    }

    pub async fn sync_all(&self, force: bool) -> Result<SyncReport> {
        self.sync(CacheRefreshType::All, force).await
    }

    /// Sync the parts named by `kind` that are stale, or all of them when
    /// `force` is set. Concurrent calls run one after another.
    pub async fn sync(&self, kind: CacheRefreshType, force: bool) -> Result<SyncReport> {
        let _guard = self.running.lock().await;
        let mut report = SyncReport::default();
        let ttl = &self.config.cache;
        let users_ttl = chrono::Duration::hours(ttl.ttl_users_hours as i64);
        let channels_ttl = chrono::Duration::hours(ttl.ttl_channels_hours as i64);
        let messages_ttl = chrono::Duration::minutes(ttl.ttl_messages_minutes as i64);

        if kind.includes(CacheRefreshType::Users) {
            if force || self.cache.is_stale(LAST_USER_SYNC, users_ttl).await? {
                match self.sync_users().await {
                    Ok(count) => report.users = count,
                    Err(e) => {
                        error!(error = %e, "User sync failed");
                        report.errors.push(format!("users: {}", e));
                    }
                }
            } else {
                report.skipped.push("users".to_string());
            }
        }

        if kind.includes(CacheRefreshType::Channels) {
            if force || self.cache.is_stale(LAST_CHANNEL_SYNC, channels_ttl).await? {
                match self.sync_channels().await {
                    Ok((count, pruned)) => {
                        report.channels = count;
                        report.pruned = pruned;
                    }
                    Err(e) => {
                        error!(error = %e, "Channel sync failed");
                        report.errors.push(format!("channels: {}", e));
                    }
                }
                if let Err(e) = self.sync_workspace_url().await {
                    warn!(error = %e, "Could not resolve workspace URL");
                }
            } else {
                report.skipped.push("channels".to_string());
            }
        }

        if kind.includes(CacheRefreshType::Messages) {
            if force || self.cache.is_stale(LAST_MESSAGE_SYNC, messages_ttl).await? {
                match self.sync_messages().await {
                    Ok(messages) => {
                        report.messages = messages.messages;
                        report.threads = messages.threads;
                        report.errors.extend(messages.errors);
                    }
                    Err(e) => {
                        error!(error = %e, "Message sync failed");
                        report.errors.push(format!("messages: {}", e));
                    }
                }
            } else {
                report.skipped.push("messages".to_string());
            }
        }

        if kind.includes(CacheRefreshType::Docs)
            && let Some(docs) = &self.docs
            && docs.has_sources()
        {
            let due = force
                || docs.is_stale().await.unwrap_or_else(|e| {
                    warn!(error = %e, "Could not read docs sync time");
                    true
                });
            if due {
                match docs.refresh().await {
                    Ok(refreshed) => {
                        report.docs = refreshed.pages;
                        report.errors.extend(refreshed.errors);
                    }
                    Err(e) => {
                        error!(error = %e, "Docs sync failed");
                        report.errors.push(format!("docs: {}", e));
                    }
                }
            } else {
                report.skipped.push("docs".to_string());
            }
        }

        info!(
            users = report.users,
            channels = report.channels,
            messages = report.messages,
            threads = report.threads,
            docs = report.docs,
            errors = report.errors.len(),
            "Sync finished"
        );
        Ok(report)
    }

    /// Initial sync, then one sync per `sync_interval_minutes`. An interval
    /// of 0 leaves only the initial sync.
    pub fn spawn_background(self: Arc<Self>) -> JoinHandle<()> {
        let minutes = self.config.index.sync_interval_minutes;
        tokio::spawn(async move {
            if minutes == 0 {
                self.run_background_sync().await;
                return;
            }
            let mut interval = tokio::time::interval(Duration::from_secs(minutes * 60));
            loop {
                // The first tick completes immediately
                interval.tick().await;
                self.run_background_sync().await;
            }
        })
    }

    async fn run_background_sync(&self) {
        match self.sync_all(false).await {
            Ok(report) if !report.errors.is_empty() => {
                warn!(errors = ?report.errors, "Background sync finished with errors");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Background sync failed"),
        }
    }

    async fn fetch_thread(&self, channel_id: &str, thread_ts: &str) -> Result<usize> {
        let replies = self.source.fetch_replies(channel_id, thread_ts).await?;
        let stored: Vec<StoredMessage> = replies
            .iter()
            .filter_map(|m: &SlackMessage| StoredMessage::from_slack(channel_id, m))
            .collect();
        self.cache.upsert_messages(&stored).await
    }

    /// Where a round starts reading: the cursor, pulled back to the thread
    /// refresh window, or the backfill horizon for a new channel.
    fn history_start(&self, cursor: Option<&str>) -> String {
        let Some(cursor) = cursor else {
            return days_ago_ts(self.config.index.history_days);
        };
        let window = days_ago_ts(self.config.index.thread_refresh_days);
        earlier(cursor.to_string(), window)
    }
}

fn days_ago_ts(days: u64) -> String {
    let start = (Utc::now().timestamp().max(0) as u64).saturating_sub(days * SECONDS_PER_DAY);
    format!("{}.000000", start)
}

fn earlier(a: String, b: String) -> String {
    if ts_to_epoch(&b) < ts_to_epoch(&a) { b } else { a }
}
