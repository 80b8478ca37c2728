mod analytics;
mod channels;
mod docs;
pub mod helpers;
mod locks;
mod messages;
mod schema;
pub mod sqlite_cache;
mod users;

pub use analytics::{AnalyticsSummary, FeedbackTotals, QueryCount, ToolCallRecord, ToolUsage};
pub use docs::{DocEntry, DocHit};
pub use messages::{HistoryGap, MessageHit, MessageQuery, StoredMessage, ts_to_epoch};
pub use sqlite_cache::SqliteCache;

// Cache refresh types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRefreshType {
    Users,
    Channels,
    Messages,
    Docs,
    All,
}

impl CacheRefreshType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "users" => Some(Self::Users),
            "channels" => Some(Self::Channels),
            "messages" => Some(Self::Messages),
            "docs" => Some(Self::Docs),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn includes(self, other: CacheRefreshType) -> bool {
        self == CacheRefreshType::All || self == other
    }
}
