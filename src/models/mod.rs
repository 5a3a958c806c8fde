use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub added_at: DateTime<Utc>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

/// A parsed feed entry ready for upsert, before it has a database identity.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub guid: String,
    pub link: String,
    pub title: String,
    pub description: String,
    /// Filled in by the fetch orchestrator via the topic classifier.
    pub topic: String,
    pub published_at: DateTime<Utc>,
    pub thumbnail_url: Option<String>,
}

/// Result of fetching and parsing one feed URL.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: String,
    pub items: Vec<NewItem>,
}

/// An item row as served to the ranked feed: joined with its feed title and
/// read state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: i64,
    pub feed_id: i64,
    pub feed_title: String,
    pub guid: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub topic: String,
    pub published_at: DateTime<Utc>,
    pub thumbnail_url: Option<String>,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadFilter {
    #[default]
    Unread,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementKind {
    Open,
    View,
    MoreLike,
    LessLike,
}

impl EngagementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementKind::Open => "open",
            EngagementKind::View => "view",
            EngagementKind::MoreLike => "more_like",
            EngagementKind::LessLike => "less_like",
        }
    }
}

/// A member of a story cluster, joined for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMember {
    pub item_id: i64,
    pub similarity: f64,
    pub title: String,
    pub feed_title: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
    pub thumbnail_url: Option<String>,
}

/// Snapshot of the background engine for the caller (e.g. a UI shell).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingStatus {
    pub new_item_count: usize,
    pub has_changes: bool,
    pub cycle_in_progress: bool,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// One page of ranked results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedPage {
    pub items: Vec<FeedItem>,
    pub has_more: bool,
}
