mod fetcher;

pub use fetcher::FeedFetcher;

use std::future::Future;

use crate::error::Result;
use crate::models::ParsedFeed;

/// Narrow interface over "fetch this URL and give me normalized entries".
/// The engine only ever sees this, so tests can substitute canned feeds.
pub trait FeedSource: Send + Sync + 'static {
    fn fetch_and_parse(&self, url: &str) -> impl Future<Output = Result<ParsedFeed>> + Send;
}
