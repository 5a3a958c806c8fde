//! Fetch orchestrator: pulls every subscribed feed in bounded-concurrency
//! batches, classifies and upserts items, and accumulates genuinely-new ids
//! into the pending set.

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;

use crate::ai::AiProvider;
use crate::classify::classify_topic;
use crate::error::Result;
use crate::feed::FeedSource;
use crate::models::Feed;

use super::Engine;

const PARALLEL_FEEDS: usize = 6;
const BATCH_DELAY: Duration = Duration::from_millis(500);

impl<S: FeedSource, A: AiProvider> Engine<S, A> {
    /// Run one full fetch cycle over all subscribed feeds. A call while a
    /// cycle is already active is a no-op. Per-feed failures are swallowed
    /// (zero new items); store errors propagate.
    pub async fn run_cycle(&self) -> Result<()> {
        if self
            .inner
            .cycle_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let result = self.run_cycle_inner().await;
        self.inner.cycle_in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn run_cycle_inner(&self) -> Result<()> {
        let feeds = self.inner.repo.get_feeds().await?;
        if feeds.is_empty() {
            return Ok(());
        }

        let batch_count = feeds.len().div_ceil(PARALLEL_FEEDS);
        for (i, batch) in feeds.chunks(PARALLEL_FEEDS).enumerate() {
            if self.stopping() {
                break;
            }
            let results = join_all(batch.iter().map(|feed| self.fetch_one_feed(feed))).await;
            for result in results {
                result?;
            }
            if i + 1 < batch_count {
                tokio::time::sleep(BATCH_DELAY).await;
            }
        }

        *self
            .inner
            .last_cycle_at
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        Ok(())
    }

    /// Fetch a single feed, upsert its items, and record new ids. Returns the
    /// number of genuinely new items; fetch/parse failures count as zero.
    async fn fetch_one_feed(&self, feed: &Feed) -> Result<usize> {
        self.inner.limiter.acquire(&feed.url).await;

        let parsed = match self.inner.source.fetch_and_parse(&feed.url).await {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!("fetch failed for {}: {}", feed.url, e);
                return Ok(0);
            }
        };
        if parsed.items.is_empty() {
            return Ok(0);
        }

        let items = parsed
            .items
            .into_iter()
            .map(|mut item| {
                item.topic = classify_topic(&item.title, &item.description).to_string();
                item
            })
            .collect();

        let new_ids = self
            .inner
            .repo
            .upsert_items_returning_new(feed.id, items)
            .await?;
        self.inner
            .repo
            .set_feed_last_fetched(feed.id, Utc::now())
            .await?;

        let count = new_ids.len();
        if count > 0 {
            tracing::debug!("{} new item(s) from {}", count, feed.url);
            let mut pending = self
                .inner
                .pending_new_items
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            pending.extend(new_ids);
        }
        Ok(count)
    }
}
