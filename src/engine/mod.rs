//! The background engine: a continuously-running fetch -> embed -> cluster ->
//! score cycle plus the synchronous ranking entry point. Collaborators (store,
//! feed source, AI provider) are injected so the whole thing is testable with
//! stubs.

mod cluster;
mod embed;
mod fetch;
mod rank;
mod rate_limit;
mod score;
mod similarity;

pub use cluster::ClusterOutcome;
pub use rank::RankRequest;
pub use rate_limit::HostRateLimiter;
pub use score::ScoreOutcome;
pub use similarity::{average_embeddings, cosine_similarity};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::ai::AiProvider;
use crate::config::Config;
use crate::db::Repository;
use crate::feed::FeedSource;
use crate::models::PendingStatus;

/// Delay before the first cycle so the host app finishes loading first.
const STARTUP_DELAY: Duration = Duration::from_secs(5);

pub struct Engine<S, A> {
    inner: Arc<Inner<S, A>>,
}

impl<S, A> Clone for Engine<S, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct Inner<S, A> {
    pub(crate) repo: Repository,
    pub(crate) source: S,
    pub(crate) ai: A,
    pub(crate) limiter: HostRateLimiter,
    cycle_interval: Duration,

    /// True while a background loop is spawned; start() is idempotent.
    loop_running: AtomicBool,
    /// Cooperative cancellation, checked between stages and batches.
    stop_requested: AtomicBool,
    /// Only one fetch cycle may run at a time; ticks that arrive while one is
    /// active are dropped, not queued.
    pub(crate) cycle_in_progress: AtomicBool,
    /// Item ids discovered since the user last applied a refresh. In-memory
    /// only; resets on apply and on process restart.
    pub(crate) pending_new_items: Mutex<HashSet<i64>>,
    pub(crate) last_cycle_at: Mutex<Option<DateTime<Utc>>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<S: FeedSource, A: AiProvider> Engine<S, A> {
    pub fn new(repo: Repository, source: S, ai: A, config: &Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                repo,
                source,
                ai,
                limiter: HostRateLimiter::new(Duration::from_millis(config.host_min_interval_ms)),
                cycle_interval: Duration::from_secs(config.cycle_interval_secs),
                loop_running: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                cycle_in_progress: AtomicBool::new(false),
                pending_new_items: Mutex::new(HashSet::new()),
                last_cycle_at: Mutex::new(None),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    /// The injected store, for operations the engine itself does not drive
    /// (subscribe, mark-read, engagement events from a UI layer).
    pub fn repository(&self) -> &Repository {
        &self.inner.repo
    }

    /// Spawn the background loop. No-op if it is already running.
    pub fn start(&self) {
        if self.inner.loop_running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.stop_requested.store(false, Ordering::SeqCst);

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(STARTUP_DELAY).await;
            engine.run_loop().await;
            engine.inner.loop_running.store(false, Ordering::SeqCst);
        });
        *self
            .inner
            .loop_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Request a cooperative stop. In-flight operations complete; the loop
    /// exits at its next check.
    pub fn stop(&self) {
        self.inner.stop_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn stopping(&self) -> bool {
        self.inner.stop_requested.load(Ordering::SeqCst)
    }

    async fn run_loop(&self) {
        loop {
            if self.stopping() {
                break;
            }
            if let Err(e) = self.run_cycle().await {
                tracing::warn!("background fetch cycle failed: {}", e);
            }
            if self.stopping() {
                break;
            }
            if let Err(e) = self.run_embeddings().await {
                tracing::warn!("background embedding pass failed: {}", e);
            }
            if self.stopping() {
                break;
            }
            match self.run_clustering().await {
                Ok(outcome) => tracing::debug!(
                    "clustering pass: processed={} clustered={}",
                    outcome.processed,
                    outcome.clustered
                ),
                Err(e) => tracing::warn!("background clustering failed: {}", e),
            }
            if self.stopping() {
                break;
            }
            match self.run_newsworthiness_scoring().await {
                Ok(outcome) => tracing::debug!("scoring pass: scored={}", outcome.scored),
                Err(e) => tracing::warn!("background scoring failed: {}", e),
            }
            if self.stopping() {
                break;
            }
            tokio::time::sleep(self.inner.cycle_interval).await;
        }
    }

    /// Snapshot for the caller: how many new items arrived since the last
    /// apply, and whether a cycle is active right now.
    pub fn pending_status(&self) -> PendingStatus {
        let new_item_count = self
            .inner
            .pending_new_items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        PendingStatus {
            new_item_count,
            has_changes: new_item_count > 0,
            cycle_in_progress: self.inner.cycle_in_progress.load(Ordering::SeqCst),
            last_cycle_at: *self
                .inner
                .last_cycle_at
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Acknowledge the pending refresh: clears the set and returns how many
    /// items it held. A second call right after returns 0.
    pub fn apply_pending(&self) -> usize {
        let mut pending = self
            .inner
            .pending_new_items
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let applied = pending.len();
        pending.clear();
        applied
    }
}

#[cfg(test)]
impl<S: FeedSource, A: AiProvider> Engine<S, A> {
    /// Swap the AI provider, keeping the store. Test-only; requires that no
    /// clone of the engine is alive.
    pub(crate) fn with_ai<B: AiProvider>(self, ai: B) -> Engine<S, B> {
        let inner = Arc::try_unwrap(self.inner)
            .ok()
            .expect("engine has outstanding clones");
        Engine {
            inner: Arc::new(Inner {
                repo: inner.repo,
                source: inner.source,
                ai,
                limiter: inner.limiter,
                cycle_interval: inner.cycle_interval,
                loop_running: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                cycle_in_progress: AtomicBool::new(false),
                pending_new_items: Mutex::new(HashSet::new()),
                last_cycle_at: Mutex::new(None),
                loop_handle: Mutex::new(None),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::{DateTime, Duration as ChronoDuration, Utc};

    use crate::ai::AiProvider;
    use crate::config::Config;
    use crate::db::Repository;
    use crate::error::{AppError, Result};
    use crate::feed::FeedSource;
    use crate::models::{NewItem, ParsedFeed};

    use super::Engine;

    /// Canned AI provider. Unavailable by default, so tests that do not care
    /// about AI-backed signals get the degraded path.
    #[derive(Default)]
    pub(crate) struct StubAi {
        pub available: bool,
        pub vector: Option<Vec<f32>>,
        pub response: Option<String>,
    }

    impl AiProvider for StubAi {
        async fn is_available(&self) -> bool {
            self.available
        }

        async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
            if self.available {
                self.vector.clone()
            } else {
                None
            }
        }

        async fn generate(&self, _prompt: &str) -> Option<String> {
            if self.available {
                self.response.clone()
            } else {
                None
            }
        }
    }

    /// Canned feed source keyed by URL; unknown URLs fail like a dead host.
    #[derive(Default)]
    pub(crate) struct StubSource {
        feeds: Mutex<HashMap<String, ParsedFeed>>,
    }

    impl StubSource {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn set(&self, url: &str, feed: ParsedFeed) {
            self.feeds
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(url.to_string(), feed);
        }
    }

    impl FeedSource for StubSource {
        async fn fetch_and_parse(&self, url: &str) -> Result<ParsedFeed> {
            self.feeds
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(url)
                .cloned()
                .ok_or_else(|| AppError::Config(format!("no stub feed for {url}")))
        }
    }

    pub(crate) fn test_config() -> Config {
        Config {
            db_path: ":memory:".to_string(),
            ollama_url: "http://127.0.0.1:11434".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            generate_model: "llama3.2".to_string(),
            cycle_interval_secs: 120,
            host_min_interval_ms: 0,
        }
    }

    pub(crate) fn published_hours_ago(hours: i64) -> DateTime<Utc> {
        Utc::now() - ChronoDuration::hours(hours)
    }

    pub(crate) fn new_item(title: &str, published_at: DateTime<Utc>) -> NewItem {
        NewItem {
            guid: title.to_string(),
            link: format!("https://example.test/{title}"),
            title: title.to_string(),
            description: String::new(),
            topic: "general".to_string(),
            published_at,
            thumbnail_url: None,
        }
    }

    pub(crate) async fn new_engine(source: StubSource, ai: StubAi) -> Engine<StubSource, StubAi> {
        let repo = Repository::new(":memory:").await.unwrap();
        Engine::new(repo, source, ai, &test_config())
    }

    /// Engine over an in-memory store with one subscribed feed and the given
    /// items already upserted. Returns the item ids in input order.
    pub(crate) async fn engine_with_ai(
        ai: StubAi,
        items: &[(&str, DateTime<Utc>)],
    ) -> (Engine<StubSource, StubAi>, Vec<i64>) {
        let engine = new_engine(StubSource::new(), ai).await;
        let feed_id = engine
            .repository()
            .add_feed("https://example.test/feed.xml", "Test Feed")
            .await
            .unwrap();
        let new_items = items
            .iter()
            .map(|&(title, published_at)| new_item(title, published_at))
            .collect();
        let ids = engine
            .repository()
            .upsert_items_returning_new(feed_id, new_items)
            .await
            .unwrap();
        (engine, ids)
    }

    pub(crate) async fn engine_with_items(
        items: &[(&str, DateTime<Utc>)],
    ) -> (Engine<StubSource, StubAi>, Vec<i64>) {
        engine_with_ai(StubAi::default(), items).await
    }
}
