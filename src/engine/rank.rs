//! Multi-signal ranking: recency, engagement, source reputation, cluster size
//! (cross-source corroboration), user affinity, and LLM newsworthiness. Also
//! the personalized "for you" variant and the one-shot "more like this" boost.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use futures::future::join_all;

use crate::ai::AiProvider;
use crate::error::Result;
use crate::feed::FeedSource;
use crate::models::{FeedItem, RankedPage, ReadFilter};

use super::embed::embedding_text;
use super::similarity::{average_embeddings, cosine_similarity};
use super::Engine;

const RECENCY_WEIGHT: f64 = 1.0;
const ENGAGEMENT_WEIGHT: f64 = 0.6;
const SOURCE_REP_WEIGHT: f64 = 0.5;
// Cluster signal should complement, not dominate: low weight and a cap on the
// effective size to prevent a runaway boost for mega-stories.
const CLUSTER_WEIGHT: f64 = 0.4;
const CLUSTER_CAP: i64 = 3;
const AFFINITY_WEIGHT: f64 = 1.0;
const NEWSWORTHINESS_WEIGHT: f64 = 0.8;

const POOL_SIZE: usize = 300;
const EMBED_CONCURRENCY: usize = 5;
const INTEREST_PROFILE_SIZE: usize = 30;

const MORE_LIKE_WEIGHT: f64 = 1.2;
const MORE_LIKE_WINDOW: usize = 50;

const FOR_YOU_SEED_COUNT: usize = 25;
const FOR_YOU_SIMILARITY_WEIGHT: f64 = 1.4;

/// Parameters for one ranked-feed request.
#[derive(Debug, Clone)]
pub struct RankRequest<'a> {
    pub page: usize,
    pub limit: usize,
    /// "all", "for_you", "other", or a concrete topic name.
    pub topic: &'a str,
    /// "More like this": boosts the top-ranked window by similarity to this item.
    pub similar_to: Option<i64>,
    pub read_filter: ReadFilter,
}

struct Signals {
    engagement_count: i64,
    source_rate: f64,
    cluster_size: i64,
    affinity: f64,
    newsworthiness: f64,
}

fn recency_term(now: DateTime<Utc>, published_at: DateTime<Utc>) -> f64 {
    let hours_ago = (now - published_at).num_milliseconds() as f64 / 3_600_000.0;
    RECENCY_WEIGHT / (1.0 + hours_ago / 24.0)
}

fn score_item(now: DateTime<Utc>, published_at: DateTime<Utc>, signals: &Signals) -> f64 {
    let recency = recency_term(now, published_at);
    let engagement = ENGAGEMENT_WEIGHT * (1.0 + signals.engagement_count as f64).ln();
    let source_rep = SOURCE_REP_WEIGHT * (1.0 + signals.source_rate).ln();
    let effective_cluster = signals.cluster_size.max(1).min(CLUSTER_CAP);
    let cluster = CLUSTER_WEIGHT * (1.0 + (effective_cluster - 1).max(0) as f64).ln();
    let affinity = AFFINITY_WEIGHT * signals.affinity;
    // 1-10 centered at the neutral 5: unscored items get no boost either way.
    let newsworthiness = if signals.newsworthiness > 0.0 {
        NEWSWORTHINESS_WEIGHT * ((signals.newsworthiness - 5.0) / 5.0)
    } else {
        0.0
    };
    recency + engagement + source_rep + cluster + affinity + newsworthiness
}

/// Offset/limit+1 pagination: `has_more` means the pool held at least one item
/// past this page.
fn paginate(items: Vec<FeedItem>, page: usize, limit: usize) -> RankedPage {
    let offset = page * limit;
    let slice: Vec<FeedItem> = items.into_iter().skip(offset).take(limit + 1).collect();
    let has_more = slice.len() > limit;
    let items = slice.into_iter().take(limit).collect();
    RankedPage { items, has_more }
}

fn sort_scored(scored: &mut [(f64, FeedItem)]) {
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
}

impl<S: FeedSource, A: AiProvider> Engine<S, A> {
    /// Produce one page of the ranked feed. Reads whatever state the
    /// background cycle has produced so far; signals that need an absent AI
    /// provider simply contribute nothing.
    pub async fn ranked_feed(&self, req: RankRequest<'_>) -> Result<RankedPage> {
        // Archive view: no scoring, just read-time order.
        if req.read_filter == ReadFilter::Read {
            let pool = self
                .inner
                .repo
                .feed_pool(req.topic, POOL_SIZE, ReadFilter::Read)
                .await?;
            return Ok(paginate(pool, req.page, req.limit));
        }

        if req.topic == "for_you" {
            return self.for_you_feed(req.page, req.limit).await;
        }

        let pool = self
            .inner
            .repo
            .feed_pool(req.topic, POOL_SIZE, ReadFilter::Unread)
            .await?;
        let counts = self.inner.repo.engagement_counts().await?;
        let rates = self.inner.repo.feed_engagement_rates().await?;
        let cluster_sizes = self.inner.repo.cluster_sizes_by_representative().await?;
        let news_scores = self.inner.repo.newsworthiness_scores().await?;

        let ai_ok = self.inner.ai.is_available().await;
        let interest_profile = if ai_ok {
            let recent = self
                .inner
                .repo
                .recent_engagement_embeddings(INTEREST_PROFILE_SIZE)
                .await?;
            average_embeddings(&recent)
        } else {
            None
        };

        let now = Utc::now();
        let mut scored: Vec<(f64, FeedItem)> = Vec::with_capacity(pool.len());
        for item in pool {
            let affinity = match &interest_profile {
                Some(profile) => self
                    .inner
                    .repo
                    .get_embedding(item.id)
                    .await?
                    .map(|emb| cosine_similarity(&emb, profile))
                    .unwrap_or(0.0),
                None => 0.0,
            };
            let signals = Signals {
                engagement_count: counts.get(&item.id).copied().unwrap_or(0),
                source_rate: rates.get(&item.feed_id).copied().unwrap_or(0.0),
                cluster_size: cluster_sizes.get(&item.id).copied().unwrap_or(1),
                affinity,
                newsworthiness: news_scores.get(&item.id).copied().unwrap_or(0.0),
            };
            let score = score_item(now, item.published_at, &signals);
            scored.push((score, item));
        }
        sort_scored(&mut scored);

        // "More like this": similarity boost over the already-top-ranked
        // window only, then re-sort. The rest of the pool is untouched.
        if let (Some(seed_id), true) = (req.similar_to, ai_ok) {
            if let Some(seed_emb) = self.embedding_or_compute_by_id(seed_id).await? {
                let window: Vec<(i64, String)> = scored
                    .iter()
                    .take(MORE_LIKE_WINDOW)
                    .map(|(_, item)| (item.id, embedding_text(&item.title, &item.description)))
                    .collect();
                let embeddings = self.embeddings_for(&window).await?;
                for (score, item) in scored.iter_mut() {
                    if let Some(emb) = embeddings.get(&item.id) {
                        *score += MORE_LIKE_WEIGHT * cosine_similarity(&seed_emb, emb);
                    }
                }
                sort_scored(&mut scored);
            }
        }

        let items = scored.into_iter().map(|(_, item)| item).collect();
        Ok(paginate(items, req.page, req.limit))
    }

    /// "For you": rank unread items by similarity to the user's most engaged
    /// items (the seeds), which are themselves excluded from the results.
    async fn for_you_feed(&self, page: usize, limit: usize) -> Result<RankedPage> {
        let pool = self
            .inner
            .repo
            .feed_pool("all", POOL_SIZE, ReadFilter::Unread)
            .await?;
        let counts = self.inner.repo.engagement_counts().await?;

        let mut by_engagement: Vec<(i64, i64)> =
            counts.iter().map(|(&id, &count)| (id, count)).collect();
        by_engagement.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let seed_ids: Vec<i64> = by_engagement
            .into_iter()
            .take(FOR_YOU_SEED_COUNT)
            .map(|(id, _)| id)
            .collect();
        let seed_set: HashSet<i64> = seed_ids.iter().copied().collect();

        let now = Utc::now();
        let mut scored: Vec<(f64, FeedItem)> = pool
            .into_iter()
            .filter(|item| !seed_set.contains(&item.id))
            .map(|item| {
                let engagement = counts.get(&item.id).copied().unwrap_or(0);
                let score = recency_term(now, item.published_at)
                    + ENGAGEMENT_WEIGHT * (1.0 + engagement as f64).ln();
                (score, item)
            })
            .collect();

        if !seed_ids.is_empty() && self.inner.ai.is_available().await {
            let mut seed_embeddings = Vec::new();
            for &seed_id in &seed_ids {
                if let Some(emb) = self.embedding_or_compute_by_id(seed_id).await? {
                    seed_embeddings.push(emb);
                }
            }
            if !seed_embeddings.is_empty() {
                let candidates: Vec<(i64, String)> = scored
                    .iter()
                    .map(|(_, item)| (item.id, embedding_text(&item.title, &item.description)))
                    .collect();
                let embeddings = self.embeddings_for(&candidates).await?;
                for (score, item) in scored.iter_mut() {
                    if let Some(emb) = embeddings.get(&item.id) {
                        let mean = seed_embeddings
                            .iter()
                            .map(|seed| cosine_similarity(emb, seed))
                            .sum::<f64>()
                            / seed_embeddings.len() as f64;
                        *score += FOR_YOU_SIMILARITY_WEIGHT * mean;
                    }
                }
            }
        }

        sort_scored(&mut scored);
        let items = scored.into_iter().map(|(_, item)| item).collect();
        Ok(paginate(items, page, limit))
    }

    /// Cached embedding or compute-and-store from the given item text.
    /// Last-write-wins on the race with the background pipeline is fine; both
    /// sides converge to the same vector.
    async fn embedding_or_compute(&self, item_id: i64, text: &str) -> Result<Option<Vec<f32>>> {
        if let Some(cached) = self.inner.repo.get_embedding(item_id).await? {
            return Ok(Some(cached));
        }
        if text.is_empty() {
            return Ok(None);
        }
        match self.inner.ai.embed(text).await {
            Some(embedding) => {
                self.inner.repo.set_embedding(item_id, &embedding).await?;
                Ok(Some(embedding))
            }
            None => Ok(None),
        }
    }

    async fn embedding_or_compute_by_id(&self, item_id: i64) -> Result<Option<Vec<f32>>> {
        let Some((title, description)) = self.inner.repo.item_text(item_id).await? else {
            return Ok(None);
        };
        self.embedding_or_compute(item_id, &embedding_text(&title, &description))
            .await
    }

    /// Fetch-or-compute embeddings for a set of items, a few at a time.
    async fn embeddings_for(&self, items: &[(i64, String)]) -> Result<HashMap<i64, Vec<f32>>> {
        let mut out = HashMap::new();
        for chunk in items.chunks(EMBED_CONCURRENCY) {
            let results = join_all(
                chunk
                    .iter()
                    .map(|(id, text)| async move { (*id, self.embedding_or_compute(*id, text).await) }),
            )
            .await;
            for (id, result) in results {
                if let Some(embedding) = result? {
                    out.insert(id, embedding);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{engine_with_ai, engine_with_items, published_hours_ago, StubAi};
    use super::*;
    use crate::models::EngagementKind;

    fn plain_signals() -> Signals {
        Signals {
            engagement_count: 0,
            source_rate: 0.0,
            cluster_size: 1,
            affinity: 0.0,
            newsworthiness: 0.0,
        }
    }

    fn dummy_item(id: i64) -> FeedItem {
        FeedItem {
            id,
            feed_id: 1,
            feed_title: "Feed".to_string(),
            guid: format!("guid-{id}"),
            title: format!("Item {id}"),
            link: format!("https://example.test/{id}"),
            description: String::new(),
            topic: "general".to_string(),
            published_at: Utc::now(),
            thumbnail_url: None,
            read_at: None,
        }
    }

    #[test]
    fn recency_is_monotonic_in_age() {
        let now = Utc::now();
        let newer = score_item(now, published_hours_ago(1), &plain_signals());
        let older = score_item(now, published_hours_ago(30), &plain_signals());
        assert!(newer > older);
    }

    #[test]
    fn cluster_boost_is_capped() {
        let now = Utc::now();
        let published = published_hours_ago(1);
        let mut signals = plain_signals();
        signals.cluster_size = 3;
        let at_cap = score_item(now, published, &signals);
        signals.cluster_size = 10;
        let over_cap = score_item(now, published, &signals);
        assert_eq!(at_cap, over_cap);

        signals.cluster_size = 1;
        let singleton = score_item(now, published, &signals);
        assert!(at_cap > singleton);
    }

    #[test]
    fn neutral_newsworthiness_adds_nothing() {
        let now = Utc::now();
        let published = published_hours_ago(1);
        let mut signals = plain_signals();
        let unscored = score_item(now, published, &signals);
        signals.newsworthiness = 5.0;
        let neutral = score_item(now, published, &signals);
        assert!((unscored - neutral).abs() < 1e-9);

        signals.newsworthiness = 2.0;
        assert!(score_item(now, published, &signals) < unscored);
        signals.newsworthiness = 9.0;
        assert!(score_item(now, published, &signals) > unscored);
    }

    #[test]
    fn pagination_detects_the_extra_item() {
        let exactly: Vec<FeedItem> = (0..20).map(dummy_item).collect();
        let page = paginate(exactly, 0, 20);
        assert_eq!(page.items.len(), 20);
        assert!(!page.has_more);

        let one_over: Vec<FeedItem> = (0..21).map(dummy_item).collect();
        let page = paginate(one_over, 0, 20);
        assert_eq!(page.items.len(), 20);
        assert!(page.has_more);

        let one_over: Vec<FeedItem> = (0..21).map(dummy_item).collect();
        let page = paginate(one_over, 1, 20);
        assert_eq!(page.items.len(), 1);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn newer_of_identical_items_ranks_first() {
        let (engine, ids) = engine_with_items(&[
            ("older", published_hours_ago(30)),
            ("newer", published_hours_ago(1)),
        ])
        .await;

        let page = engine
            .ranked_feed(RankRequest {
                page: 0,
                limit: 10,
                topic: "all",
                similar_to: None,
                read_filter: ReadFilter::Unread,
            })
            .await
            .unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, ids[1]);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn read_filter_returns_only_read_items() {
        let (engine, ids) = engine_with_items(&[
            ("a", published_hours_ago(1)),
            ("b", published_hours_ago(2)),
        ])
        .await;
        engine.repository().mark_read(ids[1]).await.unwrap();

        let page = engine
            .ranked_feed(RankRequest {
                page: 0,
                limit: 10,
                topic: "all",
                similar_to: None,
                read_filter: ReadFilter::Read,
            })
            .await
            .unwrap();

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, ids[1]);
    }

    #[tokio::test]
    async fn for_you_excludes_engagement_seeds() {
        let (engine, ids) = engine_with_items(&[
            ("seed", published_hours_ago(1)),
            ("fresh", published_hours_ago(2)),
        ])
        .await;
        let repo = engine.repository();
        repo.record_engagement(ids[0], EngagementKind::Open, None)
            .await
            .unwrap();
        repo.record_engagement(ids[0], EngagementKind::View, Some(1200))
            .await
            .unwrap();

        let page = engine
            .ranked_feed(RankRequest {
                page: 0,
                limit: 10,
                topic: "for_you",
                similar_to: None,
                read_filter: ReadFilter::Unread,
            })
            .await
            .unwrap();

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, ids[1]);
    }

    #[tokio::test]
    async fn topic_filter_narrows_the_pool() {
        let (engine, _ids) = engine_with_items(&[("plain", published_hours_ago(1))]).await;
        // The default classifier output for the test items is "general",
        // which the "other" filter includes and a concrete topic excludes.
        let other = engine
            .ranked_feed(RankRequest {
                page: 0,
                limit: 10,
                topic: "other",
                similar_to: None,
                read_filter: ReadFilter::Unread,
            })
            .await
            .unwrap();
        assert_eq!(other.items.len(), 1);

        let sports = engine
            .ranked_feed(RankRequest {
                page: 0,
                limit: 10,
                topic: "sports",
                similar_to: None,
                read_filter: ReadFilter::Unread,
            })
            .await
            .unwrap();
        assert!(sports.items.is_empty());
    }

    #[tokio::test]
    async fn more_like_boost_reorders_by_similarity() {
        let (engine, ids) = engine_with_ai(
            StubAi {
                available: true,
                vector: Some(vec![1.0, 0.0]),
                response: None,
            },
            &[
                ("seed", published_hours_ago(6)),
                ("close", published_hours_ago(5)),
                ("far", published_hours_ago(4)),
            ],
        )
        .await;
        let repo = engine.repository();
        repo.set_embedding(ids[0], &[1.0, 0.0]).await.unwrap();
        repo.set_embedding(ids[1], &[1.0, 0.05]).await.unwrap();
        repo.set_embedding(ids[2], &[-1.0, 0.2]).await.unwrap();

        // Without the boost "far" outranks "close" on recency alone.
        let page = engine
            .ranked_feed(RankRequest {
                page: 0,
                limit: 10,
                topic: "all",
                similar_to: Some(ids[0]),
                read_filter: ReadFilter::Unread,
            })
            .await
            .unwrap();

        let close_pos = page.items.iter().position(|i| i.id == ids[1]).unwrap();
        let far_pos = page.items.iter().position(|i| i.id == ids[2]).unwrap();
        assert!(close_pos < far_pos);
    }
}
