//! Story clustering: greedy nearest-neighbor assignment of recent embedded
//! items into clusters of articles covering the same event.

use std::collections::{HashMap, HashSet};

use chrono::{Duration as ChronoDuration, Utc};

use crate::ai::AiProvider;
use crate::error::Result;
use crate::feed::FeedSource;

use super::similarity::cosine_similarity;
use super::Engine;

/// High threshold on the [0, 1]-mapped cosine similarity; only very similar
/// stories merge, so distinct stories stay apart.
const SIMILARITY_THRESHOLD: f64 = 0.82;
const CANDIDATE_WINDOW_HOURS: i64 = 48;
const POOL_LIMIT: usize = 500;
const WORK_SET_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterOutcome {
    pub processed: usize,
    pub clustered: usize,
}

/// In-memory comparison pool rebuilt each pass. Entries keep the store's
/// published-desc order, so earlier (newer) items anchor later ones; a
/// processed candidate joins the pool immediately and can match candidates
/// that come after it in the same pass.
struct CandidateArena {
    entries: Vec<(i64, Vec<f32>)>,
    ids: HashSet<i64>,
    cluster_of: HashMap<i64, i64>,
}

impl CandidateArena {
    fn new(entries: Vec<(i64, Vec<f32>)>, cluster_of: HashMap<i64, i64>) -> Self {
        let ids = entries.iter().map(|(id, _)| *id).collect();
        Self {
            entries,
            ids,
            cluster_of,
        }
    }

    /// Best match for `item_id` across every other entry, clustered or not.
    /// Strictly-greater comparison means the earliest entry wins ties.
    fn best_match(&self, item_id: i64, embedding: &[f32]) -> Option<(i64, f64)> {
        let mut best: Option<(i64, f64)> = None;
        for (other_id, other_emb) in &self.entries {
            if *other_id == item_id {
                continue;
            }
            let sim = cosine_similarity(embedding, other_emb);
            if best.map(|(_, s)| sim > s).unwrap_or(sim > 0.0) {
                best = Some((*other_id, sim));
            }
        }
        best
    }

    fn push(&mut self, item_id: i64, embedding: Vec<f32>) {
        if self.ids.insert(item_id) {
            self.entries.push((item_id, embedding));
        }
    }
}

impl<S: FeedSource, A: AiProvider> Engine<S, A> {
    /// One clustering pass: assign unclustered recent items to the cluster of
    /// their most similar neighbor, or open a new two-member cluster when the
    /// neighbor is also unclustered. Below-threshold items stay singletons
    /// until a future pass finds them a match.
    pub async fn run_clustering(&self) -> Result<ClusterOutcome> {
        let cutoff = Utc::now() - ChronoDuration::hours(CANDIDATE_WINDOW_HOURS);

        let unclustered = self
            .inner
            .repo
            .unclustered_recent_ids(cutoff, WORK_SET_LIMIT)
            .await?;
        if unclustered.is_empty() {
            return Ok(ClusterOutcome {
                processed: 0,
                clustered: 0,
            });
        }

        let pool = self
            .inner
            .repo
            .recent_items_with_embeddings(cutoff, POOL_LIMIT)
            .await?;
        if pool.is_empty() {
            return Ok(ClusterOutcome {
                processed: 0,
                clustered: 0,
            });
        }

        let memberships = self.inner.repo.cluster_memberships().await?;
        let mut arena = CandidateArena::new(pool, memberships);

        let mut clustered = 0usize;
        for &item_id in &unclustered {
            let Some(embedding) = self.inner.repo.get_embedding(item_id).await? else {
                continue;
            };

            if let Some((best_id, best_sim)) = arena.best_match(item_id, &embedding) {
                if best_sim >= SIMILARITY_THRESHOLD {
                    let cluster_id = match arena.cluster_of.get(&best_id).copied() {
                        Some(cluster_id) => {
                            self.inner
                                .repo
                                .add_to_cluster(cluster_id, item_id, best_sim)
                                .await?;
                            cluster_id
                        }
                        None => {
                            let cluster_id = self
                                .inner
                                .repo
                                .create_cluster(best_id, vec![(best_id, 1.0), (item_id, best_sim)])
                                .await?;
                            arena.cluster_of.insert(best_id, cluster_id);
                            cluster_id
                        }
                    };
                    arena.cluster_of.insert(item_id, cluster_id);

                    // Representative is always the most recently published member.
                    let members = self.inner.repo.cluster_members(cluster_id).await?;
                    if let Some(newest) = members.first() {
                        self.inner
                            .repo
                            .set_cluster_representative(cluster_id, newest.item_id)
                            .await?;
                    }
                    clustered += 1;
                }
            }

            arena.push(item_id, embedding);
        }

        Ok(ClusterOutcome {
            processed: unclustered.len(),
            clustered,
        })
    }
}
