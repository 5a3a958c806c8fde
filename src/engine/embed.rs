//! Embedding pipeline: computes vectors for items that lack one, in small
//! batches so a local embedding server is not flooded. Skipped items simply
//! remain embedding-less and are retried next cycle.

use std::time::Duration;

use futures::future::join_all;

use crate::ai::AiProvider;
use crate::error::Result;
use crate::feed::FeedSource;
use crate::util::truncate_chars;

use super::Engine;

const EMBED_BATCH_SIZE: usize = 10;
const EMBED_BATCH_DELAY: Duration = Duration::from_millis(200);
const TITLE_MAX_CHARS: usize = 2000;
const DESCRIPTION_MAX_CHARS: usize = 4000;

/// Text sent to the embedding model for an item.
pub(crate) fn embedding_text(title: &str, description: &str) -> String {
    format!(
        "{} {}",
        truncate_chars(title, TITLE_MAX_CHARS),
        truncate_chars(description, DESCRIPTION_MAX_CHARS)
    )
    .trim()
    .to_string()
}

impl<S: FeedSource, A: AiProvider> Engine<S, A> {
    /// Compute embeddings for up to 5 batches of embedding-less items,
    /// most-recent-first. No-op when the provider is unavailable.
    pub async fn run_embeddings(&self) -> Result<()> {
        if !self.inner.ai.is_available().await {
            return Ok(());
        }

        let item_ids = self
            .inner
            .repo
            .items_without_embeddings(EMBED_BATCH_SIZE * 5)
            .await?;
        if item_ids.is_empty() {
            return Ok(());
        }

        let batch_count = item_ids.len().div_ceil(EMBED_BATCH_SIZE);
        for (i, batch) in item_ids.chunks(EMBED_BATCH_SIZE).enumerate() {
            if self.stopping() {
                break;
            }
            let results = join_all(batch.iter().map(|&id| self.embed_one(id))).await;
            for result in results {
                result?;
            }
            if i + 1 < batch_count {
                tokio::time::sleep(EMBED_BATCH_DELAY).await;
            }
        }
        Ok(())
    }

    async fn embed_one(&self, item_id: i64) -> Result<()> {
        // Race guard: another path (e.g. ranking's compute-on-demand) may have
        // stored one since we selected candidates.
        if self.inner.repo.get_embedding(item_id).await?.is_some() {
            return Ok(());
        }
        let Some((title, description)) = self.inner.repo.item_text(item_id).await? else {
            return Ok(());
        };
        let text = embedding_text(&title, &description);
        if text.is_empty() {
            return Ok(());
        }
        if let Some(embedding) = self.inner.ai.embed(&text).await {
            self.inner.repo.set_embedding(item_id, &embedding).await?;
        }
        Ok(())
    }
}
