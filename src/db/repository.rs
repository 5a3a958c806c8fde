use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{ClusterMember, EngagementKind, Feed, FeedItem, NewItem, ReadFilter};

use super::schema::SCHEMA;

/// Fixed-width UTC timestamp so lexicographic order in SQL matches
/// chronological order.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Clone)]
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Feed operations

    pub async fn add_feed(&self, url: &str, title: &str) -> Result<i64> {
        let url = url.trim().to_string();
        let title = if title.is_empty() { url.clone() } else { title.to_string() };
        let added_at = ts(&Utc::now());
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO feeds (url, title, added_at) VALUES (?1, ?2, ?3)",
                    params![url, title, added_at],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn remove_feed(&self, id: i64) -> Result<()> {
        // Items, read state, embeddings, cluster memberships and scores all
        // cascade from the feed row.
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM feeds WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, url, title, added_at, last_fetched_at FROM feeds ORDER BY added_at DESC",
                )?;
                let feeds = stmt
                    .query_map([], |row| feed_from_row(row))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    pub async fn set_feed_last_fetched(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let at = ts(&at);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE feeds SET last_fetched_at = ?1 WHERE id = ?2",
                    params![at, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Item operations

    /// Upsert parsed items for a feed, returning the ids of genuinely new
    /// inserts (not updates). Re-fetching an existing guid updates mutable
    /// fields but never changes identity.
    pub async fn upsert_items_returning_new(
        &self,
        feed_id: i64,
        items: Vec<NewItem>,
    ) -> Result<Vec<i64>> {
        let created_at = ts(&Utc::now());
        let new_ids = self
            .conn
            .call(move |conn| {
                let mut new_ids = Vec::new();
                for item in items {
                    let existing: Option<i64> = conn
                        .query_row(
                            "SELECT id FROM items WHERE feed_id = ?1 AND guid = ?2",
                            params![feed_id, item.guid],
                            |row| row.get(0),
                        )
                        .optional()?;

                    conn.execute(
                        r#"INSERT INTO items (feed_id, guid, link, title, description, topic, published_at, thumbnail_url, created_at)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                           ON CONFLICT(feed_id, guid) DO UPDATE SET
                               link = excluded.link,
                               title = excluded.title,
                               description = excluded.description,
                               topic = excluded.topic,
                               published_at = excluded.published_at,
                               thumbnail_url = excluded.thumbnail_url"#,
                        params![
                            feed_id,
                            item.guid,
                            item.link,
                            item.title,
                            item.description,
                            item.topic,
                            ts(&item.published_at),
                            item.thumbnail_url,
                            created_at,
                        ],
                    )?;

                    if existing.is_none() {
                        new_ids.push(conn.last_insert_rowid());
                    }
                }
                Ok(new_ids)
            })
            .await?;
        Ok(new_ids)
    }

    pub async fn item_text(&self, item_id: i64) -> Result<Option<(String, String)>> {
        let text = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT title, description FROM items WHERE id = ?1",
                        params![item_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(text)
    }

    pub async fn update_item_thumbnail(&self, item_id: i64, thumbnail_url: &str) -> Result<()> {
        let url = thumbnail_url.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE items SET thumbnail_url = ?1 WHERE id = ?2",
                    params![url, item_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Fetch a bounded pool of items for ranking, joined with feed title and
    /// read state. Unread pools come back published-desc, read pools read-desc.
    pub async fn feed_pool(
        &self,
        topic: &str,
        pool_size: usize,
        read_filter: ReadFilter,
    ) -> Result<Vec<FeedItem>> {
        let topic = topic.to_string();
        let pool = self
            .conn
            .call(move |conn| {
                let topic_clause = if topic.is_empty() || topic == "all" {
                    ""
                } else if topic == "other" {
                    " AND (i.topic IN ('general', 'other') OR i.topic IS NULL)"
                } else {
                    " AND i.topic = ?1"
                };
                let (read_clause, order_clause) = match read_filter {
                    ReadFilter::Read => (" AND r.read_at IS NOT NULL", "ORDER BY r.read_at DESC"),
                    ReadFilter::Unread => (" AND r.read_at IS NULL", "ORDER BY i.published_at DESC"),
                };
                let sql = format!(
                    r#"SELECT i.id, i.feed_id, f.title AS feed_title, i.guid, i.title, i.link,
                              i.description, i.topic, i.published_at, i.thumbnail_url, r.read_at
                       FROM items i
                       JOIN feeds f ON f.id = i.feed_id
                       LEFT JOIN read_state r ON r.item_id = i.id
                       WHERE 1=1{topic_clause}{read_clause}
                       {order_clause}
                       LIMIT {pool_size}"#
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = if topic_clause.contains("?1") {
                    stmt.query_map(params![topic], |row| feed_item_from_row(row))?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                } else {
                    stmt.query_map([], |row| feed_item_from_row(row))?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                };
                Ok(rows)
            })
            .await?;
        Ok(pool)
    }

    pub async fn mark_read(&self, item_id: i64) -> Result<()> {
        let read_at = ts(&Utc::now());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO read_state (item_id, read_at) VALUES (?1, ?2)
                     ON CONFLICT(item_id) DO UPDATE SET read_at = excluded.read_at",
                    params![item_id, read_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Engagement

    pub async fn record_engagement(
        &self,
        item_id: i64,
        kind: EngagementKind,
        duration_ms: Option<i64>,
    ) -> Result<()> {
        let at = ts(&Utc::now());
        let kind = kind.as_str();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO engagement_events (item_id, event_type, duration_ms, at) VALUES (?1, ?2, ?3, ?4)",
                    params![item_id, kind, duration_ms, at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// All-time positive engagement count (open/view/more_like) per item.
    pub async fn engagement_counts(&self) -> Result<HashMap<i64, i64>> {
        let counts = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT item_id, COUNT(*) FROM engagement_events
                     WHERE event_type IN ('open', 'view', 'more_like')
                     GROUP BY item_id",
                )?;
                let mut counts = HashMap::new();
                let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
                for row in rows {
                    let (item_id, count) = row?;
                    counts.insert(item_id, count);
                }
                Ok(counts)
            })
            .await?;
        Ok(counts)
    }

    /// Engagement rate per feed: total engagements / total items. Higher means
    /// the user engages more with that source.
    pub async fn feed_engagement_rates(&self) -> Result<HashMap<i64, f64>> {
        let rates = self
            .conn
            .call(|conn| {
                let mut item_counts: HashMap<i64, i64> = HashMap::new();
                {
                    let mut stmt =
                        conn.prepare("SELECT feed_id, COUNT(*) FROM items GROUP BY feed_id")?;
                    let rows =
                        stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
                    for row in rows {
                        let (feed_id, count) = row?;
                        item_counts.insert(feed_id, count);
                    }
                }
                let mut rates = HashMap::new();
                let mut stmt = conn.prepare(
                    "SELECT i.feed_id, COUNT(*) FROM engagement_events e
                     JOIN items i ON i.id = e.item_id
                     GROUP BY i.feed_id",
                )?;
                let rows =
                    stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
                for row in rows {
                    let (feed_id, eng_count) = row?;
                    let total = *item_counts.get(&feed_id).unwrap_or(&1);
                    rates.insert(feed_id, eng_count as f64 / total.max(1) as f64);
                }
                Ok(rates)
            })
            .await?;
        Ok(rates)
    }

    /// Embeddings of the user's most recently positively-engaged items, newest
    /// first. Feeds the interest profile.
    pub async fn recent_engagement_embeddings(&self, limit: usize) -> Result<Vec<Vec<f32>>> {
        let embeddings = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT ie.embedding, MAX(e.at) AS last_at
                     FROM engagement_events e
                     JOIN item_embeddings ie ON ie.item_id = e.item_id
                     WHERE e.event_type IN ('open', 'view', 'more_like')
                     GROUP BY e.item_id
                     ORDER BY last_at DESC
                     LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
                let mut embeddings = Vec::new();
                for row in rows {
                    if let Ok(vec) = serde_json::from_str::<Vec<f32>>(&row?) {
                        embeddings.push(vec);
                    }
                }
                Ok(embeddings)
            })
            .await?;
        Ok(embeddings)
    }

    // Embeddings

    pub async fn get_embedding(&self, item_id: i64) -> Result<Option<Vec<f32>>> {
        let embedding = self
            .conn
            .call(move |conn| {
                let json: Option<String> = conn
                    .query_row(
                        "SELECT embedding FROM item_embeddings WHERE item_id = ?1",
                        params![item_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(json)
            })
            .await?;
        Ok(embedding.and_then(|json| serde_json::from_str(&json).ok()))
    }

    pub async fn set_embedding(&self, item_id: i64, embedding: &[f32]) -> Result<()> {
        let json = serde_json::to_string(embedding).unwrap_or_else(|_| "[]".to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO item_embeddings (item_id, embedding) VALUES (?1, ?2)
                     ON CONFLICT(item_id) DO UPDATE SET embedding = excluded.embedding",
                    params![item_id, json],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Item ids lacking an embedding, most recent first.
    pub async fn items_without_embeddings(&self, limit: usize) -> Result<Vec<i64>> {
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT i.id FROM items i
                     LEFT JOIN item_embeddings e ON e.item_id = i.id
                     WHERE e.item_id IS NULL
                     ORDER BY i.published_at DESC
                     LIMIT ?1",
                )?;
                let ids = stmt
                    .query_map(params![limit as i64], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    /// Recent items with embeddings: the clustering candidate pool, ordered
    /// published-desc.
    pub async fn recent_items_with_embeddings(
        &self,
        published_after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(i64, Vec<f32>)>> {
        let cutoff = ts(&published_after);
        let items = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT i.id, e.embedding FROM items i
                     JOIN item_embeddings e ON e.item_id = i.id
                     WHERE i.published_at > ?1
                     ORDER BY i.published_at DESC
                     LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![cutoff, limit as i64], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|(id, json)| serde_json::from_str(&json).ok().map(|v| (id, v)))
            .collect())
    }

    /// Recent embedded items not yet in any cluster, published-desc.
    pub async fn unclustered_recent_ids(
        &self,
        published_after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<i64>> {
        let cutoff = ts(&published_after);
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT i.id FROM items i
                     JOIN item_embeddings e ON e.item_id = i.id
                     LEFT JOIN cluster_members cm ON cm.item_id = i.id
                     WHERE i.published_at > ?1 AND cm.item_id IS NULL
                     ORDER BY i.published_at DESC
                     LIMIT ?2",
                )?;
                let ids = stmt
                    .query_map(params![cutoff, limit as i64], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    // Clusters

    /// Current item -> cluster assignment for every cluster member.
    pub async fn cluster_memberships(&self) -> Result<HashMap<i64, i64>> {
        let map = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT item_id, cluster_id FROM cluster_members")?;
                let mut map = HashMap::new();
                let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
                for row in rows {
                    let (item_id, cluster_id) = row?;
                    map.insert(item_id, cluster_id);
                }
                Ok(map)
            })
            .await?;
        Ok(map)
    }

    pub async fn create_cluster(
        &self,
        representative_item_id: i64,
        members: Vec<(i64, f64)>,
    ) -> Result<i64> {
        let now = ts(&Utc::now());
        let cluster_id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO story_clusters (representative_item_id, created_at, updated_at) VALUES (?1, ?2, ?3)",
                    params![representative_item_id, now, now],
                )?;
                let cluster_id = conn.last_insert_rowid();
                for (item_id, similarity) in members {
                    conn.execute(
                        "INSERT OR IGNORE INTO cluster_members (cluster_id, item_id, similarity) VALUES (?1, ?2, ?3)",
                        params![cluster_id, item_id, similarity],
                    )?;
                }
                Ok(cluster_id)
            })
            .await?;
        Ok(cluster_id)
    }

    pub async fn add_to_cluster(&self, cluster_id: i64, item_id: i64, similarity: f64) -> Result<()> {
        let now = ts(&Utc::now());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO cluster_members (cluster_id, item_id, similarity) VALUES (?1, ?2, ?3)",
                    params![cluster_id, item_id, similarity],
                )?;
                conn.execute(
                    "UPDATE story_clusters SET updated_at = ?1 WHERE id = ?2",
                    params![now, cluster_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_cluster_representative(&self, cluster_id: i64, item_id: i64) -> Result<()> {
        let now = ts(&Utc::now());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE story_clusters SET representative_item_id = ?1, updated_at = ?2 WHERE id = ?3",
                    params![item_id, now, cluster_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Members of a cluster joined for display, most recently published first.
    pub async fn cluster_members(&self, cluster_id: i64) -> Result<Vec<ClusterMember>> {
        let members = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT cm.item_id, cm.similarity, i.title, f.title, i.link, i.published_at, i.thumbnail_url
                     FROM cluster_members cm
                     JOIN items i ON i.id = cm.item_id
                     JOIN feeds f ON f.id = i.feed_id
                     WHERE cm.cluster_id = ?1
                     ORDER BY i.published_at DESC",
                )?;
                let members = stmt
                    .query_map(params![cluster_id], |row| {
                        Ok(ClusterMember {
                            item_id: row.get(0)?,
                            similarity: row.get(1)?,
                            title: row.get(2)?,
                            feed_title: row.get(3)?,
                            link: row.get(4)?,
                            published_at: parse_ts(&row.get::<_, String>(5)?),
                            thumbnail_url: row.get(6)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(members)
            })
            .await?;
        Ok(members)
    }

    /// Cluster sizes keyed by the cluster's representative item.
    pub async fn cluster_sizes_by_representative(&self) -> Result<HashMap<i64, i64>> {
        let sizes = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT sc.representative_item_id, COUNT(cm.item_id)
                     FROM story_clusters sc
                     JOIN cluster_members cm ON cm.cluster_id = sc.id
                     WHERE sc.representative_item_id IS NOT NULL
                     GROUP BY sc.representative_item_id",
                )?;
                let mut sizes = HashMap::new();
                let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
                for row in rows {
                    let (item_id, count) = row?;
                    sizes.insert(item_id, count);
                }
                Ok(sizes)
            })
            .await?;
        Ok(sizes)
    }

    // Newsworthiness

    pub async fn set_newsworthiness(&self, item_id: i64, score: f64, reason: &str) -> Result<()> {
        let reason = reason.to_string();
        let scored_at = ts(&Utc::now());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO newsworthiness_scores (item_id, score, reason, scored_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(item_id) DO UPDATE SET
                         score = excluded.score,
                         reason = excluded.reason,
                         scored_at = excluded.scored_at",
                    params![item_id, score, reason, scored_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn newsworthiness_scores(&self) -> Result<HashMap<i64, f64>> {
        let scores = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT item_id, score FROM newsworthiness_scores")?;
                let mut scores = HashMap::new();
                let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)))?;
                for row in rows {
                    let (item_id, score) = row?;
                    scores.insert(item_id, score);
                }
                Ok(scores)
            })
            .await?;
        Ok(scores)
    }

    /// Recent items that have not been rated yet, newest first.
    pub async fn items_without_newsworthiness(
        &self,
        published_after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(i64, String, String)>> {
        let cutoff = ts(&published_after);
        let items = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT i.id, i.title, i.description FROM items i
                     LEFT JOIN newsworthiness_scores ns ON ns.item_id = i.id
                     WHERE i.published_at > ?1 AND ns.item_id IS NULL
                     ORDER BY i.published_at DESC
                     LIMIT ?2",
                )?;
                let items = stmt
                    .query_map(params![cutoff, limit as i64], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        added_at: parse_ts(&row.get::<_, String>(3)?),
        last_fetched_at: row.get::<_, Option<String>>(4)?.map(|s| parse_ts(&s)),
    })
}

fn feed_item_from_row(row: &Row) -> rusqlite::Result<FeedItem> {
    Ok(FeedItem {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        feed_title: row.get(2)?,
        guid: row.get(3)?,
        title: row.get(4)?,
        link: row.get(5)?,
        description: row.get(6)?,
        topic: row.get(7)?,
        published_at: parse_ts(&row.get::<_, String>(8)?),
        thumbnail_url: row.get(9)?,
        read_at: row.get::<_, Option<String>>(10)?.map(|s| parse_ts(&s)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    async fn memory_repo() -> Repository {
        Repository::new(":memory:").await.unwrap()
    }

    fn item(guid: &str, title: &str) -> NewItem {
        NewItem {
            guid: guid.to_string(),
            link: format!("https://example.test/{guid}"),
            title: title.to_string(),
            description: "body".to_string(),
            topic: "general".to_string(),
            published_at: Utc::now(),
            thumbnail_url: None,
        }
    }

    #[tokio::test]
    async fn reopening_the_database_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db").to_string_lossy().to_string();

        {
            let repo = Repository::new(&db_path).await.unwrap();
            let feed_id = repo.add_feed("https://a.test/rss", "A").await.unwrap();
            tokio_test::assert_ok!(
                repo.upsert_items_returning_new(feed_id, vec![item("g1", "t1")])
                    .await
            );
        }

        let repo = Repository::new(&db_path).await.unwrap();
        let feeds = repo.get_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].url, "https://a.test/rss");
        let pool = repo.feed_pool("all", 10, ReadFilter::Unread).await.unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_guid() {
        let repo = memory_repo().await;
        let feed_id = repo.add_feed("https://a.test/rss", "A").await.unwrap();

        let new = repo
            .upsert_items_returning_new(feed_id, vec![item("g1", "first")])
            .await
            .unwrap();
        assert_eq!(new.len(), 1);

        // Same guid again: update, not a new item.
        let new = repo
            .upsert_items_returning_new(feed_id, vec![item("g1", "retitled")])
            .await
            .unwrap();
        assert!(new.is_empty());

        let pool = repo.feed_pool("all", 10, ReadFilter::Unread).await.unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].title, "retitled");
    }

    #[tokio::test]
    async fn removing_a_feed_cascades_to_its_items() {
        let repo = memory_repo().await;
        let feed_id = repo.add_feed("https://a.test/rss", "A").await.unwrap();
        let ids = repo
            .upsert_items_returning_new(feed_id, vec![item("g1", "t1"), item("g2", "t2")])
            .await
            .unwrap();
        repo.set_embedding(ids[0], &[0.1, 0.2]).await.unwrap();
        repo.mark_read(ids[0]).await.unwrap();

        repo.remove_feed(feed_id).await.unwrap();

        assert!(repo.feed_pool("all", 10, ReadFilter::Unread).await.unwrap().is_empty());
        assert!(repo.get_embedding(ids[0]).await.unwrap().is_none());
        assert!(repo.feed_pool("all", 10, ReadFilter::Read).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn embedding_roundtrip() {
        let repo = memory_repo().await;
        let feed_id = repo.add_feed("https://a.test/rss", "A").await.unwrap();
        let ids = repo
            .upsert_items_returning_new(feed_id, vec![item("g1", "t1")])
            .await
            .unwrap();

        assert!(repo.get_embedding(ids[0]).await.unwrap().is_none());
        repo.set_embedding(ids[0], &[0.25, -0.5, 1.0]).await.unwrap();
        let stored = repo.get_embedding(ids[0]).await.unwrap().unwrap();
        assert_eq!(stored, vec![0.25, -0.5, 1.0]);

        assert!(repo.items_without_embeddings(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn thumbnail_backfill_updates_the_item() {
        let repo = memory_repo().await;
        let feed_id = repo.add_feed("https://a.test/rss", "A").await.unwrap();
        let ids = repo
            .upsert_items_returning_new(feed_id, vec![item("g1", "t1")])
            .await
            .unwrap();

        repo.update_item_thumbnail(ids[0], "https://a.test/img.jpg")
            .await
            .unwrap();

        let pool = repo.feed_pool("all", 10, ReadFilter::Unread).await.unwrap();
        assert_eq!(
            pool[0].thumbnail_url.as_deref(),
            Some("https://a.test/img.jpg")
        );
    }

    #[tokio::test]
    async fn mark_read_moves_item_between_pools() {
        let repo = memory_repo().await;
        let feed_id = repo.add_feed("https://a.test/rss", "A").await.unwrap();
        let ids = repo
            .upsert_items_returning_new(feed_id, vec![item("g1", "t1"), item("g2", "t2")])
            .await
            .unwrap();

        repo.mark_read(ids[0]).await.unwrap();

        let unread = repo.feed_pool("all", 10, ReadFilter::Unread).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, ids[1]);

        let read = repo.feed_pool("all", 10, ReadFilter::Read).await.unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].id, ids[0]);
        assert!(read[0].read_at.is_some());
    }

    #[tokio::test]
    async fn engagement_counts_ignore_negative_signals() {
        let repo = memory_repo().await;
        let feed_id = repo.add_feed("https://a.test/rss", "A").await.unwrap();
        let ids = repo
            .upsert_items_returning_new(feed_id, vec![item("g1", "t1")])
            .await
            .unwrap();

        repo.record_engagement(ids[0], EngagementKind::Open, None)
            .await
            .unwrap();
        repo.record_engagement(ids[0], EngagementKind::View, Some(4000))
            .await
            .unwrap();
        repo.record_engagement(ids[0], EngagementKind::LessLike, None)
            .await
            .unwrap();

        let counts = repo.engagement_counts().await.unwrap();
        assert_eq!(counts.get(&ids[0]), Some(&2));
    }

    #[tokio::test]
    async fn cluster_sizes_are_keyed_by_representative() {
        let repo = memory_repo().await;
        let feed_id = repo.add_feed("https://a.test/rss", "A").await.unwrap();
        let ids = repo
            .upsert_items_returning_new(
                feed_id,
                vec![item("g1", "t1"), item("g2", "t2"), item("g3", "t3")],
            )
            .await
            .unwrap();

        let cluster_id = repo
            .create_cluster(ids[0], vec![(ids[0], 1.0), (ids[1], 0.9)])
            .await
            .unwrap();
        repo.add_to_cluster(cluster_id, ids[2], 0.85).await.unwrap();

        let sizes = repo.cluster_sizes_by_representative().await.unwrap();
        assert_eq!(sizes.get(&ids[0]), Some(&3));
        assert_eq!(sizes.get(&ids[1]), None);

        let members = repo.cluster_members(cluster_id).await.unwrap();
        assert_eq!(members.len(), 3);
    }
}
