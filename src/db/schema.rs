pub const SCHEMA: &str = r#"
-- subscribed feeds
CREATE TABLE IF NOT EXISTS feeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL DEFAULT '',
    added_at TEXT NOT NULL,
    last_fetched_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_feeds_url ON feeds(url);

-- feed items
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    guid TEXT NOT NULL,
    link TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    topic TEXT NOT NULL DEFAULT 'general',
    published_at TEXT NOT NULL,
    thumbnail_url TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(feed_id, guid)
);

CREATE INDEX IF NOT EXISTS idx_items_feed_published ON items(feed_id, published_at DESC);
CREATE INDEX IF NOT EXISTS idx_items_published ON items(published_at DESC);
CREATE INDEX IF NOT EXISTS idx_items_topic ON items(topic);

-- per-item read state (1:1 with items)
CREATE TABLE IF NOT EXISTS read_state (
    item_id INTEGER PRIMARY KEY REFERENCES items(id) ON DELETE CASCADE,
    read_at TEXT NOT NULL
);

-- append-only engagement log
CREATE TABLE IF NOT EXISTS engagement_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    event_type TEXT NOT NULL,
    duration_ms INTEGER,
    at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_engagement_item ON engagement_events(item_id);
CREATE INDEX IF NOT EXISTS idx_engagement_type ON engagement_events(event_type);

-- cached embedding vectors, stored as JSON arrays
CREATE TABLE IF NOT EXISTS item_embeddings (
    item_id INTEGER PRIMARY KEY REFERENCES items(id) ON DELETE CASCADE,
    embedding TEXT NOT NULL
);

-- story clusters: items from different sources covering the same event
CREATE TABLE IF NOT EXISTS story_clusters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    representative_item_id INTEGER REFERENCES items(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cluster_members (
    cluster_id INTEGER NOT NULL REFERENCES story_clusters(id) ON DELETE CASCADE,
    item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    similarity REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (cluster_id, item_id)
);

CREATE INDEX IF NOT EXISTS idx_cluster_members_item ON cluster_members(item_id);

-- LLM newsworthiness ratings, 1-10
CREATE TABLE IF NOT EXISTS newsworthiness_scores (
    item_id INTEGER PRIMARY KEY REFERENCES items(id) ON DELETE CASCADE,
    score REAL NOT NULL,
    reason TEXT,
    scored_at TEXT NOT NULL
);
"#;
