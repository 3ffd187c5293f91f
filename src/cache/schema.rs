// SPDX-License-Identifier: MPL-2.0

/// SQL schema for the cache database
pub const SCHEMA: &str = r#"
-- Database version for migrations
PRAGMA user_version = 1;

-- Entity sub-records, one JSON document per row.
-- Split per concern so that counter writes never touch details rows
-- and relationship flags can be rewritten cheaply.
CREATE TABLE IF NOT EXISTS user_details (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_counts (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_relationships (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_tags (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS post_details (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS post_counts (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS post_tags (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bookmarks (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

-- Staleness stamps, separate from entity storage so a batch staleness
-- check is one narrow read
CREATE TABLE IF NOT EXISTS user_ttl (
    id TEXT PRIMARY KEY,
    last_updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS post_ttl (
    id TEXT PRIMARY KEY,
    last_updated_at INTEGER NOT NULL
);

-- Ordered entity-id lists per stream key
CREATE TABLE IF NOT EXISTS user_streams (
    stream_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    entity_id TEXT NOT NULL,
    added_at INTEGER NOT NULL,
    UNIQUE(stream_id, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_user_streams_key ON user_streams(stream_id, position);

CREATE TABLE IF NOT EXISTS post_streams (
    stream_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    entity_id TEXT NOT NULL,
    added_at INTEGER NOT NULL,
    UNIQUE(stream_id, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_post_streams_key ON post_streams(stream_id, position);

-- Follow graph edges owned by this device's view of the world.
-- kind: 0 = following (owner follows peer), 1 = followers (peer follows owner)
CREATE TABLE IF NOT EXISTS connections (
    owner_id TEXT NOT NULL,
    kind INTEGER NOT NULL,
    peer_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY(owner_id, kind, peer_id)
);

CREATE INDEX IF NOT EXISTS idx_connections_peer ON connections(peer_id, kind);
"#;
