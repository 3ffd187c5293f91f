// SPDX-License-Identifier: MPL-2.0

use crate::cache::store::{self, PostTagsRecord, Record, TableData, UserTagsRecord};
use crate::cache::{CacheDb, CacheError};
use crate::nexus::types::{
    PostCounts, PostDetails, PostView, Relationship, UserCounts, UserDetails, UserView,
};
use rusqlite::params;

pub const USER_STREAMS: &str = "user_streams";
pub const POST_STREAMS: &str = "post_streams";

/// Ordered entity-id lists cached under a composite stream key.
/// Order is the canonical page-stable ordering from the remote; new pages
/// are appended, never reordered.
pub struct StreamStore {
    db: CacheDb,
    table: &'static str,
}

impl StreamStore {
    pub fn new(db: &CacheDb, table: &'static str) -> Self {
        Self {
            db: db.clone(),
            table,
        }
    }

    /// Full cached id list, or None when this stream has never been cached.
    pub fn get(&self, stream_id: &str) -> Result<Option<Vec<String>>, CacheError> {
        let table = self.table;
        let conn = self.db.conn();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT entity_id FROM {table} WHERE stream_id = ? ORDER BY position ASC"
            ))
            .map_err(|e| CacheError::Query {
                table,
                op: "get",
                source: e,
            })?;

        let ids = stmt
            .query_map([stream_id], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| CacheError::Query {
                table,
                op: "get",
                source: e,
            })?;

        if ids.is_empty() { Ok(None) } else { Ok(Some(ids)) }
    }

    pub fn slice(
        &self,
        stream_id: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<String>, CacheError> {
        let table = self.table;
        let conn = self.db.conn();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT entity_id FROM {table} WHERE stream_id = ? \
                 ORDER BY position ASC LIMIT ? OFFSET ?"
            ))
            .map_err(|e| CacheError::Query {
                table,
                op: "slice",
                source: e,
            })?;

        stmt.query_map(params![stream_id, limit as i64, skip as i64], |row| {
            row.get::<_, String>(0)
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CacheError::Query {
            table,
            op: "slice",
            source: e,
        })
    }

    pub fn len(&self, stream_id: &str) -> Result<usize, CacheError> {
        let table = self.table;
        let conn = self.db.conn();

        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE stream_id = ?"),
                [stream_id],
                |row| row.get(0),
            )
            .map_err(|e| CacheError::Query {
                table,
                op: "len",
                source: e,
            })?;

        Ok(count as usize)
    }

    pub fn exists(&self, stream_id: &str) -> Result<bool, CacheError> {
        Ok(self.len(stream_id)? > 0)
    }

    /// Create or replace the whole id list.
    pub fn replace(&self, stream_id: &str, ids: &[String]) -> Result<(), CacheError> {
        let table = self.table;
        let mut conn = self.db.conn();
        let tx = conn.transaction().map_err(|e| CacheError::Write {
            table,
            op: "replace",
            source: e,
        })?;
        let now = CacheDb::now_ms();

        tx.execute(
            &format!("DELETE FROM {table} WHERE stream_id = ?"),
            [stream_id],
        )
        .map_err(|e| CacheError::Write {
            table,
            op: "replace",
            source: e,
        })?;

        for (i, entity_id) in ids.iter().enumerate() {
            tx.execute(
                &format!(
                    "INSERT INTO {table} (stream_id, position, entity_id, added_at) \
                     VALUES (?1, ?2, ?3, ?4)"
                ),
                params![stream_id, i as i64, entity_id, now],
            )
            .map_err(|e| CacheError::Write {
                table,
                op: "replace",
                source: e,
            })?;
        }

        tx.commit().map_err(|e| CacheError::Write {
            table,
            op: "replace",
            source: e,
        })
    }

    /// Append a freshly fetched page after the current tail. An entity
    /// already present keeps a single row (its position is refreshed), so
    /// two interleaved fetches of the same page stay idempotent.
    pub fn persist_new_chunk(&self, stream_id: &str, ids: &[String]) -> Result<(), CacheError> {
        let table = self.table;
        let mut conn = self.db.conn();
        let tx = conn.transaction().map_err(|e| CacheError::Write {
            table,
            op: "persist_new_chunk",
            source: e,
        })?;
        let now = CacheDb::now_ms();

        let next: i64 = tx
            .query_row(
                &format!(
                    "SELECT COALESCE(MAX(position) + 1, 0) FROM {table} WHERE stream_id = ?"
                ),
                [stream_id],
                |row| row.get(0),
            )
            .map_err(|e| CacheError::Query {
                table,
                op: "persist_new_chunk",
                source: e,
            })?;

        for (i, entity_id) in ids.iter().enumerate() {
            tx.execute(
                &format!(
                    "INSERT INTO {table} (stream_id, position, entity_id, added_at) \
                     VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(stream_id, entity_id) DO UPDATE SET \
                         position = excluded.position, \
                         added_at = excluded.added_at"
                ),
                params![stream_id, next + i as i64, entity_id, now],
            )
            .map_err(|e| CacheError::Write {
                table,
                op: "persist_new_chunk",
                source: e,
            })?;
        }

        tx.commit().map_err(|e| CacheError::Write {
            table,
            op: "persist_new_chunk",
            source: e,
        })
    }

    /// Drop a stream's id list (on filter switch or full refresh).
    pub fn clear(&self, stream_id: &str) -> Result<(), CacheError> {
        let table = self.table;
        let conn = self.db.conn();

        conn.execute(
            &format!("DELETE FROM {table} WHERE stream_id = ?"),
            [stream_id],
        )
        .map_err(|e| CacheError::Write {
            table,
            op: "clear",
            source: e,
        })?;

        Ok(())
    }
}

/// Persist the full user records referenced by a fetched page, decoupled
/// from the id-list write. One transaction across the sub-record tables.
pub fn persist_users(db: &CacheDb, views: &[UserView]) -> Result<(), CacheError> {
    let mut conn = db.conn();
    let tx = conn.transaction().map_err(|e| CacheError::Write {
        table: UserCounts::TABLE,
        op: "persist_users",
        source: e,
    })?;

    for view in views {
        let id = view.id().to_string();
        store::put_row(&tx, UserDetails::TABLE, &id, &view.details)?;
        store::put_row(&tx, UserCounts::TABLE, &id, &view.counts)?;
        store::put_row(&tx, Relationship::TABLE, &id, &view.relationship)?;
        store::put_row(&tx, UserTagsRecord::TABLE, &id, &view.tags)?;
    }

    tx.commit().map_err(|e| CacheError::Write {
        table: UserCounts::TABLE,
        op: "persist_users",
        source: e,
    })
}

/// Persist fetched posts. Embedded author details fill holes in the user
/// table but never overwrite an existing author row.
pub fn persist_posts(db: &CacheDb, views: &[PostView]) -> Result<(), CacheError> {
    let mut conn = db.conn();
    let tx = conn.transaction().map_err(|e| CacheError::Write {
        table: PostDetails::TABLE,
        op: "persist_posts",
        source: e,
    })?;

    for view in views {
        let key = view.key().to_string();
        store::put_row(&tx, PostDetails::TABLE, &key, &view.details)?;
        store::put_row(&tx, PostCounts::TABLE, &key, &view.counts)?;
        store::put_row(&tx, PostTagsRecord::TABLE, &key, &view.tags)?;

        if let Some(author) = &view.author {
            store::put_row_if_absent(&tx, UserDetails::TABLE, &author.id, author)?;
        }
    }

    tx.commit().map_err(|e| CacheError::Write {
        table: PostDetails::TABLE,
        op: "persist_posts",
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::RecordStore;
    use crate::nexus::types::PostKind;

    fn scratch_db() -> (tempfile::TempDir, CacheDb) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = CacheDb::open_at(&dir.path().join("cache.db")).expect("open");
        (dir, db)
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn uncached_stream_reads_as_none() {
        let (_dir, db) = scratch_db();
        let store = StreamStore::new(&db, USER_STREAMS);

        assert!(store.get("followers:alice").unwrap().is_none());
        assert!(!store.exists("followers:alice").unwrap());
    }

    #[test]
    fn chunks_append_in_order() {
        let (_dir, db) = scratch_db();
        let store = StreamStore::new(&db, USER_STREAMS);

        store
            .replace("followers:alice", &ids(&["u1", "u2"]))
            .unwrap();
        store
            .persist_new_chunk("followers:alice", &ids(&["u3", "u4"]))
            .unwrap();

        assert_eq!(
            store.get("followers:alice").unwrap().unwrap(),
            ids(&["u1", "u2", "u3", "u4"])
        );
        assert_eq!(store.slice("followers:alice", 1, 2).unwrap(), ids(&["u2", "u3"]));
        assert_eq!(store.len("followers:alice").unwrap(), 4);
    }

    #[test]
    fn duplicate_chunk_does_not_grow_the_stream() {
        let (_dir, db) = scratch_db();
        let store = StreamStore::new(&db, USER_STREAMS);

        store.replace("friends:alice", &ids(&["u1", "u2"])).unwrap();
        store
            .persist_new_chunk("friends:alice", &ids(&["u1", "u2"]))
            .unwrap();

        assert_eq!(store.len("friends:alice").unwrap(), 2);
    }

    #[test]
    fn post_streams_cache_under_composite_keys() {
        use crate::nexus::types::{PostStreamId, PostStreamSource, Reach, Timeframe};

        let (_dir, db) = scratch_db();
        let stream = PostStreamId {
            source: PostStreamSource::Following,
            timeframe: Timeframe::AllTime,
            reach: Reach::All,
        };
        assert_eq!(stream.key(), "following:all_time:all");

        let store = StreamStore::new(&db, POST_STREAMS);
        store
            .replace(&stream.key(), &ids(&["a:p1", "b:p2"]))
            .unwrap();
        store
            .persist_new_chunk(&stream.key(), &ids(&["c:p3"]))
            .unwrap();

        assert_eq!(
            store.get(&stream.key()).unwrap().unwrap(),
            ids(&["a:p1", "b:p2", "c:p3"])
        );
    }

    #[test]
    fn clear_forgets_only_the_named_stream() {
        let (_dir, db) = scratch_db();
        let store = StreamStore::new(&db, USER_STREAMS);

        store.replace("followers:alice", &ids(&["u1"])).unwrap();
        store.replace("followers:bob", &ids(&["u2"])).unwrap();
        store.clear("followers:alice").unwrap();

        assert!(store.get("followers:alice").unwrap().is_none());
        assert_eq!(store.get("followers:bob").unwrap().unwrap(), ids(&["u2"]));
    }

    fn user_view(id: &str) -> UserView {
        UserView {
            details: UserDetails {
                id: id.to_string(),
                name: id.to_uppercase(),
                bio: None,
                image: None,
                links: Vec::new(),
                status: None,
                indexed_at: 1,
            },
            counts: UserCounts {
                followers: 3,
                ..Default::default()
            },
            relationship: Relationship::default(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn persist_users_writes_every_sub_record() {
        let (_dir, db) = scratch_db();
        persist_users(&db, &[user_view("alice")]).unwrap();

        let details = RecordStore::<UserDetails>::new(&db);
        assert_eq!(details.find_by_id("alice").unwrap().unwrap().name, "ALICE");

        let counts = crate::cache::store::TupleStore::<UserCounts>::new(&db);
        assert_eq!(counts.find_by_id("alice").unwrap().unwrap().followers, 3);

        let rels = crate::cache::store::TupleStore::<Relationship>::new(&db);
        assert!(rels.find_by_id("alice").unwrap().is_some());
    }

    #[test]
    fn persist_posts_backfills_but_never_overwrites_authors() {
        let (_dir, db) = scratch_db();
        let details = RecordStore::<UserDetails>::new(&db);
        details
            .upsert(&UserDetails {
                id: "alice".to_string(),
                name: "Existing".to_string(),
                bio: None,
                image: None,
                links: Vec::new(),
                status: None,
                indexed_at: 1,
            })
            .unwrap();

        let view = PostView {
            details: PostDetails {
                id: "alice:p1".to_string(),
                author: "alice".to_string(),
                content: "hello".to_string(),
                kind: PostKind::Short,
                uri: "pubky://alice/pub/skiff.app/posts/p1".to_string(),
                indexed_at: 2,
                attachments: Vec::new(),
            },
            counts: PostCounts::default(),
            tags: Vec::new(),
            author: Some(UserDetails {
                id: "alice".to_string(),
                name: "FromPost".to_string(),
                bio: None,
                image: None,
                links: Vec::new(),
                status: None,
                indexed_at: 2,
            }),
        };
        persist_posts(&db, &[view]).unwrap();

        // author row untouched, post rows written
        assert_eq!(details.find_by_id("alice").unwrap().unwrap().name, "Existing");
        let posts = RecordStore::<PostDetails>::new(&db);
        assert!(posts.find_by_id("alice:p1").unwrap().is_some());
    }
}
