// SPDX-License-Identifier: MPL-2.0

use crate::cache::store::{self, Record, TableData};
use crate::cache::{CacheDb, CacheError};
use crate::homeserver::{Homeserver, bookmark_path};
use crate::nexus::types::{Pubky, UserCounts, post_key};
use crate::social::SocialError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkRecord {
    /// Composite key of the bookmarked post.
    pub id: String,
    pub created_at: i64,
}

impl Record for BookmarkRecord {
    const TABLE: &'static str = "bookmarks";
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookmarkAction {
    Add,
    Remove,
}

/// Bookmarks map to a single idempotent PUT/DELETE on the homeserver, so
/// the local and remote writes run in parallel: neither depends on the
/// other's result. When one side fails the whole operation rejects and the
/// surviving write stands; there is no compensation.
pub struct BookmarkService<H: Homeserver> {
    db: CacheDb,
    homeserver: Arc<H>,
}

impl<H: Homeserver> BookmarkService<H> {
    pub fn new(db: &CacheDb, homeserver: Arc<H>) -> Self {
        Self {
            db: db.clone(),
            homeserver,
        }
    }

    pub async fn persist(
        &self,
        action: BookmarkAction,
        viewer: &Pubky,
        post_author: &Pubky,
        post_id: &str,
    ) -> Result<(), SocialError> {
        let key = post_key(post_author, post_id);
        let path = bookmark_path(&key);
        let uri = format!("pubky://{post_author}/pub/skiff.app/posts/{post_id}");

        let local = async {
            match action {
                BookmarkAction::Add => self.write_local(viewer, &key),
                BookmarkAction::Remove => self.remove_local(viewer, &key),
            }
        };

        let remote = async {
            match action {
                BookmarkAction::Add => self
                    .homeserver
                    .put(&path, json!({ "uri": uri, "created_at": CacheDb::now_ms() }))
                    .await
                    .map_err(SocialError::from),
                BookmarkAction::Remove => self
                    .homeserver
                    .delete(&path)
                    .await
                    .map_err(SocialError::from),
            }
        };

        tokio::try_join!(local, remote)?;
        Ok(())
    }

    pub fn is_bookmarked(&self, post_author: &Pubky, post_id: &str) -> Result<bool, SocialError> {
        let key = post_key(post_author, post_id);
        let conn = self.db.conn();
        Ok(
            store::get_row::<BookmarkRecord>(&conn, BookmarkRecord::TABLE, &key)
                .map_err(SocialError::storage("bookmark lookup"))?
                .is_some(),
        )
    }

    fn write_local(&self, viewer: &Pubky, key: &str) -> Result<(), SocialError> {
        let wrap = SocialError::storage("bookmark");
        let mut conn = self.db.conn();
        let tx = conn.transaction().map_err(CacheError::from).map_err(wrap)?;

        let existing = store::get_row::<BookmarkRecord>(&tx, BookmarkRecord::TABLE, key)
            .map_err(SocialError::storage("bookmark"))?;
        if existing.is_none() {
            let record = BookmarkRecord {
                id: key.to_string(),
                created_at: CacheDb::now_ms(),
            };
            store::put_row(&tx, BookmarkRecord::TABLE, key, &record)
                .map_err(SocialError::storage("bookmark"))?;
            bump_bookmark_count(&tx, viewer, 1).map_err(SocialError::storage("bookmark"))?;
        }

        tx.commit()
            .map_err(CacheError::from)
            .map_err(SocialError::storage("bookmark"))
    }

    fn remove_local(&self, viewer: &Pubky, key: &str) -> Result<(), SocialError> {
        let wrap = SocialError::storage("unbookmark");
        let mut conn = self.db.conn();
        let tx = conn.transaction().map_err(CacheError::from).map_err(wrap)?;

        let removed = store::delete_row(&tx, BookmarkRecord::TABLE, key)
            .map_err(SocialError::storage("unbookmark"))?;
        if removed == 1 {
            bump_bookmark_count(&tx, viewer, -1).map_err(SocialError::storage("unbookmark"))?;
        }

        tx.commit()
            .map_err(CacheError::from)
            .map_err(SocialError::storage("unbookmark"))
    }
}

fn bump_bookmark_count(
    conn: &rusqlite::Connection,
    viewer: &str,
    delta: i32,
) -> Result<(), CacheError> {
    let mut counts =
        store::get_row::<UserCounts>(conn, UserCounts::TABLE, viewer)?.unwrap_or_default();
    if delta > 0 {
        counts.bookmarks += delta as u32;
    } else {
        counts.bookmarks = counts.bookmarks.saturating_sub(delta.unsigned_abs());
    }
    store::put_row(conn, UserCounts::TABLE, viewer, &counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homeserver::HomeserverError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn scratch_db() -> (tempfile::TempDir, CacheDb) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = CacheDb::open_at(&dir.path().join("cache.db")).expect("open");
        (dir, db)
    }

    #[derive(Default)]
    struct FakeHomeserver {
        fail: bool,
        puts: Mutex<Vec<String>>,
        deletes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Homeserver for FakeHomeserver {
        async fn put(
            &self,
            path: &str,
            _body: serde_json::Value,
        ) -> Result<(), HomeserverError> {
            if self.fail {
                return Err(HomeserverError::Status(503));
            }
            self.puts.lock().unwrap().push(path.to_string());
            Ok(())
        }

        async fn delete(&self, path: &str) -> Result<(), HomeserverError> {
            if self.fail {
                return Err(HomeserverError::Status(503));
            }
            self.deletes.lock().unwrap().push(path.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn add_writes_both_stores_and_counts_once() {
        let (_dir, db) = scratch_db();
        let homeserver = Arc::new(FakeHomeserver::default());
        let bookmarks = BookmarkService::new(&db, homeserver.clone());
        let viewer = "u1".to_string();
        let author = "a1".to_string();

        bookmarks
            .persist(BookmarkAction::Add, &viewer, &author, "p1")
            .await
            .unwrap();
        bookmarks
            .persist(BookmarkAction::Add, &viewer, &author, "p1")
            .await
            .unwrap();

        assert!(bookmarks.is_bookmarked(&author, "p1").unwrap());
        let conn = db.conn();
        let counts =
            store::get_row::<UserCounts>(&conn, UserCounts::TABLE, "u1")
                .unwrap()
                .unwrap();
        assert_eq!(counts.bookmarks, 1);
        // the homeserver PUT is idempotent, repeating it is fine
        assert_eq!(homeserver.puts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn remote_failure_rejects_but_keeps_the_local_write() {
        let (_dir, db) = scratch_db();
        let homeserver = Arc::new(FakeHomeserver {
            fail: true,
            ..Default::default()
        });
        let bookmarks = BookmarkService::new(&db, homeserver);
        let viewer = "u1".to_string();
        let author = "a1".to_string();

        let result = bookmarks
            .persist(BookmarkAction::Add, &viewer, &author, "p1")
            .await;
        assert!(matches!(result, Err(SocialError::Homeserver(_))));

        // no rollback of the side that succeeded
        assert!(bookmarks.is_bookmarked(&author, "p1").unwrap());
    }

    #[tokio::test]
    async fn remove_undoes_the_local_record_and_count() {
        let (_dir, db) = scratch_db();
        let homeserver = Arc::new(FakeHomeserver::default());
        let bookmarks = BookmarkService::new(&db, homeserver.clone());
        let viewer = "u1".to_string();
        let author = "a1".to_string();

        bookmarks
            .persist(BookmarkAction::Add, &viewer, &author, "p1")
            .await
            .unwrap();
        bookmarks
            .persist(BookmarkAction::Remove, &viewer, &author, "p1")
            .await
            .unwrap();

        assert!(!bookmarks.is_bookmarked(&author, "p1").unwrap());
        let conn = db.conn();
        let counts =
            store::get_row::<UserCounts>(&conn, UserCounts::TABLE, "u1")
                .unwrap()
                .unwrap();
        assert_eq!(counts.bookmarks, 0);
        assert_eq!(homeserver.deletes.lock().unwrap().len(), 1);
    }
}
