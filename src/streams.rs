// SPDX-License-Identifier: MPL-2.0

use crate::cache::store::RecordStore;
use crate::cache::{CacheDb, CacheError, StreamStore, USER_STREAMS, streams as stream_cache};
use crate::nexus::types::{Pubky, UserDetails, UserStreamId};
use crate::nexus::{NexusApi, NexusError};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Nexus(#[from] NexusError),
}

/// Result of one pagination step.
///
/// `next_skip` is the pagination signal: `Some(n)` means the page came from
/// the network and the caller's remote cursor advances to `n`; `None` means
/// either the cache fully satisfied the request or the stream ended, and
/// the caller must not advance its cursor. The cache may hold more or fewer
/// items than one network page, so the two cursors cannot be conflated.
#[derive(Debug, Clone)]
pub struct StreamSlice {
    pub ids: Vec<Pubky>,
    pub cache_miss_ids: Vec<Pubky>,
    pub next_skip: Option<usize>,
}

/// Cache-first pagination over user streams (following, followers, ...).
pub struct UserStreams<S: NexusApi> {
    db: CacheDb,
    source: Arc<S>,
}

impl<S: NexusApi> UserStreams<S> {
    pub fn new(db: &CacheDb, source: Arc<S>) -> Self {
        Self {
            db: db.clone(),
            source,
        }
    }

    pub async fn get_or_fetch_slice(
        &self,
        stream: &UserStreamId,
        viewer: &Pubky,
        skip: usize,
        limit: usize,
    ) -> Result<StreamSlice, StreamError> {
        let store = StreamStore::new(&self.db, USER_STREAMS);
        let key = stream.key();

        let cached = store.get(&key)?;
        if let Some(cached) = &cached
            && cached.len() >= skip + limit
        {
            debug!(stream = %key, skip, limit, "stream slice served from cache");
            return Ok(StreamSlice {
                ids: cached[skip..skip + limit].to_vec(),
                cache_miss_ids: Vec::new(),
                next_skip: None,
            });
        }

        let page = self
            .source
            .user_stream_page(stream, viewer, skip, limit)
            .await?;
        if page.is_empty() {
            debug!(stream = %key, skip, "end of stream");
            return Ok(StreamSlice {
                ids: Vec::new(),
                cache_miss_ids: Vec::new(),
                next_skip: None,
            });
        }

        let ids: Vec<Pubky> = page.iter().map(|view| view.id().to_string()).collect();

        stream_cache::persist_users(&self.db, &page)?;
        if cached.is_some() {
            store.persist_new_chunk(&key, &ids)?;
        } else {
            store.replace(&key, &ids)?;
        }

        // Diff against the entity table, not the stream table: with
        // interleaved fetches an id can be in a stream before its record
        // lands.
        let details = RecordStore::<UserDetails>::new(&self.db);
        let existing: HashSet<String> = details.existing_ids(&ids)?.into_iter().collect();
        let cache_miss_ids: Vec<Pubky> = ids
            .iter()
            .filter(|id| !existing.contains(*id))
            .cloned()
            .collect();

        debug!(
            stream = %key,
            fetched = page.len(),
            misses = cache_miss_ids.len(),
            "stream page fetched and persisted"
        );

        Ok(StreamSlice {
            ids,
            cache_miss_ids,
            next_skip: Some(skip + page.len()),
        })
    }

    /// Out-of-band backfill for ids referenced by a stream but missing from
    /// the entity table (render-time cache misses).
    pub async fn fetch_missing_from_remote(
        &self,
        ids: &[Pubky],
        viewer: &Pubky,
    ) -> Result<(), StreamError> {
        let mut seen = HashSet::new();
        let unique: Vec<Pubky> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        if unique.is_empty() {
            return Ok(());
        }

        let views = self.source.users_by_ids(&unique, viewer).await?;
        debug!(requested = unique.len(), returned = views.len(), "backfilled missing users");
        stream_cache::persist_users(&self.db, &views)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nexus::types::{
        PostView, Relationship, UserCounts, UserStreamSource, UserView,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scratch_db() -> (tempfile::TempDir, CacheDb) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = CacheDb::open_at(&dir.path().join("cache.db")).expect("open");
        (dir, db)
    }

    fn user_view(id: &str) -> UserView {
        UserView {
            details: UserDetails {
                id: id.to_string(),
                name: id.to_string(),
                bio: None,
                image: None,
                links: Vec::new(),
                status: None,
                indexed_at: 1,
            },
            counts: UserCounts::default(),
            relationship: Relationship::default(),
            tags: Vec::new(),
        }
    }

    struct FakeNexus {
        pages: Mutex<Vec<Vec<UserView>>>,
        stream_calls: AtomicUsize,
        by_ids_calls: AtomicUsize,
    }

    impl FakeNexus {
        fn with_pages(pages: Vec<Vec<UserView>>) -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(pages),
                stream_calls: AtomicUsize::new(0),
                by_ids_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl NexusApi for FakeNexus {
        async fn user_stream_page(
            &self,
            _stream: &UserStreamId,
            _viewer: &Pubky,
            _skip: usize,
            _limit: usize,
        ) -> Result<Vec<UserView>, NexusError> {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(pages.remove(0))
            }
        }

        async fn users_by_ids(
            &self,
            ids: &[Pubky],
            _viewer: &Pubky,
        ) -> Result<Vec<UserView>, NexusError> {
            self.by_ids_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ids.iter().map(|id| user_view(id)).collect())
        }

        async fn posts_by_ids(
            &self,
            _keys: &[String],
            _viewer: &Pubky,
        ) -> Result<Vec<PostView>, NexusError> {
            Ok(Vec::new())
        }
    }

    fn followers_of_alice() -> UserStreamId {
        UserStreamId::new(UserStreamSource::Followers, "alice")
    }

    #[tokio::test]
    async fn cache_hit_does_not_touch_the_remote_or_the_cursor() {
        let (_dir, db) = scratch_db();
        let cached: Vec<String> = (0..50).map(|i| format!("u{i}")).collect();
        StreamStore::new(&db, USER_STREAMS)
            .replace(&followers_of_alice().key(), &cached)
            .unwrap();

        let nexus = FakeNexus::with_pages(vec![]);
        let streams = UserStreams::new(&db, nexus.clone());

        let slice = streams
            .get_or_fetch_slice(&followers_of_alice(), &"viewer".to_string(), 0, 20)
            .await
            .unwrap();

        assert_eq!(slice.ids, cached[..20].to_vec());
        assert!(slice.cache_miss_ids.is_empty());
        assert!(slice.next_skip.is_none());
        assert_eq!(nexus.stream_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cache_miss_fetches_persists_and_advances_the_cursor() {
        let (_dir, db) = scratch_db();
        let nexus = FakeNexus::with_pages(vec![
            vec![user_view("u1"), user_view("u2")],
            vec![user_view("u3")],
        ]);
        let streams = UserStreams::new(&db, nexus.clone());
        let viewer = "viewer".to_string();

        let first = streams
            .get_or_fetch_slice(&followers_of_alice(), &viewer, 0, 2)
            .await
            .unwrap();
        assert_eq!(first.ids, vec!["u1".to_string(), "u2".to_string()]);
        assert_eq!(first.next_skip, Some(2));
        // the page was persisted before the miss diff ran
        assert!(first.cache_miss_ids.is_empty());

        let second = streams
            .get_or_fetch_slice(&followers_of_alice(), &viewer, 2, 2)
            .await
            .unwrap();
        assert_eq!(second.ids, vec!["u3".to_string()]);
        assert_eq!(second.next_skip, Some(3));

        // page 2 appended after page 1, original order kept
        let stream = StreamStore::new(&db, USER_STREAMS)
            .get(&followers_of_alice().key())
            .unwrap()
            .unwrap();
        assert_eq!(
            stream,
            vec!["u1".to_string(), "u2".to_string(), "u3".to_string()]
        );

        // entity records landed too
        let details = RecordStore::<UserDetails>::new(&db);
        assert!(details.find_by_id("u3").unwrap().is_some());
    }

    #[tokio::test]
    async fn empty_remote_page_signals_end_of_stream() {
        let (_dir, db) = scratch_db();
        let nexus = FakeNexus::with_pages(vec![]);
        let streams = UserStreams::new(&db, nexus);

        let slice = streams
            .get_or_fetch_slice(&followers_of_alice(), &"viewer".to_string(), 0, 20)
            .await
            .unwrap();

        assert!(slice.ids.is_empty());
        assert!(slice.cache_miss_ids.is_empty());
        assert!(slice.next_skip.is_none());
    }

    #[tokio::test]
    async fn backfill_dedupes_and_persists() {
        let (_dir, db) = scratch_db();
        let nexus = FakeNexus::with_pages(vec![]);
        let streams = UserStreams::new(&db, nexus.clone());

        let ids = vec!["u1".to_string(), "u1".to_string(), "u2".to_string()];
        streams
            .fetch_missing_from_remote(&ids, &"viewer".to_string())
            .await
            .unwrap();

        assert_eq!(nexus.by_ids_calls.load(Ordering::SeqCst), 1);
        let details = RecordStore::<UserDetails>::new(&db);
        assert!(details.find_by_id("u1").unwrap().is_some());
        assert!(details.find_by_id("u2").unwrap().is_some());
    }
}
