// SPDX-License-Identifier: MPL-2.0

use crate::cache::store::RecordStore;
use crate::cache::{CacheDb, CacheError, POST_TTL, TtlStore, USER_TTL, streams as stream_cache};
use crate::nexus::types::{Pubky, UserDetails};
use crate::nexus::{NexusApi, NexusError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Nexus(#[from] NexusError),
}

/// Staleness queries and forced re-fetch for entities that are already
/// cached but have aged out. Runs beside the pagination path, never inside
/// it.
pub struct Refresher<S: NexusApi> {
    db: CacheDb,
    source: Arc<S>,
}

impl<S: NexusApi> Refresher<S> {
    pub fn new(db: &CacheDb, source: Arc<S>) -> Self {
        Self {
            db: db.clone(),
            source,
        }
    }

    pub fn find_stale_user_ids(&self, ids: &[Pubky], ttl_ms: i64) -> Result<Vec<Pubky>, CacheError> {
        self.stale_ids(USER_TTL, ids, ttl_ms)
    }

    pub fn find_stale_post_ids(
        &self,
        keys: &[String],
        ttl_ms: i64,
    ) -> Result<Vec<String>, CacheError> {
        self.stale_ids(POST_TTL, keys, ttl_ms)
    }

    /// An id is stale when its stamp is missing or older than `ttl_ms`.
    /// A read failure here is logged and re-thrown: silent staleness is
    /// worse than a visible error.
    fn stale_ids(
        &self,
        table: &'static str,
        ids: &[String],
        ttl_ms: i64,
    ) -> Result<Vec<String>, CacheError> {
        let unique = dedupe(ids);
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let stamps = TtlStore::new(&self.db, table)
            .find_by_ids(&unique)
            .inspect_err(|e| error!(table, error = %e, "staleness read failed"))?;

        let by_id: HashMap<String, i64> = stamps.into_iter().collect();
        let now = CacheDb::now_ms();

        Ok(unique
            .into_iter()
            .filter(|id| match by_id.get(id) {
                Some(last_updated_at) => now - last_updated_at > ttl_ms,
                None => true,
            })
            .collect())
    }

    /// Re-fetch users in one batch and restamp only the ids the remote
    /// actually returned. A silently dropped id keeps its old stamp, stays
    /// stale and will be retried.
    pub async fn force_refresh_users(
        &self,
        ids: &[Pubky],
        viewer: &Pubky,
    ) -> Result<(), RefreshError> {
        let unique = dedupe(ids);
        if unique.is_empty() {
            return Ok(());
        }

        let views = self.source.users_by_ids(&unique, viewer).await?;
        stream_cache::persist_users(&self.db, &views)?;

        let returned: Vec<String> = views.iter().map(|view| view.id().to_string()).collect();
        TtlStore::new(&self.db, USER_TTL).stamp_all(&returned, CacheDb::now_ms())?;

        info!(requested = unique.len(), refreshed = returned.len(), "users refreshed");
        Ok(())
    }

    /// Re-fetch posts in one batch. Authors missing from the local user
    /// table are backfilled as a convenience, but their TTL stamps are not
    /// touched: only a user-addressed fetch freshens a user.
    pub async fn force_refresh_posts(
        &self,
        keys: &[String],
        viewer: &Pubky,
    ) -> Result<(), RefreshError> {
        let unique = dedupe(keys);
        if unique.is_empty() {
            return Ok(());
        }

        let views = self.source.posts_by_ids(&unique, viewer).await?;
        stream_cache::persist_posts(&self.db, &views)?;

        let returned: Vec<String> = views.iter().map(|view| view.key().to_string()).collect();
        TtlStore::new(&self.db, POST_TTL).stamp_all(&returned, CacheDb::now_ms())?;

        let authors: Vec<Pubky> = dedupe(
            &views
                .iter()
                .map(|view| view.details.author.clone())
                .collect::<Vec<_>>(),
        );
        let details = RecordStore::<UserDetails>::new(&self.db);
        let existing: HashSet<String> = details.existing_ids(&authors)?.into_iter().collect();
        let missing: Vec<Pubky> = authors
            .into_iter()
            .filter(|id| !existing.contains(id))
            .collect();

        if !missing.is_empty() {
            let author_views = self.source.users_by_ids(&missing, viewer).await?;
            stream_cache::persist_users(&self.db, &author_views)?;
        }

        info!(requested = unique.len(), refreshed = returned.len(), "posts refreshed");
        Ok(())
    }
}

fn dedupe(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}
