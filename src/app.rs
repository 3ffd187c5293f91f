// SPDX-License-Identifier: MPL-2.0

use crate::cache::{CacheDb, CacheError};
use crate::config::{DEFAULT_NEXUS, POST_TTL_MS, STREAM_PAGE_SIZE, USER_TTL_MS};
use crate::homeserver::{
    Homeserver, HomeserverClient, HomeserverError, follow_path, tag_path,
};
use crate::nexus::types::{Pubky, UserStreamId};
use crate::nexus::{NexusClient, NexusError};
use crate::refresh::{RefreshError, Refresher};
use crate::settings::{SettingsError, SettingsSync};
use crate::social::{
    BookmarkAction, BookmarkService, FollowService, SocialError, TagService, TagTarget,
};
use crate::streams::{StreamError, StreamSlice, UserStreams};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Nexus(#[from] NexusError),
    #[error(transparent)]
    Homeserver(#[from] HomeserverError),
    #[error(transparent)]
    Social(#[from] SocialError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

pub struct AppConfig {
    /// Current user identity. Opaque to the engine.
    pub viewer: Pubky,
    pub nexus_base: String,
    pub homeserver_base: String,
    /// Explicit cache file location; defaults to the per-viewer data dir.
    pub cache_path: Option<std::path::PathBuf>,
}

impl AppConfig {
    pub fn new(viewer: impl Into<Pubky>, homeserver_base: impl Into<String>) -> Self {
        Self {
            viewer: viewer.into(),
            nexus_base: DEFAULT_NEXUS.to_string(),
            homeserver_base: homeserver_base.into(),
            cache_path: None,
        }
    }
}

/// Engine facade handed to the UI layer. Owns the cache database, both
/// remote clients and the services composed over them.
pub struct App {
    viewer: Pubky,
    db: CacheDb,
    homeserver: Arc<HomeserverClient>,
    streams: UserStreams<NexusClient>,
    refresher: Refresher<NexusClient>,
    follows: FollowService,
    tags: TagService,
    bookmarks: BookmarkService<HomeserverClient>,
    settings: SettingsSync<HomeserverClient>,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self, AppError> {
        let db = match &config.cache_path {
            Some(path) => CacheDb::open_at(path)?,
            None => CacheDb::open(&config.viewer)?,
        };

        let nexus = Arc::new(NexusClient::new(&config.nexus_base)?);
        let homeserver = Arc::new(HomeserverClient::new(&config.homeserver_base)?);

        Ok(Self {
            viewer: config.viewer.clone(),
            streams: UserStreams::new(&db, nexus.clone()),
            refresher: Refresher::new(&db, nexus),
            follows: FollowService::new(&db),
            tags: TagService::new(&db),
            bookmarks: BookmarkService::new(&db, homeserver.clone()),
            settings: SettingsSync::new(&db, homeserver.clone(), &config.viewer),
            homeserver,
            db,
        })
    }

    pub fn viewer(&self) -> &Pubky {
        &self.viewer
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    // -- reads -----------------------------------------------------------

    pub async fn stream_slice(
        &self,
        stream: &UserStreamId,
        skip: usize,
        limit: usize,
    ) -> Result<StreamSlice, AppError> {
        Ok(self
            .streams
            .get_or_fetch_slice(stream, &self.viewer, skip, limit)
            .await?)
    }

    /// One default-sized pagination step.
    pub async fn stream_page(
        &self,
        stream: &UserStreamId,
        skip: usize,
    ) -> Result<StreamSlice, AppError> {
        self.stream_slice(stream, skip, STREAM_PAGE_SIZE).await
    }

    pub async fn backfill_users(&self, ids: &[Pubky]) -> Result<(), AppError> {
        Ok(self.streams.fetch_missing_from_remote(ids, &self.viewer).await?)
    }

    pub fn find_stale_users(&self, ids: &[Pubky]) -> Result<Vec<Pubky>, AppError> {
        Ok(self.refresher.find_stale_user_ids(ids, USER_TTL_MS)?)
    }

    pub fn find_stale_posts(&self, keys: &[String]) -> Result<Vec<String>, AppError> {
        Ok(self.refresher.find_stale_post_ids(keys, POST_TTL_MS)?)
    }

    pub async fn refresh_users(&self, ids: &[Pubky]) -> Result<(), AppError> {
        Ok(self.refresher.force_refresh_users(ids, &self.viewer).await?)
    }

    pub async fn refresh_posts(&self, keys: &[String]) -> Result<(), AppError> {
        Ok(self.refresher.force_refresh_posts(keys, &self.viewer).await?)
    }

    // -- writes ----------------------------------------------------------
    //
    // Follow and tag mutations are local-first: the transactional local
    // write lands, then the matching record goes to the homeserver. A
    // failed remote write leaves the local state in place; the caller
    // retries against an idempotent endpoint.

    pub async fn follow(&self, followee: &Pubky) -> Result<(), AppError> {
        self.follows.create(&self.viewer, followee)?;
        self.homeserver
            .put(
                &follow_path(followee),
                json!({ "created_at": CacheDb::now_ms() }),
            )
            .await?;
        Ok(())
    }

    pub async fn unfollow(&self, followee: &Pubky) -> Result<(), AppError> {
        self.follows.delete(&self.viewer, followee)?;
        self.homeserver.delete(&follow_path(followee)).await?;
        Ok(())
    }

    pub async fn tag(&self, target: &TagTarget, label: &str) -> Result<(), AppError> {
        self.tags.create(&self.viewer, target, label)?;
        self.homeserver
            .put(
                &tag_path(&target.key(), label),
                json!({
                    "uri": target.uri(),
                    "label": label,
                    "created_at": CacheDb::now_ms(),
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn untag(&self, target: &TagTarget, label: &str) -> Result<(), AppError> {
        self.tags.delete(&self.viewer, target, label)?;
        self.homeserver
            .delete(&tag_path(&target.key(), label))
            .await?;
        Ok(())
    }

    pub async fn bookmark(&self, post_author: &Pubky, post_id: &str) -> Result<(), AppError> {
        Ok(self
            .bookmarks
            .persist(BookmarkAction::Add, &self.viewer, post_author, post_id)
            .await?)
    }

    pub async fn unbookmark(&self, post_author: &Pubky, post_id: &str) -> Result<(), AppError> {
        Ok(self
            .bookmarks
            .persist(BookmarkAction::Remove, &self.viewer, post_author, post_id)
            .await?)
    }

    pub fn is_bookmarked(&self, post_author: &Pubky, post_id: &str) -> Result<bool, AppError> {
        Ok(self.bookmarks.is_bookmarked(post_author, post_id)?)
    }

    pub fn settings(&self) -> &SettingsSync<HomeserverClient> {
        &self.settings
    }
}
