// SPDX-License-Identifier: MPL-2.0

use crate::cache::store::{Record, RecordStore};
use crate::cache::{CacheDb, CacheError};
use crate::homeserver::{Homeserver, HomeserverError, settings_path};
use crate::nexus::types::Pubky;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Homeserver(#[from] HomeserverError),
    #[error("settings serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-viewer preferences, persisted locally and mirrored to the
/// homeserver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsRecord {
    pub id: Pubky,
    #[serde(default)]
    pub show_nsfw: bool,
    #[serde(default)]
    pub muted_words: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl SettingsRecord {
    pub fn new(viewer: &str) -> Self {
        Self {
            id: viewer.to_string(),
            show_nsfw: false,
            muted_words: Vec::new(),
            language: None,
        }
    }
}

impl Record for SettingsRecord {
    const TABLE: &'static str = "settings";
    fn id(&self) -> &str {
        &self.id
    }
}

/// Commits cross a network boundary, so no storage transaction covers
/// them. The owned lock serializes committers instead: each one queues,
/// re-reads the latest record and applies its patch on top, so two
/// near-simultaneous commits cannot capture the same base state.
pub struct SettingsSync<H: Homeserver> {
    db: CacheDb,
    homeserver: Arc<H>,
    viewer: Pubky,
    commit_lock: Mutex<()>,
}

impl<H: Homeserver> SettingsSync<H> {
    pub fn new(db: &CacheDb, homeserver: Arc<H>, viewer: &Pubky) -> Self {
        Self {
            db: db.clone(),
            homeserver,
            viewer: viewer.clone(),
            commit_lock: Mutex::new(()),
        }
    }

    /// Latest local record, or defaults when none has been saved yet.
    pub fn load(&self) -> Result<SettingsRecord, CacheError> {
        let store = RecordStore::<SettingsRecord>::new(&self.db);
        Ok(store
            .find_by_id(&self.viewer)?
            .unwrap_or_else(|| SettingsRecord::new(&self.viewer)))
    }

    /// Apply a patch to the latest settings and push the result to the
    /// homeserver. Returns the committed record.
    pub async fn commit(
        &self,
        patch: impl FnOnce(&mut SettingsRecord),
    ) -> Result<SettingsRecord, SettingsError> {
        let _guard = self.commit_lock.lock().await;

        let mut current = self.load()?;
        patch(&mut current);

        RecordStore::<SettingsRecord>::new(&self.db).upsert(&current)?;
        self.homeserver
            .put(
                &settings_path(&self.viewer),
                serde_json::to_value(&current)?,
            )
            .await?;

        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    fn scratch_db() -> (tempfile::TempDir, CacheDb) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = CacheDb::open_at(&dir.path().join("cache.db")).expect("open");
        (dir, db)
    }

    #[derive(Default)]
    struct RecordingHomeserver {
        puts: StdMutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl Homeserver for RecordingHomeserver {
        async fn put(
            &self,
            _path: &str,
            body: serde_json::Value,
        ) -> Result<(), HomeserverError> {
            // yield so a concurrent committer gets a chance to interleave
            tokio::task::yield_now().await;
            self.puts.lock().unwrap().push(body);
            Ok(())
        }

        async fn delete(&self, _path: &str) -> Result<(), HomeserverError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn commit_persists_locally_and_pushes() {
        let (_dir, db) = scratch_db();
        let homeserver = Arc::new(RecordingHomeserver::default());
        let settings = SettingsSync::new(&db, homeserver.clone(), &"u1".to_string());

        let committed = settings.commit(|s| s.show_nsfw = true).await.unwrap();
        assert!(committed.show_nsfw);
        assert!(settings.load().unwrap().show_nsfw);
        assert_eq!(homeserver.puts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_commits_do_not_lose_updates() {
        let (_dir, db) = scratch_db();
        let homeserver = Arc::new(RecordingHomeserver::default());
        let settings = Arc::new(SettingsSync::new(&db, homeserver, &"u1".to_string()));

        let a = {
            let settings = settings.clone();
            tokio::spawn(async move {
                settings.commit(|s| s.show_nsfw = true).await.unwrap();
            })
        };
        let b = {
            let settings = settings.clone();
            tokio::spawn(async move {
                settings
                    .commit(|s| s.muted_words.push("spoilers".to_string()))
                    .await
                    .unwrap();
            })
        };
        a.await.unwrap();
        b.await.unwrap();

        // whichever committed second saw the first commit's write
        let latest = settings.load().unwrap();
        assert!(latest.show_nsfw);
        assert_eq!(latest.muted_words, vec!["spoilers".to_string()]);
    }
}
