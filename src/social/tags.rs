// SPDX-License-Identifier: MPL-2.0

use crate::cache::store::{self, PostTagsRecord, TableData, UserTagsRecord};
use crate::cache::{CacheDb, CacheError};
use crate::nexus::types::{PostCounts, Pubky, TagView, post_key};
use crate::social::SocialError;
use crate::social::follow::adjust_counts;
use rusqlite::Connection;

/// What a label is being applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagTarget {
    User(Pubky),
    Post { author: Pubky, id: String },
}

impl TagTarget {
    pub fn key(&self) -> String {
        match self {
            Self::User(pubky) => pubky.clone(),
            Self::Post { author, id } => post_key(author, id),
        }
    }

    /// Canonical URI of the tagged entity, used in homeserver records.
    pub fn uri(&self) -> String {
        match self {
            Self::User(pubky) => format!("pubky://{pubky}"),
            Self::Post { author, id } => {
                format!("pubky://{author}/pub/skiff.app/posts/{id}")
            }
        }
    }

    fn table(&self) -> &'static str {
        match self {
            Self::User(_) => UserTagsRecord::TABLE,
            Self::Post { .. } => PostTagsRecord::TABLE,
        }
    }
}

/// Local half of the tag mutation, same transactional shape as the follow
/// service: the tag edge and both counter records move together.
pub struct TagService {
    db: CacheDb,
}

impl TagService {
    pub fn new(db: &CacheDb) -> Self {
        Self { db: db.clone() }
    }

    pub fn create(
        &self,
        tagger: &Pubky,
        target: &TagTarget,
        label: &str,
    ) -> Result<(), SocialError> {
        let wrap = SocialError::storage("tag");
        let mut conn = self.db.conn();
        let tx = conn.transaction().map_err(CacheError::from).map_err(wrap)?;

        let key = target.key();
        let mut tags = tags_of(&tx, target.table(), &key).map_err(SocialError::storage("tag"))?;

        let added = add_tagger(&mut tags, label, tagger);
        if added {
            store::put_row(&tx, target.table(), &key, &tags)
                .map_err(SocialError::storage("tag"))?;

            match target {
                TagTarget::User(_) => {
                    adjust_counts(&tx, &key, |c| c.tagged += 1)
                        .map_err(SocialError::storage("tag"))?;
                }
                TagTarget::Post { .. } => {
                    adjust_post_counts(&tx, &key, |c| c.tags += 1)
                        .map_err(SocialError::storage("tag"))?;
                }
            }
            adjust_counts(&tx, tagger, |c| c.tags += 1).map_err(SocialError::storage("tag"))?;
        }

        tx.commit()
            .map_err(CacheError::from)
            .map_err(SocialError::storage("tag"))
    }

    pub fn delete(
        &self,
        tagger: &Pubky,
        target: &TagTarget,
        label: &str,
    ) -> Result<(), SocialError> {
        let wrap = SocialError::storage("untag");
        let mut conn = self.db.conn();
        let tx = conn.transaction().map_err(CacheError::from).map_err(wrap)?;

        let key = target.key();
        let mut tags = tags_of(&tx, target.table(), &key).map_err(SocialError::storage("untag"))?;

        let removed = remove_tagger(&mut tags, label, tagger);
        if removed {
            store::put_row(&tx, target.table(), &key, &tags)
                .map_err(SocialError::storage("untag"))?;

            match target {
                TagTarget::User(_) => {
                    adjust_counts(&tx, &key, |c| c.tagged = c.tagged.saturating_sub(1))
                        .map_err(SocialError::storage("untag"))?;
                }
                TagTarget::Post { .. } => {
                    adjust_post_counts(&tx, &key, |c| c.tags = c.tags.saturating_sub(1))
                        .map_err(SocialError::storage("untag"))?;
                }
            }
            adjust_counts(&tx, tagger, |c| c.tags = c.tags.saturating_sub(1))
                .map_err(SocialError::storage("untag"))?;
        }

        tx.commit()
            .map_err(CacheError::from)
            .map_err(SocialError::storage("untag"))
    }
}

fn tags_of(
    conn: &Connection,
    table: &'static str,
    key: &str,
) -> Result<Vec<TagView>, CacheError> {
    Ok(store::get_row::<Vec<TagView>>(conn, table, key)?.unwrap_or_default())
}

/// Add `tagger` under `label`. Returns false when the application already
/// exists, so callers can gate their counter deltas.
fn add_tagger(tags: &mut Vec<TagView>, label: &str, tagger: &str) -> bool {
    match tags.iter_mut().find(|tag| tag.label == label) {
        Some(tag) => {
            if tag.taggers.iter().any(|t| t == tagger) {
                return false;
            }
            tag.taggers.push(tagger.to_string());
            tag.taggers_count += 1;
            true
        }
        None => {
            tags.push(TagView {
                label: label.to_string(),
                taggers: vec![tagger.to_string()],
                taggers_count: 1,
            });
            true
        }
    }
}

/// Remove `tagger` from `label`, dropping the label when its last tagger
/// leaves. Returns false when nothing was applied.
fn remove_tagger(tags: &mut Vec<TagView>, label: &str, tagger: &str) -> bool {
    let Some(index) = tags.iter().position(|tag| tag.label == label) else {
        return false;
    };

    let tag = &mut tags[index];
    let Some(at) = tag.taggers.iter().position(|t| t == tagger) else {
        return false;
    };

    tag.taggers.remove(at);
    tag.taggers_count = tag.taggers_count.saturating_sub(1);
    if tag.taggers.is_empty() {
        tags.remove(index);
    }
    true
}

fn adjust_post_counts(
    conn: &Connection,
    key: &str,
    mutate: impl FnOnce(&mut PostCounts),
) -> Result<(), CacheError> {
    let mut counts =
        store::get_row::<PostCounts>(conn, PostCounts::TABLE, key)?.unwrap_or_default();
    mutate(&mut counts);
    store::put_row(conn, PostCounts::TABLE, key, &counts)
}
