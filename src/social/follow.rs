// SPDX-License-Identifier: MPL-2.0

use crate::cache::store::{self, TableData};
use crate::cache::{CacheDb, CacheError};
use crate::nexus::types::{Pubky, Relationship, UserCounts};
use crate::social::SocialError;
use rusqlite::{Connection, params};

/// Edge direction in the connections table.
/// Following: owner follows peer. Followers: peer follows owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionKind {
    Following = 0,
    Followers = 1,
}

/// Local half of the follow mutation. Counts, connection edges and
/// relationship flags move together in one transaction; a half-applied
/// follow would break the edge/counter invariant. The homeserver write is
/// the caller's concern.
pub struct FollowService {
    db: CacheDb,
}

impl FollowService {
    pub fn new(db: &CacheDb) -> Self {
        Self { db: db.clone() }
    }

    pub fn create(&self, follower: &Pubky, followee: &Pubky) -> Result<(), SocialError> {
        let wrap = SocialError::storage("follow");
        let mut conn = self.db.conn();
        let tx = conn.transaction().map_err(CacheError::from).map_err(wrap)?;

        // Snapshot before mutating: the mutual transition fires exactly
        // when the second direction appears.
        let was_followed_by = relationship_of(&tx, followee)
            .map_err(SocialError::storage("follow"))?
            .followed_by;

        let added_following = create_connection(&tx, follower, ConnectionKind::Following, followee)
            .map_err(SocialError::storage("follow"))?;
        let added_follower = create_connection(&tx, followee, ConnectionKind::Followers, follower)
            .map_err(SocialError::storage("follow"))?;

        // Every counter delta is gated on its edge write having actually
        // inserted a row; a repeated follow must not double-count.
        if added_following {
            adjust_counts(&tx, follower, |c| c.following += 1)
                .map_err(SocialError::storage("follow"))?;
        }
        if added_follower {
            adjust_counts(&tx, followee, |c| c.followers += 1)
                .map_err(SocialError::storage("follow"))?;
        }
        if was_followed_by && added_following {
            adjust_counts(&tx, follower, |c| c.friends += 1)
                .map_err(SocialError::storage("follow"))?;
            adjust_counts(&tx, followee, |c| c.friends += 1)
                .map_err(SocialError::storage("follow"))?;
        }

        set_relationship(&tx, followee, |r| r.following = true)
            .map_err(SocialError::storage("follow"))?;
        set_relationship(&tx, follower, |r| r.followed_by = true)
            .map_err(SocialError::storage("follow"))?;

        tx.commit()
            .map_err(CacheError::from)
            .map_err(SocialError::storage("follow"))
    }

    pub fn delete(&self, follower: &Pubky, followee: &Pubky) -> Result<(), SocialError> {
        let wrap = SocialError::storage("unfollow");
        let mut conn = self.db.conn();
        let tx = conn.transaction().map_err(CacheError::from).map_err(wrap)?;

        let was_followed_by = relationship_of(&tx, followee)
            .map_err(SocialError::storage("unfollow"))?
            .followed_by;

        let removed_following =
            delete_connection(&tx, follower, ConnectionKind::Following, followee)
                .map_err(SocialError::storage("unfollow"))?;
        let removed_follower = delete_connection(&tx, followee, ConnectionKind::Followers, follower)
            .map_err(SocialError::storage("unfollow"))?;

        if removed_following {
            adjust_counts(&tx, follower, |c| c.following = c.following.saturating_sub(1))
                .map_err(SocialError::storage("unfollow"))?;
        }
        if removed_follower {
            adjust_counts(&tx, followee, |c| c.followers = c.followers.saturating_sub(1))
                .map_err(SocialError::storage("unfollow"))?;
        }
        // They were friends iff the other direction still stands.
        let was_friends = was_followed_by && removed_following;
        if was_friends {
            adjust_counts(&tx, follower, |c| c.friends = c.friends.saturating_sub(1))
                .map_err(SocialError::storage("unfollow"))?;
            adjust_counts(&tx, followee, |c| c.friends = c.friends.saturating_sub(1))
                .map_err(SocialError::storage("unfollow"))?;
        }

        set_relationship(&tx, followee, |r| r.following = false)
            .map_err(SocialError::storage("unfollow"))?;
        set_relationship(&tx, follower, |r| r.followed_by = false)
            .map_err(SocialError::storage("unfollow"))?;

        tx.commit()
            .map_err(CacheError::from)
            .map_err(SocialError::storage("unfollow"))
    }
}

fn relationship_of(conn: &Connection, id: &str) -> Result<Relationship, CacheError> {
    Ok(store::get_row::<Relationship>(conn, Relationship::TABLE, id)?.unwrap_or_default())
}

/// Rewrite a relationship flag, writing only when it actually changes.
fn set_relationship(
    conn: &Connection,
    id: &str,
    mutate: impl FnOnce(&mut Relationship),
) -> Result<(), CacheError> {
    let current = relationship_of(conn, id)?;
    let mut next = current.clone();
    mutate(&mut next);
    if next != current {
        store::put_row(conn, Relationship::TABLE, id, &next)?;
    }
    Ok(())
}

pub(crate) fn adjust_counts(
    conn: &Connection,
    id: &str,
    mutate: impl FnOnce(&mut UserCounts),
) -> Result<(), CacheError> {
    let mut counts =
        store::get_row::<UserCounts>(conn, UserCounts::TABLE, id)?.unwrap_or_default();
    mutate(&mut counts);
    store::put_row(conn, UserCounts::TABLE, id, &counts)
}

/// Returns whether a new edge was actually inserted; an existing edge is
/// left alone.
pub(crate) fn create_connection(
    conn: &Connection,
    owner: &str,
    kind: ConnectionKind,
    peer: &str,
) -> Result<bool, CacheError> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO connections (owner_id, kind, peer_id, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![owner, kind as i64, peer, CacheDb::now_ms()],
        )
        .map_err(|e| CacheError::Write {
            table: "connections",
            op: "create",
            source: e,
        })?;

    Ok(inserted == 1)
}

/// Returns whether an edge was actually removed.
pub(crate) fn delete_connection(
    conn: &Connection,
    owner: &str,
    kind: ConnectionKind,
    peer: &str,
) -> Result<bool, CacheError> {
    let removed = conn
        .execute(
            "DELETE FROM connections WHERE owner_id = ?1 AND kind = ?2 AND peer_id = ?3",
            params![owner, kind as i64, peer],
        )
        .map_err(|e| CacheError::Write {
            table: "connections",
            op: "delete",
            source: e,
        })?;

    Ok(removed == 1)
}
