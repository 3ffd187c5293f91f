// SPDX-License-Identifier: MPL-2.0

use crate::cache::{CacheDb, CacheError};
use rusqlite::params;

pub const USER_TTL: &str = "user_ttl";
pub const POST_TTL: &str = "post_ttl";

/// Staleness stamps for cached entities. Kept apart from entity storage so
/// that write paths opt into staleness tracking explicitly and a batch
/// check is one read against a narrow table.
pub struct TtlStore {
    db: CacheDb,
    table: &'static str,
}

impl TtlStore {
    pub fn new(db: &CacheDb, table: &'static str) -> Self {
        Self {
            db: db.clone(),
            table,
        }
    }

    /// Upsert `(id, last_updated_at)` stamps in one transaction.
    pub fn bulk_save(&self, stamps: &[(String, i64)]) -> Result<(), CacheError> {
        let table = self.table;
        let mut conn = self.db.conn();
        let tx = conn.transaction().map_err(|e| CacheError::Write {
            table,
            op: "bulk_save",
            source: e,
        })?;

        for (id, last_updated_at) in stamps {
            tx.execute(
                &format!(
                    "INSERT INTO {table} (id, last_updated_at) VALUES (?1, ?2) \
                     ON CONFLICT(id) DO UPDATE SET last_updated_at = excluded.last_updated_at"
                ),
                params![id, last_updated_at],
            )
            .map_err(|e| CacheError::Write {
                table,
                op: "bulk_save",
                source: e,
            })?;
        }

        tx.commit().map_err(|e| CacheError::Write {
            table,
            op: "bulk_save",
            source: e,
        })
    }

    /// Stamp every id with the same instant.
    pub fn stamp_all(&self, ids: &[String], now: i64) -> Result<(), CacheError> {
        let stamps: Vec<(String, i64)> = ids.iter().map(|id| (id.clone(), now)).collect();
        self.bulk_save(&stamps)
    }

    /// Existing stamps only; ids without a stamp are simply absent.
    pub fn find_by_ids(&self, ids: &[String]) -> Result<Vec<(String, i64)>, CacheError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let table = self.table;
        let conn = self.db.conn();

        let placeholders: Vec<_> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
        let query = format!(
            "SELECT id, last_updated_at FROM {table} WHERE id IN ({})",
            placeholders.join(", ")
        );

        let mut stmt = conn.prepare(&query).map_err(|e| CacheError::Query {
            table,
            op: "find_by_ids",
            source: e,
        })?;

        let sql_params: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();

        stmt.query_map(sql_params.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CacheError::Query {
            table,
            op: "find_by_ids",
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_db() -> (tempfile::TempDir, CacheDb) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = CacheDb::open_at(&dir.path().join("cache.db")).expect("open");
        (dir, db)
    }

    #[test]
    fn stamps_upsert_and_missing_ids_stay_absent() {
        let (_dir, db) = scratch_db();
        let store = TtlStore::new(&db, USER_TTL);

        store
            .bulk_save(&[("a".to_string(), 100), ("b".to_string(), 200)])
            .unwrap();
        store.bulk_save(&[("a".to_string(), 300)]).unwrap();

        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let mut stamps = store.find_by_ids(&ids).unwrap();
        stamps.sort();
        assert_eq!(stamps, vec![("a".to_string(), 300), ("b".to_string(), 200)]);
    }

    #[test]
    fn user_and_post_stamps_are_separate_tables() {
        let (_dir, db) = scratch_db();
        let users = TtlStore::new(&db, USER_TTL);
        let posts = TtlStore::new(&db, POST_TTL);

        users.stamp_all(&["a".to_string()], 42).unwrap();
        assert!(posts.find_by_ids(&["a".to_string()]).unwrap().is_empty());
    }
}
