// SPDX-License-Identifier: MPL-2.0

use crate::cache::{CacheDb, CacheError};
use crate::nexus::types::{PostCounts, PostDetails, Relationship, TagView, UserCounts, UserDetails};
use rusqlite::{Connection, OptionalExtension, params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;

/// A full record whose identity lives inside the record itself.
pub trait Record: Serialize + DeserializeOwned {
    const TABLE: &'static str;
    fn id(&self) -> &str;
}

/// Partial data stored as an `(id, data)` pair. Remote responses that are
/// keyed maps rather than arrays of full objects land here.
pub trait TableData: Serialize + DeserializeOwned {
    const TABLE: &'static str;
}

impl Record for UserDetails {
    const TABLE: &'static str = "user_details";
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for PostDetails {
    const TABLE: &'static str = "post_details";
    fn id(&self) -> &str {
        &self.id
    }
}

impl TableData for UserCounts {
    const TABLE: &'static str = "user_counts";
}

impl TableData for Relationship {
    const TABLE: &'static str = "user_relationships";
}

impl TableData for PostCounts {
    const TABLE: &'static str = "post_counts";
}

/// Label applications on a user, keyed by the tagged user's pubky.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserTagsRecord(pub Vec<TagView>);

impl TableData for UserTagsRecord {
    const TABLE: &'static str = "user_tags";
}

/// Label applications on a post, keyed by the post's composite key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostTagsRecord(pub Vec<TagView>);

impl TableData for PostTagsRecord {
    const TABLE: &'static str = "post_tags";
}

// Row-level helpers over a bare connection. A rusqlite Transaction derefs
// to Connection, so the mutation services reuse these inside multi-table
// transactions.

pub(crate) fn get_row<T: DeserializeOwned>(
    conn: &Connection,
    table: &'static str,
    id: &str,
) -> Result<Option<T>, CacheError> {
    let json: Option<String> = conn
        .query_row(
            &format!("SELECT data FROM {table} WHERE id = ?"),
            [id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| CacheError::Query {
            table,
            op: "get",
            source: e,
        })?;

    match json {
        Some(json) => Ok(Some(serde_json::from_str(&json).map_err(|e| {
            CacheError::Serialization { table, source: e }
        })?)),
        None => Ok(None),
    }
}

pub(crate) fn put_row<T: Serialize>(
    conn: &Connection,
    table: &'static str,
    id: &str,
    value: &T,
) -> Result<(), CacheError> {
    let json =
        serde_json::to_string(value).map_err(|e| CacheError::Serialization { table, source: e })?;

    conn.execute(
        &format!(
            "INSERT INTO {table} (id, data) VALUES (?1, ?2) \
             ON CONFLICT(id) DO UPDATE SET data = excluded.data"
        ),
        params![id, json],
    )
    .map_err(|e| CacheError::Write {
        table,
        op: "upsert",
        source: e,
    })?;

    Ok(())
}

/// Insert only when the id is absent; an existing row is left untouched.
pub(crate) fn put_row_if_absent<T: Serialize>(
    conn: &Connection,
    table: &'static str,
    id: &str,
    value: &T,
) -> Result<(), CacheError> {
    let json =
        serde_json::to_string(value).map_err(|e| CacheError::Serialization { table, source: e })?;

    conn.execute(
        &format!("INSERT INTO {table} (id, data) VALUES (?1, ?2) ON CONFLICT(id) DO NOTHING"),
        params![id, json],
    )
    .map_err(|e| CacheError::Write {
        table,
        op: "insert_if_absent",
        source: e,
    })?;

    Ok(())
}

pub(crate) fn insert_row<T: Serialize>(
    conn: &Connection,
    table: &'static str,
    id: &str,
    value: &T,
) -> Result<(), CacheError> {
    let json =
        serde_json::to_string(value).map_err(|e| CacheError::Serialization { table, source: e })?;

    conn.execute(
        &format!("INSERT INTO {table} (id, data) VALUES (?1, ?2)"),
        params![id, json],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            CacheError::Conflict {
                table,
                id: id.to_string(),
            }
        }
        other => CacheError::Write {
            table,
            op: "create",
            source: other,
        },
    })?;

    Ok(())
}

/// Shallow-merge a JSON patch into an existing row. Returns the number of
/// rows modified: 0 when the id is absent (no insert happens).
pub(crate) fn merge_row(
    conn: &Connection,
    table: &'static str,
    id: &str,
    patch: &serde_json::Value,
) -> Result<usize, CacheError> {
    let Some(mut current) = get_row::<serde_json::Value>(conn, table, id)? else {
        return Ok(0);
    };

    match (&mut current, patch) {
        (serde_json::Value::Object(base), serde_json::Value::Object(fields)) => {
            for (key, value) in fields {
                base.insert(key.clone(), value.clone());
            }
        }
        (base, patch) => *base = patch.clone(),
    }

    put_row(conn, table, id, &current)?;
    Ok(1)
}

pub(crate) fn delete_row(
    conn: &Connection,
    table: &'static str,
    id: &str,
) -> Result<usize, CacheError> {
    conn.execute(&format!("DELETE FROM {table} WHERE id = ?"), [id])
        .map_err(|e| CacheError::Write {
            table,
            op: "delete",
            source: e,
        })
}

/// Which of `ids` already have a row in `table`.
pub(crate) fn existing_ids_in(
    conn: &Connection,
    table: &'static str,
    ids: &[String],
) -> Result<Vec<String>, CacheError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders: Vec<_> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let query = format!(
        "SELECT id FROM {table} WHERE id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&query).map_err(|e| CacheError::Query {
        table,
        op: "existing_ids",
        source: e,
    })?;

    let sql_params: Vec<&dyn rusqlite::ToSql> =
        ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();

    let found = stmt
        .query_map(sql_params.as_slice(), |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CacheError::Query {
            table,
            op: "existing_ids",
            source: e,
        })?;

    Ok(found)
}

fn rows_by_ids<T: DeserializeOwned>(
    conn: &Connection,
    table: &'static str,
    ids: &[String],
) -> Result<HashMap<String, T>, CacheError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<_> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let query = format!(
        "SELECT id, data FROM {table} WHERE id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&query).map_err(|e| CacheError::Query {
        table,
        op: "find_by_ids",
        source: e,
    })?;

    let sql_params: Vec<&dyn rusqlite::ToSql> =
        ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();

    let mut rows = stmt
        .query(sql_params.as_slice())
        .map_err(|e| CacheError::Query {
            table,
            op: "find_by_ids",
            source: e,
        })?;

    let mut found = HashMap::new();
    loop {
        let row = rows.next().map_err(|e| CacheError::Query {
            table,
            op: "find_by_ids",
            source: e,
        })?;
        let Some(row) = row else { break };

        let id: String = row.get(0).map_err(|e| CacheError::Query {
            table,
            op: "find_by_ids",
            source: e,
        })?;
        let json: String = row.get(1).map_err(|e| CacheError::Query {
            table,
            op: "find_by_ids",
            source: e,
        })?;
        let value =
            serde_json::from_str(&json).map_err(|e| CacheError::Serialization { table, source: e })?;
        found.insert(id, value);
    }

    Ok(found)
}

/// Store for full records, one JSON document per row.
pub struct RecordStore<R: Record> {
    db: CacheDb,
    _marker: PhantomData<R>,
}

impl<R: Record> RecordStore<R> {
    pub fn new(db: &CacheDb) -> Self {
        Self {
            db: db.clone(),
            _marker: PhantomData,
        }
    }

    /// Insert a new record. Rejects an id that already exists.
    pub fn create(&self, record: &R) -> Result<(), CacheError> {
        let conn = self.db.conn();
        insert_row(&conn, R::TABLE, record.id(), record)
    }

    /// Insert or replace.
    pub fn upsert(&self, record: &R) -> Result<(), CacheError> {
        let conn = self.db.conn();
        put_row(&conn, R::TABLE, record.id(), record)
    }

    /// Apply a partial patch. Returns the number of rows modified,
    /// 0 when the record is absent.
    pub fn update(&self, id: &str, patch: serde_json::Value) -> Result<usize, CacheError> {
        let conn = self.db.conn();
        merge_row(&conn, R::TABLE, id, &patch)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<R>, CacheError> {
        let conn = self.db.conn();
        get_row(&conn, R::TABLE, id)
    }

    /// Existing rows only; order not guaranteed.
    pub fn find_by_ids(&self, ids: &[String]) -> Result<Vec<R>, CacheError> {
        let conn = self.db.conn();
        Ok(rows_by_ids(&conn, R::TABLE, ids)?.into_values().collect())
    }

    /// Same-length result with a hole for every miss.
    pub fn find_by_ids_preserve_order(&self, ids: &[String]) -> Result<Vec<Option<R>>, CacheError> {
        let conn = self.db.conn();
        let mut found = rows_by_ids(&conn, R::TABLE, ids)?;
        Ok(ids.iter().map(|id| found.remove(id)).collect())
    }

    /// Unordered bulk upsert in a single transaction.
    pub fn bulk_save(&self, records: &[R]) -> Result<(), CacheError> {
        let mut conn = self.db.conn();
        let tx = conn.transaction().map_err(|e| CacheError::Write {
            table: R::TABLE,
            op: "bulk_save",
            source: e,
        })?;

        for record in records {
            put_row(&tx, R::TABLE, record.id(), record)?;
        }

        tx.commit().map_err(|e| CacheError::Write {
            table: R::TABLE,
            op: "bulk_save",
            source: e,
        })
    }

    pub fn existing_ids(&self, ids: &[String]) -> Result<Vec<String>, CacheError> {
        let conn = self.db.conn();
        existing_ids_in(&conn, R::TABLE, ids)
    }
}

/// Store for `(id, data)` pairs, the shape keyed-map remote responses
/// arrive in.
pub struct TupleStore<T: TableData> {
    db: CacheDb,
    _marker: PhantomData<T>,
}

impl<T: TableData> TupleStore<T> {
    pub fn new(db: &CacheDb) -> Self {
        Self {
            db: db.clone(),
            _marker: PhantomData,
        }
    }

    pub fn save(&self, id: &str, value: &T) -> Result<(), CacheError> {
        let conn = self.db.conn();
        put_row(&conn, T::TABLE, id, value)
    }

    /// Bulk upsert of `(id, data)` tuples in a single transaction.
    pub fn bulk_save(&self, tuples: &[(String, T)]) -> Result<(), CacheError> {
        let mut conn = self.db.conn();
        let tx = conn.transaction().map_err(|e| CacheError::Write {
            table: T::TABLE,
            op: "bulk_save",
            source: e,
        })?;

        for (id, value) in tuples {
            put_row(&tx, T::TABLE, id, value)?;
        }

        tx.commit().map_err(|e| CacheError::Write {
            table: T::TABLE,
            op: "bulk_save",
            source: e,
        })
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<T>, CacheError> {
        let conn = self.db.conn();
        get_row(&conn, T::TABLE, id)
    }

    /// Existing stamps only; order not guaranteed.
    pub fn find_by_ids(&self, ids: &[String]) -> Result<Vec<(String, T)>, CacheError> {
        let conn = self.db.conn();
        Ok(rows_by_ids(&conn, T::TABLE, ids)?.into_iter().collect())
    }

    pub fn find_by_ids_preserve_order(&self, ids: &[String]) -> Result<Vec<Option<T>>, CacheError> {
        let conn = self.db.conn();
        let mut found = rows_by_ids(&conn, T::TABLE, ids)?;
        Ok(ids.iter().map(|id| found.remove(id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheDb;
    use serde_json::json;

    fn scratch_db() -> (tempfile::TempDir, CacheDb) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = CacheDb::open_at(&dir.path().join("cache.db")).expect("open");
        (dir, db)
    }

    fn details(id: &str, name: &str) -> UserDetails {
        UserDetails {
            id: id.to_string(),
            name: name.to_string(),
            bio: None,
            image: None,
            links: Vec::new(),
            status: None,
            indexed_at: 1,
        }
    }

    #[test]
    fn create_rejects_duplicate_id() {
        let (_dir, db) = scratch_db();
        let store = RecordStore::<UserDetails>::new(&db);

        store.create(&details("alice", "Alice")).unwrap();
        let err = store.create(&details("alice", "Other")).unwrap_err();
        assert!(matches!(err, CacheError::Conflict { .. }));

        // upsert is the overwrite path
        store.upsert(&details("alice", "Other")).unwrap();
        let got = store.find_by_id("alice").unwrap().unwrap();
        assert_eq!(got.name, "Other");
    }

    #[test]
    fn update_is_a_partial_patch_and_skips_missing_rows() {
        let (_dir, db) = scratch_db();
        let store = RecordStore::<UserDetails>::new(&db);

        assert_eq!(store.update("ghost", json!({"name": "x"})).unwrap(), 0);
        assert!(store.find_by_id("ghost").unwrap().is_none());

        store.create(&details("alice", "Alice")).unwrap();
        let modified = store
            .update("alice", json!({"bio": "hello", "status": "sailing"}))
            .unwrap();
        assert_eq!(modified, 1);

        let got = store.find_by_id("alice").unwrap().unwrap();
        assert_eq!(got.name, "Alice");
        assert_eq!(got.bio.as_deref(), Some("hello"));
        assert_eq!(got.status.as_deref(), Some("sailing"));
    }

    #[test]
    fn find_by_ids_preserve_order_leaves_holes() {
        let (_dir, db) = scratch_db();
        let store = RecordStore::<UserDetails>::new(&db);
        store
            .bulk_save(&[details("a", "A"), details("c", "C")])
            .unwrap();

        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let rows = store.find_by_ids_preserve_order(&ids).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].as_ref().unwrap().name, "A");
        assert!(rows[1].is_none());
        assert_eq!(rows[2].as_ref().unwrap().name, "C");

        let found = store.find_by_ids(&ids).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn existing_ids_diffs_against_the_table() {
        let (_dir, db) = scratch_db();
        let store = RecordStore::<UserDetails>::new(&db);
        store.bulk_save(&[details("a", "A")]).unwrap();

        let ids: Vec<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(store.existing_ids(&ids).unwrap(), vec!["a".to_string()]);
        assert!(store.existing_ids(&[]).unwrap().is_empty());
    }

    #[test]
    fn tuple_store_round_trips_counts() {
        let (_dir, db) = scratch_db();
        let store = TupleStore::<UserCounts>::new(&db);

        let tuples = vec![
            (
                "alice".to_string(),
                UserCounts {
                    followers: 2,
                    ..Default::default()
                },
            ),
            (
                "bob".to_string(),
                UserCounts {
                    following: 7,
                    ..Default::default()
                },
            ),
        ];
        store.bulk_save(&tuples).unwrap();

        let ids: Vec<String> = ["bob", "ghost", "alice"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rows = store.find_by_ids_preserve_order(&ids).unwrap();
        assert_eq!(rows[0].as_ref().unwrap().following, 7);
        assert!(rows[1].is_none());
        assert_eq!(rows[2].as_ref().unwrap().followers, 2);

        // existing rows only
        assert_eq!(store.find_by_ids(&ids).unwrap().len(), 2);
    }
}
