// SPDX-License-Identifier: MPL-2.0

mod db;
mod schema;
pub mod store;
pub mod streams;
pub mod ttl;

pub use db::CacheDb;
pub use store::{Record, RecordStore, TableData, TupleStore};
pub use streams::{POST_STREAMS, StreamStore, USER_STREAMS};
pub use ttl::{POST_TTL, TtlStore, USER_TTL};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("{op} failed on {table}: {source}")]
    Write {
        table: &'static str,
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("{op} failed on {table}: {source}")]
    Query {
        table: &'static str,
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("record {id} already exists in {table}")]
    Conflict { table: &'static str, id: String },
    #[error("serialization error on {table}: {source}")]
    Serialization {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("not found")]
    NotFound,
    #[error("database path error: {0}")]
    Path(String),
}
