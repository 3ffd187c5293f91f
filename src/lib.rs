// SPDX-License-Identifier: MPL-2.0

//! Local-first cache and sync engine for the Pubky social network.
//!
//! Reads are served from a per-viewer SQLite cache and kept eventually
//! consistent with the Nexus indexer; mutations apply locally first and
//! are mirrored to the viewer's homeserver.

pub mod app;
pub mod cache;
pub mod config;
pub mod homeserver;
pub mod nexus;
pub mod refresh;
pub mod settings;
pub mod social;
pub mod streams;

pub use app::{App, AppConfig, AppError};
pub use nexus::types::{Pubky, UserStreamId, UserStreamSource};
