// SPDX-License-Identifier: MPL-2.0

mod bookmarks;
mod follow;
mod tags;

pub use bookmarks::{BookmarkAction, BookmarkRecord, BookmarkService};
pub use follow::FollowService;
pub use tags::{TagService, TagTarget};

use crate::cache::CacheError;
use crate::homeserver::HomeserverError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SocialError {
    #[error("{op}: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: CacheError,
    },
    #[error("homeserver write failed: {0}")]
    Homeserver(#[from] HomeserverError),
}

impl SocialError {
    fn storage(op: &'static str) -> impl FnOnce(CacheError) -> Self {
        move |source| Self::Storage { op, source }
    }
}
