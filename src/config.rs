// SPDX-License-Identifier: MPL-2.0

pub const DEFAULT_NEXUS: &str = "https://nexus.pubky.app";

/// Default page size for stream pagination.
pub const STREAM_PAGE_SIZE: usize = 30;

/// How long a cached user is considered fresh.
pub const USER_TTL_MS: i64 = 5 * 60 * 1000;

/// How long a cached post is considered fresh. Posts accumulate counts
/// faster than profiles change, so they age out sooner.
pub const POST_TTL_MS: i64 = 2 * 60 * 1000;

/// Application namespace under which records live on the homeserver.
pub const HOMESERVER_NAMESPACE: &str = "/pub/skiff.app";
