// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

/// User identity key. z-base-32 public key string, opaque to this crate.
pub type Pubky = String;

/// Composite key addressing a post: `"{author}:{post_id}"`.
pub fn post_key(author: &str, post_id: &str) -> String {
    format!("{author}:{post_id}")
}

/// Decoupled from the Nexus wire schema so the rest of the engine only
/// sees our own types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub details: UserDetails,
    pub counts: UserCounts,
    #[serde(default)]
    pub relationship: Relationship,
    #[serde(default)]
    pub tags: Vec<TagView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDetails {
    pub id: Pubky,
    pub name: String,
    pub bio: Option<String>,
    pub image: Option<String>,
    #[serde(default)]
    pub links: Vec<UserLink>,
    pub status: Option<String>,
    pub indexed_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserLink {
    pub title: String,
    pub url: String,
}

/// Derived aggregate counters for a user. Maintained locally by delta,
/// not recomputation, when mutations originate on this device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserCounts {
    pub followers: u32,
    pub following: u32,
    pub friends: u32,
    pub posts: u32,
    pub tags: u32,
    pub tagged: u32,
    pub bookmarks: u32,
}

/// Viewer-relative relationship flags on a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub following: bool,
    pub followed_by: bool,
    pub muted: bool,
}

/// One label applied to a user or post, with the identities that applied it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagView {
    pub label: String,
    #[serde(default)]
    pub taggers: Vec<Pubky>,
    pub taggers_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostView {
    pub details: PostDetails,
    pub counts: PostCounts,
    #[serde(default)]
    pub tags: Vec<TagView>,
    /// Author details as indexed by Nexus; used to opportunistically
    /// backfill the local user table when a post arrives first.
    pub author: Option<UserDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostDetails {
    /// Composite key, see [`post_key`].
    pub id: String,
    pub author: Pubky,
    pub content: String,
    pub kind: PostKind,
    pub uri: String,
    pub indexed_at: i64,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    Short,
    Long,
    Image,
    Video,
    Link,
    File,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostCounts {
    pub replies: u32,
    pub reposts: u32,
    pub tags: u32,
}

impl PostView {
    pub fn key(&self) -> &str {
        &self.details.id
    }
}

/// Which relationship of the owner a user stream walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStreamSource {
    Following,
    Followers,
    Friends,
    Muted,
    Recommended,
}

impl std::fmt::Display for UserStreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Following => "following",
            Self::Followers => "followers",
            Self::Friends => "friends",
            Self::Muted => "muted",
            Self::Recommended => "recommended",
        };
        f.write_str(name)
    }
}

/// Composite key for a cached user stream. One cached id list exists per
/// distinct (source, owner) combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStreamId {
    pub source: UserStreamSource,
    pub owner: Pubky,
}

impl UserStreamId {
    pub fn new(source: UserStreamSource, owner: impl Into<Pubky>) -> Self {
        Self {
            source,
            owner: owner.into(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.source, self.owner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStreamSource {
    All,
    Following,
    Friends,
    Bookmarks,
    Author,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Today,
    ThisMonth,
    AllTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reach {
    All,
    Following,
    Friends,
}

/// Composite key for a cached post stream: `"{source}:{timeframe}:{reach}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostStreamId {
    pub source: PostStreamSource,
    pub timeframe: Timeframe,
    pub reach: Reach,
}

impl PostStreamId {
    pub fn key(&self) -> String {
        let source = match self.source {
            PostStreamSource::All => "all",
            PostStreamSource::Following => "following",
            PostStreamSource::Friends => "friends",
            PostStreamSource::Bookmarks => "bookmarks",
            PostStreamSource::Author => "author",
        };
        let timeframe = match self.timeframe {
            Timeframe::Today => "today",
            Timeframe::ThisMonth => "this_month",
            Timeframe::AllTime => "all_time",
        };
        let reach = match self.reach {
            Reach::All => "all",
            Reach::Following => "following",
            Reach::Friends => "friends",
        };
        format!("{source}:{timeframe}:{reach}")
    }
}

impl UserView {
    pub fn id(&self) -> &str {
        &self.details.id
    }
}
