// SPDX-License-Identifier: MPL-2.0

use crate::nexus::types::{PostView, Pubky, UserStreamId, UserView};
use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum NexusError {
    #[error("network error: {0}")]
    Network(String),
    #[error("nexus returned status {0}")]
    Status(u16),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid nexus url: {0}")]
    BaseUrl(String),
}

/// Read-side collaborators: the paginated stream endpoint and the
/// best-effort by-ids endpoint (which silently omits ids that no longer
/// exist). The application layers only ever see this trait.
#[async_trait]
pub trait NexusApi: Send + Sync {
    async fn user_stream_page(
        &self,
        stream: &UserStreamId,
        viewer: &Pubky,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<UserView>, NexusError>;

    async fn users_by_ids(
        &self,
        ids: &[Pubky],
        viewer: &Pubky,
    ) -> Result<Vec<UserView>, NexusError>;

    async fn posts_by_ids(
        &self,
        keys: &[String],
        viewer: &Pubky,
    ) -> Result<Vec<PostView>, NexusError>;
}

/// Wraps the Nexus HTTP API so the rest of the engine only sees our own
/// types.
pub struct NexusClient {
    http: reqwest::Client,
    base: Url,
}

impl NexusClient {
    pub fn new(base: &str) -> Result<Self, NexusError> {
        let base = Url::parse(base).map_err(|e| NexusError::BaseUrl(e.to_string()))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, NexusError> {
        self.base
            .join(path)
            .map_err(|e| NexusError::BaseUrl(e.to_string()))
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, NexusError> {
        let status = response.status();
        if !status.is_success() {
            return Err(NexusError::Status(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| NexusError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl NexusApi for NexusClient {
    async fn user_stream_page(
        &self,
        stream: &UserStreamId,
        viewer: &Pubky,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<UserView>, NexusError> {
        let url = self.endpoint("v0/stream/users")?;

        let response = self
            .http
            .get(url)
            .query(&[
                ("source", stream.source.to_string()),
                ("owner_id", stream.owner.clone()),
                ("viewer_id", viewer.clone()),
                ("skip", skip.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| NexusError::Network(e.to_string()))?;

        Self::decode(response).await
    }

    async fn users_by_ids(
        &self,
        ids: &[Pubky],
        viewer: &Pubky,
    ) -> Result<Vec<UserView>, NexusError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.endpoint("v0/users/by_ids")?;

        let response = self
            .http
            .post(url)
            .json(&json!({ "user_ids": ids, "viewer_id": viewer }))
            .send()
            .await
            .map_err(|e| NexusError::Network(e.to_string()))?;

        Self::decode(response).await
    }

    async fn posts_by_ids(
        &self,
        keys: &[String],
        viewer: &Pubky,
    ) -> Result<Vec<PostView>, NexusError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.endpoint("v0/posts/by_ids")?;

        let response = self
            .http
            .post(url)
            .json(&json!({ "post_ids": keys, "viewer_id": viewer }))
            .send()
            .await
            .map_err(|e| NexusError::Network(e.to_string()))?;

        Self::decode(response).await
    }
}
