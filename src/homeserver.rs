// SPDX-License-Identifier: MPL-2.0

use crate::config::HOMESERVER_NAMESPACE;
use async_trait::async_trait;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum HomeserverError {
    #[error("network error: {0}")]
    Network(String),
    #[error("homeserver returned status {0}")]
    Status(u16),
    #[error("invalid homeserver url: {0}")]
    BaseUrl(String),
}

/// Write-side collaborator. PUT and DELETE are idempotent: callers may
/// retry either verb without changing the outcome.
#[async_trait]
pub trait Homeserver: Send + Sync {
    async fn put(&self, path: &str, body: serde_json::Value) -> Result<(), HomeserverError>;
    async fn delete(&self, path: &str) -> Result<(), HomeserverError>;
}

pub struct HomeserverClient {
    http: reqwest::Client,
    base: Url,
}

impl HomeserverClient {
    pub fn new(base: &str) -> Result<Self, HomeserverError> {
        let base = Url::parse(base).map_err(|e| HomeserverError::BaseUrl(e.to_string()))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, HomeserverError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| HomeserverError::BaseUrl(e.to_string()))
    }
}

#[async_trait]
impl Homeserver for HomeserverClient {
    async fn put(&self, path: &str, body: serde_json::Value) -> Result<(), HomeserverError> {
        let url = self.endpoint(path)?;

        let response = self
            .http
            .put(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| HomeserverError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HomeserverError::Status(status.as_u16()));
        }

        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), HomeserverError> {
        let url = self.endpoint(path)?;

        let response = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(|e| HomeserverError::Network(e.to_string()))?;

        let status = response.status();
        // Deleting a record that is already gone is a success.
        if !status.is_success() && status.as_u16() != 404 {
            return Err(HomeserverError::Status(status.as_u16()));
        }

        Ok(())
    }
}

// Record paths under the application namespace on the viewer's homeserver.

pub fn follow_path(followee: &str) -> String {
    format!("{HOMESERVER_NAMESPACE}/follows/{followee}")
}

pub fn tag_path(target_key: &str, label: &str) -> String {
    format!("{HOMESERVER_NAMESPACE}/tags/{target_key}:{label}")
}

pub fn bookmark_path(post_key: &str) -> String {
    format!("{HOMESERVER_NAMESPACE}/bookmarks/{post_key}")
}

pub fn settings_path(viewer: &str) -> String {
    format!("{HOMESERVER_NAMESPACE}/settings/{viewer}")
}
