//! Avatar textures fetched over HTTP.
//!
//! The avatar URL is built from a template by substituting the user's
//! main character id for `{charid}`. Downloaded images are cached by URL
//! for the life of the process; failures are not cached, so a flaky image
//! server is simply retried next time the chat server asks.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use crate::BackendError;

/// Placeholder replaced by the character id.
pub const CHARID_PLACEHOLDER: &str = "{charid}";

/// Downloads and caches avatar images.
pub struct AvatarFetcher {
    client: reqwest::Client,
    template: String,
    cache: RwLock<HashMap<String, Vec<u8>>>,
}

impl AvatarFetcher {
    /// A fetcher for `template`, each request bounded by `timeout`.
    pub fn new(template: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Config(format!("avatar http client: {e}")))?;
        Ok(Self {
            client,
            template: template.into(),
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// The avatar URL for a character, or `None` if no template is set.
    pub fn url_for(&self, character_id: &str) -> Option<String> {
        if self.template.is_empty() {
            return None;
        }
        Some(self.template.replace(CHARID_PLACEHOLDER, character_id))
    }

    /// The image at `url`, from cache if we have it. `None` on any failure.
    pub async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        if let Some(bytes) = self.cache.read().await.get(url) {
            debug!(url, "cached avatar returned");
            return Some(bytes.clone());
        }

        debug!(url, "downloading avatar");
        let bytes = match self.download(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(url, error = %e, "avatar download failed");
                return None;
            }
        };

        self.cache
            .write()
            .await
            .insert(url.to_string(), bytes.clone());
        Some(bytes)
    }

    /// Number of cached images.
    pub async fn cached(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, reqwest::Error> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}
