//! Read-side seam to the object store that holds transcoded playlists and
//! segments. Upload is owned by the ingest pipeline; the node only fetches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaStoreError {
    #[error("media store request failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone)]
pub struct MediaObject {
    pub body: Bytes,
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// `Ok(None)` means the object does not exist; errors are transport
    /// failures talking to the store.
    async fn fetch(&self, key: &str) -> Result<Option<MediaObject>, MediaStoreError>;
}

pub type SharedMediaStore = Arc<dyn MediaStore>;

/// Fetches objects from an S3-compatible HTTP gateway under a base URL.
pub struct HttpMediaStore {
    http: reqwest::Client,
    base_url: String,
}

impl HttpMediaStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MediaStore for HttpMediaStore {
    async fn fetch(&self, key: &str) -> Result<Option<MediaObject>, MediaStoreError> {
        let url = format!("{}/{}", self.base_url, key);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| MediaStoreError::Transport(err.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(MediaStoreError::Transport(format!(
                "unexpected status {} for {}",
                response.status(),
                url
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| MediaStoreError::Transport(err.to_string()))?;
        Ok(Some(MediaObject { body }))
    }
}

/// In-process store for tests and local development.
#[derive(Default)]
pub struct MemoryMediaStore {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, body: impl Into<Bytes>) {
        self.objects
            .lock()
            .expect("object map poisoned")
            .insert(key.into(), body.into());
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn fetch(&self, key: &str) -> Result<Option<MediaObject>, MediaStoreError> {
        let objects = self.objects.lock().expect("object map poisoned");
        Ok(objects.get(key).map(|body| MediaObject { body: body.clone() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryMediaStore::new();
        store.insert("s/master.m3u8", "#EXTM3U\n");

        let object = store.fetch("s/master.m3u8").await.unwrap().unwrap();
        assert_eq!(object.body.as_ref(), b"#EXTM3U\n");
        assert!(store.fetch("s/other").await.unwrap().is_none());
    }

    #[test]
    fn http_store_trims_trailing_slash() {
        let store = HttpMediaStore::new("http://bucket.example/media/");
        assert_eq!(store.base_url, "http://bucket.example/media");
    }
}
