//! Media object storage.
//!
//! Keys look like `{organization_id}/{name}`; every organization gets its own folder.

use crate::config::{StorageBackend, StorageConfig};
use crate::error::Error;
use crate::security::SecurityService;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub mod dummy;
pub mod local;

pub use dummy::DummyBucket;
pub use local::LocalBucket;

static KEY_SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid key segment regex"));

/// Object store holding detection images
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Store `data` under `key`, replacing any previous object
    async fn upload(&self, key: &str, data: &[u8]) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// `size`, `content_type` and `last_modified` of an object
    async fn get_metadata(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Temporary URL granting read access to `key`
    async fn get_public_url(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Returns false when the object did not exist
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn download(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Reject keys that could escape the bucket root
pub fn validate_key(key: &str) -> Result<(), Error> {
    let segments: Vec<&str> = key.split('/').collect();
    if segments.len() < 2 || !segments.iter().all(|s| KEY_SEGMENT_RE.is_match(s) && !s.contains("..")) {
        return Err(Error::InvalidInput(format!("invalid media key: {}", key)));
    }
    Ok(())
}

/// Organization owning `key`
pub fn organization_of(key: &str) -> Option<Uuid> {
    key.split('/').next().and_then(|prefix| Uuid::parse_str(prefix).ok())
}

/// Fresh key in the folder of `organization_id`
pub fn media_key(organization_id: Uuid, extension: &str) -> String {
    format!("{}/{}.{}", organization_id, Uuid::new_v4(), extension)
}

/// Guess the file extension of an upload from its magic bytes
pub fn sniff_extension(data: &[u8]) -> &'static str {
    match data {
        [0xFF, 0xD8, 0xFF, ..] => "jpg",
        [0x89, b'P', b'N', b'G', ..] => "png",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "webp",
        _ => "bin",
    }
}

pub fn content_type(key: &str) -> &'static str {
    match key.rsplit('.').next() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Build the configured bucket
pub fn from_config(config: &StorageConfig, security: Arc<SecurityService>) -> Result<Arc<dyn Bucket>> {
    let bucket: Arc<dyn Bucket> = match config.backend {
        StorageBackend::Local => Arc::new(LocalBucket::new(
            config.root_path.clone(),
            config.public_base_url.clone(),
            security,
        )?),
        StorageBackend::Dummy => Arc::new(DummyBucket::default()),
    };
    Ok(bucket)
}
