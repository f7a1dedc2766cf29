use super::{content_type, organization_of, validate_key, Bucket};
use crate::error::Error;
use crate::security::SecurityService;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Filesystem bucket, served back through signed `/media` links
pub struct LocalBucket {
    root: PathBuf,
    public_base_url: String,
    security: Arc<SecurityService>,
}

impl LocalBucket {
    pub fn new(root: PathBuf, public_base_url: String, security: Arc<SecurityService>) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::Storage(format!("Failed to create bucket root {}: {}", root.display(), e)))?;
        info!("Local bucket rooted at {}", root.display());

        Ok(Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            security,
        })
    }

    fn path(&self, key: &str) -> Result<PathBuf, Error> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl Bucket for LocalBucket {
    async fn upload(&self, key: &str, data: &[u8]) -> Result<bool> {
        let path = self.path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create folder for {}: {}", key, e)))?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", key, e)))?;

        debug!("Stored {} ({} bytes)", key, data.len());
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path(key)?;
        Ok(tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to stat {}: {}", key, e)))?)
    }

    async fn get_metadata(&self, key: &str) -> Result<HashMap<String, String>> {
        let path = self.path(key)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("Media object not found: {}", key)).into())
            }
            Err(e) => return Err(Error::Storage(format!("Failed to stat {}: {}", key, e)).into()),
        };

        let mut metadata = HashMap::new();
        metadata.insert("size".to_string(), meta.len().to_string());
        metadata.insert("content_type".to_string(), content_type(key).to_string());
        if let Ok(modified) = meta.modified() {
            metadata.insert("last_modified".to_string(), DateTime::<Utc>::from(modified).to_rfc3339());
        }
        Ok(metadata)
    }

    async fn get_public_url(&self, key: &str, ttl: Duration) -> Result<String> {
        validate_key(key)?;
        let organization_id = organization_of(key)
            .ok_or_else(|| Error::InvalidInput(format!("media key has no organization folder: {}", key)))?;
        let token = self.security.media_token(key, organization_id, ttl)?;
        Ok(format!("{}/media/{}?token={}", self.public_base_url, key, token))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Storage(format!("Failed to delete {}: {}", key, e)).into()),
        }
    }

    async fn download(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("Failed to read {}: {}", key, e)).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::error::domain_error;
    use crate::services::storage::media_key;
    use uuid::Uuid;

    fn bucket(dir: &tempfile::TempDir) -> (LocalBucket, Arc<SecurityService>) {
        let security = Arc::new(SecurityService::new(SecurityConfig {
            jwt_secret: "bucket-test".to_string(),
            ..SecurityConfig::default()
        }));
        let bucket = LocalBucket::new(dir.path().join("media"), "http://lookout:5050/".to_string(), security.clone())
            .unwrap();
        (bucket, security)
    }

    #[tokio::test]
    async fn objects_round_trip_through_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let (bucket, _) = bucket(&dir);
        let key = media_key(Uuid::new_v4(), "jpg");

        assert!(!bucket.exists(&key).await.unwrap());
        assert!(bucket.upload(&key, b"\xFF\xD8\xFFdata").await.unwrap());
        assert!(bucket.exists(&key).await.unwrap());
        assert_eq!(bucket.download(&key).await.unwrap().unwrap(), b"\xFF\xD8\xFFdata");

        let meta = bucket.get_metadata(&key).await.unwrap();
        assert_eq!(meta["size"], "7");
        assert_eq!(meta["content_type"], "image/jpeg");

        assert!(bucket.delete(&key).await.unwrap());
        assert!(!bucket.delete(&key).await.unwrap());
        assert!(bucket.download(&key).await.unwrap().is_none());
        let err = bucket.get_metadata(&key).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn public_urls_carry_a_token_for_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let (bucket, security) = bucket(&dir);
        let org = Uuid::new_v4();
        let key = media_key(org, "png");

        let url = bucket.get_public_url(&key, Duration::minutes(10)).await.unwrap();
        let prefix = format!("http://lookout:5050/media/{}?token=", key);
        assert!(url.starts_with(&prefix), "{}", url);

        let claims = security.verify_media_token(&url[prefix.len()..], &key).unwrap();
        assert_eq!(claims.organization_id, org);
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (bucket, _) = bucket(&dir);

        let err = bucket.upload("../../etc/passwd", b"x").await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(Error::InvalidInput(_))));
    }
}
