use super::{content_type, validate_key, Bucket};
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

struct StoredObject {
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

/// In-memory bucket for development setups
#[derive(Default)]
pub struct DummyBucket {
    objects: RwLock<HashMap<String, StoredObject>>,
}

#[async_trait]
impl Bucket for DummyBucket {
    async fn upload(&self, key: &str, data: &[u8]) -> Result<bool> {
        validate_key(key)?;
        self.objects
            .write()
            .await
            .insert(key.to_string(), StoredObject { data: data.to_vec(), modified: Utc::now() });
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn get_metadata(&self, key: &str) -> Result<HashMap<String, String>> {
        validate_key(key)?;
        let objects = self.objects.read().await;
        let object = objects
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("Media object not found: {}", key)))?;

        let mut metadata = HashMap::new();
        metadata.insert("size".to_string(), object.data.len().to_string());
        metadata.insert("content_type".to_string(), content_type(key).to_string());
        metadata.insert("last_modified".to_string(), object.modified.to_rfc3339());
        Ok(metadata)
    }

    async fn get_public_url(&self, key: &str, ttl: Duration) -> Result<String> {
        validate_key(key)?;
        let expires = Utc::now() + ttl;
        Ok(format!("dummy://{}?expires={}", key, expires.timestamp()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.objects.write().await.remove(key).is_some())
    }

    async fn download(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.objects.read().await.get(key).map(|o| o.data.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::media_key;
    use uuid::Uuid;

    #[tokio::test]
    async fn keeps_objects_in_memory() {
        let bucket = DummyBucket::default();
        let key = media_key(Uuid::new_v4(), "bin");

        assert!(bucket.upload(&key, b"abc").await.unwrap());
        assert!(bucket.exists(&key).await.unwrap());
        assert_eq!(bucket.get_metadata(&key).await.unwrap()["size"], "3");
        assert!(bucket.get_public_url(&key, Duration::hours(1)).await.unwrap().starts_with("dummy://"));
        assert!(bucket.delete(&key).await.unwrap());
        assert!(!bucket.exists(&key).await.unwrap());
    }
}
