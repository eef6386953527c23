//! In-memory [`ObjectStore`] implementation for testing and offline use.
//!
//! Uses a `BTreeMap` behind `std::sync::RwLock`, so listing is naturally
//! sorted. It cannot issue URLs: [`signed_read_url`](ObjectStore::signed_read_url)
//! returns `None`. Failures can be injected per key to exercise the
//! pipeline's retry and skip paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::ObjectInfo;
use crate::traits::ObjectStore;

struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

struct InjectedFailure {
    error: StoreError,
    remaining: u32,
}

/// In-memory object store.
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    failures: RwLock<HashMap<String, InjectedFailure>>,
    listing_failure: RwLock<Option<StoreError>>,
    puts: RwLock<Vec<String>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            failures: RwLock::new(HashMap::new()),
            listing_failure: RwLock::new(None),
            puts: RwLock::new(Vec::new()),
        }
    }

    /// Insert an object directly, bypassing failure injection.
    pub fn insert(&self, key: &str, bytes: impl Into<Vec<u8>>) {
        self.objects.write().unwrap().insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.into(),
                content_type: "application/octet-stream".to_string(),
            },
        );
    }

    /// Remove an object directly, bypassing failure injection.
    pub fn remove(&self, key: &str) {
        self.objects.write().unwrap().remove(key);
    }

    /// Bytes of an object, if present.
    pub fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().unwrap().get(key).map(|o| o.bytes.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .unwrap()
            .get(key)
            .map(|o| o.content_type.clone())
    }

    /// All keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().unwrap().keys().cloned().collect()
    }

    /// Keys written through [`ObjectStore::put`], in order.
    pub fn put_log(&self) -> Vec<String> {
        self.puts.read().unwrap().clone()
    }

    /// Make the next `times` head/get/put/delete calls on `key` fail.
    pub fn fail_key(&self, key: &str, error: StoreError, times: u32) {
        self.failures.write().unwrap().insert(
            key.to_string(),
            InjectedFailure {
                error,
                remaining: times,
            },
        );
    }

    /// Make every `list` call fail.
    pub fn fail_listing(&self, error: StoreError) {
        *self.listing_failure.write().unwrap() = Some(error);
    }

    fn injected(&self, key: &str) -> Result<(), StoreError> {
        let mut failures = self.failures.write().unwrap();
        if let Some(failure) = failures.get_mut(key) {
            if failure.remaining > 0 {
                failure.remaining -= 1;
                return Err(failure.error.clone());
            }
        }
        Ok(())
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        if let Some(ref err) = *self.listing_failure.read().unwrap() {
            return Err(err.clone());
        }
        let objects = self.objects.read().unwrap();
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| !k.ends_with('/'))
            .map(|(k, o)| ObjectInfo {
                key: k.clone(),
                size: o.bytes.len() as u64,
            })
            .collect())
    }

    async fn head(&self, key: &str) -> Result<ObjectInfo, StoreError> {
        self.injected(key)?;
        let objects = self.objects.read().unwrap();
        objects
            .get(key)
            .map(|o| ObjectInfo {
                key: key.to_string(),
                size: o.bytes.len() as u64,
            })
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.injected(key)?;
        self.bytes(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        self.injected(key)?;
        self.objects.write().unwrap().insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        self.puts.write().unwrap().push(key.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.injected(key)?;
        self.objects.write().unwrap().remove(key);
        Ok(())
    }

    async fn signed_read_url(
        &self,
        _key: &str,
        _ttl: Duration,
    ) -> Result<Option<String>, StoreError> {
        Ok(None)
    }
}
