//! crates/progression_core/src/memory.rs
//!
//! An in-process implementation of the `CollectionStore` port. Used for local
//! runs without PostgreSQL and as the backing store in tests.

use crate::ports::{CollectionStore, PortError, PortResult, Snapshot};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryCollectionStore {
    collections: RwLock<HashMap<String, Snapshot>>,
    unavailable: AtomicBool,
}

impl InMemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `StoreUnavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Seeds a collection directly, bypassing version checks.
    pub async fn seed(&self, collection: &str, records: Vec<Value>) {
        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_default();
        entry.records = records;
        entry.version += 1;
    }

    fn check_available(&self) -> PortResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PortError::StoreUnavailable(
                "in-memory store switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CollectionStore for InMemoryCollectionStore {
    async fn load(&self, collection: &str) -> PortResult<Snapshot> {
        self.check_available()?;
        let collections = self.collections.read().await;
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }

    async fn replace(
        &self,
        collection: &str,
        records: Vec<Value>,
        expected_version: u64,
    ) -> PortResult<u64> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_default();
        if entry.version != expected_version {
            return Err(PortError::VersionConflict {
                collection: collection.to_string(),
                expected: expected_version,
            });
        }
        entry.records = records;
        entry.version += 1;
        Ok(entry.version)
    }
}
