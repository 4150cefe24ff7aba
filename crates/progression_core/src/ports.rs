//! crates/progression_core/src/ports.rs
//!
//! Defines the service contracts (traits) the engine depends on.
//! These traits form the boundary of the hexagonal architecture, keeping the core
//! independent of the concrete backing store and of wall-clock time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Mutex;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all engine and port operations.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Record {id} already exists in {collection}")]
    DuplicateId { collection: String, id: String },
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Backing store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Collection {collection} changed concurrently (expected version {expected})")]
    VersionConflict { collection: String, expected: u64 },
    #[error("Backing store call timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Invalid reference: {0}")]
    InvalidReference(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Backing Store Port
//=========================================================================================

/// The full contents of a collection at one version.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub records: Vec<Value>,
    /// Zero for a collection that has never been written.
    pub version: u64,
}

/// A whole-collection key/value store. There is no per-record write; the
/// collection is the unit of consistency.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Reads the whole collection and its current version.
    async fn load(&self, collection: &str) -> PortResult<Snapshot>;

    /// Replaces the whole collection if its version is still `expected_version`.
    ///
    /// Returns the new version, or `PortError::VersionConflict` when another
    /// writer got there first.
    async fn replace(
        &self,
        collection: &str,
        records: Vec<Value>,
        expected_version: u64,
    ) -> PortResult<u64>;
}

//=========================================================================================
// Clock Port
//=========================================================================================

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
