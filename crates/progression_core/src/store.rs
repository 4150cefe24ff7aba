//! crates/progression_core/src/store.rs
//!
//! The Record Store: typed CRUD over one named collection of a `CollectionStore`.
//!
//! Every mutation reads the whole collection, applies the change in memory and
//! writes the whole collection back, conditioned on the version it read. A
//! concurrent writer makes the write fail with `VersionConflict`, in which case
//! the change is re-applied to a fresh snapshot. Updates are never lost silently.

use crate::domain::Record;
use crate::ports::{CollectionStore, PortError, PortResult};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

//=========================================================================================
// Options
//=========================================================================================

/// Deadline and retry policy applied to every backing store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub timeout: Duration,
    /// How many times a mutation is attempted before a version conflict surfaces.
    pub max_attempts: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

/// What a mutation closure decided to do with the collection it was given.
pub enum Mutation<R> {
    /// Write the modified collection back and return the value.
    Commit(R),
    /// Nothing changed; skip the write.
    Unchanged(R),
}

//=========================================================================================
// RecordStore
//=========================================================================================

pub struct RecordStore<T> {
    backend: Arc<dyn CollectionStore>,
    options: StoreOptions,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for RecordStore<T> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            options: self.options,
            _record: PhantomData,
        }
    }
}

impl<T: Record> RecordStore<T> {
    pub fn new(backend: Arc<dyn CollectionStore>, options: StoreOptions) -> Self {
        Self {
            backend,
            options,
            _record: PhantomData,
        }
    }

    pub fn collection(&self) -> &'static str {
        T::COLLECTION
    }

    // --- Reads ---

    pub async fn get_all(&self) -> PortResult<Vec<T>> {
        let (records, _) = self.load().await?;
        Ok(records)
    }

    pub async fn get_by_id(&self, id: &str) -> PortResult<Option<T>> {
        Ok(self.get_all().await?.into_iter().find(|r| r.id() == id))
    }

    /// Returns the records whose ids are listed. Missing ids are omitted.
    pub async fn get_by_ids<S: AsRef<str>>(&self, ids: &[S]) -> PortResult<Vec<T>> {
        let wanted: HashSet<&str> = ids.iter().map(AsRef::as_ref).collect();
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|r| wanted.contains(r.id()))
            .collect())
    }

    pub async fn find<P>(&self, predicate: P) -> PortResult<Vec<T>>
    where
        P: Fn(&T) -> bool,
    {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|r| predicate(r))
            .collect())
    }

    pub async fn count(&self) -> PortResult<usize> {
        Ok(self.get_all().await?.len())
    }

    pub async fn exists(&self, id: &str) -> PortResult<bool> {
        Ok(self.get_by_id(id).await?.is_some())
    }

    // --- Writes ---

    /// Appends a record. Fails with `DuplicateId` if its id is already taken.
    pub async fn create(&self, record: T) -> PortResult<T> {
        self.mutate(|records| {
            if records.iter().any(|r| r.id() == record.id()) {
                return Err(PortError::DuplicateId {
                    collection: T::COLLECTION.to_string(),
                    id: record.id().to_string(),
                });
            }
            records.push(record.clone());
            Ok(Mutation::Commit(record.clone()))
        })
        .await
    }

    /// Shallow-merges the fields of `patch` (a JSON object) into the record.
    /// The record's `id` is re-asserted after the merge.
    pub async fn update(&self, id: &str, patch: Value) -> PortResult<T> {
        let fields = match patch {
            Value::Object(fields) => fields,
            other => {
                return Err(PortError::InvalidInput(format!(
                    "update patch must be an object, got {}",
                    other
                )))
            }
        };

        self.mutate(|records| {
            let slot = records
                .iter_mut()
                .find(|r| r.id() == id)
                .ok_or_else(|| not_found::<T>(id))?;

            let mut merged = match serde_json::to_value(&*slot)? {
                Value::Object(map) => map,
                _ => {
                    return Err(PortError::Unexpected(format!(
                        "record {} in {} is not a JSON object",
                        id,
                        T::COLLECTION
                    )))
                }
            };
            for (key, value) in &fields {
                merged.insert(key.clone(), value.clone());
            }
            merged.insert("id".to_string(), Value::String(id.to_string()));

            let updated: T = serde_json::from_value(Value::Object(merged))?;
            *slot = updated.clone();
            Ok(Mutation::Commit(updated))
        })
        .await
    }

    /// Applies `change` to the record with the given id. `NotFound` if absent.
    pub async fn update_with<F>(&self, id: &str, mut change: F) -> PortResult<T>
    where
        F: FnMut(&mut T) + Send,
    {
        self.mutate(|records| {
            let slot = records
                .iter_mut()
                .find(|r| r.id() == id)
                .ok_or_else(|| not_found::<T>(id))?;
            change(slot);
            Ok(Mutation::Commit(slot.clone()))
        })
        .await
    }

    /// Applies `change` to the record with the given id, inserting `init()` first
    /// when it does not exist yet.
    pub async fn upsert_with<I, F, R>(&self, id: &str, init: I, mut change: F) -> PortResult<R>
    where
        I: Fn() -> T + Send + Sync,
        F: FnMut(&mut T) -> R + Send,
        R: Send,
    {
        self.try_upsert_with(id, init, |record| Ok(change(record))).await
    }

    /// Like `upsert_with`, but `change` may reject the edit. A rejection leaves
    /// the collection untouched, including the `init()` insert.
    pub async fn try_upsert_with<I, F, R>(
        &self,
        id: &str,
        init: I,
        mut change: F,
    ) -> PortResult<R>
    where
        I: Fn() -> T + Send + Sync,
        F: FnMut(&mut T) -> PortResult<R> + Send,
        R: Send,
    {
        self.mutate(|records| {
            let index = match records.iter().position(|r| r.id() == id) {
                Some(index) => index,
                None => {
                    records.push(init());
                    records.len() - 1
                }
            };
            Ok(Mutation::Commit(change(&mut records[index])?))
        })
        .await
    }

    /// Removes the record. Returns whether anything was actually removed.
    pub async fn delete(&self, id: &str) -> PortResult<bool> {
        self.mutate(|records| {
            let before = records.len();
            records.retain(|r| r.id() != id);
            if records.len() == before {
                Ok(Mutation::Unchanged(false))
            } else {
                Ok(Mutation::Commit(true))
            }
        })
        .await
    }

    /// Runs a read-modify-write cycle against the whole collection.
    ///
    /// The closure may run more than once: it is re-applied to a fresh snapshot
    /// whenever the conditional write loses a race with another writer.
    pub async fn mutate<F, R>(&self, mut apply: F) -> PortResult<R>
    where
        F: FnMut(&mut Vec<T>) -> PortResult<Mutation<R>> + Send,
        R: Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let (mut records, version) = self.load().await?;

            let value = match apply(&mut records)? {
                Mutation::Unchanged(value) => return Ok(value),
                Mutation::Commit(value) => value,
            };

            let encoded = records
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>()?;

            match self
                .with_deadline(self.backend.replace(T::COLLECTION, encoded, version))
                .await
            {
                Ok(new_version) => {
                    debug!(collection = T::COLLECTION, new_version, "Collection rewritten");
                    return Ok(value);
                }
                Err(PortError::VersionConflict { .. }) if attempt < self.options.max_attempts => {
                    warn!(
                        collection = T::COLLECTION,
                        attempt, "Concurrent write detected, retrying mutation"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn load(&self) -> PortResult<(Vec<T>, u64)> {
        let snapshot = self.with_deadline(self.backend.load(T::COLLECTION)).await?;
        let records = snapshot
            .records
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()?;
        Ok((records, snapshot.version))
    }

    async fn with_deadline<F, R>(&self, call: F) -> PortResult<R>
    where
        F: Future<Output = PortResult<R>>,
    {
        tokio::time::timeout(self.options.timeout, call)
            .await
            .map_err(|_| PortError::Timeout(self.options.timeout))?
    }
}

fn not_found<T: Record>(id: &str) -> PortError {
    PortError::NotFound(format!("{} not found in {}", id, T::COLLECTION))
}

//=========================================================================================
// Tests
//=========================================================================================
