//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `CollectionStore` port from the `core` crate. Each collection is one row
//! in PostgreSQL holding the whole collection as JSONB plus a version counter.

use async_trait::async_trait;
use progression_core::ports::{CollectionStore, PortError, PortResult, Snapshot};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `CollectionStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct CollectionRecord {
    version: i64,
    records: Json<Vec<Value>>,
}
impl CollectionRecord {
    fn to_domain(self) -> Snapshot {
        Snapshot {
            records: self.records.0,
            version: self.version as u64,
        }
    }
}

/// Connection-level failures mean the store is unreachable; anything else is unexpected.
fn map_sqlx_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => PortError::StoreUnavailable(e.to_string()),
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// `CollectionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl CollectionStore for DbAdapter {
    async fn load(&self, collection: &str) -> PortResult<Snapshot> {
        let record = sqlx::query_as::<_, CollectionRecord>(
            "SELECT version, records FROM collections WHERE name = $1",
        )
        .bind(collection)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(record.map(CollectionRecord::to_domain).unwrap_or_default())
    }

    async fn replace(
        &self,
        collection: &str,
        records: Vec<Value>,
        expected_version: u64,
    ) -> PortResult<u64> {
        let new_version: Option<i64> = if expected_version == 0 {
            sqlx::query_scalar(
                "INSERT INTO collections (name, version, records) VALUES ($1, 1, $2) \
                 ON CONFLICT (name) DO NOTHING RETURNING version",
            )
            .bind(collection)
            .bind(Json(&records))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
        } else {
            sqlx::query_scalar(
                "UPDATE collections SET version = version + 1, records = $2, updated_at = now() \
                 WHERE name = $1 AND version = $3 RETURNING version",
            )
            .bind(collection)
            .bind(Json(&records))
            .bind(expected_version as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
        };

        match new_version {
            Some(version) => Ok(version as u64),
            None => Err(PortError::VersionConflict {
                collection: collection.to_string(),
                expected: expected_version,
            }),
        }
    }
}
