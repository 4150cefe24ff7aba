//! crates/progression_core/src/user_store.rs
//!
//! Per-user views over collections that are not partitioned by user in the
//! backing store. Both operations scan the whole collection.

use crate::domain::OwnedRecord;
use crate::ports::PortResult;
use crate::store::{Mutation, RecordStore};

impl<T: OwnedRecord> RecordStore<T> {
    pub async fn get_by_user_id(&self, user_id: &str) -> PortResult<Vec<T>> {
        self.find(|r| r.user_id() == user_id).await
    }

    /// Removes every record owned by the user in a single rewrite.
    pub async fn delete_by_user_id(&self, user_id: &str) -> PortResult<usize> {
        self.mutate(|records| {
            let before = records.len();
            records.retain(|r| r.user_id() != user_id);
            let removed = before - records.len();
            if removed == 0 {
                Ok(Mutation::Unchanged(0))
            } else {
                Ok(Mutation::Commit(removed))
            }
        })
        .await
    }
}
