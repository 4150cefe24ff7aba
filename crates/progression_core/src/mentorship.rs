//! crates/progression_core/src/mentorship.rs
//!
//! Creation and soft-removal of mentor/mentee pairings. A mentee has at most
//! one active pairing at a time.

use crate::domain::{MentorshipPairing, PairingStatus, Record};
use crate::ports::{Clock, PortError, PortResult};
use crate::store::{Mutation, RecordStore};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct MentorshipRegistry {
    pairings: RecordStore<MentorshipPairing>,
    clock: Arc<dyn Clock>,
}

impl MentorshipRegistry {
    pub fn new(pairings: RecordStore<MentorshipPairing>, clock: Arc<dyn Clock>) -> Self {
        Self { pairings, clock }
    }

    pub async fn assign(
        &self,
        mentor_id: &str,
        mentee_id: &str,
        assigned_by: &str,
    ) -> PortResult<MentorshipPairing> {
        if mentor_id == mentee_id {
            return Err(PortError::InvalidInput(format!(
                "user {} cannot mentor themselves",
                mentor_id
            )));
        }

        let pairing = MentorshipPairing {
            id: Uuid::new_v4().to_string(),
            mentor_id: mentor_id.to_string(),
            mentee_id: mentee_id.to_string(),
            assigned_at: self.clock.now_millis(),
            assigned_by: assigned_by.to_string(),
            status: PairingStatus::Active,
            removed_at: None,
        };

        let created = self
            .pairings
            .mutate(|records| {
                if let Some(existing) = records
                    .iter()
                    .find(|p| p.is_active() && p.mentee_id == mentee_id)
                {
                    return Err(PortError::DuplicateId {
                        collection: MentorshipPairing::COLLECTION.to_string(),
                        id: existing.id.clone(),
                    });
                }
                records.push(pairing.clone());
                Ok(Mutation::Commit(pairing.clone()))
            })
            .await?;

        info!(mentor_id, mentee_id, pairing_id = %created.id, "Mentorship pairing created");
        Ok(created)
    }

    /// Marks the mentee's active pairing as removed.
    pub async fn remove(&self, mentee_id: &str) -> PortResult<MentorshipPairing> {
        let now = self.clock.now_millis();
        let removed = self
            .pairings
            .mutate(|records| {
                let pairing = records
                    .iter_mut()
                    .find(|p| p.is_active() && p.mentee_id == mentee_id)
                    .ok_or_else(|| {
                        PortError::NotFound(format!("no active mentor for {}", mentee_id))
                    })?;
                pairing.status = PairingStatus::Removed;
                pairing.removed_at = Some(now);
                Ok(Mutation::Commit(pairing.clone()))
            })
            .await?;

        info!(mentee_id, pairing_id = %removed.id, "Mentorship pairing removed");
        Ok(removed)
    }

    pub async fn active_for_mentee(&self, mentee_id: &str) -> PortResult<Option<MentorshipPairing>> {
        Ok(self
            .pairings
            .find(|p| p.is_active() && p.mentee_id == mentee_id)
            .await?
            .into_iter()
            .next())
    }

    pub async fn mentees_of(&self, mentor_id: &str) -> PortResult<Vec<MentorshipPairing>> {
        self.pairings
            .find(|p| p.is_active() && p.mentor_id == mentor_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCollectionStore;
    use crate::ports::SystemClock;
    use crate::store::StoreOptions;

    fn registry() -> MentorshipRegistry {
        MentorshipRegistry::new(
            RecordStore::new(
                Arc::new(InMemoryCollectionStore::new()),
                StoreOptions::default(),
            ),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn mentee_has_at_most_one_active_pairing() {
        let registry = registry();
        registry.assign("tom", "mia", "admin").await.unwrap();

        let err = registry.assign("sue", "mia", "admin").await.unwrap_err();
        assert!(matches!(err, PortError::DuplicateId { .. }));

        let removed = registry.remove("mia").await.unwrap();
        assert_eq!(removed.status, PairingStatus::Removed);
        assert!(removed.removed_at.is_some());
        assert!(registry.active_for_mentee("mia").await.unwrap().is_none());

        let again = registry.assign("sue", "mia", "admin").await.unwrap();
        assert_eq!(
            registry.active_for_mentee("mia").await.unwrap().map(|p| p.id),
            Some(again.id)
        );
    }

    #[tokio::test]
    async fn self_pairing_and_missing_removal_are_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.assign("tom", "tom", "admin").await,
            Err(PortError::InvalidInput(_))
        ));
        assert!(matches!(
            registry.remove("mia").await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn lists_active_mentees() {
        let registry = registry();
        registry.assign("tom", "mia", "admin").await.unwrap();
        registry.assign("tom", "lou", "admin").await.unwrap();
        registry.remove("lou").await.unwrap();

        let mentees: Vec<_> = registry
            .mentees_of("tom")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.mentee_id)
            .collect();
        assert_eq!(mentees, vec!["mia"]);
    }
}
