//! crates/progression_core/src/engine.rs
//!
//! `ProgressionEngine` wires every component against one backing store and is
//! the entry point the surrounding application calls into.

use crate::achievements::{AchievementCatalog, AchievementProgress, AchievementUnlocker};
use crate::domain::{
    Activity, AwardResult, MentorshipPairing, UnlockedAchievement, UserAchievement, UserStats,
    XpEvent, XpReason,
};
use crate::integrity::{IntegritySweep, MigrationReport, ValidationReport};
use crate::ledger::{ActivityResult, LedgerCheck, ProgressionLedger};
use crate::mentorship::MentorshipRegistry;
use crate::ports::{Clock, CollectionStore, PortResult};
use crate::rewards::RewardPropagator;
use crate::store::{RecordStore, StoreOptions};
use std::sync::Arc;

pub struct ProgressionEngine {
    ledger: ProgressionLedger,
    mentorships: MentorshipRegistry,
    sweep: IntegritySweep,
}

impl ProgressionEngine {
    pub fn new(
        backend: Arc<dyn CollectionStore>,
        catalog: AchievementCatalog,
        options: StoreOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let stats = RecordStore::new(backend.clone(), options);
        let pairings = RecordStore::new(backend.clone(), options);

        let unlocker = AchievementUnlocker::new(
            RecordStore::new(backend.clone(), options),
            Arc::new(catalog),
            clock.clone(),
        );
        let propagator = RewardPropagator::new(pairings.clone(), stats.clone());
        let ledger = ProgressionLedger::new(
            stats,
            RecordStore::new(backend.clone(), options),
            unlocker,
            propagator,
            clock.clone(),
        );

        Self {
            ledger,
            mentorships: MentorshipRegistry::new(pairings, clock),
            sweep: IntegritySweep::new(backend, options),
        }
    }

    // --- Progression ---

    pub async fn award(&self, user_id: &str, amount: i64, reason: XpReason) -> PortResult<AwardResult> {
        self.ledger.award(user_id, amount, reason).await
    }

    pub async fn touch_streak(&self, user_id: &str) -> PortResult<u32> {
        self.ledger.touch_streak(user_id).await
    }

    pub async fn record_activity(&self, user_id: &str, activity: Activity) -> PortResult<ActivityResult> {
        self.ledger.record_activity(user_id, activity).await
    }

    pub async fn get_user_stats(&self, user_id: &str) -> PortResult<UserStats> {
        self.ledger.get_user_stats(user_id).await
    }

    pub async fn xp_history(&self, user_id: &str) -> PortResult<Vec<XpEvent>> {
        self.ledger.xp_history(user_id).await
    }

    pub async fn verify_ledger(&self, user_id: &str) -> PortResult<LedgerCheck> {
        self.ledger.verify(user_id).await
    }

    pub async fn rebuild_total(&self, user_id: &str) -> PortResult<LedgerCheck> {
        self.ledger.rebuild_total(user_id).await
    }

    // --- Achievements ---

    pub async fn check_and_unlock(
        &self,
        user_id: &str,
        stats: &UserStats,
    ) -> PortResult<Vec<UnlockedAchievement>> {
        self.ledger.unlocker().check_and_unlock(user_id, stats).await
    }

    pub async fn achievements(&self, user_id: &str) -> PortResult<Vec<UserAchievement>> {
        self.ledger.unlocker().list_unlocked(user_id).await
    }

    pub async fn achievement_progress(&self, user_id: &str) -> PortResult<Vec<AchievementProgress>> {
        let stats = self.get_user_stats(user_id).await?;
        self.ledger.unlocker().progress_report(user_id, &stats).await
    }

    // --- Mentorship ---

    pub async fn assign_mentor(
        &self,
        mentor_id: &str,
        mentee_id: &str,
        assigned_by: &str,
    ) -> PortResult<MentorshipPairing> {
        self.mentorships.assign(mentor_id, mentee_id, assigned_by).await
    }

    pub async fn remove_mentor(&self, mentee_id: &str) -> PortResult<MentorshipPairing> {
        self.mentorships.remove(mentee_id).await
    }

    pub fn mentorships(&self) -> &MentorshipRegistry {
        &self.mentorships
    }

    // --- Maintenance ---

    pub async fn run_integrity_validate(&self) -> PortResult<ValidationReport> {
        self.sweep.validate().await
    }

    pub async fn run_integrity_clean(&self) -> PortResult<MigrationReport> {
        self.sweep.clean().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::XpEventKind;
    use crate::memory::InMemoryCollectionStore;
    use crate::ports::SystemClock;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn mentee_award_credits_mentor_end_to_end() {
        let backend = Arc::new(InMemoryCollectionStore::new());
        backend
            .seed("user-profiles", vec![json!({"id": "mia"}), json!({"id": "tom"})])
            .await;
        let engine = ProgressionEngine::new(
            backend,
            AchievementCatalog::default(),
            StoreOptions::default(),
            Arc::new(SystemClock),
        );

        engine.assign_mentor("tom", "mia", "admin").await.unwrap();
        let result = engine
            .award("mia", 100, XpReason::new(XpEventKind::Course, "course"))
            .await
            .unwrap();
        assert_eq!(result.new_total_xp, 100);

        let tom = engine.get_user_stats("tom").await.unwrap();
        assert_eq!(tom.total_xp, 10);
        assert!(engine.xp_history("tom").await.unwrap().is_empty());
        assert!(engine.verify_ledger("tom").await.unwrap().consistent);

        assert!(engine.run_integrity_validate().await.unwrap().is_valid);
    }
}
