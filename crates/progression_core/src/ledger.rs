//! crates/progression_core/src/ledger.rs
//!
//! The Progression Ledger: XP awards, level derivation and activity counters.
//!
//! The `xp-events` collection is the authoritative history. `UserStats.totalXP`
//! is a cached projection of it (plus mentor bonuses, which have no events),
//! and `verify`/`rebuild_total` compare and repair the two.

use crate::achievements::AchievementUnlocker;
use crate::domain::{
    Activity, AwardResult, UnlockedAchievement, UserStats, XpEvent, XpReason,
};
use crate::level::level_from_xp;
use crate::ports::{Clock, PortError, PortResult};
use crate::rewards::RewardPropagator;
use crate::store::RecordStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Outcome of recording a non-XP activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResult {
    pub stats: UserStats,
    pub unlocked: Vec<UnlockedAchievement>,
}

/// Comparison of the cached total against the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerCheck {
    pub stored_total: i64,
    pub ledger_total: i64,
    pub bonus_total: i64,
    pub consistent: bool,
}

#[derive(Clone)]
pub struct ProgressionLedger {
    pub(crate) stats: RecordStore<UserStats>,
    events: RecordStore<XpEvent>,
    unlocker: AchievementUnlocker,
    propagator: RewardPropagator,
    pub(crate) clock: Arc<dyn Clock>,
}

impl ProgressionLedger {
    pub fn new(
        stats: RecordStore<UserStats>,
        events: RecordStore<XpEvent>,
        unlocker: AchievementUnlocker,
        propagator: RewardPropagator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            stats,
            events,
            unlocker,
            propagator,
            clock,
        }
    }

    pub fn unlocker(&self) -> &AchievementUnlocker {
        &self.unlocker
    }

    /// Returns the user's stats, creating zero-valued stats on first read.
    pub async fn get_user_stats(&self, user_id: &str) -> PortResult<UserStats> {
        require_user(user_id)?;
        if let Some(stats) = self.stats.get_by_id(user_id).await? {
            return Ok(stats);
        }
        self.stats
            .upsert_with(user_id, || UserStats::new(user_id), |stats| stats.clone())
            .await
    }

    /// Awards XP, recomputes the level, runs achievement checks and pays the
    /// mentor bonus. Negative amounts are accepted and recorded as-is; an
    /// amount that would overflow the user's total is rejected before anything
    /// is written.
    ///
    /// The event is appended before the cached total moves. If the stats write
    /// then fails (conflict retries exhausted, timeout), the event stays and the
    /// call errors, so a blind retry counts the award twice in the ledger.
    /// `verify` surfaces that drift and `rebuild_total` repairs the cache.
    pub async fn award(
        &self,
        user_id: &str,
        amount: i64,
        reason: XpReason,
    ) -> PortResult<AwardResult> {
        require_user(user_id)?;
        let now = self.clock.now_millis();

        let current = self.stats.get_by_id(user_id).await?.map_or(0, |s| s.total_xp);
        add_xp(user_id, current, amount)?;

        self.events
            .create(XpEvent {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                kind: reason.kind,
                amount,
                timestamp: now,
                label: reason.label.clone(),
            })
            .await?;

        let (previous_level, updated) = self
            .stats
            .try_upsert_with(
                user_id,
                || UserStats::new(user_id),
                |stats| {
                    let previous_level = stats.level;
                    stats.total_xp = add_xp(user_id, stats.total_xp, amount)?;
                    stats.level = level_from_xp(stats.total_xp);
                    stats.last_activity_date = Some(now);
                    Ok((previous_level, stats.clone()))
                },
            )
            .await?;

        let leveled_up = updated.level > previous_level;
        info!(
            user_id,
            amount,
            reason = %reason.label,
            total_xp = updated.total_xp,
            level = updated.level,
            "XP awarded"
        );
        if leveled_up {
            info!(user_id, from = previous_level, to = updated.level, "Level up");
        }

        let unlocked = self.unlock(user_id, &updated).await?;
        let mentor_bonus = self.propagator.propagate(user_id, amount).await?;

        Ok(AwardResult {
            new_total_xp: updated.total_xp,
            new_level: updated.level,
            leveled_up,
            previous_level,
            unlocked,
            mentor_bonus,
        })
    }

    /// Moves the counter matching `activity` and runs achievement checks.
    pub async fn record_activity(
        &self,
        user_id: &str,
        activity: Activity,
    ) -> PortResult<ActivityResult> {
        require_user(user_id)?;
        if let Activity::AssessmentPassed { score } = activity {
            if !score.is_finite() || score < 0.0 {
                return Err(PortError::InvalidInput(format!(
                    "assessment score must be a non-negative number, got {}",
                    score
                )));
            }
        }

        let updated = self
            .stats
            .upsert_with(
                user_id,
                || UserStats::new(user_id),
                |stats| {
                    match activity {
                        Activity::CourseCompleted => stats.total_courses_completed += 1,
                        Activity::ModuleCompleted => stats.total_modules_completed += 1,
                        Activity::AssessmentPassed { score } => {
                            let passed = stats.total_assessments_passed as f64;
                            stats.average_score =
                                (stats.average_score * passed + score) / (passed + 1.0);
                            stats.total_assessments_passed += 1;
                        }
                    }
                    stats.clone()
                },
            )
            .await?;

        let unlocked = self.unlock(user_id, &updated).await?;
        let stats = if unlocked.is_empty() {
            updated
        } else {
            self.get_user_stats(user_id).await?
        };
        Ok(ActivityResult { stats, unlocked })
    }

    /// The user's XP events, newest first.
    pub async fn xp_history(&self, user_id: &str) -> PortResult<Vec<XpEvent>> {
        let mut events = self.events.get_by_user_id(user_id).await?;
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(events)
    }

    /// Compares the cached total with the ledger. Drift appears when a stats
    /// write failed after its event was appended, see `award`.
    pub async fn verify(&self, user_id: &str) -> PortResult<LedgerCheck> {
        let stats = self.get_user_stats(user_id).await?;
        let ledger_total = self.ledger_total(user_id).await?;
        Ok(check(&stats, ledger_total))
    }

    /// Rewrites the cached total and level from the ledger plus mentor bonuses.
    pub async fn rebuild_total(&self, user_id: &str) -> PortResult<LedgerCheck> {
        require_user(user_id)?;
        let ledger_total = self.ledger_total(user_id).await?;
        let rebuilt = self
            .stats
            .try_upsert_with(
                user_id,
                || UserStats::new(user_id),
                |stats| {
                    stats.total_xp = add_xp(user_id, ledger_total, stats.bonus_xp)?;
                    stats.level = level_from_xp(stats.total_xp);
                    Ok(stats.clone())
                },
            )
            .await?;
        info!(user_id, total_xp = rebuilt.total_xp, "Total XP rebuilt from ledger");
        Ok(check(&rebuilt, ledger_total))
    }

    async fn ledger_total(&self, user_id: &str) -> PortResult<i64> {
        self.events
            .get_by_user_id(user_id)
            .await?
            .iter()
            .try_fold(0i64, |total, e| add_xp(user_id, total, e.amount))
    }

    /// Runs the unlocker and mirrors new unlock ids into the user's stats.
    pub(crate) async fn unlock(
        &self,
        user_id: &str,
        stats: &UserStats,
    ) -> PortResult<Vec<UnlockedAchievement>> {
        let unlocked = self.unlocker.check_and_unlock(user_id, stats).await?;
        if !unlocked.is_empty() {
            self.stats
                .update_with(user_id, |stats| {
                    for achievement in &unlocked {
                        if !stats.unlocked_achievements.contains(&achievement.id) {
                            stats.unlocked_achievements.push(achievement.id.clone());
                        }
                    }
                })
                .await?;
        }
        Ok(unlocked)
    }
}

fn check(stats: &UserStats, ledger_total: i64) -> LedgerCheck {
    LedgerCheck {
        stored_total: stats.total_xp,
        ledger_total,
        bonus_total: stats.bonus_xp,
        consistent: ledger_total.checked_add(stats.bonus_xp) == Some(stats.total_xp),
    }
}

/// `total + amount`, or `InvalidInput` when the sum leaves the `i64` range.
pub(crate) fn add_xp(user_id: &str, total: i64, amount: i64) -> PortResult<i64> {
    total.checked_add(amount).ok_or_else(|| {
        PortError::InvalidInput(format!(
            "awarding {} XP to {} would overflow its total of {}",
            amount, user_id, total
        ))
    })
}

pub(crate) fn require_user(user_id: &str) -> PortResult<()> {
    if user_id.trim().is_empty() {
        return Err(PortError::InvalidInput("user id must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::achievements::AchievementCatalog;
    use crate::domain::{MentorshipPairing, PairingStatus, Record, XpEventKind};
    use crate::memory::InMemoryCollectionStore;
    use crate::ports::{CollectionStore, ManualClock, Snapshot};
    use crate::store::StoreOptions;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    const CATALOG: &str = r#"[
        {"id": "level-2", "name": "Moving Up", "category": "progress", "tier": "bronze",
         "unlockRule": {"type": "level_at_least", "level": 2}},
        {"id": "graduate", "name": "Graduate", "category": "learning", "tier": "silver",
         "unlockRule": {"type": "count_at_least", "metric": "courses_completed", "value": 1}}
    ]"#;

    pub(crate) struct Fixture {
        pub backend: Arc<InMemoryCollectionStore>,
        pub clock: Arc<ManualClock>,
        pub ledger: ProgressionLedger,
    }

    pub(crate) fn fixture() -> Fixture {
        let backend = Arc::new(InMemoryCollectionStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        ));
        let ledger = ledger_over(backend.clone(), clock.clone());
        Fixture {
            backend,
            clock,
            ledger,
        }
    }

    fn ledger_over(
        backend: Arc<dyn CollectionStore>,
        clock: Arc<ManualClock>,
    ) -> ProgressionLedger {
        let options = StoreOptions::default();
        let stats = RecordStore::new(backend.clone(), options);
        let unlocker = AchievementUnlocker::new(
            RecordStore::new(backend.clone(), options),
            Arc::new(AchievementCatalog::from_json(CATALOG).unwrap()),
            clock.clone(),
        );
        let propagator =
            RewardPropagator::new(RecordStore::new(backend.clone(), options), stats.clone());
        ProgressionLedger::new(
            stats,
            RecordStore::new(backend, options),
            unlocker,
            propagator,
            clock,
        )
    }

    /// Rejects writes to the stats collection while `down` is set.
    struct StatsOutage {
        inner: InMemoryCollectionStore,
        down: AtomicBool,
    }

    #[async_trait]
    impl CollectionStore for StatsOutage {
        async fn load(&self, collection: &str) -> PortResult<Snapshot> {
            self.inner.load(collection).await
        }

        async fn replace(
            &self,
            collection: &str,
            records: Vec<Value>,
            expected: u64,
        ) -> PortResult<u64> {
            if collection == UserStats::COLLECTION && self.down.load(Ordering::SeqCst) {
                return Err(PortError::StoreUnavailable("stats offline".to_string()));
            }
            self.inner.replace(collection, records, expected).await
        }
    }

    fn lesson(label: &str) -> XpReason {
        XpReason::new(XpEventKind::Lesson, label)
    }

    #[tokio::test]
    async fn stats_are_created_on_first_read() {
        let f = fixture();
        let stats = f.ledger.get_user_stats("ana").await.unwrap();
        assert_eq!(stats, UserStats::new("ana"));
        assert_eq!(stats.level, 1);
        assert_eq!(f.ledger.stats.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn awards_walk_the_level_curve() {
        let f = fixture();

        let first = f.ledger.award("ana", 150, lesson("lesson")).await.unwrap();
        assert_eq!(first.new_total_xp, 150);
        assert_eq!(first.new_level, 2);
        assert!(first.leveled_up);
        assert_eq!(first.previous_level, 1);
        assert_eq!(first.unlocked.len(), 1);
        assert_eq!(first.unlocked[0].id, "level-2");

        let second = f.ledger.award("ana", 74, lesson("quiz")).await.unwrap();
        assert_eq!(second.new_total_xp, 224);
        assert_eq!(second.new_level, 2);
        assert!(!second.leveled_up);
        assert!(second.unlocked.is_empty());

        let third = f.ledger.award("ana", 1, lesson("quiz")).await.unwrap();
        assert_eq!(third.new_total_xp, 225);
        assert_eq!(third.new_level, 3);
        assert!(third.leveled_up);

        let stats = f.ledger.get_user_stats("ana").await.unwrap();
        assert_eq!(stats.unlocked_achievements, vec!["level-2".to_string()]);
        assert_eq!(stats.last_activity_date, Some(f.clock.now_millis()));
    }

    #[tokio::test]
    async fn every_award_appends_one_event() {
        let f = fixture();
        f.ledger.award("ana", 40, lesson("a")).await.unwrap();
        f.clock.advance(chrono::Duration::minutes(5));
        f.ledger.award("ana", -10, lesson("correction")).await.unwrap();

        let history = f.ledger.xp_history("ana").await.unwrap();
        let amounts: Vec<_> = history.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![-10, 40]);

        let check = f.ledger.verify("ana").await.unwrap();
        assert!(check.consistent);
        assert_eq!(check.stored_total, 30);
    }

    #[tokio::test]
    async fn mentor_bonus_skips_ledger_and_level() {
        let f = fixture();
        f.ledger
            .stats
            .create(UserStats {
                total_xp: 145,
                ..UserStats::new("tom")
            })
            .await
            .unwrap();
        let pairings: RecordStore<MentorshipPairing> =
            RecordStore::new(f.backend.clone(), StoreOptions::default());
        pairings
            .create(MentorshipPairing {
                id: "p1".to_string(),
                mentor_id: "tom".to_string(),
                mentee_id: "mia".to_string(),
                assigned_at: 0,
                assigned_by: "admin".to_string(),
                status: PairingStatus::Active,
                removed_at: None,
            })
            .await
            .unwrap();

        let result = f
            .ledger
            .award("mia", 100, XpReason::new(XpEventKind::Course, "course"))
            .await
            .unwrap();
        assert_eq!(result.mentor_bonus.map(|b| b.bonus), Some(10));

        let tom = f.ledger.get_user_stats("tom").await.unwrap();
        assert_eq!(tom.total_xp, 155);
        assert_eq!(tom.level, 1);
        assert!(f.ledger.xp_history("tom").await.unwrap().is_empty());

        // The stale level is only corrected by tom's next direct award.
        let own = f.ledger.award("tom", 0, lesson("noop")).await.unwrap();
        assert!(own.leveled_up);
        assert_eq!(own.new_level, 2);
    }

    #[tokio::test]
    async fn drift_is_detected_and_rebuilt() {
        let f = fixture();
        f.ledger.award("ana", 100, lesson("a")).await.unwrap();
        f.ledger
            .stats
            .update_with("ana", |s| s.total_xp = 999)
            .await
            .unwrap();

        let check = f.ledger.verify("ana").await.unwrap();
        assert!(!check.consistent);
        assert_eq!(check.ledger_total, 100);

        let rebuilt = f.ledger.rebuild_total("ana").await.unwrap();
        assert!(rebuilt.consistent);
        assert_eq!(rebuilt.stored_total, 100);
        assert_eq!(f.ledger.get_user_stats("ana").await.unwrap().level, 1);
    }

    #[tokio::test]
    async fn failed_stats_write_leaves_the_event_and_rebuild_recovers() {
        let backend = Arc::new(StatsOutage {
            inner: InMemoryCollectionStore::new(),
            down: AtomicBool::new(true),
        });
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        ));
        let ledger = ledger_over(backend.clone(), clock);

        let err = ledger.award("ana", 50, lesson("a")).await.unwrap_err();
        assert!(matches!(err, PortError::StoreUnavailable(_)));
        assert_eq!(ledger.xp_history("ana").await.unwrap().len(), 1);

        backend.down.store(false, Ordering::SeqCst);
        let check = ledger.verify("ana").await.unwrap();
        assert!(!check.consistent);
        assert_eq!(check.ledger_total, 50);
        assert_eq!(check.stored_total, 0);

        let rebuilt = ledger.rebuild_total("ana").await.unwrap();
        assert!(rebuilt.consistent);
        assert_eq!(rebuilt.stored_total, 50);
    }

    #[tokio::test]
    async fn activities_move_counters_and_unlock() {
        let f = fixture();
        let result = f
            .ledger
            .record_activity("ana", Activity::CourseCompleted)
            .await
            .unwrap();
        assert_eq!(result.stats.total_courses_completed, 1);
        assert_eq!(result.unlocked[0].id, "graduate");
        assert_eq!(result.stats.unlocked_achievements, vec!["graduate".to_string()]);

        f.ledger
            .record_activity("ana", Activity::AssessmentPassed { score: 80.0 })
            .await
            .unwrap();
        let result = f
            .ledger
            .record_activity("ana", Activity::AssessmentPassed { score: 100.0 })
            .await
            .unwrap();
        assert_eq!(result.stats.total_assessments_passed, 2);
        assert_eq!(result.stats.average_score, 90.0);

        let err = f
            .ledger
            .record_activity("ana", Activity::AssessmentPassed { score: f64::NAN })
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn concurrent_awards_for_different_users_are_both_kept() {
        let f = fixture();
        let (a, b) = tokio::join!(
            f.ledger.award("ana", 50, lesson("a")),
            f.ledger.award("ben", 70, lesson("b")),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(f.ledger.get_user_stats("ana").await.unwrap().total_xp, 50);
        assert_eq!(f.ledger.get_user_stats("ben").await.unwrap().total_xp, 70);
    }

    #[tokio::test]
    async fn award_past_the_xp_range_is_rejected_without_an_event() {
        let f = fixture();
        let first = f.ledger.award("ana", i64::MAX, lesson("jackpot")).await.unwrap();
        assert_eq!(first.new_total_xp, i64::MAX);
        assert_eq!(first.new_level, u32::MAX);

        let err = f.ledger.award("ana", 1, lesson("one more")).await.unwrap_err();
        assert!(matches!(err, PortError::InvalidInput(_)));

        assert_eq!(f.ledger.xp_history("ana").await.unwrap().len(), 1);
        let check = f.ledger.verify("ana").await.unwrap();
        assert!(check.consistent);
        assert_eq!(check.stored_total, i64::MAX);
    }

    #[tokio::test]
    async fn overflowing_ledger_cannot_be_rebuilt() {
        let f = fixture();
        f.ledger.award("ana", i64::MAX, lesson("a")).await.unwrap();
        f.ledger
            .events
            .create(XpEvent {
                id: "stray".to_string(),
                user_id: "ana".to_string(),
                kind: XpEventKind::Manual,
                amount: 1,
                timestamp: 0,
                label: "stray".to_string(),
            })
            .await
            .unwrap();

        assert!(matches!(
            f.ledger.verify("ana").await,
            Err(PortError::InvalidInput(_))
        ));
        assert!(matches!(
            f.ledger.rebuild_total("ana").await,
            Err(PortError::InvalidInput(_))
        ));
        assert_eq!(f.ledger.get_user_stats("ana").await.unwrap().total_xp, i64::MAX);
    }

    #[tokio::test]
    async fn empty_user_id_is_rejected() {
        let f = fixture();
        assert!(matches!(
            f.ledger.award(" ", 10, lesson("a")).await,
            Err(PortError::InvalidInput(_))
        ));
    }
}
