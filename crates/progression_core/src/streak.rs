//! crates/progression_core/src/streak.rs
//!
//! Daily activity streaks. Days are UTC calendar days.

use crate::domain::UserStats;
use crate::ledger::{require_user, ProgressionLedger};
use crate::ports::PortResult;
use crate::store::Mutation;
use chrono::{DateTime, TimeZone, Utc};
use tracing::info;

/// The streak after activity at `now`, or `None` when today already counted.
///
/// A zero-day difference is normally a no-op. The exception is a user with no
/// streak yet: they start at 1 even if they were active earlier the same day,
/// because an XP award also stamps `lastActivityDate`.
pub fn next_streak(stats: &UserStats, now: DateTime<Utc>) -> Option<u32> {
    let last = stats
        .last_activity_date
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single());
    let Some(last) = last else {
        return Some(1);
    };

    match (now.date_naive() - last.date_naive()).num_days() {
        0 if stats.current_streak > 0 => None,
        0 => Some(1),
        1 => Some(stats.current_streak + 1),
        _ => Some(1),
    }
}

impl ProgressionLedger {
    /// Counts today's activity towards the user's streak and returns the streak.
    pub async fn touch_streak(&self, user_id: &str) -> PortResult<u32> {
        require_user(user_id)?;
        let now = self.clock.now();

        let (streak, changed) = self
            .stats
            .mutate(|records| {
                let index = match records.iter().position(|s| s.user_id == user_id) {
                    Some(index) => index,
                    None => {
                        records.push(UserStats::new(user_id));
                        records.len() - 1
                    }
                };
                let stats = &mut records[index];
                match next_streak(stats, now) {
                    None => Ok(Mutation::Unchanged((stats.current_streak, false))),
                    Some(streak) => {
                        stats.current_streak = streak;
                        stats.longest_streak = stats.longest_streak.max(streak);
                        stats.last_activity_date = Some(now.timestamp_millis());
                        Ok(Mutation::Commit((streak, true)))
                    }
                }
            })
            .await?;

        if changed {
            info!(user_id, streak, "Streak updated");
            let stats = self.get_user_stats(user_id).await?;
            self.unlock(user_id, &stats).await?;
        }
        Ok(streak)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{XpEventKind, XpReason};
    use crate::ledger::tests::fixture;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn same_day_touches_count_once() {
        let f = fixture();
        assert_eq!(f.ledger.touch_streak("ana").await.unwrap(), 1);
        f.clock.advance(Duration::hours(3));
        assert_eq!(f.ledger.touch_streak("ana").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn consecutive_days_extend_and_gaps_reset() {
        let f = fixture();
        f.ledger.touch_streak("ana").await.unwrap();
        f.clock.advance(Duration::days(1));
        assert_eq!(f.ledger.touch_streak("ana").await.unwrap(), 2);
        f.clock.advance(Duration::days(1));
        assert_eq!(f.ledger.touch_streak("ana").await.unwrap(), 3);

        f.clock.advance(Duration::days(3));
        assert_eq!(f.ledger.touch_streak("ana").await.unwrap(), 1);

        let stats = f.ledger.get_user_stats("ana").await.unwrap();
        assert_eq!(stats.current_streak, 1);
        assert_eq!(stats.longest_streak, 3);
    }

    #[tokio::test]
    async fn clock_skew_resets_the_streak() {
        let f = fixture();
        f.ledger.touch_streak("ana").await.unwrap();
        f.clock.advance(Duration::days(1));
        f.ledger.touch_streak("ana").await.unwrap();

        f.clock.advance(Duration::days(-3));
        assert_eq!(f.ledger.touch_streak("ana").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_day_touch_starts_a_zero_streak_instead_of_no_op() {
        let f = fixture();
        f.ledger
            .award("ana", 10, XpReason::new(XpEventKind::Lesson, "warmup"))
            .await
            .unwrap();
        assert_eq!(f.ledger.touch_streak("ana").await.unwrap(), 1);
        assert_eq!(f.ledger.touch_streak("ana").await.unwrap(), 1);
    }

    #[test]
    fn day_boundary_is_calendar_based() {
        let mut stats = UserStats::new("ana");
        stats.current_streak = 4;
        stats.last_activity_date = Some(
            Utc.with_ymd_and_hms(2026, 3, 1, 23, 50, 0)
                .unwrap()
                .timestamp_millis(),
        );
        let just_after_midnight = Utc.with_ymd_and_hms(2026, 3, 2, 0, 5, 0).unwrap();
        assert_eq!(next_streak(&stats, just_after_midnight), Some(5));
    }
}
