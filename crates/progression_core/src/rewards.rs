//! crates/progression_core/src/rewards.rs
//!
//! Mentor bonus propagation. When a mentee earns XP, their active mentor is
//! credited a tenth of it through a side channel: only the stored total (and
//! the bonus accumulator) move. No ledger entry, no level recomputation and no
//! achievement check happen for the mentor.

use crate::domain::{MentorBonus, MentorshipPairing, UserStats};
use crate::ledger::add_xp;
use crate::ports::PortResult;
use crate::store::RecordStore;
use tracing::info;

/// Share of a mentee's award credited to the mentor, in percent.
pub const MENTOR_BONUS_PERCENT: i64 = 10;

/// `floor(xp * 0.1)`. Computed in 128 bits so no `i64` award can overflow.
pub fn mentor_bonus(xp_awarded: i64) -> i64 {
    let bonus = (i128::from(xp_awarded) * i128::from(MENTOR_BONUS_PERCENT)).div_euclid(100);
    bonus as i64
}

#[derive(Clone)]
pub struct RewardPropagator {
    pairings: RecordStore<MentorshipPairing>,
    stats: RecordStore<UserStats>,
}

impl RewardPropagator {
    pub fn new(pairings: RecordStore<MentorshipPairing>, stats: RecordStore<UserStats>) -> Self {
        Self { pairings, stats }
    }

    /// Credits the mentee's active mentor, if any. Only positive bonuses are paid.
    pub async fn propagate(
        &self,
        mentee_id: &str,
        xp_awarded: i64,
    ) -> PortResult<Option<MentorBonus>> {
        let pairing = self
            .pairings
            .find(|p| p.is_active() && p.mentee_id == mentee_id)
            .await?
            .into_iter()
            .next();
        let Some(pairing) = pairing else {
            return Ok(None);
        };

        let bonus = mentor_bonus(xp_awarded);
        if bonus <= 0 {
            return Ok(None);
        }

        let mentor_id = pairing.mentor_id;
        self.stats
            .try_upsert_with(
                &mentor_id,
                || UserStats::new(&mentor_id),
                |stats| {
                    stats.total_xp = add_xp(&mentor_id, stats.total_xp, bonus)?;
                    stats.bonus_xp = add_xp(&mentor_id, stats.bonus_xp, bonus)?;
                    Ok(())
                },
            )
            .await?;

        info!(mentor_id = %mentor_id, mentee_id, bonus, "Mentor bonus credited");
        Ok(Some(MentorBonus { mentor_id, bonus }))
    }
}
