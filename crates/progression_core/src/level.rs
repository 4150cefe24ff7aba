//! crates/progression_core/src/level.rs
//!
//! The level curve. `threshold(L)` is the cumulative XP needed to reach level
//! `L`; `level_from_xp` is its inverse and the only place levels are derived.
//!
//! - levels 2..=5 grow geometrically: `floor(100 * 1.5^(L-1))`
//! - levels 6..=20 add 200 XP each on top of level 5
//! - levels past 20 add 500 XP each on top of level 20

const GEOMETRIC_LAST: u32 = 5;
const LINEAR_LAST: u32 = 20;
const LINEAR_STEP: i64 = 200;
const LATE_STEP: i64 = 500;

/// `floor(100 * 1.5^k)` in exact integer arithmetic.
const fn geometric(k: u32) -> i64 {
    100 * 3i64.pow(k) / 2i64.pow(k)
}

const T5: i64 = geometric(GEOMETRIC_LAST - 1);
const T20: i64 = T5 + (LINEAR_LAST - GEOMETRIC_LAST) as i64 * LINEAR_STEP;

/// Cumulative XP required to reach `level`. Levels 0 and 1 need nothing.
pub fn threshold(level: u32) -> i64 {
    match level {
        0 | 1 => 0,
        2..=GEOMETRIC_LAST => geometric(level - 1),
        6..=LINEAR_LAST => T5 + (level - GEOMETRIC_LAST) as i64 * LINEAR_STEP,
        _ => T20 + (level - LINEAR_LAST) as i64 * LATE_STEP,
    }
}

/// The largest level whose threshold does not exceed `xp`. Never below 1,
/// and clamped to `u32::MAX` for totals past the last representable level.
pub fn level_from_xp(xp: i64) -> u32 {
    if xp >= T20 {
        let late_levels = u32::try_from((xp - T20) / LATE_STEP).unwrap_or(u32::MAX);
        return LINEAR_LAST.saturating_add(late_levels);
    }
    if xp >= T5 {
        return GEOMETRIC_LAST + ((xp - T5) / LINEAR_STEP) as u32;
    }
    (2..GEOMETRIC_LAST)
        .rev()
        .find(|&level| threshold(level) <= xp)
        .unwrap_or(1)
}

/// XP still missing before the next level. Zero at the level cap.
pub fn xp_for_next_level(xp: i64) -> i64 {
    match level_from_xp(xp) {
        u32::MAX => 0,
        level => threshold(level + 1) - xp.max(0),
    }
}

/// Fraction of the current level already completed, in `[0, 1)`.
pub fn level_progress(xp: i64) -> f64 {
    let level = level_from_xp(xp);
    if level == u32::MAX {
        return 0.0;
    }
    let floor = threshold(level);
    let span = threshold(level + 1) - floor;
    (xp.max(0) - floor) as f64 / span as f64
}
