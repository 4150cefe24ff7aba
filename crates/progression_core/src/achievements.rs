//! crates/progression_core/src/achievements.rs
//!
//! The achievement catalog, the interpreter for its unlock rules, and the
//! unlocker that persists newly qualifying achievements exactly once per user.

use crate::domain::{
    AchievementDefinition, CountMetric, UnlockRule, UnlockedAchievement, UserAchievement,
    UserStats,
};
use crate::ports::{Clock, PortError, PortResult};
use crate::store::{Mutation, RecordStore};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

//=========================================================================================
// Catalog
//=========================================================================================

/// The static set of achievement definitions, supplied by configuration.
#[derive(Debug, Clone, Default)]
pub struct AchievementCatalog {
    definitions: Vec<AchievementDefinition>,
}

impl AchievementCatalog {
    /// Builds a catalog, rejecting duplicate definition ids.
    pub fn new(definitions: Vec<AchievementDefinition>) -> PortResult<Self> {
        let mut seen = HashSet::new();
        for definition in &definitions {
            if !seen.insert(definition.id.as_str()) {
                return Err(PortError::InvalidInput(format!(
                    "duplicate achievement id '{}' in catalog",
                    definition.id
                )));
            }
        }
        Ok(Self { definitions })
    }

    /// Parses a JSON array of definitions.
    pub fn from_json(json: &str) -> PortResult<Self> {
        Self::new(serde_json::from_str(json)?)
    }

    /// Reads and parses a catalog file.
    pub fn load(path: impl AsRef<Path>) -> PortResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            PortError::InvalidInput(format!("cannot read catalog {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn definitions(&self) -> &[AchievementDefinition] {
        &self.definitions
    }

    pub fn get(&self, id: &str) -> Option<&AchievementDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

//=========================================================================================
// Rule Interpreter
//=========================================================================================

fn count(stats: &UserStats, metric: CountMetric) -> u32 {
    match metric {
        CountMetric::CoursesCompleted => stats.total_courses_completed,
        CountMetric::ModulesCompleted => stats.total_modules_completed,
        CountMetric::AssessmentsPassed => stats.total_assessments_passed,
    }
}

/// Whether `stats` satisfies `rule`. An empty `all` holds; an empty `any` does not.
pub fn evaluate(rule: &UnlockRule, stats: &UserStats) -> bool {
    match rule {
        UnlockRule::XpAtLeast { xp } => stats.total_xp >= *xp,
        UnlockRule::LevelAtLeast { level } => stats.level >= *level,
        UnlockRule::StreakAtLeast { days } => stats.current_streak >= *days,
        UnlockRule::LongestStreakAtLeast { days } => stats.longest_streak >= *days,
        UnlockRule::CountAtLeast { metric, value } => count(stats, *metric) >= *value,
        UnlockRule::AverageScoreAtLeast {
            score,
            min_assessments,
        } => stats.total_assessments_passed >= *min_assessments && stats.average_score >= *score,
        UnlockRule::All { rules } => rules.iter().all(|r| evaluate(r, stats)),
        UnlockRule::Any { rules } => rules.iter().any(|r| evaluate(r, stats)),
    }
}

fn ratio(have: f64, need: f64) -> f64 {
    if need <= 0.0 {
        1.0
    } else {
        (have / need).clamp(0.0, 1.0)
    }
}

/// How close `stats` is to satisfying `rule`, in `[0, 1]`.
pub fn progress(rule: &UnlockRule, stats: &UserStats) -> f64 {
    match rule {
        UnlockRule::XpAtLeast { xp } => ratio(stats.total_xp as f64, *xp as f64),
        UnlockRule::LevelAtLeast { level } => ratio(stats.level as f64, *level as f64),
        UnlockRule::StreakAtLeast { days } => ratio(stats.current_streak as f64, *days as f64),
        UnlockRule::LongestStreakAtLeast { days } => {
            ratio(stats.longest_streak as f64, *days as f64)
        }
        UnlockRule::CountAtLeast { metric, value } => {
            ratio(count(stats, *metric) as f64, *value as f64)
        }
        UnlockRule::AverageScoreAtLeast {
            score,
            min_assessments,
        } => ratio(
            stats.total_assessments_passed as f64,
            *min_assessments as f64,
        )
        .min(ratio(stats.average_score, *score)),
        UnlockRule::All { rules } => rules
            .iter()
            .map(|r| progress(r, stats))
            .fold(1.0, f64::min),
        UnlockRule::Any { rules } => rules
            .iter()
            .map(|r| progress(r, stats))
            .fold(0.0, f64::max),
    }
}

//=========================================================================================
// Unlocker
//=========================================================================================

/// One catalog entry as seen by a particular user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementProgress {
    pub id: String,
    pub name: String,
    pub unlocked: bool,
    pub unlocked_at: Option<i64>,
    pub progress: f64,
}

#[derive(Clone)]
pub struct AchievementUnlocker {
    store: RecordStore<UserAchievement>,
    catalog: Arc<AchievementCatalog>,
    clock: Arc<dyn Clock>,
}

impl AchievementUnlocker {
    pub fn new(
        store: RecordStore<UserAchievement>,
        catalog: Arc<AchievementCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
        }
    }

    pub fn catalog(&self) -> &AchievementCatalog {
        &self.catalog
    }

    /// Persists an unlock for every catalog entry `stats` now satisfies and the
    /// user does not already hold. Returns only the newly unlocked entries.
    pub async fn check_and_unlock(
        &self,
        user_id: &str,
        stats: &UserStats,
    ) -> PortResult<Vec<UnlockedAchievement>> {
        let qualifying: Vec<&AchievementDefinition> = self
            .catalog
            .definitions()
            .iter()
            .filter(|d| evaluate(&d.unlock_rule, stats))
            .collect();
        if qualifying.is_empty() {
            return Ok(Vec::new());
        }

        let now = self.clock.now_millis();
        let unlocked = self
            .store
            .mutate(|records| {
                let held: HashSet<&str> = records
                    .iter()
                    .filter(|r| r.user_id == user_id)
                    .map(|r| r.achievement_id.as_str())
                    .collect();
                let fresh: Vec<&AchievementDefinition> = qualifying
                    .iter()
                    .copied()
                    .filter(|d| !held.contains(d.id.as_str()))
                    .collect();
                if fresh.is_empty() {
                    return Ok(Mutation::Unchanged(Vec::new()));
                }

                let mut unlocked = Vec::with_capacity(fresh.len());
                for definition in fresh {
                    records.push(UserAchievement {
                        id: UserAchievement::record_id(user_id, &definition.id),
                        user_id: user_id.to_string(),
                        achievement_id: definition.id.clone(),
                        unlocked_at: now,
                        progress: Some(1.0),
                    });
                    unlocked.push(UnlockedAchievement {
                        id: definition.id.clone(),
                        name: definition.name.clone(),
                        description: definition.description.clone(),
                        category: definition.category,
                        tier: definition.tier,
                        unlocked_at: now,
                    });
                }
                Ok(Mutation::Commit(unlocked))
            })
            .await?;

        for achievement in &unlocked {
            info!(user_id, achievement = %achievement.id, "Achievement unlocked");
        }
        Ok(unlocked)
    }

    pub async fn list_unlocked(&self, user_id: &str) -> PortResult<Vec<UserAchievement>> {
        self.store.get_by_user_id(user_id).await
    }

    /// Every visible catalog entry with the user's progress towards it. Hidden
    /// entries only appear once unlocked.
    pub async fn progress_report(
        &self,
        user_id: &str,
        stats: &UserStats,
    ) -> PortResult<Vec<AchievementProgress>> {
        let held = self.list_unlocked(user_id).await?;
        Ok(self
            .catalog
            .definitions()
            .iter()
            .filter_map(|definition| {
                let unlock = held.iter().find(|h| h.achievement_id == definition.id);
                if definition.hidden && unlock.is_none() {
                    return None;
                }
                Some(AchievementProgress {
                    id: definition.id.clone(),
                    name: definition.name.clone(),
                    unlocked: unlock.is_some(),
                    unlocked_at: unlock.map(|u| u.unlocked_at),
                    progress: if unlock.is_some() {
                        1.0
                    } else {
                        progress(&definition.unlock_rule, stats)
                    },
                })
            })
            .collect())
    }
}
