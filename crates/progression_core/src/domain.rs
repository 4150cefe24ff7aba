//! crates/progression_core/src/domain.rs
//!
//! Defines the core data structures of the progression engine.
//! Every persisted entity is a `Record`: a uniquely-`id`ed value living in a
//! named collection. The JSON field names match the stored collection format.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

//=========================================================================================
// Record Contracts
//=========================================================================================

/// A domain entity with a unique string id within its collection.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The name of the collection this record type lives in.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

/// A record that belongs to a single user.
pub trait OwnedRecord: Record {
    fn user_id(&self) -> &str;
}

macro_rules! impl_record {
    ($ty:ty, $collection:literal) => {
        impl Record for $ty {
            const COLLECTION: &'static str = $collection;

            fn id(&self) -> &str {
                &self.id
            }
        }
    };
    ($ty:ty, $collection:literal, owned) => {
        impl_record!($ty, $collection);

        impl OwnedRecord for $ty {
            fn user_id(&self) -> &str {
                &self.user_id
            }
        }
    };
}

//=========================================================================================
// Progression Records
//=========================================================================================

/// Per-user progression state. The record id is the user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserStats {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "totalXP")]
    pub total_xp: i64,
    pub level: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    /// Epoch millis of the last XP award or streak touch.
    pub last_activity_date: Option<i64>,
    pub total_courses_completed: u32,
    pub total_modules_completed: u32,
    pub total_assessments_passed: u32,
    pub average_score: f64,
    pub unlocked_achievements: Vec<String>,
    /// XP credited through the mentor bonus path, which writes no ledger entry.
    #[serde(rename = "bonusXP")]
    pub bonus_xp: i64,
}

impl UserStats {
    /// Zero-valued stats for a user who has never been seen before.
    pub fn new(user_id: &str) -> Self {
        Self {
            id: user_id.to_string(),
            user_id: user_id.to_string(),
            ..Self::default()
        }
    }
}

impl Default for UserStats {
    fn default() -> Self {
        Self {
            id: String::new(),
            user_id: String::new(),
            total_xp: 0,
            level: 1,
            current_streak: 0,
            longest_streak: 0,
            last_activity_date: None,
            total_courses_completed: 0,
            total_modules_completed: 0,
            total_assessments_passed: 0,
            average_score: 0.0,
            unlocked_achievements: Vec::new(),
            bonus_xp: 0,
        }
    }
}

impl_record!(UserStats, "user-stats", owned);

/// Marks that a user has unlocked an achievement. Created once, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAchievement {
    pub id: String,
    pub user_id: String,
    pub achievement_id: String,
    pub unlocked_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

impl UserAchievement {
    /// Deterministic id so a `(user, achievement)` pair can only ever map to one record.
    pub fn record_id(user_id: &str, achievement_id: &str) -> String {
        format!("{}:{}", user_id, achievement_id)
    }
}

impl_record!(UserAchievement, "user-achievements", owned);

/// What kind of activity granted an XP event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XpEventKind {
    Lesson,
    Module,
    Course,
    Assessment,
    Streak,
    Achievement,
    Bonus,
    Manual,
}

/// An append-only ledger entry. Created, never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XpEvent {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: XpEventKind,
    pub amount: i64,
    pub timestamp: i64,
    pub label: String,
}

impl_record!(XpEvent, "xp-events", owned);

/// The reason attached to an XP award.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpReason {
    pub kind: XpEventKind,
    pub label: String,
}

impl XpReason {
    pub fn new(kind: XpEventKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairingStatus {
    Active,
    Removed,
}

/// A mentor/mentee relationship. Soft-deleted through `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MentorshipPairing {
    pub id: String,
    pub mentor_id: String,
    pub mentee_id: String,
    pub assigned_at: i64,
    pub assigned_by: String,
    pub status: PairingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<i64>,
}

impl MentorshipPairing {
    pub fn is_active(&self) -> bool {
        self.status == PairingStatus::Active
    }
}

impl_record!(MentorshipPairing, "mentorship-pairings");

//=========================================================================================
// Referenced Collections (owned by other parts of the platform)
//=========================================================================================

/// A user profile. Only its id matters to this engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl_record!(UserProfile, "user-profiles");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl_record!(Course, "courses");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl_record!(Team, "teams");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGroup {
    pub id: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl_record!(UserGroup, "user-groups");

/// A user's progress through one course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl_record!(UserProgress, "user-progress", owned);

//=========================================================================================
// Achievement Catalog
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AchievementCategory {
    Progress,
    Streak,
    Learning,
    Mastery,
    Social,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AchievementTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

/// A counter on `UserStats` that a rule can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountMetric {
    CoursesCompleted,
    ModulesCompleted,
    AssessmentsPassed,
}

/// A closed set of unlock conditions, evaluated by `achievements::evaluate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnlockRule {
    XpAtLeast { xp: i64 },
    LevelAtLeast { level: u32 },
    StreakAtLeast { days: u32 },
    LongestStreakAtLeast { days: u32 },
    CountAtLeast { metric: CountMetric, value: u32 },
    AverageScoreAtLeast { score: f64, min_assessments: u32 },
    All { rules: Vec<UnlockRule> },
    Any { rules: Vec<UnlockRule> },
}

/// A static achievement definition supplied by configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: AchievementCategory,
    pub tier: AchievementTier,
    pub unlock_rule: UnlockRule,
    #[serde(default)]
    pub hidden: bool,
}

//=========================================================================================
// Operation Results
//=========================================================================================

/// An achievement unlocked by the current operation, for the caller to announce.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockedAchievement {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: AchievementCategory,
    pub tier: AchievementTier,
    pub unlocked_at: i64,
}

/// XP credited to a mentor because their mentee earned XP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MentorBonus {
    pub mentor_id: String,
    pub bonus: i64,
}

/// Facts produced by one XP award.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardResult {
    #[serde(rename = "newTotalXP")]
    pub new_total_xp: i64,
    pub new_level: u32,
    pub leveled_up: bool,
    pub previous_level: u32,
    pub unlocked: Vec<UnlockedAchievement>,
    pub mentor_bonus: Option<MentorBonus>,
}

/// A non-XP activity that moves a `UserStats` counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activity {
    CourseCompleted,
    ModuleCompleted,
    AssessmentPassed { score: f64 },
}
