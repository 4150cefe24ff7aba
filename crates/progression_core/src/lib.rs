pub mod achievements;
pub mod domain;
pub mod engine;
pub mod integrity;
pub mod ledger;
pub mod level;
pub mod memory;
pub mod mentorship;
pub mod ports;
pub mod rewards;
pub mod store;
pub mod streak;
mod user_store;

pub use achievements::{AchievementCatalog, AchievementProgress, AchievementUnlocker};
pub use domain::{
    AchievementDefinition, Activity, AwardResult, MentorBonus, MentorshipPairing, OwnedRecord,
    Record, UnlockRule, UnlockedAchievement, UserAchievement, UserStats, XpEvent, XpEventKind,
    XpReason,
};
pub use engine::ProgressionEngine;
pub use integrity::{IntegritySweep, MigrationReport, ValidationReport};
pub use ledger::{ActivityResult, LedgerCheck, ProgressionLedger};
pub use memory::InMemoryCollectionStore;
pub use ports::{Clock, CollectionStore, PortError, PortResult, Snapshot, SystemClock};
pub use store::{RecordStore, StoreOptions};
