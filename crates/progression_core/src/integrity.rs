//! crates/progression_core/src/integrity.rs
//!
//! The Integrity Sweep. The backing store enforces no foreign keys, so after
//! users or courses are deleted, teams, groups, mentorship pairings and
//! progress rows may point at records that no longer exist. `validate` reports
//! those dangling references; `clean` repairs them.
//!
//! Collections are processed in the order teams, groups, mentorships, progress.

use crate::domain::{
    Course, MentorshipPairing, Record, Team, UserGroup, UserProfile, UserProgress,
};
use crate::ports::{CollectionStore, PortResult};
use crate::store::{RecordStore, StoreOptions};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Result of a read-only integrity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
}

/// Result of a repair run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub teams_fixed: usize,
    pub groups_fixed: usize,
    pub pairings_removed: usize,
    pub progress_removed: usize,
    pub fixes: Vec<String>,
}

impl MigrationReport {
    pub fn total_fixes(&self) -> usize {
        self.teams_fixed + self.groups_fixed + self.pairings_removed + self.progress_removed
    }
}

/// A record holding a list of user ids.
trait MemberList: Record {
    const LABEL: &'static str;

    fn members(&self) -> &[String];
    fn members_mut(&mut self) -> &mut Vec<String>;
}

impl MemberList for Team {
    const LABEL: &'static str = "Team";

    fn members(&self) -> &[String] {
        &self.member_ids
    }

    fn members_mut(&mut self) -> &mut Vec<String> {
        &mut self.member_ids
    }
}

impl MemberList for UserGroup {
    const LABEL: &'static str = "Group";

    fn members(&self) -> &[String] {
        &self.member_ids
    }

    fn members_mut(&mut self) -> &mut Vec<String> {
        &mut self.member_ids
    }
}

/// The ids that references are allowed to point at.
struct KnownIds {
    users: HashSet<String>,
    courses: HashSet<String>,
}

pub struct IntegritySweep {
    profiles: RecordStore<UserProfile>,
    courses: RecordStore<Course>,
    teams: RecordStore<Team>,
    groups: RecordStore<UserGroup>,
    pairings: RecordStore<MentorshipPairing>,
    progress: RecordStore<UserProgress>,
    exclusive: Mutex<()>,
}

impl IntegritySweep {
    pub fn new(backend: Arc<dyn CollectionStore>, options: StoreOptions) -> Self {
        Self {
            profiles: RecordStore::new(backend.clone(), options),
            courses: RecordStore::new(backend.clone(), options),
            teams: RecordStore::new(backend.clone(), options),
            groups: RecordStore::new(backend.clone(), options),
            pairings: RecordStore::new(backend.clone(), options),
            progress: RecordStore::new(backend, options),
            exclusive: Mutex::new(()),
        }
    }

    /// Lists every dangling reference without changing anything.
    pub async fn validate(&self) -> PortResult<ValidationReport> {
        let _guard = self.exclusive.lock().await;
        let known = self.known_ids().await?;
        let mut issues = Vec::new();

        member_issues(&self.teams.get_all().await?, &known.users, &mut issues);
        member_issues(&self.groups.get_all().await?, &known.users, &mut issues);

        for pairing in self.pairings.get_all().await? {
            for (role, id) in [("mentor", &pairing.mentor_id), ("mentee", &pairing.mentee_id)] {
                if !known.users.contains(id) {
                    issues.push(format!(
                        "Mentorship {} references unknown {} {}",
                        pairing.id, role, id
                    ));
                }
            }
        }

        for row in self.progress.get_all().await? {
            if !known.users.contains(&row.user_id) {
                issues.push(format!(
                    "Progress {} references unknown user {}",
                    row.id, row.user_id
                ));
            }
            if !known.courses.contains(&row.course_id) {
                issues.push(format!(
                    "Progress {} references unknown course {}",
                    row.id, row.course_id
                ));
            }
        }

        if issues.is_empty() {
            info!("Integrity validation passed");
        } else {
            warn!(count = issues.len(), "Integrity validation found dangling references");
        }
        Ok(ValidationReport {
            is_valid: issues.is_empty(),
            issues,
        })
    }

    /// Repairs every dangling reference. Member lists are filtered in place;
    /// pairings and progress rows with a dangling endpoint are deleted.
    pub async fn clean(&self) -> PortResult<MigrationReport> {
        let _guard = self.exclusive.lock().await;
        let known = self.known_ids().await?;
        let mut report = MigrationReport::default();

        report.teams_fixed = prune_members(&self.teams, &known.users, &mut report.fixes).await?;
        report.groups_fixed = prune_members(&self.groups, &known.users, &mut report.fixes).await?;

        for pairing in self.pairings.get_all().await? {
            if known.users.contains(&pairing.mentor_id) && known.users.contains(&pairing.mentee_id)
            {
                continue;
            }
            if self.pairings.delete(&pairing.id).await? {
                report.pairings_removed += 1;
                report.fixes.push(format!(
                    "Removed mentorship {} ({} -> {})",
                    pairing.id, pairing.mentor_id, pairing.mentee_id
                ));
            }
        }

        for row in self.progress.get_all().await? {
            if known.users.contains(&row.user_id) && known.courses.contains(&row.course_id) {
                continue;
            }
            if self.progress.delete(&row.id).await? {
                report.progress_removed += 1;
                report.fixes.push(format!(
                    "Removed progress {} (user {}, course {})",
                    row.id, row.user_id, row.course_id
                ));
            }
        }

        info!(
            teams = report.teams_fixed,
            groups = report.groups_fixed,
            pairings = report.pairings_removed,
            progress = report.progress_removed,
            "Integrity clean finished"
        );
        Ok(report)
    }

    async fn known_ids(&self) -> PortResult<KnownIds> {
        let (profiles, courses) =
            futures::try_join!(self.profiles.get_all(), self.courses.get_all())?;
        Ok(KnownIds {
            users: profiles.into_iter().map(|p| p.id).collect(),
            courses: courses.into_iter().map(|c| c.id).collect(),
        })
    }
}

fn member_issues<T: MemberList>(records: &[T], users: &HashSet<String>, issues: &mut Vec<String>) {
    for record in records {
        for member in record.members() {
            if !users.contains(member) {
                issues.push(format!(
                    "{} {} references unknown user {}",
                    T::LABEL,
                    record.id(),
                    member
                ));
            }
        }
    }
}

/// Drops unknown member ids, keeping the order of the rest. Returns how many
/// records were rewritten.
async fn prune_members<T: MemberList>(
    store: &RecordStore<T>,
    users: &HashSet<String>,
    fixes: &mut Vec<String>,
) -> PortResult<usize> {
    let mut fixed = 0;
    for record in store.get_all().await? {
        let dangling = record
            .members()
            .iter()
            .filter(|m| !users.contains(*m))
            .count();
        if dangling == 0 {
            continue;
        }
        store
            .update_with(record.id(), |r| r.members_mut().retain(|m| users.contains(m)))
            .await?;
        fixed += 1;
        fixes.push(format!(
            "{} {}: removed {} unknown member(s)",
            T::LABEL,
            record.id(),
            dangling
        ));
    }
    Ok(fixed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCollectionStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn seeded() -> (Arc<InMemoryCollectionStore>, IntegritySweep) {
        let backend = Arc::new(InMemoryCollectionStore::new());
        backend
            .seed("user-profiles", vec![json!({"id": "ana"}), json!({"id": "ben"})])
            .await;
        backend.seed("courses", vec![json!({"id": "rust-101"})]).await;
        backend
            .seed(
                "teams",
                vec![
                    json!({"id": "t1", "name": "Crabs", "memberIds": ["ghost", "ana", "gone", "ben"]}),
                    json!({"id": "t2", "name": "Clean", "memberIds": ["ana"]}),
                ],
            )
            .await;
        backend
            .seed(
                "user-groups",
                vec![json!({"id": "g1", "memberIds": ["ben", "ghost"]})],
            )
            .await;
        backend
            .seed(
                "mentorship-pairings",
                vec![
                    json!({"id": "p1", "mentorId": "ana", "menteeId": "ben", "assignedAt": 0,
                           "assignedBy": "admin", "status": "active"}),
                    json!({"id": "p2", "mentorId": "ghost", "menteeId": "ben", "assignedAt": 0,
                           "assignedBy": "admin", "status": "removed"}),
                ],
            )
            .await;
        backend
            .seed(
                "user-progress",
                vec![
                    json!({"id": "r1", "userId": "ana", "courseId": "rust-101", "percent": 40}),
                    json!({"id": "r2", "userId": "ana", "courseId": "deleted-course"}),
                    json!({"id": "r3", "userId": "ghost", "courseId": "rust-101"}),
                ],
            )
            .await;
        let sweep = IntegritySweep::new(backend.clone(), StoreOptions::default());
        (backend, sweep)
    }

    #[tokio::test]
    async fn validate_reports_without_mutating() {
        let (backend, sweep) = seeded().await;
        let before = backend.load("teams").await.unwrap().version;

        let report = sweep.validate().await.unwrap();
        assert!(!report.is_valid);
        assert_eq!(
            report.issues,
            vec![
                "Team t1 references unknown user ghost",
                "Team t1 references unknown user gone",
                "Group g1 references unknown user ghost",
                "Mentorship p2 references unknown mentor ghost",
                "Progress r2 references unknown course deleted-course",
                "Progress r3 references unknown user ghost",
            ]
        );
        assert_eq!(backend.load("teams").await.unwrap().version, before);
    }

    #[tokio::test]
    async fn clean_repairs_and_is_idempotent() {
        let (backend, sweep) = seeded().await;

        let first = sweep.clean().await.unwrap();
        assert_eq!(first.teams_fixed, 1);
        assert_eq!(first.groups_fixed, 1);
        assert_eq!(first.pairings_removed, 1);
        assert_eq!(first.progress_removed, 2);
        assert_eq!(first.total_fixes(), 5);

        let second = sweep.clean().await.unwrap();
        assert_eq!(second.total_fixes(), 0);
        assert!(second.fixes.is_empty());

        let report = sweep.validate().await.unwrap();
        assert!(report.is_valid, "{:?}", report.issues);

        let teams = backend.load("teams").await.unwrap().records;
        assert_eq!(
            teams[0],
            json!({"id": "t1", "name": "Crabs", "memberIds": ["ana", "ben"]})
        );
        let progress = backend.load("user-progress").await.unwrap().records;
        assert_eq!(
            progress,
            vec![json!({"id": "r1", "userId": "ana", "courseId": "rust-101", "percent": 40})]
        );
    }

    #[tokio::test]
    async fn empty_store_is_valid() {
        let sweep = IntegritySweep::new(
            Arc::new(InMemoryCollectionStore::new()),
            StoreOptions::default(),
        );
        assert!(sweep.validate().await.unwrap().is_valid);
        assert_eq!(sweep.clean().await.unwrap(), MigrationReport::default());
    }
}
