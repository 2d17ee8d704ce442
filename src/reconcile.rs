//! Merges roster defaults with user overrides into one submission batch.
//!
//! The result is the same as laying the defaults down first, appending every
//! override in the order it happened, then walking the list backwards and
//! keeping the first entry seen for each student: the latest override wins,
//! any override beats a default, and untouched students stay `absent`.

use crate::roster::{AttendanceChoice, AttendanceEntry};
use crate::session::AttendanceSession;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

/// What to do with overrides for students that are not on the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownStudentPolicy {
    /// Carry them into the batch after the roster entries.
    #[default]
    PassThrough,
    /// Leave them out silently.
    Drop,
    /// Refuse to build a batch.
    Reject,
}

impl UnknownStudentPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            UnknownStudentPolicy::PassThrough => "passThrough",
            UnknownStudentPolicy::Drop => "drop",
            UnknownStudentPolicy::Reject => "reject",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passthrough" | "pass_through" => Some(UnknownStudentPolicy::PassThrough),
            "drop" => Some(UnknownStudentPolicy::Drop),
            "reject" => Some(UnknownStudentPolicy::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("overrides reference {} student(s) not on the roster", .0.len())]
    UnknownStudents(Vec<String>),
}

impl ReconcileError {
    pub fn code(&self) -> &'static str {
        match self {
            ReconcileError::UnknownStudents(_) => "unknown_students",
        }
    }
}

/// Exactly one entry per student: roster order first, then pass-through ids
/// in the order they were first overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledBatch {
    entries: Vec<AttendanceEntry>,
}

impl ReconciledBatch {
    pub fn entries(&self) -> &[AttendanceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, choice: AttendanceChoice) -> usize {
        self.entries.iter().filter(|e| e.choice == choice).count()
    }

    /// Hex SHA-256 over `id=choice` lines in batch order.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for e in &self.entries {
            hasher.update(e.student_id.as_bytes());
            hasher.update(b"=");
            hasher.update(e.choice.as_str().as_bytes());
            hasher.update(b"\n");
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

pub fn reconcile(
    defaults: &[AttendanceEntry],
    overrides: &[AttendanceEntry],
    policy: UnknownStudentPolicy,
) -> Result<ReconciledBatch, ReconcileError> {
    let mut entries: Vec<AttendanceEntry> = Vec::with_capacity(defaults.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(defaults.len());

    for d in defaults {
        match index.get(&d.student_id) {
            Some(&i) => entries[i].choice = d.choice,
            None => {
                index.insert(d.student_id.clone(), entries.len());
                entries.push(d.clone());
            }
        }
    }
    let roster_len = entries.len();

    let mut unknown: Vec<String> = Vec::new();
    for o in overrides {
        if let Some(&i) = index.get(&o.student_id) {
            entries[i].choice = o.choice;
            continue;
        }
        match policy {
            UnknownStudentPolicy::PassThrough => {
                index.insert(o.student_id.clone(), entries.len());
                entries.push(o.clone());
            }
            UnknownStudentPolicy::Drop => {}
            UnknownStudentPolicy::Reject => {
                if !unknown.contains(&o.student_id) {
                    unknown.push(o.student_id.clone());
                }
            }
        }
    }

    if !unknown.is_empty() {
        return Err(ReconcileError::UnknownStudents(unknown));
    }
    if entries.len() > roster_len {
        log::debug!(
            "event=reconcile_pass_through count={}",
            entries.len() - roster_len
        );
    }
    Ok(ReconciledBatch { entries })
}

pub fn reconcile_session(
    session: &AttendanceSession,
    policy: UnknownStudentPolicy,
) -> Result<ReconciledBatch, ReconcileError> {
    reconcile(
        session.current_defaults(),
        session.current_overrides(),
        policy,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::AttendanceChoice::{Absent, Present};
    use std::collections::HashSet;

    fn entry(id: &str, choice: AttendanceChoice) -> AttendanceEntry {
        AttendanceEntry::new(id, choice)
    }

    fn defaults(ids: &[&str]) -> Vec<AttendanceEntry> {
        ids.iter().map(|id| entry(id, Absent)).collect()
    }

    /// Literal reverse scan over defaults ++ raw override events.
    fn reverse_scan(
        defaults: &[AttendanceEntry],
        events: &[AttendanceEntry],
    ) -> HashMap<String, AttendanceChoice> {
        let combined: Vec<&AttendanceEntry> = defaults.iter().chain(events.iter()).collect();
        let mut out = HashMap::new();
        for e in combined.iter().rev() {
            out.entry(e.student_id.clone()).or_insert(e.choice);
        }
        out
    }

    fn choice_of(batch: &ReconciledBatch, student_id: &str) -> Option<AttendanceChoice> {
        batch
            .entries()
            .iter()
            .find(|e| e.student_id == student_id)
            .map(|e| e.choice)
    }

    fn as_map(batch: &ReconciledBatch) -> HashMap<String, AttendanceChoice> {
        batch
            .entries()
            .iter()
            .map(|e| (e.student_id.clone(), e.choice))
            .collect()
    }

    #[test]
    fn last_toggle_wins_and_untouched_stay_absent() {
        let batch = reconcile(
            &defaults(&["S1", "S2", "S3"]),
            &[entry("S1", Present), entry("S2", Present), entry("S1", Absent)],
            UnknownStudentPolicy::PassThrough,
        )
        .expect("reconcile");
        assert_eq!(
            batch.entries(),
            &[entry("S1", Absent), entry("S2", Present), entry("S3", Absent)]
        );
    }

    #[test]
    fn empty_overrides_yield_one_absent_per_student() {
        let batch = reconcile(&defaults(&["S1"]), &[], UnknownStudentPolicy::default())
            .expect("reconcile");
        assert_eq!(batch.entries(), &[entry("S1", Absent)]);

        let empty = reconcile(&[], &[], UnknownStudentPolicy::default()).expect("reconcile");
        assert!(empty.is_empty());
    }

    #[test]
    fn unknown_ids_follow_policy() {
        let d = defaults(&["S1"]);
        let o = [entry("S9", Present), entry("S1", Present), entry("S9", Absent)];

        let pass = reconcile(&d, &o, UnknownStudentPolicy::PassThrough).expect("pass");
        assert_eq!(pass.entries(), &[entry("S1", Present), entry("S9", Absent)]);

        let dropped = reconcile(&d, &o, UnknownStudentPolicy::Drop).expect("drop");
        assert_eq!(dropped.entries(), &[entry("S1", Present)]);

        let rejected = reconcile(&d, &o, UnknownStudentPolicy::Reject).expect_err("reject");
        assert_eq!(rejected, ReconcileError::UnknownStudents(vec!["S9".into()]));
        assert_eq!(rejected.code(), "unknown_students");
    }

    #[test]
    fn override_beats_default_whatever_its_position() {
        // An override for the last roster student, recorded before anyone else is touched.
        let batch = reconcile(
            &defaults(&["S1", "S2", "S3"]),
            &[entry("S3", Present), entry("S1", Absent)],
            UnknownStudentPolicy::PassThrough,
        )
        .expect("reconcile");
        assert_eq!(choice_of(&batch, "S3"), Some(Present));
        assert_eq!(choice_of(&batch, "S1"), Some(Absent));
        assert_eq!(batch.count(Present), 1);
        assert_eq!(batch.count(Absent), 2);
    }

    #[test]
    fn matches_reverse_scan_over_raw_event_histories() {
        let ids = ["S1", "S2", "S3", "S4", "S9"];
        let roster = defaults(&ids[..4]);
        // Fixed-seed LCG; sequences are 0..15 events long.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..200 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let len = (seed >> 60) as usize;
            let mut events = Vec::new();
            for _ in 0..len {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let id = ids[((seed >> 33) % ids.len() as u64) as usize];
                let choice = if (seed >> 20) & 1 == 0 { Present } else { Absent };
                events.push(entry(id, choice));
            }

            let batch =
                reconcile(&roster, &events, UnknownStudentPolicy::PassThrough).expect("reconcile");
            assert_eq!(as_map(&batch), reverse_scan(&roster, &events));

            let unique: HashSet<&str> =
                batch.entries().iter().map(|e| e.student_id.as_str()).collect();
            assert_eq!(unique.len(), batch.len());
            for d in &roster {
                assert!(choice_of(&batch, &d.student_id).is_some());
            }
        }
    }

    #[test]
    fn repeated_reconcile_of_one_snapshot_is_identical() {
        let d = defaults(&["S1", "S2"]);
        let o = [entry("S2", Present)];
        let first = reconcile(&d, &o, UnknownStudentPolicy::PassThrough).expect("first");
        let second = reconcile(&d, &o, UnknownStudentPolicy::PassThrough).expect("second");
        assert_eq!(first, second);
        assert_eq!(first.digest(), second.digest());
        assert_eq!(first.digest().len(), 64);

        let changed = reconcile(&d, &[entry("S1", Present)], UnknownStudentPolicy::PassThrough)
            .expect("changed");
        assert_ne!(first.digest(), changed.digest());
    }

    #[test]
    fn policy_names_round_trip() {
        for p in [
            UnknownStudentPolicy::PassThrough,
            UnknownStudentPolicy::Drop,
            UnknownStudentPolicy::Reject,
        ] {
            assert_eq!(UnknownStudentPolicy::parse(p.as_str()), Some(p));
        }
        assert_eq!(UnknownStudentPolicy::parse("filter"), None);
    }
}
