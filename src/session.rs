use crate::roster::{AttendanceChoice, AttendanceEntry, Student};
use chrono::NaiveDate;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Per-session attendance state: the roster, its `absent` defaults, and the
/// user's explicit choices.
///
/// Overrides keep one current choice per student. A repeated toggle
/// overwrites the stored choice in place, so the latest toggle always wins
/// and history never grows past the number of distinct students touched.
#[derive(Debug, Clone)]
pub struct AttendanceSession {
    class_id: String,
    date: NaiveDate,
    roster: Vec<Student>,
    defaults: Vec<AttendanceEntry>,
    roster_index: HashMap<String, usize>,
    overrides: Vec<AttendanceEntry>,
    override_index: HashMap<String, usize>,
    toggles: u64,
}

impl AttendanceSession {
    pub fn new(class_id: impl Into<String>, date: NaiveDate, roster: Vec<Student>) -> Self {
        let mut session = Self {
            class_id: class_id.into(),
            date,
            roster: Vec::new(),
            defaults: Vec::new(),
            roster_index: HashMap::new(),
            overrides: Vec::new(),
            override_index: HashMap::new(),
            toggles: 0,
        };
        session.seed_defaults(roster);
        session
    }

    /// Replaces the roster and resets every default to `absent`. Overrides are kept.
    pub fn seed_defaults(&mut self, roster: Vec<Student>) {
        let mut index: HashMap<String, usize> = HashMap::with_capacity(roster.len());
        let mut unique: Vec<Student> = Vec::with_capacity(roster.len());
        for s in roster {
            if let Entry::Vacant(slot) = index.entry(s.id.clone()) {
                slot.insert(unique.len());
                unique.push(s);
            }
        }
        self.defaults = unique
            .iter()
            .map(|s| AttendanceEntry::new(s.id.clone(), AttendanceChoice::Absent))
            .collect();
        self.roster = unique;
        self.roster_index = index;
    }

    /// Records an explicit choice. The student id is not checked against the roster here.
    pub fn record_override(&mut self, student_id: &str, choice: AttendanceChoice) {
        self.toggles += 1;
        match self.override_index.get(student_id) {
            Some(&idx) => self.overrides[idx].choice = choice,
            None => {
                self.override_index
                    .insert(student_id.to_string(), self.overrides.len());
                self.overrides.push(AttendanceEntry::new(student_id, choice));
            }
        }
    }

    /// Defaults in roster order.
    pub fn current_defaults(&self) -> &[AttendanceEntry] {
        &self.defaults
    }

    /// Overrides in first-toggle order, each carrying its latest choice.
    pub fn current_overrides(&self) -> &[AttendanceEntry] {
        &self.overrides
    }

    /// The choice a form should show as selected.
    pub fn effective_choice(&self, student_id: &str) -> Option<AttendanceChoice> {
        if let Some(&idx) = self.override_index.get(student_id) {
            return Some(self.overrides[idx].choice);
        }
        self.roster_index
            .get(student_id)
            .map(|&idx| self.defaults[idx].choice)
    }

    pub fn roster(&self) -> &[Student] {
        &self.roster
    }

    pub fn in_roster(&self, student_id: &str) -> bool {
        self.roster_index.contains_key(student_id)
    }

    /// Override ids that do not belong to the current roster.
    pub fn unknown_override_ids(&self) -> Vec<String> {
        self.overrides
            .iter()
            .filter(|e| !self.roster_index.contains_key(&e.student_id))
            .map(|e| e.student_id.clone())
            .collect()
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn toggles(&self) -> u64 {
        self.toggles
    }
}
