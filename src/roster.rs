use anyhow::Context;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const PHOTO_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub display_name: String,
    pub register_number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceChoice {
    Present,
    Absent,
}

impl AttendanceChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceChoice::Present => "present",
            AttendanceChoice::Absent => "absent",
        }
    }
}

impl fmt::Display for AttendanceChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(AttendanceChoice::Present),
            "absent" => Ok(AttendanceChoice::Absent),
            other => Err(format!("choice must be present or absent, got {:?}", other)),
        }
    }
}

/// One (student, choice) pair. Used for defaults, overrides and batch rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEntry {
    pub student_id: String,
    pub choice: AttendanceChoice,
}

impl AttendanceEntry {
    pub fn new(student_id: impl Into<String>, choice: AttendanceChoice) -> Self {
        Self {
            student_id: student_id.into(),
            choice,
        }
    }
}

/// Loads the roster for a class in display order.
pub fn load_roster(conn: &Connection, class_id: &str) -> anyhow::Result<Vec<Student>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, display_name, register_number
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order, rowid",
        )
        .context("failed to prepare roster query")?;
    let students = stmt
        .query_map([class_id], |r| {
            let register_number: Option<String> = r.get(2)?;
            Ok(Student {
                id: r.get(0)?,
                display_name: r.get(1)?,
                register_number: register_number.and_then(|s| non_empty_trimmed(&s)),
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to load roster for class {}", class_id))?;
    Ok(students)
}

/// Case-insensitive substring match on the display name. An empty query matches everyone.
pub fn name_matches(student: &Student, query: &str) -> bool {
    let q = query.trim().to_lowercase();
    q.is_empty() || student.display_name.to_lowercase().contains(&q)
}

/// Maps image file stems (register numbers) to their paths. A missing directory is an empty index.
pub fn photo_index(dir: &Path) -> anyhow::Result<HashMap<String, PathBuf>> {
    let mut out = HashMap::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list photos in {}", dir.to_string_lossy()))?;
    for ent in entries {
        let p = ent?.path();
        if !p.is_file() {
            continue;
        }
        let is_image = p
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| PHOTO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !is_image {
            continue;
        }
        let Some(stem) = p.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        // Deterministic pick if the same register number has several images.
        let stem = stem.to_string();
        if out.get(&stem).map(|cur: &PathBuf| p < *cur).unwrap_or(true) {
            out.insert(stem, p);
        }
    }
    Ok(out)
}

pub fn non_empty_trimmed(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}
