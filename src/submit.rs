use crate::reconcile::{reconcile_session, ReconcileError, ReconciledBatch, UnknownStudentPolicy};
use crate::roster::AttendanceChoice;
use crate::session::AttendanceSession;
use anyhow::Context;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug)]
pub struct SubmissionRequest<'a> {
    pub class_id: &'a str,
    pub date: NaiveDate,
    pub batch: &'a ReconciledBatch,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub submission_id: String,
    pub class_id: String,
    pub date: String,
    pub entry_count: usize,
    pub present_count: usize,
    pub absent_count: usize,
    pub digest: String,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("no students to report")]
    NothingToSubmit,
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("submission failed: {0:#}")]
    Sink(#[source] anyhow::Error),
}

impl SubmitError {
    pub fn code(&self) -> &'static str {
        match self {
            SubmitError::NothingToSubmit => "empty_batch",
            SubmitError::Reconcile(e) => e.code(),
            SubmitError::Sink(_) => "submit_failed",
        }
    }
}

/// Accepts a reconciled batch and persists it.
pub trait SubmissionSink {
    fn submit(&mut self, request: &SubmissionRequest<'_>) -> anyhow::Result<SubmissionReceipt>;
}

/// Reconciles the session and hands the batch to `sink`.
///
/// The session is only borrowed, so a failed submission leaves every choice
/// in place for a retry.
pub fn submit_session(
    session: &AttendanceSession,
    policy: UnknownStudentPolicy,
    sink: &mut dyn SubmissionSink,
) -> Result<SubmissionReceipt, SubmitError> {
    if session.roster().is_empty() {
        return Err(SubmitError::NothingToSubmit);
    }
    let batch = reconcile_session(session, policy)?;
    if batch.is_empty() {
        return Err(SubmitError::NothingToSubmit);
    }
    let request = SubmissionRequest {
        class_id: session.class_id(),
        date: session.date(),
        batch: &batch,
    };
    sink.submit(&request).map_err(SubmitError::Sink)
}

/// Writes batches into the workspace database, one row per (class, date, student).
/// Resubmitting a day replaces every earlier row for that (class, date).
pub struct SqliteSink<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteSink<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl SubmissionSink for SqliteSink<'_> {
    fn submit(&mut self, request: &SubmissionRequest<'_>) -> anyhow::Result<SubmissionReceipt> {
        let submission_id = Uuid::new_v4().to_string();
        let date = request.date.format("%Y-%m-%d").to_string();
        let batch = request.batch;
        let digest = batch.digest();

        let tx = self
            .conn
            .unchecked_transaction()
            .context("failed to begin submission transaction")?;
        tx.execute(
            "INSERT INTO submissions(id, class_id, date, entry_count, digest, submitted_at)
             VALUES(?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
            (
                &submission_id,
                request.class_id,
                &date,
                batch.len() as i64,
                &digest,
            ),
        )
        .context("failed to insert submission")?;
        let replaced = tx
            .execute(
                "DELETE FROM attendance_records WHERE class_id = ? AND date = ?",
                (request.class_id, &date),
            )
            .context("failed to clear earlier attendance for the day")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO attendance_records(class_id, date, student_id, choice, submission_id)
                     VALUES(?, ?, ?, ?, ?)",
                )
                .context("failed to prepare attendance insert")?;
            for e in batch.entries() {
                stmt.execute((
                    request.class_id,
                    &date,
                    &e.student_id,
                    e.choice.as_str(),
                    &submission_id,
                ))
                .with_context(|| format!("failed to record attendance for {}", e.student_id))?;
            }
        }
        tx.commit().context("failed to commit submission")?;

        log::info!(
            "event=attendance_submitted class_id={} date={} entries={} replaced={} digest={}",
            request.class_id,
            date,
            batch.len(),
            replaced,
            digest
        );

        Ok(SubmissionReceipt {
            submission_id,
            class_id: request.class_id.to_string(),
            date,
            entry_count: batch.len(),
            present_count: batch.count(AttendanceChoice::Present),
            absent_count: batch.count(AttendanceChoice::Absent),
            digest,
        })
    }
}
