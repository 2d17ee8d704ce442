use crate::export;
use crate::ipc::error::{
    db_query_failed, err, get_optional_str, get_required_date, get_required_str, respond,
    HandlerErr,
};
use crate::ipc::handlers::settings::load_unknown_student_policy;
use crate::ipc::handlers::students::{student_json, workspace_photos};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::{reconcile_session, ReconcileError, ReconciledBatch};
use crate::roster::{self, AttendanceChoice};
use crate::session::AttendanceSession;
use crate::submit::{submit_session, SqliteSink, SubmitError};
use rusqlite::Connection;
use serde_json::json;
use std::path::Path;

fn reconcile_err(e: ReconcileError) -> HandlerErr {
    match &e {
        ReconcileError::UnknownStudents(ids) => {
            let details = json!({ "studentIds": ids });
            HandlerErr::new(e.code(), e.to_string()).with_details(details)
        }
    }
}

fn submit_err(e: SubmitError) -> HandlerErr {
    match e {
        SubmitError::Reconcile(inner) => reconcile_err(inner),
        other => HandlerErr::new(other.code(), other.to_string()),
    }
}

fn batch_json(batch: &ReconciledBatch) -> serde_json::Value {
    json!({
        "entries": batch.entries(),
        "entryCount": batch.len(),
        "presentCount": batch.count(AttendanceChoice::Present),
        "absentCount": batch.count(AttendanceChoice::Absent),
        "digest": batch.digest()
    })
}

fn attendance_set(
    session: &mut AttendanceSession,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let raw_choice = get_required_str(params, "choice")?;
    let choice: AttendanceChoice = raw_choice
        .parse()
        .map_err(|m: String| HandlerErr::new("bad_params", m))?;

    session.record_override(&student_id, choice);
    let in_roster = session.in_roster(&student_id);
    if !in_roster {
        log::warn!(
            "event=override_unknown_student class_id={} student_id={}",
            session.class_id(),
            student_id
        );
    }
    Ok(json!({
        "studentId": student_id,
        "choice": choice,
        "inRoster": in_roster,
        "toggles": session.toggles()
    }))
}

fn attendance_view(
    session: &AttendanceSession,
    workspace: Option<&Path>,
    params: &serde_json::Value,
) -> serde_json::Value {
    let query = get_optional_str(params, "query").unwrap_or_default();
    let photos = workspace_photos(workspace);
    let rows: Vec<serde_json::Value> = session
        .roster()
        .iter()
        .filter(|s| roster::name_matches(s, &query))
        .map(|s| {
            let mut row = student_json(s, &photos);
            row["choice"] = json!(session
                .effective_choice(&s.id)
                .unwrap_or(AttendanceChoice::Absent));
            row
        })
        .collect();
    let unknown: Vec<serde_json::Value> = session
        .unknown_override_ids()
        .into_iter()
        .map(|id| {
            let choice = session.effective_choice(&id);
            json!({ "studentId": id, "choice": choice })
        })
        .collect();
    json!({
        "classId": session.class_id(),
        "date": session.date().format("%Y-%m-%d").to_string(),
        "rows": rows,
        "unknownOverrides": unknown
    })
}

fn attendance_preview(
    conn: &Connection,
    session: &AttendanceSession,
) -> Result<serde_json::Value, HandlerErr> {
    let policy = load_unknown_student_policy(conn)?;
    let batch = reconcile_session(session, policy).map_err(reconcile_err)?;
    Ok(batch_json(&batch))
}

fn attendance_submit(
    conn: &Connection,
    session: &AttendanceSession,
) -> Result<serde_json::Value, HandlerErr> {
    let policy = load_unknown_student_policy(conn)?;
    let mut sink = SqliteSink::new(conn);
    let receipt = submit_session(session, policy, &mut sink).map_err(|e| {
        log::error!(
            "event=attendance_submit status=error class_id={} code={} error={}",
            session.class_id(),
            e.code(),
            e
        );
        submit_err(e)
    })?;
    serde_json::to_value(&receipt).map_err(|e| HandlerErr::new("submit_failed", e.to_string()))
}

fn attendance_records(
    conn: &Connection,
    session: Option<&AttendanceSession>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_date(params, "date")?;
    let class_id = match get_optional_str(params, "classId") {
        Some(v) => v,
        None => session.map(|s| s.class_id().to_string()).ok_or_else(|| {
            HandlerErr::new("bad_params", "missing classId (no open session)")
        })?,
    };
    let rows = export::query_records(conn, Some(&class_id), date, date)
        .map_err(|e| db_query_failed(format!("{e:#}")))?;
    let records: Vec<serde_json::Value> = rows
        .iter()
        .map(|r| {
            json!({
                "studentId": r.student_id,
                "displayName": r.display_name,
                "registerNumber": r.register_number,
                "choice": r.choice
            })
        })
        .collect();
    Ok(json!({
        "classId": class_id,
        "date": date.format("%Y-%m-%d").to_string(),
        "records": records
    }))
}

fn no_session(id: &str) -> serde_json::Value {
    err(id, "no_session", "open an attendance session first", None)
}

fn handle_attendance_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return no_session(&req.id);
    };
    respond(&req.id, attendance_set(session, &req.params))
}

fn handle_attendance_view(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return no_session(&req.id);
    };
    respond(
        &req.id,
        Ok(attendance_view(
            session,
            state.workspace.as_deref(),
            &req.params,
        )),
    )
}

fn handle_attendance_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_ref() else {
        return no_session(&req.id);
    };
    respond(&req.id, attendance_preview(conn, session))
}

fn handle_attendance_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_ref() else {
        return no_session(&req.id);
    };
    respond(&req.id, attendance_submit(conn, session))
}

fn handle_attendance_records(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(
        &req.id,
        attendance_records(conn, state.session.as_ref(), &req.params),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.set" => Some(handle_attendance_set(state, req)),
        "attendance.view" => Some(handle_attendance_view(state, req)),
        "attendance.preview" => Some(handle_attendance_preview(state, req)),
        "attendance.submit" => Some(handle_attendance_submit(state, req)),
        "attendance.records" => Some(handle_attendance_records(state, req)),
        _ => None,
    }
}
