use crate::ipc::error::{
    db_query_failed, err, get_optional_str, get_required_str, parse_date, respond, HandlerErr,
};
use crate::ipc::handlers::classes::require_class;
use crate::ipc::types::{AppState, Request};
use crate::roster;
use crate::session::AttendanceSession;
use rusqlite::Connection;
use serde_json::json;

pub fn session_summary(session: &AttendanceSession) -> serde_json::Value {
    json!({
        "classId": session.class_id(),
        "date": session.date().format("%Y-%m-%d").to_string(),
        "studentCount": session.roster().len(),
        "overrideCount": session.current_overrides().len(),
        "toggles": session.toggles(),
        "unknownOverrideIds": session.unknown_override_ids()
    })
}

/// Re-seeds the open session from storage when `class_id` is its class.
pub fn reseed_if_class(
    conn: &Connection,
    session: Option<&mut AttendanceSession>,
    class_id: &str,
) -> Result<(), HandlerErr> {
    let Some(session) = session else {
        return Ok(());
    };
    if session.class_id() != class_id {
        return Ok(());
    }
    reseed(conn, session)
}

fn reseed(conn: &Connection, session: &mut AttendanceSession) -> Result<(), HandlerErr> {
    let students = roster::load_roster(conn, session.class_id())
        .map_err(|e| db_query_failed(format!("{e:#}")))?;
    log::info!(
        "event=roster_reseed class_id={} students={}",
        session.class_id(),
        students.len()
    );
    session.seed_defaults(students);
    Ok(())
}

fn session_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<AttendanceSession, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = match get_optional_str(params, "date") {
        Some(raw) => parse_date(&raw, "date")?,
        None => chrono::Local::now().date_naive(),
    };
    require_class(conn, &class_id)?;
    let students =
        roster::load_roster(conn, &class_id).map_err(|e| db_query_failed(format!("{e:#}")))?;
    log::info!(
        "event=session_open class_id={} date={} students={}",
        class_id,
        date,
        students.len()
    );
    Ok(AttendanceSession::new(class_id, date, students))
}

fn handle_session_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match session_open(conn, &req.params) {
        Ok(session) => {
            let summary = session_summary(&session);
            state.session = Some(session);
            respond(&req.id, Ok(summary))
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_session_reload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open an attendance session first", None);
    };
    let result = reseed(conn, session).map(|_| session_summary(session));
    respond(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.open" => Some(handle_session_open(state, req)),
        "session.reload" => Some(handle_session_reload(state, req)),
        _ => None,
    }
}
