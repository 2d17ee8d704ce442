use crate::db;
use crate::ipc::error::{err, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::UnknownStudentPolicy;
use rusqlite::Connection;
use serde_json::json;

pub const UNKNOWN_STUDENT_POLICY_KEY: &str = "attendance.unknownStudentPolicy";

pub fn load_unknown_student_policy(conn: &Connection) -> Result<UnknownStudentPolicy, HandlerErr> {
    let stored = db::settings_get_json(conn, UNKNOWN_STUDENT_POLICY_KEY)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
    let Some(v) = stored else {
        return Ok(UnknownStudentPolicy::default());
    };
    match v.as_str().and_then(UnknownStudentPolicy::parse) {
        Some(p) => Ok(p),
        None => {
            log::warn!(
                "event=settings_invalid key={} value={}",
                UNKNOWN_STUDENT_POLICY_KEY,
                v
            );
            Ok(UnknownStudentPolicy::default())
        }
    }
}

fn settings_json(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let policy = load_unknown_student_policy(conn)?;
    Ok(json!({ "unknownStudentPolicy": policy.as_str() }))
}

fn settings_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    if let Some(v) = params.get("unknownStudentPolicy") {
        let policy = v
            .as_str()
            .and_then(UnknownStudentPolicy::parse)
            .ok_or_else(|| {
                HandlerErr::new(
                    "bad_params",
                    "unknownStudentPolicy must be one of: passThrough, drop, reject",
                )
            })?;
        db::settings_set_json(conn, UNKNOWN_STUDENT_POLICY_KEY, &json!(policy.as_str()))
            .map_err(|e| {
                HandlerErr::new("db_update_failed", format!("{e:#}"))
                    .with_details(json!({ "table": "settings" }))
            })?;
        log::info!(
            "event=settings_update key={} value={}",
            UNKNOWN_STUDENT_POLICY_KEY,
            policy.as_str()
        );
    }
    settings_json(conn)
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(&req.id, settings_json(conn))
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(&req.id, settings_update(conn, &req.params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}
