use crate::ipc::error::{
    db_query_failed, err, get_optional_str, get_required_str, respond, HandlerErr,
};
use crate::ipc::handlers::classes::require_class;
use crate::ipc::handlers::session::reseed_if_class;
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, Student};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const PHOTO_DIR: &str = "images";

/// Photo paths keyed by register number. Listing failures degrade to "no photo".
pub fn workspace_photos(workspace: Option<&Path>) -> HashMap<String, PathBuf> {
    let Some(ws) = workspace else {
        return HashMap::new();
    };
    match roster::photo_index(&ws.join(PHOTO_DIR)) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("event=photo_index status=error error={:#}", e);
            HashMap::new()
        }
    }
}

pub fn student_json(student: &Student, photos: &HashMap<String, PathBuf>) -> serde_json::Value {
    let photo = student
        .register_number
        .as_ref()
        .and_then(|n| photos.get(n))
        .map(|p| p.to_string_lossy().to_string());
    json!({
        "id": student.id,
        "displayName": student.display_name,
        "registerNumber": student.register_number,
        "photoPath": photo
    })
}

fn students_list(
    conn: &Connection,
    workspace: Option<&Path>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    require_class(conn, &class_id)?;
    let query = get_optional_str(params, "query").unwrap_or_default();

    let students =
        roster::load_roster(conn, &class_id).map_err(|e| db_query_failed(format!("{e:#}")))?;
    let photos = workspace_photos(workspace);
    let rows: Vec<serde_json::Value> = students
        .iter()
        .filter(|s| roster::name_matches(s, &query))
        .map(|s| student_json(s, &photos))
        .collect();
    Ok(json!({ "students": rows }))
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(String, serde_json::Value), HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let name = get_required_str(params, "name")?;
    let register_number = get_optional_str(params, "registerNumber");
    require_class(conn, &class_id)?;

    let sort_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(db_query_failed)?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, display_name, register_number, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &student_id,
            &class_id,
            &name,
            register_number.as_deref(),
            sort_order,
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "students" }))
    })?;

    Ok((class_id, json!({ "studentId": student_id })))
}

fn students_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(String, serde_json::Value), HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    // Submitted attendance_records are history and are kept.
    let deleted = conn
        .execute(
            "DELETE FROM students WHERE class_id = ? AND id = ?",
            (&class_id, &student_id),
        )
        .map_err(|e| {
            HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": "students" }))
        })?;
    if deleted == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    Ok((class_id, json!({ "ok": true })))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(
        &req.id,
        students_list(conn, state.workspace.as_deref(), &req.params),
    )
}

/// Roster edits for the open session's class re-seed its defaults.
fn handle_roster_edit(
    state: &mut AppState,
    req: &Request,
    edit: fn(&Connection, &serde_json::Value) -> Result<(String, serde_json::Value), HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = edit(conn, &req.params).and_then(|(class_id, result)| {
        reseed_if_class(conn, state.session.as_mut(), &class_id)?;
        Ok(result)
    });
    respond(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_roster_edit(state, req, students_create)),
        "students.delete" => Some(handle_roster_edit(state, req, students_delete)),
        _ => None,
    }
}
