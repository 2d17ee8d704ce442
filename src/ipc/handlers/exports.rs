use crate::export::{self, ExportError, ExportSummary};
use crate::ipc::error::{
    err, get_optional_str, get_required_date, get_required_str, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

fn export_err(e: ExportError) -> HandlerErr {
    log::warn!("event=export status=error code={} error={}", e.code(), e);
    HandlerErr::new(e.code(), e.to_string())
}

fn summary_json(path: &str, summary: &ExportSummary) -> serde_json::Value {
    json!({
        "path": path,
        "rowCount": summary.row_count,
        "sha256": summary.sha256
    })
}

fn exports_range(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let start = get_required_date(params, "start")?;
    let end = get_required_date(params, "end")?;
    let out_path = get_required_str(params, "outPath")?;
    let class_id = get_optional_str(params, "classId");

    let summary = export::export_range_csv(
        conn,
        class_id.as_deref(),
        start,
        end,
        &PathBuf::from(&out_path),
    )
    .map_err(export_err)?;
    log::info!(
        "event=export_range status=ok start={} end={} rows={}",
        start,
        end,
        summary.row_count
    );
    Ok(summary_json(&out_path, &summary))
}

fn exports_day(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_date(params, "date")?;
    let out_path = get_required_str(params, "outPath")?;
    let class_id = get_optional_str(params, "classId");

    let summary =
        export::export_day_docx(conn, class_id.as_deref(), date, &PathBuf::from(&out_path))
            .map_err(export_err)?;
    log::info!(
        "event=export_day status=ok date={} rows={}",
        date,
        summary.row_count
    );
    Ok(summary_json(&out_path, &summary))
}

fn handle_exports_range(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(&req.id, exports_range(conn, &req.params))
}

fn handle_exports_day(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(&req.id, exports_day(conn, &req.params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exports.range" => Some(handle_exports_range(state, req)),
        "exports.day" => Some(handle_exports_day(state, req)),
        _ => None,
    }
}
