use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rollcalld");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollcalld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    if value.get("ok").and_then(|v| v.as_bool()) != Some(false) {
        return None;
    }
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

fn open_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    names: &[&str],
) -> (String, Vec<String>) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(stdin, reader, "cls", "classes.create", json!({ "name": "10-A" }));
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let mut ids = Vec::new();
    for (i, name) in names.iter().enumerate() {
        let s = request_ok(
            stdin,
            reader,
            &format!("stu{}", i),
            "students.create",
            json!({
                "classId": class_id,
                "name": name,
                "registerNumber": format!("21CS{:03}", i + 1)
            }),
        );
        ids.push(
            s.get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string(),
        );
    }
    (class_id, ids)
}

fn choices_by_id(preview: &serde_json::Value) -> Vec<(String, String)> {
    preview
        .get("entries")
        .and_then(|v| v.as_array())
        .expect("entries")
        .iter()
        .map(|e| {
            (
                e.get("studentId").and_then(|v| v.as_str()).expect("studentId").to_string(),
                e.get("choice").and_then(|v| v.as_str()).expect("choice").to_string(),
            )
        })
        .collect()
}

#[test]
fn unknown_student_overrides_pass_through_by_default() {
    let workspace = temp_dir("rollcall-unknown-pass");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, ids) = open_class(&mut stdin, &mut reader, &workspace, &["Asha"]);

    let settings = request_ok(&mut stdin, &mut reader, "1", "settings.get", json!({}));
    assert_eq!(
        settings.get("unknownStudentPolicy").and_then(|v| v.as_str()),
        Some("passThrough")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "session.open",
        json!({ "classId": class_id, "date": "2024-09-03" }),
    );
    let set = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.set",
        json!({ "studentId": "S9", "choice": "present" }),
    );
    assert_eq!(set.get("inRoster").and_then(|v| v.as_bool()), Some(false));

    let preview = request_ok(&mut stdin, &mut reader, "4", "attendance.preview", json!({}));
    assert_eq!(
        choices_by_id(&preview),
        vec![
            (ids[0].clone(), "absent".to_string()),
            ("S9".to_string(), "present".to_string()),
        ]
    );

    let view = request_ok(&mut stdin, &mut reader, "5", "attendance.view", json!({}));
    let unknown = view
        .get("unknownOverrides")
        .and_then(|v| v.as_array())
        .expect("unknownOverrides");
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].get("studentId").and_then(|v| v.as_str()), Some("S9"));

    let receipt = request_ok(&mut stdin, &mut reader, "6", "attendance.submit", json!({}));
    assert_eq!(receipt.get("entryCount").and_then(|v| v.as_u64()), Some(2));
}

#[test]
fn drop_and_reject_policies_tighten_unknown_ids() {
    let workspace = temp_dir("rollcall-unknown-policy");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, ids) = open_class(&mut stdin, &mut reader, &workspace, &["Asha"]);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "session.open",
        json!({ "classId": class_id, "date": "2024-09-03" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.set",
        json!({ "studentId": "S9", "choice": "present" }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "settings.update",
        json!({ "unknownStudentPolicy": "drop" }),
    );
    let preview = request_ok(&mut stdin, &mut reader, "4", "attendance.preview", json!({}));
    assert_eq!(
        choices_by_id(&preview),
        vec![(ids[0].clone(), "absent".to_string())]
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "settings.update",
        json!({ "unknownStudentPolicy": "reject" }),
    );
    assert_eq!(
        updated.get("unknownStudentPolicy").and_then(|v| v.as_str()),
        Some("reject")
    );
    let rejected = request(&mut stdin, &mut reader, "6", "attendance.submit", json!({}));
    assert_eq!(error_code(&rejected), Some("unknown_students"));
    assert_eq!(
        rejected
            .get("error")
            .and_then(|e| e.get("details"))
            .and_then(|d| d.get("studentIds")),
        Some(&json!(["S9"]))
    );

    // Nothing was written by the rejected submission.
    let records = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.records",
        json!({ "date": "2024-09-03" }),
    );
    assert_eq!(
        records.get("records").and_then(|v| v.as_array()).map(|v| v.len()),
        Some(0)
    );

    let bad = request(
        &mut stdin,
        &mut reader,
        "8",
        "settings.update",
        json!({ "unknownStudentPolicy": "filter" }),
    );
    assert_eq!(error_code(&bad), Some("bad_params"));
}

#[test]
fn submit_guards_report_input_errors() {
    let workspace = temp_dir("rollcall-guards");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let no_ws = request(&mut stdin, &mut reader, "1", "attendance.submit", json!({}));
    assert_eq!(error_code(&no_ws), Some("no_workspace"));

    let (class_id, _ids) = open_class(&mut stdin, &mut reader, &workspace, &[]);

    let no_session = request(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.set",
        json!({ "studentId": "S1", "choice": "present" }),
    );
    assert_eq!(error_code(&no_session), Some("no_session"));

    let bad_date = request(
        &mut stdin,
        &mut reader,
        "3",
        "session.open",
        json!({ "classId": class_id, "date": "03/09/2024" }),
    );
    assert_eq!(error_code(&bad_date), Some("bad_params"));

    let missing_class = request(
        &mut stdin,
        &mut reader,
        "4",
        "session.open",
        json!({ "classId": "nope" }),
    );
    assert_eq!(error_code(&missing_class), Some("not_found"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "session.open",
        json!({ "classId": class_id, "date": "2024-09-03" }),
    );
    let bad_choice = request(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.set",
        json!({ "studentId": "S1", "choice": "late" }),
    );
    assert_eq!(error_code(&bad_choice), Some("bad_params"));

    let empty = request(&mut stdin, &mut reader, "7", "attendance.submit", json!({}));
    assert_eq!(error_code(&empty), Some("empty_batch"));
}
