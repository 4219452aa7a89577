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
    let exe = env!("CARGO_BIN_EXE_asistenciad");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn asistenciad");
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

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("asistencia-router-smoke");
    let xlsx_out = workspace.join("smoke.xlsx");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    // Data methods need a workspace.
    let code = request_err_code(&mut stdin, &mut reader, "2", "subjects.list", json!({}));
    assert_eq!(code, "no_workspace");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "4", "setup.get", json!({}));
    let dep = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "departments.create",
        json!({ "name": "Ciencias" }),
    );
    let department_id = dep
        .get("departmentId")
        .and_then(|v| v.as_str())
        .expect("departmentId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "sections.create",
        json!({ "departmentId": department_id, "name": "3A" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "subjects.create",
        json!({ "name": "Química", "departmentId": department_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "users.create",
        json!({
            "username": "ana",
            "name": "Ana Pérez",
            "role": "Docente",
            "password": "secreto1",
            "departmentId": department_id
        }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "9", "users.list", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "10", "departments.list", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "11", "sections.list", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "subjects.match",
        json!({ "label": "quimica" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "auth.login",
        json!({ "username": "ana", "password": "secreto1" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "auth.guard",
        json!({ "path": "/dashboard" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "nav.menu",
        json!({ "role": "admin" }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "16", "attendance.list", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "reports.attendanceSummary",
        json!({}),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "reports.exportXlsx",
        json!({ "path": xlsx_out.to_string_lossy() }),
    );

    let code = request_err_code(&mut stdin, &mut reader, "19", "grid.get", json!({}));
    assert_eq!(code, "not_implemented");

    // A malformed line gets an error reply and the loop keeps going.
    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json reply");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("reply is json");
    assert_eq!(
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_json")
    );
    let _ = request_ok(&mut stdin, &mut reader, "20", "health", json!({}));

    drop(stdin);
    let _ = child.wait();
}
