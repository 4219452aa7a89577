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

fn guard(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    path: &str,
    token: Option<&str>,
) -> (String, Option<String>) {
    let r = request_ok(
        stdin,
        reader,
        id,
        "auth.guard",
        json!({ "path": path, "token": token }),
    );
    (
        r.get("action")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        r.get("to").and_then(|v| v.as_str()).map(|s| s.to_string()),
    )
}

fn login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    username: &str,
    password: &str,
) -> String {
    let r = request_ok(
        stdin,
        reader,
        id,
        "auth.login",
        json!({ "username": username, "password": password }),
    );
    r.get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string()
}

#[test]
fn login_session_and_route_guard() {
    let workspace = temp_dir("asistencia-auth-guard");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "users.create",
        json!({ "username": "coord", "name": "Luis", "role": "Coordinadora", "password": "clave123" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "u2",
        "users.create",
        json!({ "username": "profe", "name": "Marta", "role": "docente", "password": "clave456" }),
    );

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "bad1",
        "auth.login",
        json!({ "username": "coord", "password": "nope" }),
    );
    assert_eq!(code, "unauthorized");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "bad2",
        "auth.login",
        json!({ "username": "ghost", "password": "whatever" }),
    );
    assert_eq!(code, "unauthorized");

    // Anonymous.
    assert_eq!(
        guard(&mut stdin, &mut reader, "g1", "/dashboard", None),
        ("redirect".to_string(), Some("/login".to_string()))
    );
    assert_eq!(
        guard(&mut stdin, &mut reader, "g2", "/login", None),
        ("allow".to_string(), None)
    );
    assert_eq!(
        guard(&mut stdin, &mut reader, "g3", "/dashboard", Some("not-a-token")),
        ("redirect".to_string(), Some("/login".to_string()))
    );

    let coord = login(&mut stdin, &mut reader, "l1", "coord", "clave123");
    let session = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "auth.session",
        json!({ "token": coord }),
    );
    let s = session.get("session").expect("session");
    assert_eq!(s.get("role").and_then(|v| v.as_str()), Some("coordinator"));
    assert_eq!(s.get("name").and_then(|v| v.as_str()), Some("Luis"));

    assert_eq!(
        guard(&mut stdin, &mut reader, "g4", "/login", Some(coord.as_str())),
        ("redirect".to_string(), Some("/dashboard".to_string()))
    );
    assert_eq!(
        guard(&mut stdin, &mut reader, "g5", "/dashboard/materias", Some(coord.as_str())),
        ("allow".to_string(), None)
    );
    assert_eq!(
        guard(&mut stdin, &mut reader, "g6", "/dashboard/usuarios", Some(coord.as_str())),
        ("redirect".to_string(), Some("/dashboard".to_string()))
    );

    let profe = login(&mut stdin, &mut reader, "l2", "profe", "clave456");
    assert_eq!(
        guard(&mut stdin, &mut reader, "g7", "/dashboard/asistencia", Some(profe.as_str())),
        ("allow".to_string(), None)
    );
    assert_eq!(
        guard(&mut stdin, &mut reader, "g8", "/dashboard/reportes", Some(profe.as_str())),
        ("redirect".to_string(), Some("/dashboard".to_string()))
    );

    let menu = request_ok(
        &mut stdin,
        &mut reader,
        "n1",
        "nav.menu",
        json!({ "token": profe }),
    );
    let keys: Vec<String> = menu
        .get("items")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|i| i.get("key").and_then(|v| v.as_str()).map(|s| s.to_string()))
        .collect();
    assert_eq!(keys, vec!["dashboard", "attendance"]);

    let vis = request_ok(
        &mut stdin,
        &mut reader,
        "n2",
        "nav.isVisible",
        json!({ "key": "users", "role": "Administrador" }),
    );
    assert_eq!(vis.get("visible").and_then(|v| v.as_bool()), Some(true));

    // Moving the login page is honored by the guard.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "cfg",
        "setup.update",
        json!({ "section": "session", "patch": { "loginPath": "/ingreso", "publicPaths": ["/ayuda"] } }),
    );
    assert_eq!(
        guard(&mut stdin, &mut reader, "g9", "/dashboard", None),
        ("redirect".to_string(), Some("/ingreso".to_string()))
    );
    assert_eq!(
        guard(&mut stdin, &mut reader, "g10", "/ayuda/faq", None),
        ("allow".to_string(), None)
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "cfg2",
        "setup.update",
        json!({ "section": "session", "patch": { "ttlMinutes": 1 } }),
    );
    assert_eq!(code, "bad_params");

    let out = request_ok(
        &mut stdin,
        &mut reader,
        "o1",
        "auth.logout",
        json!({ "token": coord }),
    );
    assert_eq!(out.get("removed").and_then(|v| v.as_bool()), Some(true));
    let session = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "auth.session",
        json!({ "token": coord }),
    );
    assert!(session.get("session").map(|v| v.is_null()).unwrap_or(false));
}

#[test]
fn deactivated_accounts_lose_their_sessions() {
    let workspace = temp_dir("asistencia-auth-deactivate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "users.create",
        json!({ "username": "admin", "name": "Root", "role": "admin", "password": "admin123" }),
    );
    let user_id = created
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string();
    let token = login(&mut stdin, &mut reader, "l1", "admin", "admin123");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "u2",
        "users.update",
        json!({ "userId": user_id, "patch": { "active": false } }),
    );
    let session = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "auth.session",
        json!({ "token": token }),
    );
    assert!(session.get("session").map(|v| v.is_null()).unwrap_or(false));
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "l2",
        "auth.login",
        json!({ "username": "admin", "password": "admin123" }),
    );
    assert_eq!(code, "unauthorized");
}
