use crate::ipc::helpers::{
    get_optional_str, get_required_str, optional_str_value, str_value, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::nav::Role;
use crate::session;
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const MIN_PASSWORD_CHARS: usize = 6;

fn parse_role(raw: &str) -> Result<Role, HandlerErr> {
    match Role::normalize(raw) {
        Role::Unknown => Err(HandlerErr::bad_params(
            "role must be one of: admin, coordinador, docente",
        )
        .with_details(json!({ "role": raw }))),
        role => Ok(role),
    }
}

fn check_password(password: &str) -> Result<(), HandlerErr> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(HandlerErr::bad_params(format!(
            "password must have at least {} characters",
            MIN_PASSWORD_CHARS
        )));
    }
    Ok(())
}

fn check_department(conn: &Connection, department_id: Option<&str>) -> Result<(), HandlerErr> {
    let Some(dep) = department_id else {
        return Ok(());
    };
    if !store::department_exists(conn, dep).map_err(HandlerErr::query)? {
        return Err(HandlerErr::not_found("department not found"));
    }
    Ok(())
}

fn users_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let users = store::list_users(conn).map_err(HandlerErr::query)?;
    let rows: Vec<serde_json::Value> = users
        .iter()
        .map(|u| {
            json!({
                "id": u.id,
                "username": u.username,
                "name": u.name,
                "role": Role::normalize(&u.role).as_str(),
                "departmentId": u.department_id,
                "active": u.active,
            })
        })
        .collect();
    Ok(json!({ "users": rows }))
}

fn users_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let username = get_required_str(params, "username")?;
    let name = get_required_str(params, "name")?;
    let role = parse_role(&get_required_str(params, "role")?)?;
    let password = params
        .get("password")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing password"))?;
    check_password(password)?;
    let department_id = get_optional_str(params, "departmentId")?;
    check_department(conn, department_id.as_deref())?;

    let user_id = Uuid::new_v4().to_string();
    let (salt, hash) = session::new_password_hash(password);
    conn.execute(
        "INSERT INTO users(id, username, name, role, department_id, password_salt, password_hash, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &user_id,
            &username,
            &name,
            role.as_str(),
            &department_id,
            &salt,
            &hash,
            chrono::Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::write("db_insert_failed", e).with_details(json!({ "table": "users" }))
    })?;

    tracing::info!(user = %user_id, role = role.as_str(), "user created");
    Ok(json!({ "userId": user_id, "username": username, "role": role.as_str() }))
}

fn users_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    if store::get_user(conn, &user_id)
        .map_err(HandlerErr::query)?
        .is_none()
    {
        return Err(HandlerErr::not_found("user not found"));
    }
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (k, v) in patch {
        match k.as_str() {
            "name" => {
                let name = str_value(v, k)?;
                tx.execute("UPDATE users SET name = ? WHERE id = ?", (&name, &user_id))
                    .map_err(|e| HandlerErr::write("db_update_failed", e))?;
            }
            "role" => {
                let raw = v
                    .as_str()
                    .ok_or_else(|| HandlerErr::bad_params("role must be string"))?;
                let role = parse_role(raw)?;
                tx.execute(
                    "UPDATE users SET role = ? WHERE id = ?",
                    (role.as_str(), &user_id),
                )
                .map_err(|e| HandlerErr::write("db_update_failed", e))?;
            }
            "departmentId" => {
                let dep = optional_str_value(v, k)?;
                check_department(&tx, dep.as_deref())?;
                tx.execute(
                    "UPDATE users SET department_id = ? WHERE id = ?",
                    (&dep, &user_id),
                )
                .map_err(|e| HandlerErr::write("db_update_failed", e))?;
            }
            "password" => {
                let password = v
                    .as_str()
                    .ok_or_else(|| HandlerErr::bad_params("password must be string"))?;
                check_password(password)?;
                let (salt, hash) = session::new_password_hash(password);
                tx.execute(
                    "UPDATE users SET password_salt = ?, password_hash = ? WHERE id = ?",
                    (&salt, &hash, &user_id),
                )
                .map_err(|e| HandlerErr::write("db_update_failed", e))?;
                // Existing logins end with a password change.
                tx.execute("DELETE FROM sessions WHERE user_id = ?", [&user_id])
                    .map_err(|e| HandlerErr::write("db_delete_failed", e))?;
            }
            "active" => {
                let active = v
                    .as_bool()
                    .ok_or_else(|| HandlerErr::bad_params("active must be boolean"))?;
                tx.execute(
                    "UPDATE users SET active = ? WHERE id = ?",
                    (active as i64, &user_id),
                )
                .map_err(|e| HandlerErr::write("db_update_failed", e))?;
                if !active {
                    tx.execute("DELETE FROM sessions WHERE user_id = ?", [&user_id])
                        .map_err(|e| HandlerErr::write("db_delete_failed", e))?;
                }
            }
            other => {
                return Err(HandlerErr::bad_params(format!("unknown user field: {}", other)));
            }
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn users_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    if store::get_user(conn, &user_id)
        .map_err(HandlerErr::query)?
        .is_none()
    {
        return Err(HandlerErr::not_found("user not found"));
    }
    let has_records: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM attendance_records WHERE user_id = ? LIMIT 1",
            [&user_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if has_records.is_some() {
        return Err(HandlerErr::conflict(
            "user has attendance records; deactivate the account instead",
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM sessions WHERE user_id = ?", [&user_id])
        .map_err(|e| {
            HandlerErr::write("db_delete_failed", e).with_details(json!({ "table": "sessions" }))
        })?;
    tx.execute("DELETE FROM users WHERE id = ?", [&user_id])
        .map_err(|e| {
            HandlerErr::write("db_delete_failed", e).with_details(json!({ "table": "users" }))
        })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(user = %user_id, "user deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(with_db(state, req, |conn, _| users_list(conn))),
        "users.create" => Some(with_db(state, req, users_create)),
        "users.update" => Some(with_db(state, req, users_update)),
        "users.delete" => Some(with_db(state, req, users_delete)),
        _ => None,
    }
}
