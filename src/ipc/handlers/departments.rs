use crate::ipc::helpers::{get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn departments_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let departments = store::list_departments(conn).map_err(HandlerErr::query)?;
    Ok(json!({ "departments": departments }))
}

fn departments_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let department_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO departments(id, name) VALUES(?, ?)",
        (&department_id, &name),
    )
    .map_err(|e| {
        HandlerErr::write("db_insert_failed", e).with_details(json!({ "table": "departments" }))
    })?;
    Ok(json!({ "departmentId": department_id, "name": name }))
}

fn departments_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let department_id = get_required_str(params, "departmentId")?;
    let name = get_required_str(params, "name")?;
    let n = conn
        .execute(
            "UPDATE departments SET name = ? WHERE id = ?",
            (&name, &department_id),
        )
        .map_err(|e| HandlerErr::write("db_update_failed", e))?;
    if n == 0 {
        return Err(HandlerErr::not_found("department not found"));
    }
    Ok(json!({ "ok": true }))
}

fn departments_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let department_id = get_required_str(params, "departmentId")?;
    let dep = store::get_department(conn, &department_id).map_err(HandlerErr::query)?;
    let Some(dep) = dep else {
        return Err(HandlerErr::not_found("department not found"));
    };
    // No cascades: the department must be emptied first.
    if dep.section_count + dep.subject_count + dep.user_count > 0 {
        return Err(HandlerErr::conflict("department is still in use").with_details(json!({
            "sections": dep.section_count,
            "subjects": dep.subject_count,
            "users": dep.user_count,
        })));
    }
    conn.execute("DELETE FROM departments WHERE id = ?", [&department_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "departments.list" => Some(with_db(state, req, |conn, _| departments_list(conn))),
        "departments.create" => Some(with_db(state, req, departments_create)),
        "departments.update" => Some(with_db(state, req, departments_update)),
        "departments.delete" => Some(with_db(state, req, departments_delete)),
        _ => None,
    }
}
