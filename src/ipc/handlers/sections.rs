use crate::ipc::helpers::{
    get_optional_str, get_required_str, optional_str_value, str_value, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn section_exists(conn: &Connection, section_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM sections WHERE id = ?", [section_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

fn sections_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let department_id = get_optional_str(params, "departmentId")?;
    let sections =
        store::list_sections(conn, department_id.as_deref()).map_err(HandlerErr::query)?;
    Ok(json!({ "sections": sections }))
}

fn sections_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let department_id = get_required_str(params, "departmentId")?;
    let name = get_required_str(params, "name")?;
    let grade_level = get_optional_str(params, "gradeLevel")?;
    if !store::department_exists(conn, &department_id).map_err(HandlerErr::query)? {
        return Err(HandlerErr::not_found("department not found"));
    }

    let section_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sections(id, department_id, name, grade_level) VALUES(?, ?, ?, ?)",
        (&section_id, &department_id, &name, &grade_level),
    )
    .map_err(|e| {
        HandlerErr::write("db_insert_failed", e).with_details(json!({ "table": "sections" }))
    })?;
    Ok(json!({ "sectionId": section_id, "name": name }))
}

fn sections_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    if !section_exists(conn, &section_id)? {
        return Err(HandlerErr::not_found("section not found"));
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
                tx.execute(
                    "UPDATE sections SET name = ? WHERE id = ?",
                    (&name, &section_id),
                )
                .map_err(|e| HandlerErr::write("db_update_failed", e))?;
            }
            "gradeLevel" => {
                let grade = optional_str_value(v, k)?;
                tx.execute(
                    "UPDATE sections SET grade_level = ? WHERE id = ?",
                    (&grade, &section_id),
                )
                .map_err(|e| HandlerErr::write("db_update_failed", e))?;
            }
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown section field: {}",
                    other
                )))
            }
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn sections_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    if !section_exists(conn, &section_id)? {
        return Err(HandlerErr::not_found("section not found"));
    }
    let used: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM attendance_records WHERE section_id = ?",
            [&section_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    if used > 0 {
        return Err(HandlerErr::conflict("section has attendance records")
            .with_details(json!({ "records": used })));
    }
    conn.execute("DELETE FROM sections WHERE id = ?", [&section_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sections.list" => Some(with_db(state, req, sections_list)),
        "sections.create" => Some(with_db(state, req, sections_create)),
        "sections.update" => Some(with_db(state, req, sections_update)),
        "sections.delete" => Some(with_db(state, req, sections_delete)),
        _ => None,
    }
}
