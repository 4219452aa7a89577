use crate::ipc::helpers::{
    get_optional_str, get_required_str, optional_str_value, str_value, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::matching;
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

fn subject_exists(conn: &Connection, subject_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

/// Catalog names must survive normalization, otherwise they could never be
/// told apart from anything else.
fn check_subject_name(name: &str) -> Result<(), HandlerErr> {
    if matching::normalize(name).is_empty() {
        return Err(HandlerErr::bad_params(
            "name must contain at least one letter or digit",
        )
        .with_details(json!({ "name": name })));
    }
    Ok(())
}

fn check_department(conn: &Connection, department_id: Option<&str>) -> Result<(), HandlerErr> {
    if let Some(dep) = department_id {
        if !store::department_exists(conn, dep).map_err(HandlerErr::query)? {
            return Err(HandlerErr::not_found("department not found"));
        }
    }
    Ok(())
}

fn subjects_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let subjects = store::list_subjects(conn).map_err(HandlerErr::query)?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    check_subject_name(&name)?;
    let code = get_optional_str(params, "code")?;
    let department_id = get_optional_str(params, "departmentId")?;
    check_department(conn, department_id.as_deref())?;

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM subjects",
            [],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;

    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, department_id, name, code, sort_order) VALUES(?, ?, ?, ?, ?)",
        (&subject_id, &department_id, &name, &code, next_sort),
    )
    .map_err(|e| {
        HandlerErr::write("db_insert_failed", e).with_details(json!({ "table": "subjects" }))
    })?;
    Ok(json!({ "subjectId": subject_id, "name": name, "sortOrder": next_sort }))
}

fn subjects_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    if !subject_exists(conn, &subject_id)? {
        return Err(HandlerErr::not_found("subject not found"));
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
                check_subject_name(&name)?;
                tx.execute(
                    "UPDATE subjects SET name = ? WHERE id = ?",
                    (&name, &subject_id),
                )
                .map_err(|e| HandlerErr::write("db_update_failed", e))?;
            }
            "code" => {
                let code = optional_str_value(v, k)?;
                tx.execute(
                    "UPDATE subjects SET code = ? WHERE id = ?",
                    (&code, &subject_id),
                )
                .map_err(|e| HandlerErr::write("db_update_failed", e))?;
            }
            "departmentId" => {
                let dep = optional_str_value(v, k)?;
                check_department(&tx, dep.as_deref())?;
                tx.execute(
                    "UPDATE subjects SET department_id = ? WHERE id = ?",
                    (&dep, &subject_id),
                )
                .map_err(|e| HandlerErr::write("db_update_failed", e))?;
            }
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown subject field: {}",
                    other
                )))
            }
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

/// Rewrites catalog order. The order is the match priority, so the full set
/// of subject ids must be given exactly once.
fn subjects_reorder(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(arr) = params.get("subjectIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("subjectIds must be an array"));
    };
    let ordered = arr
        .iter()
        .map(|v| str_value(v, "subjectIds[]"))
        .collect::<Result<Vec<_>, _>>()?;

    let existing: HashSet<String> = store::list_subjects(conn)
        .map_err(HandlerErr::query)?
        .into_iter()
        .map(|s| s.id)
        .collect();
    let given: HashSet<String> = ordered.iter().cloned().collect();
    if given.len() != ordered.len() {
        return Err(HandlerErr::bad_params("subjectIds contains duplicates"));
    }
    if given != existing {
        return Err(HandlerErr::bad_params(
            "subjectIds must list every subject exactly once",
        )
        .with_details(json!({ "expected": existing.len(), "given": ordered.len() })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (i, id) in ordered.iter().enumerate() {
        tx.execute(
            "UPDATE subjects SET sort_order = ? WHERE id = ?",
            (i as i64, id),
        )
        .map_err(|e| HandlerErr::write("db_update_failed", e))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn subjects_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    if !subject_exists(conn, &subject_id)? {
        return Err(HandlerErr::not_found("subject not found"));
    }
    let used: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM attendance_records WHERE subject_id = ?",
            [&subject_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    if used > 0 {
        return Err(HandlerErr::conflict("subject has attendance records")
            .with_details(json!({ "records": used })));
    }
    conn.execute("DELETE FROM subjects WHERE id = ?", [&subject_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn subjects_match(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    // A blank label is a valid query that simply matches nothing.
    let label = match params.get("label") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(_) => return Err(HandlerErr::bad_params("label must be string or null")),
    };
    let references = store::reference_labels(conn).map_err(HandlerErr::query)?;
    let found = matching::find_match(&label, &references);
    if found.is_none() {
        tracing::debug!(label = %label, "no subject match");
    }
    Ok(json!({
        "match": found,
        "normalizedInput": matching::normalize(&label),
        "candidates": references.len(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(with_db(state, req, |conn, _| subjects_list(conn))),
        "subjects.create" => Some(with_db(state, req, subjects_create)),
        "subjects.update" => Some(with_db(state, req, subjects_update)),
        "subjects.reorder" => Some(with_db(state, req, subjects_reorder)),
        "subjects.delete" => Some(with_db(state, req, subjects_delete)),
        "subjects.match" => Some(with_db(state, req, subjects_match)),
        _ => None,
    }
}
