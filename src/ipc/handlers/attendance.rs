use crate::ipc::helpers::{
    get_optional_date, get_optional_str, get_required_str, parse_date, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::matching;
use crate::store::{self, AttendanceFilter};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const MAX_IMPORT_ROWS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    /// Accepts the stored codes plus the labels used on paper sheets.
    pub fn parse(raw: &str) -> Option<Self> {
        match matching::normalize(raw).as_str() {
            "PRESENT" | "PRESENTE" | "P" | "ASISTIO" => Some(Self::Present),
            "ABSENT" | "AUSENTE" | "A" | "FALTA" | "INASISTENCIA" => Some(Self::Absent),
            "LATE" | "TARDE" | "TARDANZA" | "RETARDO" | "T" | "L" => Some(Self::Late),
            "EXCUSED" | "JUSTIFICADO" | "JUSTIFICADA" | "PERMISO" | "J" | "E" => {
                Some(Self::Excused)
            }
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
            Self::Excused => "excused",
        }
    }
}

fn exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::query)
}

/// Inserts or overwrites the record for (user, subject, section, date).
/// Returns the record id and whether it was newly created.
fn upsert_record(
    conn: &Connection,
    user_id: &str,
    subject_id: &str,
    section_id: Option<&str>,
    date: &str,
    status: AttendanceStatus,
    notes: Option<&str>,
) -> rusqlite::Result<(String, bool)> {
    let now = chrono::Utc::now().to_rfc3339();
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM attendance_records
             WHERE user_id = ? AND subject_id = ? AND IFNULL(section_id, '') = IFNULL(?, '') AND date = ?",
            (user_id, subject_id, section_id, date),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        conn.execute(
            "UPDATE attendance_records SET status = ?, notes = ?, updated_at = ? WHERE id = ?",
            (status.as_str(), notes, &now, &id),
        )?;
        return Ok((id, false));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO attendance_records(id, user_id, subject_id, section_id, date, status, notes, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (&id, user_id, subject_id, section_id, date, status.as_str(), notes, &now),
    )?;
    Ok((id, true))
}

fn attendance_record(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let section_id = get_optional_str(params, "sectionId")?;
    let date = parse_date(&get_required_str(params, "date")?, "date")?;
    let status_raw = get_required_str(params, "status")?;
    let Some(status) = AttendanceStatus::parse(&status_raw) else {
        return Err(HandlerErr::bad_params(
            "status must be one of: present, absent, late, excused",
        )
        .with_details(json!({ "status": status_raw })));
    };
    let notes = get_optional_str(params, "notes")?;

    if !exists(conn, "SELECT 1 FROM users WHERE id = ?", &user_id)? {
        return Err(HandlerErr::not_found("user not found"));
    }
    if !exists(conn, "SELECT 1 FROM subjects WHERE id = ?", &subject_id)? {
        return Err(HandlerErr::not_found("subject not found"));
    }
    if let Some(section_id) = &section_id {
        if !exists(conn, "SELECT 1 FROM sections WHERE id = ?", section_id)? {
            return Err(HandlerErr::not_found("section not found"));
        }
    }

    let date = date.format("%Y-%m-%d").to_string();
    let (record_id, created) = upsert_record(
        conn,
        &user_id,
        &subject_id,
        section_id.as_deref(),
        &date,
        status,
        notes.as_deref(),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", e))?;
    Ok(json!({ "recordId": record_id, "created": created, "status": status.as_str() }))
}

pub fn parse_filter(params: &serde_json::Value) -> Result<AttendanceFilter, HandlerErr> {
    let filter = AttendanceFilter {
        from: get_optional_date(params, "from")?,
        to: get_optional_date(params, "to")?,
        user_id: get_optional_str(params, "userId")?,
        subject_id: get_optional_str(params, "subjectId")?,
        department_id: get_optional_str(params, "departmentId")?,
    };
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if from > to {
            return Err(HandlerErr::bad_params("from must not be after to"));
        }
    }
    Ok(filter)
}

fn attendance_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let filter = parse_filter(params)?;
    let records = store::list_attendance(conn, &filter).map_err(HandlerErr::query)?;
    Ok(json!({ "records": records }))
}

fn attendance_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let record_id = get_required_str(params, "recordId")?;
    let n = conn
        .execute("DELETE FROM attendance_records WHERE id = ?", [&record_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", e))?;
    if n == 0 {
        return Err(HandlerErr::not_found("record not found"));
    }
    Ok(json!({ "ok": true }))
}

fn row_field<'a>(row: &'a serde_json::Value, key: &str) -> &'a str {
    row.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

/// Imports rows transcribed from attendance sheets. Subject names are free
/// text and are resolved against the catalog; rows that cannot be resolved
/// are reported back instead of failing the whole batch.
fn attendance_import_rows(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(rows) = params.get("rows").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("rows must be an array"));
    };
    if rows.len() > MAX_IMPORT_ROWS {
        return Err(HandlerErr::bad_params(format!(
            "at most {} rows per import",
            MAX_IMPORT_ROWS
        )));
    }

    let references = store::reference_labels(conn).map_err(HandlerErr::query)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let mut imported = 0usize;
    let mut updated = 0usize;
    let mut unmatched: Vec<serde_json::Value> = Vec::new();
    let mut resolved: Vec<serde_json::Value> = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        let username = row_field(row, "username");
        let subject_label = row_field(row, "subject");
        let date_raw = row_field(row, "date");
        let status_raw = row_field(row, "status");

        let user = store::find_user_by_username(&tx, username).map_err(HandlerErr::query)?;
        let Some(user) = user else {
            unmatched.push(json!({ "row": i, "reason": "unknown_user", "value": username }));
            continue;
        };
        let Some(found) = matching::find_match(subject_label, &references) else {
            unmatched.push(json!({
                "row": i,
                "reason": "unknown_subject",
                "value": subject_label,
                "normalizedInput": matching::normalize(subject_label),
            }));
            continue;
        };
        let Ok(date) = parse_date(date_raw, "date") else {
            unmatched.push(json!({ "row": i, "reason": "bad_date", "value": date_raw }));
            continue;
        };
        let Some(status) = AttendanceStatus::parse(status_raw) else {
            unmatched.push(json!({ "row": i, "reason": "bad_status", "value": status_raw }));
            continue;
        };
        let notes = row
            .get("notes")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let date = date.format("%Y-%m-%d").to_string();
        let (_, created) = upsert_record(
            &tx,
            &user.user.id,
            &found.id,
            None,
            &date,
            status,
            notes,
        )
        .map_err(|e| {
            HandlerErr::write("db_insert_failed", e).with_details(json!({ "row": i }))
        })?;
        if created {
            imported += 1;
        } else {
            updated += 1;
        }
        resolved.push(json!({ "row": i, "subject": found }));
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(
        imported,
        updated,
        unmatched = unmatched.len(),
        "attendance rows imported"
    );
    Ok(json!({
        "imported": imported,
        "updated": updated,
        "unmatched": unmatched,
        "resolved": resolved,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.record" => Some(with_db(state, req, attendance_record)),
        "attendance.list" => Some(with_db(state, req, attendance_list)),
        "attendance.delete" => Some(with_db(state, req, attendance_delete)),
        "attendance.importRows" => Some(with_db(state, req, attendance_import_rows)),
        _ => None,
    }
}
