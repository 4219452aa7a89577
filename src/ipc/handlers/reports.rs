use crate::export::{self, ExportOutcome};
use crate::ipc::helpers::{get_optional_str, get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, AttendanceFilter};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::path::PathBuf;

use super::attendance::parse_filter;
use super::setup::{self, SetupSection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportKind {
    Summary,
    Records,
}

impl ReportKind {
    fn parse(raw: Option<&str>) -> Result<Self, HandlerErr> {
        match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
            None | Some("summary") => Ok(Self::Summary),
            Some("records") => Ok(Self::Records),
            Some(other) => Err(HandlerErr::bad_params("kind must be one of: summary, records")
                .with_details(json!({ "kind": other }))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Records => "records",
        }
    }
}

struct ReportSettings {
    default_sheet_name: String,
    include_notes: bool,
}

fn report_settings(conn: &Connection) -> Result<ReportSettings, HandlerErr> {
    let s = setup::load_section(conn, SetupSection::Reports).map_err(HandlerErr::query)?;
    Ok(ReportSettings {
        default_sheet_name: s
            .get("defaultSheetName")
            .and_then(|v| v.as_str())
            .unwrap_or(export::DEFAULT_SHEET_NAME)
            .to_string(),
        include_notes: s
            .get("includeNotes")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
    })
}

fn summary_sheet_rows(conn: &Connection, filter: &AttendanceFilter) -> Result<Vec<Map<String, Value>>, HandlerErr> {
    let rows = store::attendance_summary(conn, filter).map_err(HandlerErr::query)?;
    Ok(rows
        .into_iter()
        .map(|r| {
            let mut m = Map::new();
            m.insert("Docente".into(), Value::from(r.user_name));
            m.insert("Materia".into(), Value::from(r.subject_name));
            m.insert("Presentes".into(), Value::from(r.present));
            m.insert("Ausentes".into(), Value::from(r.absent));
            m.insert("Tardanzas".into(), Value::from(r.late));
            m.insert("Justificadas".into(), Value::from(r.excused));
            m.insert("Total".into(), Value::from(r.total));
            m
        })
        .collect())
}

fn record_sheet_rows(
    conn: &Connection,
    filter: &AttendanceFilter,
    include_notes: bool,
) -> Result<Vec<Map<String, Value>>, HandlerErr> {
    let rows = store::list_attendance(conn, filter).map_err(HandlerErr::query)?;
    Ok(rows
        .into_iter()
        .map(|r| {
            let mut m = Map::new();
            m.insert("Fecha".into(), Value::from(r.date));
            m.insert("Docente".into(), Value::from(r.user_name));
            m.insert("Materia".into(), Value::from(r.subject_name));
            m.insert("Sección".into(), r.section_name.map(Value::from).unwrap_or(Value::Null));
            m.insert("Estado".into(), Value::from(r.status));
            if include_notes {
                m.insert("Notas".into(), r.notes.map(Value::from).unwrap_or(Value::Null));
            }
            m
        })
        .collect())
}

fn reports_attendance_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let filter = parse_filter(params)?;
    let rows = store::attendance_summary(conn, &filter).map_err(HandlerErr::query)?;
    let total: i64 = rows.iter().map(|r| r.total).sum();
    Ok(json!({ "rows": rows, "totalRecords": total }))
}

fn reports_export_xlsx(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let kind = ReportKind::parse(params.get("kind").and_then(|v| v.as_str()))?;
    let path = PathBuf::from(get_required_str(params, "path")?);
    let filter = parse_filter(params)?;
    let settings = report_settings(conn)?;
    let sheet_name =
        get_optional_str(params, "sheetName")?.unwrap_or(settings.default_sheet_name);

    let records = match kind {
        ReportKind::Summary => summary_sheet_rows(conn, &filter)?,
        ReportKind::Records => record_sheet_rows(conn, &filter, settings.include_notes)?,
    };
    let outcome = export::export_records(&records, &path, &sheet_name)
        .map_err(|e| HandlerErr::new("export_failed", format!("{e:?}")))?;

    Ok(match outcome {
        ExportOutcome::Written {
            path,
            rows,
            columns,
        } => json!({
            "kind": kind.as_str(),
            "written": true,
            "path": path.to_string_lossy(),
            "rows": rows,
            "columns": columns,
            "sheetName": export::sanitize_sheet_name(&sheet_name),
        }),
        ExportOutcome::Skipped => json!({
            "kind": kind.as_str(),
            "written": false,
            "rows": 0,
        }),
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.attendanceSummary" => Some(with_db(state, req, reports_attendance_summary)),
        "reports.exportXlsx" => Some(with_db(state, req, reports_export_xlsx)),
        _ => None,
    }
}
