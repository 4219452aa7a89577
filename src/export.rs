use anyhow::Context;
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const DEFAULT_SHEET_NAME: &str = "Reporte";
const MAX_SHEET_NAME_CHARS: usize = 31;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Written {
        path: PathBuf,
        rows: usize,
        columns: usize,
    },
    /// Nothing to write; no file was created.
    Skipped,
}

/// Excel rejects `[]:*?/\` in sheet names and caps them at 31 chars.
pub fn sanitize_sheet_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .collect();
    let cleaned = cleaned.trim().trim_matches('\'').trim();
    let truncated: String = cleaned.chars().take(MAX_SHEET_NAME_CHARS).collect();
    let truncated = truncated.trim_end();
    if truncated.is_empty() {
        DEFAULT_SHEET_NAME.to_string()
    } else {
        truncated.to_string()
    }
}

fn write_cell(ws: &mut Worksheet, row: u32, col: u16, value: &Value) -> anyhow::Result<()> {
    match value {
        Value::Null => {}
        Value::Bool(b) => {
            ws.write_boolean(row, col, *b)?;
        }
        Value::Number(n) => match n.as_f64() {
            Some(f) => {
                ws.write_number(row, col, f)?;
            }
            None => {
                ws.write_string(row, col, n.to_string())?;
            }
        },
        Value::String(s) => {
            ws.write_string(row, col, s)?;
        }
        other => {
            ws.write_string(row, col, other.to_string())?;
        }
    }
    Ok(())
}

/// Writes `records` to an `.xlsx` workbook with a single sheet.
///
/// Columns come from the keys of the first record, in order; later records
/// are looked up by those keys and missing values are left blank. An empty
/// slice is a no-op.
pub fn export_records(
    records: &[Map<String, Value>],
    path: &Path,
    sheet_name: &str,
) -> anyhow::Result<ExportOutcome> {
    let Some(first) = records.first() else {
        return Ok(ExportOutcome::Skipped);
    };
    let headers: Vec<&String> = first.keys().collect();
    if headers.len() > u16::MAX as usize {
        anyhow::bail!("too many columns: {}", headers.len());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
    }

    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let ws = workbook.add_worksheet();
    ws.set_name(sanitize_sheet_name(sheet_name))?;

    for (col, header) in headers.iter().enumerate() {
        ws.write_string_with_format(0, col as u16, header.as_str(), &header_format)?;
    }
    for (i, record) in records.iter().enumerate() {
        let row = u32::try_from(i + 1).context("too many rows")?;
        for (col, header) in headers.iter().enumerate() {
            if let Some(value) = record.get(header.as_str()) {
                write_cell(ws, row, col as u16, value)?;
            }
        }
    }
    ws.set_freeze_panes(1, 0)?;
    ws.autofit();

    workbook
        .save(path)
        .with_context(|| format!("failed to save {}", path.to_string_lossy()))?;

    tracing::info!(
        path = %path.to_string_lossy(),
        rows = records.len(),
        "spreadsheet exported"
    );
    Ok(ExportOutcome::Written {
        path: path.to_path_buf(),
        rows: records.len(),
        columns: headers.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_names_follow_excel_rules() {
        assert_eq!(sanitize_sheet_name("Asistencia: 2024/25"), "Asistencia 202425");
        assert_eq!(sanitize_sheet_name("   "), DEFAULT_SHEET_NAME);
        assert_eq!(sanitize_sheet_name("[]*?"), DEFAULT_SHEET_NAME);
        assert_eq!(
            sanitize_sheet_name("Resumen de asistencia por docente y materia"),
            "Resumen de asistencia por docen"
        );
    }

    #[test]
    fn empty_input_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vacio.xlsx");
        let outcome = export_records(&[], &path, "Hoja").expect("export");
        assert_eq!(outcome, ExportOutcome::Skipped);
        assert!(!path.exists());
    }
}
