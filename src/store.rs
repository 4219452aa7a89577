//! Read-side queries shared by the IPC handlers and `asistencia-admin`.

use crate::matching::{self, ReferenceLabel};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: String,
    pub name: String,
    pub section_count: i64,
    pub subject_count: i64,
    pub user_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub department_id: String,
    pub department_name: String,
    pub name: String,
    pub grade_level: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub code: Option<String>,
    pub department_id: Option<String>,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub name: String,
    pub role: String,
    pub department_id: Option<String>,
    pub active: bool,
}

/// Credentials row; never serialized.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_salt: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct AttendanceFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub user_id: Option<String>,
    pub subject_id: Option<String>,
    pub department_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub subject_id: String,
    pub subject_name: String,
    pub section_id: Option<String>,
    pub section_name: Option<String>,
    pub date: String,
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummaryRow {
    pub user_id: String,
    pub user_name: String,
    pub subject_id: String,
    pub subject_name: String,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub total: i64,
}

// Correlated subqueries avoid double-counting from joins.
const DEPARTMENT_SELECT: &str = "SELECT
       d.id,
       d.name,
       (SELECT COUNT(*) FROM sections s WHERE s.department_id = d.id),
       (SELECT COUNT(*) FROM subjects m WHERE m.department_id = d.id),
       (SELECT COUNT(*) FROM users u WHERE u.department_id = d.id)
     FROM departments d";

fn department_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Department> {
    Ok(Department {
        id: r.get(0)?,
        name: r.get(1)?,
        section_count: r.get(2)?,
        subject_count: r.get(3)?,
        user_count: r.get(4)?,
    })
}

pub fn list_departments(conn: &Connection) -> anyhow::Result<Vec<Department>> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY d.name", DEPARTMENT_SELECT))?;
    let rows = stmt
        .query_map([], department_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// One department with its usage counts.
pub fn get_department(conn: &Connection, department_id: &str) -> anyhow::Result<Option<Department>> {
    Ok(conn
        .query_row(
            &format!("{} WHERE d.id = ?", DEPARTMENT_SELECT),
            [department_id],
            department_row,
        )
        .optional()?)
}

pub fn department_exists(conn: &Connection, department_id: &str) -> anyhow::Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM departments WHERE id = ?",
            [department_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

pub fn list_sections(
    conn: &Connection,
    department_id: Option<&str>,
) -> anyhow::Result<Vec<Section>> {
    let mut sql = String::from(
        "SELECT s.id, s.department_id, d.name, s.name, s.grade_level
         FROM sections s
         JOIN departments d ON d.id = s.department_id",
    );
    let mut bind: Vec<Value> = Vec::new();
    if let Some(dep) = department_id {
        sql.push_str(" WHERE s.department_id = ?");
        bind.push(Value::Text(dep.to_string()));
    }
    sql.push_str(" ORDER BY d.name, s.name");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok(Section {
                id: r.get(0)?,
                department_id: r.get(1)?,
                department_name: r.get(2)?,
                name: r.get(3)?,
                grade_level: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Subjects in catalog order. This order is the priority order used when
/// resolving free-text labels.
pub fn list_subjects(conn: &Connection) -> anyhow::Result<Vec<Subject>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, code, department_id, sort_order
         FROM subjects
         ORDER BY sort_order, name, id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Subject {
                id: r.get(0)?,
                name: r.get(1)?,
                code: r.get(2)?,
                department_id: r.get(3)?,
                sort_order: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Catalog entries usable as match targets. Names that normalize to nothing
/// would match every query, so they are left out here.
pub fn reference_labels(conn: &Connection) -> anyhow::Result<Vec<ReferenceLabel>> {
    Ok(list_subjects(conn)?
        .into_iter()
        .filter(|s| !matching::normalize(&s.name).is_empty())
        .map(|s| ReferenceLabel::new(s.id, s.name))
        .collect())
}

fn map_user(r: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: r.get(0)?,
        username: r.get(1)?,
        name: r.get(2)?,
        role: r.get(3)?,
        department_id: r.get(4)?,
        active: r.get::<_, i64>(5)? != 0,
    })
}

pub fn list_users(conn: &Connection) -> anyhow::Result<Vec<User>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, name, role, department_id, active
         FROM users
         ORDER BY name, username",
    )?;
    let rows = stmt
        .query_map([], map_user)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_user(conn: &Connection, user_id: &str) -> anyhow::Result<Option<User>> {
    Ok(conn
        .query_row(
            "SELECT id, username, name, role, department_id, active
             FROM users WHERE id = ?",
            [user_id],
            map_user,
        )
        .optional()?)
}

pub fn find_user_by_username(
    conn: &Connection,
    username: &str,
) -> anyhow::Result<Option<UserCredentials>> {
    Ok(conn
        .query_row(
            "SELECT id, username, name, role, department_id, active, password_salt, password_hash
             FROM users WHERE username = ?",
            [username.trim()],
            |r| {
                Ok(UserCredentials {
                    user: map_user(r)?,
                    password_salt: r.get(6)?,
                    password_hash: r.get(7)?,
                })
            },
        )
        .optional()?)
}

fn push_attendance_filter(filter: &AttendanceFilter, sql: &mut String, bind: &mut Vec<Value>) {
    let mut clauses: Vec<&str> = Vec::new();
    if let Some(from) = filter.from {
        clauses.push("a.date >= ?");
        bind.push(Value::Text(from.format("%Y-%m-%d").to_string()));
    }
    if let Some(to) = filter.to {
        clauses.push("a.date <= ?");
        bind.push(Value::Text(to.format("%Y-%m-%d").to_string()));
    }
    if let Some(user_id) = &filter.user_id {
        clauses.push("a.user_id = ?");
        bind.push(Value::Text(user_id.clone()));
    }
    if let Some(subject_id) = &filter.subject_id {
        clauses.push("a.subject_id = ?");
        bind.push(Value::Text(subject_id.clone()));
    }
    if let Some(department_id) = &filter.department_id {
        clauses.push("u.department_id = ?");
        bind.push(Value::Text(department_id.clone()));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
}

pub fn list_attendance(
    conn: &Connection,
    filter: &AttendanceFilter,
) -> anyhow::Result<Vec<AttendanceRecord>> {
    let mut sql = String::from(
        "SELECT a.id, a.user_id, u.name, a.subject_id, m.name, a.section_id, s.name,
                a.date, a.status, a.notes
         FROM attendance_records a
         JOIN users u ON u.id = a.user_id
         JOIN subjects m ON m.id = a.subject_id
         LEFT JOIN sections s ON s.id = a.section_id",
    );
    let mut bind: Vec<Value> = Vec::new();
    push_attendance_filter(filter, &mut sql, &mut bind);
    sql.push_str(" ORDER BY a.date, u.name, m.sort_order, m.name");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok(AttendanceRecord {
                id: r.get(0)?,
                user_id: r.get(1)?,
                user_name: r.get(2)?,
                subject_id: r.get(3)?,
                subject_name: r.get(4)?,
                section_id: r.get(5)?,
                section_name: r.get(6)?,
                date: r.get(7)?,
                status: r.get(8)?,
                notes: r.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn attendance_summary(
    conn: &Connection,
    filter: &AttendanceFilter,
) -> anyhow::Result<Vec<AttendanceSummaryRow>> {
    let mut sql = String::from(
        "SELECT a.user_id, u.name, a.subject_id, m.name,
                SUM(CASE WHEN a.status = 'present' THEN 1 ELSE 0 END),
                SUM(CASE WHEN a.status = 'absent' THEN 1 ELSE 0 END),
                SUM(CASE WHEN a.status = 'late' THEN 1 ELSE 0 END),
                SUM(CASE WHEN a.status = 'excused' THEN 1 ELSE 0 END),
                COUNT(*)
         FROM attendance_records a
         JOIN users u ON u.id = a.user_id
         JOIN subjects m ON m.id = a.subject_id",
    );
    let mut bind: Vec<Value> = Vec::new();
    push_attendance_filter(filter, &mut sql, &mut bind);
    sql.push_str(" GROUP BY a.user_id, a.subject_id ORDER BY u.name, m.sort_order, m.name");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok(AttendanceSummaryRow {
                user_id: r.get(0)?,
                user_name: r.get(1)?,
                subject_id: r.get(2)?,
                subject_name: r.get(3)?,
                present: r.get(4)?,
                absent: r.get(5)?,
                late: r.get(6)?,
                excused: r.get(7)?,
                total: r.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
