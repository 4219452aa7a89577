use crate::db;
use crate::export;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::session::RoutePaths;
use serde_json::{json, Map, Value};

pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 480;

#[derive(Clone, Copy)]
pub enum SetupSection {
    Session,
    Reports,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "session" => Some(Self::Session),
            "reports" => Some(Self::Reports),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Session => "setup.session",
            Self::Reports => "setup.reports",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Session => json!({
            "ttlMinutes": DEFAULT_SESSION_TTL_MINUTES,
            "loginPath": "/login",
            "homePath": "/dashboard",
            "publicPaths": []
        }),
        SetupSection::Reports => json!({
            "defaultSheetName": export::DEFAULT_SHEET_NAME,
            "includeNotes": true
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_route(v: &Value, key: &str) -> Result<String, String> {
    let s = parse_string_max(v, key, 200)?;
    if !s.starts_with('/') {
        return Err(format!("{} must start with /", key));
    }
    Ok(s)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Session => match k.as_str() {
                "ttlMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 5, 10080)?));
                }
                "loginPath" | "homePath" => {
                    obj.insert(k.clone(), Value::String(parse_route(v, k)?));
                }
                "publicPaths" => {
                    let arr = v
                        .as_array()
                        .ok_or_else(|| format!("{} must be an array", k))?;
                    if arr.len() > 50 {
                        return Err(format!("{} allows at most 50 entries", k));
                    }
                    let paths = arr
                        .iter()
                        .map(|p| parse_route(p, k).map(Value::String))
                        .collect::<Result<Vec<_>, _>>()?;
                    obj.insert(k.clone(), Value::Array(paths));
                }
                _ => return Err(format!("unknown session field: {}", k)),
            },
            SetupSection::Reports => match k.as_str() {
                "defaultSheetName" => {
                    let s = parse_string_max(v, k, 64)?;
                    obj.insert(k.clone(), Value::String(export::sanitize_sheet_name(&s)));
                }
                "includeNotes" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block setup.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn session_ttl_minutes(conn: &rusqlite::Connection) -> anyhow::Result<i64> {
    let s = load_section(conn, SetupSection::Session)?;
    Ok(s.get("ttlMinutes")
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_SESSION_TTL_MINUTES))
}

pub fn route_paths(conn: &rusqlite::Connection) -> anyhow::Result<RoutePaths> {
    let s = load_section(conn, SetupSection::Session)?;
    let defaults = RoutePaths::default();
    let text = |key: &str, fallback: String| {
        s.get(key)
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .unwrap_or(fallback)
    };
    Ok(RoutePaths {
        login: text("loginPath", defaults.login),
        home: text("homePath", defaults.home),
        public: s
            .get("publicPaths")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|p| p.as_str().map(|p| p.to_string()))
                    .collect()
            })
            .unwrap_or_default(),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session = match load_section(conn, SetupSection::Session) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let reports = match load_section(conn, SetupSection::Reports) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "session": session,
            "reports": reports
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
