use crate::ipc::helpers::{get_optional_str, get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::{self, DbSessions, RouteDecision, Session, SessionResolver};
use crate::store;
use serde_json::json;

use super::setup;

pub fn session_json(s: &Session) -> serde_json::Value {
    json!({
        "id": s.id,
        "name": s.name,
        "role": s.role().as_str(),
        "rawRole": s.role,
        "departmentId": s.department_id,
    })
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        let username = get_required_str(params, "username")?;
        let password = params
            .get("password")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params("missing password"))?;

        let creds = store::find_user_by_username(conn, &username).map_err(HandlerErr::query)?;
        let Some(creds) = creds else {
            tracing::warn!(username = %username, "login rejected: unknown user");
            return Err(HandlerErr::new("unauthorized", "invalid username or password"));
        };
        if !session::verify_password(&creds.password_salt, &creds.password_hash, password) {
            tracing::warn!(username = %username, "login rejected: bad password");
            return Err(HandlerErr::new("unauthorized", "invalid username or password"));
        }
        if !creds.user.active {
            return Err(HandlerErr::new("unauthorized", "account is disabled"));
        }

        let ttl = setup::session_ttl_minutes(conn).map_err(HandlerErr::query)?;
        let (token, expires_at) = session::open_session(conn, &creds.user.id, ttl)
            .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
        let s = Session {
            id: creds.user.id.clone(),
            name: creds.user.name.clone(),
            role: creds.user.role.clone(),
            department_id: creds.user.department_id.clone(),
        };
        tracing::info!(user = %s.id, role = s.role().as_str(), "login");
        Ok(json!({
            "token": token,
            "expiresAt": expires_at.to_rfc3339(),
            "session": session_json(&s),
        }))
    })
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        let token = get_required_str(params, "token")?;
        let removed = session::close_session(conn, &token)
            .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
        if removed {
            tracing::info!("logout");
        }
        Ok(json!({ "removed": removed }))
    })
}

fn handle_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, params| {
        let token = get_optional_str(params, "token")?.unwrap_or_default();
        let resolved = DbSessions::new(conn).resolve(&token);
        Ok(json!({ "session": resolved.as_ref().map(session_json) }))
    })
}

fn handle_guard(state: &mut AppState, req: &Request) -> serde_json::Value {
    let menu = state.menu.clone();
    with_db(state, req, |conn, params| {
        let path = get_required_str(params, "path")?;
        let token = get_optional_str(params, "token")?;
        let resolved = token.and_then(|t| DbSessions::new(conn).resolve(&t));
        let paths = setup::route_paths(conn).map_err(HandlerErr::query)?;

        let decision = session::guard(&path, resolved.as_ref(), &menu, &paths);
        let role = resolved.as_ref().map(|s| s.role().as_str());
        Ok(match decision {
            RouteDecision::Allow => json!({
                "action": "allow",
                "authenticated": resolved.is_some(),
                "role": role,
            }),
            RouteDecision::Redirect(to) => json!({
                "action": "redirect",
                "to": to,
                "authenticated": resolved.is_some(),
                "role": role,
            }),
        })
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.session" => Some(handle_session(state, req)),
        "auth.guard" => Some(handle_guard(state, req)),
        _ => None,
    }
}
