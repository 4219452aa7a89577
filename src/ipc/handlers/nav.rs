use crate::ipc::error::{err, ok};
use crate::ipc::helpers::get_optional_str;
use crate::ipc::types::{AppState, Request};
use crate::nav::{self, Role};
use crate::session::{DbSessions, SessionResolver};
use serde_json::json;

/// Role from `params.role`, or from the session behind `params.token`.
fn requested_role(state: &AppState, req: &Request) -> Result<Role, serde_json::Value> {
    let role = get_optional_str(&req.params, "role").map_err(|e| e.response(&req.id))?;
    if let Some(role) = role {
        return Ok(Role::normalize(&role));
    }
    let token = get_optional_str(&req.params, "token").map_err(|e| e.response(&req.id))?;
    let Some(token) = token else {
        return Err(err(&req.id, "bad_params", "missing role or token", None));
    };
    let Some(conn) = state.db.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    DbSessions::new(conn)
        .resolve(&token)
        .map(|s| s.role())
        .ok_or_else(|| err(&req.id, "unauthorized", "no active session", None))
}

fn handle_menu(state: &mut AppState, req: &Request) -> serde_json::Value {
    let role = match requested_role(state, req) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let items = state.menu.visible_for(role);
    ok(&req.id, json!({ "role": role.as_str(), "items": items }))
}

fn handle_is_visible(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(key) = req.params.get("key").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing key", None);
    };
    let role = match requested_role(state, req) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let Some(item) = state.menu.get(key) else {
        return err(&req.id, "not_found", "menu item not found", None);
    };
    ok(
        &req.id,
        json!({ "key": key, "role": role.as_str(), "visible": nav::is_visible(item, role) }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "nav.menu" => Some(handle_menu(state, req)),
        "nav.isVisible" => Some(handle_is_visible(state, req)),
        _ => None,
    }
}
