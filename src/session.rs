//! Login sessions and route protection.
//!
//! Session tokens are opaque: callers hand a token to a `SessionResolver`
//! and get back a `Session` or nothing. The route guard only cares whether a
//! session exists and which role it carries.

use crate::nav::{self, Menu, Role};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub name: String,
    pub role: String,
    pub department_id: Option<String>,
}

impl Session {
    pub fn role(&self) -> Role {
        Role::normalize(&self.role)
    }
}

pub trait SessionResolver {
    fn resolve(&self, token: &str) -> Option<Session>;
}

/// Resolves tokens against the `sessions` table of an open workspace.
pub struct DbSessions<'a> {
    conn: &'a Connection,
    now: DateTime<Utc>,
}

impl<'a> DbSessions<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            now: Utc::now(),
        }
    }

    pub fn at(conn: &'a Connection, now: DateTime<Utc>) -> Self {
        Self { conn, now }
    }

    fn lookup(&self, token: &str) -> anyhow::Result<Option<Session>> {
        let row: Option<(Session, String)> = self
            .conn
            .query_row(
                "SELECT u.id, u.name, u.role, u.department_id, s.expires_at
                 FROM sessions s
                 JOIN users u ON u.id = s.user_id
                 WHERE s.token = ? AND u.active = 1",
                [token],
                |r| {
                    Ok((
                        Session {
                            id: r.get(0)?,
                            name: r.get(1)?,
                            role: r.get(2)?,
                            department_id: r.get(3)?,
                        },
                        r.get(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((session, expires_at)) = row else {
            return Ok(None);
        };
        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .with_context(|| format!("bad expires_at {:?}", expires_at))?;
        if expires_at.with_timezone(&Utc) <= self.now {
            return Ok(None);
        }
        Ok(Some(session))
    }
}

impl SessionResolver for DbSessions<'_> {
    fn resolve(&self, token: &str) -> Option<Session> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        match self.lookup(token) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "session lookup failed");
                None
            }
        }
    }
}

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Constant-time comparison against the stored hex digest.
pub fn verify_password(salt: &str, expected_hash: &str, password: &str) -> bool {
    let computed = hash_password(salt, password);
    computed.as_bytes().ct_eq(expected_hash.as_bytes()).into()
}

/// Fresh salt and hash for storing a new password.
pub fn new_password_hash(password: &str) -> (String, String) {
    let salt = Uuid::new_v4().simple().to_string();
    let hash = hash_password(&salt, password);
    (salt, hash)
}

/// Starts a session for `user_id` and returns its token.
pub fn open_session(
    conn: &Connection,
    user_id: &str,
    ttl_minutes: i64,
) -> anyhow::Result<(String, DateTime<Utc>)> {
    let token = Uuid::new_v4().to_string();
    let now = Utc::now();
    let expires_at = now + Duration::minutes(ttl_minutes);
    conn.execute(
        "INSERT INTO sessions(token, user_id, created_at, expires_at) VALUES(?, ?, ?, ?)",
        (
            &token,
            user_id,
            now.to_rfc3339(),
            expires_at.to_rfc3339(),
        ),
    )?;
    // Piggyback cleanup of stale rows on login.
    conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?",
        [now.to_rfc3339()],
    )?;
    Ok((token, expires_at))
}

/// Returns whether a session row was removed.
pub fn close_session(conn: &Connection, token: &str) -> anyhow::Result<bool> {
    let n = conn.execute("DELETE FROM sessions WHERE token = ?", [token.trim()])?;
    Ok(n > 0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePaths {
    pub login: String,
    pub home: String,
    pub public: Vec<String>,
}

impl Default for RoutePaths {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            home: "/dashboard".to_string(),
            public: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    Redirect(String),
}

/// `"/"` only covers the root itself; any other prefix covers its subtree.
fn under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return path == "/";
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

fn clean_path(path: &str) -> &str {
    let path = path.split(&['?', '#'][..]).next().unwrap_or_default();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Decides whether a request for `path` goes through.
///
/// Anonymous requests are sent to the login page unless they target it (or
/// a public path). Signed-in requests to the login page go home, as do
/// requests for pages whose menu entry the session's role may not see.
pub fn guard(
    path: &str,
    session: Option<&Session>,
    menu: &Menu,
    paths: &RoutePaths,
) -> RouteDecision {
    let path = clean_path(path);
    let is_login = under(path, &paths.login);

    let Some(session) = session else {
        if is_login || paths.public.iter().any(|p| under(path, p)) {
            return RouteDecision::Allow;
        }
        return RouteDecision::Redirect(paths.login.clone());
    };

    if is_login {
        return RouteDecision::Redirect(paths.home.clone());
    }
    if let Some(item) = menu.item_for_path(path) {
        if !nav::is_visible(item, session.role()) {
            return RouteDecision::Redirect(paths.home.clone());
        }
    }
    RouteDecision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(role: &str) -> Session {
        Session {
            id: "u1".into(),
            name: "Ana".into(),
            role: role.into(),
            department_id: None,
        }
    }

    fn decide(path: &str, s: Option<&Session>) -> RouteDecision {
        guard(path, s, &Menu::default_school(), &RoutePaths::default())
    }

    #[test]
    fn anonymous_requests_go_to_login() {
        assert_eq!(
            decide("/dashboard", None),
            RouteDecision::Redirect("/login".into())
        );
        assert_eq!(decide("/", None), RouteDecision::Redirect("/login".into()));
        assert_eq!(decide("/login", None), RouteDecision::Allow);
        assert_eq!(decide("/login/?next=/x", None), RouteDecision::Allow);
    }

    #[test]
    fn public_paths_are_open() {
        let paths = RoutePaths {
            public: vec!["/publico".into()],
            ..RoutePaths::default()
        };
        let menu = Menu::default_school();
        assert_eq!(guard("/publico/horarios", None, &menu, &paths), RouteDecision::Allow);
        assert_eq!(
            guard("/publicox", None, &menu, &paths),
            RouteDecision::Redirect("/login".into())
        );
    }

    #[test]
    fn signed_in_requests_skip_login() {
        let s = session("docente");
        assert_eq!(
            decide("/login", Some(&s)),
            RouteDecision::Redirect("/dashboard".into())
        );
        assert_eq!(decide("/dashboard", Some(&s)), RouteDecision::Allow);
    }

    #[test]
    fn role_gates_menu_pages() {
        let teacher = session("Docente");
        let coord = session("coordinador");
        let admin = session("ADMIN");

        assert_eq!(
            decide("/dashboard/usuarios", Some(&teacher)),
            RouteDecision::Redirect("/dashboard".into())
        );
        assert_eq!(
            decide("/dashboard/usuarios/nuevo", Some(&coord)),
            RouteDecision::Redirect("/dashboard".into())
        );
        assert_eq!(decide("/dashboard/usuarios", Some(&admin)), RouteDecision::Allow);
        assert_eq!(decide("/dashboard/materias", Some(&coord)), RouteDecision::Allow);
        assert_eq!(decide("/dashboard/asistencia", Some(&teacher)), RouteDecision::Allow);
        assert_eq!(
            decide("/dashboard/asistencia", Some(&admin)),
            RouteDecision::Redirect("/dashboard".into())
        );
        // Pages outside the menu are not role-gated.
        assert_eq!(decide("/perfil", Some(&teacher)), RouteDecision::Allow);
    }

    #[test]
    fn password_hash_is_salted() {
        let a = hash_password("s1", "secreto");
        let b = hash_password("s2", "secreto");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(verify_password("s1", &a, "secreto"));
        assert!(!verify_password("s1", &a, "Secreto"));
        assert!(!verify_password("s1", &a[..63], "secreto"));
        assert!(!verify_password("s1", "", "secreto"));
    }

    #[test]
    fn root_login_path_covers_only_the_root() {
        let paths = RoutePaths {
            login: "/".into(),
            ..RoutePaths::default()
        };
        let menu = Menu::default_school();
        assert_eq!(guard("/", None, &menu, &paths), RouteDecision::Allow);
        assert_eq!(guard("/?next=x", None, &menu, &paths), RouteDecision::Allow);
        assert_eq!(
            guard("/dashboard", None, &menu, &paths),
            RouteDecision::Redirect("/".into())
        );
        let s = session("docente");
        assert_eq!(
            guard("/", Some(&s), &menu, &paths),
            RouteDecision::Redirect("/dashboard".into())
        );
        assert_eq!(guard("/dashboard", Some(&s), &menu, &paths), RouteDecision::Allow);
    }

    #[test]
    fn root_public_path_opens_only_the_root() {
        let paths = RoutePaths {
            public: vec!["/".into()],
            ..RoutePaths::default()
        };
        let menu = Menu::default_school();
        assert_eq!(guard("/", None, &menu, &paths), RouteDecision::Allow);
        assert_eq!(
            guard("/dashboard", None, &menu, &paths),
            RouteDecision::Redirect("/login".into())
        );
    }
}
