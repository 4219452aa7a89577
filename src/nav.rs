//! Role-aware dashboard navigation.
//!
//! The menu is an explicit immutable value handed to whoever renders
//! navigation or guards routes; nothing here is global.

use crate::matching;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Admin,
    Coordinator,
    Teacher,
    Unknown,
}

impl Role {
    /// Maps a stored or user-supplied role string onto a known role.
    /// Case, accents and surrounding whitespace are ignored.
    pub fn normalize(raw: &str) -> Self {
        match matching::normalize(raw).as_str() {
            "ADMIN" | "ADMINISTRADOR" | "ADMINISTRADORA" | "ADMINISTRATOR" => Role::Admin,
            "COORD" | "COORDINADOR" | "COORDINADORA" | "COORDINATOR" => Role::Coordinator,
            "DOCENTE" | "TEACHER" | "PROFESOR" | "PROFESORA" => Role::Teacher,
            _ => Role::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Coordinator => "coordinator",
            Role::Teacher => "teacher",
            Role::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    Everyone,
    AdminOnly,
    AdminOrCoord,
    DocenteOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuItem {
    pub key: String,
    pub label: String,
    pub href: String,
    pub visibility: Visibility,
}

impl MenuItem {
    pub fn new(key: &str, label: &str, href: &str, visibility: Visibility) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            href: href.to_string(),
            visibility,
        }
    }

    fn guards(&self, path: &str) -> bool {
        let href = self.href.trim_end_matches('/');
        path == href
            || path
                .strip_prefix(href)
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    }
}

pub fn is_visible(item: &MenuItem, role: Role) -> bool {
    match item.visibility {
        Visibility::Everyone => true,
        Visibility::AdminOnly => role == Role::Admin,
        Visibility::AdminOrCoord => matches!(role, Role::Admin | Role::Coordinator),
        Visibility::DocenteOnly => role == Role::Teacher,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
    items: Vec<MenuItem>,
}

impl Menu {
    pub fn new(items: Vec<MenuItem>) -> Self {
        Self { items }
    }

    /// The stock dashboard layout.
    pub fn default_school() -> Self {
        Self::new(vec![
            MenuItem::new("dashboard", "Inicio", "/dashboard", Visibility::Everyone),
            MenuItem::new(
                "users",
                "Usuarios",
                "/dashboard/usuarios",
                Visibility::AdminOnly,
            ),
            MenuItem::new(
                "departments",
                "Departamentos",
                "/dashboard/departamentos",
                Visibility::AdminOnly,
            ),
            MenuItem::new(
                "sections",
                "Secciones",
                "/dashboard/secciones",
                Visibility::AdminOrCoord,
            ),
            MenuItem::new(
                "subjects",
                "Materias",
                "/dashboard/materias",
                Visibility::AdminOrCoord,
            ),
            MenuItem::new(
                "attendance",
                "Mi asistencia",
                "/dashboard/asistencia",
                Visibility::DocenteOnly,
            ),
            MenuItem::new(
                "reports",
                "Reportes",
                "/dashboard/reportes",
                Visibility::AdminOrCoord,
            ),
        ])
    }

    pub fn items(&self) -> &[MenuItem] {
        &self.items
    }

    pub fn get(&self, key: &str) -> Option<&MenuItem> {
        self.items.iter().find(|i| i.key == key)
    }

    pub fn visible_for(&self, role: Role) -> Vec<&MenuItem> {
        self.items.iter().filter(|i| is_visible(i, role)).collect()
    }

    /// The item owning `path`; the longest matching `href` wins so nested
    /// pages resolve to their own entry rather than the dashboard root.
    pub fn item_for_path(&self, path: &str) -> Option<&MenuItem> {
        self.items
            .iter()
            .filter(|i| i.guards(path))
            .max_by_key(|i| i.href.trim_end_matches('/').len())
    }
}
