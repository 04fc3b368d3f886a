//! Normalized command caller.

use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Host-supplied permission predicate, consulted before any static table.
pub type PermissionCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// The player or operator issuing a command.
#[derive(Clone, Default)]
pub struct Actor {
    pub id: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub is_admin: bool,
    pub permissions: Option<BTreeSet<String>>,
    pub permission_check: Option<PermissionCheck>,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Actor with no identity and no permission data (console callers, tests).
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_admin_flag(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = Some(permissions.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_permission_check(mut self, check: PermissionCheck) -> Self {
        self.permission_check = Some(check);
        self
    }

    /// Name for chat output, falling back to the id and then `unknown`.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or("unknown")
    }

    /// Builds an actor from loosely shaped host JSON.
    ///
    /// Accepted keys: `id`/`Guid`/`guid`/`player_id`, `name`/`Name`,
    /// `role`/`Role`, `isAdmin`/`is_admin`/`IsAdmin`, `permissions`/`Permissions`
    /// (array of strings). Unknown keys are ignored.
    pub fn from_host_value(value: &Value) -> Self {
        let text = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| value.get(*key))
                .find_map(|field| match field {
                    Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
                    Value::Number(number) => Some(number.to_string()),
                    _ => None,
                })
        };

        let is_admin = ["isAdmin", "is_admin", "IsAdmin"]
            .iter()
            .filter_map(|key| value.get(*key))
            .any(|field| field.as_bool() == Some(true));

        let permissions = ["permissions", "Permissions"]
            .iter()
            .filter_map(|key| value.get(*key))
            .find_map(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect::<BTreeSet<_>>()
            });

        Self {
            id: text(&["id", "Guid", "guid", "player_id"]),
            name: text(&["name", "Name"]),
            role: text(&["role", "Role"]),
            is_admin,
            permissions,
            permission_check: None,
        }
    }
}

impl Debug for Actor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("is_admin", &self.is_admin)
            .field("permissions", &self.permissions)
            .field("permission_check", &self.permission_check.is_some())
            .finish()
    }
}
