//! Role → permission evaluation.
//!
//! Resolution order for a non-admin permission:
//! 1. actor-supplied permission check capability,
//! 2. actor-supplied permission set (`*` grants everything),
//! 3. static role table,
//! 4. deny.

use crate::command::actor::Actor;

/// Permission entry granting every permission.
pub const WILDCARD_PERMISSION: &str = "*";

const ADMIN: &str = "admin";

const ROLE_TABLE: &[(&str, &[&str])] = &[
    ("admin", &[WILDCARD_PERMISSION]),
    ("moderator", &["moderate", "mute", "kick", "ban", "stats"]),
    ("vip", &["stats", "map"]),
    ("player", &[]),
];

/// Static permissions for `role` (case-insensitive); `None` for unknown roles.
pub fn role_permissions(role: &str) -> Option<&'static [&'static str]> {
    let role = role.trim();
    ROLE_TABLE
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(role))
        .map(|(_, permissions)| *permissions)
}

/// Admin predicate: explicit flag, `admin` role, or `admin` in the permission set.
pub fn is_admin(actor: &Actor) -> bool {
    actor.is_admin
        || actor
            .role
            .as_deref()
            .is_some_and(|role| role.trim().eq_ignore_ascii_case(ADMIN))
        || actor
            .permissions
            .as_ref()
            .is_some_and(|permissions| permissions.contains(ADMIN))
}

/// Evaluates whether `actor` holds `permission`.
///
/// `None` is always allowed. `admin`/`administrator` use `is_admin`. Anything
/// else follows the module-level resolution order and fails closed.
pub fn has_permission(actor: &Actor, permission: Option<&str>) -> bool {
    let Some(permission) = permission.map(str::trim) else {
        return true;
    };

    if permission.eq_ignore_ascii_case(ADMIN) || permission.eq_ignore_ascii_case("administrator")
    {
        return is_admin(actor);
    }

    if let Some(check) = actor.permission_check.as_ref() {
        return check(permission);
    }

    if let Some(permissions) = actor.permissions.as_ref() {
        return permissions.contains(WILDCARD_PERMISSION) || permissions.contains(permission);
    }

    if let Some(granted) = actor.role.as_deref().and_then(role_permissions) {
        return granted
            .iter()
            .any(|entry| *entry == WILDCARD_PERMISSION || *entry == permission);
    }

    false
}
