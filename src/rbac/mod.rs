//! Role-based access control engine.
//!
//! Permissions are `resource:action` strings granted to roles; roles are
//! granted to users. The `system:admin` permission is a super-admin override
//! that satisfies every permission check. Predicates here are pure and safe
//! for unlimited parallel invocation; durable state lives in the store.

use std::collections::BTreeSet;

use crate::store::Role;

pub mod guard;
pub mod seed;
pub mod service;

pub const ROLE_ID_ADMIN: i64 = 1;
pub const ROLE_ID_TEAM_ACCOUNT: i64 = 2;
pub const ROLE_ID_USER: i64 = 3;
pub const ROLE_ID_SUPER_ADMIN: i64 = 4;

pub const PERMISSION_USER_READ: &str = "user:read";
pub const PERMISSION_USER_WRITE: &str = "user:write";
pub const PERMISSION_USER_DELETE: &str = "user:delete";
pub const PERMISSION_ROLE_READ: &str = "role:read";
pub const PERMISSION_ROLE_WRITE: &str = "role:write";
pub const PERMISSION_ROLE_DELETE: &str = "role:delete";
pub const PERMISSION_REPORT_READ: &str = "report:read";
pub const PERMISSION_REPORT_WRITE: &str = "report:write";
pub const PERMISSION_SETTINGS_READ: &str = "settings:read";
pub const PERMISSION_SETTINGS_WRITE: &str = "settings:write";
pub const PERMISSION_SYSTEM_ADMIN: &str = "system:admin";

pub const SUPER_ADMIN_ROLE_NAME: &str = "Super Admin";
pub const ADMIN_ROLE_NAME: &str = "Admin";
pub const TEAM_ACCOUNT_ROLE_NAME: &str = "Team Account";
pub const USER_ROLE_NAME: &str = "User";

/// The fixed permission catalog seeded at startup.
#[must_use]
pub fn default_permissions() -> Vec<(&'static str, &'static str)> {
    vec![
        (PERMISSION_USER_READ, "Read user information"),
        (PERMISSION_USER_WRITE, "Create and update users"),
        (PERMISSION_USER_DELETE, "Delete users"),
        (PERMISSION_ROLE_READ, "Read role information"),
        (PERMISSION_ROLE_WRITE, "Create and update roles"),
        (PERMISSION_ROLE_DELETE, "Delete roles"),
        (PERMISSION_REPORT_READ, "View reports"),
        (PERMISSION_REPORT_WRITE, "Create and modify reports"),
        (PERMISSION_SETTINGS_READ, "View system settings"),
        (PERMISSION_SETTINGS_WRITE, "Modify system settings"),
        (PERMISSION_SYSTEM_ADMIN, "Full system administration"),
    ]
}

/// The four seed roles with their pinned identifiers.
#[must_use]
pub fn default_roles() -> Vec<(i64, &'static str, &'static str)> {
    vec![
        (
            ROLE_ID_SUPER_ADMIN,
            SUPER_ADMIN_ROLE_NAME,
            "Full system access with all permissions",
        ),
        (
            ROLE_ID_ADMIN,
            ADMIN_ROLE_NAME,
            "Administrative access with user and role management",
        ),
        (
            ROLE_ID_TEAM_ACCOUNT,
            TEAM_ACCOUNT_ROLE_NAME,
            "Team member with report and user management permissions",
        ),
        (
            ROLE_ID_USER,
            USER_ROLE_NAME,
            "Basic user with read-only access",
        ),
    ]
}

/// The static role -> permission-set mapping applied at seed time.
#[must_use]
pub fn default_role_permissions() -> Vec<(i64, Vec<&'static str>)> {
    vec![
        (
            ROLE_ID_SUPER_ADMIN,
            vec![
                PERMISSION_USER_READ,
                PERMISSION_USER_WRITE,
                PERMISSION_USER_DELETE,
                PERMISSION_ROLE_READ,
                PERMISSION_ROLE_WRITE,
                PERMISSION_ROLE_DELETE,
                PERMISSION_REPORT_READ,
                PERMISSION_REPORT_WRITE,
                PERMISSION_SETTINGS_READ,
                PERMISSION_SETTINGS_WRITE,
                PERMISSION_SYSTEM_ADMIN,
            ],
        ),
        (
            ROLE_ID_ADMIN,
            vec![
                PERMISSION_USER_READ,
                PERMISSION_USER_WRITE,
                PERMISSION_ROLE_READ,
                PERMISSION_REPORT_READ,
                PERMISSION_REPORT_WRITE,
                PERMISSION_SETTINGS_READ,
            ],
        ),
        (
            ROLE_ID_TEAM_ACCOUNT,
            vec![
                PERMISSION_USER_READ,
                PERMISSION_REPORT_READ,
                PERMISSION_REPORT_WRITE,
            ],
        ),
        (ROLE_ID_USER, vec![PERMISSION_REPORT_READ]),
    ]
}

/// True when `required` is granted, either literally or through the
/// `system:admin` override.
#[must_use]
pub fn has_permission(granted: &BTreeSet<String>, required: &str) -> bool {
    granted.contains(required) || granted.contains(PERMISSION_SYSTEM_ADMIN)
}

#[must_use]
pub fn has_any_permission(granted: &BTreeSet<String>, required: &[&str]) -> bool {
    required.iter().any(|p| has_permission(granted, p))
}

#[must_use]
pub fn has_all_permissions(granted: &BTreeSet<String>, required: &[&str]) -> bool {
    required.iter().all(|p| has_permission(granted, p))
}

/// Split a `resource:action` permission name.
///
/// # Errors
///
/// Returns an error if the name is not exactly two colon-separated parts.
pub fn parse_permission(permission: &str) -> anyhow::Result<(&str, &str)> {
    match permission.split(':').collect::<Vec<_>>()[..] {
        [resource, action] if !resource.is_empty() && !action.is_empty() => {
            Ok((resource, action))
        }
        _ => Err(anyhow::anyhow!("invalid permission format: {permission}")),
    }
}

/// Authenticated actor attached to the request context by the authentication
/// layer. Roles and permissions are materialized up front so downstream
/// checks never touch the store.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub roles: Vec<Role>,
    pub permissions: BTreeSet<String>,
}

impl Principal {
    #[must_use]
    pub fn has_permission(&self, required: &str) -> bool {
        has_permission(&self.permissions, required)
    }

    #[must_use]
    pub fn has_any_permission(&self, required: &[&str]) -> bool {
        has_any_permission(&self.permissions, required)
    }

    #[must_use]
    pub fn has_all_permissions(&self, required: &[&str]) -> bool {
        has_all_permissions(&self.permissions, required)
    }

    #[must_use]
    pub fn has_role(&self, role_id: i64) -> bool {
        self.roles.iter().any(|role| role.id == role_id)
    }
}
