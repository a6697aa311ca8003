//! In-memory store.
//!
//! Backs the integration tests and local demos with the same trait surface as
//! Postgres, including conflict outcomes for uniqueness races. A single mutex
//! around the whole state mirrors the row-level atomicity the database
//! provides.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{
    Access, AssignOutcome, CreateNamedOutcome, CreateUserOutcome, CredentialStore, NewUser,
    Permission, RbacStore, Role, TwoFactorUpdate, User,
};

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    roles: Vec<Role>,
    permissions: Vec<Permission>,
    user_roles: HashSet<(i64, i64)>,
    role_permissions: HashSet<(i64, i64)>,
    next_user_id: i64,
    next_role_id: i64,
    next_permission_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens if a holder panicked; state is still
        // coherent for the read/write patterns used here.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let inner = self.lock();
        Ok(inner.users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let inner = self.lock();
        Ok(inner.users.iter().find(|u| u.id == id).cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<CreateUserOutcome> {
        let mut inner = self.lock();
        if inner.users.iter().any(|u| u.email == new_user.email) {
            return Ok(CreateUserOutcome::EmailTaken);
        }
        inner.next_user_id += 1;
        let now = now_unix();
        let user = User {
            id: inner.next_user_id,
            name: new_user.name,
            email: new_user.email,
            password_hash: new_user.password_hash,
            is_active: true,
            email_confirmed: false,
            email_confirm_token: new_user.email_confirm_token,
            password_reset_token: None,
            password_reset_expires_at: None,
            two_factor_enabled: false,
            two_factor_secret: None,
            two_factor_backup_codes: Vec::new(),
            created_at_unix: now,
            updated_at_unix: now,
        };
        inner.users.push(user.clone());
        Ok(CreateUserOutcome::Created(user))
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()> {
        let mut inner = self.lock();
        if let Some(user) = inner.users.iter_mut().find(|u| u.id == id) {
            user.password_hash = password_hash.to_string();
            user.updated_at_unix = now_unix();
        }
        Ok(())
    }

    async fn set_reset_token(&self, id: i64, token: &str, expires_at_unix: i64) -> Result<()> {
        let mut inner = self.lock();
        if let Some(user) = inner.users.iter_mut().find(|u| u.id == id) {
            user.password_reset_token = Some(token.to_string());
            user.password_reset_expires_at = Some(expires_at_unix);
            user.updated_at_unix = now_unix();
        }
        Ok(())
    }

    async fn find_by_reset_token(&self, token: &str, now_unix: i64) -> Result<Option<User>> {
        let inner = self.lock();
        Ok(inner
            .users
            .iter()
            .find(|u| {
                u.password_reset_token.as_deref() == Some(token)
                    && u.password_reset_expires_at.is_some_and(|exp| exp > now_unix)
            })
            .cloned())
    }

    async fn reset_password(&self, id: i64, password_hash: &str) -> Result<()> {
        let mut inner = self.lock();
        if let Some(user) = inner.users.iter_mut().find(|u| u.id == id) {
            user.password_hash = password_hash.to_string();
            user.password_reset_token = None;
            user.password_reset_expires_at = None;
            user.updated_at_unix = now_unix();
        }
        Ok(())
    }

    async fn update_two_factor(&self, id: i64, update: TwoFactorUpdate) -> Result<()> {
        let mut inner = self.lock();
        if let Some(user) = inner.users.iter_mut().find(|u| u.id == id) {
            user.two_factor_enabled = update.enabled;
            user.two_factor_secret = update.secret;
            user.two_factor_backup_codes = update.backup_code_hashes;
            user.updated_at_unix = now_unix();
        }
        Ok(())
    }
}

#[async_trait]
impl RbacStore for MemoryStore {
    async fn list_roles(&self) -> Result<Vec<Role>> {
        let inner = self.lock();
        let mut roles = inner.roles.clone();
        roles.sort_by_key(|r| r.id);
        Ok(roles)
    }

    async fn find_role_by_id(&self, id: i64) -> Result<Option<Role>> {
        let inner = self.lock();
        Ok(inner.roles.iter().find(|r| r.id == id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let inner = self.lock();
        Ok(inner.roles.iter().find(|r| r.name == name).cloned())
    }

    async fn create_role(
        &self,
        name: &str,
        description: &str,
    ) -> Result<CreateNamedOutcome<Role>> {
        let mut inner = self.lock();
        if inner.roles.iter().any(|r| r.name == name) {
            return Ok(CreateNamedOutcome::NameTaken);
        }
        inner.next_role_id += 1;
        let role = Role {
            id: inner.next_role_id,
            name: name.to_string(),
            description: description.to_string(),
        };
        inner.roles.push(role.clone());
        Ok(CreateNamedOutcome::Created(role))
    }

    async fn create_role_with_id(
        &self,
        id: i64,
        name: &str,
        description: &str,
    ) -> Result<CreateNamedOutcome<Role>> {
        let mut inner = self.lock();
        if inner.roles.iter().any(|r| r.name == name || r.id == id) {
            return Ok(CreateNamedOutcome::NameTaken);
        }
        let role = Role {
            id,
            name: name.to_string(),
            description: description.to_string(),
        };
        inner.roles.push(role.clone());
        inner.next_role_id = inner.next_role_id.max(id);
        Ok(CreateNamedOutcome::Created(role))
    }

    async fn update_role(&self, id: i64, name: &str, description: &str) -> Result<Option<Role>> {
        let mut inner = self.lock();
        let Some(role) = inner.roles.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        role.name = name.to_string();
        role.description = description.to_string();
        Ok(Some(role.clone()))
    }

    async fn delete_role(&self, id: i64) -> Result<bool> {
        let mut inner = self.lock();
        let before = inner.roles.len();
        inner.roles.retain(|r| r.id != id);
        inner.user_roles.retain(|(_, role_id)| *role_id != id);
        inner.role_permissions.retain(|(role_id, _)| *role_id != id);
        Ok(inner.roles.len() != before)
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>> {
        let inner = self.lock();
        let mut permissions = inner.permissions.clone();
        permissions.sort_by_key(|p| p.id);
        Ok(permissions)
    }

    async fn find_permission_by_name(&self, name: &str) -> Result<Option<Permission>> {
        let inner = self.lock();
        Ok(inner.permissions.iter().find(|p| p.name == name).cloned())
    }

    async fn create_permission(
        &self,
        name: &str,
        description: &str,
    ) -> Result<CreateNamedOutcome<Permission>> {
        let mut inner = self.lock();
        if inner.permissions.iter().any(|p| p.name == name) {
            return Ok(CreateNamedOutcome::NameTaken);
        }
        inner.next_permission_id += 1;
        let permission = Permission {
            id: inner.next_permission_id,
            name: name.to_string(),
            description: description.to_string(),
        };
        inner.permissions.push(permission.clone());
        Ok(CreateNamedOutcome::Created(permission))
    }

    async fn assign_role_to_user(
        &self,
        user_id: i64,
        role_id: i64,
        _assigned_by: Option<i64>,
    ) -> Result<AssignOutcome> {
        let mut inner = self.lock();
        if inner.user_roles.insert((user_id, role_id)) {
            Ok(AssignOutcome::Assigned)
        } else {
            Ok(AssignOutcome::AlreadyAssigned)
        }
    }

    async fn remove_role_from_user(&self, user_id: i64, role_id: i64) -> Result<()> {
        let mut inner = self.lock();
        inner.user_roles.remove(&(user_id, role_id));
        Ok(())
    }

    async fn assign_permission_to_role(
        &self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<AssignOutcome> {
        let mut inner = self.lock();
        if inner.role_permissions.insert((role_id, permission_id)) {
            Ok(AssignOutcome::Assigned)
        } else {
            Ok(AssignOutcome::AlreadyAssigned)
        }
    }

    async fn remove_permission_from_role(&self, role_id: i64, permission_id: i64) -> Result<()> {
        let mut inner = self.lock();
        inner.role_permissions.remove(&(role_id, permission_id));
        Ok(())
    }

    async fn user_roles(&self, user_id: i64) -> Result<Vec<Role>> {
        let inner = self.lock();
        let mut roles: Vec<Role> = inner
            .roles
            .iter()
            .filter(|role| inner.user_roles.contains(&(user_id, role.id)))
            .cloned()
            .collect();
        roles.sort_by_key(|r| r.id);
        Ok(roles)
    }

    async fn load_access(&self, user_id: i64) -> Result<Access> {
        let inner = self.lock();
        let mut roles: Vec<Role> = inner
            .roles
            .iter()
            .filter(|role| inner.user_roles.contains(&(user_id, role.id)))
            .cloned()
            .collect();
        roles.sort_by_key(|r| r.id);

        let permissions: BTreeSet<String> = inner
            .permissions
            .iter()
            .filter(|permission| {
                roles
                    .iter()
                    .any(|role| inner.role_permissions.contains(&(role.id, permission.id)))
            })
            .map(|permission| permission.name.clone())
            .collect();

        Ok(Access { roles, permissions })
    }
}
