//! Store traits and records for users and the permission graph.
//!
//! The backing store is an external collaborator: every trait method returns
//! "not found" as a distinguished `Ok(None)` (or an outcome variant), never an
//! error. Uniqueness races resolve here; callers observe at most one surviving
//! row and a conflict-style outcome for the loser.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A principal record. Owned exclusively by the credential store and mutated
/// only through the authentication service.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub email_confirmed: bool,
    pub email_confirm_token: String,
    pub password_reset_token: Option<String>,
    /// Epoch seconds; paired with `password_reset_token`.
    pub password_reset_expires_at: Option<i64>,
    pub two_factor_enabled: bool,
    /// Base32 TOTP secret, present only while 2FA is enabled.
    pub two_factor_secret: Option<String>,
    /// Argon2id hashes of unused single-use backup codes.
    pub two_factor_backup_codes: Vec<String>,
    pub created_at_unix: i64,
    pub updated_at_unix: i64,
}

/// Fields needed to persist a freshly signed-up principal.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub email_confirm_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// Replacement state for a user's second factor, written atomically.
#[derive(Debug, Clone)]
pub struct TwoFactorUpdate {
    pub enabled: bool,
    pub secret: Option<String>,
    pub backup_code_hashes: Vec<String>,
}

/// A user's resolved authorization graph: roles plus the deduplicated set of
/// permission names granted through them.
#[derive(Debug, Clone, Default)]
pub struct Access {
    pub roles: Vec<Role>,
    pub permissions: BTreeSet<String>,
}

/// Outcome when attempting to create a new user.
#[derive(Debug)]
pub enum CreateUserOutcome {
    Created(User),
    EmailTaken,
}

/// Outcome when attempting to create a uniquely-named role or permission.
#[derive(Debug)]
pub enum CreateNamedOutcome<T> {
    Created(T),
    NameTaken,
}

/// Outcome of a join-table assignment.
#[derive(Debug, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned,
    AlreadyAssigned,
}

/// CRUD over principal records, including reset-token and 2FA fields.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Liveness probe for the backing store.
    async fn ping(&self) -> Result<()>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Insert a new principal; the unique-email constraint resolves races.
    async fn create(&self, new_user: NewUser) -> Result<CreateUserOutcome>;

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()>;

    async fn set_reset_token(&self, id: i64, token: &str, expires_at_unix: i64) -> Result<()>;

    /// Exact reset-token match with expiry still in the future.
    async fn find_by_reset_token(&self, token: &str, now_unix: i64) -> Result<Option<User>>;

    /// Store the new password hash and clear the reset token and its expiry.
    async fn reset_password(&self, id: i64, password_hash: &str) -> Result<()>;

    async fn update_two_factor(&self, id: i64, update: TwoFactorUpdate) -> Result<()>;
}

/// CRUD over the permission graph (roles, permissions, and their joins).
#[async_trait]
pub trait RbacStore: Send + Sync {
    async fn list_roles(&self) -> Result<Vec<Role>>;

    async fn find_role_by_id(&self, id: i64) -> Result<Option<Role>>;

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>>;

    async fn create_role(&self, name: &str, description: &str)
        -> Result<CreateNamedOutcome<Role>>;

    /// Insert a role under a pinned identifier. Seeding uses this to keep the
    /// well-known role ids stable across deployments.
    async fn create_role_with_id(
        &self,
        id: i64,
        name: &str,
        description: &str,
    ) -> Result<CreateNamedOutcome<Role>>;

    /// Update name/description; `Ok(None)` when the role is absent.
    async fn update_role(&self, id: i64, name: &str, description: &str) -> Result<Option<Role>>;

    /// Delete a role; returns whether a row was removed.
    async fn delete_role(&self, id: i64) -> Result<bool>;

    async fn list_permissions(&self) -> Result<Vec<Permission>>;

    async fn find_permission_by_name(&self, name: &str) -> Result<Option<Permission>>;

    async fn create_permission(
        &self,
        name: &str,
        description: &str,
    ) -> Result<CreateNamedOutcome<Permission>>;

    /// At most one row per (user, role) pair survives concurrent attempts.
    async fn assign_role_to_user(
        &self,
        user_id: i64,
        role_id: i64,
        assigned_by: Option<i64>,
    ) -> Result<AssignOutcome>;

    /// Removing an absent assignment is not an error.
    async fn remove_role_from_user(&self, user_id: i64, role_id: i64) -> Result<()>;

    async fn assign_permission_to_role(
        &self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<AssignOutcome>;

    async fn remove_permission_from_role(&self, role_id: i64, permission_id: i64) -> Result<()>;

    async fn user_roles(&self, user_id: i64) -> Result<Vec<Role>>;

    /// Single deep read of a user's role -> permission graph.
    async fn load_access(&self, user_id: i64) -> Result<Access>;
}
