//! Postgres-backed store.
//!
//! Queries run inside `db.query` spans so traces show the statement being
//! executed. Unique-constraint races surface as SQLSTATE 23505 and are mapped
//! to conflict outcomes instead of errors.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;

use super::{
    Access, AssignOutcome, CreateNamedOutcome, CreateUserOutcome, CredentialStore, NewUser,
    Permission, RbacStore, Role, TwoFactorUpdate, User,
};

const USER_COLUMNS: &str = r"
    id, name, email, password_hash, is_active, email_confirmed, email_confirm_token,
    password_reset_token,
    EXTRACT(EPOCH FROM password_reset_expires_at)::BIGINT AS password_reset_expires_at_unix,
    two_factor_enabled, two_factor_secret, two_factor_backup_codes,
    EXTRACT(EPOCH FROM created_at)::BIGINT AS created_at_unix,
    EXTRACT(EPOCH FROM updated_at)::BIGINT AS updated_at_unix
";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        is_active: row.get("is_active"),
        email_confirmed: row.get("email_confirmed"),
        email_confirm_token: row.get("email_confirm_token"),
        password_reset_token: row.get("password_reset_token"),
        password_reset_expires_at: row.get("password_reset_expires_at_unix"),
        two_factor_enabled: row.get("two_factor_enabled"),
        two_factor_secret: row.get("two_factor_secret"),
        two_factor_backup_codes: row.get("two_factor_backup_codes"),
        created_at_unix: row.get("created_at_unix"),
        updated_at_unix: row.get("updated_at_unix"),
    }
}

fn role_from_row(row: &PgRow) -> Role {
    Role {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
    }
}

fn permission_from_row(row: &PgRow) -> Permission {
    Permission {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
    }
}

fn query_span(operation: &'static str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn ping(&self) -> Result<()> {
        use sqlx::Connection;
        let span = tracing::info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("failed to acquire database connection")?;
        conn.ping()
            .instrument(span)
            .await
            .context("failed to ping database")
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .context("failed to lookup user by email")?;
        Ok(row.map(|row| user_from_row(&row)))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .context("failed to lookup user by id")?;
        Ok(row.map(|row| user_from_row(&row)))
    }

    async fn create(&self, new_user: NewUser) -> Result<CreateUserOutcome> {
        let query = format!(
            r"
            INSERT INTO users (name, email, password_hash, email_confirm_token)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
        "
        );
        let row = sqlx::query(&query)
            .bind(&new_user.name)
            .bind(&new_user.email)
            .bind(&new_user.password_hash)
            .bind(&new_user.email_confirm_token)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", &query))
            .await;

        match row {
            Ok(row) => Ok(CreateUserOutcome::Created(user_from_row(&row))),
            Err(err) if is_unique_violation(&err) => Ok(CreateUserOutcome::EmailTaken),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()> {
        let query = r"
            UPDATE users
            SET password_hash = $2, updated_at = NOW()
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update password")?;
        Ok(())
    }

    async fn set_reset_token(&self, id: i64, token: &str, expires_at_unix: i64) -> Result<()> {
        let query = r"
            UPDATE users
            SET password_reset_token = $2,
                password_reset_expires_at = TO_TIMESTAMP($3),
                updated_at = NOW()
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(id)
            .bind(token)
            .bind(expires_at_unix)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to set reset token")?;
        Ok(())
    }

    async fn find_by_reset_token(&self, token: &str, now_unix: i64) -> Result<Option<User>> {
        let query = format!(
            r"
            SELECT {USER_COLUMNS} FROM users
            WHERE password_reset_token = $1
              AND password_reset_expires_at > TO_TIMESTAMP($2)
        "
        );
        let row = sqlx::query(&query)
            .bind(token)
            .bind(now_unix)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .context("failed to lookup user by reset token")?;
        Ok(row.map(|row| user_from_row(&row)))
    }

    async fn reset_password(&self, id: i64, password_hash: &str) -> Result<()> {
        let query = r"
            UPDATE users
            SET password_hash = $2,
                password_reset_token = NULL,
                password_reset_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to reset password")?;
        Ok(())
    }

    async fn update_two_factor(&self, id: i64, update: TwoFactorUpdate) -> Result<()> {
        let query = r"
            UPDATE users
            SET two_factor_enabled = $2,
                two_factor_secret = $3,
                two_factor_backup_codes = $4,
                updated_at = NOW()
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(id)
            .bind(update.enabled)
            .bind(update.secret)
            .bind(update.backup_code_hashes)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update two-factor state")?;
        Ok(())
    }
}

#[async_trait]
impl RbacStore for PgStore {
    async fn list_roles(&self) -> Result<Vec<Role>> {
        let query = "SELECT id, name, description FROM roles ORDER BY id";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list roles")?;
        Ok(rows.iter().map(role_from_row).collect())
    }

    async fn find_role_by_id(&self, id: i64) -> Result<Option<Role>> {
        let query = "SELECT id, name, description FROM roles WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup role by id")?;
        Ok(row.map(|row| role_from_row(&row)))
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let query = "SELECT id, name, description FROM roles WHERE name = $1";
        let row = sqlx::query(query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup role by name")?;
        Ok(row.map(|row| role_from_row(&row)))
    }

    async fn create_role(
        &self,
        name: &str,
        description: &str,
    ) -> Result<CreateNamedOutcome<Role>> {
        let query = r"
            INSERT INTO roles (name, description)
            VALUES ($1, $2)
            RETURNING id, name, description
        ";
        let row = sqlx::query(query)
            .bind(name)
            .bind(description)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await;
        match row {
            Ok(row) => Ok(CreateNamedOutcome::Created(role_from_row(&row))),
            Err(err) if is_unique_violation(&err) => Ok(CreateNamedOutcome::NameTaken),
            Err(err) => Err(err).context("failed to insert role"),
        }
    }

    async fn create_role_with_id(
        &self,
        id: i64,
        name: &str,
        description: &str,
    ) -> Result<CreateNamedOutcome<Role>> {
        // Keep the sequence ahead of pinned ids so later unpinned inserts
        // cannot collide with seeded rows.
        let query = r"
            INSERT INTO roles (id, name, description)
            VALUES ($1, $2, $3)
            RETURNING id, name, description
        ";
        let row = sqlx::query(query)
            .bind(id)
            .bind(name)
            .bind(description)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await;
        let role = match row {
            Ok(row) => role_from_row(&row),
            Err(err) if is_unique_violation(&err) => return Ok(CreateNamedOutcome::NameTaken),
            Err(err) => return Err(err).context("failed to insert role with pinned id"),
        };

        let query = r"
            SELECT setval('roles_id_seq', GREATEST((SELECT MAX(id) FROM roles), 1))
        ";
        sqlx::query(query)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to advance roles id sequence")?;

        Ok(CreateNamedOutcome::Created(role))
    }

    async fn update_role(&self, id: i64, name: &str, description: &str) -> Result<Option<Role>> {
        let query = r"
            UPDATE roles
            SET name = $2, description = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, description
        ";
        let row = sqlx::query(query)
            .bind(id)
            .bind(name)
            .bind(description)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update role")?;
        Ok(row.map(|row| role_from_row(&row)))
    }

    async fn delete_role(&self, id: i64) -> Result<bool> {
        // Join rows go with the role via ON DELETE CASCADE.
        let query = "DELETE FROM roles WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete role")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>> {
        let query = "SELECT id, name, description FROM permissions ORDER BY id";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list permissions")?;
        Ok(rows.iter().map(permission_from_row).collect())
    }

    async fn find_permission_by_name(&self, name: &str) -> Result<Option<Permission>> {
        let query = "SELECT id, name, description FROM permissions WHERE name = $1";
        let row = sqlx::query(query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup permission by name")?;
        Ok(row.map(|row| permission_from_row(&row)))
    }

    async fn create_permission(
        &self,
        name: &str,
        description: &str,
    ) -> Result<CreateNamedOutcome<Permission>> {
        let query = r"
            INSERT INTO permissions (name, description)
            VALUES ($1, $2)
            RETURNING id, name, description
        ";
        let row = sqlx::query(query)
            .bind(name)
            .bind(description)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await;
        match row {
            Ok(row) => Ok(CreateNamedOutcome::Created(permission_from_row(&row))),
            Err(err) if is_unique_violation(&err) => Ok(CreateNamedOutcome::NameTaken),
            Err(err) => Err(err).context("failed to insert permission"),
        }
    }

    async fn assign_role_to_user(
        &self,
        user_id: i64,
        role_id: i64,
        assigned_by: Option<i64>,
    ) -> Result<AssignOutcome> {
        let query = r"
            INSERT INTO user_roles (user_id, role_id, assigned_by)
            VALUES ($1, $2, $3)
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(role_id)
            .bind(assigned_by)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await;
        match result {
            Ok(_) => Ok(AssignOutcome::Assigned),
            Err(err) if is_unique_violation(&err) => Ok(AssignOutcome::AlreadyAssigned),
            Err(err) => Err(err).context("failed to assign role to user"),
        }
    }

    async fn remove_role_from_user(&self, user_id: i64, role_id: i64) -> Result<()> {
        // Removal is idempotent; zero affected rows is fine.
        let query = "DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2";
        sqlx::query(query)
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to remove role from user")?;
        Ok(())
    }

    async fn assign_permission_to_role(
        &self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<AssignOutcome> {
        let query = r"
            INSERT INTO role_permissions (role_id, permission_id)
            VALUES ($1, $2)
        ";
        let result = sqlx::query(query)
            .bind(role_id)
            .bind(permission_id)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await;
        match result {
            Ok(_) => Ok(AssignOutcome::Assigned),
            Err(err) if is_unique_violation(&err) => Ok(AssignOutcome::AlreadyAssigned),
            Err(err) => Err(err).context("failed to assign permission to role"),
        }
    }

    async fn remove_permission_from_role(&self, role_id: i64, permission_id: i64) -> Result<()> {
        let query = "DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2";
        sqlx::query(query)
            .bind(role_id)
            .bind(permission_id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to remove permission from role")?;
        Ok(())
    }

    async fn user_roles(&self, user_id: i64) -> Result<Vec<Role>> {
        let query = r"
            SELECT roles.id, roles.name, roles.description
            FROM user_roles
            JOIN roles ON roles.id = user_roles.role_id
            WHERE user_roles.user_id = $1
            ORDER BY roles.id
        ";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list user roles")?;
        Ok(rows.iter().map(role_from_row).collect())
    }

    async fn load_access(&self, user_id: i64) -> Result<Access> {
        let roles = self.user_roles(user_id).await?;

        let query = r"
            SELECT DISTINCT permissions.name
            FROM user_roles
            JOIN role_permissions ON role_permissions.role_id = user_roles.role_id
            JOIN permissions ON permissions.id = role_permissions.permission_id
            WHERE user_roles.user_id = $1
        ";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to load user permissions")?;

        let permissions = rows.iter().map(|row| row.get("name")).collect();
        Ok(Access { roles, permissions })
    }
}
