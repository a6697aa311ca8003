//! Administrative operations over the permission graph.

use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::store::{AssignOutcome, CreateNamedOutcome, Permission, RbacStore, Role};

/// Outcome of a role <-> user or permission <-> role assignment attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    /// The unique pair already exists; the caller sees a conflict.
    Duplicate,
    /// The referenced role or permission does not exist.
    TargetMissing,
}

/// CRUD over roles, permissions, and their join tables. Uniqueness is
/// enforced by the store; this layer only adds existence checks and outcome
/// mapping.
#[derive(Clone)]
pub struct RbacService {
    store: Arc<dyn RbacStore>,
}

impl RbacService {
    #[must_use]
    pub fn new(store: Arc<dyn RbacStore>) -> Self {
        Self { store }
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        self.store.list_roles().await
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn get_role(&self, id: i64) -> Result<Option<Role>> {
        self.store.find_role_by_id(id).await
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn create_role(
        &self,
        name: &str,
        description: &str,
    ) -> Result<CreateNamedOutcome<Role>> {
        self.store.create_role(name, description).await
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn update_role(&self, id: i64, name: &str, description: &str) -> Result<Option<Role>> {
        self.store.update_role(id, name, description).await
    }

    /// Delete a role. No cascade guarantee beyond what the store's schema
    /// provides; returns whether a role row was removed.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn delete_role(&self, id: i64) -> Result<bool> {
        self.store.delete_role(id).await
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn list_permissions(&self) -> Result<Vec<Permission>> {
        self.store.list_permissions().await
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn assign_role_to_user(
        &self,
        user_id: i64,
        role_id: i64,
        assigned_by: Option<i64>,
    ) -> Result<GrantOutcome> {
        if self.store.find_role_by_id(role_id).await?.is_none() {
            return Ok(GrantOutcome::TargetMissing);
        }
        Ok(
            match self
                .store
                .assign_role_to_user(user_id, role_id, assigned_by)
                .await?
            {
                AssignOutcome::Assigned => GrantOutcome::Granted,
                AssignOutcome::AlreadyAssigned => GrantOutcome::Duplicate,
            },
        )
    }

    /// Remove a role assignment; removing an absent row is not an error.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn remove_role_from_user(&self, user_id: i64, role_id: i64) -> Result<()> {
        self.store.remove_role_from_user(user_id, role_id).await
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn assign_permission_to_role(
        &self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<GrantOutcome> {
        if self.store.find_role_by_id(role_id).await?.is_none() {
            return Ok(GrantOutcome::TargetMissing);
        }
        Ok(
            match self
                .store
                .assign_permission_to_role(role_id, permission_id)
                .await?
            {
                AssignOutcome::Assigned => GrantOutcome::Granted,
                AssignOutcome::AlreadyAssigned => GrantOutcome::Duplicate,
            },
        )
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn remove_permission_from_role(
        &self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<()> {
        self.store
            .remove_permission_from_role(role_id, permission_id)
            .await
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn user_roles(&self, user_id: i64) -> Result<Vec<Role>> {
        self.store.user_roles(user_id).await
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn user_permissions(&self, user_id: i64) -> Result<BTreeSet<String>> {
        Ok(self.store.load_access(user_id).await?.permissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::seed::seed_defaults;
    use crate::rbac::{ROLE_ID_ADMIN, ROLE_ID_USER};
    use crate::store::MemoryStore;

    fn service() -> (Arc<MemoryStore>, RbacService) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), RbacService::new(store))
    }

    #[tokio::test]
    async fn duplicate_role_assignment_conflicts() -> Result<()> {
        let (store, service) = service();
        seed_defaults(store.as_ref()).await?;

        assert_eq!(
            service.assign_role_to_user(7, ROLE_ID_USER, Some(1)).await?,
            GrantOutcome::Granted
        );
        assert_eq!(
            service.assign_role_to_user(7, ROLE_ID_USER, Some(1)).await?,
            GrantOutcome::Duplicate
        );
        // Exactly one surviving row.
        assert_eq!(service.user_roles(7).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn assignment_to_missing_role_is_rejected() -> Result<()> {
        let (_, service) = service();
        assert_eq!(
            service.assign_role_to_user(7, 999, None).await?,
            GrantOutcome::TargetMissing
        );
        Ok(())
    }

    #[tokio::test]
    async fn removal_of_absent_assignment_is_not_an_error() -> Result<()> {
        let (store, service) = service();
        seed_defaults(store.as_ref()).await?;
        service.remove_role_from_user(7, ROLE_ID_ADMIN).await?;
        Ok(())
    }

    #[tokio::test]
    async fn role_crud_round_trip() -> Result<()> {
        let (_, service) = service();

        let CreateNamedOutcome::Created(role) =
            service.create_role("Auditor", "Read-only reviewer").await?
        else {
            panic!("expected creation");
        };
        assert!(matches!(
            service.create_role("Auditor", "again").await?,
            CreateNamedOutcome::NameTaken
        ));

        let updated = service
            .update_role(role.id, "Auditor", "Compliance reviewer")
            .await?
            .expect("role exists");
        assert_eq!(updated.description, "Compliance reviewer");

        assert!(service.delete_role(role.id).await?);
        assert!(!service.delete_role(role.id).await?);
        Ok(())
    }
}
