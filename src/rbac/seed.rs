//! Idempotent seeding of the default permission graph.
//!
//! Presence is checked by unique name before every insert; existing rows are
//! left untouched, so re-running at startup is safe.

use anyhow::{Context, Result};
use tracing::info;

use super::{default_permissions, default_role_permissions, default_roles};
use crate::store::{AssignOutcome, CreateNamedOutcome, RbacStore};

/// Seed default roles, permissions, and the role -> permission mapping.
///
/// # Errors
///
/// Returns an error if any store operation fails.
pub async fn seed_defaults(store: &dyn RbacStore) -> Result<()> {
    seed_permissions(store).await?;
    seed_roles(store).await?;
    seed_role_permissions(store).await?;
    info!("default roles and permissions seeded");
    Ok(())
}

async fn seed_permissions(store: &dyn RbacStore) -> Result<()> {
    for (name, description) in default_permissions() {
        if store
            .find_permission_by_name(name)
            .await
            .with_context(|| format!("failed to check permission {name}"))?
            .is_some()
        {
            continue;
        }
        // A concurrent seeder may have won the insert race; NameTaken is fine.
        match store
            .create_permission(name, description)
            .await
            .with_context(|| format!("failed to create permission {name}"))?
        {
            CreateNamedOutcome::Created(_) | CreateNamedOutcome::NameTaken => {}
        }
    }
    Ok(())
}

async fn seed_roles(store: &dyn RbacStore) -> Result<()> {
    for (id, name, description) in default_roles() {
        if store
            .find_role_by_name(name)
            .await
            .with_context(|| format!("failed to check role {name}"))?
            .is_some()
        {
            continue;
        }
        match store
            .create_role_with_id(id, name, description)
            .await
            .with_context(|| format!("failed to create role {name}"))?
        {
            CreateNamedOutcome::Created(_) | CreateNamedOutcome::NameTaken => {}
        }
    }
    Ok(())
}

async fn seed_role_permissions(store: &dyn RbacStore) -> Result<()> {
    for (role_id, permission_names) in default_role_permissions() {
        let role = store
            .find_role_by_id(role_id)
            .await?
            .with_context(|| format!("seed role {role_id} missing"))?;

        for name in permission_names {
            let permission = store
                .find_permission_by_name(name)
                .await?
                .with_context(|| format!("seed permission {name} missing"))?;

            match store
                .assign_permission_to_role(role.id, permission.id)
                .await
                .with_context(|| {
                    format!("failed to assign permission {name} to role {}", role.name)
                })? {
                AssignOutcome::Assigned | AssignOutcome::AlreadyAssigned => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::{
        PERMISSION_REPORT_READ, PERMISSION_SYSTEM_ADMIN, ROLE_ID_SUPER_ADMIN, ROLE_ID_USER,
    };
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn seeding_is_idempotent() -> Result<()> {
        let store = MemoryStore::new();
        seed_defaults(&store).await?;
        seed_defaults(&store).await?;

        assert_eq!(store.list_roles().await?.len(), 4);
        assert_eq!(store.list_permissions().await?.len(), 11);
        Ok(())
    }

    #[tokio::test]
    async fn seeded_graph_matches_defaults() -> Result<()> {
        let store = MemoryStore::new();
        seed_defaults(&store).await?;

        let super_admin = store
            .find_role_by_id(ROLE_ID_SUPER_ADMIN)
            .await?
            .expect("super admin seeded");
        assert_eq!(super_admin.name, crate::rbac::SUPER_ADMIN_ROLE_NAME);

        // Spot-check the mapping through a user holding the basic role.
        let user_id = 99;
        store.assign_role_to_user(user_id, ROLE_ID_USER, None).await?;
        let access = store.load_access(user_id).await?;
        assert!(access.permissions.contains(PERMISSION_REPORT_READ));
        assert!(!access.permissions.contains(PERMISSION_SYSTEM_ADMIN));
        Ok(())
    }
}
