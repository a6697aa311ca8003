use crate::api::{self, AppContext};
use crate::auth::AuthService;
use crate::cli::actions::Action;
use crate::email::LogNotifier;
use crate::rbac::{seed::seed_defaults, service::RbacService};
use crate::store::PgStore;
use crate::token::TokenCodec;
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};

/// Handle the server action: connect, seed, serve.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server {
        port,
        dsn,
        jwt_secret,
        auth,
    } = action;

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    let store = Arc::new(PgStore::new(pool));

    // Default roles and permissions are created idempotently at every start.
    seed_defaults(store.as_ref())
        .await
        .context("Failed to seed default roles and permissions")?;

    let ctx = Arc::new(AppContext {
        auth: AuthService::new(
            store.clone(),
            store.clone(),
            Arc::new(LogNotifier),
            TokenCodec::new(jwt_secret),
            auth,
        ),
        rbac: RbacService::new(store.clone()),
        store,
    });

    api::serve(port, ctx).await
}
