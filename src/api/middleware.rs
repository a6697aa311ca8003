//! Request authentication.
//!
//! Resolves the bearer token (Authorization header first, cookie fallback)
//! to a typed `Principal` and inserts it into request extensions. A bad or
//! absent token answers 401; a store or codec failure answers 500 so outages
//! are never mistaken for bad credentials.

use axum::{
    extract::{Extension, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::error;

use super::handlers::extract_access_token;
use super::AppContext;
use crate::auth::{unix_now, AuthenticateOutcome};

pub async fn authenticate(
    ctx: Extension<Arc<AppContext>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_access_token(request.headers()) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match ctx.auth.authenticate(&token, unix_now()).await {
        Ok(AuthenticateOutcome::Authenticated(principal)) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Ok(AuthenticateOutcome::Denied) => StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            error!("Failed to authenticate request: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
