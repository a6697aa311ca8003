//! HTTP surface: router construction and the serving loop.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware::from_fn,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

use crate::auth::AuthService;
use crate::rbac::{
    guard,
    service::RbacService,
    PERMISSION_ROLE_DELETE, PERMISSION_ROLE_READ, PERMISSION_ROLE_WRITE, PERMISSION_USER_READ,
    PERMISSION_USER_WRITE,
};
use crate::store::CredentialStore;

pub mod error;
pub mod handlers;
pub mod middleware;

use handlers::{auth, health, rbac};

/// Everything handlers need, shared through a request extension.
pub struct AppContext {
    pub auth: AuthService,
    pub rbac: RbacService,
    pub store: Arc<dyn CredentialStore>,
}

/// Build the full router. Takes the context explicitly so tests can drive the
/// router without a socket.
pub fn app(ctx: Arc<AppContext>) -> Router {
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/api/v1/auth/signup", post(auth::signup))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/logout", post(auth::logout))
        .route("/api/v1/auth/refresh-token", post(auth::refresh_token))
        .route("/api/v1/auth/forgot-password", post(auth::forgot_password))
        .route("/api/v1/auth/reset-password", post(auth::reset_password))
        .route("/api/v1/auth/2fa/verify", post(auth::verify_two_factor));

    let protected = Router::new()
        .route("/api/v1/me", get(auth::me))
        .route("/api/v1/2fa/enable", post(auth::enable_two_factor))
        .route("/api/v1/2fa/disable", post(auth::disable_two_factor))
        .route(
            "/api/v1/users/:id",
            get(auth::get_user).layer(guard::admin_or_owner()),
        )
        .route(
            "/api/v1/roles",
            get(rbac::get_roles)
                .layer(guard::permission(PERMISSION_ROLE_READ))
                .merge(post(rbac::create_role).layer(guard::all_permissions(&[
                    PERMISSION_ROLE_READ,
                    PERMISSION_ROLE_WRITE,
                ]))),
        )
        .route(
            "/api/v1/roles/:id",
            get(rbac::get_role)
                .layer(guard::permission(PERMISSION_ROLE_READ))
                .merge(put(rbac::update_role).layer(guard::all_permissions(&[
                    PERMISSION_ROLE_READ,
                    PERMISSION_ROLE_WRITE,
                ])))
                .merge(delete(rbac::delete_role).layer(guard::all_permissions(&[
                    PERMISSION_ROLE_READ,
                    PERMISSION_ROLE_DELETE,
                ]))),
        )
        .route(
            "/api/v1/permissions",
            get(rbac::get_permissions).layer(guard::permission(PERMISSION_ROLE_READ)),
        )
        .route(
            "/api/v1/user-roles/assign",
            post(rbac::assign_role_to_user).layer(guard::permission(PERMISSION_USER_WRITE)),
        )
        .route(
            "/api/v1/user-roles/user/:user_id/role/:role_id",
            delete(rbac::remove_role_from_user).layer(guard::permission(PERMISSION_USER_WRITE)),
        )
        .route(
            "/api/v1/user-roles/user/:user_id",
            get(rbac::get_user_roles).layer(guard::all_permissions(&[
                PERMISSION_USER_WRITE,
                PERMISSION_USER_READ,
            ])),
        )
        .route(
            "/api/v1/user-roles/user/:user_id/permissions",
            get(rbac::get_user_permissions).layer(guard::all_permissions(&[
                PERMISSION_USER_WRITE,
                PERMISSION_USER_READ,
            ])),
        )
        .route(
            "/api/v1/role-permissions/assign",
            post(rbac::assign_permission_to_role)
                .layer(guard::permission(PERMISSION_ROLE_WRITE)),
        )
        .route(
            "/api/v1/role-permissions/role/:role_id/permission/:permission_id",
            delete(rbac::remove_permission_from_role)
                .layer(guard::permission(PERMISSION_ROLE_WRITE)),
        )
        .layer(from_fn(middleware::authenticate));

    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(Any);

    public.merge(protected).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(
                HeaderName::from_static("x-request-id"),
                MakeRequestUlid,
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(ctx)),
    )
}

/// Bind and serve until the process is stopped.
pub async fn serve(port: u16, ctx: Arc<AppContext>) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app(ctx).into_make_service())
        .await
        .context("Server stopped unexpectedly")?;

    Ok(())
}

#[derive(Clone, Copy, Default)]
struct MakeRequestUlid;

impl MakeRequestId for MakeRequestUlid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(Ulid::new().to_string().as_str())
            .ok()
            .map(RequestId::new)
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
