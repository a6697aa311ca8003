//! Integration tests for the HTTP surface.
//!
//! The full router is driven in process over the in-memory store, so every
//! request exercises the same middleware, guards, and handlers the binary
//! serves, without a socket or a database.

use anyhow::Result;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use vigilo::api::{app, AppContext};
use vigilo::auth::{AuthConfig, AuthService};
use vigilo::email::LogNotifier;
use vigilo::rbac::{seed::seed_defaults, service::RbacService, ROLE_ID_ADMIN, ROLE_ID_SUPER_ADMIN};
use vigilo::store::{MemoryStore, RbacStore};
use vigilo::token::TokenCodec;

struct Harness {
    router: Router,
    store: Arc<MemoryStore>,
}

async fn harness() -> Result<Harness> {
    let store = Arc::new(MemoryStore::new());
    seed_defaults(store.as_ref()).await?;

    let ctx = Arc::new(AppContext {
        auth: AuthService::new(
            store.clone(),
            store.clone(),
            Arc::new(LogNotifier),
            TokenCodec::new(SecretString::from("test-secret")),
            AuthConfig::default(),
        ),
        rbac: RbacService::new(store.clone()),
        store: store.clone(),
    });

    Ok(Harness {
        router: app(ctx),
        store,
    })
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Result<Value> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

async fn sign_up(router: &Router, name: &str, email: &str, password: &str) -> Result<Value> {
    let response = router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/signup",
            json!({ "name": name, "email": email, "password": password }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn health_reports_database_up() -> Result<()> {
    let h = harness().await?;
    let response = h.router.oneshot(get_request("/health", None)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await?;
    assert_eq!(body["database"], "ok");
    Ok(())
}

#[tokio::test]
async fn signup_issues_tokens_and_cookie() -> Result<()> {
    let h = harness().await?;
    let response = h
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/signup",
            json!({ "name": "Ann", "email": "ann@example.com", "password": "s3cretpass" }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(cookie.starts_with("AccessToken="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Strict"));

    let body = body_json(response).await?;
    assert!(body["access_token"].is_string());
    assert!(body["refresh_token"].is_string());
    Ok(())
}

#[tokio::test]
async fn signup_conflicts_on_duplicate_email() -> Result<()> {
    let h = harness().await?;
    sign_up(&h.router, "Ann", "ann@example.com", "s3cretpass").await?;

    let response = h
        .router
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/signup",
            json!({ "name": "Imposter", "email": "ann@example.com", "password": "otherpass1" }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn signup_rejects_bad_payload() -> Result<()> {
    let h = harness().await?;

    let response = h
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/signup",
            json!({ "name": "Ann", "email": "not-an-email", "password": "s3cretpass" }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = h
        .router
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/signup",
            json!({ "name": "Ann", "email": "ann@example.com", "password": "short" }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn login_distinguishes_unknown_email_from_bad_password() -> Result<()> {
    let h = harness().await?;
    sign_up(&h.router, "Ann", "ann@example.com", "s3cretpass").await?;

    let response = h
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/login",
            json!({ "email": "nobody@example.com", "password": "s3cretpass" }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = h
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/login",
            json!({ "email": "ann@example.com", "password": "wrongpassword" }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = h
        .router
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/login",
            json!({ "email": "ann@example.com", "password": "s3cretpass" }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn refresh_rotates_the_pair() -> Result<()> {
    let h = harness().await?;
    let tokens = sign_up(&h.router, "Ann", "ann@example.com", "s3cretpass").await?;
    let refresh = tokens["refresh_token"].as_str().unwrap_or_default();

    let response = h
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/refresh-token",
            json!({ "refresh_token": refresh }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert!(body["access_token"].is_string());

    let response = h
        .router
        .oneshot(json_request(
            Method::POST,
            "/api/v1/auth/refresh-token",
            json!({ "refresh_token": "not-a-token" }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn me_requires_and_honors_the_bearer_token() -> Result<()> {
    let h = harness().await?;
    let tokens = sign_up(&h.router, "Ann", "ann@example.com", "s3cretpass").await?;
    let access = tokens["access_token"].as_str().unwrap_or_default();

    let response = h
        .router
        .clone()
        .oneshot(get_request("/api/v1/me", None))
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = h
        .router
        .clone()
        .oneshot(get_request("/api/v1/me", Some("garbage")))
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = h
        .router
        .oneshot(get_request("/api/v1/me", Some(access)))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["email"], "ann@example.com");
    Ok(())
}

#[tokio::test]
async fn access_token_cookie_authenticates_without_a_header() -> Result<()> {
    let h = harness().await?;
    let tokens = sign_up(&h.router, "Ann", "ann@example.com", "s3cretpass").await?;
    let access = tokens["access_token"].as_str().unwrap_or_default();

    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/v1/me")
        .header(header::COOKIE, format!("AccessToken={access}"))
        .body(Body::empty())
        .unwrap();
    let response = h.router.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn role_listing_is_guarded_by_permission() -> Result<()> {
    let h = harness().await?;
    let tokens = sign_up(&h.router, "Ann", "ann@example.com", "s3cretpass").await?;
    let access = tokens["access_token"].as_str().unwrap_or_default();

    // A fresh account carries no roles, so role:read is missing.
    let response = h
        .router
        .clone()
        .oneshot(get_request("/api/v1/roles", Some(access)))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    h.store.assign_role_to_user(1, ROLE_ID_SUPER_ADMIN, None).await?;

    let response = h
        .router
        .oneshot(get_request("/api/v1/roles", Some(access)))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert!(body.as_array().is_some_and(|roles| roles.len() == 4));
    Ok(())
}

#[tokio::test]
async fn role_crud_round_trip_as_super_admin() -> Result<()> {
    let h = harness().await?;
    let tokens = sign_up(&h.router, "Root", "root@example.com", "s3cretpass").await?;
    let access = tokens["access_token"].as_str().unwrap_or_default();
    h.store.assign_role_to_user(1, ROLE_ID_SUPER_ADMIN, None).await?;

    let mut request = json_request(
        Method::POST,
        "/api/v1/roles",
        json!({ "name": "auditor", "description": "Read-only review" }),
    );
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, format!("Bearer {access}").parse()?);
    let response = h.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await?;
    let role_id = created["id"].as_i64().unwrap_or_default();
    assert_eq!(created["name"], "auditor");

    // Same name again conflicts.
    let mut request = json_request(
        Method::POST,
        "/api/v1/roles",
        json!({ "name": "auditor" }),
    );
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, format!("Bearer {access}").parse()?);
    let response = h.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let mut request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/api/v1/roles/{role_id}"))
        .body(Body::empty())
        .unwrap();
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, format!("Bearer {access}").parse()?);
    let response = h.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = h
        .router
        .oneshot(get_request(
            &format!("/api/v1/roles/{role_id}"),
            Some(access),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn role_assignment_reports_duplicates_and_missing_targets() -> Result<()> {
    let h = harness().await?;
    let tokens = sign_up(&h.router, "Root", "root@example.com", "s3cretpass").await?;
    let access = tokens["access_token"].as_str().unwrap_or_default();
    h.store.assign_role_to_user(1, ROLE_ID_SUPER_ADMIN, None).await?;

    let assign = |body: Value| {
        let mut request = json_request(Method::POST, "/api/v1/user-roles/assign", body);
        request.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {access}").parse().unwrap(),
        );
        h.router.clone().oneshot(request)
    };

    let response = assign(json!({ "user_id": 1, "role_id": ROLE_ID_ADMIN })).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = assign(json!({ "user_id": 1, "role_id": ROLE_ID_ADMIN })).await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = assign(json!({ "user_id": 1, "role_id": 9999 })).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn user_profile_is_owner_or_admin_only() -> Result<()> {
    let h = harness().await?;
    let ann = sign_up(&h.router, "Ann", "ann@example.com", "s3cretpass").await?;
    let bob = sign_up(&h.router, "Bob", "bob@example.com", "s3cretpass").await?;
    let ann_access = ann["access_token"].as_str().unwrap_or_default();
    let bob_access = bob["access_token"].as_str().unwrap_or_default();

    // Owner sees their own profile.
    let response = h
        .router
        .clone()
        .oneshot(get_request("/api/v1/users/1", Some(ann_access)))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["email"], "ann@example.com");

    // A stranger does not.
    let response = h
        .router
        .clone()
        .oneshot(get_request("/api/v1/users/1", Some(bob_access)))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // An admin sees anyone.
    h.store.assign_role_to_user(2, ROLE_ID_SUPER_ADMIN, None).await?;
    let response = h
        .router
        .oneshot(get_request("/api/v1/users/1", Some(bob_access)))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn forgot_password_never_reveals_registration() -> Result<()> {
    let h = harness().await?;
    sign_up(&h.router, "Ann", "ann@example.com", "s3cretpass").await?;

    for email in ["ann@example.com", "nobody@example.com"] {
        let response = h
            .router
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/auth/forgot-password",
                json!({ "email": email }),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
    }
    Ok(())
}

#[tokio::test]
async fn logout_clears_the_cookie() -> Result<()> {
    let h = harness().await?;
    let response = h
        .router
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/auth/logout")
                .body(Body::empty())
                .unwrap(),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(cookie.starts_with("AccessToken="));
    assert!(cookie.contains("Max-Age=0"));
    Ok(())
}
