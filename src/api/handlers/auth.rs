//! Credential endpoints: signup, login, refresh, password reset, and the
//! second factor.

use axum::{
    extract::{Extension, Path},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use super::{access_token_cookie, clear_access_token_cookie, valid_email, valid_password};
use crate::api::{error::ApiError, AppContext};
use crate::auth::{
    unix_now, DisableTwoFactorOutcome, EnableTwoFactorOutcome, RefreshOutcome,
    ResetPasswordOutcome, SignInOutcome, SignUpOutcome, TokenPair, VerifyTwoFactorOutcome,
};
use crate::rbac::Principal;

#[derive(ToSchema, Deserialize, Debug)]
pub struct SignUpRequest {
    name: String,
    email: String,
    password: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct SignInRequest {
    email: String,
    password: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct RefreshRequest {
    refresh_token: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    email: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    token: String,
    password: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct TwoFactorCodeRequest {
    code: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct TwoFactorVerifyRequest {
    email: String,
    code: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct TwoFactorEnrollment {
    secret: String,
    otpauth_url: String,
    backup_codes: Vec<String>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct PrincipalResponse {
    user_id: i64,
    email: String,
    name: String,
    roles: Vec<String>,
    permissions: Vec<String>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct UserProfile {
    id: i64,
    name: String,
    email: String,
    email_confirmed: bool,
    two_factor_enabled: bool,
    created_at_unix: i64,
}

/// Token response plus the access-token cookie.
fn token_response(pair: &TokenPair, ctx: &AppContext) -> Response {
    let config = ctx.auth.config();
    let mut headers = HeaderMap::new();
    match access_token_cookie(
        &pair.access_token,
        config.access_ttl_secs,
        config.secure_cookies,
    ) {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build access-token cookie: {err}"),
    }
    (StatusCode::OK, headers, Json(pair)).into_response()
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/signup",
    request_body = SignUpRequest,
    responses(
        (status = 200, description = "Account created, token pair issued", body = TokenPair),
        (status = 400, description = "Invalid payload"),
        (status = 409, description = "Email already registered"),
    ),
    tag = "auth"
)]
pub async fn signup(
    ctx: Extension<Arc<AppContext>>,
    payload: Option<Json<SignUpRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    if request.name.trim().is_empty() {
        return Err(ApiError::Validation("Name is required".to_string()));
    }
    if !valid_email(&request.email) {
        return Err(ApiError::Validation("Invalid email".to_string()));
    }
    if !valid_password(&request.password) {
        return Err(ApiError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    match ctx
        .auth
        .sign_up(&request.name, &request.email, &request.password, unix_now())
        .await?
    {
        SignUpOutcome::Created(pair) => Ok(token_response(&pair, &ctx)),
        SignUpOutcome::EmailTaken => Err(ApiError::Conflict(
            "Email already registered".to_string(),
        )),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Token pair issued", body = TokenPair),
        (status = 400, description = "Invalid payload or wrong password"),
        (status = 404, description = "Unknown email"),
    ),
    tag = "auth"
)]
pub async fn login(
    ctx: Extension<Arc<AppContext>>,
    payload: Option<Json<SignInRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    if !valid_email(&request.email) {
        return Err(ApiError::Validation("Invalid email".to_string()));
    }

    match ctx
        .auth
        .sign_in(&request.email, &request.password, unix_now())
        .await?
    {
        SignInOutcome::Success(pair) => Ok(token_response(&pair, &ctx)),
        SignInOutcome::UnknownEmail => Err(ApiError::NotFound("Unknown email".to_string())),
        SignInOutcome::BadPassword => {
            Err(ApiError::Validation("Invalid credentials".to_string()))
        }
        SignInOutcome::Inactive => Err(ApiError::Forbidden),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    responses((status = 200, description = "Cookie cleared")),
    tag = "auth"
)]
pub async fn logout(ctx: Extension<Arc<AppContext>>) -> impl IntoResponse {
    // Stateless tokens: clearing the cookie is all sign-out does. A captured
    // access token stays valid until its expiry.
    let mut headers = HeaderMap::new();
    match clear_access_token_cookie(ctx.auth.config().secure_cookies) {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build clearing cookie: {err}"),
    }
    (StatusCode::OK, headers)
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh-token",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Fresh token pair issued", body = TokenPair),
        (status = 401, description = "Refresh token invalid or expired"),
    ),
    tag = "auth"
)]
pub async fn refresh_token(
    ctx: Extension<Arc<AppContext>>,
    payload: Option<Json<RefreshRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    match ctx.auth.refresh(&request.refresh_token, unix_now()).await? {
        RefreshOutcome::Refreshed(pair) => Ok(token_response(&pair, &ctx)),
        RefreshOutcome::Denied => Err(ApiError::Unauthorized),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Same answer whether or not the email exists"),
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    ctx: Extension<Arc<AppContext>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    if !valid_email(&request.email) {
        return Err(ApiError::Validation("Invalid email".to_string()));
    }
    ctx.auth.forgot_password(&request.email, unix_now()).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "message": "If the email exists, a reset link has been sent" })),
    )
        .into_response())
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password replaced"),
        (status = 400, description = "Invalid or expired reset token"),
    ),
    tag = "auth"
)]
pub async fn reset_password(
    ctx: Extension<Arc<AppContext>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    if !valid_password(&request.password) {
        return Err(ApiError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    match ctx
        .auth
        .reset_password(&request.token, &request.password, unix_now())
        .await?
    {
        ResetPasswordOutcome::Done => Ok((
            StatusCode::OK,
            Json(json!({ "message": "Password reset successful" })),
        )
            .into_response()),
        ResetPasswordOutcome::InvalidOrExpired => Err(ApiError::Validation(
            "Invalid or expired reset token".to_string(),
        )),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/2fa/enable",
    responses(
        (status = 200, description = "Secret and backup codes, shown once", body = TwoFactorEnrollment),
        (status = 400, description = "Already enabled"),
        (status = 401, description = "Not authenticated"),
    ),
    tag = "2fa"
)]
pub async fn enable_two_factor(
    ctx: Extension<Arc<AppContext>>,
    principal: Extension<Principal>,
) -> Result<Response, ApiError> {
    match ctx.auth.enable_two_factor(principal.user_id).await? {
        EnableTwoFactorOutcome::Enabled {
            secret,
            otpauth_url,
            backup_codes,
        } => Ok((
            StatusCode::OK,
            Json(TwoFactorEnrollment {
                secret,
                otpauth_url,
                backup_codes,
            }),
        )
            .into_response()),
        EnableTwoFactorOutcome::AlreadyEnabled => Err(ApiError::Validation(
            "2FA is already enabled".to_string(),
        )),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/2fa/disable",
    request_body = TwoFactorCodeRequest,
    responses(
        (status = 200, description = "Second factor removed"),
        (status = 400, description = "Not enabled, or invalid code"),
        (status = 401, description = "Not authenticated"),
    ),
    tag = "2fa"
)]
pub async fn disable_two_factor(
    ctx: Extension<Arc<AppContext>>,
    principal: Extension<Principal>,
    payload: Option<Json<TwoFactorCodeRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    match ctx
        .auth
        .disable_two_factor(principal.user_id, &request.code, unix_now())
        .await?
    {
        DisableTwoFactorOutcome::Disabled => Ok((
            StatusCode::OK,
            Json(json!({ "message": "2FA disabled successfully" })),
        )
            .into_response()),
        DisableTwoFactorOutcome::NotEnabled => {
            Err(ApiError::Validation("2FA is not enabled".to_string()))
        }
        DisableTwoFactorOutcome::BadCode => {
            Err(ApiError::Validation("Invalid 2FA code".to_string()))
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/2fa/verify",
    request_body = TwoFactorVerifyRequest,
    responses(
        (status = 200, description = "Second factor accepted, token pair issued", body = TokenPair),
        (status = 400, description = "Invalid credentials or code"),
    ),
    tag = "2fa"
)]
pub async fn verify_two_factor(
    ctx: Extension<Arc<AppContext>>,
    payload: Option<Json<TwoFactorVerifyRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    match ctx
        .auth
        .verify_two_factor(&request.email, &request.code, unix_now())
        .await?
    {
        VerifyTwoFactorOutcome::Verified(pair) => Ok(token_response(&pair, &ctx)),
        VerifyTwoFactorOutcome::InvalidCredentials => {
            Err(ApiError::Validation("Invalid credentials".to_string()))
        }
        VerifyTwoFactorOutcome::BadCode => {
            Err(ApiError::Validation("Invalid 2FA code".to_string()))
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/me",
    responses(
        (status = 200, description = "The authenticated principal", body = PrincipalResponse),
        (status = 401, description = "Not authenticated"),
    ),
    tag = "auth"
)]
pub async fn me(principal: Extension<Principal>) -> impl IntoResponse {
    let Extension(principal) = principal;
    Json(PrincipalResponse {
        user_id: principal.user_id,
        email: principal.email,
        name: principal.name,
        roles: principal.roles.into_iter().map(|role| role.name).collect(),
        permissions: principal.permissions.into_iter().collect(),
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "User profile", body = UserProfile),
        (status = 403, description = "Neither the owner nor an admin"),
        (status = 404, description = "No such user"),
    ),
    tag = "users"
)]
pub async fn get_user(
    ctx: Extension<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let Some(user) = ctx.store.find_by_id(id).await? else {
        return Err(ApiError::NotFound("No such user".to_string()));
    };
    Ok(Json(UserProfile {
        id: user.id,
        name: user.name,
        email: user.email,
        email_confirmed: user.email_confirmed,
        two_factor_enabled: user.two_factor_enabled,
        created_at_unix: user.created_at_unix,
    })
    .into_response())
}
