//! Authentication flows: signup, login, refresh, password reset, and the
//! second factor.
//!
//! Every flow returns a domain outcome enum; the HTTP layer maps outcomes to
//! status codes. Store and codec failures surface as errors, never as
//! outcomes, so a 401 can never hide an outage.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;
use utoipa::ToSchema;

use crate::email::NotificationSender;
use crate::rbac::Principal;
use crate::store::{CreateUserOutcome, CredentialStore, NewUser, RbacStore, TwoFactorUpdate};
use crate::token::{TokenCodec, Verification};

pub mod password;
pub mod two_factor;

/// Tunables for token lifetimes and second-factor provisioning.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Access-token lifetime in seconds.
    pub access_ttl_secs: i64,
    /// Refresh-token lifetime in seconds.
    pub refresh_ttl_secs: i64,
    /// Password-reset token lifetime in seconds.
    pub reset_ttl_secs: i64,
    /// Issuer shown in authenticator apps.
    pub totp_issuer: String,
    /// Whether auth cookies carry the `Secure` attribute.
    pub secure_cookies: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_ttl_secs: 900,
            refresh_ttl_secs: 86_400,
            reset_ttl_secs: 3_600,
            totp_issuer: "Vigilo".to_string(),
            secure_cookies: true,
        }
    }
}

/// A freshly issued access/refresh token pair.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug)]
pub enum SignUpOutcome {
    Created(TokenPair),
    EmailTaken,
}

#[derive(Debug)]
pub enum SignInOutcome {
    Success(TokenPair),
    UnknownEmail,
    BadPassword,
    Inactive,
}

#[derive(Debug)]
pub enum RefreshOutcome {
    Refreshed(TokenPair),
    Denied,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResetPasswordOutcome {
    Done,
    InvalidOrExpired,
}

#[derive(Debug)]
pub enum EnableTwoFactorOutcome {
    Enabled {
        secret: String,
        otpauth_url: String,
        /// Shown to the user exactly once; only hashes are stored.
        backup_codes: Vec<String>,
    },
    AlreadyEnabled,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DisableTwoFactorOutcome {
    Disabled,
    NotEnabled,
    BadCode,
}

#[derive(Debug)]
pub enum VerifyTwoFactorOutcome {
    Verified(TokenPair),
    InvalidCredentials,
    BadCode,
}

#[derive(Debug)]
pub enum AuthenticateOutcome {
    Authenticated(Principal),
    Denied,
}

/// Current wall-clock time as epoch seconds.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Owns the credential flows. Time is always passed in so behavior at a given
/// instant is deterministic.
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    rbac: Arc<dyn RbacStore>,
    notifier: Arc<dyn NotificationSender>,
    codec: TokenCodec,
    config: AuthConfig,
}

impl AuthService {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        rbac: Arc<dyn RbacStore>,
        notifier: Arc<dyn NotificationSender>,
        codec: TokenCodec,
        config: AuthConfig,
    ) -> Self {
        Self {
            store,
            rbac,
            notifier,
            codec,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    fn issue_pair(&self, user_id: i64, now: i64) -> Result<TokenPair> {
        let access_token = self
            .codec
            .issue(user_id, now, now + self.config.access_ttl_secs)?;
        let refresh_token = self
            .codec
            .issue(user_id, now, now + self.config.refresh_ttl_secs)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Register a new principal and log them in.
    pub async fn sign_up(
        &self,
        name: &str,
        email: &str,
        raw_password: &str,
        now: i64,
    ) -> Result<SignUpOutcome> {
        let password_hash = password::hash_password(raw_password)?;
        let confirm_token = random_url_token();

        let new_user = NewUser {
            name: name.to_string(),
            email: email.to_string(),
            password_hash,
            email_confirm_token: confirm_token.clone(),
        };
        let user = match self.store.create(new_user).await? {
            CreateUserOutcome::Created(user) => user,
            CreateUserOutcome::EmailTaken => return Ok(SignUpOutcome::EmailTaken),
        };

        // Notification failures are logged, never fatal to registration.
        if let Err(err) = self.notifier.send_welcome(&user.email, &user.name) {
            warn!(email = %user.email, "failed to send welcome notification: {err}");
        }
        if let Err(err) = self
            .notifier
            .send_email_confirmation(&user.email, &confirm_token)
        {
            warn!(email = %user.email, "failed to send confirmation notification: {err}");
        }

        Ok(SignUpOutcome::Created(self.issue_pair(user.id, now)?))
    }

    /// Verify email + password and issue a token pair.
    pub async fn sign_in(&self, email: &str, raw_password: &str, now: i64) -> Result<SignInOutcome> {
        let Some(user) = self.store.find_by_email(email).await? else {
            return Ok(SignInOutcome::UnknownEmail);
        };
        if !password::verify_password(raw_password, &user.password_hash) {
            return Ok(SignInOutcome::BadPassword);
        }
        if !user.is_active {
            return Ok(SignInOutcome::Inactive);
        }
        Ok(SignInOutcome::Success(self.issue_pair(user.id, now)?))
    }

    /// Exchange a live refresh token for a fresh pair. The presented token is
    /// not revoked; both remain valid until their own expiry.
    pub async fn refresh(&self, refresh_token: &str, now: i64) -> Result<RefreshOutcome> {
        let claims = match self.codec.verify(refresh_token, now)? {
            Verification::Valid(claims) => claims,
            Verification::Invalid => return Ok(RefreshOutcome::Denied),
        };
        let Some(user) = self.store.find_by_id(claims.sub).await? else {
            return Ok(RefreshOutcome::Denied);
        };
        if !user.is_active {
            return Ok(RefreshOutcome::Denied);
        }
        Ok(RefreshOutcome::Refreshed(self.issue_pair(user.id, now)?))
    }

    /// Store a reset token and notify the user. Always returns `Ok` so the
    /// endpoint cannot be used to probe which emails are registered.
    pub async fn forgot_password(&self, email: &str, now: i64) -> Result<()> {
        let Some(user) = self.store.find_by_email(email).await? else {
            return Ok(());
        };
        let token = random_hex_token();
        self.store
            .set_reset_token(user.id, &token, now + self.config.reset_ttl_secs)
            .await
            .context("failed to store reset token")?;
        if let Err(err) = self.notifier.send_password_reset(&user.email, &token) {
            warn!(email = %user.email, "failed to send reset notification: {err}");
        }
        Ok(())
    }

    /// Redeem a reset token. The token must match exactly and its expiry must
    /// be strictly in the future.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        now: i64,
    ) -> Result<ResetPasswordOutcome> {
        let Some(user) = self.store.find_by_reset_token(token, now).await? else {
            return Ok(ResetPasswordOutcome::InvalidOrExpired);
        };
        let password_hash = password::hash_password(new_password)?;
        self.store
            .reset_password(user.id, &password_hash)
            .await
            .context("failed to reset password")?;
        Ok(ResetPasswordOutcome::Done)
    }

    /// Enroll a second factor: fresh TOTP secret plus ten single-use backup
    /// codes. The plaintext codes are returned here and never again.
    pub async fn enable_two_factor(&self, user_id: i64) -> Result<EnableTwoFactorOutcome> {
        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .context("user disappeared during enrollment")?;
        if user.two_factor_enabled {
            return Ok(EnableTwoFactorOutcome::AlreadyEnabled);
        }

        let secret = two_factor::generate_secret()?;
        let otpauth_url = two_factor::otpauth_url(&secret, &self.config.totp_issuer, &user.email)?;
        let batch = two_factor::BackupCodeBatch::generate()?;

        self.store
            .update_two_factor(
                user.id,
                TwoFactorUpdate {
                    enabled: true,
                    secret: Some(secret.clone()),
                    backup_code_hashes: batch.code_hashes,
                },
            )
            .await
            .context("failed to persist two-factor enrollment")?;

        Ok(EnableTwoFactorOutcome::Enabled {
            secret,
            otpauth_url,
            backup_codes: batch.codes,
        })
    }

    /// Tear down the second factor. Requires a valid current TOTP code.
    pub async fn disable_two_factor(
        &self,
        user_id: i64,
        code: &str,
        now: i64,
    ) -> Result<DisableTwoFactorOutcome> {
        let Some(user) = self.store.find_by_id(user_id).await? else {
            return Ok(DisableTwoFactorOutcome::NotEnabled);
        };
        let Some(secret) = user.two_factor_secret.as_deref().filter(|_| user.two_factor_enabled)
        else {
            return Ok(DisableTwoFactorOutcome::NotEnabled);
        };
        if !two_factor::check_code(secret, code, now)? {
            return Ok(DisableTwoFactorOutcome::BadCode);
        }
        self.store
            .update_two_factor(
                user.id,
                TwoFactorUpdate {
                    enabled: false,
                    secret: None,
                    backup_code_hashes: Vec::new(),
                },
            )
            .await
            .context("failed to clear two-factor state")?;
        Ok(DisableTwoFactorOutcome::Disabled)
    }

    /// Secondary login step: the code must match the current TOTP value or
    /// consume an unused backup code. A consumed backup code is removed from
    /// the stored set before the token pair is issued.
    pub async fn verify_two_factor(
        &self,
        email: &str,
        code: &str,
        now: i64,
    ) -> Result<VerifyTwoFactorOutcome> {
        let Some(user) = self.store.find_by_email(email).await? else {
            return Ok(VerifyTwoFactorOutcome::InvalidCredentials);
        };
        let Some(secret) = user.two_factor_secret.as_deref().filter(|_| user.two_factor_enabled)
        else {
            return Ok(VerifyTwoFactorOutcome::InvalidCredentials);
        };

        if two_factor::check_code(secret, code, now)? {
            return Ok(VerifyTwoFactorOutcome::Verified(
                self.issue_pair(user.id, now)?,
            ));
        }

        let Some(index) = two_factor::match_backup_code(code, &user.two_factor_backup_codes)
        else {
            return Ok(VerifyTwoFactorOutcome::BadCode);
        };
        let mut remaining = user.two_factor_backup_codes.clone();
        remaining.remove(index);
        self.store
            .update_two_factor(
                user.id,
                TwoFactorUpdate {
                    enabled: true,
                    secret: Some(secret.to_string()),
                    backup_code_hashes: remaining,
                },
            )
            .await
            .context("failed to consume backup code")?;

        Ok(VerifyTwoFactorOutcome::Verified(
            self.issue_pair(user.id, now)?,
        ))
    }

    /// Resolve a bearer token to a fully loaded principal. `Denied` covers
    /// bad tokens and missing or inactive users; store failures are errors.
    pub async fn authenticate(&self, bearer: &str, now: i64) -> Result<AuthenticateOutcome> {
        let claims = match self.codec.verify(bearer, now)? {
            Verification::Valid(claims) => claims,
            Verification::Invalid => return Ok(AuthenticateOutcome::Denied),
        };
        let Some(user) = self.store.find_by_id(claims.sub).await? else {
            return Ok(AuthenticateOutcome::Denied);
        };
        if !user.is_active {
            return Ok(AuthenticateOutcome::Denied);
        }
        let access = self.rbac.load_access(user.id).await?;
        Ok(AuthenticateOutcome::Authenticated(Principal {
            user_id: user.id,
            email: user.email,
            name: user.name,
            roles: access.roles,
            permissions: access.permissions,
        }))
    }
}

/// 32 random bytes, base64url without padding. Used for email confirmation.
fn random_url_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// 32 random bytes, lowercase hex. Used for password-reset links.
fn random_hex_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::email::LogNotifier;
    use crate::store::MemoryStore;
    use secrecy::SecretString;

    const NOW: i64 = 1_700_000_000;

    fn service() -> AuthService {
        let store = Arc::new(MemoryStore::new());
        AuthService::new(
            store.clone(),
            store,
            Arc::new(LogNotifier),
            TokenCodec::new(SecretString::from("test-secret")),
            AuthConfig {
                secure_cookies: false,
                ..AuthConfig::default()
            },
        )
    }

    async fn signed_up(service: &AuthService) -> TokenPair {
        match service
            .sign_up("Ann", "ann@example.com", "hunter2!", NOW)
            .await
            .unwrap()
        {
            SignUpOutcome::Created(pair) => pair,
            SignUpOutcome::EmailTaken => panic!("email unexpectedly taken"),
        }
    }

    #[tokio::test]
    async fn sign_up_then_sign_in() {
        let service = service();
        signed_up(&service).await;

        match service
            .sign_in("ann@example.com", "hunter2!", NOW)
            .await
            .unwrap()
        {
            SignInOutcome::Success(_) => {}
            other => panic!("expected success, got {other:?}"),
        }
        assert!(matches!(
            service
                .sign_in("ann@example.com", "wrong", NOW)
                .await
                .unwrap(),
            SignInOutcome::BadPassword
        ));
        assert!(matches!(
            service.sign_in("bob@example.com", "x", NOW).await.unwrap(),
            SignInOutcome::UnknownEmail
        ));
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let service = service();
        signed_up(&service).await;
        assert!(matches!(
            service
                .sign_up("Ann Again", "ann@example.com", "other", NOW)
                .await
                .unwrap(),
            SignUpOutcome::EmailTaken
        ));
    }

    #[tokio::test]
    async fn refresh_reissues_for_a_live_token() {
        let service = service();
        let pair = signed_up(&service).await;

        assert!(matches!(
            service.refresh(&pair.refresh_token, NOW + 10).await.unwrap(),
            RefreshOutcome::Refreshed(_)
        ));
        // Expired refresh token is denied, not an error.
        assert!(matches!(
            service
                .refresh(&pair.refresh_token, NOW + 86_401)
                .await
                .unwrap(),
            RefreshOutcome::Denied
        ));
        assert!(matches!(
            service.refresh("not-a-token", NOW).await.unwrap(),
            RefreshOutcome::Denied
        ));
    }

    #[tokio::test]
    async fn reset_flow_honours_expiry() {
        let service = service();
        signed_up(&service).await;
        service.forgot_password("ann@example.com", NOW).await.unwrap();

        let user = service
            .store
            .find_by_email("ann@example.com")
            .await
            .unwrap()
            .unwrap();
        let token = user.password_reset_token.unwrap();

        // Expired exactly at the boundary.
        assert_eq!(
            service
                .reset_password(&token, "new-password", NOW + 3_600)
                .await
                .unwrap(),
            ResetPasswordOutcome::InvalidOrExpired
        );
        assert_eq!(
            service
                .reset_password(&token, "new-password", NOW + 3_599)
                .await
                .unwrap(),
            ResetPasswordOutcome::Done
        );
        // Token is single-use.
        assert_eq!(
            service
                .reset_password(&token, "again", NOW + 3_599)
                .await
                .unwrap(),
            ResetPasswordOutcome::InvalidOrExpired
        );
        assert!(matches!(
            service
                .sign_in("ann@example.com", "new-password", NOW)
                .await
                .unwrap(),
            SignInOutcome::Success(_)
        ));
    }

    #[tokio::test]
    async fn forgot_password_is_silent_for_unknown_emails() {
        let service = service();
        service
            .forgot_password("nobody@example.com", NOW)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn two_factor_enrollment_and_totp_verification() {
        let service = service();
        signed_up(&service).await;
        let user = service
            .store
            .find_by_email("ann@example.com")
            .await
            .unwrap()
            .unwrap();

        let secret = match service.enable_two_factor(user.id).await.unwrap() {
            EnableTwoFactorOutcome::Enabled {
                secret,
                otpauth_url,
                backup_codes,
            } => {
                assert!(otpauth_url.starts_with("otpauth://totp/"));
                assert_eq!(backup_codes.len(), 10);
                secret
            }
            EnableTwoFactorOutcome::AlreadyEnabled => panic!("fresh user already enrolled"),
        };
        assert!(matches!(
            service.enable_two_factor(user.id).await.unwrap(),
            EnableTwoFactorOutcome::AlreadyEnabled
        ));

        let code = two_factor_code_at(&secret, NOW);
        assert!(matches!(
            service
                .verify_two_factor("ann@example.com", &code, NOW)
                .await
                .unwrap(),
            VerifyTwoFactorOutcome::Verified(_)
        ));
        assert!(matches!(
            service
                .verify_two_factor("ann@example.com", "bad-code", NOW)
                .await
                .unwrap(),
            VerifyTwoFactorOutcome::BadCode
        ));
    }

    #[tokio::test]
    async fn backup_code_is_consumed_exactly_once() {
        let service = service();
        signed_up(&service).await;
        let user = service
            .store
            .find_by_email("ann@example.com")
            .await
            .unwrap()
            .unwrap();
        let backup_codes = match service.enable_two_factor(user.id).await.unwrap() {
            EnableTwoFactorOutcome::Enabled { backup_codes, .. } => backup_codes,
            EnableTwoFactorOutcome::AlreadyEnabled => panic!("fresh user already enrolled"),
        };
        let code = backup_codes.first().unwrap();

        assert!(matches!(
            service
                .verify_two_factor("ann@example.com", code, NOW)
                .await
                .unwrap(),
            VerifyTwoFactorOutcome::Verified(_)
        ));
        // Replaying the consumed code fails; nine codes remain.
        assert!(matches!(
            service
                .verify_two_factor("ann@example.com", code, NOW)
                .await
                .unwrap(),
            VerifyTwoFactorOutcome::BadCode
        ));
        let user = service.store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.two_factor_backup_codes.len(), 9);
    }

    #[tokio::test]
    async fn disable_requires_a_valid_code() {
        let service = service();
        signed_up(&service).await;
        let user = service
            .store
            .find_by_email("ann@example.com")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            service
                .disable_two_factor(user.id, "000000", NOW)
                .await
                .unwrap(),
            DisableTwoFactorOutcome::NotEnabled
        );

        let secret = match service.enable_two_factor(user.id).await.unwrap() {
            EnableTwoFactorOutcome::Enabled { secret, .. } => secret,
            EnableTwoFactorOutcome::AlreadyEnabled => panic!("fresh user already enrolled"),
        };
        assert_eq!(
            service
                .disable_two_factor(user.id, "badcod", NOW)
                .await
                .unwrap(),
            DisableTwoFactorOutcome::BadCode
        );
        let code = two_factor_code_at(&secret, NOW);
        assert_eq!(
            service
                .disable_two_factor(user.id, &code, NOW)
                .await
                .unwrap(),
            DisableTwoFactorOutcome::Disabled
        );
        let user = service.store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(!user.two_factor_enabled);
        assert!(user.two_factor_secret.is_none());
        assert!(user.two_factor_backup_codes.is_empty());
    }

    #[tokio::test]
    async fn authenticate_resolves_a_principal() {
        let service = service();
        let pair = signed_up(&service).await;

        match service
            .authenticate(&pair.access_token, NOW + 1)
            .await
            .unwrap()
        {
            AuthenticateOutcome::Authenticated(principal) => {
                assert_eq!(principal.email, "ann@example.com");
                assert_eq!(principal.name, "Ann");
            }
            AuthenticateOutcome::Denied => panic!("fresh token denied"),
        }
        // Past the access TTL the same token is denied.
        assert!(matches!(
            service
                .authenticate(&pair.access_token, NOW + 901)
                .await
                .unwrap(),
            AuthenticateOutcome::Denied
        ));
    }

    fn two_factor_code_at(secret_base32: &str, now: i64) -> String {
        let secret = totp_rs::Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .unwrap();
        let totp = totp_rs::TOTP::new(
            totp_rs::Algorithm::SHA1,
            6,
            1,
            30,
            secret,
            Some("Vigilo".to_string()),
            "ann@example.com".to_string(),
        )
        .unwrap();
        totp.generate(u64::try_from(now).unwrap())
    }
}
