//! # Vigilo (Authentication & RBAC core)
//!
//! `vigilo` is the credential and authorization authority for a multi-tenant
//! web backend. It issues and validates HS256 token pairs, guards every
//! request behind an authentication layer, and answers permission checks
//! through a role-based access control engine.
//!
//! ## Credentials
//!
//! Passwords are Argon2id-hashed and never stored in plaintext. A successful
//! login yields a short-lived access token and a long-lived refresh token;
//! neither is persisted server-side, validity is proven by signature and
//! expiry alone. Sign-out clears the auth cookie only: a captured access
//! token remains valid until its natural expiry.
//!
//! ## Two-factor
//!
//! TOTP enrollment follows RFC 6238 (SHA-1, 6 digits, 30 second step) and
//! returns a provisioning URI plus ten single-use backup codes. Backup codes
//! are Argon2id-hashed at rest and removed from the stored set on use.
//!
//! ## Authorization
//!
//! Permissions are granted to roles and roles to users, never permissions
//! directly to users. The `system:admin` permission short-circuits every
//! permission check. Default roles and permissions are seeded idempotently
//! at startup.

pub mod api;
pub mod auth;
pub mod cli;
pub mod email;
pub mod rbac;
pub mod store;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
