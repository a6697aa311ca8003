//! Second-factor primitives: RFC 6238 TOTP and single-use backup codes.
//!
//! Backup codes are returned in plaintext exactly once at enrollment; only
//! their Argon2id hashes are stored, and a matched hash is removed from the
//! stored set when the code is consumed.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use rand::{rngs::OsRng, RngCore};
use totp_rs::{Algorithm, Secret, TOTP};

const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP: u64 = 30;

const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_LEN: usize = 12;
const BACKUP_CODE_GROUP_SIZE: usize = 4;
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a fresh random TOTP secret, base32-encoded.
pub fn generate_secret() -> Result<String> {
    match Secret::generate_secret().to_encoded() {
        Secret::Encoded(encoded) => Ok(encoded),
        Secret::Raw(_) => Err(anyhow!("secret encoding failed")),
    }
}

/// Build a TOTP instance from a base32 secret. The account label only matters
/// for the provisioning URL.
fn build_totp(secret_base32: &str, issuer: &str, account: &str) -> Result<TOTP> {
    let secret_bytes = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|e| anyhow!("invalid TOTP secret: {e}"))?;
    TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW,
        TOTP_STEP,
        secret_bytes,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|e| anyhow!("TOTP init error: {e}"))
}

/// The otpauth:// provisioning URL for authenticator apps.
pub fn otpauth_url(secret_base32: &str, issuer: &str, account: &str) -> Result<String> {
    Ok(build_totp(secret_base32, issuer, account)?.get_url())
}

/// Check a 6-digit code against the secret at the given time, allowing one
/// step of clock skew in either direction.
pub fn check_code(secret_base32: &str, code: &str, now_unix: i64) -> Result<bool> {
    let totp = build_totp(secret_base32, "check", "check")?;
    let now = u64::try_from(now_unix).map_err(|_| anyhow!("time before epoch"))?;
    Ok(totp.check(code, now))
}

/// A freshly generated backup-code batch (plaintext + hashes).
#[derive(Debug)]
pub struct BackupCodeBatch {
    pub codes: Vec<String>,
    pub code_hashes: Vec<String>,
}

impl BackupCodeBatch {
    pub fn generate() -> Result<Self> {
        let mut rng = OsRng;
        Self::generate_with_rng(&mut rng)
    }

    fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self> {
        let mut codes = Vec::with_capacity(BACKUP_CODE_COUNT);
        let mut code_hashes = Vec::with_capacity(BACKUP_CODE_COUNT);
        for _ in 0..BACKUP_CODE_COUNT {
            let code = generate_code(rng)?;
            let hash = hash_backup_code(&code)?;
            codes.push(code);
            code_hashes.push(hash);
        }
        Ok(Self { codes, code_hashes })
    }
}

/// Strip separators, uppercase, and validate length and alphabet.
pub fn normalize_backup_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != BACKUP_CODE_LEN {
        return Err(anyhow!("invalid backup code length"));
    }
    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| BACKUP_CODE_ALPHABET.contains(ch))
    {
        return Err(anyhow!("invalid backup code characters"));
    }
    Ok(normalized)
}

fn format_backup_code(normalized: &str) -> Result<String> {
    if normalized.len() != BACKUP_CODE_LEN {
        return Err(anyhow!("invalid backup code length"));
    }
    let mut out = String::with_capacity(BACKUP_CODE_LEN + 2);
    for (idx, chunk) in normalized
        .as_bytes()
        .chunks(BACKUP_CODE_GROUP_SIZE)
        .enumerate()
    {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).map_err(|_| anyhow!("invalid chunk"))?);
    }
    Ok(out)
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut raw = [0u8; BACKUP_CODE_LEN];
    rng.fill_bytes(&mut raw);
    let mut normalized = String::with_capacity(BACKUP_CODE_LEN);
    for byte in raw {
        let idx = usize::from(byte) % BACKUP_CODE_ALPHABET.len();
        if let Some(&char_byte) = BACKUP_CODE_ALPHABET.get(idx) {
            normalized.push(char_byte as char);
        }
    }
    format_backup_code(&normalized)
}

fn hash_backup_code(code: &str) -> Result<String> {
    let normalized = normalize_backup_code(code)?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(normalized.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash backup code"))?
        .to_string();
    Ok(hash)
}

/// Find the stored hash the code matches, if any. The caller removes the
/// returned index from the stored set so the code cannot be replayed.
#[must_use]
pub fn match_backup_code(code: &str, stored_hashes: &[String]) -> Option<usize> {
    let normalized = normalize_backup_code(code).ok()?;
    stored_hashes.iter().position(|stored| {
        PasswordHash::new(stored)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(normalized.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn generated_secret_round_trips_through_totp() {
        let secret = generate_secret().unwrap();
        let totp = build_totp(&secret, "Vigilo", "ann@example.com").unwrap();
        let code = totp.generate(u64::try_from(NOW).unwrap());
        assert!(check_code(&secret, &code, NOW).unwrap());
        assert!(!check_code(&secret, "000000", NOW).unwrap() || code == "000000");
    }

    #[test]
    fn code_accepted_within_one_step_of_skew() {
        let secret = generate_secret().unwrap();
        let totp = build_totp(&secret, "Vigilo", "ann@example.com").unwrap();
        let code = totp.generate(u64::try_from(NOW).unwrap());
        assert!(check_code(&secret, &code, NOW + 29).unwrap());
        assert!(!check_code(&secret, &code, NOW + 3600).unwrap());
    }

    #[test]
    fn otpauth_url_carries_issuer_and_account() {
        let secret = generate_secret().unwrap();
        let url = otpauth_url(&secret, "Vigilo", "ann@example.com").unwrap();
        assert!(url.starts_with("otpauth://totp/"));
        assert!(url.contains("issuer=Vigilo"));
    }

    #[test]
    fn batch_has_ten_distinct_grouped_codes() {
        let batch = BackupCodeBatch::generate().unwrap();
        assert_eq!(batch.codes.len(), 10);
        assert_eq!(batch.code_hashes.len(), 10);
        let mut unique = batch.codes.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 10);
        for code in &batch.codes {
            assert_eq!(code.len(), 14);
            assert_eq!(code.matches('-').count(), 2);
        }
    }

    #[test]
    fn match_backup_code_finds_the_right_hash() {
        let batch = BackupCodeBatch::generate().unwrap();
        let code = batch.codes.get(3).unwrap();
        assert_eq!(match_backup_code(code, &batch.code_hashes), Some(3));
        assert_eq!(match_backup_code("AAAA-AAAA-AAAA", &batch.code_hashes), None);
    }

    #[test]
    fn normalize_accepts_lowercase_and_separators() {
        let normalized = normalize_backup_code("abcd-efgh-jklm").unwrap();
        assert_eq!(normalized, "ABCDEFGHJKLM");
        assert!(normalize_backup_code("too-short").is_err());
    }
}
