//! Notification delivery abstraction.
//!
//! Authentication flows hand fully-shaped messages to a `NotificationSender`.
//! Delivery failures never fail the originating request; callers log them and
//! move on. The default sender logs the payload instead of sending real email.

use anyhow::Result;
use tracing::info;

/// Notification delivery used by signup, password-reset, and 2FA flows.
pub trait NotificationSender: Send + Sync {
    /// Greet a freshly registered user.
    fn send_welcome(&self, to_email: &str, name: &str) -> Result<()>;

    /// Deliver the email-confirmation link token.
    fn send_email_confirmation(&self, to_email: &str, confirm_token: &str) -> Result<()>;

    /// Deliver a password-reset link token.
    fn send_password_reset(&self, to_email: &str, reset_token: &str) -> Result<()>;

    /// Deliver a one-time second-factor code.
    fn send_two_factor_code(&self, to_email: &str, code: &str) -> Result<()>;
}

/// Local dev sender that logs instead of sending real email.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

impl NotificationSender for LogNotifier {
    fn send_welcome(&self, to_email: &str, name: &str) -> Result<()> {
        info!(to_email = %to_email, name = %name, "welcome notification stub");
        Ok(())
    }

    fn send_email_confirmation(&self, to_email: &str, confirm_token: &str) -> Result<()> {
        info!(to_email = %to_email, confirm_token = %confirm_token, "email confirmation stub");
        Ok(())
    }

    fn send_password_reset(&self, to_email: &str, reset_token: &str) -> Result<()> {
        info!(to_email = %to_email, reset_token = %reset_token, "password reset stub");
        Ok(())
    }

    // The code itself stays out of the logs.
    fn send_two_factor_code(&self, to_email: &str, _code: &str) -> Result<()> {
        info!(to_email = %to_email, "two-factor code stub");
        Ok(())
    }
}
