pub mod server;

use crate::auth::AuthConfig;
use anyhow::Result;
use secrecy::SecretString;

/// What the CLI resolved to do.
#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        jwt_secret: SecretString,
        auth: AuthConfig,
    },
}

impl Action {
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> Result<()> {
        match self {
            Self::Server { .. } => server::handle(self).await,
        }
    }
}
