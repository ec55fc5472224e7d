use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Short-lived credentials for an assumed per-account trust role. The
/// secret halves never leave process memory: `Debug` redacts them and the
/// account projection skips the whole struct before persistence.
#[derive(Clone)]
pub struct AccountCredentials {
    pub access_key_id: String,
    secret_access_key: SecretString,
    session_token: SecretString,
    pub expiration: Option<DateTime<Utc>>,
}

impl AccountCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
        expiration: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::new(secret_access_key.into()),
            session_token: SecretString::new(session_token.into()),
            expiration,
        }
    }

    /// The scheduler injects the process role's credentials through the
    /// standard environment variables.
    pub fn from_env() -> crate::error::Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| crate::err!("AWS_ACCESS_KEY_ID is not set"))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| crate::err!("AWS_SECRET_ACCESS_KEY is not set"))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").unwrap_or_default();
        Ok(Self::new(
            access_key_id,
            secret_access_key,
            session_token,
            None,
        ))
    }

    /// Stable identity of the principal holding these credentials; throttle
    /// buckets are shared across adapters minted for the same principal.
    pub fn principal(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        self.secret_access_key.expose_secret()
    }

    pub fn session_token(&self) -> &str {
        self.session_token.expose_secret()
    }
}

impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}
