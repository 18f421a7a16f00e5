//! API token storage in the system keyring

use async_trait::async_trait;
use catscan_api::{ApiError, ApiResult, Token, TokenSource};
use thiserror::Error;
use tracing::{debug, warn};

/// Keyring service name
pub const KEYRING_SERVICE: &str = "catscan";

/// Keyring account holding the API token
pub const KEYRING_ACCOUNT: &str = "api-token";

/// Keyring errors
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Refusing to store an empty token")]
    EmptyToken,
}

/// Token kept in the platform credential store
#[derive(Debug, Clone)]
pub struct KeyringTokenSource {
    service: String,
    account: String,
}

impl Default for KeyringTokenSource {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE, KEYRING_ACCOUNT)
    }
}

impl KeyringTokenSource {
    #[must_use]
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, SecretError> {
        Ok(keyring::Entry::new(&self.service, &self.account)?)
    }

    /// Read the stored token; `None` when nothing is stored
    pub fn load(&self) -> Result<Option<Token>, SecretError> {
        match self.entry()?.get_password() {
            Ok(raw) => Ok(Token::new(raw)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store `raw`, replacing any previous token
    pub fn store(&self, raw: &str) -> Result<(), SecretError> {
        let token = Token::new(raw).ok_or(SecretError::EmptyToken)?;
        self.entry()?.set_password(token.expose())?;
        debug!(service = %self.service, "stored API token in keyring");
        Ok(())
    }

    /// Remove the stored token. Returns whether one existed.
    pub fn delete(&self) -> Result<bool, SecretError> {
        match self.entry()?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl TokenSource for KeyringTokenSource {
    async fn token(&self) -> ApiResult<Option<Token>> {
        let source = self.clone();
        let loaded = tokio::task::spawn_blocking(move || source.load())
            .await
            .map_err(|e| ApiError::Config(format!("keyring task failed: {e}")))?;

        match loaded {
            Ok(token) => Ok(token),
            // Later sources may still have a credential
            Err(e) => {
                warn!(error = %e, "keyring unavailable");
                Ok(None)
            }
        }
    }
}
