//! Bearer credentials and the sources that provide them

use crate::error::ApiResult;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Opaque bearer credential
///
/// Never printed: `Debug` and `Display` are redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Wrap a raw credential. Blank input yields `None`.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Raw value, for building the `Authorization` header only
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

/// Something that can hand out the current credential
///
/// `Ok(None)` means no credential is configured. Errors are reserved for a
/// backend that could not be queried at all.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> ApiResult<Option<Token>>;
}

/// A fixed credential, or the absence of one
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<Token>);

impl StaticToken {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(Token::new(raw))
    }

    /// A source that never has a credential
    #[must_use]
    pub fn none() -> Self {
        Self(None)
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> ApiResult<Option<Token>> {
        Ok(self.0.clone())
    }
}

/// Reads the credential from environment variables, first match wins
#[derive(Debug, Clone)]
pub struct EnvToken {
    vars: Vec<String>,
}

impl EnvToken {
    #[must_use]
    pub fn new(vars: &[&str]) -> Self {
        Self {
            vars: vars.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new(&["CATSCAN_TOKEN", "TFC_TOKEN"])
    }
}

#[async_trait]
impl TokenSource for EnvToken {
    async fn token(&self) -> ApiResult<Option<Token>> {
        Ok(self
            .vars
            .iter()
            .find_map(|var| std::env::var(var).ok().and_then(Token::new)))
    }
}

/// Tries each source in order until one yields a credential
#[derive(Clone, Default)]
pub struct ChainedTokenSource {
    sources: Vec<Arc<dyn TokenSource>>,
}

impl ChainedTokenSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.sources.push(source);
        self
    }
}

impl fmt::Debug for ChainedTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainedTokenSource")
            .field("sources", &self.sources.len())
            .finish()
    }
}

#[async_trait]
impl TokenSource for ChainedTokenSource {
    async fn token(&self) -> ApiResult<Option<Token>> {
        for source in &self.sources {
            if let Some(token) = source.token().await? {
                return Ok(Some(token));
            }
        }
        Ok(None)
    }
}
