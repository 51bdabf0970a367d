//! Session Token Provider
//!
//! The sync core never stores credentials. It asks a provider for the bearer
//! token right before each handshake or request; `None` means the user is
//! signed out, which is an expected state.

use async_trait::async_trait;

/// Supplies the bearer credential on demand
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current bearer token, or `None` when signed out
    async fn bearer_token(&self) -> Option<String>;
}

/// Fixed token, mostly for tools and tests
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    /// Provider that always returns `token`
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Provider for a signed-out user
    pub fn signed_out() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Option<String> {
        self.token.clone().filter(|t| !t.trim().is_empty())
    }
}

/// Token read from an environment variable at lookup time
#[derive(Debug, Clone)]
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    /// Provider reading `var`
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn bearer_token(&self) -> Option<String> {
        std::env::var(&self.var)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}
