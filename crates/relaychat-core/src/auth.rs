//! Auth provider contract consumed by the chat client.
//!
//! Token acquisition itself lives in the host application (an identity
//! provider client, a config file, an env var). The chat core only needs the
//! three operations below.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Produces bearer tokens for the chat service.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Whether a user is currently signed in.
    fn is_signed_in(&self) -> bool;

    /// The current bearer token, if any.
    fn access_token(&self) -> Option<String>;

    /// Run the provider's interactive sign-in flow.
    ///
    /// Called by the client after an unauthorized response; on success the
    /// request is retried once with the refreshed token.
    async fn sign_in(&self) -> Result<()>;
}

/// Auth provider backed by a fixed token. Suitable for CLI use and tests.
pub struct StaticAuth {
    token: String,
}

impl StaticAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    fn is_signed_in(&self) -> bool {
        true
    }

    fn access_token(&self) -> Option<String> {
        Some(self.token.clone())
    }

    async fn sign_in(&self) -> Result<()> {
        Ok(())
    }
}

/// Auth provider for a signed-out user; sign-in always fails.
pub struct AnonymousAuth;

#[async_trait]
impl AuthProvider for AnonymousAuth {
    fn is_signed_in(&self) -> bool {
        false
    }

    fn access_token(&self) -> Option<String> {
        None
    }

    async fn sign_in(&self) -> Result<()> {
        Err(Error::Auth("no interactive sign-in available".to_string()))
    }
}
