//! Sensitive values and host log masking.

use std::fmt;

/// Register a value with the host log masker so it is redacted from any
/// subsequent log line. Uses the `::add-mask::` workflow command.
pub fn mask_secret(value: &str) {
    if value.is_empty() {
        return;
    }
    println!("::add-mask::{value}");
}

/// A short-lived credential issued by the token service.
///
/// `Debug` never prints the token itself.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    token: String,
    expires_at: Option<String>,
}

impl AuthToken {
    pub fn new(token: impl Into<String>, expires_at: Option<String>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// The raw token, for building request headers.
    pub fn expose(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Option<&str> {
        self.expires_at.as_deref()
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
