//! Authentication for the integration and admin APIs.

mod extractor;
pub mod session;

use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

pub use extractor::{AdminAuth, IntegrationAuth, authenticate_request, client_ip};
pub use session::{OwnerSession, SessionCache, SessionState};

/// Constant-time comparison of a stored secret against a provided value.
/// Unequal lengths compare false without an early exit.
fn secret_matches(expected: &SecretString, provided: &str) -> bool {
    expected
        .expose_secret()
        .as_bytes()
        .ct_eq(provided.as_bytes())
        .into()
}

/// Wrapper type for the bootstrap admin key.
/// Uses `SecretString` to prevent accidental logging and zeroize on drop.
#[derive(Clone)]
pub struct AdminKey(Option<SecretString>);

impl AdminKey {
    /// Create a new AdminKey from an optional string.
    pub fn new(key: Option<String>) -> Self {
        Self(key.map(SecretString::from))
    }

    /// Securely compare the provided key with the stored admin key.
    pub fn verify(&self, provided: &str) -> bool {
        match &self.0 {
            Some(secret) => secret_matches(secret, provided),
            None => false,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.0.is_some()
    }
}

impl std::fmt::Debug for AdminKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(_) => write!(f, "AdminKey([REDACTED])"),
            None => write!(f, "AdminKey(None)"),
        }
    }
}

/// Pre-shared key the automation tool sends in `X-Integration-Key`.
#[derive(Clone)]
pub struct IntegrationKey(SecretString);

impl IntegrationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(SecretString::from(key.into()))
    }

    pub fn verify(&self, provided: &str) -> bool {
        secret_matches(&self.0, provided)
    }
}

impl std::fmt::Debug for IntegrationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IntegrationKey([REDACTED])")
    }
}
