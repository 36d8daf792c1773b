//! Identity types and collaborator traits.
//!
//! The gateway does not issue credentials or store profiles. It consumes
//! both concerns through the two traits here: the token issuer turns an
//! opaque credential into a verified identity, and the profile directory
//! resolves an identity to a display name. Implementations live outside
//! this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application roles a connection can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Mentor,
    Admin,
}

impl Role {
    /// Get the role's wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Mentor => "mentor",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of a successful credential verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Stable identity string for the authenticated user.
    pub identity: String,
    /// Role the credential grants.
    pub role: Role,
}

/// Credential verification failures.
///
/// All of these are terminal for the connection attempt; the gateway never
/// retries verification on the caller's behalf.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The credential is malformed or its signature does not verify.
    #[error("Invalid credential")]
    InvalidCredential,

    /// The credential was valid once but has expired.
    #[error("Credential expired")]
    Expired,

    /// The verifier itself could not be reached.
    #[error("Verifier unavailable: {0}")]
    Unavailable(String),
}

/// Profile directory failures.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No profile exists for the identity.
    #[error("No profile for identity: {0}")]
    NotFound(String),

    /// The directory could not be reached.
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Turns an opaque credential into a verified identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify a credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential is invalid, expired, or the
    /// verifier is unreachable.
    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity, AuthError>;
}

/// Resolves an identity to its display name.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Look up the display name for an identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity has no profile or the directory is
    /// unreachable.
    async fn display_name(&self, identity: &str) -> Result<String, DirectoryError>;
}
