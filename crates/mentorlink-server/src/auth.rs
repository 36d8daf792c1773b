//! Credential verification against the platform's token issuer.
//!
//! The main application issues short-lived HS256 JWTs; the gateway shares
//! the signing secret and verifies locally. Claims carry the identity in
//! `sub` and the application role.

use async_trait::async_trait;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use mentorlink_core::{AuthError, IdentityVerifier, Role, VerifiedIdentity};

/// Claims: sub=identity, role, iat, exp
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// JWT-based identity verifier.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier over a shared HS256 secret.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity, AuthError> {
        let data = decode::<Claims>(credential, &self.decoding_key, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidCredential,
            },
        )?;

        Ok(VerifiedIdentity {
            identity: data.claims.sub,
            role: data.claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"test-secret";

    fn issue(identity: &str, role: Role, ttl_secs: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: identity.to_string(),
            role,
            iat: now,
            exp: now + ttl_secs,
        };
        encode(
            &Header::default(), // HS256
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_verify_valid_token() {
        let verifier = JwtVerifier::new(SECRET);
        let token = issue("u1", Role::Mentor, 900);

        let verified = verifier.verify(&token).await.unwrap();
        assert_eq!(verified.identity, "u1");
        assert_eq!(verified.role, Role::Mentor);
    }

    #[tokio::test]
    async fn test_verify_garbage_token() {
        let verifier = JwtVerifier::new(SECRET);
        assert!(matches!(
            verifier.verify("not-a-jwt").await,
            Err(AuthError::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn test_verify_wrong_secret() {
        let verifier = JwtVerifier::new(b"another-secret");
        let token = issue("u1", Role::Student, 900);
        assert!(matches!(
            verifier.verify(&token).await,
            Err(AuthError::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn test_verify_expired_token() {
        let verifier = JwtVerifier::new(SECRET);
        // Expired well outside jsonwebtoken's default leeway.
        let token = issue("u1", Role::Student, -600);
        assert!(matches!(
            verifier.verify(&token).await,
            Err(AuthError::Expired)
        ));
    }
}
