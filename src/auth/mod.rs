use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use jsonwebtoken::{
    decode,
    encode,
    errors::ErrorKind as JwtErrorKind,
    DecodingKey,
    EncodingKey,
    Header,
    Validation,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    data_model::{Principal, Role},
    state_store::StateStore,
    utils::get_epoch_time_in_ms,
};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("principal {0} already exists")]
    Conflict(String),

    #[error("principal {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// RFC7519 claims carried by a bearer token.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: Role,
    iat: u64,
    exp: u64,
}

/// The identity a validated bearer token proves.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedPrincipal {
    pub id: String,
    pub role: Role,
}

impl AuthenticatedPrincipal {
    pub fn require_write(&self) -> Result<(), AuthError> {
        if self.role.can_write() {
            Ok(())
        } else {
            Err(AuthError::Forbidden(format!(
                "role {} cannot perform writes",
                self.role
            )))
        }
    }

    pub fn require_admin(&self) -> Result<(), AuthError> {
        if self.role.can_admin() {
            Ok(())
        } else {
            Err(AuthError::Forbidden(format!(
                "role {} is not an administrator",
                self.role
            )))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BearerToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

/// Credential issuance and bearer validation. Credentials are stored as
/// salted argon2id hashes; tokens are HS256-signed and carry id, role and
/// an absolute expiry.
pub struct AuthService {
    store: Arc<StateStore>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
}

impl AuthService {
    pub fn new(store: Arc<StateStore>, signing_key: &[u8], token_ttl: Duration) -> Self {
        Self {
            store,
            encoding_key: EncodingKey::from_secret(signing_key),
            decoding_key: DecodingKey::from_secret(signing_key),
            token_ttl,
        }
    }

    /// Creates a principal with a freshly salted credential hash. Fails
    /// with Conflict when the id is taken.
    pub fn register(
        &self,
        principal_id: &str,
        credential: &str,
        role: Role,
    ) -> Result<Principal, AuthError> {
        if principal_id.is_empty() || credential.is_empty() {
            return Err(AuthError::Unauthenticated(
                "principal id and credential must be non-empty".to_string(),
            ));
        }

        let salt = SaltString::generate(&mut OsRng);
        let credential_hash = Argon2::default()
            .hash_password(credential.as_bytes(), &salt)
            .map_err(|e| anyhow!("failed to hash credential: {e}"))?
            .to_string();

        let principal = Principal {
            id: principal_id.to_string(),
            role,
            credential_hash,
            created_at: get_epoch_time_in_ms(),
        };

        let created = self.store.create_principal(&principal)?;
        if !created {
            return Err(AuthError::Conflict(principal_id.to_string()));
        }
        info!(principal_id, role = %role, "registered principal");
        Ok(principal)
    }

    /// Verifies the credential against the stored hash and issues a signed
    /// bearer token. An unknown principal and a wrong credential are
    /// indistinguishable to the caller.
    pub fn login(&self, principal_id: &str, credential: &str) -> Result<BearerToken, AuthError> {
        let invalid =
            || AuthError::Unauthenticated("invalid principal id or credential".to_string());

        let principal = self
            .store
            .get_principal(principal_id)
            .map_err(AuthError::Internal)?
            .ok_or_else(invalid)?;

        let parsed = PasswordHash::new(&principal.credential_hash)
            .map_err(|e| anyhow!("stored credential hash is malformed: {e}"))?;
        Argon2::default()
            .verify_password(credential.as_bytes(), &parsed)
            .map_err(|_| invalid())?;

        let now = get_epoch_time_in_ms() / 1000;
        let claims = Claims {
            sub: principal.id.clone(),
            role: principal.role,
            iat: now,
            exp: now + self.token_ttl.as_secs(),
        };
        let access_token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| anyhow!("failed to sign token: {e}"))?;

        Ok(BearerToken {
            access_token,
            token_type: "bearer",
            expires_in: self.token_ttl.as_secs(),
        })
    }

    /// Rejects expired, malformed, or signature-mismatched tokens.
    pub fn validate(&self, token: &str) -> Result<AuthenticatedPrincipal, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default()).map_err(
            |err| match err.kind() {
                JwtErrorKind::ExpiredSignature => {
                    AuthError::Unauthenticated("token expired".to_string())
                }
                JwtErrorKind::InvalidSignature | JwtErrorKind::ImmatureSignature => {
                    AuthError::Unauthenticated("token signature mismatch".to_string())
                }
                _ => AuthError::Unauthenticated("malformed bearer token".to_string()),
            },
        )?;

        Ok(AuthenticatedPrincipal {
            id: data.claims.sub,
            role: data.claims.role,
        })
    }

    pub fn get_principal(&self, id: &str) -> Result<Principal, AuthError> {
        self.store
            .get_principal(id)
            .map_err(AuthError::Internal)?
            .ok_or_else(|| AuthError::NotFound(id.to_string()))
    }

    /// True before the first registration; used to let the first principal
    /// bootstrap itself into the admin role.
    pub fn no_principals_yet(&self) -> Result<bool, AuthError> {
        Ok(self.store.principal_count().map_err(AuthError::Internal)? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service(ttl: Duration) -> (tempfile::TempDir, AuthService) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::open(dir.path()).unwrap());
        (dir, AuthService::new(store, b"unit-test-signing-key", ttl))
    }

    #[test]
    fn test_register_login_validate_round_trip() {
        let (_dir, auth) = test_service(Duration::from_secs(3600));
        auth.register("alice", "s3cret", Role::User).unwrap();

        let token = auth.login("alice", "s3cret").unwrap();
        assert_eq!(token.token_type, "bearer");

        let principal = auth.validate(&token.access_token).unwrap();
        assert_eq!(principal.id, "alice");
        assert_eq!(principal.role, Role::User);
    }

    #[test]
    fn test_re_register_conflicts() {
        let (_dir, auth) = test_service(Duration::from_secs(3600));
        auth.register("alice", "s3cret", Role::User).unwrap();
        let err = auth.register("alice", "other", Role::Viewer).unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));
    }

    #[test]
    fn test_wrong_credential_rejected() {
        let (_dir, auth) = test_service(Duration::from_secs(3600));
        auth.register("alice", "s3cret", Role::User).unwrap();
        let err = auth.login("alice", "nope").unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated(_)));
        let err = auth.login("bob", "s3cret").unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated(_)));
    }

    #[test]
    fn test_credential_never_stored_in_plaintext() {
        let (_dir, auth) = test_service(Duration::from_secs(3600));
        let principal = auth.register("alice", "hunter2", Role::User).unwrap();
        assert!(principal.credential_hash.starts_with("$argon2"));
        assert!(!principal.credential_hash.contains("hunter2"));
    }

    #[test]
    fn test_expired_token_rejected() {
        let (_dir, auth) = test_service(Duration::from_secs(0));
        auth.register("alice", "s3cret", Role::User).unwrap();
        let token = auth.login("alice", "s3cret").unwrap();
        // Default validation applies 60s of leeway before an expiry counts.
        let mut validation = Validation::default();
        validation.leeway = 0;
        let err = decode::<Claims>(&token.access_token, &auth.decoding_key, &validation)
            .map(|_| ())
            .unwrap_err();
        assert_eq!(*err.kind(), JwtErrorKind::ExpiredSignature);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let (_dir, auth) = test_service(Duration::from_secs(3600));
        auth.register("alice", "s3cret", Role::User).unwrap();
        let token = auth.login("alice", "s3cret").unwrap();
        let mut tampered = token.access_token.clone();
        tampered.push('x');
        assert!(matches!(
            auth.validate(&tampered).unwrap_err(),
            AuthError::Unauthenticated(_)
        ));
    }

    #[test]
    fn test_role_gates() {
        let viewer = AuthenticatedPrincipal {
            id: "v".to_string(),
            role: Role::Viewer,
        };
        assert!(viewer.require_write().is_err());
        assert!(viewer.require_admin().is_err());

        let user = AuthenticatedPrincipal {
            id: "u".to_string(),
            role: Role::User,
        };
        assert!(user.require_write().is_ok());
        assert!(user.require_admin().is_err());

        let admin = AuthenticatedPrincipal {
            id: "a".to_string(),
            role: Role::Admin,
        };
        assert!(admin.require_write().is_ok());
        assert!(admin.require_admin().is_ok());
    }
}
