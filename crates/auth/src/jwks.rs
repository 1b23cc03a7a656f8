//! Identity provider key set cache
//!
//! Keys are fetched on first use and kept in process. A token signed with a
//! key id the cache does not know triggers one refetch (key rotation).

use std::sync::Arc;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use tenantry_workos::{AccessTokenClaims, IdentityProvider};
use tokio::sync::RwLock;

use crate::error::AuthError;

#[derive(Clone)]
pub struct JwksCache {
    provider: Arc<dyn IdentityProvider>,
    keys: Arc<RwLock<Option<JwkSet>>>,
}

impl JwksCache {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            keys: Arc::new(RwLock::new(None)),
        }
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        let set = self.provider.jwks().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to fetch identity provider JWKS");
            AuthError::Internal(format!("jwks fetch failed: {e}"))
        })?;
        *self.keys.write().await = Some(set);
        Ok(())
    }

    async fn cached_key(&self, kid: &str) -> Result<Option<DecodingKey>, AuthError> {
        let guard = self.keys.read().await;
        match guard.as_ref().and_then(|set| set.find(kid)) {
            Some(jwk) => DecodingKey::from_jwk(jwk)
                .map(Some)
                .map_err(|_| AuthError::InvalidToken),
            None => Ok(None),
        }
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(key) = self.cached_key(kid).await? {
            return Ok(key);
        }
        tracing::debug!(kid = %kid, "Unknown key id, refreshing JWKS");
        self.refresh().await?;
        self.cached_key(kid).await?.ok_or(AuthError::InvalidToken)
    }

    /// Verify an RS256 provider access token and return its claims
    pub async fn verify(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::InvalidToken)?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidToken);
        }
        let kid = header.kid.ok_or(AuthError::InvalidToken)?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;

        decode::<AccessTokenClaims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Provider token validation failed");
                AuthError::InvalidToken
            })
    }
}
