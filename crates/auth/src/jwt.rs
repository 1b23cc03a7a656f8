//! Internal token issuance and validation (HS256)

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::claims::{InternalClaims, TokenType};
use crate::config::AuthConfig;
use crate::cookies::TokenPair;
use crate::error::AuthError;

/// Millisecond granularity used for every version comparison
pub fn version_millis(version: DateTime<Utc>) -> i64 {
    version.timestamp_millis()
}

/// Issue a token of `token_type`
pub fn issue_token(
    config: &AuthConfig,
    user_id: Uuid,
    session_id: Option<Uuid>,
    token_type: TokenType,
    version: DateTime<Utc>,
) -> Result<String, AuthError> {
    let claims = InternalClaims {
        user_id,
        session_id,
        token_type,
        exp: (Utc::now() + token_type.ttl()).timestamp(),
        version: version_millis(version),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AuthError::Internal(format!("failed to sign token: {e}")))
}

/// Issue the access + refresh pair for a session
pub fn issue_session_tokens(
    config: &AuthConfig,
    user_id: Uuid,
    session_id: Uuid,
    version: DateTime<Utc>,
) -> Result<TokenPair, AuthError> {
    Ok(TokenPair {
        access_token: issue_token(config, user_id, Some(session_id), TokenType::Auth, version)?,
        refresh_token: issue_token(
            config,
            user_id,
            Some(session_id),
            TokenType::Refresh,
            version,
        )?,
    })
}

/// Validate signature, expiry and purpose of an internal token
pub fn validate_token(
    token: &str,
    config: &AuthConfig,
    expected: TokenType,
) -> Result<InternalClaims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;
    validation.leeway = 0;

    let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

    let token_data = decode::<InternalClaims>(token, &decoding_key, &validation).map_err(|e| {
        tracing::debug!(error = %e, "Internal token validation failed");
        AuthError::InvalidToken
    })?;

    if token_data.claims.token_type != expected {
        tracing::debug!(
            expected = ?expected,
            actual = ?token_data.claims.token_type,
            "Token type mismatch"
        );
        return Err(AuthError::InvalidToken);
    }

    Ok(token_data.claims)
}

/// Signing algorithm named in the token header
pub fn token_algorithm(token: &str) -> Result<Algorithm, AuthError> {
    jsonwebtoken::decode_header(token)
        .map(|h| h.alg)
        .map_err(|_| AuthError::InvalidToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test_secret".to_string(),
            app_url: "http://localhost:3000".to_string(),
        }
    }

    #[test]
    fn test_issue_and_validate_round_trip() {
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let version = Utc::now();
        let pair = issue_session_tokens(&config(), user_id, session_id, version).unwrap();

        let claims = validate_token(&pair.access_token, &config(), TokenType::Auth).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.session_id, Some(session_id));
        assert_eq!(claims.version, version.timestamp_millis());

        let refresh = validate_token(&pair.refresh_token, &config(), TokenType::Refresh).unwrap();
        assert!(refresh.exp > claims.exp);
    }

    #[test]
    fn test_wrong_type_rejected() {
        let pair = issue_session_tokens(&config(), Uuid::new_v4(), Uuid::new_v4(), Utc::now())
            .unwrap();
        assert_eq!(
            validate_token(&pair.refresh_token, &config(), TokenType::Auth),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token =
            issue_token(&config(), Uuid::new_v4(), None, TokenType::ResetPassword, Utc::now())
                .unwrap();
        let other = AuthConfig {
            jwt_secret: "other".to_string(),
            ..config()
        };
        assert_eq!(
            validate_token(&token, &other, TokenType::ResetPassword),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_expired_token_rejected() {
        let claims = InternalClaims {
            user_id: Uuid::new_v4(),
            session_id: None,
            token_type: TokenType::Auth,
            exp: Utc::now().timestamp() - 10,
            version: 0,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test_secret"),
        )
        .unwrap();
        assert_eq!(
            validate_token(&token, &config(), TokenType::Auth),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_token_algorithm() {
        let token =
            issue_token(&config(), Uuid::new_v4(), None, TokenType::Auth, Utc::now()).unwrap();
        assert_eq!(token_algorithm(&token), Ok(Algorithm::HS256));
        assert_eq!(token_algorithm("garbage"), Err(AuthError::InvalidToken));
    }
}
