use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::types::Identity;

/// Claims issued by the authentication service. Only verified here.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessClaims {
    pub sub: String,
    pub role_id: String,
    pub exp: usize,
    pub iat: usize,
}

pub fn verify_jwt(token: &str, secret: &str) -> Result<Identity, AuthError> {
    let data = decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "token rejected");
        AuthError::Unauthenticated
    })?;
    if data.claims.sub.is_empty() {
        return Err(AuthError::Unauthenticated);
    }
    Ok(Identity {
        user_id: data.claims.sub,
        role_id: data.claims.role_id,
    })
}

/// Token from an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
