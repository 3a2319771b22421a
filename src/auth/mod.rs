//! Bearer-token tenant identity
//!
//! Dashboard routes require an HS256 token whose claims name the tenant.
//! Tokens are minted by `beacon-admin token`; the server only verifies them.

use axum::{
    extract::Request,
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::config::AuthConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantClaims {
    pub tenant_id: String,
    pub email: String,
    /// Expiry as seconds since the epoch
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    expiration_hours: i64,
}

impl AuthService {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            expiration_hours: config.jwt_expiration_hours,
        }
    }

    /// Mint a token for `tenant_id` valid for the configured lifetime
    pub fn issue_token(&self, tenant_id: &str, email: &str) -> Result<String, AuthError> {
        let claims = TenantClaims {
            tenant_id: tenant_id.to_string(),
            email: email.to_string(),
            exp: (Utc::now() + Duration::hours(self.expiration_hours)).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?)
    }

    pub fn verify(&self, token: &str) -> Result<TenantClaims, AuthError> {
        let data = decode::<TenantClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    /// Claims of the `Authorization: Bearer` token in `headers`
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<TenantClaims, AuthError> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        self.verify(token)
    }
}

/// Rejects requests without a valid token; on success the claims are
/// available to handlers as `Extension<TenantClaims>`
pub async fn auth_middleware(
    auth_service: Arc<AuthService>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    match auth_service.authenticate(&headers) {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => {
            debug!(error = %e, "Rejected unauthenticated request");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Invalid or missing bearer token" })),
            )
                .into_response()
        }
    }
}
