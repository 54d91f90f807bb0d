//! Authentication middleware and JWT verification
//!
//! Identity comes from an external auth provider that signs HS256 tokens
//! with a shared secret; the server only verifies them.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by the identity provider's token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (participant ID)
    pub sub: Uuid,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Display name, if the provider sets one
    #[serde(default)]
    pub name: Option<String>,
}

impl JwtClaims {
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => format!("Player_{}", &self.sub.simple().to_string()[..8]),
        }
    }
}

/// Verify a JWT token and extract claims
pub fn verify_jwt(token: &str, secret: &str) -> Result<JwtClaims, AuthError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidToken);
    };

    // Verify signature (HMAC-SHA256)
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());

    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    mac.verify_slice(&provided_signature)
        .map_err(|_| AuthError::InvalidToken)?;

    // Decode payload
    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    let claims: JwtClaims = serde_json::from_slice(&payload_json).map_err(|_| AuthError::InvalidToken)?;

    if claims.exp < crate::util::time::unix_millis() / 1000 {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

/// Extract JWT from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,

    #[error("Invalid authorization header format")]
    InvalidFormat,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::InvalidFormat => StatusCode::BAD_REQUEST,
            AuthError::MissingHeader | AuthError::InvalidToken | AuthError::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }
        };

        (status, self.to_string()).into_response()
    }
}

/// Authenticated user extractor result
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub claims: JwtClaims,
}

/// Middleware to require authentication
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingHeader)?;

    let token = extract_bearer_token(auth_header).ok_or(AuthError::InvalidFormat)?;

    let claims = verify_jwt(token, &state.config.jwt_secret)?;

    let auth_user = AuthenticatedUser {
        user_id: claims.sub,
        claims,
    };

    // Insert into request extensions for handlers to access
    request.extensions_mut().insert(auth_user);

    Ok(next.run(request).await)
}
