//! Authentication for the Jiangzao backend.
//!
//! Login and signup live in the managed auth backend; this module only
//! validates the access tokens it issues (HS256 JWT) and extracts the
//! caller's identity from a request.

use actix_web::HttpRequest;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Cookie the web frontend stores the access token in (SSR requests).
pub const ACCESS_TOKEN_COOKIE: &str = "jz_access_token";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub id: Uuid,
    pub email: Option<String>,
}

#[derive(Clone)]
pub struct AuthService {
    jwt_secret: String,
}

impl AuthService {
    pub fn new(jwt_secret: String) -> Self {
        Self { jwt_secret }
    }

    /// Decode and validate a bearer token, returning the embedded identity.
    pub fn validate_token(&self, token: &str) -> Result<AuthedUser, AppError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| AppError::Unauthenticated)?;

        let id = Uuid::parse_str(&data.claims.sub).map_err(|_| AppError::Unauthenticated)?;

        Ok(AuthedUser {
            id,
            email: data.claims.email,
        })
    }

    /// Identity of the caller, or None for an anonymous request.
    ///
    /// An invalid or expired token is treated as anonymous rather than
    /// rejected; endpoints that require login call `require_user` instead.
    pub fn current_user(&self, req: &HttpRequest) -> Option<AuthedUser> {
        self.extract_token(req)
            .and_then(|token| self.validate_token(&token).ok())
    }

    /// Identity of the caller, or `Unauthenticated`.
    pub fn require_user(&self, req: &HttpRequest) -> Result<AuthedUser, AppError> {
        let token = self.extract_token(req).ok_or(AppError::Unauthenticated)?;
        self.validate_token(&token)
    }

    fn extract_token(&self, req: &HttpRequest) -> Option<String> {
        if let Some(header) = req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
        {
            return Some(header.to_string());
        }

        req.cookie(ACCESS_TOKEN_COOKIE).map(|c| c.value().to_string())
    }
}

/// Best-effort client IP: first hop of X-Forwarded-For, then X-Real-IP,
/// then the peer address.
pub fn client_ip(req: &HttpRequest) -> String {
    if let Some(forwarded) = req.headers().get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip").and_then(|h| h.to_str().ok()) {
        return real_ip.to_string();
    }

    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
