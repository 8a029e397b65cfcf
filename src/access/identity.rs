//! Request identity: an authenticated user id or an anonymous cookie id.
//!
//! Exactly one applies per request; the anonymous id is only consulted when
//! no authenticated user is present.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::HttpRequest;
use uuid::Uuid;

pub const ANON_COOKIE_NAME: &str = "jz_anon_id";
pub const ANON_COOKIE_MAX_AGE_SECONDS: i64 = 60 * 60 * 24 * 180; // 180 days

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User(Uuid),
    Anonymous(String),
}

#[derive(Debug, Clone)]
pub struct AnonIdentity {
    pub anon_id: String,
    pub is_new: bool,
}

/// Existing anonymous id from the request cookie, or a freshly minted one.
/// Never overwrites an id the visitor already presented.
pub fn resolve_anon_id(req: &HttpRequest) -> AnonIdentity {
    match req.cookie(ANON_COOKIE_NAME) {
        Some(cookie) if !cookie.value().is_empty() => AnonIdentity {
            anon_id: cookie.value().to_string(),
            is_new: false,
        },
        _ => AnonIdentity {
            anon_id: Uuid::new_v4().to_string(),
            is_new: true,
        },
    }
}

/// Long-lived opaque id cookie. `secure` is set in production only so local
/// development over plain HTTP keeps working.
pub fn anon_cookie(anon_id: &str, secure: bool) -> Cookie<'static> {
    Cookie::build(ANON_COOKIE_NAME, anon_id.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(CookieDuration::seconds(ANON_COOKIE_MAX_AGE_SECONDS))
        .finish()
}
