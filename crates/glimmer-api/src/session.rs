//! Cookie sessions. The client holds a random token; the database holds only
//! its SHA-256, mapped to a user id with an expiry.

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::state::{AppState, blocking};

pub const SESSION_COOKIE: &str = "glimmer_session";

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ttl_hours: u64,
    pub secure_cookies: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_hours: 720,
            secure_cookies: false,
        }
    }
}

/// The authenticated caller, resolved from the session cookie. Taking this
/// as a handler argument makes the route require a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionUser {
    pub user_id: i64,
}

impl FromRequestParts<AppState> for SessionUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token_hash = jar
            .get(SESSION_COOKIE)
            .map(|c| hash_token(c.value()))
            .ok_or_else(ApiError::unauthorized)?;

        let user_id = blocking(state, move |s| Ok(s.db.get_session_user_id(&token_hash)?))
            .await?
            .ok_or_else(ApiError::unauthorized)?;

        Ok(SessionUser { user_id })
    }
}

/// Bind a fresh session to `user_id` and return the jar carrying its cookie.
/// A session token already presented in `jar` is revoked.
pub async fn start_session(state: &AppState, jar: CookieJar, user_id: i64) -> Result<CookieJar, ApiError> {
    let token = new_token();
    let token_hash = hash_token(&token);
    let previous = jar.get(SESSION_COOKIE).map(|c| hash_token(c.value()));

    blocking(state, move |s| {
        s.db.create_session(&token_hash, user_id, s.sessions.ttl_hours, previous.as_deref())?;
        Ok(())
    })
    .await?;

    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.sessions.secure_cookies);

    Ok(jar.add(cookie))
}

/// Revoke the presented session, if any, and clear the cookie.
pub async fn end_session(state: &AppState, jar: CookieJar) -> Result<CookieJar, ApiError> {
    if let Some(token_hash) = jar.get(SESSION_COOKIE).map(|c| hash_token(c.value())) {
        blocking(state, move |s| Ok(s.db.delete_session(&token_hash)?)).await?;
    }
    Ok(jar.remove(Cookie::build(SESSION_COOKIE).path("/")))
}

fn new_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
