//! `X-User-ID` extraction.
//!
//! Not real authentication — per the scheduler's external contract, the
//! caller's identity is an opaque header value the scheduler never
//! interprets beyond equality and ordering. A production deployment sits
//! this behind a real auth layer that sets the header after verifying a
//! token; that layer is out of scope here.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;

use scheduler_core::UserId;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The caller's identity, extracted from the `X-User-ID` header.
pub struct AuthenticatedUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or((StatusCode::UNAUTHORIZED, "missing X-User-ID header"))?;
        let value = value
            .to_str()
            .map_err(|_| (StatusCode::UNAUTHORIZED, "X-User-ID header is not valid UTF-8"))?;
        if value.is_empty() {
            return Err((StatusCode::UNAUTHORIZED, "X-User-ID header must not be empty"));
        }
        Ok(AuthenticatedUser(UserId::from(value)))
    }
}
