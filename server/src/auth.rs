//! Session extraction for HTTP handlers.
//!
//! Handlers take a [`CurrentSession`] and pass `session.as_ref()` to the
//! engine, which decides whether the operation needs one. An absent or
//! unknown bearer token yields an anonymous request, not a rejection.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, request::Parts},
};
use seatbook_core::identity::{IdentityError, IdentityProvider, Session};
use seatbook_web::{AppError, bearer_token};
use std::sync::Arc;

/// Session resolved from the `Authorization` header.
#[derive(Debug, Clone, Default)]
pub struct CurrentSession(pub Option<Session>);

impl CurrentSession {
    /// Borrow the session, if any.
    #[must_use]
    pub const fn as_ref(&self) -> Option<&Session> {
        self.0.as_ref()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    Arc<dyn IdentityProvider>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers) else {
            return Ok(Self(None));
        };
        let identity = Arc::<dyn IdentityProvider>::from_ref(state);
        match identity.current_session(&token).await {
            Ok(session) => {
                if session.is_none() {
                    tracing::debug!("bearer token not recognised");
                }
                Ok(Self(session))
            },
            Err(IdentityError::Unavailable(detail)) => Err(AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                format!("identity service unavailable: {detail}"),
                "IDENTITY_UNAVAILABLE",
            )),
            Err(IdentityError::InvalidClaim(detail)) => Err(AppError::unauthorized(detail)),
        }
    }
}
