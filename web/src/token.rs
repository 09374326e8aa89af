//! Bearer token parsing.

use axum::http::{HeaderMap, header};

/// Token from an `Authorization: Bearer` header.
///
/// A missing or malformed header yields `None`; resolving the token to a
/// session is the application's job.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_authorization(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn scheme_is_case_insensitive_and_token_trimmed() {
        assert_eq!(
            bearer_token(&with_authorization("Bearer abc123")).as_deref(),
            Some("abc123")
        );
        assert_eq!(
            bearer_token(&with_authorization("bearer  spaced ")).as_deref(),
            Some("spaced")
        );
    }

    #[test]
    fn other_schemes_and_empty_tokens_are_anonymous() {
        assert_eq!(bearer_token(&with_authorization("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&with_authorization("Bearer ")), None);
        assert_eq!(bearer_token(&with_authorization("Bearer")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
