//! Token-table identity provider.
//!
//! Stands in for the external identity service in single-node deployments.
//! Sessions are configured as `;`-separated entries of the form
//! `token:user-id:role[:restaurant-id,restaurant-id]`.

use seatbook_core::identity::{IdentityError, IdentityFuture, IdentityProvider, Role, Session};
use seatbook_core::types::{RestaurantId, UserId};
use std::collections::HashMap;

/// Resolves bearer tokens from a fixed table.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenIdentity {
    sessions: HashMap<String, Session>,
}

impl StaticTokenIdentity {
    /// Parse a token table.
    ///
    /// # Errors
    ///
    /// [`IdentityError::InvalidClaim`] naming the malformed entry.
    pub fn parse(table: &str) -> Result<Self, IdentityError> {
        let mut sessions = HashMap::new();
        for entry in table.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (token, session) = parse_entry(entry)?;
            if sessions.insert(token.to_string(), session).is_some() {
                return Err(IdentityError::InvalidClaim(format!("token {token} listed twice")));
            }
        }
        tracing::info!(tokens = sessions.len(), "static identity table loaded");
        Ok(Self { sessions })
    }

    /// Number of configured tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no tokens are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn parse_entry(entry: &str) -> Result<(&str, Session), IdentityError> {
    let invalid = |reason: &str| IdentityError::InvalidClaim(format!("{reason} in entry '{entry}'"));

    let mut parts = entry.split(':');
    let token = parts.next().filter(|t| !t.is_empty()).ok_or_else(|| invalid("missing token"))?;
    let user_id = parts
        .next()
        .ok_or_else(|| invalid("missing user id"))?
        .parse::<UserId>()
        .map_err(|_| invalid("malformed user id"))?;
    let role = parts.next().ok_or_else(|| invalid("missing role"))?.parse::<Role>()?;
    let restaurants = match parts.next() {
        Some(list) => list
            .split(',')
            .filter(|id| !id.is_empty())
            .map(|id| id.parse::<RestaurantId>().map_err(|_| invalid("malformed restaurant id")))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    if parts.next().is_some() {
        return Err(invalid("too many fields"));
    }

    Ok((
        token,
        Session {
            user_id,
            role,
            restaurants,
        },
    ))
}

impl IdentityProvider for StaticTokenIdentity {
    fn current_session<'a>(&'a self, token: &'a str) -> IdentityFuture<'a, Option<Session>> {
        Box::pin(async move { Ok(self.sessions.get(token).cloned()) })
    }
}
