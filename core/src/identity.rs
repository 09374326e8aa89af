//! Identity collaborator.
//!
//! Login, signup and role assignment belong to an external identity service.
//! The engine only consumes an opaque [`Session`]: a user id plus a role claim.

use crate::types::{RestaurantId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::watch;

/// Role claim carried by a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Platform administrator; manages every restaurant
    Admin,
    /// Restaurant staff; manages assigned restaurants
    Staff,
    /// Diner
    Diner,
}

impl FromStr for Role {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "staff" | "hotel_admin" => Ok(Self::Staff),
            "diner" | "user" => Ok(Self::Diner),
            other => Err(IdentityError::InvalidClaim(format!("unknown role {other}"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Admin => "admin",
            Self::Staff => "staff",
            Self::Diner => "diner",
        })
    }
}

/// An authenticated actor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Actor id
    pub user_id: UserId,
    /// Role claim
    pub role: Role,
    /// Restaurants a staff member is assigned to
    #[serde(default)]
    pub restaurants: Vec<RestaurantId>,
}

impl Session {
    /// Diner session.
    #[must_use]
    pub const fn diner(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Diner,
            restaurants: Vec::new(),
        }
    }

    /// Staff session assigned to the given restaurants.
    #[must_use]
    pub const fn staff(user_id: UserId, restaurants: Vec<RestaurantId>) -> Self {
        Self {
            user_id,
            role: Role::Staff,
            restaurants,
        }
    }

    /// Admin session.
    #[must_use]
    pub const fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
            restaurants: Vec::new(),
        }
    }

    /// Whether this actor may edit layout and bookings of a restaurant.
    #[must_use]
    pub fn can_manage(&self, restaurant_id: RestaurantId) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Staff => self.restaurants.contains(&restaurant_id),
            Role::Diner => false,
        }
    }
}

/// Errors from the identity collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Identity service could not be reached.
    #[error("identity service unavailable: {0}")]
    Unavailable(String),

    /// A session or configuration entry is malformed.
    #[error("invalid claim: {0}")]
    InvalidClaim(String),
}

/// Boxed future returned by identity methods.
pub type IdentityFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, IdentityError>> + Send + 'a>>;

/// Resolves bearer tokens into sessions.
pub trait IdentityProvider: Send + Sync {
    /// Session for a token, or `None` when the token is unknown or expired.
    ///
    /// # Errors
    ///
    /// [`IdentityError::Unavailable`] when the service cannot answer.
    fn current_session<'a>(&'a self, token: &'a str) -> IdentityFuture<'a, Option<Session>>;
}

/// Client-side holder of the current session with change notification.
#[derive(Clone, Debug)]
pub struct SessionWatch {
    tx: watch::Sender<Option<Session>>,
}

impl SessionWatch {
    /// Start with the given session (or signed out).
    #[must_use]
    pub fn new(initial: Option<Session>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Current session.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    /// Replace the session (sign in, sign out, role change).
    pub fn set(&self, session: Option<Session>) {
        self.tx.send_replace(session);
    }

    /// Receiver notified on every session change.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }
}

impl Default for SessionWatch {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn staff_manage_only_assigned_restaurants() {
        let mine = RestaurantId::new();
        let other = RestaurantId::new();
        let staff = Session::staff(UserId::new(), vec![mine]);
        assert!(staff.can_manage(mine));
        assert!(!staff.can_manage(other));
        assert!(Session::admin(UserId::new()).can_manage(other));
        assert!(!Session::diner(UserId::new()).can_manage(mine));
    }

    #[test]
    fn legacy_role_names_are_accepted() {
        assert_eq!("hotel_admin".parse::<Role>().unwrap(), Role::Staff);
        assert_eq!("user".parse::<Role>().unwrap(), Role::Diner);
        assert!("owner".parse::<Role>().is_err());
    }

    #[tokio::test]
    async fn session_watch_notifies_changes() {
        let watch = SessionWatch::default();
        let mut rx = watch.changes();
        assert!(watch.current().is_none());

        let session = Session::diner(UserId::new());
        watch.set(Some(session.clone()));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref(), Some(&session));
    }
}
