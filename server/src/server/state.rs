//! Application state for the HTTP server.
//!
//! Holds the shared services every handler needs:
//! - Seat store (reads, readiness)
//! - Change feed (WebSocket subscriptions)
//! - Booking service and staff console (writes)
//! - Identity provider (bearer tokens)

use crate::booking::{BookingRules, BookingService};
use crate::config::Config;
use crate::feed::ChangePublisher;
use crate::staff::StaffConsole;
use crate::sweeper::ReservationSweeper;
use axum::extract::FromRef;
use seatbook_core::change_feed::ChangeFeed;
use seatbook_core::environment::Clock;
use seatbook_core::identity::IdentityProvider;
use seatbook_core::store::SeatStore;
use seatbook_runtime::RetryPolicy;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned (cheaply via `Arc`) for each request.
#[derive(Clone)]
pub struct AppState {
    /// Authoritative storage
    pub store: Arc<dyn SeatStore>,
    /// Change-feed transport live connections subscribe to
    pub feed: Arc<dyn ChangeFeed>,
    /// Diner booking operations
    pub bookings: Arc<BookingService>,
    /// Staff layout and administration operations
    pub staff: Arc<StaffConsole>,
    /// Releases seats of elapsed bookings
    pub sweeper: Arc<ReservationSweeper>,
    /// Bearer token resolution
    pub identity: Arc<dyn IdentityProvider>,
    /// Backoff used by live connections to recover a lost subscription
    pub sync_policy: RetryPolicy,
}

impl AppState {
    /// Wire the services over a store, feed and identity provider.
    #[must_use]
    pub fn new(
        config: &Config,
        store: Arc<dyn SeatStore>,
        feed: Arc<dyn ChangeFeed>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let publisher = ChangePublisher::new(
            Arc::clone(&feed),
            RetryPolicy::builder()
                .max_retries(config.feed.publish_retries)
                .build(),
        );
        let booking_retry = RetryPolicy::builder()
            .max_retries(config.booking.max_retries)
            .initial_delay(config.booking.retry_initial_delay())
            .build();
        let bookings = BookingService::new(
            Arc::clone(&store),
            publisher.clone(),
            Arc::clone(&clock),
            BookingRules {
                slot_length: config.booking.slot_length(),
                max_party_size: config.booking.max_party_size,
                retry: booking_retry.clone(),
            },
        );
        let staff = StaffConsole::new(Arc::clone(&store), publisher.clone(), Arc::clone(&clock));
        let sweeper = ReservationSweeper::new(Arc::clone(&store), publisher, clock);

        Self {
            store,
            feed,
            bookings: Arc::new(bookings),
            staff: Arc::new(staff),
            sweeper: Arc::new(sweeper),
            identity,
            sync_policy: booking_retry,
        }
    }
}

impl FromRef<AppState> for Arc<dyn SeatStore> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.store)
    }
}

impl FromRef<AppState> for Arc<dyn IdentityProvider> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.identity)
    }
}
