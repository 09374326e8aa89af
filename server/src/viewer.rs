//! A diner's live view of one restaurant.
//!
//! Couples a [`SeatMapSynchronizer`] with a runtime store running the
//! [`SelectionReducer`]. Seats are looked up in the current merged map, so a
//! selection always reflects what the viewer can see.

use crate::booking::{BookingRequest, BookingService};
use crate::selection::{
    BookingGateway, SelectionAction, SelectionEnvironment, SelectionReducer, SelectionState,
};
use crate::sync::{SeatMapSynchronizer, SeatMapView};
use chrono::{DateTime, Utc};
use seatbook_core::error::EngineError;
use seatbook_core::identity::SessionWatch;
use seatbook_core::seat_map::SeatMapSnapshot;
use seatbook_core::types::{Booking, Seat, SeatId};
use seatbook_runtime::{EffectHandle, RetryPolicy, Store};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Submits bookings with whatever session is current at submit time.
#[derive(Clone)]
pub struct SessionBookingGateway {
    service: Arc<BookingService>,
    session: SessionWatch,
}

impl SessionBookingGateway {
    /// Gateway for the holder of `session`.
    #[must_use]
    pub const fn new(service: Arc<BookingService>, session: SessionWatch) -> Self {
        Self { service, session }
    }
}

impl BookingGateway for SessionBookingGateway {
    fn submit(
        &self,
        request: BookingRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Booking, EngineError>> + Send + '_>> {
        Box::pin(async move {
            let session = self.session.current();
            self.service.propose_booking(session.as_ref(), request).await
        })
    }
}

type SelectionStore = Store<SelectionState, SelectionAction, SelectionEnvironment, SelectionReducer>;

/// Live seat map plus the viewer's selection.
pub struct Viewer {
    sync: Arc<SeatMapSynchronizer>,
    selection: SelectionStore,
}

impl Viewer {
    /// Viewer over a running synchronizer.
    #[must_use]
    pub fn new(sync: Arc<SeatMapSynchronizer>, bookings: Arc<dyn BookingGateway>) -> Self {
        let environment = SelectionEnvironment {
            bookings,
            snapshots: sync.clone(),
            retry: RetryPolicy::default(),
        };
        Self {
            sync,
            selection: Store::new(SelectionState::default(), SelectionReducer, environment),
        }
    }

    fn seat(&self, seat_id: SeatId) -> Result<Seat, EngineError> {
        self.sync
            .snapshot()
            .seat(seat_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                entity: "seat",
                id: seat_id.to_string(),
            })
    }

    /// Add a seat to the selection.
    ///
    /// # Errors
    ///
    /// `NotFound` when the seat is not on the viewer's map.
    pub async fn select(&self, seat_id: SeatId) -> Result<EffectHandle, EngineError> {
        let seat = self.seat(seat_id)?;
        Ok(self.selection.send(SelectionAction::SelectSeat(seat)).await)
    }

    /// Remove a seat from the selection.
    pub async fn deselect(&self, seat_id: SeatId) -> EffectHandle {
        self.selection.send(SelectionAction::DeselectSeat(seat_id)).await
    }

    /// Flip a seat in or out of the selection.
    ///
    /// # Errors
    ///
    /// `NotFound` when the seat is not on the viewer's map.
    pub async fn toggle(&self, seat_id: SeatId) -> Result<EffectHandle, EngineError> {
        let seat = self.seat(seat_id)?;
        Ok(self.selection.send(SelectionAction::ToggleSeat(seat)).await)
    }

    /// Fetch a fresh snapshot, unlocking the selection after a conflict.
    pub async fn refresh(&self) -> EffectHandle {
        self.selection.send(SelectionAction::Refresh).await
    }

    /// Drop the selection.
    pub async fn clear(&self) -> EffectHandle {
        self.selection.send(SelectionAction::Clear).await
    }

    /// Book the selected seats. Await the handle to wait for the outcome.
    pub async fn submit(
        &self,
        date_time: DateTime<Utc>,
        special_requests: Option<String>,
    ) -> EffectHandle {
        self.selection
            .send(SelectionAction::Submit {
                restaurant_id: self.sync.restaurant_id(),
                date_time,
                special_requests,
            })
            .await
    }

    /// Current selection state.
    pub async fn selection(&self) -> SelectionState {
        self.selection.state(Clone::clone).await
    }

    /// Current merged seat map.
    #[must_use]
    pub fn seat_map(&self) -> SeatMapSnapshot {
        self.sync.snapshot()
    }

    /// Seat map with its freshness.
    #[must_use]
    pub fn view(&self) -> SeatMapView {
        self.sync.view()
    }

    /// The synchronizer behind this viewer.
    #[must_use]
    pub const fn synchronizer(&self) -> &Arc<SeatMapSynchronizer> {
        &self.sync
    }
}
