//! Per-viewer seat selection.
//!
//! A reducer over [`SelectionState`]. Selections are restricted to one table;
//! rejected actions leave the selection untouched and record a user-facing
//! reason. After a conflict the viewer must take a fresh snapshot before
//! selecting again. A refresh that gives up leaves the selection locked until
//! the next attempt, which any select or submit starts.

use crate::booking::BookingRequest;
use crate::sync::SnapshotSource;
use chrono::{DateTime, Utc};
use seatbook_core::effect::Effect;
use seatbook_core::error::EngineError;
use seatbook_core::reducer::{Effects, Reducer};
use seatbook_core::seat_map::SeatMapSnapshot;
use seatbook_core::smallvec;
use seatbook_core::types::{Booking, RestaurantId, Seat, SeatId, TableId};
use seatbook_runtime::{RetryPolicy, retry_if};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Submits a booking on behalf of the viewer's session.
pub trait BookingGateway: Send + Sync {
    /// Propose a booking.
    fn submit(
        &self,
        request: BookingRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Booking, EngineError>> + Send + '_>>;
}

/// Where the selection is in its lifecycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SelectionPhase {
    /// Nothing selected
    #[default]
    Idle,
    /// Seats chosen on one table
    Selecting {
        /// Table all seats belong to
        table_id: TableId,
        /// Seats in the order they were picked
        seats: Vec<SeatId>,
    },
    /// A booking for the selection is in flight
    Submitting {
        /// Table all seats belong to
        table_id: TableId,
        /// Seats being claimed
        seats: Vec<SeatId>,
    },
}

/// Why an action was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// The seat is reserved or occupied
    SeatUnavailable,
    /// The seat is on another table than the current selection
    DifferentTable,
    /// Submit with nothing selected
    NothingSelected,
    /// A conflict happened; the map must be refreshed first
    RefreshRequired,
    /// A submission is already running
    SubmissionInFlight,
}

impl Rejection {
    /// Message shown to the diner.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::SeatUnavailable => "This seat is not available.",
            Self::DifferentTable => "All seats must be at the same table. Clear your selection to pick another table.",
            Self::NothingSelected => "Select at least one seat first.",
            Self::RefreshRequired => "The seat map changed. Please wait for it to refresh before choosing again.",
            Self::SubmissionInFlight => "Your booking is being submitted.",
        }
    }
}

/// Result of the last submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Seats are reserved
    Confirmed(Booking),
    /// Nothing was booked
    Failed(EngineError),
}

/// One viewer's selection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectionState {
    /// Lifecycle phase
    pub phase: SelectionPhase,
    /// Set after a conflict until a fresh snapshot arrives
    pub needs_refresh: bool,
    /// A snapshot refresh is running
    pub refreshing: bool,
    /// Reason the last action was refused, cleared by the next accepted one
    pub last_rejection: Option<Rejection>,
    /// Result of the last submission
    pub last_outcome: Option<SubmissionOutcome>,
}

impl SelectionState {
    /// Selected seats, in pick order.
    #[must_use]
    pub fn selected_seats(&self) -> &[SeatId] {
        match &self.phase {
            SelectionPhase::Idle => &[],
            SelectionPhase::Selecting { seats, .. } | SelectionPhase::Submitting { seats, .. } => {
                seats
            },
        }
    }

    /// Table of the current selection.
    #[must_use]
    pub const fn table(&self) -> Option<TableId> {
        match &self.phase {
            SelectionPhase::Idle => None,
            SelectionPhase::Selecting { table_id, .. }
            | SelectionPhase::Submitting { table_id, .. } => Some(*table_id),
        }
    }

    /// Whether a submission is running.
    #[must_use]
    pub const fn is_submitting(&self) -> bool {
        matches!(self.phase, SelectionPhase::Submitting { .. })
    }
}

/// Selection actions.
#[derive(Clone, Debug)]
pub enum SelectionAction {
    /// Add a seat, as currently seen on the viewer's map
    SelectSeat(Seat),
    /// Remove a seat
    DeselectSeat(SeatId),
    /// Select if not selected, deselect otherwise
    ToggleSeat(Seat),
    /// Drop the whole selection
    Clear,
    /// Book the selection
    Submit {
        /// Restaurant of the table
        restaurant_id: RestaurantId,
        /// Reservation time
        date_time: DateTime<Utc>,
        /// Free-text notes
        special_requests: Option<String>,
    },
    /// The booking was confirmed
    SubmissionSucceeded(Booking),
    /// The booking failed
    SubmissionFailed(EngineError),
    /// Fetch a fresh snapshot unless one is already on its way
    Refresh,
    /// A fresh snapshot has been merged
    SnapshotRefreshed(SeatMapSnapshot),
    /// The refresh gave up; the selection stays locked
    RefreshFailed(EngineError),
}

/// Collaborators of the selection reducer.
#[derive(Clone)]
pub struct SelectionEnvironment {
    /// Booking submission
    pub bookings: Arc<dyn BookingGateway>,
    /// Snapshot refresh after conflicts
    pub snapshots: Arc<dyn SnapshotSource>,
    /// Retries of a failed refresh
    pub retry: RetryPolicy,
}

/// Reducer for [`SelectionState`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectionReducer;

impl SelectionReducer {
    fn reject(state: &mut SelectionState, rejection: Rejection) -> Effects<SelectionAction> {
        tracing::debug!(?rejection, "selection action rejected");
        state.last_rejection = Some(rejection);
        smallvec![Effect::None]
    }

    /// Reject while a refresh is owed, restarting it if none is running.
    fn locked(state: &mut SelectionState, env: &SelectionEnvironment) -> Effects<SelectionAction> {
        let mut effects = Self::reject(state, Rejection::RefreshRequired);
        if !state.refreshing {
            state.refreshing = true;
            effects = smallvec![Self::refresh_effect(env)];
        }
        effects
    }

    fn select(
        state: &mut SelectionState,
        seat: &Seat,
        env: &SelectionEnvironment,
    ) -> Effects<SelectionAction> {
        if state.is_submitting() {
            return Self::reject(state, Rejection::SubmissionInFlight);
        }
        if state.needs_refresh {
            return Self::locked(state, env);
        }
        if !seat.is_available() {
            return Self::reject(state, Rejection::SeatUnavailable);
        }
        if state.table().is_some_and(|table_id| table_id != seat.table_id) {
            return Self::reject(state, Rejection::DifferentTable);
        }
        if let SelectionPhase::Selecting { seats, .. } = &mut state.phase {
            if !seats.contains(&seat.id) {
                seats.push(seat.id);
            }
        } else {
            state.phase = SelectionPhase::Selecting {
                table_id: seat.table_id,
                seats: vec![seat.id],
            };
        }
        state.last_rejection = None;
        smallvec![Effect::None]
    }

    fn deselect(state: &mut SelectionState, seat_id: SeatId) -> Effects<SelectionAction> {
        if state.is_submitting() {
            return Self::reject(state, Rejection::SubmissionInFlight);
        }
        if let SelectionPhase::Selecting { seats, .. } = &mut state.phase {
            seats.retain(|id| *id != seat_id);
            if seats.is_empty() {
                state.phase = SelectionPhase::Idle;
            }
        }
        state.last_rejection = None;
        smallvec![Effect::None]
    }

    fn refresh_effect(env: &SelectionEnvironment) -> Effect<SelectionAction> {
        let snapshots = Arc::clone(&env.snapshots);
        let retry = env.retry.clone();
        Effect::future(async move {
            // a deleted restaurant never comes back
            let refreshed = retry_if(
                &retry,
                || snapshots.refresh(),
                |error| !matches!(error, EngineError::NotFound { .. }),
            )
            .await;
            Some(match refreshed {
                Ok(snapshot) => SelectionAction::SnapshotRefreshed(snapshot),
                Err(error) => SelectionAction::RefreshFailed(error),
            })
        })
    }
}

impl Reducer for SelectionReducer {
    type State = SelectionState;
    type Action = SelectionAction;
    type Environment = SelectionEnvironment;

    fn reduce(
        &self,
        state: &mut SelectionState,
        action: SelectionAction,
        env: &SelectionEnvironment,
    ) -> Effects<SelectionAction> {
        match action {
            SelectionAction::SelectSeat(seat) => Self::select(state, &seat, env),
            SelectionAction::DeselectSeat(seat_id) => Self::deselect(state, seat_id),
            SelectionAction::ToggleSeat(seat) => {
                if state.selected_seats().contains(&seat.id) {
                    Self::deselect(state, seat.id)
                } else {
                    Self::select(state, &seat, env)
                }
            },
            SelectionAction::Clear => {
                if state.is_submitting() {
                    return Self::reject(state, Rejection::SubmissionInFlight);
                }
                state.phase = SelectionPhase::Idle;
                state.last_rejection = None;
                smallvec![Effect::None]
            },
            SelectionAction::Submit {
                restaurant_id,
                date_time,
                special_requests,
            } => {
                let (table_id, seats) = match &state.phase {
                    SelectionPhase::Submitting { .. } => {
                        return Self::reject(state, Rejection::SubmissionInFlight);
                    },
                    SelectionPhase::Idle => return Self::reject(state, Rejection::NothingSelected),
                    SelectionPhase::Selecting { table_id, seats } => (*table_id, seats.clone()),
                };
                if state.needs_refresh {
                    return Self::locked(state, env);
                }

                let request = BookingRequest {
                    restaurant_id,
                    table_id,
                    party_size: u16::try_from(seats.len()).unwrap_or(u16::MAX),
                    seat_ids: seats.clone(),
                    date_time,
                    special_requests,
                    request_id: None,
                };
                state.phase = SelectionPhase::Submitting { table_id, seats };
                state.last_rejection = None;

                let bookings = Arc::clone(&env.bookings);
                smallvec![Effect::future(async move {
                    Some(match bookings.submit(request).await {
                        Ok(booking) => SelectionAction::SubmissionSucceeded(booking),
                        Err(error) => SelectionAction::SubmissionFailed(error),
                    })
                })]
            },
            SelectionAction::SubmissionSucceeded(booking) => {
                state.phase = SelectionPhase::Idle;
                state.last_outcome = Some(SubmissionOutcome::Confirmed(booking));
                smallvec![Effect::None]
            },
            SelectionAction::SubmissionFailed(error) => {
                state.phase = SelectionPhase::Idle;
                let refresh = error.is_conflict() || error.is_transient();
                state.last_outcome = Some(SubmissionOutcome::Failed(error));
                if refresh {
                    state.needs_refresh = true;
                    if state.refreshing {
                        return smallvec![Effect::None];
                    }
                    state.refreshing = true;
                    smallvec![Self::refresh_effect(env)]
                } else {
                    smallvec![Effect::None]
                }
            },
            SelectionAction::Refresh => {
                if state.refreshing {
                    return smallvec![Effect::None];
                }
                state.refreshing = true;
                smallvec![Self::refresh_effect(env)]
            },
            SelectionAction::RefreshFailed(error) => {
                state.refreshing = false;
                tracing::warn!(%error, "seat map refresh failed; selection stays locked");
                smallvec![Effect::None]
            },
            SelectionAction::SnapshotRefreshed(_) => {
                state.needs_refresh = false;
                state.refreshing = false;
                if state.last_rejection == Some(Rejection::RefreshRequired) {
                    state.last_rejection = None;
                }
                smallvec![Effect::None]
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use seatbook_core::types::{SeatNumber, SeatStatus, Version};
    use seatbook_runtime::Store;
    use seatbook_testing::{ReducerTest, assertions};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct NeverCalled;

    impl BookingGateway for NeverCalled {
        fn submit(
            &self,
            _request: BookingRequest,
        ) -> Pin<Box<dyn Future<Output = Result<Booking, EngineError>> + Send + '_>> {
            Box::pin(async { Err(EngineError::StoreUnavailable("not wired".into())) })
        }
    }

    impl SnapshotSource for NeverCalled {
        fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<SeatMapSnapshot, EngineError>> + Send + '_>> {
            Box::pin(async { Err(EngineError::SubscriptionLost("not wired".into())) })
        }
    }

    fn env() -> SelectionEnvironment {
        SelectionEnvironment {
            bookings: Arc::new(NeverCalled),
            snapshots: Arc::new(NeverCalled),
            retry: RetryPolicy::no_retry(),
        }
    }

    fn seat(table_id: TableId, status: SeatStatus) -> Seat {
        Seat {
            id: SeatId::new(),
            table_id,
            seat_number: SeatNumber::new(1),
            status,
            claimed_by: None,
            version: Version::INITIAL,
        }
    }

    fn submit() -> SelectionAction {
        SelectionAction::Submit {
            restaurant_id: RestaurantId::new(),
            date_time: Utc::now(),
            special_requests: None,
        }
    }

    #[test]
    fn seat_on_another_table_is_rejected_and_selection_kept() {
        let a = seat(TableId::new(), SeatStatus::Available);
        let b = seat(TableId::new(), SeatStatus::Available);
        let a_id = a.id;

        ReducerTest::new(SelectionReducer)
            .with_env(env())
            .given_state(SelectionState::default())
            .given_actions([SelectionAction::SelectSeat(a)])
            .when_action(SelectionAction::SelectSeat(b))
            .then_state(move |s| {
                assert_eq!(s.selected_seats(), &[a_id]);
                assert_eq!(s.last_rejection, Some(Rejection::DifferentTable));
                assert!(!Rejection::DifferentTable.message().is_empty());
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn unavailable_seat_cannot_be_selected() {
        ReducerTest::new(SelectionReducer)
            .with_env(env())
            .given_state(SelectionState::default())
            .when_action(SelectionAction::SelectSeat(seat(TableId::new(), SeatStatus::Reserved)))
            .then_state(|s| {
                assert_eq!(s.phase, SelectionPhase::Idle);
                assert_eq!(s.last_rejection, Some(Rejection::SeatUnavailable));
            })
            .run();
    }

    #[test]
    fn deselecting_the_last_seat_returns_to_idle() {
        let table = TableId::new();
        let a = seat(table, SeatStatus::Available);
        let a_id = a.id;

        ReducerTest::new(SelectionReducer)
            .with_env(env())
            .given_state(SelectionState::default())
            .given_actions([SelectionAction::SelectSeat(a.clone()), SelectionAction::ToggleSeat(seat(table, SeatStatus::Available))])
            .when_action(SelectionAction::ToggleSeat(a))
            .then_state(move |s| {
                assert_eq!(s.selected_seats().len(), 1);
                assert!(!s.selected_seats().contains(&a_id));
            })
            .run();

        let b = seat(table, SeatStatus::Available);
        let b_id = b.id;
        ReducerTest::new(SelectionReducer)
            .with_env(env())
            .given_state(SelectionState::default())
            .given_actions([SelectionAction::SelectSeat(b)])
            .when_action(SelectionAction::DeselectSeat(b_id))
            .then_state(|s| assert_eq!(s.phase, SelectionPhase::Idle))
            .run();
    }

    #[test]
    fn submit_with_nothing_selected_is_rejected() {
        ReducerTest::new(SelectionReducer)
            .with_env(env())
            .given_state(SelectionState::default())
            .when_action(submit())
            .then_state(|s| assert_eq!(s.last_rejection, Some(Rejection::NothingSelected)))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn submit_moves_to_submitting_and_starts_the_booking() {
        let a = seat(TableId::new(), SeatStatus::Available);
        ReducerTest::new(SelectionReducer)
            .with_env(env())
            .given_state(SelectionState::default())
            .given_actions([SelectionAction::SelectSeat(a)])
            .when_action(submit())
            .then_state(|s| assert!(s.is_submitting()))
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }

    #[test]
    fn second_submit_while_in_flight_is_rejected() {
        let a = seat(TableId::new(), SeatStatus::Available);
        ReducerTest::new(SelectionReducer)
            .with_env(env())
            .given_state(SelectionState::default())
            .given_actions([SelectionAction::SelectSeat(a), submit()])
            .when_action(submit())
            .then_state(|s| assert_eq!(s.last_rejection, Some(Rejection::SubmissionInFlight)))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn conflict_clears_selection_and_demands_refresh() {
        let table = TableId::new();
        let a = seat(table, SeatStatus::Available);
        let conflict = EngineError::SeatConflict {
            seats: vec![a.id],
            detail: "taken".into(),
        };

        ReducerTest::new(SelectionReducer)
            .with_env(env())
            .given_state(SelectionState::default())
            .given_actions([SelectionAction::SelectSeat(a), submit()])
            .when_action(SelectionAction::SubmissionFailed(conflict))
            .then_state(|s| {
                assert_eq!(s.phase, SelectionPhase::Idle);
                assert!(s.needs_refresh);
                assert!(matches!(
                    s.last_outcome,
                    Some(SubmissionOutcome::Failed(EngineError::SeatConflict { .. }))
                ));
            })
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }

    #[test]
    fn selection_is_locked_until_the_snapshot_is_refreshed() {
        let table = TableId::new();
        let conflict = EngineError::SeatConflict {
            seats: vec![],
            detail: "taken".into(),
        };
        let locked = SelectionState {
            needs_refresh: true,
            last_outcome: Some(SubmissionOutcome::Failed(conflict)),
            ..SelectionState::default()
        };

        ReducerTest::new(SelectionReducer)
            .with_env(env())
            .given_state(locked.clone())
            .when_action(SelectionAction::SelectSeat(seat(table, SeatStatus::Available)))
            .then_state(|s| {
                assert_eq!(s.last_rejection, Some(Rejection::RefreshRequired));
                assert!(s.selected_seats().is_empty());
            })
            .run();

        let snapshot = SeatMapSnapshot::empty(RestaurantId::new(), Utc::now());
        ReducerTest::new(SelectionReducer)
            .with_env(env())
            .given_state(locked)
            .given_actions([SelectionAction::SnapshotRefreshed(snapshot)])
            .when_action(SelectionAction::SelectSeat(seat(table, SeatStatus::Available)))
            .then_state(|s| {
                assert!(!s.needs_refresh);
                assert_eq!(s.selected_seats().len(), 1);
            })
            .run();
    }

    #[test]
    fn validation_failure_does_not_lock_selection() {
        ReducerTest::new(SelectionReducer)
            .with_env(env())
            .given_state(SelectionState::default())
            .when_action(SelectionAction::SubmissionFailed(EngineError::Validation("past".into())))
            .then_state(|s| assert!(!s.needs_refresh))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn failed_refresh_is_restarted_by_the_next_selection() {
        let conflict = EngineError::SeatConflict {
            seats: vec![],
            detail: "taken".into(),
        };
        let refreshing = SelectionState {
            needs_refresh: true,
            refreshing: true,
            last_outcome: Some(SubmissionOutcome::Failed(conflict)),
            ..SelectionState::default()
        };

        ReducerTest::new(SelectionReducer)
            .with_env(env())
            .given_state(refreshing.clone())
            .when_action(SelectionAction::RefreshFailed(EngineError::SubscriptionLost("gone".into())))
            .then_state(|s| {
                assert!(s.needs_refresh);
                assert!(!s.refreshing);
            })
            .then_effects(assertions::assert_no_effects)
            .run();

        ReducerTest::new(SelectionReducer)
            .with_env(env())
            .given_state(refreshing.clone())
            .given_actions([SelectionAction::RefreshFailed(EngineError::SubscriptionLost("gone".into()))])
            .when_action(SelectionAction::SelectSeat(seat(TableId::new(), SeatStatus::Available)))
            .then_state(|s| {
                assert_eq!(s.last_rejection, Some(Rejection::RefreshRequired));
                assert!(s.refreshing);
            })
            .then_effects(assertions::assert_has_future_effect)
            .run();

        ReducerTest::new(SelectionReducer)
            .with_env(env())
            .given_state(refreshing)
            .when_action(SelectionAction::SelectSeat(seat(TableId::new(), SeatStatus::Available)))
            .then_state(|s| assert_eq!(s.last_rejection, Some(Rejection::RefreshRequired)))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    /// Fails its first `failures` refreshes.
    struct FlakySnapshots {
        failures: u32,
        calls: AtomicU32,
    }

    impl SnapshotSource for FlakySnapshots {
        fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<SeatMapSnapshot, EngineError>> + Send + '_>> {
            Box::pin(async move {
                if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                    Err(EngineError::SubscriptionLost("resubscribing".into()))
                } else {
                    Ok(SeatMapSnapshot::empty(RestaurantId::new(), Utc::now()))
                }
            })
        }
    }

    #[tokio::test]
    async fn refresh_is_retried_until_the_selection_unlocks() {
        let snapshots = Arc::new(FlakySnapshots {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let store = Store::new(
            SelectionState::default(),
            SelectionReducer,
            SelectionEnvironment {
                bookings: Arc::new(NeverCalled),
                snapshots: snapshots.clone(),
                retry: RetryPolicy::builder()
                    .max_retries(3)
                    .initial_delay(Duration::from_millis(1))
                    .jitter(0.0)
                    .build(),
            },
        );
        let conflict = EngineError::SeatConflict {
            seats: vec![],
            detail: "taken".into(),
        };

        store.send(SelectionAction::SubmissionFailed(conflict)).await.wait().await;

        let state = store.state(Clone::clone).await;
        assert!(!state.needs_refresh);
        assert!(!state.refreshing);
        assert_eq!(snapshots.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_refresh_unlocks_on_the_next_attempt() {
        let snapshots = Arc::new(FlakySnapshots {
            failures: 1,
            calls: AtomicU32::new(0),
        });
        let store = Store::new(
            SelectionState::default(),
            SelectionReducer,
            SelectionEnvironment {
                bookings: Arc::new(NeverCalled),
                snapshots: snapshots.clone(),
                retry: RetryPolicy::no_retry(),
            },
        );
        let conflict = EngineError::SeatConflict {
            seats: vec![],
            detail: "taken".into(),
        };

        store.send(SelectionAction::SubmissionFailed(conflict)).await.wait().await;
        let locked = store.state(Clone::clone).await;
        assert!(locked.needs_refresh);
        assert!(!locked.refreshing);

        let seat = seat(TableId::new(), SeatStatus::Available);
        store.send(SelectionAction::SelectSeat(seat.clone())).await.wait().await;
        store.send(SelectionAction::SelectSeat(seat.clone())).await.wait().await;

        let state = store.state(Clone::clone).await;
        assert!(!state.needs_refresh);
        assert_eq!(state.selected_seats(), &[seat.id]);
        assert_eq!(snapshots.calls.load(Ordering::SeqCst), 2);
    }
}
