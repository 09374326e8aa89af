//! Seatbook - conflict-safe seat reservations with live seat maps
//!
//! Diners pick individual seats at a table from a live seat map and book
//! them; staff edit the floor plan while diners watch. Any number of viewers
//! may contend for the same seats and at most one booking ever holds a seat.
//!
//! # Architecture
//!
//! ```text
//!  Viewer (selection reducer)        Staff console
//!        │  propose_booking                │  layout edits
//!        ▼                                 ▼
//! ┌──────────────────┐            ┌──────────────────┐
//! │  BookingService  │            │   StaffConsole   │
//! └──────────────────┘            └──────────────────┘
//!        │   one Mutation per operation    │
//!        └──────────────┬──────────────────┘
//!                       ▼
//!              ┌─────────────────┐
//!              │    SeatStore    │  versions checked and committed atomically
//!              └─────────────────┘
//!                       │ committed changes
//!                       ▼
//!              ┌─────────────────┐
//!              │   Change feed   │  restaurant.{id}.seats
//!              └─────────────────┘
//!                       │
//!                       ▼
//!            SeatMapSynchronizer / WebSocket
//!            (merge by entity version, resync on loss)
//! ```
//!
//! # Key Features
//!
//! ## 1. All-or-nothing booking
//!
//! [`BookingService::propose_booking`] reads the requested seats with their
//! versions and submits a single claim. The store re-checks every version
//! and either reserves all seats, creates the booking and links them, or
//! writes nothing and names the contested seats.
//!
//! ## 2. Live seat maps
//!
//! [`SeatMapSynchronizer`] subscribes before it reads, merges change events
//! by per-entity version (so duplicates and reordering are harmless) and
//! falls back to a fresh snapshot when the subscription is lost.
//! [`ReservationSweeper`] frees the seats of finished bookings at a new
//! version so they reach every live map.
//!
//! ## 3. Optimistic viewer
//!
//! [`viewer::Viewer`] runs the selection state machine: local toggles on one
//! table, a forced refresh after a conflict and one submission at a time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod auth;
pub mod booking;
pub mod config;
pub mod feed;
pub mod identity;
pub mod selection;
pub mod server;
pub mod staff;
pub mod store;
pub mod sweeper;
pub mod sync;
pub mod viewer;

pub use booking::{BookingRequest, BookingRules, BookingService};
pub use config::Config;
pub use feed::{ChangePublisher, InMemoryChangeFeed};
pub use identity::StaticTokenIdentity;
pub use server::{AppState, build_router};
pub use staff::{LayoutEdit, StaffConsole, TableSpec};
pub use store::{InMemorySeatStore, open_store};
pub use sweeper::ReservationSweeper;
pub use sync::{SeatMap, SeatMapSynchronizer, SeatMapView, SyncStatus};
