//! HTTP API handlers.
//!
//! - `restaurants`: restaurant records, seat maps, audits
//! - `tables`: the staff floor-plan editor
//! - `bookings`: the diner booking flow
//! - `live`: WebSocket seat-map stream

pub mod bookings;
pub mod live;
pub mod restaurants;
pub mod tables;
