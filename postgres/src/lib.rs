//! `PostgreSQL` seat store for the seatbook reservation engine.
//!
//! [`PostgresSeatStore`] implements [`seatbook_core::store::SeatStore`] on top
//! of a sqlx connection pool. Each mutation is one transaction: the rows it
//! reads are locked before their versions are compared, so two bookings
//! racing for a seat serialise on the seat row and exactly one commits.
//!
//! # Example
//!
//! ```ignore
//! use seatbook_postgres::PostgresSeatStore;
//!
//! let store = PostgresSeatStore::connect(&url, 10, Duration::from_secs(5), clock).await?;
//! store.migrate().await?;
//! let snapshot = store.get_seat_map(restaurant_id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;
mod store;

pub use store::PostgresSeatStore;
