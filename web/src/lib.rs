//! Axum integration for the seatbook reservation engine.
//!
//! The imperative shell around the engine's services:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Imperative Shell (Axum)         │  ← HTTP, JSON, WebSocket
//! │  - Request parsing, bearer tokens       │  ← CORS, tracing
//! │  - Error → status mapping               │  ← Correlation ids, metrics
//! ├─────────────────────────────────────────┤
//! │         Engine                          │
//! │  - Booking transaction, staff console   │
//! │  - Seat store, change feed              │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at an Axum handler
//! 2. **Extract** the bearer token and JSON body
//! 3. **Resolve** the session and call the engine service
//! 4. **Map** the result (or [`AppError`]) to an HTTP response

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod token;

pub use error::AppError;
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use token::bearer_token;
