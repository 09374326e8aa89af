//! HTTP request handlers shared by every seatbook deployment.

pub mod health;

pub use health::{health_check, readiness};
