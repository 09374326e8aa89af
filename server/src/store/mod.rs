//! Seat store backends.
//!
//! [`InMemorySeatStore`] lives here; the `PostgreSQL` backend is the
//! `seatbook-postgres` crate. [`open_store`] picks one from configuration.

pub mod memory;

pub use memory::InMemorySeatStore;

use crate::config::{StorageBackend, StorageConfig};
use seatbook_core::environment::Clock;
use seatbook_core::error::StoreError;
use seatbook_core::store::SeatStore;
use seatbook_postgres::PostgresSeatStore;
use std::sync::Arc;
use std::time::Duration;

/// Open the configured backend, running migrations for `PostgreSQL`.
///
/// # Errors
///
/// `Unavailable` when the database cannot be reached or migrated.
pub async fn open_store(
    config: &StorageConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn SeatStore>, StoreError> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::warn!("using the in-memory seat store; state is lost on restart");
            Ok(Arc::new(InMemorySeatStore::new(clock)))
        },
        StorageBackend::Postgres => {
            let store = PostgresSeatStore::connect(
                &config.database_url,
                config.max_connections,
                Duration::from_secs(config.connect_timeout),
                clock,
            )
            .await?;
            store.migrate().await?;
            tracing::info!("postgres seat store ready");
            Ok(Arc::new(store))
        },
    }
}
