//! Client seat-map synchronizer.
//!
//! [`SeatMap`] is the pure merge core: it holds one viewer's copy of a
//! restaurant's tables and seats and folds change events into it by entity
//! version, so duplicates, replays and reordering across entities all land on
//! the same state.
//!
//! [`SeatMapSynchronizer`] drives a [`SeatMap`] from a [`ChangeFeed`]
//! subscription. It subscribes before pulling the snapshot so nothing committed
//! in between is missed, and on subscription loss it re-subscribes and
//! re-pulls before resuming incremental merges. It stops once the restaurant
//! no longer exists.

use futures::StreamExt;
use seatbook_core::change::{ChangeEvent, EntityChange, seat_topic};
use seatbook_core::change_feed::{ChangeFeed, ChangeStream, FeedError};
use seatbook_core::error::EngineError;
use seatbook_core::seat_map::{SeatMapSnapshot, TableView};
use seatbook_core::store::SeatStore;
use seatbook_core::types::{RestaurantId, Seat, SeatId, SeatStatus, Table, TableId, Version};
use seatbook_runtime::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

// ============================================================================
// Merge core
// ============================================================================

/// One viewer's copy of a restaurant's seat map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeatMap {
    restaurant_id: RestaurantId,
    tables: HashMap<TableId, Table>,
    seats: HashMap<SeatId, Seat>,
    /// Version at which a table was removed; older events for it are ignored.
    tombstones: HashMap<TableId, Version>,
    taken_at: chrono::DateTime<chrono::Utc>,
}

impl SeatMap {
    /// Map initialised from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &SeatMapSnapshot) -> Self {
        let mut map = Self {
            restaurant_id: snapshot.restaurant_id,
            tables: HashMap::new(),
            seats: HashMap::new(),
            tombstones: HashMap::new(),
            taken_at: snapshot.taken_at,
        };
        map.reset(snapshot);
        map
    }

    /// Replace the contents with an authoritative snapshot.
    ///
    /// Tombstones survive so that events older than a removal stay ignored.
    pub fn reset(&mut self, snapshot: &SeatMapSnapshot) {
        self.tables.clear();
        self.seats.clear();
        for view in &snapshot.tables {
            self.tombstones.remove(&view.table.id);
            self.tables.insert(view.table.id, view.table.clone());
            for seat in &view.seats {
                self.seats.insert(seat.id, seat.clone());
            }
        }
        self.taken_at = snapshot.taken_at;
    }

    /// Fold one change event in.
    ///
    /// Returns the number of entity changes that were newer than the local
    /// state and therefore applied.
    pub fn apply(&mut self, event: &ChangeEvent) -> usize {
        if event.restaurant_id != self.restaurant_id {
            return 0;
        }
        let applied = event
            .changes
            .iter()
            .filter(|change| self.apply_change(change))
            .count();
        if applied > 0 && event.committed_at > self.taken_at {
            self.taken_at = event.committed_at;
        }
        applied
    }

    fn removed_at_or_after(&self, table_id: TableId, version: Version) -> bool {
        self.tombstones.get(&table_id).is_some_and(|removed| *removed >= version)
    }

    fn apply_change(&mut self, change: &EntityChange) -> bool {
        match change {
            EntityChange::Seat {
                seat_id,
                table_id,
                seat_number,
                status,
                version,
            } => {
                if self.tombstones.contains_key(table_id) {
                    return false;
                }
                if self.seats.get(seat_id).is_some_and(|s| s.version >= *version) {
                    return false;
                }
                self.seats.insert(
                    *seat_id,
                    Seat {
                        id: *seat_id,
                        table_id: *table_id,
                        seat_number: *seat_number,
                        status: *status,
                        claimed_by: None,
                        version: *version,
                    },
                );
                true
            },
            EntityChange::Table {
                table_id,
                table_number,
                capacity,
                status,
                position,
                version,
            } => {
                if self.removed_at_or_after(*table_id, *version)
                    || self.tables.get(table_id).is_some_and(|t| t.version >= *version)
                {
                    return false;
                }
                self.tables.insert(
                    *table_id,
                    Table {
                        id: *table_id,
                        restaurant_id: self.restaurant_id,
                        table_number: *table_number,
                        capacity: *capacity,
                        status: *status,
                        position: *position,
                        version: *version,
                    },
                );
                true
            },
            EntityChange::TableRemoved { table_id, version } => {
                if self.removed_at_or_after(*table_id, *version)
                    || self.tables.get(table_id).is_some_and(|t| t.version >= *version)
                {
                    return false;
                }
                self.tables.remove(table_id);
                self.seats.retain(|_, seat| seat.table_id != *table_id);
                self.tombstones.insert(*table_id, *version);
                true
            },
        }
    }

    /// Restaurant this map belongs to.
    #[must_use]
    pub const fn restaurant_id(&self) -> RestaurantId {
        self.restaurant_id
    }

    /// Local copy of a seat.
    #[must_use]
    pub fn seat(&self, seat_id: SeatId) -> Option<&Seat> {
        self.seats.get(&seat_id)
    }

    /// Status of a seat, if known.
    #[must_use]
    pub fn seat_status(&self, seat_id: SeatId) -> Option<SeatStatus> {
        self.seat(seat_id).map(|s| s.status)
    }

    /// Ordered snapshot of the current contents.
    ///
    /// Seats whose table is not known yet are left out until it arrives.
    #[must_use]
    pub fn to_snapshot(&self) -> SeatMapSnapshot {
        let mut tables: Vec<TableView> = self
            .tables
            .values()
            .map(|table| {
                let mut seats: Vec<Seat> = self
                    .seats
                    .values()
                    .filter(|s| s.table_id == table.id)
                    .cloned()
                    .collect();
                seats.sort_by_key(|s| s.seat_number);
                TableView {
                    table: table.clone(),
                    seats,
                }
            })
            .collect();
        tables.sort_by_key(|t| t.table.table_number);
        SeatMapSnapshot {
            restaurant_id: self.restaurant_id,
            tables,
            taken_at: self.taken_at,
        }
    }
}

// ============================================================================
// Synchronizer
// ============================================================================

/// Freshness of a viewer's map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Subscribed and merging events
    Live,
    /// Subscription lost; reconciling
    Stale,
    /// The restaurant was deleted; the map stays empty
    Closed,
}

/// What a viewer currently sees.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeatMapView {
    /// The merged map
    pub snapshot: SeatMapSnapshot,
    /// Freshness
    pub status: SyncStatus,
    /// Completed snapshot pulls, the initial one included
    pub reconciliations: u64,
    /// Events that changed the map
    pub events_applied: u64,
}

/// Source of fresh snapshots for a viewer.
pub trait SnapshotSource: Send + Sync {
    /// Re-pull the snapshot and return it once merged.
    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<SeatMapSnapshot, EngineError>> + Send + '_>>;
}

/// Keeps a [`SeatMap`] in step with the store through the change feed.
///
/// The background task stops when the synchronizer is dropped.
pub struct SeatMapSynchronizer {
    restaurant_id: RestaurantId,
    view: watch::Receiver<SeatMapView>,
    resync: Arc<Notify>,
    task: JoinHandle<()>,
}

/// How long [`SnapshotSource::refresh`] waits for a reconciliation.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

impl SeatMapSynchronizer {
    /// Subscribe, pull the first snapshot and start merging.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown restaurant, `StoreUnavailable` or
    /// `SubscriptionLost` when the first pull or subscribe fails.
    #[tracing::instrument(skip(store, feed, policy))]
    pub async fn start(
        restaurant_id: RestaurantId,
        store: Arc<dyn SeatStore>,
        feed: Arc<dyn ChangeFeed>,
        policy: RetryPolicy,
    ) -> Result<Self, EngineError> {
        let topic = seat_topic(restaurant_id);
        let stream = feed
            .subscribe(&topic)
            .await
            .map_err(|e| EngineError::SubscriptionLost(e.to_string()))?;
        let snapshot = store.get_seat_map(restaurant_id).await?;

        let map = SeatMap::from_snapshot(&snapshot);
        let (tx, view) = watch::channel(SeatMapView {
            snapshot,
            status: SyncStatus::Live,
            reconciliations: 1,
            events_applied: 0,
        });
        let resync = Arc::new(Notify::new());

        let worker = Worker {
            topic,
            store,
            feed,
            policy,
            map,
            tx,
            resync: Arc::clone(&resync),
        };
        let task = tokio::spawn(worker.run(stream));
        tracing::debug!(%restaurant_id, "seat map synchronizer started");

        Ok(Self {
            restaurant_id,
            view,
            resync,
            task,
        })
    }

    /// Restaurant being watched.
    #[must_use]
    pub const fn restaurant_id(&self) -> RestaurantId {
        self.restaurant_id
    }

    /// Current view.
    #[must_use]
    pub fn view(&self) -> SeatMapView {
        self.view.borrow().clone()
    }

    /// Current merged snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SeatMapSnapshot {
        self.view.borrow().snapshot.clone()
    }

    /// Receiver notified on every view change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SeatMapView> {
        self.view.clone()
    }

    /// Ask for a full re-subscribe and snapshot pull.
    pub fn request_resync(&self) {
        self.resync.notify_one();
    }

    /// Wait until the view satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// `SubscriptionLost` when `timeout` elapses or the synchronizer stopped.
    pub async fn wait_until<F>(&self, timeout: Duration, predicate: F) -> Result<SeatMapView, EngineError>
    where
        F: FnMut(&SeatMapView) -> bool,
    {
        let mut rx = self.view.clone();
        match tokio::time::timeout(timeout, rx.wait_for(predicate)).await {
            Ok(Ok(view)) => Ok(view.clone()),
            Ok(Err(_)) => Err(EngineError::SubscriptionLost("synchronizer stopped".into())),
            Err(_) => Err(EngineError::SubscriptionLost(format!(
                "seat map did not reach the expected state within {timeout:?}"
            ))),
        }
    }
}

impl SnapshotSource for SeatMapSynchronizer {
    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<SeatMapSnapshot, EngineError>> + Send + '_>> {
        Box::pin(async move {
            let before = self.view.borrow().reconciliations;
            self.request_resync();
            let view = self
                .wait_until(REFRESH_TIMEOUT, |v| {
                    v.status == SyncStatus::Closed
                        || (v.reconciliations > before && v.status == SyncStatus::Live)
                })
                .await?;
            if view.status == SyncStatus::Closed {
                return Err(EngineError::NotFound {
                    entity: "restaurant",
                    id: self.restaurant_id.to_string(),
                });
            }
            Ok(view.snapshot)
        })
    }
}

impl Drop for SeatMapSynchronizer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Worker {
    topic: String,
    store: Arc<dyn SeatStore>,
    feed: Arc<dyn ChangeFeed>,
    policy: RetryPolicy,
    map: SeatMap,
    tx: watch::Sender<SeatMapView>,
    resync: Arc<Notify>,
}

impl Worker {
    async fn run(mut self, mut stream: ChangeStream) {
        loop {
            let reconcile = tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        self.merge(&event);
                        false
                    },
                    Some(Err(FeedError::Lagged(missed))) => {
                        tracing::warn!(topic = %self.topic, missed, "change feed lagged; reconciling");
                        true
                    },
                    Some(Err(error)) => {
                        tracing::warn!(topic = %self.topic, %error, "change feed error; reconciling");
                        true
                    },
                    None => {
                        tracing::warn!(topic = %self.topic, "change feed closed; reconciling");
                        true
                    },
                },
                () = self.resync.notified() => true,
            };
            if reconcile {
                match self.reconcile().await {
                    Some(next) => stream = next,
                    None => return,
                }
            }
        }
    }

    fn merge(&mut self, event: &ChangeEvent) {
        let applied = self.map.apply(event);
        if applied == 0 {
            return;
        }
        let snapshot = self.map.to_snapshot();
        self.tx.send_modify(|view| {
            view.snapshot = snapshot;
            view.events_applied += 1;
        });
    }

    /// Re-subscribe, then re-pull, retrying until both succeed.
    ///
    /// Returns `None` once the restaurant is gone; the view is then empty and
    /// [`SyncStatus::Closed`].
    async fn reconcile(&mut self) -> Option<ChangeStream> {
        self.tx.send_modify(|view| view.status = SyncStatus::Stale);
        metrics::counter!("seatbook.sync.reconciliations").increment(1);

        let mut attempt = 0;
        loop {
            match self.pull().await {
                Ok((stream, snapshot)) => {
                    self.map.reset(&snapshot);
                    let snapshot = self.map.to_snapshot();
                    self.tx.send_modify(|view| {
                        view.snapshot = snapshot;
                        view.status = SyncStatus::Live;
                        view.reconciliations += 1;
                    });
                    tracing::debug!(topic = %self.topic, attempt, "seat map reconciled");
                    return Some(stream);
                },
                Err(EngineError::NotFound { .. }) => {
                    let taken_at = self.tx.borrow().snapshot.taken_at;
                    self.map
                        .reset(&SeatMapSnapshot::empty(self.map.restaurant_id(), taken_at));
                    let snapshot = self.map.to_snapshot();
                    self.tx.send_modify(|view| {
                        view.snapshot = snapshot;
                        view.status = SyncStatus::Closed;
                    });
                    tracing::info!(topic = %self.topic, "restaurant deleted; synchronizer stopped");
                    return None;
                },
                Err(error) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    tracing::warn!(topic = %self.topic, attempt, %error, "reconciliation failed; backing off");
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                },
            }
        }
    }

    async fn pull(&self) -> Result<(ChangeStream, SeatMapSnapshot), EngineError> {
        let stream = self
            .feed
            .subscribe(&self.topic)
            .await
            .map_err(|e| EngineError::SubscriptionLost(e.to_string()))?;
        let snapshot = self.store.get_seat_map(self.map.restaurant_id()).await?;
        Ok((stream, snapshot))
    }
}
