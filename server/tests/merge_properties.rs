//! Properties of merging change events into a seat map.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use seatbook::SeatMap;
use seatbook_core::change::{ChangeCause, ChangeEvent, EntityChange};
use seatbook_core::seat_map::{SeatMapSnapshot, TableView};
use seatbook_core::types::{
    Position, RestaurantId, Seat, SeatId, SeatNumber, SeatStatus, Table, TableId, TableNumber,
    TableStatus, Version,
};

const SEATS: usize = 3;

struct Floor {
    restaurant_id: RestaurantId,
    table_id: TableId,
    seats: Vec<SeatId>,
}

impl Floor {
    fn new() -> Self {
        Self {
            restaurant_id: RestaurantId::new(),
            table_id: TableId::new(),
            seats: (0..SEATS).map(|_| SeatId::new()).collect(),
        }
    }

    fn snapshot(&self) -> SeatMapSnapshot {
        SeatMapSnapshot {
            restaurant_id: self.restaurant_id,
            tables: vec![TableView {
                table: Table {
                    id: self.table_id,
                    restaurant_id: self.restaurant_id,
                    table_number: TableNumber::new(5),
                    capacity: u16::try_from(SEATS).unwrap(),
                    status: TableStatus::Available,
                    position: Position::default(),
                    version: Version::INITIAL,
                },
                seats: self
                    .seats
                    .iter()
                    .enumerate()
                    .map(|(i, id)| Seat {
                        id: *id,
                        table_id: self.table_id,
                        seat_number: SeatNumber::new(u16::try_from(i + 1).unwrap()),
                        status: SeatStatus::Available,
                        claimed_by: None,
                        version: Version::INITIAL,
                    })
                    .collect(),
            }],
            taken_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    /// The `n`th commit: seat `n % SEATS` moves to its next version.
    fn event(&self, n: usize, reserved: bool) -> ChangeEvent {
        let seat = n % SEATS;
        let version = u64::try_from(n / SEATS).unwrap() + 2;
        ChangeEvent {
            restaurant_id: self.restaurant_id,
            cause: ChangeCause::StaffEdit,
            changes: vec![EntityChange::Seat {
                seat_id: self.seats[seat],
                table_id: self.table_id,
                seat_number: SeatNumber::new(u16::try_from(seat + 1).unwrap()),
                status: if reserved {
                    SeatStatus::Reserved
                } else {
                    SeatStatus::Available
                },
                version: Version::new(version),
            }],
            committed_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::seconds(i64::try_from(n).unwrap() + 1),
        }
    }
}

/// Commit history plus a delivery order that shuffles and duplicates it.
fn history() -> impl Strategy<Value = (Vec<bool>, Vec<usize>)> {
    proptest::collection::vec(any::<bool>(), 1..24).prop_flat_map(|statuses| {
        let n = statuses.len();
        let deliveries: Vec<usize> = (0..n * 2).map(|i| i % n).collect();
        (Just(statuses), Just(deliveries).prop_shuffle())
    })
}

fn seat_states(map: &SeatMap, floor: &Floor) -> Vec<(SeatStatus, Version)> {
    floor
        .seats
        .iter()
        .map(|id| {
            let seat = map.seat(*id).unwrap();
            (seat.status, seat.version)
        })
        .collect()
}

proptest! {
    #[test]
    fn delivery_order_and_duplicates_do_not_change_the_result((statuses, deliveries) in history()) {
        let floor = Floor::new();
        let events: Vec<ChangeEvent> = statuses
            .iter()
            .enumerate()
            .map(|(n, reserved)| floor.event(n, *reserved))
            .collect();

        let mut in_order = SeatMap::from_snapshot(&floor.snapshot());
        for event in &events {
            in_order.apply(event);
        }

        let mut shuffled = SeatMap::from_snapshot(&floor.snapshot());
        for index in &deliveries {
            shuffled.apply(&events[*index]);
        }

        prop_assert_eq!(seat_states(&shuffled, &floor), seat_states(&in_order, &floor));
    }

    #[test]
    fn each_seat_ends_at_its_latest_commit((statuses, deliveries) in history()) {
        let floor = Floor::new();
        let events: Vec<ChangeEvent> = statuses
            .iter()
            .enumerate()
            .map(|(n, reserved)| floor.event(n, *reserved))
            .collect();

        let mut map = SeatMap::from_snapshot(&floor.snapshot());
        for index in &deliveries {
            map.apply(&events[*index]);
        }

        for (seat, id) in floor.seats.iter().enumerate() {
            let last = (0..statuses.len()).rev().find(|n| n % SEATS == seat);
            let merged = map.seat(*id).unwrap();
            match last {
                Some(n) => {
                    let expected = if statuses[n] { SeatStatus::Reserved } else { SeatStatus::Available };
                    prop_assert_eq!(merged.status, expected);
                    prop_assert_eq!(merged.version, Version::new(u64::try_from(n / SEATS).unwrap() + 2));
                },
                None => prop_assert_eq!(merged.version, Version::INITIAL),
            }
        }
    }
}
