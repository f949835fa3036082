use std::sync::Arc;

use super::*;
use crate::state::test_helpers::{new_land, seed_land};
use crate::store::memory::MemoryStore;
use crate::store::test_support::FlakyStore;
use time::macros::datetime;

fn booking_input(land_id: &str, slot_id: &str) -> NewBooking {
    NewBooking {
        user_id: "cust-1".into(),
        land_id: land_id.into(),
        slot_id: slot_id.into(),
        start_time: datetime!(2026-03-01 09:00 UTC),
        end_time: datetime!(2026-03-01 11:30 UTC),
        amount: None,
        status: None,
    }
}

async fn read_slot(store: &MemoryStore, land_id: &str, slot_id: &str) -> ParkingSlot {
    store
        .get(&slots_path(land_id), slot_id)
        .await
        .unwrap()
        .expect("slot exists")
        .decode("id")
        .unwrap()
}

// =============================================================================
// slot_numbers
// =============================================================================

#[test]
fn slot_numbers_fill_rows_of_ten() {
    let numbers = slot_numbers(12);
    assert_eq!(numbers[0], "A1");
    assert_eq!(numbers[9], "A10");
    assert_eq!(numbers[10], "B1");
    assert_eq!(numbers[11], "B2");
}

#[test]
fn slot_numbers_continue_past_z() {
    let numbers = slot_numbers(270);
    assert_eq!(numbers[259], "Z10");
    assert_eq!(numbers[260], "AA1");
    assert_eq!(numbers[269], "AA10");
}

#[test]
fn slot_numbers_are_unique() {
    let numbers = slot_numbers(MAX_SLOTS_PER_LAND);
    let unique: std::collections::HashSet<_> = numbers.iter().collect();
    assert_eq!(unique.len(), numbers.len());
}

#[test]
fn slot_numbers_zero_is_empty() {
    assert!(slot_numbers(0).is_empty());
}

// =============================================================================
// create_land
// =============================================================================

#[tokio::test]
async fn create_land_writes_land_and_available_slots() {
    let store = MemoryStore::new();
    let land = create_land(&store, "owner-1", new_land("  Central Lot ", 12))
        .await
        .unwrap();

    assert_eq!(land.name, "Central Lot");
    assert_eq!(land.owner_id, "owner-1");
    assert_eq!(store.count(&lands_path()).await, 1);
    assert_eq!(store.count(&slots_path(&land.id)).await, 12);

    let first = read_slot(&store, &land.id, "slot-0001").await;
    assert_eq!(first.slot_number, "A1");
    assert_eq!(first.land_id, land.id);
    assert_eq!(first.status, SlotStatus::Available);
    assert!(first.current_vehicle.is_none());

    let last = read_slot(&store, &land.id, "slot-0012").await;
    assert_eq!(last.slot_number, "B2");

    let doc = store.get(&lands_path(), &land.id).await.unwrap().unwrap();
    assert!(doc.fields.contains_key("createdAt"));
}

#[tokio::test]
async fn create_land_rejects_bad_input() {
    let store = MemoryStore::new();

    let err = create_land(&store, " ", new_land("Lot", 5)).await.unwrap_err();
    assert!(matches!(err, ParkingError::Validation(_)));

    let err = create_land(&store, "owner-1", new_land("   ", 5)).await.unwrap_err();
    assert!(matches!(err, ParkingError::Validation(_)));

    let err = create_land(&store, "owner-1", new_land("Lot", 0)).await.unwrap_err();
    assert!(matches!(err, ParkingError::Validation(_)));

    let err = create_land(&store, "owner-1", new_land("Lot", MAX_SLOTS_PER_LAND + 1))
        .await
        .unwrap_err();
    assert!(matches!(err, ParkingError::Validation(_)));

    let mut negative = new_land("Lot", 5);
    negative.price_per_hour = -1.0;
    let err = create_land(&store, "owner-1", negative).await.unwrap_err();
    assert_eq!(err.error_code(), "E_VALIDATION");

    assert_eq!(store.count(&lands_path()).await, 0);
}

#[tokio::test]
async fn create_land_drops_blank_image() {
    let store = MemoryStore::new();
    let mut input = new_land("Lot", 1);
    input.image = Some("  ".into());
    let land = create_land(&store, "owner-1", input).await.unwrap();
    assert!(land.image.is_none());
}

#[tokio::test]
async fn create_land_commit_failure_writes_nothing() {
    let memory = Arc::new(MemoryStore::new());
    let flaky = FlakyStore::new(memory.clone());
    flaky.fail_commits(true);

    let err = create_land(&flaky, "owner-1", new_land("Lot", 3)).await.unwrap_err();
    assert_eq!(err.error_code(), "E_UNAVAILABLE");
    assert!(err.retryable());
    assert_eq!(memory.count(&lands_path()).await, 0);
}

// =============================================================================
// set_slot_status
// =============================================================================

#[tokio::test]
async fn set_slot_status_updates_status_and_vehicle() {
    let store = MemoryStore::new();
    let land_id = seed_land(&store, 2).await;

    set_slot_status(&store, &land_id, "slot-0001", SlotStatus::Occupied, Some(" KA-01-1234 "))
        .await
        .unwrap();
    let slot = read_slot(&store, &land_id, "slot-0001").await;
    assert_eq!(slot.status, SlotStatus::Occupied);
    assert_eq!(slot.current_vehicle.as_deref(), Some("KA-01-1234"));

    set_slot_status(&store, &land_id, "slot-0001", SlotStatus::Available, None)
        .await
        .unwrap();
    let slot = read_slot(&store, &land_id, "slot-0001").await;
    assert_eq!(slot.status, SlotStatus::Available);
    assert!(slot.current_vehicle.is_none());

    let doc = store.get(&slots_path(&land_id), "slot-0001").await.unwrap().unwrap();
    assert!(doc.fields.contains_key("updatedAt"));
}

#[tokio::test]
async fn set_slot_status_blank_vehicle_clears_it() {
    let store = MemoryStore::new();
    let land_id = seed_land(&store, 1).await;

    set_slot_status(&store, &land_id, "slot-0001", SlotStatus::Occupied, Some("   "))
        .await
        .unwrap();
    let slot = read_slot(&store, &land_id, "slot-0001").await;
    assert!(slot.current_vehicle.is_none());
}

#[tokio::test]
async fn set_slot_status_allows_any_transition() {
    let store = MemoryStore::new();
    let land_id = seed_land(&store, 1).await;

    for status in [SlotStatus::Occupied, SlotStatus::Booked, SlotStatus::Available, SlotStatus::Booked] {
        set_slot_status(&store, &land_id, "slot-0001", status, None)
            .await
            .unwrap();
        assert_eq!(read_slot(&store, &land_id, "slot-0001").await.status, status);
    }
}

#[tokio::test]
async fn set_slot_status_missing_slot_is_not_found() {
    let store = MemoryStore::new();
    let land_id = seed_land(&store, 1).await;

    let err = set_slot_status(&store, &land_id, "slot-9999", SlotStatus::Occupied, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ParkingError::SlotNotFound { ref slot_id, .. } if slot_id == "slot-9999"));
    assert_eq!(err.error_code(), "E_SLOT_NOT_FOUND");
}

// =============================================================================
// create_booking
// =============================================================================

#[tokio::test]
async fn create_booking_reserves_slot() {
    let store = MemoryStore::new();
    let land_id = seed_land(&store, 3).await;

    let booking = create_booking(&store, booking_input(&land_id, "slot-0002"))
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.slot_id, "slot-0002");
    assert_eq!(booking.land_id, land_id);
    // 2.5 hours at 40/hour rounds up to 3 hours.
    assert!((booking.amount - 120.0).abs() < f64::EPSILON);
    assert_eq!(store.count(&bookings_path()).await, 1);

    let slot = read_slot(&store, &land_id, "slot-0002").await;
    assert_eq!(slot.status, SlotStatus::Booked);
    assert_eq!(slot.booked_by.as_deref(), Some("cust-1"));
    assert_eq!(slot.current_booking_id.as_deref(), Some(booking.id.as_str()));
    assert_eq!(slot.booked_until, Some(datetime!(2026-03-01 11:30 UTC)));

    let untouched = read_slot(&store, &land_id, "slot-0001").await;
    assert_eq!(untouched.status, SlotStatus::Available);
}

#[tokio::test]
async fn create_booking_uses_explicit_amount_and_status() {
    let store = MemoryStore::new();
    let land_id = seed_land(&store, 1).await;

    let mut input = booking_input(&land_id, "slot-0001");
    input.amount = Some(15.5);
    input.status = Some(BookingStatus::Pending);
    let booking = create_booking(&store, input).await.unwrap();
    assert!((booking.amount - 15.5).abs() < f64::EPSILON);
    assert_eq!(booking.status, BookingStatus::Pending);
}

#[tokio::test]
async fn booking_taken_slot_is_unavailable_and_writes_nothing() {
    let store = MemoryStore::new();
    let land_id = seed_land(&store, 1).await;
    create_booking(&store, booking_input(&land_id, "slot-0001"))
        .await
        .unwrap();

    let err = create_booking(&store, booking_input(&land_id, "slot-0001"))
        .await
        .unwrap_err();
    assert!(matches!(err, ParkingError::SlotUnavailable { .. }));
    assert_eq!(err.error_code(), "E_SLOT_UNAVAILABLE");
    assert!(!err.retryable());
    assert_eq!(store.count(&bookings_path()).await, 1);
}

#[tokio::test]
async fn booking_occupied_slot_is_unavailable() {
    let store = MemoryStore::new();
    let land_id = seed_land(&store, 1).await;
    set_slot_status(&store, &land_id, "slot-0001", SlotStatus::Occupied, Some("KA-01-0001"))
        .await
        .unwrap();

    let err = create_booking(&store, booking_input(&land_id, "slot-0001"))
        .await
        .unwrap_err();
    assert!(matches!(err, ParkingError::SlotUnavailable { .. }));
    assert_eq!(store.count(&bookings_path()).await, 0);

    let slot = read_slot(&store, &land_id, "slot-0001").await;
    assert_eq!(slot.current_vehicle.as_deref(), Some("KA-01-0001"));
    assert!(slot.current_booking_id.is_none());
}

#[tokio::test]
async fn booking_missing_slot_is_not_found() {
    let store = MemoryStore::new();
    let land_id = seed_land(&store, 1).await;

    let err = create_booking(&store, booking_input(&land_id, "slot-0042"))
        .await
        .unwrap_err();
    assert!(matches!(err, ParkingError::SlotNotFound { .. }));
    assert_eq!(store.count(&bookings_path()).await, 0);
}

#[tokio::test]
async fn booking_without_amount_needs_the_land() {
    let store = MemoryStore::new();

    let err = create_booking(&store, booking_input("no-such-land", "slot-0001"))
        .await
        .unwrap_err();
    assert!(matches!(err, ParkingError::LandNotFound(ref id) if id == "no-such-land"));
    assert_eq!(err.error_code(), "E_LAND_NOT_FOUND");
}

#[tokio::test]
async fn create_booking_rejects_bad_input() {
    let store = MemoryStore::new();
    let land_id = seed_land(&store, 1).await;

    let mut backwards = booking_input(&land_id, "slot-0001");
    backwards.end_time = backwards.start_time;
    assert!(matches!(
        create_booking(&store, backwards).await.unwrap_err(),
        ParkingError::Validation(_)
    ));

    let mut no_user = booking_input(&land_id, "slot-0001");
    no_user.user_id = "  ".into();
    assert!(matches!(
        create_booking(&store, no_user).await.unwrap_err(),
        ParkingError::Validation(_)
    ));

    let mut finished = booking_input(&land_id, "slot-0001");
    finished.status = Some(BookingStatus::Completed);
    assert!(matches!(
        create_booking(&store, finished).await.unwrap_err(),
        ParkingError::Validation(_)
    ));

    let mut negative = booking_input(&land_id, "slot-0001");
    negative.amount = Some(-5.0);
    assert!(matches!(
        create_booking(&store, negative).await.unwrap_err(),
        ParkingError::Validation(_)
    ));

    assert_eq!(store.count(&bookings_path()).await, 0);
    assert_eq!(read_slot(&store, &land_id, "slot-0001").await.status, SlotStatus::Available);
}

#[tokio::test]
async fn booking_commit_failure_surfaces_store_error() {
    let memory = Arc::new(MemoryStore::new());
    let land_id = seed_land(memory.as_ref(), 1).await;
    let flaky = FlakyStore::new(memory.clone());
    flaky.fail_commits(true);

    let err = create_booking(&flaky, booking_input(&land_id, "slot-0001"))
        .await
        .unwrap_err();
    assert!(matches!(err, ParkingError::Store(StoreError::Unavailable(_))));
    assert_eq!(memory.count(&bookings_path()).await, 0);
}

#[test]
fn new_booking_decodes_camel_case_rfc3339() {
    let input: NewBooking = serde_json::from_value(serde_json::json!({
        "userId": "u1",
        "landId": "l1",
        "slotId": "slot-0001",
        "startTime": "2026-03-01T09:00:00Z",
        "endTime": "2026-03-01T10:00:00Z",
    }))
    .unwrap();
    assert_eq!(input.start_time, datetime!(2026-03-01 09:00 UTC));
    assert!(input.amount.is_none());
    assert!(input.status.is_none());
}

// =============================================================================
// booking_amount
// =============================================================================

#[test]
fn booking_amount_rounds_up_to_whole_hours() {
    let start = datetime!(2026-03-01 09:00 UTC);
    let cases = [
        (time::Duration::minutes(10), 40.0),
        (time::Duration::hours(1), 40.0),
        (time::Duration::minutes(61), 80.0),
        (time::Duration::hours(3), 120.0),
    ];
    for (stay, expected) in cases {
        let amount = booking_amount(40.0, start, start + stay);
        assert!((amount - expected).abs() < f64::EPSILON, "{stay}: {amount}");
    }
}

#[test]
fn free_land_costs_nothing() {
    let start = datetime!(2026-03-01 09:00 UTC);
    assert!(booking_amount(0.0, start, start + time::Duration::hours(5)).abs() < f64::EPSILON);
}
