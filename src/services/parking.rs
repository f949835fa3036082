//! Parking service: land creation, slot status and bookings.
//!
//! DESIGN
//! ======
//! Every mutation is awaited and returns `Result`; callers learn success or
//! failure from the return value. Multi-document writes go through one
//! `WriteBatch`, so a land and its slots, or a booking and the slot it
//! reserves, land together or not at all.
//!
//! ERROR HANDLING
//! ==============
//! Booking commits carry a precondition that the slot is still
//! `available`. Losing that race surfaces as `SlotUnavailable` and nothing
//! is written. There is no automatic retry.

use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

use crate::frame::ErrorCode;
use crate::model::{
    Booking, BookingStatus, GeoPoint, ParkingLand, ParkingSlot, SlotStatus, bookings_path, lands_path, slots_path,
};
use crate::store::{DocumentStore, Fields, Precondition, StoreError, WriteBatch, encode};

/// Slots per lettered row (`A1..A10`, `B1..B10`, ...).
pub const SLOTS_PER_ROW: u32 = 10;

/// Upper bound on slots created with one land.
pub const MAX_SLOTS_PER_LAND: u32 = 500;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ParkingError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("land not found: {0}")]
    LandNotFound(String),
    #[error("slot not found: {land_id}/{slot_id}")]
    SlotNotFound { land_id: String, slot_id: String },
    #[error("slot {slot_id} is no longer available")]
    SlotUnavailable { land_id: String, slot_id: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for ParkingError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::LandNotFound(_) => "E_LAND_NOT_FOUND",
            Self::SlotNotFound { .. } => "E_SLOT_NOT_FOUND",
            Self::SlotUnavailable { .. } => "E_SLOT_UNAVAILABLE",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.retryable(),
            _ => false,
        }
    }
}

/// Owner input for a new land.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLand {
    pub name: String,
    pub location: GeoPoint,
    pub total_slots: u32,
    pub price_per_hour: f64,
    #[serde(default)]
    pub image: Option<String>,
}

/// Customer input for a new booking. Without `amount` the price is derived
/// from the land's hourly rate.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBooking {
    pub user_id: String,
    pub land_id: String,
    pub slot_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub status: Option<BookingStatus>,
}

// =============================================================================
// LANDS
// =============================================================================

/// Create a land together with `total_slots` available slots.
///
/// # Errors
///
/// Returns `Validation` for bad input, or a store error if the commit fails.
pub async fn create_land(store: &dyn DocumentStore, owner_id: &str, land: NewLand) -> Result<ParkingLand, ParkingError> {
    let owner_id = owner_id.trim();
    if owner_id.is_empty() {
        return Err(ParkingError::Validation("owner id is required".into()));
    }
    let name = land.name.trim();
    if name.is_empty() {
        return Err(ParkingError::Validation("land name is required".into()));
    }
    if land.total_slots == 0 || land.total_slots > MAX_SLOTS_PER_LAND {
        return Err(ParkingError::Validation(format!(
            "total slots must be between 1 and {MAX_SLOTS_PER_LAND}"
        )));
    }
    if !land.price_per_hour.is_finite() || land.price_per_hour < 0.0 {
        return Err(ParkingError::Validation("price per hour must be zero or more".into()));
    }

    let record = ParkingLand {
        id: store.new_id(),
        owner_id: owner_id.to_owned(),
        name: name.to_owned(),
        location: land.location,
        total_slots: land.total_slots,
        price_per_hour: land.price_per_hour,
        image: land.image.filter(|s| !s.trim().is_empty()),
    };

    let mut fields = encode(&record, "id")?;
    fields.insert("createdAt".into(), now_value());
    let mut batch = WriteBatch::new().create(lands_path(), &record.id, fields);

    let slot_collection = slots_path(&record.id);
    for (index, slot_number) in slot_numbers(record.total_slots).into_iter().enumerate() {
        let slot = ParkingSlot {
            id: slot_doc_id(index),
            land_id: record.id.clone(),
            slot_number,
            status: SlotStatus::Available,
            current_vehicle: None,
            booked_by: None,
            booked_until: None,
            current_booking_id: None,
        };
        batch = batch.create(slot_collection.clone(), &slot.id, encode(&slot, "id")?);
    }

    store.commit(batch).await?;
    info!(land_id = %record.id, %owner_id, total_slots = record.total_slots, "parking land created");
    Ok(record)
}

/// Slot labels for a land: ten per lettered row, rows `A..Z` then `AA, AB, ...`.
#[must_use]
pub fn slot_numbers(count: u32) -> Vec<String> {
    (0..count)
        .map(|i| format!("{}{}", row_label(i / SLOTS_PER_ROW), i % SLOTS_PER_ROW + 1))
        .collect()
}

fn row_label(mut row: u32) -> String {
    let mut label = String::new();
    loop {
        let letter = u8::try_from(row % 26).unwrap_or(0);
        label.insert(0, char::from(b'A' + letter));
        if row < 26 {
            break;
        }
        row = row / 26 - 1;
    }
    label
}

fn slot_doc_id(index: usize) -> String {
    format!("slot-{:04}", index + 1)
}

// =============================================================================
// SLOTS
// =============================================================================

/// Overwrite a slot's status and vehicle. No transition validation: guards
/// may move a slot between any two states.
///
/// # Errors
///
/// Returns `SlotNotFound` if the slot doesn't exist, or a store error.
pub async fn set_slot_status(
    store: &dyn DocumentStore,
    land_id: &str,
    slot_id: &str,
    status: SlotStatus,
    vehicle: Option<&str>,
) -> Result<(), ParkingError> {
    let vehicle = vehicle.map(str::trim).filter(|v| !v.is_empty());

    let mut fields = Fields::new();
    fields.insert("status".into(), Value::String(status.as_str().to_owned()));
    fields.insert("currentVehicle".into(), vehicle.map_or(Value::Null, |v| Value::String(v.to_owned())));
    fields.insert("updatedAt".into(), now_value());

    match store.update(&slots_path(land_id), slot_id, fields).await {
        Ok(()) => {
            info!(%land_id, %slot_id, status = status.as_str(), "slot status updated");
            Ok(())
        }
        Err(StoreError::NotFound { .. }) => {
            Err(ParkingError::SlotNotFound { land_id: land_id.to_owned(), slot_id: slot_id.to_owned() })
        }
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// BOOKINGS
// =============================================================================

/// Record a booking and reserve its slot in one atomic commit.
///
/// The slot update is conditional on the slot still being `available`.
///
/// # Errors
///
/// Returns `Validation` for bad input, `LandNotFound` when the amount has to
/// be priced from a missing land, `SlotNotFound`, `SlotUnavailable`, or a
/// store error.
pub async fn create_booking(store: &dyn DocumentStore, input: NewBooking) -> Result<Booking, ParkingError> {
    let user_id = input.user_id.trim();
    let land_id = input.land_id.trim();
    let slot_id = input.slot_id.trim();
    if user_id.is_empty() || land_id.is_empty() || slot_id.is_empty() {
        return Err(ParkingError::Validation("user id, land id and slot id are required".into()));
    }
    if input.end_time <= input.start_time {
        return Err(ParkingError::Validation("end time must be after start time".into()));
    }
    let status = input.status.unwrap_or(BookingStatus::Confirmed);
    if !status.is_active() {
        return Err(ParkingError::Validation("new bookings must be pending or confirmed".into()));
    }

    let amount = match input.amount {
        Some(amount) => amount,
        None => {
            let Some(doc) = store.get(&lands_path(), land_id).await? else {
                return Err(ParkingError::LandNotFound(land_id.to_owned()));
            };
            let land: ParkingLand = doc.decode("id").map_err(StoreError::from)?;
            booking_amount(land.price_per_hour, input.start_time, input.end_time)
        }
    };
    if !amount.is_finite() || amount < 0.0 {
        return Err(ParkingError::Validation("amount must be zero or more".into()));
    }

    let booking = Booking {
        id: store.new_id(),
        user_id: user_id.to_owned(),
        slot_id: slot_id.to_owned(),
        land_id: land_id.to_owned(),
        start_time: input.start_time,
        end_time: input.end_time,
        amount,
        status,
    };

    let mut booking_fields = encode(&booking, "id")?;
    booking_fields.insert("createdAt".into(), now_value());

    let booked_until = booking
        .end_time
        .format(&Rfc3339)
        .map_err(|e| ParkingError::Validation(format!("end time: {e}")))?;
    let mut slot_fields = Fields::new();
    slot_fields.insert("status".into(), Value::String(SlotStatus::Booked.as_str().to_owned()));
    slot_fields.insert("bookedBy".into(), Value::String(booking.user_id.clone()));
    slot_fields.insert("bookedUntil".into(), Value::String(booked_until));
    slot_fields.insert("currentBookingId".into(), Value::String(booking.id.clone()));
    slot_fields.insert("updatedAt".into(), now_value());

    let batch = WriteBatch::new()
        .create(bookings_path(), &booking.id, booking_fields)
        .update_if(
            slots_path(land_id),
            slot_id,
            slot_fields,
            Precondition::FieldEquals {
                field: "status".into(),
                value: Value::String(SlotStatus::Available.as_str().to_owned()),
            },
        );

    match store.commit(batch).await {
        Ok(()) => {
            info!(booking_id = %booking.id, %land_id, %slot_id, %user_id, amount, "booking created");
            Ok(booking)
        }
        Err(StoreError::PreconditionFailed { .. }) => {
            Err(ParkingError::SlotUnavailable { land_id: land_id.to_owned(), slot_id: slot_id.to_owned() })
        }
        Err(StoreError::NotFound { .. }) => {
            Err(ParkingError::SlotNotFound { land_id: land_id.to_owned(), slot_id: slot_id.to_owned() })
        }
        Err(e) => Err(e.into()),
    }
}

/// Price of a stay: whole hours rounded up, at least one.
#[must_use]
pub fn booking_amount(price_per_hour: f64, start: OffsetDateTime, end: OffsetDateTime) -> f64 {
    let seconds = (end - start).whole_seconds();
    let hours = ((seconds + 3599) / 3600).max(1);
    let hours = u32::try_from(hours).map_or(f64::from(u32::MAX), f64::from);
    price_per_hour * hours
}

// =============================================================================
// HELPERS
// =============================================================================

fn now_value() -> Value {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_or(Value::Null, Value::String)
}

#[cfg(test)]
#[path = "parking_test.rs"]
mod tests;
