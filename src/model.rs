//! Domain records mirrored from the document store.
//!
//! Field names follow the stored documents (camelCase). The document id is
//! carried as `id` (`uid` for user profiles) and injected on decode.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::store::CollectionPath;

// =============================================================================
// COLLECTIONS
// =============================================================================

pub const LANDS_COLLECTION: &str = "parkingLands";
pub const SLOTS_COLLECTION: &str = "slots";
pub const BOOKINGS_COLLECTION: &str = "bookings";
pub const USERS_COLLECTION: &str = "users";

#[must_use]
pub fn lands_path() -> CollectionPath {
    CollectionPath::root(LANDS_COLLECTION)
}

/// Slots of one land live in a sub-collection of the land document.
#[must_use]
pub fn slots_path(land_id: &str) -> CollectionPath {
    lands_path().child(land_id, SLOTS_COLLECTION)
}

#[must_use]
pub fn bookings_path() -> CollectionPath {
    CollectionPath::root(BOOKINGS_COLLECTION)
}

#[must_use]
pub fn users_path() -> CollectionPath {
    CollectionPath::root(USERS_COLLECTION)
}

// =============================================================================
// LAND
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkingLand {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub location: GeoPoint,
    pub total_slots: u32,
    pub price_per_hour: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

// =============================================================================
// SLOT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Booked,
    Occupied,
}

impl SlotStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Booked => "booked",
            Self::Occupied => "occupied",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "available" => Some(Self::Available),
            "booked" => Some(Self::Booked),
            "occupied" => Some(Self::Occupied),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkingSlot {
    pub id: String,
    pub land_id: String,
    pub slot_number: String,
    pub status: SlotStatus,
    #[serde(default)]
    pub current_vehicle: Option<String>,
    #[serde(default)]
    pub booked_by: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub booked_until: Option<OffsetDateTime>,
    #[serde(default)]
    pub current_booking_id: Option<String>,
}

// =============================================================================
// BOOKING
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Pending and confirmed bookings still hold their slot.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub user_id: String,
    pub slot_id: String,
    pub land_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
    pub amount: f64,
    pub status: BookingStatus,
}

// =============================================================================
// USER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Owner,
    Guard,
    Customer,
}

impl UserRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Guard => "guard",
            Self::Customer => "customer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
