//! Guard assistant: occupancy snapshot in, up to three recommendations out.
//!
//! DESIGN
//! ======
//! One stateless LLM round trip per request. The model answers through the
//! `submit_recommendations` tool, so the output shape is fixed: an array of
//! strings, trimmed and capped at three.
//!
//! ERROR HANDLING
//! ==============
//! Fails closed. No provider, a provider error, a timeout, or output that
//! doesn't fit the schema all yield the same three rule-based lines derived
//! from occupancy counts. Callers never see an error; the result records
//! which source produced it.

use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use crate::config::AssistantConfig;
use crate::frame::ErrorCode;
use crate::llm::LlmChat;
use crate::llm::tools::{MAX_RECOMMENDATIONS, SUBMIT_RECOMMENDATIONS, guard_assistant_tools};
use crate::llm::types::{ChatResponse, ContentBlock, LlmError, Message};
use crate::model::{Booking, ParkingSlot, SlotStatus};

pub const UNKNOWN_BOOKER: &str = "Unknown User";
pub const NO_RECENT_EVENTS: &str = "No recent events reported.";

/// In-use share of slots, in percent, at which the fallback switches to
/// overflow advice.
pub const HIGH_OCCUPANCY_PERCENT: usize = 80;

const SYSTEM_PROMPT: &str = "You are an AI assistant for a parking guard. Provide concise, actionable \
recommendations and alerts based on the current parking situation, active bookings and recent events. \
Focus on efficient vehicle flow and proactive customer service. Prioritize immediate actions and \
potential issues. Always answer by calling the submit_recommendations tool.";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("LLM not configured")]
    LlmNotConfigured,
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
    #[error("LLM did not answer within {0}s")]
    Timeout(u64),
    #[error("invalid assistant output: {0}")]
    InvalidOutput(String),
}

impl ErrorCode for AssistantError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::LlmNotConfigured => "E_LLM_NOT_CONFIGURED",
            Self::Llm(_) => "E_LLM_ERROR",
            Self::Timeout(_) => "E_LLM_TIMEOUT",
            Self::InvalidOutput(_) => "E_INVALID_OUTPUT",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Llm(e) if e.retryable()) || matches!(self, Self::Timeout(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatusEntry {
    pub slot_number: String,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveBooking {
    pub slot_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_plate: Option<String>,
    pub booked_by: String,
    /// RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_arrival_time: Option<String>,
    /// RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_departure_time: Option<String>,
}

/// Everything the assistant sees about one land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardSnapshot {
    pub parking_land_id: String,
    pub current_slot_statuses: Vec<SlotStatusEntry>,
    pub active_bookings: Vec<ActiveBooking>,
    pub recent_events: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OccupancyCounts {
    pub total: usize,
    pub available: usize,
    pub booked: usize,
    pub occupied: usize,
}

impl OccupancyCounts {
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.booked + self.occupied
    }

    /// Whole-number percentage of slots in use; 0 for an empty land.
    #[must_use]
    pub fn in_use_percent(&self) -> usize {
        if self.total == 0 {
            return 0;
        }
        (self.in_use() * 100 + self.total / 2) / self.total
    }

    /// In-use share at or above [`HIGH_OCCUPANCY_PERCENT`].
    #[must_use]
    pub fn is_high(&self) -> bool {
        self.total > 0 && self.in_use() * 100 >= self.total * HIGH_OCCUPANCY_PERCENT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationSource {
    Llm,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendations {
    pub items: Vec<String>,
    pub source: RecommendationSource,
}

// =============================================================================
// SNAPSHOT
// =============================================================================

impl GuardSnapshot {
    /// Build the assistant input from mirrored slots and bookings.
    ///
    /// Booked slots become active bookings. Arrival and departure times come
    /// from the slot's current booking, or failing that any pending or
    /// confirmed booking for the same slot.
    #[must_use]
    pub fn from_mirror(
        land_id: &str,
        slots: &[ParkingSlot],
        bookings: &[Booking],
        recent_events: Option<&str>,
    ) -> Self {
        let current_slot_statuses = slots
            .iter()
            .map(|s| SlotStatusEntry { slot_number: s.slot_number.clone(), status: s.status })
            .collect();

        let active_bookings = slots
            .iter()
            .filter(|s| s.status == SlotStatus::Booked)
            .map(|slot| {
                let booking = find_booking(slot, bookings);
                ActiveBooking {
                    slot_number: slot.slot_number.clone(),
                    vehicle_plate: slot.current_vehicle.clone(),
                    booked_by: slot
                        .booked_by
                        .clone()
                        .or_else(|| booking.map(|b| b.user_id.clone()))
                        .unwrap_or_else(|| UNKNOWN_BOOKER.to_owned()),
                    expected_arrival_time: booking.and_then(|b| format_time(b.start_time)),
                    expected_departure_time: booking
                        .map(|b| b.end_time)
                        .or(slot.booked_until)
                        .and_then(format_time),
                }
            })
            .collect();

        let recent_events = recent_events
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(NO_RECENT_EVENTS)
            .to_owned();

        Self { parking_land_id: land_id.to_owned(), current_slot_statuses, active_bookings, recent_events }
    }

    #[must_use]
    pub fn counts(&self) -> OccupancyCounts {
        let mut counts = OccupancyCounts { total: self.current_slot_statuses.len(), ..OccupancyCounts::default() };
        for entry in &self.current_slot_statuses {
            match entry.status {
                SlotStatus::Available => counts.available += 1,
                SlotStatus::Booked => counts.booked += 1,
                SlotStatus::Occupied => counts.occupied += 1,
            }
        }
        counts
    }
}

fn find_booking<'a>(slot: &ParkingSlot, bookings: &'a [Booking]) -> Option<&'a Booking> {
    if let Some(current) = &slot.current_booking_id {
        if let Some(found) = bookings.iter().find(|b| &b.id == current) {
            return Some(found);
        }
    }
    bookings
        .iter()
        .find(|b| b.slot_id == slot.id && b.land_id == slot.land_id && b.status.is_active())
}

fn format_time(at: OffsetDateTime) -> Option<String> {
    at.format(&Rfc3339).ok()
}

// =============================================================================
// RECOMMEND
// =============================================================================

/// Ask the LLM for recommendations, falling back to rule-based ones on any
/// failure.
pub async fn recommend(
    llm: Option<&Arc<dyn LlmChat>>,
    config: &AssistantConfig,
    snapshot: &GuardSnapshot,
) -> Recommendations {
    let land_id = &snapshot.parking_land_id;
    match request_recommendations(llm, config, snapshot).await {
        Ok(items) => {
            info!(%land_id, count = items.len(), "assistant: recommendations from LLM");
            Recommendations { items, source: RecommendationSource::Llm }
        }
        Err(e) => {
            warn!(%land_id, error = %e, code = e.error_code(), "assistant: using fallback recommendations");
            Recommendations { items: fallback_recommendations(snapshot.counts()).to_vec(), source: RecommendationSource::Fallback }
        }
    }
}

/// One LLM round trip, bounded by `config.timeout_secs`.
///
/// # Errors
///
/// Returns `LlmNotConfigured`, `Llm`, `Timeout` or `InvalidOutput`.
pub async fn request_recommendations(
    llm: Option<&Arc<dyn LlmChat>>,
    config: &AssistantConfig,
    snapshot: &GuardSnapshot,
) -> Result<Vec<String>, AssistantError> {
    let llm = llm.ok_or(AssistantError::LlmNotConfigured)?;
    let messages = [Message::user(build_prompt(snapshot))];
    let tools = guard_assistant_tools();

    let response = tokio::time::timeout(
        Duration::from_secs(config.timeout_secs),
        llm.chat(config.max_tokens, SYSTEM_PROMPT, &messages, Some(tools.as_slice())),
    )
    .await
    .map_err(|_| AssistantError::Timeout(config.timeout_secs))??;

    parse_recommendations(&response)
}

/// Extract recommendations from the `submit_recommendations` tool call.
pub(crate) fn parse_recommendations(response: &ChatResponse) -> Result<Vec<String>, AssistantError> {
    let Some(input) = response.content.iter().find_map(|block| match block {
        ContentBlock::ToolUse { name, input, .. } if name == SUBMIT_RECOMMENDATIONS => Some(input),
        _ => None,
    }) else {
        return Err(AssistantError::InvalidOutput(format!("no {SUBMIT_RECOMMENDATIONS} call")));
    };

    let Some(raw) = input.get("recommendations").and_then(serde_json::Value::as_array) else {
        return Err(AssistantError::InvalidOutput("recommendations must be an array".into()));
    };

    let mut items = Vec::with_capacity(MAX_RECOMMENDATIONS);
    for value in raw {
        let Some(text) = value.as_str() else {
            return Err(AssistantError::InvalidOutput("recommendations must be strings".into()));
        };
        let text = text.trim();
        if !text.is_empty() && items.len() < MAX_RECOMMENDATIONS {
            items.push(text.to_owned());
        }
    }

    if items.is_empty() {
        return Err(AssistantError::InvalidOutput("no recommendations".into()));
    }
    Ok(items)
}

pub(crate) fn build_prompt(snapshot: &GuardSnapshot) -> String {
    let mut prompt = format!("Parking Land ID: {}\n\nCurrent Parking Slot Statuses:\n", snapshot.parking_land_id);
    if snapshot.current_slot_statuses.is_empty() {
        prompt.push_str("(no slots reported)\n");
    }
    for entry in &snapshot.current_slot_statuses {
        let _ = writeln!(prompt, "- Slot: {}, Status: {}", entry.slot_number, entry.status.as_str());
    }

    prompt.push_str("\nActive and Upcoming Bookings:\n");
    if snapshot.active_bookings.is_empty() {
        prompt.push_str("(none)\n");
    }
    for booking in &snapshot.active_bookings {
        let _ = writeln!(prompt, "- Slot: {}", booking.slot_number);
        if let Some(plate) = &booking.vehicle_plate {
            let _ = writeln!(prompt, "  Vehicle: {plate}");
        }
        let _ = writeln!(prompt, "  Booked by: {}", booking.booked_by);
        if let Some(at) = &booking.expected_arrival_time {
            let _ = writeln!(prompt, "  Expected Arrival: {at}");
        }
        if let Some(at) = &booking.expected_departure_time {
            let _ = writeln!(prompt, "  Expected Departure: {at}");
        }
    }

    let _ = write!(
        prompt,
        "\nRecent Events/Observations:\n{}\n\nBased on the information above, provide up to {MAX_RECOMMENDATIONS} \
         concise, actionable recommendations or alerts for the guard.",
        snapshot.recent_events
    );
    prompt
}

// =============================================================================
// FALLBACK
// =============================================================================

/// Rule-based recommendations: always exactly three lines.
#[must_use]
pub fn fallback_recommendations(counts: OccupancyCounts) -> [String; 3] {
    let percent = counts.in_use_percent();
    let occupancy = if counts.is_high() {
        format!(
            "Occupancy is at {percent}%. Direct arriving vehicles to the {} remaining open slots and prepare for overflow.",
            counts.available
        )
    } else {
        format!(
            "Occupancy is at {percent}% with {} slots open. Keep the entrance clear and guide arrivals to open slots.",
            counts.available
        )
    };

    let bookings = if counts.booked > 0 {
        format!("{} booked slots are awaiting arrival. Verify reservations as vehicles enter.", counts.booked)
    } else {
        "No reservations are pending. Prioritize walk-in customers.".to_owned()
    };

    let patrol = if counts.occupied > 0 {
        format!("{} slots are occupied. Patrol occupied rows and check for overstays.", counts.occupied)
    } else {
        "No vehicles are parked. Run a routine signage and sensor check.".to_owned()
    };

    [occupancy, bookings, patrol]
}

#[cfg(test)]
#[path = "assistant_test.rs"]
mod tests;
