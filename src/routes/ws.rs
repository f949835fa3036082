//! WebSocket handler: mirror push + request/response frames.
//!
//! DESIGN
//! ======
//! On upgrade, subscribes to mirror updates, sends `session:connected` and a
//! full `mirror:snapshot`, then enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Mirror updates (via a forwarding task) → forward to client
//!
//! Handler functions are pure business logic: they validate, call a
//! service, and return an `Outcome`. The dispatch layer turns that into a
//! done frame, or an error frame carrying the service's error code.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → `session:connected` + `mirror:snapshot`
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Mirror updates stream as `mirror:*` frames; a lagging client gets a
//!    fresh `mirror:snapshot` instead of the updates it missed
//! 4. Close → stop the forwarding task

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, Status};
use crate::model::SlotStatus;
use crate::services::assistant::{self, GuardSnapshot};
use crate::services::mirror::{MirrorState, MirrorUpdate, ParkMirror};
use crate::services::parking::{self, NewBooking, NewLand, ParkingError};
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. Handlers never send frames
/// directly; mirror changes reach every client through the mirror itself.
enum Outcome {
    /// Send done+data to sender.
    Reply(Data),
    /// Send empty done to sender.
    Done,
}

// =============================================================================
// UPGRADE
// =============================================================================

/// `GET /api/ws?user_id=...`. The user id is optional and only stamps
/// `from` on inbound frames; there is no authentication layer.
pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = params
        .get("user_id")
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty());
    ws.on_upgrade(move |socket| run_ws(socket, state, user_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user_id: Option<String>) {
    let client_id = Uuid::new_v4();
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.ws_client_channel_capacity);

    // Subscribe before the snapshot so no update falls between the two.
    let updates = state.mirror.subscribe();

    let mut welcome = Frame::request("session:connected", Data::new()).with_data("client_id", client_id.to_string());
    if let Some(uid) = &user_id {
        welcome = welcome.with_data("user_id", uid.clone());
    }
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }
    if send_frame(&mut socket, &snapshot_frame(&state.mirror.snapshot().await))
        .await
        .is_err()
    {
        return;
    }

    let forwarder = tokio::spawn(forward_mirror_updates(state.mirror.clone(), updates, client_tx));
    info!(%client_id, user_id = user_id.as_deref().unwrap_or("-"), "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for frame in process_inbound_text(&state, client_id, user_id.as_deref(), &text).await {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    forwarder.abort();
    info!(%client_id, "ws: client disconnected");
}

/// Turn mirror updates into frames for one client. Ends when the client
/// channel closes or the mirror is dropped.
async fn forward_mirror_updates(
    mirror: ParkMirror,
    mut updates: broadcast::Receiver<MirrorUpdate>,
    client_tx: mpsc::Sender<Frame>,
) {
    loop {
        let frame = match updates.recv().await {
            Ok(update) => update_frame(&update),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "ws: client lagged behind mirror; resending snapshot");
                snapshot_frame(&mirror.snapshot().await)
            }
            Err(RecvError::Closed) => break,
        };
        if client_tx.send(frame).await.is_err() {
            break;
        }
    }
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Kept apart from the socket so tests can drive dispatch end-to-end.
async fn process_inbound_text(state: &AppState, client_id: Uuid, user_id: Option<&str>, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    if let Some(uid) = user_id {
        req.from = Some(uid.to_owned());
    }
    info!(%client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let prefix = req.prefix();
    let result = match prefix {
        "mirror" => handle_mirror(state, &req).await,
        "land" => handle_land(state, &req).await,
        "slot" => handle_slot(state, &req).await,
        "booking" => handle_booking(state, &req).await,
        "assistant" => handle_assistant(state, &req).await,
        _ => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn handle_mirror(state: &AppState, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "get" => Ok(Outcome::Reply(to_data(&state.mirror.snapshot().await))),
        op => Err(req.error(format!("unknown mirror op: {op}"))),
    }
}

async fn handle_land(state: &AppState, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "create" => {
            let Some(owner_id) = req.from.clone().or_else(|| req.data_str("owner_id").map(str::to_owned)) else {
                return Err(req.error("owner_id required"));
            };
            let land: NewLand = data_record(req, req.data.clone())?;
            match parking::create_land(state.store.as_ref(), &owner_id, land).await {
                Ok(land) => {
                    let mut data = Data::new();
                    data.insert("land".into(), serde_json::to_value(&land).unwrap_or_default());
                    Ok(Outcome::Reply(data))
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        op => Err(req.error(format!("unknown land op: {op}"))),
    }
}

async fn handle_slot(state: &AppState, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "update" => {
            let Some(land_id) = land_id(req) else {
                return Err(req.error("land_id required"));
            };
            let Some(slot_id) = req.data_str("slot_id") else {
                return Err(req.error("slot_id required"));
            };
            let Some(status) = req.data_str("status").and_then(SlotStatus::parse) else {
                return Err(req.error("status must be available, booked or occupied"));
            };
            let vehicle = req.data_str("vehicle");

            match parking::set_slot_status(state.store.as_ref(), &land_id, slot_id, status, vehicle).await {
                Ok(()) => Ok(Outcome::Done),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        op => Err(req.error(format!("unknown slot op: {op}"))),
    }
}

async fn handle_booking(state: &AppState, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "create" => {
            // Envelope identity wins over anything the payload claims.
            let mut fields = req.data.clone();
            if let Some(from) = &req.from {
                fields.insert("userId".into(), Value::String(from.clone()));
            }
            if let Some(land_id) = &req.land_id {
                fields.insert("landId".into(), Value::String(land_id.clone()));
            }
            let booking: NewBooking = data_record(req, fields)?;
            match parking::create_booking(state.store.as_ref(), booking).await {
                Ok(booking) => {
                    let mut data = Data::new();
                    data.insert("booking".into(), serde_json::to_value(&booking).unwrap_or_default());
                    Ok(Outcome::Reply(data))
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        op => Err(req.error(format!("unknown booking op: {op}"))),
    }
}

async fn handle_assistant(state: &AppState, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "recommend" => {
            let Some(land_id) = land_id(req) else {
                return Err(req.error("land_id required"));
            };
            let slots = state.mirror.slots_for(&land_id).await;
            let bookings = state.mirror.bookings_for_land(&land_id).await;
            let snapshot = GuardSnapshot::from_mirror(&land_id, &slots, &bookings, req.data_str("recent_events"));

            let result = assistant::recommend(state.llm.as_ref(), &state.config.assistant, &snapshot).await;
            Ok(Outcome::Reply(to_data(&result)))
        }
        op => Err(req.error(format!("unknown assistant op: {op}"))),
    }
}

// =============================================================================
// MIRROR FRAMES
// =============================================================================

pub(crate) fn snapshot_frame(snapshot: &MirrorState) -> Frame {
    Frame::request("mirror:snapshot", to_data(snapshot))
}

pub(crate) fn update_frame(update: &MirrorUpdate) -> Frame {
    match update {
        MirrorUpdate::Lands(lands) => Frame::request("mirror:lands", Data::new()).with_data("lands", to_value(lands)),
        MirrorUpdate::Slots { land_id, slots } => Frame::request("mirror:slots", Data::new())
            .with_land_id(land_id.clone())
            .with_data("land_id", land_id.clone())
            .with_data("slots", to_value(slots)),
        MirrorUpdate::SlotsRemoved { land_id } => Frame::request("mirror:slots", Data::new())
            .with_land_id(land_id.clone())
            .with_data("land_id", land_id.clone())
            .with_data("slots", Value::Array(Vec::new()))
            .with_data("removed", true),
        MirrorUpdate::Bookings(bookings) => {
            Frame::request("mirror:bookings", Data::new()).with_data("bookings", to_value(bookings))
        }
        MirrorUpdate::Guards(guards) => Frame::request("mirror:guards", Data::new()).with_data("guards", to_value(guards)),
        MirrorUpdate::Alert(alert) => Frame::request("mirror:alert", to_data(alert)),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Land id from the frame envelope, falling back to `data.land_id`.
fn land_id(req: &Frame) -> Option<String> {
    req.land_id
        .clone()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| req.data_str("land_id").map(str::to_owned))
}

/// Decode a request record from frame data; failures become validation
/// error frames.
fn data_record<T: DeserializeOwned>(req: &Frame, fields: Data) -> Result<T, Frame> {
    let value = Value::Object(fields.into_iter().collect());
    serde_json::from_value(value).map_err(|e| req.error_from(&ParkingError::Validation(e.to_string())))
}

fn to_value(value: &impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!(error = %e, "ws: failed to serialize payload");
        Value::Null
    })
}

/// Flatten a serializable struct into frame data.
fn to_data(value: &impl Serialize) -> Data {
    match to_value(value) {
        Value::Object(map) => map.into_iter().collect(),
        _ => Data::new(),
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.data.get("code").and_then(Value::as_str).unwrap_or("-");
        let message = frame.data.get("message").and_then(Value::as_str).unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        debug!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
