//! Collection mirror: local copy of the remote parking collections.
//!
//! DESIGN
//! ======
//! `ParkMirror` keeps `lands`, `slots` (keyed by land id), `bookings` and
//! `guards` in memory, fed by live queries:
//!
//! - `parkingLands` (limited) fans out into one slot query per land;
//! - `bookings` (limited);
//! - `users` where `role == "guard"` (limited).
//!
//! Every snapshot replaces its slice wholesale. Slices arrive in any order
//! relative to each other; only the latest snapshot per slice counts.
//! Observers get one [`MirrorUpdate`] per replacement over a broadcast
//! channel.
//!
//! LIFECYCLE
//! =========
//! `init_sync` is idempotent. Slot queries are reconciled against each lands
//! snapshot: exactly one per listed land, torn down (and the slice dropped)
//! when a land leaves the result. Live query tasks hold only a `Weak` to the
//! mirror, so dropping the last `ParkMirror` stops them.
//!
//! ERROR HANDLING
//! ==============
//! A failed snapshot leaves the slice untouched and publishes a
//! [`SyncAlert`] asking the user to reconnect. An interrupted change feed
//! is reported the same way. Nothing is retried here; the live query
//! recovers on the next change to its collection or on a feed resync.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};

use super::live_query::{LiveQuery, SnapshotEvent, spawn_live_query};
use crate::config::MirrorLimits;
use crate::frame::ErrorCode;
use crate::model::{
    BOOKINGS_COLLECTION, Booking, LANDS_COLLECTION, ParkingLand, ParkingSlot, UserProfile, UserRole, bookings_path,
    lands_path, slots_path, users_path,
};
use crate::store::{Document, DocumentStore, Query, StoreError};

const MIRROR_UPDATE_CAPACITY: usize = 256;
const GUARDS_SLICE: &str = "guards";

// =============================================================================
// TYPES
// =============================================================================

/// Point-in-time copy of every mirrored slice.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorState {
    pub lands: Vec<ParkingLand>,
    pub slots: HashMap<String, Vec<ParkingSlot>>,
    pub bookings: Vec<Booking>,
    pub guards: Vec<UserProfile>,
    /// True until the first lands snapshot (or error) arrives.
    pub loading: bool,
    /// True once any lands snapshot has been applied.
    pub initialized: bool,
}

/// User-facing notice that live updates for a collection broke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncAlert {
    pub collection: String,
    pub code: String,
    pub message: String,
}

impl SyncAlert {
    fn reconnect(collection: &str, error: &StoreError) -> Self {
        Self {
            collection: collection.to_owned(),
            code: error.error_code().to_owned(),
            message: format!(
                "Live updates for {collection} were interrupted. Check your connection and permissions, then reconnect."
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub enum MirrorUpdate {
    Lands(Vec<ParkingLand>),
    Slots { land_id: String, slots: Vec<ParkingSlot> },
    SlotsRemoved { land_id: String },
    Bookings(Vec<Booking>),
    Guards(Vec<UserProfile>),
    Alert(SyncAlert),
}

#[derive(Default)]
struct Subscriptions {
    started: bool,
    collections: Vec<LiveQuery>,
    slots: HashMap<String, LiveQuery>,
}

struct MirrorInner {
    state: RwLock<MirrorState>,
    subscriptions: Mutex<Subscriptions>,
    updates: broadcast::Sender<MirrorUpdate>,
    limits: MirrorLimits,
}

#[derive(Clone)]
pub struct ParkMirror {
    inner: Arc<MirrorInner>,
}

// =============================================================================
// PUBLIC API
// =============================================================================

impl ParkMirror {
    #[must_use]
    pub fn new(limits: MirrorLimits) -> Self {
        let (updates, _) = broadcast::channel(MIRROR_UPDATE_CAPACITY);
        let state = MirrorState { loading: true, ..MirrorState::default() };
        Self {
            inner: Arc::new(MirrorInner {
                state: RwLock::new(state),
                subscriptions: Mutex::new(Subscriptions::default()),
                updates,
                limits,
            }),
        }
    }

    /// Start mirroring. Returns `false` (and does nothing) if already started.
    pub async fn init_sync(&self, store: Arc<dyn DocumentStore>) -> bool {
        let mut subs = self.inner.subscriptions.lock().await;
        if subs.started {
            debug!("mirror: init_sync called again; already subscribed");
            return false;
        }
        subs.started = true;

        let limits = self.inner.limits;
        let weak = Arc::downgrade(&self.inner);

        let lands_query = Query::collection(lands_path()).limit(limits.lands);
        subs.collections
            .push(spawn_live_query(store.clone(), lands_query, {
                let weak = weak.clone();
                let store = store.clone();
                move |event| {
                    let weak = weak.clone();
                    let store = store.clone();
                    async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.apply_lands(store, event).await;
                        }
                    }
                }
            }));

        let bookings_query = Query::collection(bookings_path()).limit(limits.bookings);
        subs.collections
            .push(spawn_live_query(store.clone(), bookings_query, {
                let weak = weak.clone();
                move |event| {
                    let weak = weak.clone();
                    async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.apply_bookings(event).await;
                        }
                    }
                }
            }));

        let guards_query = Query::collection(users_path())
            .where_eq("role", UserRole::Guard.as_str())
            .limit(limits.guards);
        subs.collections
            .push(spawn_live_query(store, guards_query, move |event| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.apply_guards(event).await;
                    }
                }
            }));

        info!(
            lands_limit = limits.lands,
            bookings_limit = limits.bookings,
            guards_limit = limits.guards,
            "mirror: sync started"
        );
        true
    }

    /// Stop every live query. A later `init_sync` starts over.
    pub async fn shutdown(&self) {
        let mut subs = self.inner.subscriptions.lock().await;
        let stopped = subs.collections.len() + subs.slots.len();
        *subs = Subscriptions::default();
        info!(stopped, "mirror: sync stopped");
    }

    /// Number of live queries currently held.
    #[cfg(test)]
    pub async fn subscription_count(&self) -> usize {
        let subs = self.inner.subscriptions.lock().await;
        subs.collections.len() + subs.slots.len()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MirrorUpdate> {
        self.inner.updates.subscribe()
    }

    pub async fn snapshot(&self) -> MirrorState {
        self.inner.state.read().await.clone()
    }

    pub async fn slots_for(&self, land_id: &str) -> Vec<ParkingSlot> {
        let state = self.inner.state.read().await;
        state.slots.get(land_id).cloned().unwrap_or_default()
    }

    pub async fn bookings_for_land(&self, land_id: &str) -> Vec<Booking> {
        let state = self.inner.state.read().await;
        state
            .bookings
            .iter()
            .filter(|b| b.land_id == land_id)
            .cloned()
            .collect()
    }
}

// =============================================================================
// SNAPSHOT APPLICATION
// =============================================================================

impl MirrorInner {
    async fn apply_lands(self: &Arc<Self>, store: Arc<dyn DocumentStore>, event: SnapshotEvent) {
        let docs = match event {
            SnapshotEvent::Snapshot(docs) => docs,
            SnapshotEvent::Error(e) => {
                self.state.write().await.loading = false;
                self.alert(LANDS_COLLECTION, &e);
                return;
            }
        };

        let lands: Vec<ParkingLand> = decode_all(&docs, "id", LANDS_COLLECTION);
        let land_ids: HashSet<String> = lands.iter().map(|l| l.id.clone()).collect();

        // PHASE: REPLACE LANDS SLICE
        // Slot slices of lands that left the result go with it.
        let removed = {
            let mut state = self.state.write().await;
            state.lands = lands.clone();
            state.loading = false;
            state.initialized = true;
            let removed: Vec<String> = state
                .slots
                .keys()
                .filter(|id| !land_ids.contains(*id))
                .cloned()
                .collect();
            for land_id in &removed {
                state.slots.remove(land_id);
            }
            removed
        };
        debug!(count = lands.len(), "mirror: lands replaced");
        let _ = self.updates.send(MirrorUpdate::Lands(lands.clone()));
        for land_id in removed {
            let _ = self.updates.send(MirrorUpdate::SlotsRemoved { land_id });
        }

        // PHASE: RECONCILE SLOT QUERIES
        // Exactly one slot query per listed land, however many lands
        // snapshots arrive.
        let mut subs = self.subscriptions.lock().await;
        if !subs.started {
            return;
        }
        subs.slots.retain(|land_id, _| land_ids.contains(land_id));
        for land in &lands {
            if subs.slots.contains_key(&land.id) {
                continue;
            }
            let weak: Weak<Self> = Arc::downgrade(self);
            let land_id = land.id.clone();
            let query = Query::collection(slots_path(&land.id));
            let live = spawn_live_query(store.clone(), query, move |event| {
                let weak = weak.clone();
                let land_id = land_id.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.apply_slots(&land_id, event).await;
                    }
                }
            });
            subs.slots.insert(land.id.clone(), live);
            debug!(land_id = %land.id, "mirror: slot query started");
        }
    }

    async fn apply_slots(&self, land_id: &str, event: SnapshotEvent) {
        let path = slots_path(land_id);
        let docs = match event {
            SnapshotEvent::Snapshot(docs) => docs,
            SnapshotEvent::Error(e) => {
                self.alert(path.as_str(), &e);
                return;
            }
        };

        let slots: Vec<ParkingSlot> = decode_all(&docs, "id", path.as_str());
        {
            let mut state = self.state.write().await;
            // EDGE: a torn-down query may still deliver once.
            if !state.lands.iter().any(|l| l.id == land_id) {
                return;
            }
            state.slots.insert(land_id.to_owned(), slots.clone());
        }
        debug!(%land_id, count = slots.len(), "mirror: slots replaced");
        let _ = self
            .updates
            .send(MirrorUpdate::Slots { land_id: land_id.to_owned(), slots });
    }

    async fn apply_bookings(&self, event: SnapshotEvent) {
        let docs = match event {
            SnapshotEvent::Snapshot(docs) => docs,
            SnapshotEvent::Error(e) => {
                self.alert(BOOKINGS_COLLECTION, &e);
                return;
            }
        };
        let bookings: Vec<Booking> = decode_all(&docs, "id", BOOKINGS_COLLECTION);
        self.state.write().await.bookings = bookings.clone();
        debug!(count = bookings.len(), "mirror: bookings replaced");
        let _ = self.updates.send(MirrorUpdate::Bookings(bookings));
    }

    async fn apply_guards(&self, event: SnapshotEvent) {
        let docs = match event {
            SnapshotEvent::Snapshot(docs) => docs,
            SnapshotEvent::Error(e) => {
                self.alert(GUARDS_SLICE, &e);
                return;
            }
        };
        let guards: Vec<UserProfile> = decode_all(&docs, "uid", GUARDS_SLICE);
        self.state.write().await.guards = guards.clone();
        debug!(count = guards.len(), "mirror: guards replaced");
        let _ = self.updates.send(MirrorUpdate::Guards(guards));
    }

    fn alert(&self, collection: &str, error: &StoreError) {
        warn!(collection, error = %error, "mirror: live updates interrupted");
        let _ = self
            .updates
            .send(MirrorUpdate::Alert(SyncAlert::reconnect(collection, error)));
    }
}

/// Decode documents, skipping (and logging) any that don't fit the record.
fn decode_all<T: DeserializeOwned>(docs: &[Document], id_key: &str, collection: &str) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match doc.decode(id_key) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(collection, id = %doc.id, error = %e, "mirror: skipping undecodable document");
                None
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "mirror_test.rs"]
mod tests;
