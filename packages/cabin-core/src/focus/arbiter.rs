//! Per-zone focus arbitration.
//!
//! Responsibilities:
//! - Evaluating requests against the interaction matrix and current holders
//! - Applying losses and ducks, tracking the single delayed request
//! - Re-evaluating on release (duck promotion, delayed grant)
//! - Forwarding holder snapshots to passive observers
//!
//! All evaluation happens under one mutex per zone; callbacks and observer
//! notifications are collected under the lock and delivered afterwards on
//! the zone's serial dispatcher, so per-zone notification order matches
//! commit order and no lock is ever held across a remote call.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::context::{AudioContext, ContextMap};
use crate::focus::entry::{EntryState, FocusEntry};
use crate::focus::interaction::{Interaction, InteractionMatrix};
use crate::focus::{
    FocusChange, FocusClient, FocusHolderInfo, FocusObserver, FocusRequest, FocusRequestResult,
    FocusSnapshot,
};
use crate::runtime::CallbackDispatcher;
use crate::zone::{ZoneId, ZoneRegistry};

/// A pending client callback: receiver, signal, client id.
type Notification = (Arc<dyn FocusClient>, FocusChange, String);

/// Outcome of evaluating a request against the holders.
enum Decision {
    Reject,
    Grant {
        to_lose: Vec<String>,
        to_duck: Vec<String>,
    },
}

struct ZoneFocusState {
    holders: Vec<FocusEntry>,
    delayed: Option<FocusEntry>,
}

/// The focus state machine of one zone.
pub struct ZoneFocusArbiter {
    zone_id: ZoneId,
    matrix: Arc<InteractionMatrix>,
    state: Mutex<ZoneFocusState>,
    observers: RwLock<Vec<Arc<dyn FocusObserver>>>,
    dispatcher: CallbackDispatcher,
    weak: Weak<ZoneFocusArbiter>,
}

impl ZoneFocusArbiter {
    /// Creates the arbiter for a zone.
    pub fn new(
        zone_id: ZoneId,
        matrix: Arc<InteractionMatrix>,
        dispatcher: CallbackDispatcher,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            zone_id,
            matrix,
            state: Mutex::new(ZoneFocusState {
                holders: Vec::new(),
                delayed: None,
            }),
            observers: RwLock::new(Vec::new()),
            dispatcher,
            weak: weak.clone(),
        })
    }

    /// Zone this arbiter serves.
    #[must_use]
    pub fn zone_id(&self) -> ZoneId {
        self.zone_id
    }

    /// Registers a passive snapshot observer.
    pub fn register_observer(&self, observer: Arc<dyn FocusObserver>) {
        self.observers.write().push(observer);
    }

    /// Current holders, including ducked ones.
    #[must_use]
    pub fn holders(&self) -> Vec<FocusHolderInfo> {
        Self::snapshot_of(self.zone_id, &self.state.lock()).holders
    }

    /// Client id of the parked delayed request, if any.
    #[must_use]
    pub fn delayed_client(&self) -> Option<String> {
        self.state
            .lock()
            .delayed
            .as_ref()
            .map(|entry| entry.client_id().to_string())
    }

    /// Submits a focus request.
    ///
    /// A repeated request from a current holder with identical parameters
    /// is idempotent: the current status is re-sent and the holder set is
    /// unchanged.
    pub fn request(
        &self,
        context: AudioContext,
        request: FocusRequest,
        client: Arc<dyn FocusClient>,
    ) -> FocusRequestResult {
        let mut notifications: Vec<Notification> = Vec::new();
        let mut snapshot: Option<FocusSnapshot> = None;
        let result = {
            let mut state = self.state.lock();
            self.handle_request(
                &mut state,
                context,
                request,
                client,
                &mut notifications,
                &mut snapshot,
            )
        };
        self.flush(notifications, snapshot);
        result
    }

    /// Releases a client's focus stake (holder or delayed request).
    ///
    /// Unknown client ids are ignored: abandon is idempotent and races
    /// harmlessly with a loss already in flight.
    pub fn abandon(&self, client_id: &str) {
        let mut notifications: Vec<Notification> = Vec::new();
        let mut snapshot: Option<FocusSnapshot> = None;
        {
            let mut state = self.state.lock();
            if state
                .delayed
                .as_ref()
                .is_some_and(|entry| entry.client_id() == client_id)
            {
                state.delayed = None;
                log::debug!(
                    "[FocusArbiter] zone {}: delayed request {client_id} abandoned",
                    self.zone_id
                );
            } else if let Some(position) = state
                .holders
                .iter()
                .position(|entry| entry.client_id() == client_id)
            {
                state.holders.remove(position);
                self.settle_after_release(&mut state, &mut notifications);
                snapshot = Some(Self::snapshot_of(self.zone_id, &state));
            } else {
                log::debug!(
                    "[FocusArbiter] zone {}: abandon from non-holder {client_id}",
                    self.zone_id
                );
            }
        }
        self.flush(notifications, snapshot);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Evaluation
    // ─────────────────────────────────────────────────────────────────────

    fn handle_request(
        &self,
        state: &mut ZoneFocusState,
        context: AudioContext,
        request: FocusRequest,
        client: Arc<dyn FocusClient>,
        notifications: &mut Vec<Notification>,
        snapshot: &mut Option<FocusSnapshot>,
    ) -> FocusRequestResult {
        if let Some(position) = state
            .holders
            .iter()
            .position(|entry| entry.client_id() == request.client_id)
        {
            let holder = &state.holders[position];
            if holder.request == request {
                // Idempotent duplicate: re-send the current status.
                let current = match holder.state {
                    EntryState::Ducked => FocusChange::LossTransientCanDuck,
                    _ => FocusChange::Gain,
                };
                notifications.push((
                    Arc::clone(&holder.client),
                    current,
                    request.client_id.clone(),
                ));
                log::debug!(
                    "[FocusArbiter] zone {}: duplicate request from {}, re-sent status",
                    self.zone_id,
                    request.client_id
                );
                return FocusRequestResult::Granted;
            }
            // Changed parameters: evaluate with the caller's entry excluded;
            // the old entry survives a failed re-request.
            let exclude = Some(request.client_id.clone());
            return self.evaluate_and_apply(
                state,
                context,
                request,
                client,
                exclude,
                notifications,
                snapshot,
            );
        }

        if let Some(delayed) = &state.delayed {
            if delayed.client_id() == request.client_id && delayed.request == request {
                return FocusRequestResult::Delayed;
            }
        }

        self.evaluate_and_apply(state, context, request, client, None, notifications, snapshot)
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_and_apply(
        &self,
        state: &mut ZoneFocusState,
        context: AudioContext,
        request: FocusRequest,
        client: Arc<dyn FocusClient>,
        exclude: Option<String>,
        notifications: &mut Vec<Notification>,
        snapshot: &mut Option<FocusSnapshot>,
    ) -> FocusRequestResult {
        match self.evaluate(state, context, &request, exclude.as_deref()) {
            Decision::Reject => {
                if request.allows_delayed {
                    if let Some(previous) = state.delayed.take() {
                        log::info!(
                            "[FocusArbiter] zone {}: delayed request {} displaced by {}",
                            self.zone_id,
                            previous.client_id(),
                            request.client_id
                        );
                        notifications.push((
                            Arc::clone(&previous.client),
                            FocusChange::Failed,
                            previous.client_id().to_string(),
                        ));
                    }
                    state.delayed = Some(FocusEntry::new(
                        request,
                        context,
                        client,
                        EntryState::Delayed,
                    ));
                    FocusRequestResult::Delayed
                } else {
                    FocusRequestResult::Failed
                }
            }
            Decision::Grant { to_lose, to_duck } => {
                if let Some(exclude_id) = exclude {
                    state.holders.retain(|entry| entry.client_id() != exclude_id);
                }
                let entry = FocusEntry::new(request, context, client, EntryState::Held);
                self.apply_grant(state, to_lose, to_duck, entry, None, notifications);
                *snapshot = Some(Self::snapshot_of(self.zone_id, state));
                FocusRequestResult::Granted
            }
        }
    }

    /// Evaluates a request against the holders (optionally excluding the
    /// requester's own entry). A single reject outranks any exclusive or
    /// concurrent interaction; holders are scanned in insertion order.
    fn evaluate(
        &self,
        state: &ZoneFocusState,
        context: AudioContext,
        request: &FocusRequest,
        exclude: Option<&str>,
    ) -> Decision {
        let mut considered = state
            .holders
            .iter()
            .filter(|entry| exclude != Some(entry.client_id()))
            .peekable();

        if considered.peek().is_none() {
            // Empty zone: the virtual invalid-holder row decides.
            return match self
                .matrix
                .interaction(AudioContext::Invalid, context)
            {
                Interaction::Reject => Decision::Reject,
                Interaction::Exclusive | Interaction::Concurrent => Decision::Grant {
                    to_lose: Vec::new(),
                    to_duck: Vec::new(),
                },
            };
        }

        let mut to_lose = Vec::new();
        let mut to_duck = Vec::new();
        for holder in considered {
            match self.matrix.interaction(holder.context, context) {
                Interaction::Reject => return Decision::Reject,
                Interaction::Exclusive => to_lose.push(holder.client_id().to_string()),
                Interaction::Concurrent => {
                    if holder.duckable_by(request) {
                        to_duck.push(holder.client_id().to_string());
                    } else {
                        to_lose.push(holder.client_id().to_string());
                    }
                }
            }
        }
        Decision::Grant { to_lose, to_duck }
    }

    /// Applies a grant: evicts losers, ducks concurrents, inserts the
    /// winner. `grant_signal` carries the Gain callback for a promoted
    /// delayed request; direct grants signal through the return value.
    fn apply_grant(
        &self,
        state: &mut ZoneFocusState,
        to_lose: Vec<String>,
        to_duck: Vec<String>,
        entry: FocusEntry,
        grant_signal: Option<FocusChange>,
        notifications: &mut Vec<Notification>,
    ) {
        let loss = if entry.request.gain_type.is_transient() {
            FocusChange::LossTransient
        } else {
            FocusChange::Loss
        };
        for client_id in to_lose {
            if let Some(position) = state
                .holders
                .iter()
                .position(|holder| holder.client_id() == client_id)
            {
                let mut lost = state.holders.remove(position);
                lost.state = EntryState::TransientLost;
                notifications.push((Arc::clone(&lost.client), loss, client_id));
            }
        }
        for client_id in to_duck {
            if let Some(holder) = state
                .holders
                .iter_mut()
                .find(|holder| holder.client_id() == client_id)
            {
                if holder.state != EntryState::Ducked {
                    holder.state = EntryState::Ducked;
                    notifications.push((
                        Arc::clone(&holder.client),
                        FocusChange::LossTransientCanDuck,
                        client_id,
                    ));
                }
            }
        }
        if let Some(signal) = grant_signal {
            notifications.push((
                Arc::clone(&entry.client),
                signal,
                entry.client_id().to_string(),
            ));
        }
        state.holders.push(entry);
    }

    /// Post-release settlement: promote ducked holders that nothing ducks
    /// anymore, then re-evaluate the delayed request exactly once.
    fn settle_after_release(
        &self,
        state: &mut ZoneFocusState,
        notifications: &mut Vec<Notification>,
    ) {
        let promote: Vec<String> = state
            .holders
            .iter()
            .filter(|entry| entry.state == EntryState::Ducked)
            .filter(|entry| {
                !state.holders.iter().any(|other| {
                    other.client_id() != entry.client_id()
                        && self.matrix.interaction(entry.context, other.context)
                            == Interaction::Concurrent
                        && entry.duckable_by(&other.request)
                })
            })
            .map(|entry| entry.client_id().to_string())
            .collect();
        for client_id in promote {
            if let Some(holder) = state
                .holders
                .iter_mut()
                .find(|holder| holder.client_id() == client_id)
            {
                holder.state = EntryState::Held;
                notifications.push((Arc::clone(&holder.client), FocusChange::Gain, client_id));
            }
        }

        if let Some(delayed) = state.delayed.take() {
            match self.evaluate(state, delayed.context, &delayed.request, None) {
                Decision::Grant { to_lose, to_duck } => {
                    log::info!(
                        "[FocusArbiter] zone {}: delayed request {} granted",
                        self.zone_id,
                        delayed.client_id()
                    );
                    let mut entry = delayed;
                    entry.state = EntryState::Held;
                    self.apply_grant(
                        state,
                        to_lose,
                        to_duck,
                        entry,
                        Some(FocusChange::Gain),
                        notifications,
                    );
                }
                Decision::Reject => {
                    state.delayed = Some(delayed);
                }
            }
        }
    }

    fn snapshot_of(zone_id: ZoneId, state: &ZoneFocusState) -> FocusSnapshot {
        FocusSnapshot {
            zone_id,
            holders: state
                .holders
                .iter()
                .map(|entry| FocusHolderInfo {
                    client_id: entry.client_id().to_string(),
                    usage: entry.request.usage,
                    context: entry.context,
                    ducked: entry.state == EntryState::Ducked,
                })
                .collect(),
        }
    }

    /// Delivers collected notifications and the observer snapshot on the
    /// zone dispatcher. A failed client callback is treated as an implicit
    /// abandon, re-entering the arbiter without any lock held.
    fn flush(&self, notifications: Vec<Notification>, snapshot: Option<FocusSnapshot>) {
        if notifications.is_empty() && snapshot.is_none() {
            return;
        }
        let observers: Vec<Arc<dyn FocusObserver>> = if snapshot.is_some() {
            self.observers.read().clone()
        } else {
            Vec::new()
        };
        let weak = self.weak.clone();
        let zone_id = self.zone_id;
        self.dispatcher.dispatch(move || {
            for (client, change, client_id) in notifications {
                if let Err(err) = client.on_focus_changed(change) {
                    log::warn!(
                        "[FocusArbiter] zone {zone_id}: callback to {client_id} failed ({err}); treating as abandon"
                    );
                    if let Some(arbiter) = weak.upgrade() {
                        arbiter.abandon(&client_id);
                    }
                }
            }
            if let Some(snapshot) = snapshot {
                for observer in &observers {
                    observer.on_focus_holders_changed(&snapshot);
                }
            }
        });
    }
}

/// Per-zone router owning one arbiter per configured zone.
pub struct FocusArbiter {
    zones: BTreeMap<ZoneId, Arc<ZoneFocusArbiter>>,
    context_map: Arc<ContextMap>,
    matrix: Arc<InteractionMatrix>,
}

impl FocusArbiter {
    /// Creates one zone arbiter per registry zone.
    pub fn new(
        registry: &ZoneRegistry,
        context_map: Arc<ContextMap>,
        matrix: Arc<InteractionMatrix>,
        mut make_dispatcher: impl FnMut(ZoneId) -> CallbackDispatcher,
    ) -> Self {
        let zones = registry
            .zones()
            .map(|zone| {
                let zone_id = zone.zone_id();
                (
                    zone_id,
                    ZoneFocusArbiter::new(zone_id, Arc::clone(&matrix), make_dispatcher(zone_id)),
                )
            })
            .collect();
        Self {
            zones,
            context_map,
            matrix,
        }
    }

    /// Submits a focus request for its zone.
    ///
    /// # Panics
    ///
    /// Panics on an unknown zone id; routing a request to a zone that was
    /// never configured is a programmer error, not a recoverable fault.
    pub fn request_focus(
        &self,
        request: FocusRequest,
        client: Arc<dyn FocusClient>,
    ) -> FocusRequestResult {
        let context = self.context_map.context_for_usage(request.usage);
        self.zone_arbiter(request.zone_id)
            .request(context, request, client)
    }

    /// Releases a client's focus stake in a zone.
    ///
    /// # Panics
    ///
    /// Panics on an unknown zone id.
    pub fn abandon_focus(&self, zone_id: ZoneId, client_id: &str) {
        self.zone_arbiter(zone_id).abandon(client_id);
    }

    /// Registers an observer on every zone arbiter.
    pub fn register_observer(&self, observer: Arc<dyn FocusObserver>) {
        for arbiter in self.zones.values() {
            arbiter.register_observer(Arc::clone(&observer));
        }
    }

    /// Holder snapshot of one zone.
    ///
    /// # Panics
    ///
    /// Panics on an unknown zone id.
    #[must_use]
    pub fn holders(&self, zone_id: ZoneId) -> Vec<FocusHolderInfo> {
        self.zone_arbiter(zone_id).holders()
    }

    /// Whether a zone id has an arbiter.
    #[must_use]
    pub fn has_zone(&self, zone_id: ZoneId) -> bool {
        self.zones.contains_key(&zone_id)
    }

    /// The process-wide interaction matrix.
    #[must_use]
    pub fn matrix(&self) -> &Arc<InteractionMatrix> {
        &self.matrix
    }

    fn zone_arbiter(&self, zone_id: ZoneId) -> &Arc<ZoneFocusArbiter> {
        self.zones
            .get(&zone_id)
            .unwrap_or_else(|| panic!("focus operation for unknown zone {zone_id}"))
    }
}
