//! Media-audio request broker.
//!
//! Cross-zone request/approve/reject protocol for routing a secondary-zone
//! occupant's media onto the primary zone. The broker owns the request
//! lifecycle and id space only; the actual routing mix is built outside the
//! core.
//!
//! Status machine: `Requested → {Approved, Rejected, Cancelled}`,
//! `Approved → {Stopped, Cancelled}`. Terminal requests leave the live set
//! and free their id, which is reused only after the counter wraps past the
//! configured maximum.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{CallbackResult, PolicyError, PolicyResult};
use crate::runtime::CallbackDispatcher;

/// Occupant zone identity (the occupant whose media is being routed).
pub type OccupantZoneId = u32;

/// Broker-allocated request identity.
pub type MediaRequestId = u64;

/// Lifecycle status of a media-audio request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaRequestStatus {
    /// Waiting for an approver.
    Requested,
    /// An approver accepted; media is routed to the primary zone.
    Approved,
    /// An approver (or the broker) rejected the request.
    Rejected,
    /// The requester withdrew.
    Cancelled,
    /// Approved routing was stopped.
    Stopped,
}

impl MediaRequestStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Stopped => "stopped",
        }
    }
}

/// Requester-side callback for status transitions.
pub trait MediaRequestClient: Send + Sync {
    /// Delivers a status transition for one of the client's requests.
    fn on_status_changed(&self, request_id: MediaRequestId, status: MediaRequestStatus)
        -> CallbackResult;
}

/// Approver-side callback receiving new requests.
pub trait MediaRequestApprover: Send + Sync {
    /// Announces a new request awaiting approval.
    fn on_media_request(
        &self,
        request_id: MediaRequestId,
        occupant: OccupantZoneId,
    ) -> CallbackResult;
}

struct MediaRequest {
    client_id: String,
    client: Arc<dyn MediaRequestClient>,
    occupant: OccupantZoneId,
    status: MediaRequestStatus,
}

struct BrokerState {
    next_id: MediaRequestId,
    requests: BTreeMap<MediaRequestId, MediaRequest>,
    approvers: Vec<(String, Arc<dyn MediaRequestApprover>)>,
}

/// The media-audio request broker.
pub struct MediaAudioRequestBroker {
    state: Mutex<BrokerState>,
    dispatcher: CallbackDispatcher,
    max_id: MediaRequestId,
    weak: Weak<MediaAudioRequestBroker>,
}

impl MediaAudioRequestBroker {
    /// Creates the broker with the given id-space maximum.
    pub fn new(dispatcher: CallbackDispatcher, max_id: MediaRequestId) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            state: Mutex::new(BrokerState {
                next_id: 0,
                requests: BTreeMap::new(),
                approvers: Vec::new(),
            }),
            dispatcher,
            max_id,
            weak: weak.clone(),
        })
    }

    /// Registers (or replaces) an approver.
    pub fn register_approver(&self, owner: impl Into<String>, approver: Arc<dyn MediaRequestApprover>) {
        let owner = owner.into();
        let mut state = self.state.lock();
        state.approvers.retain(|(existing, _)| *existing != owner);
        state.approvers.push((owner, approver));
    }

    /// Removes an approver.
    pub fn unregister_approver(&self, owner: &str) {
        self.state
            .lock()
            .approvers
            .retain(|(existing, _)| existing != owner);
    }

    /// Clears all approvers. Used at service release.
    pub fn clear_approvers(&self) {
        self.state.lock().approvers.clear();
    }

    /// Submits a request to route `occupant`'s media to the primary zone.
    ///
    /// The request is broadcast to every registered approver. If delivery
    /// fails to all of them (or none is registered) the request is rejected
    /// within the dispatch and the client notified.
    ///
    /// # Errors
    ///
    /// `PolicyError::RequestPending` when the client already has a live
    /// request, `PolicyError::IdsExhausted` when every id is in use.
    pub fn request(
        &self,
        client_id: impl Into<String>,
        client: Arc<dyn MediaRequestClient>,
        occupant: OccupantZoneId,
    ) -> PolicyResult<MediaRequestId> {
        let client_id = client_id.into();
        let (id, approvers) = {
            let mut state = self.state.lock();
            if state
                .requests
                .values()
                .any(|request| request.client_id == client_id)
            {
                return Err(PolicyError::RequestPending(client_id));
            }
            let id = Self::allocate_id(&mut state, self.max_id)?;
            state.requests.insert(
                id,
                MediaRequest {
                    client_id: client_id.clone(),
                    client,
                    occupant,
                    status: MediaRequestStatus::Requested,
                },
            );
            (id, state.approvers.clone())
        };
        log::info!(
            "[MediaRequestBroker] request {id}: occupant {occupant} by {client_id}"
        );

        let weak = self.weak.clone();
        self.dispatcher.dispatch(move || {
            let mut delivered = 0usize;
            for (owner, approver) in &approvers {
                match approver.on_media_request(id, occupant) {
                    Ok(()) => delivered += 1,
                    Err(err) => {
                        log::warn!(
                            "[MediaRequestBroker] approver {owner} unreachable for request {id}: {err}"
                        );
                    }
                }
            }
            if delivered == 0 {
                log::info!(
                    "[MediaRequestBroker] request {id}: no approver reachable, auto-rejecting"
                );
                if let Some(broker) = weak.upgrade() {
                    if let Err(err) = broker.reject(id) {
                        log::debug!("[MediaRequestBroker] auto-reject of {id} skipped: {err}");
                    }
                }
            }
        });

        Ok(id)
    }

    /// Approves a request.
    ///
    /// # Errors
    ///
    /// `UnknownRequest` for ids outside the live set,
    /// `InvalidRequestState` unless the request is `Requested`, and
    /// `OccupantAlreadyApproved` when the occupant already has approved
    /// media audio.
    pub fn accept(&self, approver: &str, request_id: MediaRequestId) -> PolicyResult<()> {
        let notification = {
            let mut state = self.state.lock();
            let occupant = state
                .requests
                .get(&request_id)
                .ok_or(PolicyError::UnknownRequest(request_id))?
                .occupant;
            let occupant_taken = state.requests.iter().any(|(id, request)| {
                *id != request_id
                    && request.status == MediaRequestStatus::Approved
                    && request.occupant == occupant
            });
            if occupant_taken {
                return Err(PolicyError::OccupantAlreadyApproved(occupant));
            }
            let request = state
                .requests
                .get_mut(&request_id)
                .ok_or(PolicyError::UnknownRequest(request_id))?;
            if request.status != MediaRequestStatus::Requested {
                return Err(PolicyError::InvalidRequestState {
                    id: request_id,
                    status: request.status.as_str().to_string(),
                });
            }
            request.status = MediaRequestStatus::Approved;
            log::info!(
                "[MediaRequestBroker] request {request_id} approved by {approver}"
            );
            (Arc::clone(&request.client), MediaRequestStatus::Approved)
        };
        self.notify(request_id, notification.0, notification.1);
        Ok(())
    }

    /// Rejects a pending request.
    ///
    /// # Errors
    ///
    /// `UnknownRequest` or `InvalidRequestState` unless `Requested`.
    pub fn reject(&self, request_id: MediaRequestId) -> PolicyResult<()> {
        self.finish(request_id, MediaRequestStatus::Rejected, |status| {
            status == MediaRequestStatus::Requested
        })
    }

    /// Cancels a pending or approved request (requester initiated).
    ///
    /// # Errors
    ///
    /// `UnknownRequest` or `InvalidRequestState` unless `Requested` or
    /// `Approved`.
    pub fn cancel(&self, request_id: MediaRequestId) -> PolicyResult<()> {
        self.finish(request_id, MediaRequestStatus::Cancelled, |status| {
            matches!(
                status,
                MediaRequestStatus::Requested | MediaRequestStatus::Approved
            )
        })
    }

    /// Stops an approved routing.
    ///
    /// # Errors
    ///
    /// `UnknownRequest` or `InvalidRequestState` unless `Approved`.
    pub fn stop(&self, request_id: MediaRequestId) -> PolicyResult<()> {
        self.finish(request_id, MediaRequestStatus::Stopped, |status| {
            status == MediaRequestStatus::Approved
        })
    }

    /// Whether an occupant currently has approved media audio.
    #[must_use]
    pub fn is_occupant_approved(&self, occupant: OccupantZoneId) -> bool {
        self.state.lock().requests.values().any(|request| {
            request.occupant == occupant && request.status == MediaRequestStatus::Approved
        })
    }

    /// Live request ids, in ascending order.
    #[must_use]
    pub fn live_request_ids(&self) -> Vec<MediaRequestId> {
        self.state.lock().requests.keys().copied().collect()
    }

    fn finish(
        &self,
        request_id: MediaRequestId,
        target: MediaRequestStatus,
        allowed: impl Fn(MediaRequestStatus) -> bool,
    ) -> PolicyResult<()> {
        let (client, status) = {
            let mut state = self.state.lock();
            let request = state
                .requests
                .get(&request_id)
                .ok_or(PolicyError::UnknownRequest(request_id))?;
            if !allowed(request.status) {
                return Err(PolicyError::InvalidRequestState {
                    id: request_id,
                    status: request.status.as_str().to_string(),
                });
            }
            // Terminal: drop from the live set, freeing the id.
            let request = state
                .requests
                .remove(&request_id)
                .unwrap_or_else(|| unreachable!("checked above"));
            (request.client, target)
        };
        log::info!(
            "[MediaRequestBroker] request {request_id} -> {}",
            status.as_str()
        );
        self.notify(request_id, client, status);
        Ok(())
    }

    fn notify(
        &self,
        request_id: MediaRequestId,
        client: Arc<dyn MediaRequestClient>,
        status: MediaRequestStatus,
    ) {
        self.dispatcher.dispatch(move || {
            if let Err(err) = client.on_status_changed(request_id, status) {
                log::warn!(
                    "[MediaRequestBroker] status callback for request {request_id} failed: {err}"
                );
            }
        });
    }

    /// Allocates the next free id: monotone, skipping live ids, wrapping to
    /// zero past the maximum.
    fn allocate_id(
        state: &mut BrokerState,
        max_id: MediaRequestId,
    ) -> PolicyResult<MediaRequestId> {
        if state.requests.len() as u64 > max_id {
            return Err(PolicyError::IdsExhausted);
        }
        loop {
            let id = state.next_id;
            state.next_id = if id >= max_id { 0 } else { id + 1 };
            if !state.requests.contains_key(&id) {
                return Ok(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallbackError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestClient {
        statuses: Mutex<Vec<(MediaRequestId, MediaRequestStatus)>>,
    }

    impl TestClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(Vec::new()),
            })
        }

        fn last(&self) -> Option<(MediaRequestId, MediaRequestStatus)> {
            self.statuses.lock().last().copied()
        }
    }

    impl MediaRequestClient for TestClient {
        fn on_status_changed(
            &self,
            request_id: MediaRequestId,
            status: MediaRequestStatus,
        ) -> CallbackResult {
            self.statuses.lock().push((request_id, status));
            Ok(())
        }
    }

    struct TestApprover {
        seen: AtomicUsize,
        fail: AtomicBool,
    }

    impl TestApprover {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                seen: AtomicUsize::new(0),
                fail: AtomicBool::new(fail),
            })
        }
    }

    impl MediaRequestApprover for TestApprover {
        fn on_media_request(
            &self,
            _request_id: MediaRequestId,
            _occupant: OccupantZoneId,
        ) -> CallbackResult {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CallbackError::Disconnected);
            }
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn broker() -> Arc<MediaAudioRequestBroker> {
        MediaAudioRequestBroker::new(CallbackDispatcher::inline("broker-test"), u64::from(u32::MAX))
    }

    #[test]
    fn request_approve_stop_lifecycle() {
        let broker = broker();
        let approver = TestApprover::new(false);
        broker.register_approver("driver-hmi", Arc::clone(&approver) as Arc<dyn MediaRequestApprover>);
        let client = TestClient::new();

        let id = broker
            .request("occupant-app", Arc::clone(&client) as Arc<dyn MediaRequestClient>, 2)
            .unwrap();
        assert_eq!(approver.seen.load(Ordering::SeqCst), 1);

        broker.accept("driver-hmi", id).unwrap();
        assert_eq!(client.last(), Some((id, MediaRequestStatus::Approved)));
        assert!(broker.is_occupant_approved(2));

        broker.stop(id).unwrap();
        assert_eq!(client.last(), Some((id, MediaRequestStatus::Stopped)));
        assert!(!broker.is_occupant_approved(2));
        assert!(broker.live_request_ids().is_empty());
    }

    #[test]
    fn no_reachable_approver_auto_rejects() {
        let broker = broker();
        let approver = TestApprover::new(true);
        broker.register_approver("dead", Arc::clone(&approver) as Arc<dyn MediaRequestApprover>);
        let client = TestClient::new();

        let id = broker
            .request("occupant-app", Arc::clone(&client) as Arc<dyn MediaRequestClient>, 2)
            .unwrap();

        assert_eq!(client.last(), Some((id, MediaRequestStatus::Rejected)));
        assert!(broker.live_request_ids().is_empty());
    }

    #[test]
    fn one_outstanding_request_per_client() {
        let broker = broker();
        broker.register_approver(
            "driver-hmi",
            TestApprover::new(false) as Arc<dyn MediaRequestApprover>,
        );
        let client = TestClient::new();

        broker
            .request("occupant-app", Arc::clone(&client) as Arc<dyn MediaRequestClient>, 2)
            .unwrap();
        let second = broker.request(
            "occupant-app",
            Arc::clone(&client) as Arc<dyn MediaRequestClient>,
            3,
        );

        assert!(matches!(second, Err(PolicyError::RequestPending(_))));
    }

    #[test]
    fn one_approved_request_per_occupant() {
        let broker = broker();
        broker.register_approver(
            "driver-hmi",
            TestApprover::new(false) as Arc<dyn MediaRequestApprover>,
        );

        let first = broker
            .request("app-a", TestClient::new() as Arc<dyn MediaRequestClient>, 2)
            .unwrap();
        let second = broker
            .request("app-b", TestClient::new() as Arc<dyn MediaRequestClient>, 2)
            .unwrap();

        broker.accept("driver-hmi", first).unwrap();
        let result = broker.accept("driver-hmi", second);

        assert!(matches!(
            result,
            Err(PolicyError::OccupantAlreadyApproved(2))
        ));
    }

    #[test]
    fn status_transitions_are_enforced() {
        let broker = broker();
        broker.register_approver(
            "driver-hmi",
            TestApprover::new(false) as Arc<dyn MediaRequestApprover>,
        );
        let client = TestClient::new();

        let id = broker
            .request("app", Arc::clone(&client) as Arc<dyn MediaRequestClient>, 2)
            .unwrap();

        // Stop before approval is invalid.
        assert!(matches!(
            broker.stop(id),
            Err(PolicyError::InvalidRequestState { .. })
        ));

        broker.accept("driver-hmi", id).unwrap();
        // Reject after approval is invalid; cancel is fine.
        assert!(matches!(
            broker.reject(id),
            Err(PolicyError::InvalidRequestState { .. })
        ));
        broker.cancel(id).unwrap();
        assert_eq!(client.last(), Some((id, MediaRequestStatus::Cancelled)));
    }

    #[test]
    fn unknown_request_is_an_error() {
        let broker = broker();
        assert!(matches!(
            broker.accept("x", 99),
            Err(PolicyError::UnknownRequest(99))
        ));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Id allocation
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn ids_are_monotone_and_unique_within_live_set() {
        let broker = MediaAudioRequestBroker::new(CallbackDispatcher::inline("t"), 1000);
        broker.register_approver(
            "a",
            TestApprover::new(false) as Arc<dyn MediaRequestApprover>,
        );

        let mut ids = Vec::new();
        for n in 0..8 {
            let id = broker
                .request(
                    format!("client-{n}"),
                    TestClient::new() as Arc<dyn MediaRequestClient>,
                    n,
                )
                .unwrap();
            ids.push(id);
        }
        assert_eq!(ids, (0..8).collect::<Vec<u64>>());

        let mut unique = ids.clone();
        unique.dedup();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn freed_ids_are_reused_only_after_wraparound() {
        // Tiny id space: 0..=2.
        let broker = MediaAudioRequestBroker::new(CallbackDispatcher::inline("t"), 2);
        broker.register_approver(
            "a",
            TestApprover::new(false) as Arc<dyn MediaRequestApprover>,
        );

        let first = broker
            .request("c0", TestClient::new() as Arc<dyn MediaRequestClient>, 0)
            .unwrap();
        assert_eq!(first, 0);
        broker.reject(first).unwrap(); // id 0 freed immediately

        // The counter keeps climbing instead of reusing 0.
        let second = broker
            .request("c1", TestClient::new() as Arc<dyn MediaRequestClient>, 1)
            .unwrap();
        assert_eq!(second, 1);
        let third = broker
            .request("c2", TestClient::new() as Arc<dyn MediaRequestClient>, 2)
            .unwrap();
        assert_eq!(third, 2);

        // Wraparound: 0 is free again and gets reused; 1 and 2 are live
        // and skipped.
        let fourth = broker
            .request("c3", TestClient::new() as Arc<dyn MediaRequestClient>, 3)
            .unwrap();
        assert_eq!(fourth, 0);

        // Every id live now: allocation fails.
        let fifth = broker.request("c4", TestClient::new() as Arc<dyn MediaRequestClient>, 4);
        assert!(matches!(fifth, Err(PolicyError::IdsExhausted)));
    }
}
