//! Focus entries: one client's stake in a zone's focus.

use std::sync::Arc;

use crate::context::AudioContext;
use crate::focus::{FocusClient, FocusRequest};

/// Lifecycle state of a focus entry.
///
/// `TransientLost` is transitional: it is set just before the loss callback
/// is delivered and the entry is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    /// Holding focus at full gain.
    Held,
    /// Holding focus, ducked under a concurrent winner.
    Ducked,
    /// Waiting in the zone's delayed slot.
    Delayed,
    /// Lost focus; about to be removed.
    TransientLost,
}

/// One client's focus stake, exclusively owned by its zone's arbiter.
pub(crate) struct FocusEntry {
    pub(crate) request: FocusRequest,
    pub(crate) context: AudioContext,
    pub(crate) client: Arc<dyn FocusClient>,
    pub(crate) state: EntryState,
}

impl FocusEntry {
    pub(crate) fn new(
        request: FocusRequest,
        context: AudioContext,
        client: Arc<dyn FocusClient>,
        state: EntryState,
    ) -> Self {
        Self {
            request,
            context,
            client,
            state,
        }
    }

    pub(crate) fn client_id(&self) -> &str {
        &self.request.client_id
    }

    /// Whether `winner` ducks this entry rather than evicting it.
    ///
    /// A concurrent winner ducks a holder only when the winner permits
    /// ducking and the holder neither pauses on duck nor consumes duck
    /// events itself.
    pub(crate) fn duckable_by(&self, winner: &FocusRequest) -> bool {
        winner.gain_type.may_duck()
            && winner.allows_ducking
            && !self.request.pauses_on_duck
            && !self.request.accepts_duck_events
    }
}
