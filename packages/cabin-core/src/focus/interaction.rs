//! The focus interaction matrix.
//!
//! A 13×13 table mapping `(holder context, requester context)` to the
//! arbitration outcome. The table is fixed at construction; the single
//! runtime-mutable cell is `(Call, Navigation)`, driven by the
//! reject-navigation-during-call user setting.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::context::{AudioContext, CONTEXT_COUNT};

/// Outcome of one holder/requester context pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    /// The requester is refused outright.
    Reject,
    /// The holder loses focus to the requester.
    Exclusive,
    /// Holder and requester may play together (the holder may be ducked).
    Concurrent,
}

const R: Interaction = Interaction::Reject;
const E: Interaction = Interaction::Exclusive;
const C: Interaction = Interaction::Concurrent;

/// Rows are holder contexts, columns requester contexts, both in
/// [`crate::context::ALL_CONTEXTS`] order:
/// invalid, music, navigation, voice command, call ring, call, alarm,
/// notification, system sound, emergency, safety, vehicle status,
/// announcement.
///
/// The invalid row doubles as the empty-holder row: a zone with no holders
/// admits every context except invalid.
const MATRIX: [[Interaction; CONTEXT_COUNT]; CONTEXT_COUNT] = [
    // INVALID (virtual empty-holder row)
    [R, C, C, C, C, C, C, C, C, C, C, C, C],
    // MUSIC
    [R, E, C, E, E, E, E, C, C, E, C, C, E],
    // NAVIGATION
    [R, C, C, E, C, E, C, C, C, E, C, C, C],
    // VOICE_COMMAND
    [R, E, R, C, E, E, R, R, C, E, C, R, R],
    // CALL_RING
    [R, R, C, C, C, C, R, R, C, E, C, R, R],
    // CALL
    [R, R, C, R, C, C, C, C, C, E, C, C, R],
    // ALARM
    [R, C, C, E, E, E, C, C, C, E, C, C, R],
    // NOTIFICATION
    [R, C, C, E, E, E, C, C, C, E, C, C, C],
    // SYSTEM_SOUND
    [R, C, C, E, E, E, C, C, C, E, C, C, C],
    // EMERGENCY
    [R, E, E, E, E, C, E, E, E, C, C, E, E],
    // SAFETY
    [R, C, C, C, C, C, C, C, C, C, C, C, C],
    // VEHICLE_STATUS
    [R, C, C, C, C, C, C, C, C, E, C, C, C],
    // ANNOUNCEMENT
    [R, E, C, E, E, E, C, C, C, E, C, C, E],
];

/// The process-wide interaction matrix.
pub struct InteractionMatrix {
    reject_nav_on_call: AtomicBool,
}

impl InteractionMatrix {
    /// Creates the matrix with the initial state of the
    /// reject-navigation-during-call setting.
    #[must_use]
    pub fn new(reject_nav_on_call: bool) -> Self {
        Self {
            reject_nav_on_call: AtomicBool::new(reject_nav_on_call),
        }
    }

    /// Updates the reject-navigation-during-call setting.
    pub fn set_reject_navigation_on_call(&self, reject: bool) {
        self.reject_nav_on_call.store(reject, Ordering::SeqCst);
    }

    /// Current state of the reject-navigation-during-call setting.
    #[must_use]
    pub fn reject_navigation_on_call(&self) -> bool {
        self.reject_nav_on_call.load(Ordering::SeqCst)
    }

    /// Looks up the interaction for a holder/requester pairing.
    #[must_use]
    pub fn interaction(&self, holder: AudioContext, requester: AudioContext) -> Interaction {
        if holder == AudioContext::Call
            && requester == AudioContext::Navigation
            && self.reject_nav_on_call.load(Ordering::SeqCst)
        {
            return Interaction::Reject;
        }
        MATRIX[holder.index()][requester.index()]
    }
}

impl Default for InteractionMatrix {
    fn default() -> Self {
        Self::new(false)
    }
}
