//! Focus arbitration.
//!
//! This module provides:
//! - [`FocusRequest`] / [`FocusRequestResult`] / [`FocusChange`], the client
//!   protocol
//! - [`InteractionMatrix`], the tri-valued policy table
//! - [`ZoneFocusArbiter`], the per-zone state machine
//! - [`FocusArbiter`], the per-zone router owning one arbiter per zone
//!
//! Arbitration is strictly per zone; cross-zone flows go through the
//! media-audio request broker, never through the arbiters.

mod arbiter;
mod entry;
mod interaction;

pub use arbiter::{FocusArbiter, ZoneFocusArbiter};
pub use interaction::{Interaction, InteractionMatrix};

use serde::{Deserialize, Serialize};

use crate::context::{AudioContext, AudioUsage};
use crate::error::CallbackResult;
use crate::zone::ZoneId;

/// How a client wants to hold focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusGainType {
    /// Permanent gain; evicted holders get a permanent loss.
    Gain,
    /// Short-lived gain; evicted holders get a transient loss.
    Transient,
    /// Short-lived gain that prefers ducking concurrent holders.
    TransientMayDuck,
    /// Short-lived gain that demands silence from everyone else.
    TransientExclusive,
}

impl FocusGainType {
    /// Whether losses caused by this request are transient.
    #[must_use]
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::Gain)
    }

    /// Whether this request permits concurrent holders to be ducked
    /// instead of evicted.
    #[must_use]
    pub fn may_duck(self) -> bool {
        matches!(self, Self::TransientMayDuck)
    }
}

/// Signal delivered to a client's focus listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusChange {
    /// Focus (re)gained at full gain.
    Gain,
    /// Focus lost permanently.
    Loss,
    /// Focus lost until the winner releases.
    LossTransient,
    /// Focus kept, but the client should duck.
    LossTransientCanDuck,
    /// A delayed request was displaced or can never be granted.
    Failed,
}

/// Synchronous outcome of a focus request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusRequestResult {
    /// The requester is now a holder.
    Granted,
    /// The request was refused.
    Failed,
    /// The request is parked in the zone's delayed slot.
    Delayed,
}

/// A focus request as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusRequest {
    /// Stable client identity; one entry per client per zone.
    pub client_id: String,
    /// Zone the request targets.
    pub zone_id: ZoneId,
    /// Usage of the stream that wants focus.
    pub usage: AudioUsage,
    /// Grant semantics.
    pub gain_type: FocusGainType,
    /// Whether the client accepts a delayed grant instead of a failure.
    pub allows_delayed: bool,
    /// Whether the client consumes duck events itself (hardware ducking).
    pub accepts_duck_events: bool,
    /// Whether the client pauses instead of ducking and must lose focus
    /// rather than be ducked.
    pub pauses_on_duck: bool,
    /// Whether the client permits concurrent holders to be ducked on its
    /// behalf.
    pub allows_ducking: bool,
}

impl FocusRequest {
    /// Creates a request with default flags: no delayed grant, no duck
    /// events, duck rather than pause, ducking permitted.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        zone_id: ZoneId,
        usage: AudioUsage,
        gain_type: FocusGainType,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            zone_id,
            usage,
            gain_type,
            allows_delayed: false,
            accepts_duck_events: false,
            pauses_on_duck: false,
            allows_ducking: true,
        }
    }
}

/// The client-side listener for focus changes.
///
/// Implementations live in other processes; a failed delivery is treated as
/// an implicit abandon.
pub trait FocusClient: Send + Sync {
    /// Delivers a focus change to the client.
    fn on_focus_changed(&self, change: FocusChange) -> CallbackResult;
}

/// One holder in a focus snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusHolderInfo {
    /// Holder's client identity.
    pub client_id: String,
    /// Usage the holder plays.
    pub usage: AudioUsage,
    /// Context arbitrating the holder.
    pub context: AudioContext,
    /// Whether the holder is currently ducked.
    pub ducked: bool,
}

/// Snapshot of a zone's holders after a committed state change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusSnapshot {
    /// Zone the snapshot describes.
    pub zone_id: ZoneId,
    /// Holders in insertion order, including ducked ones.
    pub holders: Vec<FocusHolderInfo>,
}

/// Passive subscriber to focus-holder snapshots.
///
/// Observers receive the snapshot on the zone's dispatcher and must not
/// call back into the arbiter.
pub trait FocusObserver: Send + Sync {
    /// Delivers a holder snapshot after a committed state change.
    fn on_focus_holders_changed(&self, snapshot: &FocusSnapshot);
}
