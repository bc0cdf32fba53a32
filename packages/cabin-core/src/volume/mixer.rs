//! Core-mixer seam and reconciliation.
//!
//! Core-mixer groups delegate their gain to a volume-group slot of the host
//! audio framework's own mixer. The mixer is externally mutable and
//! authoritative for its slots: when it reports a change, the group adopts
//! the mixer's state under the local restriction stack rather than mirroring
//! local writes back by assumption.

use std::sync::Arc;

use crate::events::VolumeEventFlags;
use crate::volume::group::{CommitAction, GainBackend, VolumeGroup};

/// Snapshot of one mixer volume-group slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MixerVolumeState {
    /// Index the mixer currently applies.
    pub current_index: i32,
    /// Last index that was audible before a mute, if any.
    pub last_audible_index: i32,
    /// Whether the mixer muted the slot.
    pub muted: bool,
}

/// The host audio framework's mixer, authoritative for its groups.
///
/// Only the owning volume group may write to a slot. Reads and writes are
/// in-process framework calls and do not fail.
pub trait CoreMixer: Send + Sync {
    /// Reads the current state of a slot.
    fn group_state(&self, mixer_group_id: u32) -> MixerVolumeState;

    /// Sets the index of a slot.
    fn set_index(&self, mixer_group_id: u32, index: i32);

    /// Sets the mute state of a slot.
    fn set_muted(&self, mixer_group_id: u32, muted: bool);
}

impl VolumeGroup {
    /// Reconciles this group against its mixer slot after an
    /// externally-originated mixer change.
    ///
    /// Decision order:
    /// 1. Blocked locally and mixer unmuted: re-apply mute to the mixer.
    /// 2. Mixer muted at volume zero: adopt index 0 and programmatically
    ///    unmute the mixer; local mute state is untouched.
    /// 3. Mute divergence: adopt the mixer's mute.
    /// 4. Mixer index over the local limit: clamp the mixer to the limit.
    /// 5. Attenuated and the mixer index moved away: reset the attenuation
    ///    and adopt the mixer index.
    /// 6. Otherwise adopt the mixer index.
    ///
    /// Returns the change flags for the resulting volume-group event; an
    /// empty set means nothing user-visible changed. No-op (with a warning)
    /// for device-gain groups.
    pub fn reconcile_with_mixer(&self) -> VolumeEventFlags {
        let (mixer_group_id, mixer) = match self.backend() {
            GainBackend::Mixer {
                mixer_group_id,
                mixer,
            } => (*mixer_group_id, Arc::clone(mixer)),
            GainBackend::Device { .. } => {
                log::warn!(
                    "[VolumeGroup] {}: mixer reconciliation requested for device-gain group",
                    self.name()
                );
                return VolumeEventFlags::NONE;
            }
        };

        let observed = mixer.group_state(mixer_group_id);
        let mut plan: Vec<CommitAction> = Vec::new();

        let flags = self.with_state(|state| {
            if state.hal_blocked() {
                if !observed.muted {
                    plan.push(CommitAction::MixerMute(true));
                }
                return VolumeEventFlags::NONE;
            }

            // Muted-at-zero is the mixer's way of expressing "volume zero",
            // not a user mute; adopt the index and undo the mixer mute.
            if observed.muted && observed.last_audible_index == 0 && !state.user_muted() {
                let mut flags = VolumeEventFlags::NONE;
                if state.current_index() != 0 {
                    state.set_current_index(0);
                    flags |= VolumeEventFlags::INDEX_CHANGED;
                }
                plan.push(CommitAction::MixerMute(false));
                return flags;
            }

            if state.user_muted() != observed.muted {
                state.set_user_muted(observed.muted);
                return VolumeEventFlags::MUTE_CHANGED;
            }

            let adopted = observed.current_index.clamp(0, state.max_index());

            if let Some(limit) = state.limit_index() {
                if adopted > limit {
                    state.set_current_index(limit);
                    plan.push(CommitAction::MixerIndex(limit));
                    return VolumeEventFlags::INDEX_CHANGED;
                }
            }

            if let Some(attenuation) = state.attenuation_index() {
                if adopted != attenuation {
                    state.clear_attenuation();
                    state.set_current_index(adopted);
                    return VolumeEventFlags::INDEX_CHANGED
                        | VolumeEventFlags::ATTENUATION_CHANGED;
                }
            }

            if adopted != state.current_index() {
                state.set_current_index(adopted);
                return VolumeEventFlags::INDEX_CHANGED;
            }

            VolumeEventFlags::NONE
        });

        self.apply(plan);
        flags
    }
}
