//! Volume groups: shared-gain device sets with a restriction stack.
//!
//! A group owns one gain index for an ordered set of output devices. The
//! user-facing index is never applied directly; the *effective* index is
//! derived through the restriction stack (HAL block, HAL mute, attenuation,
//! limit, user mute) and committed to the backend on every write.
//!
//! Two backends share this type: device-gain groups commit millibel values
//! through a [`GainSink`], core-mixer groups delegate to the host mixer and
//! are reconciled against it on externally-originated changes (see
//! [`super::mixer`]).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::AudioContext;
use crate::error::{PolicyError, PolicyResult};
use crate::events::{VolumeEventExtra, VolumeEventFlags, VolumeGroupEvent};
use crate::volume::device::GainInfo;
use crate::volume::mixer::CoreMixer;
use crate::zone::{ConfigId, ZoneId};

/// Group identifier within a zone configuration.
pub type GroupId = u32;

/// Sink for committing device gains, implemented by the host audio stack.
///
/// Implementations must not block and must not call back into the core;
/// commits are issued while no internal lock is held, but in the calling
/// thread of the mutating operation.
pub trait GainSink: Send + Sync {
    /// Applies a gain in millibel to the device at `address`.
    fn commit_gain(&self, address: &str, gain_mb: i32);
}

/// Gain backend of a volume group.
#[derive(Clone)]
pub enum GainBackend {
    /// Gain index maps linearly to device millibel, committed per device.
    Device {
        /// Commit seam into the host audio stack.
        sink: Arc<dyn GainSink>,
    },
    /// Gain is delegated to an external core mixer slot.
    Mixer {
        /// The mixer's identifier for this group.
        mixer_group_id: u32,
        /// The external mixer.
        mixer: Arc<dyn CoreMixer>,
    },
}

/// A member device snapshot: address plus its gain capabilities.
#[derive(Debug, Clone)]
pub struct GroupDevice {
    /// Device address.
    pub address: String,
    /// Device gain range.
    pub gain: GainInfo,
}

/// Deferred backend writes, executed after the group lock is released.
pub(crate) enum CommitAction {
    /// Apply a millibel gain to one device.
    DeviceGain(String, i32),
    /// Set the mixer slot index.
    MixerIndex(i32),
    /// Set the mixer slot mute state.
    MixerMute(bool),
}

struct GroupState {
    devices: Vec<GroupDevice>,
    context_addresses: Vec<(AudioContext, String)>,
    stage: GainInfo,
    current_index: i32,
    user_muted: bool,
    hal_blocked: bool,
    hal_muted: bool,
    limit_index: Option<i32>,
    attenuation_index: Option<i32>,
    is_active: bool,
}

/// A named set of output devices sharing one gain index.
pub struct VolumeGroup {
    zone_id: ZoneId,
    config_id: ConfigId,
    group_id: GroupId,
    name: String,
    backend: GainBackend,
    /// Full configured membership; `state.devices` holds the present subset.
    configured_addresses: Vec<String>,
    state: Mutex<GroupState>,
}

impl VolumeGroup {
    /// Creates a group over the given member devices.
    ///
    /// The gain stage is computed from the members (`max` of mins, `min` of
    /// maxes, `min` of defaults, common step). `stored_index`, when present
    /// and in range, seeds `current_index`; otherwise the default index is
    /// used.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Configuration` for an empty member list, a step
    /// mismatch among members, or a context bound to a non-member address.
    pub fn new(
        zone_id: ZoneId,
        config_id: ConfigId,
        group_id: GroupId,
        name: impl Into<String>,
        backend: GainBackend,
        devices: Vec<GroupDevice>,
        context_addresses: Vec<(AudioContext, String)>,
        stored_index: Option<i32>,
    ) -> PolicyResult<Self> {
        let name = name.into();
        let stage = Self::compute_stage(&name, &devices)?;
        for (context, address) in &context_addresses {
            if !devices.iter().any(|device| device.address == *address) {
                return Err(PolicyError::Configuration(format!(
                    "group {name}: context {context:?} bound to non-member address {address}"
                )));
            }
        }
        let current_index = match stored_index {
            Some(index) if index >= 0 && index <= stage.max_index() => index,
            _ => stage.default_index(),
        };
        let configured_addresses = devices.iter().map(|device| device.address.clone()).collect();
        Ok(Self {
            zone_id,
            config_id,
            group_id,
            name,
            backend,
            configured_addresses,
            state: Mutex::new(GroupState {
                devices,
                context_addresses,
                stage,
                current_index,
                user_muted: false,
                hal_blocked: false,
                hal_muted: false,
                limit_index: None,
                attenuation_index: None,
                is_active: false,
            }),
        })
    }

    fn compute_stage(name: &str, devices: &[GroupDevice]) -> PolicyResult<GainInfo> {
        let first = devices.first().ok_or_else(|| {
            PolicyError::Configuration(format!("group {name} has no member devices"))
        })?;
        let step_mb = first.gain.step_mb;
        let mut min_mb = i32::MIN;
        let mut max_mb = i32::MAX;
        let mut default_mb = i32::MAX;
        for device in devices {
            if device.gain.step_mb != step_mb {
                return Err(PolicyError::Configuration(format!(
                    "group {name}: step mismatch on {} ({} vs {})",
                    device.address, device.gain.step_mb, step_mb
                )));
            }
            min_mb = min_mb.max(device.gain.min_mb);
            max_mb = max_mb.min(device.gain.max_mb);
            default_mb = default_mb.min(device.gain.default_mb);
        }
        let stage = GainInfo {
            min_mb,
            max_mb,
            default_mb: default_mb.clamp(min_mb, max_mb),
            step_mb,
        };
        stage.validate().map_err(|_| {
            PolicyError::Configuration(format!(
                "group {name}: member gain ranges do not overlap"
            ))
        })?;
        Ok(stage)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Identity and read access
    // ─────────────────────────────────────────────────────────────────────

    /// Zone owning this group.
    #[must_use]
    pub fn zone_id(&self) -> ZoneId {
        self.zone_id
    }

    /// Zone configuration owning this group.
    #[must_use]
    pub fn config_id(&self) -> ConfigId {
        self.config_id
    }

    /// Group identifier within the configuration.
    #[must_use]
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current (user-facing) gain index.
    #[must_use]
    pub fn current_index(&self) -> i32 {
        self.state.lock().current_index
    }

    /// Effective index after the restriction stack.
    #[must_use]
    pub fn effective_index(&self) -> i32 {
        Self::effective_of(&self.state.lock())
    }

    /// Largest valid index.
    #[must_use]
    pub fn max_index(&self) -> i32 {
        self.state.lock().stage.max_index()
    }

    /// Smallest valid index. Always zero.
    #[must_use]
    pub fn min_index(&self) -> i32 {
        0
    }

    /// Gain-stage snapshot.
    #[must_use]
    pub fn stage(&self) -> GainInfo {
        self.state.lock().stage
    }

    /// Whether the user muted this group.
    #[must_use]
    pub fn is_user_muted(&self) -> bool {
        self.state.lock().user_muted
    }

    /// Whether the HAL muted this group.
    #[must_use]
    pub fn is_hal_muted(&self) -> bool {
        self.state.lock().hal_muted
    }

    /// Whether the group is muted by any party.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        let state = self.state.lock();
        state.user_muted || state.hal_muted
    }

    /// Whether volume requests are blocked by the HAL.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.state.lock().hal_blocked
    }

    /// Current limit restriction.
    #[must_use]
    pub fn limit_index(&self) -> Option<i32> {
        self.state.lock().limit_index
    }

    /// Current attenuation restriction.
    #[must_use]
    pub fn attenuation_index(&self) -> Option<i32> {
        self.state.lock().attenuation_index
    }

    /// Whether a playback is currently active on this group.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.lock().is_active
    }

    /// Marks playback activity on this group.
    pub fn set_active(&self, active: bool) {
        self.state.lock().is_active = active;
    }

    /// Member device addresses, in configuration order.
    #[must_use]
    pub fn addresses(&self) -> Vec<String> {
        self.state
            .lock()
            .devices
            .iter()
            .map(|device| device.address.clone())
            .collect()
    }

    /// Whether the address belongs to this group's configured membership.
    #[must_use]
    pub fn has_address(&self, address: &str) -> bool {
        self.configured_addresses
            .iter()
            .any(|configured| configured == address)
    }

    /// Full configured membership, regardless of device presence.
    #[must_use]
    pub fn configured_addresses(&self) -> &[String] {
        &self.configured_addresses
    }

    /// Address serving the given context, if this group is bound to it.
    #[must_use]
    pub fn address_for_context(&self, context: AudioContext) -> Option<String> {
        self.state
            .lock()
            .context_addresses
            .iter()
            .find(|(bound, _)| *bound == context)
            .map(|(_, address)| address.clone())
    }

    /// Contexts bound to this group.
    #[must_use]
    pub fn contexts(&self) -> Vec<AudioContext> {
        self.state
            .lock()
            .context_addresses
            .iter()
            .map(|(context, _)| *context)
            .collect()
    }

    /// Builds the rich event payload for a committed change.
    #[must_use]
    pub fn make_event(
        &self,
        flags: VolumeEventFlags,
        extras: Vec<VolumeEventExtra>,
    ) -> VolumeGroupEvent {
        let state = self.state.lock();
        VolumeGroupEvent {
            zone_id: self.zone_id,
            config_id: self.config_id,
            group_id: self.group_id,
            flags,
            extras,
            index: state.current_index,
            muted: state.user_muted || state.hal_muted,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────

    /// Sets the user-facing gain index.
    ///
    /// While the group is HAL-blocked the write is stored but not applied to
    /// the backend.
    ///
    /// # Errors
    ///
    /// `PolicyError::IndexOutOfRange` if the index is outside
    /// `[0, max_index]`.
    pub fn set_current_index(&self, index: i32) -> PolicyResult<VolumeEventFlags> {
        let (flags, plan) = {
            let mut state = self.state.lock();
            Self::ensure_in_range(&state, index)?;
            let changed = state.current_index != index;
            state.current_index = index;
            let flags = if changed {
                VolumeEventFlags::INDEX_CHANGED
            } else {
                VolumeEventFlags::NONE
            };
            (flags, self.commit_plan(&state))
        };
        self.apply(plan);
        Ok(flags)
    }

    /// Sets the user mute state. The stored index is retained.
    pub fn set_user_muted(&self, muted: bool) -> VolumeEventFlags {
        let (flags, plan) = {
            let mut state = self.state.lock();
            if state.user_muted == muted {
                return VolumeEventFlags::NONE;
            }
            state.user_muted = muted;
            let plan = match &self.backend {
                GainBackend::Mixer { .. } if !state.hal_blocked => {
                    vec![CommitAction::MixerMute(muted)]
                }
                _ => self.commit_plan(&state),
            };
            (VolumeEventFlags::MUTE_CHANGED, plan)
        };
        self.apply(plan);
        flags
    }

    /// Sets the HAL mute restriction.
    pub fn set_hal_muted(&self, muted: bool) -> VolumeEventFlags {
        let (flags, plan) = {
            let mut state = self.state.lock();
            if state.hal_muted == muted {
                return VolumeEventFlags::NONE;
            }
            state.hal_muted = muted;
            (VolumeEventFlags::MUTE_CHANGED, self.commit_plan(&state))
        };
        self.apply(plan);
        flags
    }

    /// Sets the HAL block restriction.
    ///
    /// Blocking forces the applied gain to index zero while keeping the
    /// stored index; unblocking restores the effective gain.
    pub fn set_hal_blocked(&self, blocked: bool) -> VolumeEventFlags {
        let (flags, plan) = {
            let mut state = self.state.lock();
            if state.hal_blocked == blocked {
                return VolumeEventFlags::NONE;
            }
            let before = Self::effective_of(&state);
            state.hal_blocked = blocked;
            let after = Self::effective_of(&state);
            let flags = if before == after {
                VolumeEventFlags::NONE
            } else {
                VolumeEventFlags::INDEX_CHANGED
            };
            let plan = if blocked {
                // Force the backend to silence; later writes stay local.
                match &self.backend {
                    GainBackend::Device { .. } => state
                        .devices
                        .iter()
                        .map(|device| {
                            CommitAction::DeviceGain(
                                device.address.clone(),
                                Self::device_gain(device, &state.stage, 0),
                            )
                        })
                        .collect(),
                    GainBackend::Mixer { .. } => vec![CommitAction::MixerMute(true)],
                }
            } else {
                self.commit_plan(&state)
            };
            (flags, plan)
        };
        self.apply(plan);
        flags
    }

    /// Sets or clears the limit restriction.
    ///
    /// The backend is only touched when the effective gain actually moves.
    pub fn set_limit_index(&self, limit: Option<i32>) -> VolumeEventFlags {
        let (flags, plan) = {
            let mut state = self.state.lock();
            let before = Self::effective_of(&state);
            state.limit_index = limit;
            let after = Self::effective_of(&state);
            if before == after {
                return VolumeEventFlags::NONE;
            }
            (VolumeEventFlags::INDEX_CHANGED, self.commit_plan(&state))
        };
        self.apply(plan);
        flags
    }

    /// Sets or clears the attenuation restriction.
    ///
    /// The backend is only touched when the effective gain actually moves.
    pub fn set_attenuation_index(&self, attenuation: Option<i32>) -> VolumeEventFlags {
        let (flags, plan) = {
            let mut state = self.state.lock();
            let before = Self::effective_of(&state);
            let changed = state.attenuation_index != attenuation;
            state.attenuation_index = attenuation;
            let after = Self::effective_of(&state);
            let mut flags = VolumeEventFlags::NONE;
            if changed {
                flags |= VolumeEventFlags::ATTENUATION_CHANGED;
            }
            if before == after {
                return flags;
            }
            flags |= VolumeEventFlags::INDEX_CHANGED;
            (flags, self.commit_plan(&state))
        };
        self.apply(plan);
        flags
    }

    /// Adopts an index reported by the hardware without re-committing it.
    ///
    /// Used for external-amplifier feedback: the hardware already applied
    /// the gain, the core only records it.
    ///
    /// # Errors
    ///
    /// `PolicyError::IndexOutOfRange` if the index is outside
    /// `[0, max_index]`.
    pub fn adopt_hal_index(&self, index: i32) -> PolicyResult<VolumeEventFlags> {
        let mut state = self.state.lock();
        Self::ensure_in_range(&state, index)?;
        let changed = state.current_index != index;
        state.current_index = index;
        Ok(if changed {
            VolumeEventFlags::INDEX_CHANGED
        } else {
            VolumeEventFlags::NONE
        })
    }

    /// Clamps the stored index into the activation-volume window
    /// `[min_pct, max_pct]` of the index range.
    pub fn clamp_to_activation(&self, min_pct: u8, max_pct: u8) -> VolumeEventFlags {
        let (flags, plan) = {
            let mut state = self.state.lock();
            let max_index = state.stage.max_index();
            let low = max_index * i32::from(min_pct) / 100;
            let high = max_index * i32::from(max_pct) / 100;
            let clamped = state.current_index.clamp(low, high);
            let flags = if clamped == state.current_index {
                VolumeEventFlags::NONE
            } else {
                state.current_index = clamped;
                VolumeEventFlags::INDEX_CHANGED
            };
            (flags, self.commit_plan(&state))
        };
        self.apply(plan);
        flags
    }

    /// Replaces the member devices and recomputes the gain stage.
    ///
    /// The stored index is re-extrapolated from the prior gain in millibel;
    /// if it falls outside the new range it snaps to the default index.
    ///
    /// # Errors
    ///
    /// `PolicyError::Configuration` for an empty member list, a step
    /// mismatch, or non-overlapping gain ranges.
    pub fn update_devices(&self, devices: Vec<GroupDevice>) -> PolicyResult<VolumeEventFlags> {
        let (flags, plan) = {
            let mut state = self.state.lock();
            let new_stage = Self::compute_stage(&self.name, &devices)?;
            let prior_gain = state.stage.gain_for_index(state.current_index);
            let mut flags = VolumeEventFlags::NONE;
            if new_stage.min_mb != state.stage.min_mb {
                flags |= VolumeEventFlags::MIN_CHANGED;
            }
            if new_stage.max_mb != state.stage.max_mb {
                flags |= VolumeEventFlags::MAX_CHANGED;
            }
            let mut index = new_stage.index_for_gain(prior_gain);
            if index < 0 || index > new_stage.max_index() {
                index = new_stage.default_index();
            }
            if index != state.current_index {
                flags |= VolumeEventFlags::INDEX_CHANGED;
            }
            state.current_index = index;
            state.stage = new_stage;
            state.devices = devices;
            (flags, self.commit_plan(&state))
        };
        self.apply(plan);
        Ok(flags)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn ensure_in_range(state: &GroupState, index: i32) -> PolicyResult<()> {
        let max = state.stage.max_index();
        if index < 0 || index > max {
            return Err(PolicyError::IndexOutOfRange {
                index,
                min: 0,
                max,
            });
        }
        Ok(())
    }

    /// Restriction stack: block → HAL mute → attenuation → limit → user
    /// mute → stored index.
    fn effective_of(state: &GroupState) -> i32 {
        if state.hal_blocked || state.hal_muted || state.user_muted {
            return 0;
        }
        let mut effective = state.current_index;
        if let Some(attenuation) = state.attenuation_index {
            effective = effective.min(attenuation);
        }
        if let Some(limit) = state.limit_index {
            effective = effective.min(limit);
        }
        effective
    }

    fn device_gain(device: &GroupDevice, stage: &GainInfo, effective: i32) -> i32 {
        stage
            .gain_for_index(effective)
            .clamp(device.gain.min_mb, device.gain.max_mb)
    }

    fn commit_plan(&self, state: &GroupState) -> Vec<CommitAction> {
        if state.hal_blocked {
            return Vec::new();
        }
        let effective = Self::effective_of(state);
        match &self.backend {
            GainBackend::Device { .. } => state
                .devices
                .iter()
                .map(|device| {
                    CommitAction::DeviceGain(
                        device.address.clone(),
                        Self::device_gain(device, &state.stage, effective),
                    )
                })
                .collect(),
            GainBackend::Mixer { .. } => vec![CommitAction::MixerIndex(effective)],
        }
    }

    pub(crate) fn apply(&self, plan: Vec<CommitAction>) {
        for action in plan {
            match (&self.backend, action) {
                (GainBackend::Device { sink }, CommitAction::DeviceGain(address, gain_mb)) => {
                    sink.commit_gain(&address, gain_mb);
                }
                (
                    GainBackend::Mixer {
                        mixer_group_id,
                        mixer,
                    },
                    CommitAction::MixerIndex(index),
                ) => {
                    mixer.set_index(*mixer_group_id, index);
                }
                (
                    GainBackend::Mixer {
                        mixer_group_id,
                        mixer,
                    },
                    CommitAction::MixerMute(muted),
                ) => {
                    mixer.set_muted(*mixer_group_id, muted);
                }
                _ => {
                    log::error!(
                        "[VolumeGroup] {}: commit action does not match backend",
                        self.name
                    );
                }
            }
        }
    }

    pub(crate) fn backend(&self) -> &GainBackend {
        &self.backend
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut VolumeGroupView<'_>) -> R) -> R {
        let mut state = self.state.lock();
        let mut view = VolumeGroupView { state: &mut *state };
        f(&mut view)
    }
}

/// Mutable view over group state for the mixer reconciler.
///
/// Keeps the lock scoped to the reconciliation decision while exposing only
/// the fields the reconciler may touch.
pub(crate) struct VolumeGroupView<'a> {
    state: &'a mut GroupState,
}

impl VolumeGroupView<'_> {
    pub(crate) fn current_index(&self) -> i32 {
        self.state.current_index
    }

    pub(crate) fn set_current_index(&mut self, index: i32) {
        self.state.current_index = index;
    }

    pub(crate) fn user_muted(&self) -> bool {
        self.state.user_muted
    }

    pub(crate) fn set_user_muted(&mut self, muted: bool) {
        self.state.user_muted = muted;
    }

    pub(crate) fn hal_blocked(&self) -> bool {
        self.state.hal_blocked
    }

    pub(crate) fn limit_index(&self) -> Option<i32> {
        self.state.limit_index
    }

    pub(crate) fn attenuation_index(&self) -> Option<i32> {
        self.state.attenuation_index
    }

    pub(crate) fn clear_attenuation(&mut self) {
        self.state.attenuation_index = None;
    }

    pub(crate) fn max_index(&self) -> i32 {
        self.state.stage.max_index()
    }
}
