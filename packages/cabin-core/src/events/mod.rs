//! Volume-group event types and listener fan-out.
//!
//! This module provides:
//! - [`VolumeEventFlags`] and [`VolumeEventExtra`], the change-flag and
//!   extra-info vocabulary of volume-group events
//! - [`VolumeGroupEvent`], the rich event payload
//! - [`VolumeEventFanout`], the registry delivering events to listeners
//!
//! Events are produced by the volume groups, the HAL gain dispatcher and the
//! activation monitor; transport to remote processes is handled outside the
//! core.

mod fanout;

pub use fanout::{LegacyVolumeListener, VolumeEventFanout, VolumeEventListener};

use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::zone::{ConfigId, ZoneId};

/// Bit-set of change flags carried by a volume-group event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeEventFlags(u32);

impl VolumeEventFlags {
    /// No change.
    pub const NONE: Self = Self(0);
    /// The gain index changed.
    pub const INDEX_CHANGED: Self = Self(1);
    /// The minimum of the gain stage changed.
    pub const MIN_CHANGED: Self = Self(1 << 1);
    /// The maximum of the gain stage changed.
    pub const MAX_CHANGED: Self = Self(1 << 2);
    /// The mute state changed.
    pub const MUTE_CHANGED: Self = Self(1 << 3);
    /// The attenuation restriction changed.
    pub const ATTENUATION_CHANGED: Self = Self(1 << 4);

    /// Returns whether no flag is set.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns whether every flag in `other` is set in `self`.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bit representation, for the wire.
    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for VolumeEventFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for VolumeEventFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Extra information qualifying a volume-group event.
///
/// Derived from hardware gain-change reasons by the fixed mapping in
/// [`crate::hal::GainChangeReason::extra_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeEventExtra {
    /// No qualifying information.
    None,
    /// Mute was toggled by the audio system itself.
    MuteToggledByAudioSystem,
    /// Mute was toggled by an emergency source.
    MuteToggledByEmergency,
    /// Transient attenuation requested by an external system.
    TransientAttenuationExternal,
    /// Transient attenuation for a navigation prompt.
    TransientAttenuationNavigation,
    /// Transient attenuation for projected media.
    TransientAttenuationProjection,
    /// Transient attenuation under thermal pressure.
    TransientAttenuationThermal,
    /// Attenuation applied when a playback activates.
    AttenuationActivation,
    /// The gain index was changed by the audio system itself.
    VolumeIndexChangedByAudioSystem,
}

/// Rich volume-group event delivered on the volume-group-event channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupEvent {
    /// Zone owning the group.
    pub zone_id: ZoneId,
    /// Zone configuration owning the group.
    pub config_id: ConfigId,
    /// Group identifier within the configuration.
    pub group_id: u32,
    /// Union of change flags for this event.
    pub flags: VolumeEventFlags,
    /// Extra information derived from the triggering reasons.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub extras: Vec<VolumeEventExtra>,
    /// Gain index after the change.
    pub index: i32,
    /// Mute state after the change (user or HAL originated).
    pub muted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_union_and_contains() {
        let flags = VolumeEventFlags::INDEX_CHANGED | VolumeEventFlags::MUTE_CHANGED;
        assert!(flags.contains(VolumeEventFlags::INDEX_CHANGED));
        assert!(flags.contains(VolumeEventFlags::MUTE_CHANGED));
        assert!(!flags.contains(VolumeEventFlags::ATTENUATION_CHANGED));
        assert!(!flags.is_empty());
        assert!(VolumeEventFlags::NONE.is_empty());
    }

    #[test]
    fn event_serializes_camel_case() {
        let event = VolumeGroupEvent {
            zone_id: 0,
            config_id: 0,
            group_id: 2,
            flags: VolumeEventFlags::INDEX_CHANGED,
            extras: vec![VolumeEventExtra::TransientAttenuationThermal],
            index: 20,
            muted: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["zoneId"], 0);
        assert_eq!(json["groupId"], 2);
        assert_eq!(json["flags"], 1);
        assert_eq!(json["extras"][0], "transient_attenuation_thermal");
    }

    #[test]
    fn empty_extras_are_skipped() {
        let event = VolumeGroupEvent {
            zone_id: 1,
            config_id: 0,
            group_id: 0,
            flags: VolumeEventFlags::MUTE_CHANGED,
            extras: Vec::new(),
            index: 5,
            muted: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("extras").is_none());
    }
}
