//! The hardware audio-control boundary.
//!
//! This module provides:
//! - [`AudioControlHal`], the outbound trait the core notifies with focus,
//!   duck and mute changes
//! - [`GainChangeReason`] and [`DeviceGainConfig`], the inbound gain-event
//!   vocabulary, with the fixed reason→extra-info mapping
//! - [`DuckingInfo`] / [`MutingInfo`], the per-zone wire structs
//! - [`HalFocusBridge`], which turns HAL-originated focus requests into
//!   real arbiter requests
//!
//! The HAL is an opaque external entity; nothing in this module interprets
//! its behavior beyond the message shapes.

mod focus_bridge;

pub use focus_bridge::HalFocusBridge;

use serde::{Deserialize, Serialize};

use crate::context::AudioUsage;
use crate::error::CallbackResult;
use crate::events::VolumeEventExtra;
use crate::focus::FocusChange;
use crate::zone::ZoneId;

/// Hardware-originated reason for a gain change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainChangeReason {
    /// Master mute forced by the platform.
    ForcedMasterMute,
    /// Mute demanded by the telematics control unit.
    TcuMute,
    /// Mute demanded by a remote controller.
    RemoteMute,
    /// Gain capped under thermal pressure.
    ThermalLimitation,
    /// Gain capped while leaving suspend.
    SuspendExitVolLimitation,
    /// Ducking demanded by a driver-assistance system.
    AdasDucking,
    /// Ducking for a navigation prompt.
    NavDucking,
    /// Ducking for projected media.
    ProjectionDucking,
    /// The external amplifier reports the gain it actually applied.
    ExtAmpVolFeedback,
    /// Any other reason.
    Other,
}

impl GainChangeReason {
    /// The fixed, wire-stable reason→extra-info mapping.
    #[must_use]
    pub fn extra_info(self) -> VolumeEventExtra {
        match self {
            Self::RemoteMute => VolumeEventExtra::MuteToggledByAudioSystem,
            Self::TcuMute => VolumeEventExtra::MuteToggledByEmergency,
            Self::AdasDucking => VolumeEventExtra::TransientAttenuationExternal,
            Self::NavDucking => VolumeEventExtra::TransientAttenuationNavigation,
            Self::ProjectionDucking => VolumeEventExtra::TransientAttenuationProjection,
            Self::ThermalLimitation => VolumeEventExtra::TransientAttenuationThermal,
            Self::SuspendExitVolLimitation => VolumeEventExtra::AttenuationActivation,
            Self::ExtAmpVolFeedback => VolumeEventExtra::VolumeIndexChangedByAudioSystem,
            Self::ForcedMasterMute | Self::Other => VolumeEventExtra::None,
        }
    }

    /// Whether this reason blocks user volume requests.
    #[must_use]
    pub fn blocks_volume_requests(self) -> bool {
        matches!(self, Self::ForcedMasterMute | Self::TcuMute | Self::RemoteMute)
    }

    /// Whether this reason caps the gain with a limit.
    #[must_use]
    pub fn limits_volume(self) -> bool {
        matches!(self, Self::ThermalLimitation | Self::SuspendExitVolLimitation)
    }

    /// Whether this reason attenuates the gain (ducking).
    #[must_use]
    pub fn attenuates_volume(self) -> bool {
        matches!(
            self,
            Self::AdasDucking | Self::NavDucking | Self::ProjectionDucking
        )
    }

    /// Whether this reason mutes the group.
    #[must_use]
    pub fn mutes_group(self) -> bool {
        matches!(self, Self::TcuMute | Self::RemoteMute)
    }

    /// Whether this reason carries an index already applied by hardware.
    #[must_use]
    pub fn updates_index(self) -> bool {
        matches!(self, Self::ExtAmpVolFeedback)
    }
}

/// One per-device gain entry of a HAL batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceGainConfig {
    /// Zone the device belongs to (per the HAL's view).
    pub zone_id: ZoneId,
    /// Device address the gain applies to.
    pub device_address: String,
    /// Gain index the reasons refer to.
    pub volume_index: i32,
}

/// Metadata of one playback holding focus, forwarded with ducking info.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackTrackMetadata {
    /// Usage of the stream holding focus.
    pub usage: AudioUsage,
}

/// Per-zone duck/unduck delta sent to the HAL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuckingInfo {
    /// Zone the delta applies to.
    pub zone_id: ZoneId,
    /// Addresses to start ducking.
    pub device_addresses_to_duck: Vec<String>,
    /// Addresses to stop ducking.
    pub device_addresses_to_unduck: Vec<String>,
    /// Metadata of the playbacks holding focus.
    pub playback_metadata_holding_focus: Vec<PlaybackTrackMetadata>,
    /// Usages holding focus, as wire strings.
    pub usages_holding_focus: Vec<String>,
}

/// Per-zone mute/unmute delta sent to the HAL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutingInfo {
    /// Zone the delta applies to.
    pub zone_id: ZoneId,
    /// Addresses to mute.
    pub device_addresses_to_mute: Vec<String>,
    /// Addresses to unmute.
    pub device_addresses_to_unmute: Vec<String>,
}

/// Outbound boundary to the audio-control HAL.
///
/// Implementations cross a process boundary and may block; the core only
/// invokes them from dispatcher jobs with no internal lock held. Failures
/// are logged and never alter focus or volume state.
pub trait AudioControlHal: Send + Sync {
    /// Reports a focus change for a HAL-originated request.
    fn on_audio_focus_change(
        &self,
        usage: AudioUsage,
        zone_id: ZoneId,
        change: FocusChange,
    ) -> CallbackResult;

    /// Delivers duck/unduck deltas, one entry per affected zone.
    fn on_devices_to_duck_change(&self, ducking: &[DuckingInfo]) -> CallbackResult;

    /// Delivers a mute/unmute delta for one zone.
    fn on_devices_to_mute_change(&self, muting: &MutingInfo) -> CallbackResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_extra_mapping_is_bit_exact() {
        use GainChangeReason as Reason;
        use VolumeEventExtra as Extra;

        let expectations = [
            (Reason::RemoteMute, Extra::MuteToggledByAudioSystem),
            (Reason::TcuMute, Extra::MuteToggledByEmergency),
            (Reason::AdasDucking, Extra::TransientAttenuationExternal),
            (Reason::NavDucking, Extra::TransientAttenuationNavigation),
            (Reason::ProjectionDucking, Extra::TransientAttenuationProjection),
            (Reason::ThermalLimitation, Extra::TransientAttenuationThermal),
            (Reason::SuspendExitVolLimitation, Extra::AttenuationActivation),
            (
                Reason::ExtAmpVolFeedback,
                Extra::VolumeIndexChangedByAudioSystem,
            ),
            (Reason::ForcedMasterMute, Extra::None),
            (Reason::Other, Extra::None),
        ];
        for (reason, extra) in expectations {
            assert_eq!(reason.extra_info(), extra, "{reason:?}");
        }
    }

    #[test]
    fn reason_action_sets_cover_each_family() {
        use GainChangeReason as Reason;

        assert!(Reason::ForcedMasterMute.blocks_volume_requests());
        assert!(Reason::TcuMute.blocks_volume_requests());
        assert!(Reason::RemoteMute.blocks_volume_requests());
        assert!(!Reason::ThermalLimitation.blocks_volume_requests());

        assert!(Reason::ThermalLimitation.limits_volume());
        assert!(Reason::SuspendExitVolLimitation.limits_volume());

        assert!(Reason::AdasDucking.attenuates_volume());
        assert!(Reason::NavDucking.attenuates_volume());
        assert!(Reason::ProjectionDucking.attenuates_volume());

        assert!(Reason::TcuMute.mutes_group());
        assert!(Reason::RemoteMute.mutes_group());
        assert!(!Reason::ForcedMasterMute.mutes_group());

        assert!(Reason::ExtAmpVolFeedback.updates_index());
    }
}
