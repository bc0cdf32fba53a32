//! Playback activation monitoring.
//!
//! Responsibilities:
//! - Classifying newly-active playbacks per `(zone, group)` by last client
//!   uid: first ever → boot, same uid → playback change, new uid → source
//!   change
//! - Applying activation-volume windows to the group index when the
//!   classification is in the configured trigger mask
//! - Synthesizing activations from telephony state (ring, off-hook)

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::context::{AudioUsage, ContextMap};
use crate::events::{VolumeEventExtra, VolumeEventFanout};
use crate::volume::group::GroupId;
use crate::zone::{ZoneId, ZoneRegistry, PRIMARY_ZONE_ID};

/// Uid used for activations synthesized from telephony state.
const TELEPHONY_UID: u32 = 1001;

/// Why a playback became active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationTrigger {
    /// First playback on this group since boot.
    OnBoot,
    /// A different client took over the group.
    OnSourceChanged,
    /// The same client started another playback.
    OnPlaybackChanged,
}

/// Activation-volume window for one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationVolumeConfig {
    /// Lower bound, percent of the index range.
    pub min_activation_pct: u8,
    /// Upper bound, percent of the index range.
    pub max_activation_pct: u8,
    /// Classifications the window applies to.
    pub triggers: Vec<ActivationTrigger>,
}

/// Telephony call state, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// No call activity.
    Idle,
    /// An incoming call is ringing.
    Ringing,
    /// A call is active.
    OffHook,
}

/// Observes newly-active playbacks and applies activation volume.
pub struct PlaybackActivationMonitor {
    zones: Arc<ZoneRegistry>,
    context_map: Arc<ContextMap>,
    fanout: Arc<VolumeEventFanout>,
    /// Activation windows keyed by `(zone, config, group)`.
    configs: HashMap<(ZoneId, u32, GroupId), ActivationVolumeConfig>,
    /// Last activating uid per `(zone, group)`.
    last_uid: DashMap<(ZoneId, GroupId), u32>,
}

impl PlaybackActivationMonitor {
    /// Creates the monitor.
    pub fn new(
        zones: Arc<ZoneRegistry>,
        context_map: Arc<ContextMap>,
        fanout: Arc<VolumeEventFanout>,
        configs: HashMap<(ZoneId, u32, GroupId), ActivationVolumeConfig>,
    ) -> Self {
        Self {
            zones,
            context_map,
            fanout,
            configs,
            last_uid: DashMap::new(),
        }
    }

    /// Handles one newly-active playback.
    pub fn on_playback_started(&self, zone_id: ZoneId, usage: AudioUsage, uid: u32) {
        let Some(zone) = self.zones.zone(zone_id) else {
            log::warn!("[ActivationMonitor] playback in unknown zone {zone_id}, ignoring");
            return;
        };
        let config = zone.current_config();
        let context = self.context_map.context_for_usage(usage);
        let Some(group) = config.group_for_context(context) else {
            log::info!(
                "[ActivationMonitor] zone {zone_id}: no group serves {usage:?}, skipping"
            );
            return;
        };
        group.set_active(true);

        let key = (zone_id, group.group_id());
        let trigger = match self.last_uid.insert(key, uid) {
            None => ActivationTrigger::OnBoot,
            Some(previous) if previous == uid => ActivationTrigger::OnPlaybackChanged,
            Some(_) => ActivationTrigger::OnSourceChanged,
        };
        log::debug!(
            "[ActivationMonitor] zone {zone_id}: uid {uid} on group {} -> {trigger:?}",
            group.group_id()
        );

        let Some(activation) = self
            .configs
            .get(&(zone_id, config.config_id(), group.group_id()))
        else {
            return;
        };
        if !activation.triggers.contains(&trigger) {
            return;
        }

        let flags = group.clamp_to_activation(
            activation.min_activation_pct,
            activation.max_activation_pct,
        );
        if !flags.is_empty() {
            self.fanout.emit(vec![
                group.make_event(flags, vec![VolumeEventExtra::AttenuationActivation]),
            ]);
        }
    }

    /// Synthesizes activations from telephony state transitions.
    ///
    /// Ring activates the ringtone usage, off-hook the voice-call usage,
    /// both on the primary zone under the telephony uid.
    pub fn on_call_state_changed(&self, state: CallState) {
        match state {
            CallState::Ringing => {
                self.on_playback_started(PRIMARY_ZONE_ID, AudioUsage::Ringtone, TELEPHONY_UID);
            }
            CallState::OffHook => {
                self.on_playback_started(PRIMARY_ZONE_ID, AudioUsage::VoiceCall, TELEPHONY_UID);
            }
            CallState::Idle => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AudioContext;
    use crate::error::CallbackResult;
    use crate::events::{VolumeEventListener, VolumeGroupEvent};
    use crate::runtime::CallbackDispatcher;
    use crate::volume::device::{AudioDevice, DeviceType, GainInfo};
    use crate::volume::group::{GainBackend, GainSink, GroupDevice, VolumeGroup};
    use crate::zone::config::ZoneConfig;
    use crate::zone::AudioZone;
    use parking_lot::Mutex;

    struct NullSink;
    impl GainSink for NullSink {
        fn commit_gain(&self, _address: &str, _gain_mb: i32) {}
    }

    struct CollectingListener {
        events: Mutex<Vec<VolumeGroupEvent>>,
    }
    impl VolumeEventListener for CollectingListener {
        fn on_volume_group_events(&self, events: &[VolumeGroupEvent]) -> CallbackResult {
            self.events.lock().extend_from_slice(events);
            Ok(())
        }
    }

    /// Media group with max_index 30 and an activation window of 0–80%
    /// covering boot and source changes (seed scenario shape).
    fn fixture() -> (
        PlaybackActivationMonitor,
        Arc<VolumeGroup>,
        Arc<CollectingListener>,
    ) {
        let group = Arc::new(
            VolumeGroup::new(
                0,
                0,
                0,
                "media",
                GainBackend::Device {
                    sink: Arc::new(NullSink),
                },
                vec![GroupDevice {
                    address: "bus0_media".to_string(),
                    gain: GainInfo {
                        min_mb: 0,
                        max_mb: 3000,
                        default_mb: 1500,
                        step_mb: 100,
                    },
                }],
                vec![
                    (AudioContext::Music, "bus0_media".to_string()),
                    (AudioContext::CallRing, "bus0_media".to_string()),
                ],
                None,
            )
            .unwrap(),
        );
        let config = Arc::new(ZoneConfig::new(0, 0, "default", true, vec![Arc::clone(&group)]));
        let microphone = AudioDevice {
            address: "mic0".to_string(),
            device_type: DeviceType::BuiltinMicrophone,
            gain: GainInfo {
                min_mb: 0,
                max_mb: 0,
                default_mb: 0,
                step_mb: 1,
            },
        };
        let zone = AudioZone::new(0, "driver", vec![config], vec![microphone]).unwrap();
        let zones = Arc::new(ZoneRegistry::new(vec![Arc::new(zone)]).unwrap());

        let fanout = Arc::new(VolumeEventFanout::new(CallbackDispatcher::inline("test")));
        let listener = Arc::new(CollectingListener {
            events: Mutex::new(Vec::new()),
        });
        fanout.register_listener("test", Arc::clone(&listener) as Arc<dyn VolumeEventListener>);

        let mut configs = HashMap::new();
        configs.insert(
            (0, 0, 0),
            ActivationVolumeConfig {
                min_activation_pct: 0,
                max_activation_pct: 80,
                triggers: vec![ActivationTrigger::OnBoot, ActivationTrigger::OnSourceChanged],
            },
        );

        let monitor =
            PlaybackActivationMonitor::new(zones, Arc::new(ContextMap::new()), fanout, configs);
        (monitor, group, listener)
    }

    #[test]
    fn boot_then_playback_then_source_change() {
        let (monitor, group, listener) = fixture();
        group.set_current_index(28).unwrap();

        // First playback ever: ON_BOOT, clamped into [0, 24].
        monitor.on_playback_started(0, AudioUsage::Media, 1000);
        assert_eq!(group.current_index(), 24);
        assert_eq!(listener.events.lock().len(), 1);

        // Same uid again: ON_PLAYBACK_CHANGED, not in the mask, no clamp.
        group.set_current_index(28).unwrap();
        monitor.on_playback_started(0, AudioUsage::Media, 1000);
        assert_eq!(group.current_index(), 28);
        assert_eq!(listener.events.lock().len(), 1);

        // Different uid: ON_SOURCE_CHANGED, clamped again.
        monitor.on_playback_started(0, AudioUsage::Media, 2000);
        assert_eq!(group.current_index(), 24);
        assert_eq!(listener.events.lock().len(), 2);
        assert_eq!(
            listener.events.lock()[1].extras,
            vec![VolumeEventExtra::AttenuationActivation]
        );
    }

    #[test]
    fn index_inside_window_is_untouched() {
        let (monitor, group, listener) = fixture();
        group.set_current_index(10).unwrap();

        monitor.on_playback_started(0, AudioUsage::Media, 1000);

        assert_eq!(group.current_index(), 10);
        assert!(listener.events.lock().is_empty());
    }

    #[test]
    fn unmapped_usage_is_skipped() {
        let (monitor, group, _listener) = fixture();

        // No group serves navigation in this fixture.
        monitor.on_playback_started(0, AudioUsage::Navigation, 1000);

        assert!(!group.is_active());
    }

    #[test]
    fn playback_marks_group_active() {
        let (monitor, group, _listener) = fixture();
        assert!(!group.is_active());

        monitor.on_playback_started(0, AudioUsage::Media, 1000);

        assert!(group.is_active());
    }

    #[test]
    fn ring_synthesizes_ringtone_activation() {
        let (monitor, group, _listener) = fixture();
        group.set_current_index(28).unwrap();

        // CallRing maps to the same group in this fixture; the synthesized
        // activation classifies as ON_BOOT and clamps.
        monitor.on_call_state_changed(CallState::Ringing);

        assert_eq!(group.current_index(), 24);
        assert!(group.is_active());
    }

    #[test]
    fn idle_call_state_does_nothing() {
        let (monitor, group, _listener) = fixture();
        monitor.on_call_state_changed(CallState::Idle);
        assert!(!group.is_active());
    }
}
