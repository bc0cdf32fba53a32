//! Mute propagation to the HAL.
//!
//! Derives per-zone mute/unmute address deltas from volume-group state: a
//! group muted by the user or the HAL (or blocked outright) contributes all
//! of its addresses to the zone's mute set. Same delta discipline as the
//! ducking engine: the previous set is the basis for the unmute set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::hal::{AudioControlHal, MutingInfo};
use crate::runtime::CallbackDispatcher;
use crate::zone::{ZoneId, ZoneRegistry};

/// Computes mute/unmute deltas and forwards them to the HAL.
pub struct MutingService {
    zones: Arc<ZoneRegistry>,
    hal: Arc<dyn AudioControlHal>,
    dispatcher: CallbackDispatcher,
    previous: Mutex<HashMap<ZoneId, HashSet<String>>>,
}

impl MutingService {
    /// Creates the service.
    pub fn new(
        zones: Arc<ZoneRegistry>,
        hal: Arc<dyn AudioControlHal>,
        dispatcher: CallbackDispatcher,
    ) -> Self {
        Self {
            zones,
            hal,
            dispatcher,
            previous: Mutex::new(HashMap::new()),
        }
    }

    /// Recomputes the mute set of a zone and emits the delta, if any.
    pub fn refresh_zone(&self, zone_id: ZoneId) {
        let Some(zone) = self.zones.zone(zone_id) else {
            log::warn!("[MutingService] refresh for unknown zone {zone_id}, ignoring");
            return;
        };
        let config = zone.current_config();

        let mut muted: HashSet<String> = HashSet::new();
        for group in config.groups() {
            if group.is_muted() || group.is_blocked() {
                for address in group.configured_addresses() {
                    muted.insert(address.clone());
                }
            }
        }

        let (to_mute, to_unmute) = {
            let mut previous = self.previous.lock();
            let previous_set = previous.entry(zone_id).or_default();
            let mut to_mute: Vec<String> = muted.difference(previous_set).cloned().collect();
            let mut to_unmute: Vec<String> = previous_set.difference(&muted).cloned().collect();
            to_mute.sort();
            to_unmute.sort();
            *previous_set = muted;
            (to_mute, to_unmute)
        };

        if to_mute.is_empty() && to_unmute.is_empty() {
            return;
        }

        let info = MutingInfo {
            zone_id,
            device_addresses_to_mute: to_mute,
            device_addresses_to_unmute: to_unmute,
        };
        log::debug!(
            "[MutingService] zone {zone_id}: mute {:?} unmute {:?}",
            info.device_addresses_to_mute,
            info.device_addresses_to_unmute
        );

        let hal = Arc::clone(&self.hal);
        self.dispatcher.dispatch(move || {
            if let Err(err) = hal.on_devices_to_mute_change(&info) {
                log::warn!(
                    "[MutingService] zone {}: muting notification failed: {err}",
                    info.zone_id
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AudioContext, AudioUsage};
    use crate::error::CallbackResult;
    use crate::focus::FocusChange;
    use crate::hal::DuckingInfo;
    use crate::volume::device::{AudioDevice, DeviceType, GainInfo};
    use crate::volume::group::{GainBackend, GainSink, GroupDevice, VolumeGroup};
    use crate::zone::config::ZoneConfig;
    use crate::zone::AudioZone;

    struct NullSink;
    impl GainSink for NullSink {
        fn commit_gain(&self, _address: &str, _gain_mb: i32) {}
    }

    struct RecordingHal {
        muting: Mutex<Vec<MutingInfo>>,
    }

    impl AudioControlHal for RecordingHal {
        fn on_audio_focus_change(
            &self,
            _usage: AudioUsage,
            _zone_id: ZoneId,
            _change: FocusChange,
        ) -> CallbackResult {
            Ok(())
        }
        fn on_devices_to_duck_change(&self, _ducking: &[DuckingInfo]) -> CallbackResult {
            Ok(())
        }
        fn on_devices_to_mute_change(&self, muting: &MutingInfo) -> CallbackResult {
            self.muting.lock().push(muting.clone());
            Ok(())
        }
    }

    fn fixture() -> (MutingService, Arc<VolumeGroup>, Arc<RecordingHal>) {
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
                        max_mb: 4000,
                        default_mb: 1500,
                        step_mb: 100,
                    },
                }],
                vec![(AudioContext::Music, "bus0_media".to_string())],
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
        let hal = Arc::new(RecordingHal {
            muting: Mutex::new(Vec::new()),
        });
        let service = MutingService::new(
            zones,
            Arc::clone(&hal) as Arc<dyn AudioControlHal>,
            CallbackDispatcher::inline("muting-test"),
        );
        (service, group, hal)
    }

    #[test]
    fn mute_then_unmute_round_trips_the_delta() {
        let (service, group, hal) = fixture();

        group.set_user_muted(true);
        service.refresh_zone(0);
        group.set_user_muted(false);
        service.refresh_zone(0);

        let infos = hal.muting.lock();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].device_addresses_to_mute, vec!["bus0_media"]);
        assert!(infos[0].device_addresses_to_unmute.is_empty());
        assert!(infos[1].device_addresses_to_mute.is_empty());
        assert_eq!(infos[1].device_addresses_to_unmute, vec!["bus0_media"]);
    }

    #[test]
    fn blocked_group_counts_as_muted() {
        let (service, group, hal) = fixture();

        group.set_hal_blocked(true);
        service.refresh_zone(0);

        assert_eq!(
            hal.muting.lock()[0].device_addresses_to_mute,
            vec!["bus0_media"]
        );
    }

    #[test]
    fn no_change_emits_nothing() {
        let (service, group, hal) = fixture();

        group.set_user_muted(true);
        service.refresh_zone(0);
        service.refresh_zone(0);

        assert_eq!(hal.muting.lock().len(), 1);
    }
}
