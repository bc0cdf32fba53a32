//! Ducking computation.
//!
//! A passive subscriber to focus-holder snapshots: it receives, computes the
//! per-zone duck/unduck address delta, and emits to the HAL. It never calls
//! back into the arbiter, which breaks the observation cycle between focus
//! and ducking.
//!
//! Heuristic: a context is *active* when some holder maps to it. Within
//! each group that serves an active context, addresses bound only to
//! inactive contexts would mix with the active sound on the group's shared
//! gain stage and are ducked. An address carrying an active context
//! anywhere in the zone is never ducked.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::AudioContext;
use crate::focus::{FocusObserver, FocusSnapshot};
use crate::hal::{AudioControlHal, DuckingInfo, PlaybackTrackMetadata};
use crate::runtime::CallbackDispatcher;
use crate::zone::{ZoneId, ZoneRegistry};

/// Computes duck/unduck deltas from focus snapshots.
pub struct DuckingEngine {
    zones: Arc<ZoneRegistry>,
    hal: Arc<dyn AudioControlHal>,
    dispatcher: CallbackDispatcher,
    /// Previous duck set per zone; the basis for the next unduck set.
    previous: Mutex<HashMap<ZoneId, HashSet<String>>>,
}

impl DuckingEngine {
    /// Creates the engine.
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

    /// Current duck set of a zone.
    #[must_use]
    pub fn ducked_addresses(&self, zone_id: ZoneId) -> Vec<String> {
        let previous = self.previous.lock();
        let mut addresses: Vec<String> = previous
            .get(&zone_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        addresses.sort();
        addresses
    }

    /// Computes the new duck set for one zone from the active contexts.
    fn compute_duck_set(
        zone: &crate::zone::AudioZone,
        active: &HashSet<AudioContext>,
    ) -> HashSet<String> {
        let config = zone.current_config();

        // Addresses carrying an active context are never ducked.
        let mut active_addresses: HashSet<String> = HashSet::new();
        for group in config.groups() {
            for context in group.contexts() {
                if active.contains(&context) {
                    if let Some(address) = group.address_for_context(context) {
                        active_addresses.insert(address);
                    }
                }
            }
        }

        let mut duck: HashSet<String> = HashSet::new();
        for group in config.groups() {
            let serves_active = group
                .contexts()
                .iter()
                .any(|context| active.contains(context));
            if !serves_active {
                continue;
            }
            for context in group.contexts() {
                if active.contains(&context) {
                    continue;
                }
                if let Some(address) = group.address_for_context(context) {
                    if !active_addresses.contains(&address) {
                        duck.insert(address);
                    }
                }
            }
        }
        duck
    }
}

impl FocusObserver for DuckingEngine {
    fn on_focus_holders_changed(&self, snapshot: &FocusSnapshot) {
        let Some(zone) = self.zones.zone(snapshot.zone_id) else {
            log::warn!(
                "[DuckingEngine] snapshot for unknown zone {}, ignoring",
                snapshot.zone_id
            );
            return;
        };

        let active: HashSet<AudioContext> = snapshot
            .holders
            .iter()
            .map(|holder| holder.context)
            .collect();
        let new_duck = Self::compute_duck_set(&zone, &active);

        let (to_duck, to_unduck) = {
            let mut previous = self.previous.lock();
            let previous_set = previous.entry(snapshot.zone_id).or_default();
            let mut to_duck: Vec<String> =
                new_duck.difference(previous_set).cloned().collect();
            let mut to_unduck: Vec<String> =
                previous_set.difference(&new_duck).cloned().collect();
            to_duck.sort();
            to_unduck.sort();
            *previous_set = new_duck;
            (to_duck, to_unduck)
        };

        if to_duck.is_empty() && to_unduck.is_empty() {
            return;
        }

        let mut usages: Vec<String> = Vec::new();
        for holder in &snapshot.holders {
            let usage = holder.usage.as_str().to_string();
            if !usages.contains(&usage) {
                usages.push(usage);
            }
        }
        let info = DuckingInfo {
            zone_id: snapshot.zone_id,
            device_addresses_to_duck: to_duck,
            device_addresses_to_unduck: to_unduck,
            playback_metadata_holding_focus: snapshot
                .holders
                .iter()
                .map(|holder| PlaybackTrackMetadata {
                    usage: holder.usage,
                })
                .collect(),
            usages_holding_focus: usages,
        };

        log::debug!(
            "[DuckingEngine] zone {}: duck {:?} unduck {:?}",
            info.zone_id,
            info.device_addresses_to_duck,
            info.device_addresses_to_unduck
        );

        let hal = Arc::clone(&self.hal);
        self.dispatcher.dispatch(move || {
            if let Err(err) = hal.on_devices_to_duck_change(std::slice::from_ref(&info)) {
                log::warn!(
                    "[DuckingEngine] zone {}: ducking notification failed: {err}",
                    info.zone_id
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AudioUsage;
    use crate::error::CallbackResult;
    use crate::focus::{FocusChange, FocusHolderInfo};
    use crate::hal::MutingInfo;
    use crate::volume::device::{AudioDevice, DeviceType, GainInfo};
    use crate::volume::group::{GainBackend, GainSink, GroupDevice, VolumeGroup};
    use crate::zone::config::ZoneConfig;
    use crate::zone::AudioZone;

    struct NullSink;
    impl GainSink for NullSink {
        fn commit_gain(&self, _address: &str, _gain_mb: i32) {}
    }

    struct RecordingHal {
        ducking: Mutex<Vec<DuckingInfo>>,
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
        fn on_devices_to_duck_change(&self, ducking: &[DuckingInfo]) -> CallbackResult {
            self.ducking.lock().extend_from_slice(ducking);
            Ok(())
        }
        fn on_devices_to_mute_change(&self, _muting: &MutingInfo) -> CallbackResult {
            Ok(())
        }
    }

    fn gain() -> GainInfo {
        GainInfo {
            min_mb: 0,
            max_mb: 4000,
            default_mb: 1500,
            step_mb: 100,
        }
    }

    fn group(
        group_id: u32,
        name: &str,
        bindings: &[(AudioContext, &str)],
    ) -> Arc<VolumeGroup> {
        let mut addresses: Vec<String> = Vec::new();
        for (_, address) in bindings {
            if !addresses.contains(&(*address).to_string()) {
                addresses.push((*address).to_string());
            }
        }
        Arc::new(
            VolumeGroup::new(
                0,
                0,
                group_id,
                name,
                GainBackend::Device {
                    sink: Arc::new(NullSink),
                },
                addresses
                    .into_iter()
                    .map(|address| GroupDevice {
                        address,
                        gain: gain(),
                    })
                    .collect(),
                bindings
                    .iter()
                    .map(|(context, address)| (*context, (*address).to_string()))
                    .collect(),
                None,
            )
            .unwrap(),
        )
    }

    /// Zone 0: media group serving music + announcement on separate buses,
    /// nav group serving navigation + ring.
    fn fixture() -> (DuckingEngine, Arc<RecordingHal>) {
        let media = group(
            0,
            "media",
            &[
                (AudioContext::Music, "bus0_media"),
                (AudioContext::Announcement, "bus5_announce"),
            ],
        );
        let nav = group(
            1,
            "nav",
            &[
                (AudioContext::Navigation, "bus1_nav"),
                (AudioContext::CallRing, "bus2_ring"),
            ],
        );
        let config = Arc::new(ZoneConfig::new(0, 0, "default", true, vec![media, nav]));
        let microphone = AudioDevice {
            address: "mic0".to_string(),
            device_type: DeviceType::BuiltinMicrophone,
            gain: gain(),
        };
        let zone = AudioZone::new(0, "driver", vec![config], vec![microphone]).unwrap();
        let zones = Arc::new(ZoneRegistry::new(vec![Arc::new(zone)]).unwrap());
        let hal = Arc::new(RecordingHal {
            ducking: Mutex::new(Vec::new()),
        });
        let engine = DuckingEngine::new(
            zones,
            Arc::clone(&hal) as Arc<dyn AudioControlHal>,
            CallbackDispatcher::inline("ducking-test"),
        );
        (engine, hal)
    }

    fn holder(client_id: &str, usage: AudioUsage, context: AudioContext) -> FocusHolderInfo {
        FocusHolderInfo {
            client_id: client_id.to_string(),
            usage,
            context,
            ducked: false,
        }
    }

    fn snapshot(holders: Vec<FocusHolderInfo>) -> FocusSnapshot {
        FocusSnapshot {
            zone_id: 0,
            holders,
        }
    }

    #[test]
    fn active_music_ducks_sibling_context_address() {
        let (engine, hal) = fixture();

        engine.on_focus_holders_changed(&snapshot(vec![holder(
            "music",
            AudioUsage::Media,
            AudioContext::Music,
        )]));

        let infos = hal.ducking.lock();
        assert_eq!(infos.len(), 1);
        // The announcement address shares the media group's gain stage.
        assert_eq!(infos[0].device_addresses_to_duck, vec!["bus5_announce"]);
        assert!(infos[0].device_addresses_to_unduck.is_empty());
        assert_eq!(infos[0].usages_holding_focus, vec!["media"]);
        // The nav group serves no active context and is left alone.
        assert!(!infos[0]
            .device_addresses_to_duck
            .contains(&"bus1_nav".to_string()));
    }

    #[test]
    fn release_unducks_previously_ducked_addresses() {
        let (engine, hal) = fixture();

        engine.on_focus_holders_changed(&snapshot(vec![holder(
            "music",
            AudioUsage::Media,
            AudioContext::Music,
        )]));
        engine.on_focus_holders_changed(&snapshot(vec![]));

        let infos = hal.ducking.lock();
        assert_eq!(infos.len(), 2);
        assert!(infos[1].device_addresses_to_duck.is_empty());
        assert_eq!(infos[1].device_addresses_to_unduck, vec!["bus5_announce"]);
        assert!(infos[1].usages_holding_focus.is_empty());
    }

    #[test]
    fn duck_and_unduck_sets_are_disjoint_deltas() {
        let (engine, hal) = fixture();

        // Music active: announcement ducked.
        engine.on_focus_holders_changed(&snapshot(vec![holder(
            "music",
            AudioUsage::Media,
            AudioContext::Music,
        )]));
        // Navigation joins: ring address ducked too, announcement unchanged.
        engine.on_focus_holders_changed(&snapshot(vec![
            holder("music", AudioUsage::Media, AudioContext::Music),
            holder("nav", AudioUsage::Navigation, AudioContext::Navigation),
        ]));

        let infos = hal.ducking.lock();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[1].device_addresses_to_duck, vec!["bus2_ring"]);
        assert!(infos[1].device_addresses_to_unduck.is_empty());
        for info in infos.iter() {
            for address in &info.device_addresses_to_duck {
                assert!(
                    !info.device_addresses_to_unduck.contains(address),
                    "duck and unduck must be disjoint"
                );
            }
        }
    }

    #[test]
    fn unchanged_duck_set_emits_nothing() {
        let (engine, hal) = fixture();

        let holders = vec![holder("music", AudioUsage::Media, AudioContext::Music)];
        engine.on_focus_holders_changed(&snapshot(holders.clone()));
        engine.on_focus_holders_changed(&snapshot(holders));

        assert_eq!(hal.ducking.lock().len(), 1);
    }

    #[test]
    fn active_address_is_never_ducked() {
        let (engine, hal) = fixture();

        // Both contexts of the media group are active; nothing to duck.
        engine.on_focus_holders_changed(&snapshot(vec![
            holder("music", AudioUsage::Media, AudioContext::Music),
            holder(
                "traffic",
                AudioUsage::Announcement,
                AudioContext::Announcement,
            ),
        ]));

        assert!(hal.ducking.lock().is_empty());
        assert!(engine.ducked_addresses(0).is_empty());
    }
}
