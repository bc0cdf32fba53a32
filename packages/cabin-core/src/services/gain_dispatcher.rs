//! HAL gain-event dispatch.
//!
//! Responsibilities:
//! - Bucketing hardware gain batches by zone (unknown zones logged, dropped)
//! - Translating gain-change reasons into volume-group restrictions
//! - Emitting one aggregated volume-group event per mutated group
//!
//! The reasons of a batch describe the full restriction state for every
//! device the batch lists: a reason's presence applies its restriction and
//! its absence clears it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::events::{VolumeEventExtra, VolumeEventFlags, VolumeGroupEvent};
use crate::events::VolumeEventFanout;
use crate::hal::{DeviceGainConfig, GainChangeReason};
use crate::services::muting::MutingService;
use crate::zone::{ZoneId, ZoneRegistry};

/// Applies hardware gain batches to the volume groups.
pub struct HalGainDispatcher {
    zones: Arc<ZoneRegistry>,
    fanout: Arc<VolumeEventFanout>,
    muting: Arc<MutingService>,
    /// Serializes whole batches; individual groups have their own locks.
    batch_lock: Mutex<()>,
}

impl HalGainDispatcher {
    /// Creates the dispatcher.
    pub fn new(
        zones: Arc<ZoneRegistry>,
        fanout: Arc<VolumeEventFanout>,
        muting: Arc<MutingService>,
    ) -> Self {
        Self {
            zones,
            fanout,
            muting,
            batch_lock: Mutex::new(()),
        }
    }

    /// Handles one `onAudioDeviceGainsChanged` batch.
    pub fn on_audio_device_gains_changed(
        &self,
        reasons: &[GainChangeReason],
        configs: &[DeviceGainConfig],
    ) {
        let _batch = self.batch_lock.lock();

        let blocks = reasons.iter().any(|reason| reason.blocks_volume_requests());
        let limits = reasons.iter().any(|reason| reason.limits_volume());
        let attenuates = reasons.iter().any(|reason| reason.attenuates_volume());
        let mutes = reasons.iter().any(|reason| reason.mutes_group());
        let updates_index = reasons.iter().any(|reason| reason.updates_index());

        let mut extras: Vec<VolumeEventExtra> = Vec::new();
        for reason in reasons {
            let extra = reason.extra_info();
            if extra != VolumeEventExtra::None && !extras.contains(&extra) {
                extras.push(extra);
            }
        }

        // Bucket by zone so per-zone work stays contiguous.
        let mut by_zone: BTreeMap<ZoneId, Vec<&DeviceGainConfig>> = BTreeMap::new();
        for config in configs {
            if !self.zones.contains(config.zone_id) {
                log::warn!(
                    "[HalGainDispatcher] dropping gain config for unknown zone {} ({})",
                    config.zone_id,
                    config.device_address
                );
                continue;
            }
            by_zone.entry(config.zone_id).or_default().push(config);
        }

        let mut events: Vec<VolumeGroupEvent> = Vec::new();
        let mut zones_with_mute_changes: Vec<ZoneId> = Vec::new();

        for (zone_id, zone_configs) in by_zone {
            let Some(zone) = self.zones.zone(zone_id) else {
                continue;
            };
            let current = zone.current_config();
            let mut zone_mute_changed = false;

            for config in zone_configs {
                let Some(group) = current.group_for_address(&config.device_address) else {
                    log::warn!(
                        "[HalGainDispatcher] zone {zone_id}: no group for address {}, dropping",
                        config.device_address
                    );
                    continue;
                };

                let mut flags = VolumeEventFlags::NONE;
                // Feedback indices first: the hardware already applied them,
                // so the restriction updates below must not re-commit a
                // stale effective gain over them.
                if updates_index {
                    match group.adopt_hal_index(config.volume_index) {
                        Ok(adopted) => flags |= adopted,
                        Err(err) => {
                            log::warn!(
                                "[HalGainDispatcher] zone {zone_id}: feedback index for {} rejected: {err}",
                                config.device_address
                            );
                        }
                    }
                }
                flags |= group.set_hal_blocked(blocks);
                flags |= group.set_limit_index(limits.then_some(config.volume_index));
                flags |= group.set_attenuation_index(attenuates.then_some(config.volume_index));
                let mute_flags = group.set_hal_muted(mutes);
                zone_mute_changed |= !mute_flags.is_empty() || blocks;
                flags |= mute_flags;

                if !flags.is_empty() {
                    events.push(group.make_event(flags, extras.clone()));
                }
            }

            if zone_mute_changed {
                zones_with_mute_changes.push(zone_id);
            }
        }

        // A batch that mutated nothing emits nothing.
        if !events.is_empty() {
            self.fanout.emit(events);
        }
        for zone_id in zones_with_mute_changes {
            self.muting.refresh_zone(zone_id);
        }
    }
}
