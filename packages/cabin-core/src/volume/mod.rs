//! Volume-group model: devices, groups, and core-mixer reconciliation.

pub mod device;
pub mod group;
pub mod mixer;

pub use device::{AudioDevice, DeviceRegistry, DeviceType, GainInfo};
pub use group::{GainBackend, GainSink, GroupDevice, GroupId, VolumeGroup};
pub use mixer::{CoreMixer, MixerVolumeState};

use crate::zone::ZoneId;

/// Prefix of the persisted gain-index settings key.
const VOLUME_SETTINGS_PREFIX: &str = "android.car.VOLUME_GROUP/";

/// Settings key under which a group's gain index is persisted.
///
/// The key encodes zone and group as `(zone_id << 8) | group_id`; the format
/// is wire-compatible with the platform settings store and must not change.
#[must_use]
pub fn gain_index_settings_key(zone_id: ZoneId, group_id: GroupId) -> String {
    format!(
        "{VOLUME_SETTINGS_PREFIX}{}",
        (u64::from(zone_id) << 8) | u64::from(group_id)
    )
}

/// Read seam into the external settings store for persisted gain indices.
///
/// Persistence itself lives outside the core; the store is consulted once at
/// bootstrap to seed each group's `current_index`.
pub trait GainIndexStore: Send + Sync {
    /// Returns the persisted gain index for the key, or −1 when unset.
    fn read_gain_index(&self, key: &str) -> i32;
}

/// Looks up the persisted index for a group, treating −1 (and any negative
/// value) as unset.
#[must_use]
pub fn stored_gain_index(
    store: &dyn GainIndexStore,
    zone_id: ZoneId,
    group_id: GroupId,
) -> Option<i32> {
    let value = store.read_gain_index(&gain_index_settings_key(zone_id, group_id));
    (value >= 0).then_some(value)
}
