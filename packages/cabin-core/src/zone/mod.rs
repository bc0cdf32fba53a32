//! Audio zones: self-contained listening areas.
//!
//! A zone owns its configurations, which own their volume groups. Zones are
//! constructed once at bootstrap and never reshaped; the only runtime
//! mutability is configuration selection and dynamic-device activation.

pub mod config;

pub use config::{ConfigId, ZoneConfig};

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{PolicyError, PolicyResult};
use crate::volume::device::{AudioDevice, DeviceType};

/// Stable numeric zone identifier.
pub type ZoneId = u32;

/// The driver zone. Always present, always id 0.
pub const PRIMARY_ZONE_ID: ZoneId = 0;

/// A listening area with its own focus policy and output devices.
pub struct AudioZone {
    zone_id: ZoneId,
    name: String,
    configs: Vec<Arc<ZoneConfig>>,
    input_devices: Vec<AudioDevice>,
    selected_config: Mutex<Option<ConfigId>>,
}

impl AudioZone {
    /// Creates a zone over the given configurations.
    ///
    /// # Errors
    ///
    /// `PolicyError::Configuration` when the zone has no configurations,
    /// duplicate configuration ids, or not exactly one default.
    pub fn new(
        zone_id: ZoneId,
        name: impl Into<String>,
        configs: Vec<Arc<ZoneConfig>>,
        input_devices: Vec<AudioDevice>,
    ) -> PolicyResult<Self> {
        let name = name.into();
        if configs.is_empty() {
            return Err(PolicyError::Configuration(format!(
                "zone {zone_id} ({name}) has no configurations"
            )));
        }
        let defaults = configs.iter().filter(|config| config.is_default()).count();
        if defaults != 1 {
            return Err(PolicyError::Configuration(format!(
                "zone {zone_id} ({name}) must have exactly one default configuration, found {defaults}"
            )));
        }
        for (position, config) in configs.iter().enumerate() {
            if configs[..position]
                .iter()
                .any(|other| other.config_id() == config.config_id())
            {
                return Err(PolicyError::Configuration(format!(
                    "zone {zone_id} ({name}) has duplicate configuration id {}",
                    config.config_id()
                )));
            }
        }
        Ok(Self {
            zone_id,
            name,
            configs,
            input_devices,
            selected_config: Mutex::new(None),
        })
    }

    /// Zone identifier.
    #[must_use]
    pub fn zone_id(&self) -> ZoneId {
        self.zone_id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All configurations of the zone.
    #[must_use]
    pub fn configs(&self) -> &[Arc<ZoneConfig>] {
        &self.configs
    }

    /// Looks up a configuration by id.
    #[must_use]
    pub fn config(&self, config_id: ConfigId) -> Option<&Arc<ZoneConfig>> {
        self.configs
            .iter()
            .find(|config| config.config_id() == config_id)
    }

    /// The zone's default configuration.
    #[must_use]
    pub fn default_config(&self) -> &Arc<ZoneConfig> {
        self.configs
            .iter()
            .find(|config| config.is_default())
            .unwrap_or_else(|| unreachable!("zone construction enforces one default"))
    }

    /// The currently-effective configuration: the selected one while its
    /// devices are available, otherwise the default.
    #[must_use]
    pub fn current_config(&self) -> Arc<ZoneConfig> {
        let selected = *self.selected_config.lock();
        if let Some(config_id) = selected {
            if let Some(config) = self.config(config_id) {
                if config.is_active() {
                    return Arc::clone(config);
                }
            }
        }
        Arc::clone(self.default_config())
    }

    /// Selects a non-default configuration; selecting the default clears the
    /// selection.
    ///
    /// # Errors
    ///
    /// `PolicyError::Configuration` for an unknown configuration id.
    pub fn select_configuration(&self, config_id: ConfigId) -> PolicyResult<()> {
        let config = self.config(config_id).ok_or_else(|| {
            PolicyError::Configuration(format!(
                "zone {}: unknown configuration {config_id}",
                self.zone_id
            ))
        })?;
        let mut selected = self.selected_config.lock();
        *selected = if config.is_default() {
            None
        } else {
            Some(config_id)
        };
        Ok(())
    }

    /// The selected non-default configuration id, if any.
    #[must_use]
    pub fn selected_config_id(&self) -> Option<ConfigId> {
        *self.selected_config.lock()
    }

    /// Input devices attached to the zone.
    #[must_use]
    pub fn input_devices(&self) -> &[AudioDevice] {
        &self.input_devices
    }

    /// Whether the zone owns a built-in microphone.
    #[must_use]
    pub fn has_builtin_microphone(&self) -> bool {
        self.input_devices
            .iter()
            .any(|device| device.device_type == DeviceType::BuiltinMicrophone)
    }
}

/// Process-wide registry of zones, constructed once at bootstrap.
pub struct ZoneRegistry {
    zones: BTreeMap<ZoneId, Arc<AudioZone>>,
}

impl ZoneRegistry {
    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// `PolicyError::Configuration` on duplicate zone ids or a missing
    /// primary zone.
    pub fn new(zones: Vec<Arc<AudioZone>>) -> PolicyResult<Self> {
        let mut map = BTreeMap::new();
        for zone in zones {
            let zone_id = zone.zone_id();
            if map.insert(zone_id, zone).is_some() {
                return Err(PolicyError::Configuration(format!(
                    "duplicate zone id {zone_id}"
                )));
            }
        }
        if !map.contains_key(&PRIMARY_ZONE_ID) {
            return Err(PolicyError::Configuration(
                "primary zone (id 0) is missing".to_string(),
            ));
        }
        Ok(Self { zones: map })
    }

    /// Looks up a zone.
    #[must_use]
    pub fn zone(&self, zone_id: ZoneId) -> Option<Arc<AudioZone>> {
        self.zones.get(&zone_id).map(Arc::clone)
    }

    /// Whether a zone id is known.
    #[must_use]
    pub fn contains(&self, zone_id: ZoneId) -> bool {
        self.zones.contains_key(&zone_id)
    }

    /// All zones in id order.
    pub fn zones(&self) -> impl Iterator<Item = &Arc<AudioZone>> {
        self.zones.values()
    }

    /// Number of zones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Registries are never empty once constructed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::device::GainInfo;

    fn microphone() -> AudioDevice {
        AudioDevice {
            address: "mic0".to_string(),
            device_type: DeviceType::BuiltinMicrophone,
            gain: GainInfo {
                min_mb: 0,
                max_mb: 0,
                default_mb: 0,
                step_mb: 1,
            },
        }
    }

    fn default_config(zone_id: ZoneId) -> Arc<ZoneConfig> {
        Arc::new(ZoneConfig::new(zone_id, 0, "default", true, vec![]))
    }

    #[test]
    fn zone_requires_exactly_one_default() {
        let no_default = AudioZone::new(
            0,
            "driver",
            vec![Arc::new(ZoneConfig::new(0, 0, "a", false, vec![]))],
            vec![],
        );
        assert!(no_default.is_err());

        let two_defaults = AudioZone::new(
            0,
            "driver",
            vec![
                Arc::new(ZoneConfig::new(0, 0, "a", true, vec![])),
                Arc::new(ZoneConfig::new(0, 1, "b", true, vec![])),
            ],
            vec![],
        );
        assert!(two_defaults.is_err());
    }

    #[test]
    fn selection_falls_back_to_default_while_inactive() {
        let alternate = Arc::new(ZoneConfig::new(0, 1, "bt", false, vec![]));
        let zone = AudioZone::new(
            0,
            "driver",
            vec![default_config(0), Arc::clone(&alternate)],
            vec![microphone()],
        )
        .unwrap();

        zone.select_configuration(1).unwrap();
        assert_eq!(zone.current_config().config_id(), 0, "inactive selection");

        alternate.set_active(true);
        assert_eq!(zone.current_config().config_id(), 1);

        alternate.set_active(false);
        assert_eq!(zone.current_config().config_id(), 0);
    }

    #[test]
    fn selecting_default_clears_selection() {
        let alternate = Arc::new(ZoneConfig::new(0, 1, "bt", false, vec![]));
        alternate.set_active(true);
        let zone = AudioZone::new(
            0,
            "driver",
            vec![default_config(0), alternate],
            vec![microphone()],
        )
        .unwrap();

        zone.select_configuration(1).unwrap();
        assert_eq!(zone.selected_config_id(), Some(1));
        zone.select_configuration(0).unwrap();
        assert_eq!(zone.selected_config_id(), None);
    }

    #[test]
    fn registry_requires_primary_zone() {
        let rear =
            AudioZone::new(1, "rear", vec![default_config(1)], vec![]).unwrap();
        let result = ZoneRegistry::new(vec![Arc::new(rear)]);
        assert!(result.is_err());
    }

    #[test]
    fn registry_rejects_duplicate_ids() {
        let a = AudioZone::new(0, "driver", vec![default_config(0)], vec![microphone()]).unwrap();
        let b = AudioZone::new(0, "copy", vec![default_config(0)], vec![]).unwrap();
        assert!(ZoneRegistry::new(vec![Arc::new(a), Arc::new(b)]).is_err());
    }

    #[test]
    fn microphone_detection() {
        let zone =
            AudioZone::new(0, "driver", vec![default_config(0)], vec![microphone()]).unwrap();
        assert!(zone.has_builtin_microphone());

        let bare = AudioZone::new(1, "rear", vec![default_config(1)], vec![]).unwrap();
        assert!(!bare.has_builtin_microphone());
    }
}
