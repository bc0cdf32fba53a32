//! Service configuration types.
//!
//! The XML (or other) source format is parsed outside the core; these types
//! are the validated hand-off. `validate()` implements the fatal
//! configuration errors: a config that passes here builds a service, one
//! that does not aborts initialization.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::context::AudioContext;
use crate::error::{PolicyError, PolicyResult};
use crate::services::activation::ActivationVolumeConfig;
use crate::volume::device::{DeviceType, GainInfo};
use crate::zone::{ZoneId, PRIMARY_ZONE_ID};

fn default_true() -> bool {
    true
}

fn default_media_request_max_id() -> u64 {
    u64::from(u32::MAX)
}

/// One physical device of a zone or group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefinition {
    /// Zone-unique device address.
    pub address: String,
    /// Device kind.
    pub device_type: DeviceType,
    /// Gain capabilities.
    pub gain: GainInfo,
}

/// Binds one context to a member address of a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBinding {
    /// Context being bound.
    pub context: AudioContext,
    /// Member address serving it.
    pub address: String,
}

/// One volume group of a zone configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDefinition {
    /// Group id, unique within the configuration.
    pub group_id: u32,
    /// Display name.
    pub name: String,
    /// Member devices, in priority order.
    pub devices: Vec<DeviceDefinition>,
    /// Context→address bindings.
    pub context_bindings: Vec<ContextBinding>,
    /// Optional activation-volume window.
    #[serde(default)]
    pub activation: Option<ActivationVolumeConfig>,
    /// Present for core-mixer groups: the mixer's slot id.
    #[serde(default)]
    pub mixer_group_id: Option<u32>,
}

/// One device layout of a zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfigDefinition {
    /// Configuration id, unique within the zone.
    pub config_id: u32,
    /// Display name.
    pub name: String,
    /// Whether this is the zone's default layout.
    #[serde(default)]
    pub is_default: bool,
    /// Volume groups of the layout.
    pub groups: Vec<GroupDefinition>,
}

/// One audio zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneDefinition {
    /// Stable zone id; the primary zone is 0.
    pub zone_id: ZoneId,
    /// Display name.
    pub name: String,
    /// Alternative layouts; exactly one default.
    pub configs: Vec<ZoneConfigDefinition>,
    /// Input devices attached to the zone.
    #[serde(default)]
    pub input_devices: Vec<DeviceDefinition>,
}

/// Complete service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// All zones; must include the primary zone.
    pub zones: Vec<ZoneDefinition>,
    /// Initial state of the reject-navigation-during-call setting.
    #[serde(default)]
    pub reject_navigation_on_call: bool,
    /// Whether dynamic routing is enabled (addresses unique across zones).
    #[serde(default = "default_true")]
    pub dynamic_routing_enabled: bool,
    /// Maximum media-request id before the counter wraps to zero.
    #[serde(default = "default_media_request_max_id")]
    pub media_request_max_id: u64,
}

impl PolicyConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// `PolicyError::Configuration` describing the first violation found:
    /// missing/duplicate zones, missing primary microphone, default-config
    /// violations, step mismatches, cross-group address reuse, dangling
    /// context bindings, or activation-window nonsense.
    pub fn validate(&self) -> PolicyResult<()> {
        if self.zones.is_empty() {
            return Err(PolicyError::Configuration("no zones configured".into()));
        }

        let mut zone_ids = HashSet::new();
        // Address → owning zone, for the cross-zone uniqueness check.
        let mut address_zones: HashMap<&str, ZoneId> = HashMap::new();

        for zone in &self.zones {
            if !zone_ids.insert(zone.zone_id) {
                return Err(PolicyError::Configuration(format!(
                    "duplicate zone id {}",
                    zone.zone_id
                )));
            }
            self.validate_zone(zone, &mut address_zones)?;
        }

        if !zone_ids.contains(&PRIMARY_ZONE_ID) {
            return Err(PolicyError::Configuration(
                "primary zone (id 0) is missing".into(),
            ));
        }
        Ok(())
    }

    fn validate_zone<'config>(
        &self,
        zone: &'config ZoneDefinition,
        address_zones: &mut HashMap<&'config str, ZoneId>,
    ) -> PolicyResult<()> {
        if zone.configs.is_empty() {
            return Err(PolicyError::Configuration(format!(
                "zone {} has no configurations",
                zone.zone_id
            )));
        }
        let defaults = zone.configs.iter().filter(|config| config.is_default).count();
        if defaults != 1 {
            return Err(PolicyError::Configuration(format!(
                "zone {} must have exactly one default configuration, found {defaults}",
                zone.zone_id
            )));
        }
        let mut config_ids = HashSet::new();
        for config in &zone.configs {
            if !config_ids.insert(config.config_id) {
                return Err(PolicyError::Configuration(format!(
                    "zone {}: duplicate configuration id {}",
                    zone.zone_id, config.config_id
                )));
            }
            self.validate_config(zone.zone_id, config, address_zones)?;
        }

        if zone.zone_id == PRIMARY_ZONE_ID
            && !zone
                .input_devices
                .iter()
                .any(|device| device.device_type == DeviceType::BuiltinMicrophone)
        {
            return Err(PolicyError::Configuration(
                "primary zone must have a built-in microphone".into(),
            ));
        }
        Ok(())
    }

    fn validate_config<'config>(
        &self,
        zone_id: ZoneId,
        config: &'config ZoneConfigDefinition,
        address_zones: &mut HashMap<&'config str, ZoneId>,
    ) -> PolicyResult<()> {
        let mut group_ids = HashSet::new();
        let mut config_addresses: HashSet<&str> = HashSet::new();
        let mut bound_contexts: HashSet<AudioContext> = HashSet::new();

        for group in &config.groups {
            if !group_ids.insert(group.group_id) {
                return Err(PolicyError::Configuration(format!(
                    "zone {zone_id} config {}: duplicate group id {}",
                    config.config_id, group.group_id
                )));
            }
            if group.devices.is_empty() {
                return Err(PolicyError::Configuration(format!(
                    "zone {zone_id} group {}: no member devices",
                    group.name
                )));
            }

            let step = group.devices[0].gain.step_mb;
            for device in &group.devices {
                device.gain.validate()?;
                if device.gain.step_mb != step {
                    return Err(PolicyError::Configuration(format!(
                        "zone {zone_id} group {}: step mismatch on {}",
                        group.name, device.address
                    )));
                }
                if !config_addresses.insert(device.address.as_str()) {
                    return Err(PolicyError::Configuration(format!(
                        "zone {zone_id} config {}: address {} appears in multiple groups",
                        config.config_id, device.address
                    )));
                }
                if self.dynamic_routing_enabled {
                    match address_zones.get(device.address.as_str()) {
                        Some(owner) if *owner != zone_id => {
                            return Err(PolicyError::Configuration(format!(
                                "address {} is used by both zone {owner} and zone {zone_id}",
                                device.address
                            )));
                        }
                        _ => {
                            address_zones.insert(device.address.as_str(), zone_id);
                        }
                    }
                }
            }

            for binding in &group.context_bindings {
                if !group
                    .devices
                    .iter()
                    .any(|device| device.address == binding.address)
                {
                    return Err(PolicyError::Configuration(format!(
                        "zone {zone_id} group {}: context {:?} bound to non-member address {}",
                        group.name, binding.context, binding.address
                    )));
                }
                if !bound_contexts.insert(binding.context) {
                    return Err(PolicyError::Configuration(format!(
                        "zone {zone_id} config {}: context {:?} bound in multiple groups",
                        config.config_id, binding.context
                    )));
                }
            }

            if let Some(activation) = &group.activation {
                if activation.min_activation_pct > activation.max_activation_pct
                    || activation.max_activation_pct > 100
                {
                    return Err(PolicyError::Configuration(format!(
                        "zone {zone_id} group {}: activation window {}..{} is invalid",
                        group.name,
                        activation.min_activation_pct,
                        activation.max_activation_pct
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::activation::ActivationTrigger;

    fn device(address: &str) -> DeviceDefinition {
        DeviceDefinition {
            address: address.to_string(),
            device_type: DeviceType::Bus,
            gain: GainInfo {
                min_mb: 0,
                max_mb: 4000,
                default_mb: 1500,
                step_mb: 100,
            },
        }
    }

    fn microphone() -> DeviceDefinition {
        DeviceDefinition {
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

    fn group(group_id: u32, address: &str, context: AudioContext) -> GroupDefinition {
        GroupDefinition {
            group_id,
            name: format!("group{group_id}"),
            devices: vec![device(address)],
            context_bindings: vec![ContextBinding {
                context,
                address: address.to_string(),
            }],
            activation: None,
            mixer_group_id: None,
        }
    }

    fn minimal() -> PolicyConfig {
        PolicyConfig {
            zones: vec![ZoneDefinition {
                zone_id: 0,
                name: "driver".to_string(),
                configs: vec![ZoneConfigDefinition {
                    config_id: 0,
                    name: "default".to_string(),
                    is_default: true,
                    groups: vec![group(0, "bus0_media", AudioContext::Music)],
                }],
                input_devices: vec![microphone()],
            }],
            reject_navigation_on_call: false,
            dynamic_routing_enabled: true,
            media_request_max_id: u64::from(u32::MAX),
        }
    }

    #[test]
    fn minimal_config_validates() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn missing_primary_zone_is_fatal() {
        let mut config = minimal();
        config.zones[0].zone_id = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_microphone_is_fatal() {
        let mut config = minimal();
        config.zones[0].input_devices.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn two_defaults_are_fatal() {
        let mut config = minimal();
        let mut second = config.zones[0].configs[0].clone();
        second.config_id = 1;
        second.groups = vec![group(0, "bus9_alt", AudioContext::Music)];
        config.zones[0].configs.push(second);
        assert!(config.validate().is_err());
    }

    #[test]
    fn step_mismatch_is_fatal() {
        let mut config = minimal();
        let mut odd = device("bus1_other");
        odd.gain.step_mb = 50;
        config.zones[0].configs[0].groups[0].devices.push(odd);
        assert!(config.validate().is_err());
    }

    #[test]
    fn address_in_two_groups_is_fatal() {
        let mut config = minimal();
        config.zones[0].configs[0]
            .groups
            .push(group(1, "bus0_media", AudioContext::Navigation));
        assert!(config.validate().is_err());
    }

    #[test]
    fn address_shared_across_zones_is_fatal_with_dynamic_routing() {
        let mut config = minimal();
        config.zones.push(ZoneDefinition {
            zone_id: 1,
            name: "rear".to_string(),
            configs: vec![ZoneConfigDefinition {
                config_id: 0,
                name: "default".to_string(),
                is_default: true,
                groups: vec![group(0, "bus0_media", AudioContext::Music)],
            }],
            input_devices: vec![],
        });
        assert!(config.validate().is_err());

        config.dynamic_routing_enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn dangling_context_binding_is_fatal() {
        let mut config = minimal();
        config.zones[0].configs[0].groups[0]
            .context_bindings
            .push(ContextBinding {
                context: AudioContext::Navigation,
                address: "bus9_ghost".to_string(),
            });
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_activation_window_is_fatal() {
        let mut config = minimal();
        config.zones[0].configs[0].groups[0].activation = Some(ActivationVolumeConfig {
            min_activation_pct: 90,
            max_activation_pct: 20,
            triggers: vec![ActivationTrigger::OnBoot],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let config = minimal();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PolicyConfig = serde_json::from_str(&json).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.zones.len(), 1);
        assert_eq!(parsed.zones[0].configs[0].groups[0].name, "group0");
    }
}
