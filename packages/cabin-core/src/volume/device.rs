//! Output-device model and the shared device registry.
//!
//! Devices are identified by a zone-unique string address. The registry is a
//! lookup-only store shared between zone configurations; volume groups refer
//! to devices by address and never own them.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, PolicyResult};

/// Kind of audio device behind an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Fixed cabin speaker.
    BuiltinSpeaker,
    /// Audio bus into an external amplifier.
    Bus,
    /// Bluetooth A2DP sink.
    Bluetooth,
    /// HDMI audio output.
    Hdmi,
    /// USB audio device.
    Usb,
    /// Bluetooth LE audio sink.
    BleHeadset,
    /// Wired headphones or headset.
    WiredHeadset,
    /// Fixed cabin microphone.
    BuiltinMicrophone,
}

impl DeviceType {
    /// Returns whether devices of this type can appear and disappear at
    /// runtime.
    #[must_use]
    pub fn is_dynamic(self) -> bool {
        matches!(
            self,
            Self::Bluetooth | Self::Hdmi | Self::Usb | Self::BleHeadset | Self::WiredHeadset
        )
    }

    /// Returns whether this is an input device type.
    #[must_use]
    pub fn is_input(self) -> bool {
        matches!(self, Self::BuiltinMicrophone)
    }
}

/// Gain range of a device or of a whole volume group, in millibel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GainInfo {
    /// Smallest supported gain.
    pub min_mb: i32,
    /// Largest supported gain.
    pub max_mb: i32,
    /// Gain applied when no stored index exists.
    pub default_mb: i32,
    /// Quantization step; never zero.
    pub step_mb: i32,
}

impl GainInfo {
    /// Validates the `min ≤ default ≤ max`, `step ≠ 0` invariants.
    pub fn validate(&self) -> PolicyResult<()> {
        if self.step_mb == 0 {
            return Err(PolicyError::Configuration(
                "gain step must not be zero".to_string(),
            ));
        }
        if self.min_mb > self.max_mb || self.default_mb < self.min_mb || self.default_mb > self.max_mb
        {
            return Err(PolicyError::Configuration(format!(
                "gain range violates min <= default <= max: min={} default={} max={}",
                self.min_mb, self.default_mb, self.max_mb
            )));
        }
        Ok(())
    }

    /// Largest valid gain index: `(max - min) / step`.
    #[must_use]
    pub fn max_index(&self) -> i32 {
        (self.max_mb - self.min_mb) / self.step_mb
    }

    /// Gain in millibel for an index: `min + index * step`.
    #[must_use]
    pub fn gain_for_index(&self, index: i32) -> i32 {
        self.min_mb + index * self.step_mb
    }

    /// Index for a gain in millibel: `(gain - min) / step`.
    #[must_use]
    pub fn index_for_gain(&self, gain_mb: i32) -> i32 {
        (gain_mb - self.min_mb) / self.step_mb
    }

    /// Index corresponding to the default gain.
    #[must_use]
    pub fn default_index(&self) -> i32 {
        self.index_for_gain(self.default_mb)
    }
}

/// An addressable audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDevice {
    /// Zone-unique device address.
    pub address: String,
    /// Device kind.
    pub device_type: DeviceType,
    /// Gain capabilities. Meaningless for input devices.
    pub gain: GainInfo,
}

/// Lookup-only registry of known devices, shared across zones.
///
/// Ownership stays here; volume groups and zone configurations hold
/// addresses and query on demand. Dynamic devices are inserted and removed
/// by `on_audio_ports_changed`.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<String, AudioDevice>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a device. Returns the previous entry, if any.
    pub fn insert(&self, device: AudioDevice) -> Option<AudioDevice> {
        self.devices.insert(device.address.clone(), device)
    }

    /// Removes a device by address.
    pub fn remove(&self, address: &str) -> Option<AudioDevice> {
        self.devices.remove(address).map(|(_, device)| device)
    }

    /// Looks up a device by address.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<AudioDevice> {
        self.devices.get(address).map(|entry| entry.value().clone())
    }

    /// Returns whether a device with the address is known.
    #[must_use]
    pub fn contains(&self, address: &str) -> bool {
        self.devices.contains_key(address)
    }

    /// All registered addresses.
    #[must_use]
    pub fn addresses(&self) -> Vec<String> {
        self.devices
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speaker_gain() -> GainInfo {
        GainInfo {
            min_mb: -3200,
            max_mb: 600,
            default_mb: 0,
            step_mb: 100,
        }
    }

    #[test]
    fn gain_index_arithmetic_round_trips() {
        let gain = speaker_gain();
        assert_eq!(gain.max_index(), 38);
        assert_eq!(gain.gain_for_index(0), -3200);
        assert_eq!(gain.gain_for_index(32), 0);
        assert_eq!(gain.index_for_gain(gain.gain_for_index(17)), 17);
        assert_eq!(gain.default_index(), 32);
    }

    #[test]
    fn zero_step_is_rejected() {
        let gain = GainInfo {
            min_mb: 0,
            max_mb: 100,
            default_mb: 0,
            step_mb: 0,
        };
        assert!(gain.validate().is_err());
    }

    #[test]
    fn default_outside_range_is_rejected() {
        let gain = GainInfo {
            min_mb: 0,
            max_mb: 100,
            default_mb: 200,
            step_mb: 10,
        };
        assert!(gain.validate().is_err());
    }

    #[test]
    fn dynamic_types_are_removable() {
        assert!(DeviceType::Bluetooth.is_dynamic());
        assert!(DeviceType::Usb.is_dynamic());
        assert!(!DeviceType::Bus.is_dynamic());
        assert!(!DeviceType::BuiltinSpeaker.is_dynamic());
    }

    #[test]
    fn registry_lookup_by_address() {
        let registry = DeviceRegistry::new();
        registry.insert(AudioDevice {
            address: "bus0_media".to_string(),
            device_type: DeviceType::Bus,
            gain: speaker_gain(),
        });

        assert!(registry.contains("bus0_media"));
        assert_eq!(registry.get("bus0_media").unwrap().device_type, DeviceType::Bus);
        assert!(registry.get("bus1_nav").is_none());

        registry.remove("bus0_media");
        assert!(registry.is_empty());
    }
}
