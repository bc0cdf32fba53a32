//! Zone configurations: alternative device layouts for one zone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::AudioContext;
use crate::volume::group::{GroupId, VolumeGroup};
use crate::zone::ZoneId;

/// Zone-configuration identifier within a zone.
pub type ConfigId = u32;

/// One device layout for a zone: an ordered collection of volume groups.
///
/// Groups are exclusively owned by their configuration. A configuration
/// backed by dynamic devices toggles `active` as those devices appear and
/// disappear; the owning zone resolves the effective configuration from the
/// default/selected/active flags.
pub struct ZoneConfig {
    zone_id: ZoneId,
    config_id: ConfigId,
    name: String,
    is_default: bool,
    groups: Vec<Arc<VolumeGroup>>,
    active: AtomicBool,
}

impl ZoneConfig {
    /// Creates a configuration over the given groups.
    ///
    /// Default configurations start active; non-default ones start inactive
    /// until their devices are reported present.
    #[must_use]
    pub fn new(
        zone_id: ZoneId,
        config_id: ConfigId,
        name: impl Into<String>,
        is_default: bool,
        groups: Vec<Arc<VolumeGroup>>,
    ) -> Self {
        Self {
            zone_id,
            config_id,
            name: name.into(),
            is_default,
            groups,
            active: AtomicBool::new(is_default),
        }
    }

    /// Zone owning this configuration.
    #[must_use]
    pub fn zone_id(&self) -> ZoneId {
        self.zone_id
    }

    /// Configuration identifier.
    #[must_use]
    pub fn config_id(&self) -> ConfigId {
        self.config_id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this is the zone's default configuration.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Whether the configuration's devices are currently available.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Marks the configuration's device availability.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// The configuration's volume groups, in declaration order.
    #[must_use]
    pub fn groups(&self) -> &[Arc<VolumeGroup>] {
        &self.groups
    }

    /// Looks up a group by id.
    #[must_use]
    pub fn group(&self, group_id: GroupId) -> Option<&Arc<VolumeGroup>> {
        self.groups.iter().find(|group| group.group_id() == group_id)
    }

    /// The group serving a context, if any group binds it.
    #[must_use]
    pub fn group_for_context(&self, context: AudioContext) -> Option<&Arc<VolumeGroup>> {
        self.groups
            .iter()
            .find(|group| group.address_for_context(context).is_some())
    }

    /// The group owning a device address, if any.
    #[must_use]
    pub fn group_for_address(&self, address: &str) -> Option<&Arc<VolumeGroup>> {
        self.groups.iter().find(|group| group.has_address(address))
    }

    /// All device addresses of the configuration.
    #[must_use]
    pub fn addresses(&self) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|group| group.addresses())
            .collect()
    }
}
