//! The audio policy service façade.
//!
//! Owns every aggregate built by [`crate::bootstrap`] and exposes the
//! inbound surfaces: client focus requests, user volume operations, HAL
//! entry points (focus, gain batches, port changes), playback and telephony
//! activation, listener registration and the media-audio request protocol.
//! Teardown is explicit: [`AudioPolicyService::release`] unregisters all
//! external callbacks and stops callback dispatch.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::context::{AudioUsage, ContextMap};
use crate::error::{PolicyError, PolicyResult};
use crate::events::{
    LegacyVolumeListener, VolumeEventFanout, VolumeEventListener, VolumeGroupEvent,
};
use crate::focus::{
    FocusArbiter, FocusClient, FocusGainType, FocusHolderInfo, FocusRequest, FocusRequestResult,
    InteractionMatrix,
};
use crate::hal::{DeviceGainConfig, GainChangeReason, HalFocusBridge};
use crate::services::activation::{CallState, PlaybackActivationMonitor};
use crate::services::ducking::DuckingEngine;
use crate::services::gain_dispatcher::HalGainDispatcher;
use crate::services::media_request::{
    MediaAudioRequestBroker, MediaRequestApprover, MediaRequestClient, MediaRequestId,
    OccupantZoneId,
};
use crate::services::muting::MutingService;
use crate::volume::device::{AudioDevice, DeviceRegistry};
use crate::volume::group::{GroupDevice, GroupId, VolumeGroup};
use crate::zone::{ConfigId, ZoneId, ZoneRegistry};

/// The assembled audio policy core.
pub struct AudioPolicyService {
    zones: Arc<ZoneRegistry>,
    devices: Arc<DeviceRegistry>,
    context_map: Arc<ContextMap>,
    matrix: Arc<InteractionMatrix>,
    focus: Arc<FocusArbiter>,
    fanout: Arc<VolumeEventFanout>,
    ducking: Arc<DuckingEngine>,
    muting: Arc<MutingService>,
    gain_dispatcher: HalGainDispatcher,
    activation: PlaybackActivationMonitor,
    broker: Arc<MediaAudioRequestBroker>,
    hal_bridge: HalFocusBridge,
    cancel: CancellationToken,
}

impl AudioPolicyService {
    /// Assembles the service from its bootstrapped parts.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        zones: Arc<ZoneRegistry>,
        devices: Arc<DeviceRegistry>,
        context_map: Arc<ContextMap>,
        matrix: Arc<InteractionMatrix>,
        focus: Arc<FocusArbiter>,
        fanout: Arc<VolumeEventFanout>,
        ducking: Arc<DuckingEngine>,
        muting: Arc<MutingService>,
        gain_dispatcher: HalGainDispatcher,
        activation: PlaybackActivationMonitor,
        broker: Arc<MediaAudioRequestBroker>,
        hal_bridge: HalFocusBridge,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            zones,
            devices,
            context_map,
            matrix,
            focus,
            fanout,
            ducking,
            muting,
            gain_dispatcher,
            activation,
            broker,
            hal_bridge,
            cancel,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Focus
    // ─────────────────────────────────────────────────────────────────────

    /// Submits a client focus request.
    pub fn request_audio_focus(
        &self,
        request: FocusRequest,
        client: Arc<dyn FocusClient>,
    ) -> FocusRequestResult {
        self.focus.request_focus(request, client)
    }

    /// Releases a client's focus stake.
    pub fn abandon_audio_focus(&self, zone_id: ZoneId, client_id: &str) {
        self.focus.abandon_focus(zone_id, client_id);
    }

    /// Holder snapshot of a zone.
    #[must_use]
    pub fn focus_holders(&self, zone_id: ZoneId) -> Vec<FocusHolderInfo> {
        self.focus.holders(zone_id)
    }

    /// Updates the reject-navigation-during-call user setting.
    pub fn set_reject_navigation_on_call(&self, reject: bool) {
        log::info!("[AudioPolicyService] reject-navigation-on-call = {reject}");
        self.matrix.set_reject_navigation_on_call(reject);
    }

    /// Current state of the reject-navigation-during-call setting.
    #[must_use]
    pub fn reject_navigation_on_call(&self) -> bool {
        self.matrix.reject_navigation_on_call()
    }

    // ─────────────────────────────────────────────────────────────────────
    // HAL inbound
    // ─────────────────────────────────────────────────────────────────────

    /// `requestAudioFocus` from the HAL.
    pub fn request_hal_audio_focus(
        &self,
        usage: AudioUsage,
        zone_id: ZoneId,
        gain_type: FocusGainType,
    ) -> FocusRequestResult {
        self.hal_bridge.request_focus(usage, zone_id, gain_type)
    }

    /// `abandonAudioFocus` from the HAL.
    pub fn abandon_hal_audio_focus(&self, usage: AudioUsage, zone_id: ZoneId) {
        self.hal_bridge.abandon_focus(usage, zone_id);
    }

    /// `onAudioDeviceGainsChanged` from the HAL.
    pub fn on_audio_device_gains_changed(
        &self,
        reasons: &[GainChangeReason],
        configs: &[DeviceGainConfig],
    ) {
        self.gain_dispatcher
            .on_audio_device_gains_changed(reasons, configs);
    }

    /// `onAudioPortsChanged` from the HAL: `device_infos` is the current
    /// set of connected devices with up-to-date gain capabilities.
    ///
    /// Dynamic devices absent from the list are dropped from the registry;
    /// every group whose membership intersects the change recomputes its
    /// gain stage, and configuration activation follows device presence.
    pub fn on_audio_ports_changed(&self, device_infos: &[AudioDevice]) {
        let reported: HashSet<&str> = device_infos
            .iter()
            .map(|device| device.address.as_str())
            .collect();

        let mut changed: HashSet<String> = HashSet::new();
        for address in self.devices.addresses() {
            let Some(known) = self.devices.get(&address) else {
                continue;
            };
            if known.device_type.is_dynamic() && !reported.contains(address.as_str()) {
                log::info!("[AudioPolicyService] dynamic device {address} disconnected");
                self.devices.remove(&address);
                changed.insert(address);
            }
        }
        for device in device_infos {
            let known = self.devices.get(&device.address);
            let is_new = match &known {
                Some(existing) => existing.gain != device.gain,
                None => true,
            };
            if is_new {
                changed.insert(device.address.clone());
            }
            self.devices.insert(device.clone());
        }
        if changed.is_empty() {
            return;
        }

        let mut events: Vec<VolumeGroupEvent> = Vec::new();
        for zone in self.zones.zones() {
            for config in zone.configs() {
                let mut all_groups_present = true;
                for group in config.groups() {
                    let touches_change = group
                        .configured_addresses()
                        .iter()
                        .any(|address| changed.contains(address));
                    let present: Vec<GroupDevice> = group
                        .configured_addresses()
                        .iter()
                        .filter_map(|address| {
                            self.devices.get(address).map(|device| GroupDevice {
                                address: address.clone(),
                                gain: device.gain,
                            })
                        })
                        .collect();
                    if present.is_empty() {
                        all_groups_present = false;
                        continue;
                    }
                    if !touches_change {
                        continue;
                    }
                    match group.update_devices(present) {
                        Ok(flags) if !flags.is_empty() => {
                            events.push(group.make_event(flags, Vec::new()));
                        }
                        Ok(_) => {}
                        Err(err) => {
                            log::error!(
                                "[AudioPolicyService] gain-stage recompute failed for {}: {err}",
                                group.name()
                            );
                        }
                    }
                }
                // Default configurations stay selectable regardless.
                if !config.is_default() {
                    config.set_active(all_groups_present);
                }
            }
        }
        if !events.is_empty() {
            self.fanout.emit(events);
        }
    }

    /// Reconciles a core-mixer group after an external mixer change.
    ///
    /// # Errors
    ///
    /// `UnknownZone` / `UnknownGroup` for bad identifiers.
    pub fn on_mixer_volume_changed(&self, zone_id: ZoneId, group_id: GroupId) -> PolicyResult<()> {
        let group = self.group(zone_id, group_id)?;
        let flags = group.reconcile_with_mixer();
        if !flags.is_empty() {
            self.fanout.emit(vec![group.make_event(flags, Vec::new())]);
            self.muting.refresh_zone(zone_id);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Volume
    // ─────────────────────────────────────────────────────────────────────

    /// Sets the gain index of a group.
    ///
    /// # Errors
    ///
    /// `UnknownZone` / `UnknownGroup` / `IndexOutOfRange`.
    pub fn set_group_volume_index(
        &self,
        zone_id: ZoneId,
        group_id: GroupId,
        index: i32,
    ) -> PolicyResult<()> {
        let group = self.group(zone_id, group_id)?;
        let flags = group.set_current_index(index)?;
        if !flags.is_empty() {
            self.fanout.emit(vec![group.make_event(flags, Vec::new())]);
        }
        Ok(())
    }

    /// Current gain index of a group.
    ///
    /// # Errors
    ///
    /// `UnknownZone` / `UnknownGroup`.
    pub fn group_volume_index(&self, zone_id: ZoneId, group_id: GroupId) -> PolicyResult<i32> {
        Ok(self.group(zone_id, group_id)?.current_index())
    }

    /// Mutes or unmutes a group (user initiated).
    ///
    /// # Errors
    ///
    /// `UnknownZone` / `UnknownGroup`.
    pub fn set_group_mute(
        &self,
        zone_id: ZoneId,
        group_id: GroupId,
        muted: bool,
    ) -> PolicyResult<()> {
        let group = self.group(zone_id, group_id)?;
        let flags = group.set_user_muted(muted);
        if !flags.is_empty() {
            self.fanout.emit(vec![group.make_event(flags, Vec::new())]);
            self.muting.refresh_zone(zone_id);
        }
        Ok(())
    }

    /// Whether a group is muted (by anyone).
    ///
    /// # Errors
    ///
    /// `UnknownZone` / `UnknownGroup`.
    pub fn is_group_muted(&self, zone_id: ZoneId, group_id: GroupId) -> PolicyResult<bool> {
        Ok(self.group(zone_id, group_id)?.is_muted())
    }

    /// Mutes or unmutes every group of a zone's current configuration.
    ///
    /// # Errors
    ///
    /// `UnknownZone`.
    pub fn set_master_mute(&self, zone_id: ZoneId, muted: bool) -> PolicyResult<()> {
        let zone = self
            .zones
            .zone(zone_id)
            .ok_or(PolicyError::UnknownZone(zone_id))?;
        let config = zone.current_config();
        let mut events = Vec::new();
        for group in config.groups() {
            let flags = group.set_user_muted(muted);
            if !flags.is_empty() {
                events.push(group.make_event(flags, Vec::new()));
            }
        }
        if !events.is_empty() {
            self.fanout.emit(events);
            self.muting.refresh_zone(zone_id);
        }
        self.fanout.emit_master_mute(zone_id, muted);
        Ok(())
    }

    /// Selects a zone configuration (the default clears the selection).
    ///
    /// # Errors
    ///
    /// `UnknownZone` or `Configuration` for an unknown configuration id.
    pub fn select_zone_configuration(
        &self,
        zone_id: ZoneId,
        config_id: ConfigId,
    ) -> PolicyResult<()> {
        let zone = self
            .zones
            .zone(zone_id)
            .ok_or(PolicyError::UnknownZone(zone_id))?;
        zone.select_configuration(config_id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Playback and telephony
    // ─────────────────────────────────────────────────────────────────────

    /// A playback configuration became active.
    pub fn on_playback_started(&self, zone_id: ZoneId, usage: AudioUsage, uid: u32) {
        self.activation.on_playback_started(zone_id, usage, uid);
    }

    /// Telephony call-state change.
    pub fn on_call_state_changed(&self, state: CallState) {
        self.activation.on_call_state_changed(state);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Listeners and media requests
    // ─────────────────────────────────────────────────────────────────────

    /// Registers a rich volume-event listener.
    pub fn register_volume_listener(
        &self,
        owner: impl Into<String>,
        listener: Arc<dyn VolumeEventListener>,
    ) {
        self.fanout.register_listener(owner, listener);
    }

    /// Registers a legacy volume listener.
    pub fn register_legacy_volume_listener(
        &self,
        owner: impl Into<String>,
        listener: Arc<dyn LegacyVolumeListener>,
    ) {
        self.fanout.register_legacy_listener(owner, listener);
    }

    /// Removes an owner from both volume-listener channels.
    pub fn unregister_volume_listener(&self, owner: &str) {
        self.fanout.unregister(owner);
    }

    /// Registers a media-request approver.
    pub fn register_media_request_approver(
        &self,
        owner: impl Into<String>,
        approver: Arc<dyn MediaRequestApprover>,
    ) {
        self.broker.register_approver(owner, approver);
    }

    /// Removes a media-request approver.
    pub fn unregister_media_request_approver(&self, owner: &str) {
        self.broker.unregister_approver(owner);
    }

    /// Requests media-audio routing for an occupant.
    ///
    /// # Errors
    ///
    /// See [`MediaAudioRequestBroker::request`].
    pub fn request_media_audio(
        &self,
        client_id: impl Into<String>,
        client: Arc<dyn MediaRequestClient>,
        occupant: OccupantZoneId,
    ) -> PolicyResult<MediaRequestId> {
        self.broker.request(client_id, client, occupant)
    }

    /// Approves a media-audio request.
    ///
    /// # Errors
    ///
    /// See [`MediaAudioRequestBroker::accept`].
    pub fn accept_media_audio(&self, approver: &str, request_id: MediaRequestId) -> PolicyResult<()> {
        self.broker.accept(approver, request_id)
    }

    /// Rejects a media-audio request.
    ///
    /// # Errors
    ///
    /// See [`MediaAudioRequestBroker::reject`].
    pub fn reject_media_audio(&self, request_id: MediaRequestId) -> PolicyResult<()> {
        self.broker.reject(request_id)
    }

    /// Cancels a media-audio request.
    ///
    /// # Errors
    ///
    /// See [`MediaAudioRequestBroker::cancel`].
    pub fn cancel_media_audio(&self, request_id: MediaRequestId) -> PolicyResult<()> {
        self.broker.cancel(request_id)
    }

    /// Stops approved media-audio routing.
    ///
    /// # Errors
    ///
    /// See [`MediaAudioRequestBroker::stop`].
    pub fn stop_media_audio(&self, request_id: MediaRequestId) -> PolicyResult<()> {
        self.broker.stop(request_id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Introspection and teardown
    // ─────────────────────────────────────────────────────────────────────

    /// The zone registry.
    #[must_use]
    pub fn zones(&self) -> &Arc<ZoneRegistry> {
        &self.zones
    }

    /// The context map.
    #[must_use]
    pub fn context_map(&self) -> &Arc<ContextMap> {
        &self.context_map
    }

    /// Currently ducked addresses of a zone.
    #[must_use]
    pub fn ducked_addresses(&self, zone_id: ZoneId) -> Vec<String> {
        self.ducking.ducked_addresses(zone_id)
    }

    /// Tears the service down: unregisters all external callbacks and
    /// stops callback dispatch. The service must not be used afterwards.
    pub fn release(&self) {
        log::info!("[AudioPolicyService] releasing");
        self.fanout.clear();
        self.broker.clear_approvers();
        self.cancel.cancel();
    }

    fn group(&self, zone_id: ZoneId, group_id: GroupId) -> PolicyResult<Arc<VolumeGroup>> {
        let zone = self
            .zones
            .zone(zone_id)
            .ok_or(PolicyError::UnknownZone(zone_id))?;
        let config = zone.current_config();
        config
            .group(group_id)
            .map(Arc::clone)
            .ok_or(PolicyError::UnknownGroup { zone_id, group_id })
    }
}
