//! Service bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where the
//! zone/volume model is built from a validated [`PolicyConfig`] and every
//! service is instantiated and wired. Construction is dependency-ordered:
//!
//! 1. Device registry and zone/group tree (fatal configuration errors stop
//!    here)
//! 2. Context map and interaction matrix (process-wide, immutable shape)
//! 3. Event fan-out, muting, gain dispatcher
//! 4. Focus arbiters and the ducking engine (registered as focus observer)
//! 5. Activation monitor, media request broker, HAL focus bridge

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::PolicyConfig;
use crate::context::ContextMap;
use crate::error::{PolicyError, PolicyResult};
use crate::events::VolumeEventFanout;
use crate::focus::{FocusArbiter, FocusObserver, InteractionMatrix};
use crate::hal::{AudioControlHal, HalFocusBridge};
use crate::runtime::{CallbackDispatcher, TokioSpawner};
use crate::service::AudioPolicyService;
use crate::services::activation::{ActivationVolumeConfig, PlaybackActivationMonitor};
use crate::services::ducking::DuckingEngine;
use crate::services::gain_dispatcher::HalGainDispatcher;
use crate::services::media_request::MediaAudioRequestBroker;
use crate::services::muting::MutingService;
use crate::volume::device::{AudioDevice, DeviceRegistry};
use crate::volume::group::{GainBackend, GainSink, GroupDevice, VolumeGroup};
use crate::volume::mixer::CoreMixer;
use crate::volume::{stored_gain_index, GainIndexStore};
use crate::zone::config::ZoneConfig;
use crate::zone::{AudioZone, ZoneId, ZoneRegistry};

/// External collaborators the service is wired against.
pub struct ServiceSeams {
    /// The audio-control HAL.
    pub hal: Arc<dyn AudioControlHal>,
    /// Gain commit seam into the host audio stack.
    pub gain_sink: Arc<dyn GainSink>,
    /// The host core mixer; required when any group declares a mixer slot.
    pub mixer: Option<Arc<dyn CoreMixer>>,
    /// Persisted gain-index store, consulted once per group at build time.
    pub index_store: Option<Arc<dyn GainIndexStore>>,
}

/// Bootstraps the audio policy service.
///
/// # Errors
///
/// `PolicyError::Configuration` for any fatal configuration error.
pub fn bootstrap_service(
    config: &PolicyConfig,
    seams: ServiceSeams,
    spawner: &TokioSpawner,
) -> PolicyResult<AudioPolicyService> {
    let cancel = CancellationToken::new();
    let spawner = spawner.clone();
    let token = cancel.clone();
    build_service(config, seams, cancel, move |name| {
        CallbackDispatcher::serial(&spawner, token.child_token(), name)
    })
}

/// Builds the service with an explicit dispatcher factory.
///
/// Production goes through [`bootstrap_service`]; tests inject inline
/// dispatchers for deterministic callback delivery.
pub(crate) fn build_service(
    config: &PolicyConfig,
    seams: ServiceSeams,
    cancel: CancellationToken,
    mut make_dispatcher: impl FnMut(&'static str) -> CallbackDispatcher,
) -> PolicyResult<AudioPolicyService> {
    config.validate()?;

    let devices = Arc::new(DeviceRegistry::new());
    let mut activation_configs: HashMap<(ZoneId, u32, u32), ActivationVolumeConfig> =
        HashMap::new();
    let mut zones: Vec<Arc<AudioZone>> = Vec::new();

    for zone_def in &config.zones {
        let mut configs: Vec<Arc<ZoneConfig>> = Vec::new();
        for config_def in &zone_def.configs {
            let mut groups: Vec<Arc<VolumeGroup>> = Vec::new();
            for group_def in &config_def.groups {
                let members: Vec<GroupDevice> = group_def
                    .devices
                    .iter()
                    .map(|device_def| {
                        devices.insert(AudioDevice {
                            address: device_def.address.clone(),
                            device_type: device_def.device_type,
                            gain: device_def.gain,
                        });
                        GroupDevice {
                            address: device_def.address.clone(),
                            gain: device_def.gain,
                        }
                    })
                    .collect();

                let backend = match group_def.mixer_group_id {
                    Some(mixer_group_id) => GainBackend::Mixer {
                        mixer_group_id,
                        mixer: Arc::clone(seams.mixer.as_ref().ok_or_else(|| {
                            PolicyError::Configuration(format!(
                                "group {} declares mixer slot {mixer_group_id} but no mixer is wired",
                                group_def.name
                            ))
                        })?),
                    },
                    None => GainBackend::Device {
                        sink: Arc::clone(&seams.gain_sink),
                    },
                };

                let stored = seams.index_store.as_ref().and_then(|store| {
                    stored_gain_index(store.as_ref(), zone_def.zone_id, group_def.group_id)
                });

                let group = VolumeGroup::new(
                    zone_def.zone_id,
                    config_def.config_id,
                    group_def.group_id,
                    group_def.name.clone(),
                    backend,
                    members,
                    group_def
                        .context_bindings
                        .iter()
                        .map(|binding| (binding.context, binding.address.clone()))
                        .collect(),
                    stored,
                )?;
                groups.push(Arc::new(group));

                if let Some(activation) = &group_def.activation {
                    activation_configs.insert(
                        (zone_def.zone_id, config_def.config_id, group_def.group_id),
                        activation.clone(),
                    );
                }
            }
            configs.push(Arc::new(ZoneConfig::new(
                zone_def.zone_id,
                config_def.config_id,
                config_def.name.clone(),
                config_def.is_default,
                groups,
            )));
        }

        for input in &zone_def.input_devices {
            devices.insert(AudioDevice {
                address: input.address.clone(),
                device_type: input.device_type,
                gain: input.gain,
            });
        }
        zones.push(Arc::new(AudioZone::new(
            zone_def.zone_id,
            zone_def.name.clone(),
            configs,
            zone_def
                .input_devices
                .iter()
                .map(|input| AudioDevice {
                    address: input.address.clone(),
                    device_type: input.device_type,
                    gain: input.gain,
                })
                .collect(),
        )?));
    }

    let registry = Arc::new(ZoneRegistry::new(zones)?);
    let context_map = Arc::new(ContextMap::new());
    let matrix = Arc::new(InteractionMatrix::new(config.reject_navigation_on_call));

    let fanout = Arc::new(VolumeEventFanout::new(make_dispatcher("volume-events")));
    let muting = Arc::new(MutingService::new(
        Arc::clone(&registry),
        Arc::clone(&seams.hal),
        make_dispatcher("muting"),
    ));
    let gain_dispatcher = HalGainDispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&fanout),
        Arc::clone(&muting),
    );

    let focus = Arc::new(FocusArbiter::new(
        &registry,
        Arc::clone(&context_map),
        Arc::clone(&matrix),
        |_zone| make_dispatcher("focus"),
    ));
    let ducking = Arc::new(DuckingEngine::new(
        Arc::clone(&registry),
        Arc::clone(&seams.hal),
        make_dispatcher("ducking"),
    ));
    focus.register_observer(Arc::clone(&ducking) as Arc<dyn FocusObserver>);

    let activation = PlaybackActivationMonitor::new(
        Arc::clone(&registry),
        Arc::clone(&context_map),
        Arc::clone(&fanout),
        activation_configs,
    );
    let broker = MediaAudioRequestBroker::new(
        make_dispatcher("media-requests"),
        config.media_request_max_id,
    );
    let hal_bridge = HalFocusBridge::new(
        Arc::clone(&focus),
        Arc::clone(&seams.hal),
        Arc::clone(&registry),
    );

    log::info!(
        "[Bootstrap] audio policy service up: {} zone(s), {} device(s)",
        registry.len(),
        devices.len()
    );

    Ok(AudioPolicyService::assemble(
        registry,
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
    ))
}
