//! Cabin Core - multi-zone automotive audio policy.
//!
//! This crate is the core of the Cabin Audio service: it arbitrates audio
//! focus among concurrent playback clients across independent audio zones,
//! translates focus decisions into device-level actions (routing gains,
//! ducking, limits, mute), and reconciles them with external signals from
//! the audio-control HAL, telephony, and the host audio framework.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`context`]: Usage/context vocabulary and the fixed partition
//! - [`zone`]: Audio zones and their alternative configurations
//! - [`volume`]: Volume groups, device registry, core-mixer reconciliation
//! - [`focus`]: Per-zone focus arbitration over the interaction matrix
//! - [`hal`]: The audio-control HAL boundary (wire types and seams)
//! - [`services`]: Gain dispatch, ducking, muting, activation, media broker
//! - [`events`]: Volume-group events and listener fan-out
//! - [`runtime`]: Task spawning and serialized callback dispatch
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines traits to decouple policy from platform plumbing:
//!
//! - [`AudioControlHal`](hal::AudioControlHal): the hardware boundary
//! - [`GainSink`](volume::GainSink): device gain commits
//! - [`CoreMixer`](volume::CoreMixer): the host framework's own mixer
//! - [`GainIndexStore`](volume::GainIndexStore): persisted gain indices
//! - [`FocusClient`](focus::FocusClient) and the listener traits in
//!   [`events`]: remote callbacks
//!
//! Construction goes through [`bootstrap::bootstrap_service`], which
//! validates a [`config::PolicyConfig`] and wires every service; the
//! result is an [`AudioPolicyService`].

#![warn(clippy::all)]

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod focus;
pub mod hal;
pub mod runtime;
pub mod service;
pub mod services;
pub mod volume;
pub mod zone;

// Re-export commonly used types at the crate root
pub use bootstrap::{bootstrap_service, ServiceSeams};
pub use config::{
    ContextBinding, DeviceDefinition, GroupDefinition, PolicyConfig, ZoneConfigDefinition,
    ZoneDefinition,
};
pub use context::{AudioContext, AudioUsage, ContextMap};
pub use error::{CallbackError, CallbackResult, ErrorCode, PolicyError, PolicyResult};
pub use events::{
    LegacyVolumeListener, VolumeEventExtra, VolumeEventFanout, VolumeEventFlags,
    VolumeEventListener, VolumeGroupEvent,
};
pub use focus::{
    FocusArbiter, FocusChange, FocusClient, FocusGainType, FocusHolderInfo, FocusObserver,
    FocusRequest, FocusRequestResult, FocusSnapshot, Interaction, InteractionMatrix,
    ZoneFocusArbiter,
};
pub use hal::{
    AudioControlHal, DeviceGainConfig, DuckingInfo, GainChangeReason, HalFocusBridge, MutingInfo,
    PlaybackTrackMetadata,
};
pub use runtime::{CallbackDispatcher, TaskSpawner, TokioSpawner};
pub use service::AudioPolicyService;
pub use services::{
    ActivationTrigger, ActivationVolumeConfig, CallState, MediaAudioRequestBroker,
    MediaRequestApprover, MediaRequestClient, MediaRequestId, MediaRequestStatus, OccupantZoneId,
};
pub use volume::{
    AudioDevice, CoreMixer, DeviceRegistry, DeviceType, GainBackend, GainIndexStore, GainInfo,
    GainSink, GroupDevice, GroupId, MixerVolumeState, VolumeGroup,
};
pub use zone::{AudioZone, ConfigId, ZoneConfig, ZoneId, ZoneRegistry, PRIMARY_ZONE_ID};
