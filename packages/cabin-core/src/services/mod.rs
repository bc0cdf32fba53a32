//! Policy services built on the zone/volume/focus model.

pub mod activation;
pub mod ducking;
pub mod gain_dispatcher;
pub mod media_request;
pub mod muting;

pub use activation::{ActivationTrigger, ActivationVolumeConfig, CallState, PlaybackActivationMonitor};
pub use ducking::DuckingEngine;
pub use gain_dispatcher::HalGainDispatcher;
pub use media_request::{
    MediaAudioRequestBroker, MediaRequestApprover, MediaRequestClient, MediaRequestId,
    MediaRequestStatus, OccupantZoneId,
};
pub use muting::MutingService;
