//! Centralized error types for the Cabin Audio core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Separates fatal policy errors from transient callback faults
//! - Exposes machine-readable error codes for host-service reporting

use thiserror::Error;

use crate::zone::ZoneId;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for host-service reporting.
    fn code(&self) -> &'static str;
}

/// Failure of an outbound callback to a remote listener or client.
///
/// Remote callbacks cross a process boundary; a failure never carries policy
/// meaning beyond "this listener is gone". The core logs the failure,
/// unregisters (or implicitly abandons) the remote party, and preserves its
/// own state.
#[derive(Debug, Clone, Error)]
pub enum CallbackError {
    /// The remote endpoint is no longer reachable (process death).
    #[error("remote listener disconnected")]
    Disconnected,

    /// The remote endpoint failed to process the delivery.
    #[error("callback delivery failed: {0}")]
    Failed(String),
}

impl ErrorCode for CallbackError {
    fn code(&self) -> &'static str {
        match self {
            Self::Disconnected => "listener_disconnected",
            Self::Failed(_) => "callback_failed",
        }
    }
}

/// Application-wide error type for the audio policy core.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Invalid service configuration (fatal; aborts initialization).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation addressed a zone that does not exist.
    #[error("unknown audio zone {0}")]
    UnknownZone(ZoneId),

    /// An operation addressed a volume group that does not exist.
    #[error("unknown volume group {group_id} in zone {zone_id}")]
    UnknownGroup {
        /// Zone the lookup ran against.
        zone_id: ZoneId,
        /// Group id that was not found.
        group_id: u32,
    },

    /// A gain index outside the group's valid range.
    #[error("gain index {index} out of range [{min}, {max}]")]
    IndexOutOfRange {
        /// Requested index.
        index: i32,
        /// Smallest valid index.
        min: i32,
        /// Largest valid index.
        max: i32,
    },

    /// A media-audio request client already has an outstanding request.
    #[error("client {0} already has an outstanding media request")]
    RequestPending(String),

    /// A media-audio request id that is not in the live set.
    #[error("unknown media request {0}")]
    UnknownRequest(u64),

    /// A media-audio request status transition that the protocol forbids.
    #[error("media request {id} is {status}; operation not allowed")]
    InvalidRequestState {
        /// Request the operation addressed.
        id: u64,
        /// Its current status.
        status: String,
    },

    /// The occupant already has an approved media request on the primary zone.
    #[error("occupant zone {0} already has approved media audio")]
    OccupantAlreadyApproved(u32),

    /// Every media request id is live; allocation cannot proceed.
    #[error("media request id space exhausted")]
    IdsExhausted,
}

impl PolicyError {
    /// Returns a machine-readable error code for host-service reporting.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::UnknownZone(_) => "unknown_zone",
            Self::UnknownGroup { .. } => "unknown_group",
            Self::IndexOutOfRange { .. } => "index_out_of_range",
            Self::RequestPending(_) => "request_pending",
            Self::UnknownRequest(_) => "unknown_request",
            Self::InvalidRequestState { .. } => "invalid_request_state",
            Self::OccupantAlreadyApproved(_) => "occupant_already_approved",
            Self::IdsExhausted => "ids_exhausted",
        }
    }
}

/// Convenient Result alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Convenient Result alias for outbound callback delivery.
pub type CallbackResult = Result<(), CallbackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_out_of_range_formats_bounds() {
        let err = PolicyError::IndexOutOfRange {
            index: 42,
            min: 0,
            max: 40,
        };
        assert_eq!(err.code(), "index_out_of_range");
        assert_eq!(err.to_string(), "gain index 42 out of range [0, 40]");
    }

    #[test]
    fn callback_error_codes_are_stable() {
        assert_eq!(CallbackError::Disconnected.code(), "listener_disconnected");
        assert_eq!(
            CallbackError::Failed("x".into()).code(),
            "callback_failed"
        );
    }
}
