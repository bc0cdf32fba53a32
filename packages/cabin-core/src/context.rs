//! Audio usage and context vocabulary.
//!
//! Every playback stream carries a platform *usage* tag; the policy core
//! arbitrates and routes at the coarser *context* granularity. This module
//! owns both enumerations and the fixed usage→context partition that the
//! rest of the crate is built on.

use serde::{Deserialize, Serialize};

/// Purpose tag carried by a playback stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioUsage {
    /// Music and other media playback.
    Media,
    /// Turn-by-turn navigation prompts.
    Navigation,
    /// Voice assistant input/output.
    VoiceCommand,
    /// Incoming call ringtone.
    Ringtone,
    /// An active voice call.
    VoiceCall,
    /// Alarm clock and timers.
    Alarm,
    /// Short notification chimes.
    Notification,
    /// Emergency announcements (e-call, hazard).
    Emergency,
    /// Safety-critical alerts (collision, lane departure).
    Safety,
    /// Vehicle status readouts (fuel, doors).
    VehicleStatus,
    /// General announcements (traffic, weather).
    Announcement,
    /// UI sounds and touch feedback.
    SystemSound,
    /// Unmappable or missing usage.
    Invalid,
}

impl AudioUsage {
    /// Wire string for the HAL boundary.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Media => "media",
            Self::Navigation => "navigation",
            Self::VoiceCommand => "voice_command",
            Self::Ringtone => "ringtone",
            Self::VoiceCall => "voice_call",
            Self::Alarm => "alarm",
            Self::Notification => "notification",
            Self::Emergency => "emergency",
            Self::Safety => "safety",
            Self::VehicleStatus => "vehicle_status",
            Self::Announcement => "announcement",
            Self::SystemSound => "system_sound",
            Self::Invalid => "invalid",
        }
    }
}

/// Coarse category used for focus arbitration and volume-group assignment.
///
/// The discriminant doubles as the row/column index of the focus interaction
/// matrix, so the variant order is load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(usize)]
pub enum AudioContext {
    /// Virtual context for unmappable usages and the empty-holder row.
    Invalid = 0,
    /// Media playback.
    Music = 1,
    /// Navigation prompts.
    Navigation = 2,
    /// Voice assistant.
    VoiceCommand = 3,
    /// Incoming call ring.
    CallRing = 4,
    /// Active call.
    Call = 5,
    /// Alarms and timers.
    Alarm = 6,
    /// Notification chimes.
    Notification = 7,
    /// UI sounds.
    SystemSound = 8,
    /// Emergency announcements.
    Emergency = 9,
    /// Safety-critical alerts.
    Safety = 10,
    /// Vehicle status readouts.
    VehicleStatus = 11,
    /// General announcements.
    Announcement = 12,
}

/// Number of contexts, and therefore the interaction-matrix dimension.
pub const CONTEXT_COUNT: usize = 13;

/// All contexts in matrix order.
pub const ALL_CONTEXTS: [AudioContext; CONTEXT_COUNT] = [
    AudioContext::Invalid,
    AudioContext::Music,
    AudioContext::Navigation,
    AudioContext::VoiceCommand,
    AudioContext::CallRing,
    AudioContext::Call,
    AudioContext::Alarm,
    AudioContext::Notification,
    AudioContext::SystemSound,
    AudioContext::Emergency,
    AudioContext::Safety,
    AudioContext::VehicleStatus,
    AudioContext::Announcement,
];

impl AudioContext {
    /// Matrix row/column index for this context.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// The fixed usage→context partition.
///
/// Constructed once at startup and shared read-only; each usage maps to
/// exactly one context, so the contexts partition the usage space.
#[derive(Debug, Default, Clone)]
pub struct ContextMap;

impl ContextMap {
    /// Creates the built-in partition.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns the context arbitrating the given usage.
    #[must_use]
    pub fn context_for_usage(&self, usage: AudioUsage) -> AudioContext {
        match usage {
            AudioUsage::Media => AudioContext::Music,
            AudioUsage::Navigation => AudioContext::Navigation,
            AudioUsage::VoiceCommand => AudioContext::VoiceCommand,
            AudioUsage::Ringtone => AudioContext::CallRing,
            AudioUsage::VoiceCall => AudioContext::Call,
            AudioUsage::Alarm => AudioContext::Alarm,
            AudioUsage::Notification => AudioContext::Notification,
            AudioUsage::Emergency => AudioContext::Emergency,
            AudioUsage::Safety => AudioContext::Safety,
            AudioUsage::VehicleStatus => AudioContext::VehicleStatus,
            AudioUsage::Announcement => AudioContext::Announcement,
            AudioUsage::SystemSound => AudioContext::SystemSound,
            AudioUsage::Invalid => AudioContext::Invalid,
        }
    }

    /// Returns the usages a context groups.
    #[must_use]
    pub fn usages_for_context(&self, context: AudioContext) -> Vec<AudioUsage> {
        const ALL_USAGES: [AudioUsage; 13] = [
            AudioUsage::Media,
            AudioUsage::Navigation,
            AudioUsage::VoiceCommand,
            AudioUsage::Ringtone,
            AudioUsage::VoiceCall,
            AudioUsage::Alarm,
            AudioUsage::Notification,
            AudioUsage::Emergency,
            AudioUsage::Safety,
            AudioUsage::VehicleStatus,
            AudioUsage::Announcement,
            AudioUsage::SystemSound,
            AudioUsage::Invalid,
        ];
        ALL_USAGES
            .into_iter()
            .filter(|usage| self.context_for_usage(*usage) == context)
            .collect()
    }
}
