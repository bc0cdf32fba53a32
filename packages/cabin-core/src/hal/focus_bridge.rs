//! Focus requests originated by the HAL itself.
//!
//! The audio-control HAL can hold focus like any client (for chimes, ECU
//! sounds, external sources). The bridge turns each `(zone, usage)` request
//! into a real arbiter request and forwards every status change back
//! through [`AudioControlHal::on_audio_focus_change`]. A repeated request
//! for a live `(zone, usage)` pair is idempotent: the arbiter re-sends the
//! current status.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::AudioUsage;
use crate::error::CallbackResult;
use crate::focus::{FocusArbiter, FocusChange, FocusClient, FocusGainType, FocusRequest, FocusRequestResult};
use crate::hal::AudioControlHal;
use crate::zone::{ZoneId, ZoneRegistry};

/// Proxy client representing one HAL `(zone, usage)` focus stake.
struct HalFocusClient {
    usage: AudioUsage,
    zone_id: ZoneId,
    hal: Arc<dyn AudioControlHal>,
    last_status: Mutex<Option<FocusChange>>,
}

impl HalFocusClient {
    /// Forwards a status to the HAL unless it is the one already reported.
    fn notify_if_changed(&self, change: FocusChange) {
        {
            let mut last = self.last_status.lock();
            if *last == Some(change) {
                return;
            }
            *last = Some(change);
        }
        if let Err(err) = self.hal.on_audio_focus_change(self.usage, self.zone_id, change) {
            log::warn!(
                "[HalFocusBridge] zone {}: focus notification ({:?}) to HAL failed: {err}",
                self.zone_id,
                self.usage
            );
        }
    }
}

impl FocusClient for HalFocusClient {
    fn on_focus_changed(&self, change: FocusChange) -> CallbackResult {
        *self.last_status.lock() = Some(change);
        self.hal
            .on_audio_focus_change(self.usage, self.zone_id, change)
    }
}

/// Bridge between HAL focus requests and the focus arbiter.
pub struct HalFocusBridge {
    arbiter: Arc<FocusArbiter>,
    hal: Arc<dyn AudioControlHal>,
    zones: Arc<ZoneRegistry>,
    active: Mutex<HashMap<(ZoneId, AudioUsage), Arc<HalFocusClient>>>,
}

impl HalFocusBridge {
    /// Creates the bridge.
    pub fn new(
        arbiter: Arc<FocusArbiter>,
        hal: Arc<dyn AudioControlHal>,
        zones: Arc<ZoneRegistry>,
    ) -> Self {
        Self {
            arbiter,
            hal,
            zones,
            active: Mutex::new(HashMap::new()),
        }
    }

    fn client_id(zone_id: ZoneId, usage: AudioUsage) -> String {
        format!("hal:{zone_id}:{}", usage.as_str())
    }

    /// Requests focus on behalf of the HAL.
    ///
    /// Zone ids are validated at this boundary: the HAL is external, so an
    /// unknown zone is logged and refused rather than treated as a
    /// programmer error.
    pub fn request_focus(
        &self,
        usage: AudioUsage,
        zone_id: ZoneId,
        gain_type: FocusGainType,
    ) -> FocusRequestResult {
        if !self.zones.contains(zone_id) {
            log::warn!(
                "[HalFocusBridge] focus request for unknown zone {zone_id} ({:?}) dropped",
                usage
            );
            return FocusRequestResult::Failed;
        }

        let client = {
            let mut active = self.active.lock();
            Arc::clone(active.entry((zone_id, usage)).or_insert_with(|| {
                Arc::new(HalFocusClient {
                    usage,
                    zone_id,
                    hal: Arc::clone(&self.hal),
                    last_status: Mutex::new(None),
                })
            }))
        };

        let request = FocusRequest::new(Self::client_id(zone_id, usage), zone_id, usage, gain_type);
        let result = self
            .arbiter
            .request_focus(request, Arc::clone(&client) as Arc<dyn FocusClient>);

        // The inbound HAL call is one-way; report the outcome through the
        // status callback. A duplicate request already re-sent the current
        // status from inside the arbiter, which `notify_if_changed`
        // de-duplicates.
        match result {
            FocusRequestResult::Granted => client.notify_if_changed(FocusChange::Gain),
            FocusRequestResult::Failed => client.notify_if_changed(FocusChange::Failed),
            FocusRequestResult::Delayed => {}
        }
        result
    }

    /// Abandons a HAL focus stake.
    pub fn abandon_focus(&self, usage: AudioUsage, zone_id: ZoneId) {
        if self.active.lock().remove(&(zone_id, usage)).is_none() {
            log::debug!(
                "[HalFocusBridge] abandon for zone {zone_id} ({usage:?}) without active request"
            );
            return;
        }
        self.arbiter
            .abandon_focus(zone_id, &Self::client_id(zone_id, usage));
    }
}
