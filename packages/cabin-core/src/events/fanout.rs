//! Listener fan-out for volume-group events.
//!
//! Two channels exist: the legacy per-group callbacks (volume-changed,
//! mute-changed, master-mute-changed) and the rich volume-group-event
//! channel. An owner registered on both receives only the rich channel.
//! Every listener sees each event at most once; a failed delivery logs and
//! deregisters the listener.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::CallbackResult;
use crate::events::{VolumeEventFlags, VolumeGroupEvent};
use crate::runtime::CallbackDispatcher;
use crate::zone::ZoneId;

/// Rich-channel listener receiving batched volume-group events.
pub trait VolumeEventListener: Send + Sync {
    /// Delivers a batch of volume-group events.
    fn on_volume_group_events(&self, events: &[VolumeGroupEvent]) -> CallbackResult;
}

/// Legacy per-group callbacks.
pub trait LegacyVolumeListener: Send + Sync {
    /// The gain index of a group changed.
    fn on_volume_changed(&self, zone_id: ZoneId, group_id: u32) -> CallbackResult;

    /// The mute state of a group changed.
    fn on_mute_changed(&self, zone_id: ZoneId, group_id: u32) -> CallbackResult;

    /// The master mute state of a zone changed.
    fn on_master_mute_changed(&self, zone_id: ZoneId, muted: bool) -> CallbackResult;
}

#[derive(Default)]
struct Listeners {
    rich: Vec<(String, Arc<dyn VolumeEventListener>)>,
    legacy: Vec<(String, Arc<dyn LegacyVolumeListener>)>,
}

/// Registry and delivery pump for volume events.
pub struct VolumeEventFanout {
    listeners: Arc<Mutex<Listeners>>,
    dispatcher: CallbackDispatcher,
}

impl VolumeEventFanout {
    /// Creates the fan-out with its delivery dispatcher.
    #[must_use]
    pub fn new(dispatcher: CallbackDispatcher) -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners::default())),
            dispatcher,
        }
    }

    /// Registers (or replaces) a rich-channel listener for an owner.
    pub fn register_listener(&self, owner: impl Into<String>, listener: Arc<dyn VolumeEventListener>) {
        let owner = owner.into();
        let mut listeners = self.listeners.lock();
        listeners.rich.retain(|(existing, _)| *existing != owner);
        listeners.rich.push((owner, listener));
    }

    /// Registers (or replaces) a legacy-channel listener for an owner.
    pub fn register_legacy_listener(
        &self,
        owner: impl Into<String>,
        listener: Arc<dyn LegacyVolumeListener>,
    ) {
        let owner = owner.into();
        let mut listeners = self.listeners.lock();
        listeners.legacy.retain(|(existing, _)| *existing != owner);
        listeners.legacy.push((owner, listener));
    }

    /// Removes an owner from both channels.
    pub fn unregister(&self, owner: &str) {
        let mut listeners = self.listeners.lock();
        listeners.rich.retain(|(existing, _)| existing != owner);
        listeners.legacy.retain(|(existing, _)| existing != owner);
    }

    /// Number of registered listeners across both channels.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        let listeners = self.listeners.lock();
        listeners.rich.len() + listeners.legacy.len()
    }

    /// Clears every listener. Used at service release.
    pub fn clear(&self) {
        let mut listeners = self.listeners.lock();
        listeners.rich.clear();
        listeners.legacy.clear();
    }

    /// Emits a batch of volume-group events.
    ///
    /// Rich listeners get the batch as-is; legacy listeners get the derived
    /// per-group callbacks unless their owner is also registered on the
    /// rich channel.
    pub fn emit(&self, events: Vec<VolumeGroupEvent>) {
        if events.is_empty() {
            return;
        }
        let (rich, legacy) = self.delivery_snapshot();
        tracing::debug!(count = events.len(), "volume_group_events");
        let registry = Arc::clone(&self.listeners);
        self.dispatcher.dispatch(move || {
            let mut dead: Vec<String> = Vec::new();

            for (owner, listener) in &rich {
                if let Err(err) = listener.on_volume_group_events(&events) {
                    log::warn!(
                        "[VolumeEventFanout] rich listener {owner} failed ({err}); deregistering"
                    );
                    dead.push(owner.clone());
                }
            }

            for (owner, listener) in &legacy {
                let mut failed = false;
                for event in &events {
                    if event.flags.contains(VolumeEventFlags::INDEX_CHANGED) {
                        failed |= listener
                            .on_volume_changed(event.zone_id, event.group_id)
                            .is_err();
                    }
                    if event.flags.contains(VolumeEventFlags::MUTE_CHANGED) {
                        failed |= listener
                            .on_mute_changed(event.zone_id, event.group_id)
                            .is_err();
                    }
                    if failed {
                        break;
                    }
                }
                if failed {
                    log::warn!(
                        "[VolumeEventFanout] legacy listener {owner} failed; deregistering"
                    );
                    dead.push(owner.clone());
                }
            }

            if !dead.is_empty() {
                let mut listeners = registry.lock();
                listeners.rich.retain(|(owner, _)| !dead.contains(owner));
                listeners.legacy.retain(|(owner, _)| !dead.contains(owner));
            }
        });
    }

    /// Emits a master-mute change on the legacy channel.
    pub fn emit_master_mute(&self, zone_id: ZoneId, muted: bool) {
        let (_, legacy) = self.delivery_snapshot();
        let registry = Arc::clone(&self.listeners);
        self.dispatcher.dispatch(move || {
            let mut dead: Vec<String> = Vec::new();
            for (owner, listener) in &legacy {
                if let Err(err) = listener.on_master_mute_changed(zone_id, muted) {
                    log::warn!(
                        "[VolumeEventFanout] legacy listener {owner} failed ({err}); deregistering"
                    );
                    dead.push(owner.clone());
                }
            }
            if !dead.is_empty() {
                let mut listeners = registry.lock();
                listeners.legacy.retain(|(owner, _)| !dead.contains(owner));
            }
        });
    }

    /// Snapshots the delivery lists: all rich listeners, plus legacy
    /// listeners whose owner is not registered rich (rich has priority).
    #[allow(clippy::type_complexity)]
    fn delivery_snapshot(
        &self,
    ) -> (
        Vec<(String, Arc<dyn VolumeEventListener>)>,
        Vec<(String, Arc<dyn LegacyVolumeListener>)>,
    ) {
        let listeners = self.listeners.lock();
        let rich_owners: HashSet<&String> =
            listeners.rich.iter().map(|(owner, _)| owner).collect();
        let legacy = listeners
            .legacy
            .iter()
            .filter(|(owner, _)| !rich_owners.contains(owner))
            .cloned()
            .collect();
        let rich = listeners.rich.clone();
        (rich, legacy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallbackError;
    use crate::events::VolumeEventFlags;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingListener {
        batches: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                batches: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }
    }

    impl VolumeEventListener for CountingListener {
        fn on_volume_group_events(&self, _events: &[VolumeGroupEvent]) -> CallbackResult {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CallbackError::Disconnected);
            }
            self.batches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingLegacy {
        volume_calls: AtomicUsize,
        mute_calls: AtomicUsize,
        master_calls: AtomicUsize,
    }

    impl LegacyVolumeListener for CountingLegacy {
        fn on_volume_changed(&self, _zone_id: ZoneId, _group_id: u32) -> CallbackResult {
            self.volume_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_mute_changed(&self, _zone_id: ZoneId, _group_id: u32) -> CallbackResult {
            self.mute_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_master_mute_changed(&self, _zone_id: ZoneId, _muted: bool) -> CallbackResult {
            self.master_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn event(flags: VolumeEventFlags) -> VolumeGroupEvent {
        VolumeGroupEvent {
            zone_id: 0,
            config_id: 0,
            group_id: 1,
            flags,
            extras: Vec::new(),
            index: 10,
            muted: false,
        }
    }

    fn fanout() -> VolumeEventFanout {
        VolumeEventFanout::new(CallbackDispatcher::inline("fanout-test"))
    }

    #[test]
    fn rich_listener_receives_one_batch() {
        let fanout = fanout();
        let listener = CountingListener::new();
        fanout.register_listener("a", Arc::clone(&listener) as Arc<dyn VolumeEventListener>);

        fanout.emit(vec![
            event(VolumeEventFlags::INDEX_CHANGED),
            event(VolumeEventFlags::MUTE_CHANGED),
        ]);

        assert_eq!(listener.batches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn legacy_callbacks_derive_from_flags() {
        let fanout = fanout();
        let listener = Arc::new(CountingLegacy::default());
        fanout
            .register_legacy_listener("a", Arc::clone(&listener) as Arc<dyn LegacyVolumeListener>);

        fanout.emit(vec![event(
            VolumeEventFlags::INDEX_CHANGED | VolumeEventFlags::MUTE_CHANGED,
        )]);

        assert_eq!(listener.volume_calls.load(Ordering::SeqCst), 1);
        assert_eq!(listener.mute_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dual_registration_prefers_rich_channel() {
        struct DualListener {
            rich: AtomicUsize,
            legacy: AtomicUsize,
        }
        impl VolumeEventListener for DualListener {
            fn on_volume_group_events(&self, _events: &[VolumeGroupEvent]) -> CallbackResult {
                self.rich.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
        impl LegacyVolumeListener for DualListener {
            fn on_volume_changed(&self, _z: ZoneId, _g: u32) -> CallbackResult {
                self.legacy.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            fn on_mute_changed(&self, _z: ZoneId, _g: u32) -> CallbackResult {
                self.legacy.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            fn on_master_mute_changed(&self, _z: ZoneId, _m: bool) -> CallbackResult {
                self.legacy.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let fanout = fanout();
        let dual = Arc::new(DualListener {
            rich: AtomicUsize::new(0),
            legacy: AtomicUsize::new(0),
        });
        fanout.register_listener("dual", Arc::clone(&dual) as Arc<dyn VolumeEventListener>);
        fanout
            .register_legacy_listener("dual", Arc::clone(&dual) as Arc<dyn LegacyVolumeListener>);

        fanout.emit(vec![event(VolumeEventFlags::INDEX_CHANGED)]);

        assert_eq!(dual.rich.load(Ordering::SeqCst), 1);
        assert_eq!(dual.legacy.load(Ordering::SeqCst), 0, "rich has priority");
    }

    #[test]
    fn failing_listener_is_deregistered() {
        let fanout = fanout();
        let listener = CountingListener::new();
        listener.fail.store(true, Ordering::SeqCst);
        fanout.register_listener("a", Arc::clone(&listener) as Arc<dyn VolumeEventListener>);
        assert_eq!(fanout.listener_count(), 1);

        fanout.emit(vec![event(VolumeEventFlags::INDEX_CHANGED)]);
        assert_eq!(fanout.listener_count(), 0);

        // A later batch reaches nobody and must not re-add the listener.
        listener.fail.store(false, Ordering::SeqCst);
        fanout.emit(vec![event(VolumeEventFlags::INDEX_CHANGED)]);
        assert_eq!(listener.batches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn master_mute_goes_to_legacy_channel() {
        let fanout = fanout();
        let listener = Arc::new(CountingLegacy::default());
        fanout
            .register_legacy_listener("a", Arc::clone(&listener) as Arc<dyn LegacyVolumeListener>);

        fanout.emit_master_mute(0, true);

        assert_eq!(listener.master_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_batch_is_not_delivered() {
        let fanout = fanout();
        let listener = CountingListener::new();
        fanout.register_listener("a", Arc::clone(&listener) as Arc<dyn VolumeEventListener>);

        fanout.emit(Vec::new());

        assert_eq!(listener.batches.load(Ordering::SeqCst), 0);
    }
}
