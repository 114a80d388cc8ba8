// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Caching, set suppression, read-once and change notification.
//!
//! All cache behaviors share one piece of per-instance state: the last
//! value seen for a slot, kept in the `cache` namespace of the instance's
//! storage and reached through a [`CacheHandle`]. The handle is also the
//! notification hook: every store captures the previous value, writes the
//! new one, and emits a change event when they differ. Wrappers built on
//! top:
//!
//! - [`GetCached`] / [`SetCached`] refresh the cache after successful
//!   inner operations.
//! - [`PreventUnnecessarySet`] skips the inner set when the incoming value
//!   equals the cached one.
//! - [`ReadOnce`] answers from the cache without invoking the inner getter
//!   when its per-instance flag is enabled.
//!
//! The unset state is `Option::None`: a cache that has never stored a
//! value is distinguishable from every valid value, including defaults.

use std::fmt;
use std::sync::{Arc, OnceLock};

use hashbrown::HashMap;

use crate::capability::Logs;
use crate::config::{ConfigDecl, ConfigDecls, ConfigValues, InstanceConfig};
use crate::error::{ConfigError, SlotError};
use crate::name::SlotName;
use crate::observe::{Change, ChangeChannel};
use crate::slot::{SlotData, SlotLayer, slot_config_ns};
use crate::storage::{Namespace, Storage};
use crate::value::OpaqueValue;

/// The per-instance storage shape of the cache namespace.
pub type CacheArea = HashMap<SlotName, OpaqueValue>;

struct SlotCacheFamily;

pub(crate) fn slot_cache_ns() -> Namespace<CacheArea> {
    Namespace::register::<SlotCacheFamily>("cache")
}

/// Handle to one slot's cached value.
///
/// Cheap to clone; every clone of a handle (one per cache wrapper in a
/// chain, plus the slot facade) reaches the same per-instance state and
/// the same change channel.
///
/// # Example
///
/// ```rust
/// use trellis_slot::{CacheHandle, InstanceStorage, SlotName, Storage};
///
/// struct Device {
///     storage: InstanceStorage,
/// }
///
/// impl Storage for Device {
///     fn storage(&self) -> &InstanceStorage {
///         &self.storage
///     }
/// }
///
/// let cache: CacheHandle<f64> = CacheHandle::new(SlotName::new("voltage"));
/// let device = Device { storage: InstanceStorage::new() };
///
/// assert_eq!(cache.recall(&device), None);
/// cache.store(&device, &1.5);
/// assert_eq!(cache.recall(&device), Some(1.5));
/// cache.invalidate(&device);
/// assert_eq!(cache.recall(&device), None);
/// ```
pub struct CacheHandle<T> {
    name: SlotName,
    ns: Namespace<CacheArea>,
    channel: Arc<OnceLock<Arc<dyn ChangeChannel<T>>>>,
}

impl<T> Clone for CacheHandle<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            ns: self.ns,
            channel: Arc::clone(&self.channel),
        }
    }
}

impl<T> fmt::Debug for CacheHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle")
            .field("name", &self.name)
            .field("observed", &self.is_observed())
            .finish()
    }
}

impl<T: SlotData> CacheHandle<T> {
    /// Creates a handle for the slot `name`.
    #[must_use]
    pub fn new(name: SlotName) -> Self {
        Self {
            name,
            ns: slot_cache_ns(),
            channel: Arc::new(OnceLock::new()),
        }
    }

    /// Returns the slot this cache belongs to.
    #[must_use]
    #[inline]
    pub fn name(&self) -> &SlotName {
        &self.name
    }

    /// Returns the cached value for `owner`, or `None` if nothing has been
    /// stored since construction or the last invalidation.
    #[must_use]
    pub fn recall<O: Storage>(&self, owner: &O) -> Option<T> {
        self.ns.with(owner.storage(), |area| {
            area.get(&self.name).and_then(OpaqueValue::extract)
        })
    }

    /// Stores `value`, unconditionally overwriting the cached one.
    ///
    /// When the slot is observed and the new value differs from the
    /// previous one (or there was none), a change event carrying the new
    /// and old values (and the sub-slot key, for keyed names) is emitted
    /// after the write. Equal values emit nothing.
    pub fn store<O: Storage>(&self, owner: &O, value: &T) {
        let old = self.ns.with(owner.storage(), |area| {
            let old = area.get(&self.name).and_then(OpaqueValue::extract::<T>);
            area.insert(self.name.clone(), OpaqueValue::new(value.clone()));
            old
        });
        if let Some(channel) = self.channel.get()
            && old.as_ref() != Some(value)
        {
            channel.emit(Change {
                new: value,
                old: old.as_ref(),
                key: self.name.key(),
            });
        }
    }

    /// Erases the cached value. Erasing an empty cache is a no-op.
    pub fn invalidate<O: Storage>(&self, owner: &O) {
        self.ns.with(owner.storage(), |area| {
            area.remove(&self.name);
        });
    }

    /// Attaches the change channel.
    ///
    /// # Panics
    ///
    /// Panics if the slot is already observed.
    pub fn observe(&self, channel: Arc<dyn ChangeChannel<T>>) {
        assert!(
            self.channel.set(channel).is_ok(),
            "slot {} is already observed",
            self.name,
        );
    }

}

impl<T> CacheHandle<T> {
    /// Returns `true` if a change channel is attached.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.channel.get().is_some()
    }
}

/// Returns the cached values of several slots at once, keyed by name.
///
/// The map holds `None` for slots that have never stored a value for
/// `owner`.
///
/// # Example
///
/// ```rust
/// use trellis_slot::{CacheHandle, InstanceStorage, SlotName, Storage, recall_many};
///
/// struct Device {
///     storage: InstanceStorage,
/// }
///
/// impl Storage for Device {
///     fn storage(&self) -> &InstanceStorage {
///         &self.storage
///     }
/// }
///
/// let volts: CacheHandle<f64> = CacheHandle::new(SlotName::new("volts"));
/// let amps: CacheHandle<f64> = CacheHandle::new(SlotName::new("amps"));
/// let device = Device { storage: InstanceStorage::new() };
/// volts.store(&device, &1.5);
///
/// let cached = recall_many(&device, [&volts, &amps]);
/// assert_eq!(cached[&SlotName::new("volts")], Some(1.5));
/// assert_eq!(cached[&SlotName::new("amps")], None);
/// ```
#[must_use]
pub fn recall_many<'a, O: Storage, T: SlotData>(
    owner: &O,
    handles: impl IntoIterator<Item = &'a CacheHandle<T>>,
) -> HashMap<SlotName, Option<T>> {
    handles
        .into_iter()
        .map(|handle| (handle.name().clone(), handle.recall(owner)))
        .collect()
}

/// Caches the value produced by every successful get.
#[derive(Debug)]
pub struct GetCached<L, T> {
    inner: L,
    cache: CacheHandle<T>,
}

impl<L, T> GetCached<L, T> {
    /// Wraps `inner`, storing produced values through `cache`.
    #[must_use]
    pub fn new(inner: L, cache: CacheHandle<T>) -> Self {
        Self { inner, cache }
    }
}

impl<O: Storage, T: SlotData, L: SlotLayer<O, T>> SlotLayer<O, T> for GetCached<L, T> {
    fn name(&self) -> &SlotName {
        self.inner.name()
    }

    fn get(&self, owner: &O) -> Result<T, SlotError> {
        let value = self.inner.get(owner)?;
        self.cache.store(owner, &value);
        Ok(value)
    }

    fn set(&self, owner: &O, value: T) -> Result<(), SlotError> {
        self.inner.set(owner, value)
    }

    fn delete(&self, owner: &O) -> Result<(), SlotError> {
        self.inner.delete(owner)
    }
}

/// Caches the value written by every successful set.
#[derive(Debug)]
pub struct SetCached<L, T> {
    inner: L,
    cache: CacheHandle<T>,
}

impl<L, T> SetCached<L, T> {
    /// Wraps `inner`, storing written values through `cache`.
    #[must_use]
    pub fn new(inner: L, cache: CacheHandle<T>) -> Self {
        Self { inner, cache }
    }
}

impl<O: Storage, T: SlotData, L: SlotLayer<O, T>> SlotLayer<O, T> for SetCached<L, T> {
    fn name(&self) -> &SlotName {
        self.inner.name()
    }

    fn get(&self, owner: &O) -> Result<T, SlotError> {
        self.inner.get(owner)
    }

    fn set(&self, owner: &O, value: T) -> Result<(), SlotError> {
        self.inner.set(owner, value.clone())?;
        self.cache.store(owner, &value);
        Ok(())
    }

    fn delete(&self, owner: &O) -> Result<(), SlotError> {
        self.inner.delete(owner)
    }
}

/// Skips sets whose value equals the cached one.
///
/// An equal value never reaches the inner chain and leaves the cache
/// untouched (logged at info); a different value runs the inner set and
/// refreshes the cache. [`PreventUnnecessarySet::force_set`] bypasses the
/// comparison entirely.
#[derive(Debug)]
pub struct PreventUnnecessarySet<L, T> {
    inner: L,
    cache: CacheHandle<T>,
}

impl<L, T> PreventUnnecessarySet<L, T> {
    /// Wraps `inner`, comparing against `cache`.
    #[must_use]
    pub fn new(inner: L, cache: CacheHandle<T>) -> Self {
        Self { inner, cache }
    }
}

impl<L, T: SlotData> PreventUnnecessarySet<L, T> {
    /// Sets unconditionally: invalidates the cache, runs the inner set,
    /// and stores the new value.
    pub fn force_set<O>(&self, owner: &O, value: T) -> Result<(), SlotError>
    where
        O: Storage + Logs,
        L: SlotLayer<O, T>,
    {
        self.cache.invalidate(owner);
        self.set(owner, value)
    }
}

impl<O: Storage + Logs, T: SlotData, L: SlotLayer<O, T>> SlotLayer<O, T>
    for PreventUnnecessarySet<L, T>
{
    fn name(&self) -> &SlotName {
        self.inner.name()
    }

    fn get(&self, owner: &O) -> Result<T, SlotError> {
        self.inner.get(owner)
    }

    fn set(&self, owner: &O, value: T) -> Result<(), SlotError> {
        if let Some(current) = self.cache.recall(owner)
            && current == value
        {
            owner.log_info(format_args!(
                "no need to set {} = {value:?} (current={current:?})",
                self.name(),
            ));
            return Ok(());
        }

        self.inner.set(owner, value.clone())?;
        self.cache.store(owner, &value);
        Ok(())
    }

    fn delete(&self, owner: &O) -> Result<(), SlotError> {
        self.inner.delete(owner)
    }
}

/// Accessors for the read-once flag.
///
/// The flag is a per-instance configuration slot: the `_iget`/`_iset`
/// pair resolves against one owning instance, the plain pair against the
/// shared class-level value.
#[derive(Clone)]
pub struct ReadOnceSwitch {
    config: Arc<InstanceConfig>,
}

impl fmt::Debug for ReadOnceSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOnceSwitch").finish_non_exhaustive()
    }
}

impl ReadOnceSwitch {
    /// Returns the shared read-once flag.
    #[must_use]
    pub fn read_once(&self) -> bool {
        self.config.get_shared("read_once")
    }

    /// Sets the shared read-once flag.
    pub fn set_read_once(&self, enabled: bool) -> Result<(), ConfigError> {
        self.config.set_shared("read_once", enabled)
    }

    /// Returns the read-once flag as seen by `owner`.
    #[must_use]
    pub fn read_once_iget<O: Storage>(&self, owner: &O) -> bool {
        self.config.get_for(owner, "read_once")
    }

    /// Overrides the read-once flag for `owner` only.
    pub fn read_once_iset<O: Storage>(&self, owner: &O, enabled: bool) -> Result<(), ConfigError> {
        self.config.set_for(owner, "read_once", enabled)
    }
}

/// Answers gets from the cache once a value is known.
///
/// When the per-instance `read_once` flag is enabled and the cache holds a
/// value, the inner getter is not invoked. Compose this over a get-caching
/// layer so the first (real) get primes the cache.
pub struct ReadOnce<L, T> {
    inner: L,
    cache: CacheHandle<T>,
    switch: ReadOnceSwitch,
}

impl<L, T: SlotData> ReadOnce<L, T> {
    /// Wraps `inner`, answering from `cache` when enabled.
    ///
    /// `read_once` is the initial shared value of the flag.
    #[must_use]
    pub fn new(inner: L, cache: CacheHandle<T>, name: SlotName, read_once: bool) -> Self {
        let decls = ConfigDecls::new().declare(
            ConfigDecl::<bool>::new("read_once")
                .per_instance()
                .doc("answer gets from the cache once a value is known"),
        );
        let supplied = ConfigValues::new().set("read_once", read_once);
        let config = InstanceConfig::new(name, slot_config_ns(), decls, supplied);
        Self {
            inner,
            cache,
            switch: ReadOnceSwitch {
                config: Arc::new(config),
            },
        }
    }

    /// Returns the read-once flag accessors.
    #[must_use]
    pub fn switch(&self) -> &ReadOnceSwitch {
        &self.switch
    }
}

impl<L: fmt::Debug, T> fmt::Debug for ReadOnce<L, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOnce").field("inner", &self.inner).finish_non_exhaustive()
    }
}

impl<O: Storage, T: SlotData, L: SlotLayer<O, T>> SlotLayer<O, T> for ReadOnce<L, T> {
    fn name(&self) -> &SlotName {
        self.inner.name()
    }

    fn get(&self, owner: &O) -> Result<T, SlotError> {
        if self.switch.read_once_iget(owner)
            && let Some(value) = self.cache.recall(owner)
        {
            return Ok(value);
        }
        self.inner.get(owner)
    }

    fn set(&self, owner: &O, value: T) -> Result<(), SlotError> {
        self.inner.set(owner, value)
    }

    fn delete(&self, owner: &O) -> Result<(), SlotError> {
        self.inner.delete(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Level;
    use crate::observe::Watchers;
    use crate::slot::Raw;
    use crate::storage::InstanceStorage;
    use parking_lot::Mutex;

    struct Device {
        storage: InstanceStorage,
        field: Mutex<f64>,
        gets: Mutex<u32>,
        sets: Mutex<u32>,
        records: Mutex<Vec<(Level, String)>>,
    }

    impl Device {
        fn new() -> Self {
            Self {
                storage: InstanceStorage::new(),
                field: Mutex::new(0.0),
                gets: Mutex::new(0),
                sets: Mutex::new(0),
                records: Mutex::new(Vec::new()),
            }
        }
    }

    impl Storage for Device {
        fn storage(&self) -> &InstanceStorage {
            &self.storage
        }
    }

    impl Logs for Device {
        fn log(&self, level: Level, message: std::fmt::Arguments<'_>) {
            self.records.lock().push((level, message.to_string()));
        }
    }

    fn field_slot(name: &'static str) -> Raw<Device, f64> {
        Raw::new(name)
            .getter(|d: &Device| {
                *d.gets.lock() += 1;
                Ok(*d.field.lock())
            })
            .setter(|d: &Device, v| {
                *d.sets.lock() += 1;
                *d.field.lock() = v;
                Ok(())
            })
    }

    fn handle(name: &'static str) -> CacheHandle<f64> {
        CacheHandle::new(SlotName::new(name))
    }

    #[test]
    fn unset_cache_recalls_none() {
        let cache = handle("c_unset");
        let device = Device::new();
        assert_eq!(cache.recall(&device), None);
    }

    #[test]
    fn store_overwrites_and_invalidate_erases() {
        let cache = handle("c_basic");
        let device = Device::new();

        cache.store(&device, &1.0);
        cache.store(&device, &2.0);
        assert_eq!(cache.recall(&device), Some(2.0));

        cache.invalidate(&device);
        assert_eq!(cache.recall(&device), None);
        // A second invalidation is a no-op.
        cache.invalidate(&device);
    }

    #[test]
    fn recall_many_reports_unset_slots_as_none() {
        let volts = handle("c_many_volts");
        let amps = handle("c_many_amps");
        let device = Device::new();
        volts.store(&device, &1.5);

        let cached = recall_many(&device, [&volts, &amps]);
        assert_eq!(cached[&SlotName::new("c_many_volts")], Some(1.5));
        assert_eq!(cached[&SlotName::new("c_many_amps")], None);
    }

    #[test]
    fn caches_are_instance_private() {
        let cache = handle("c_private");
        let first = Device::new();
        let second = Device::new();

        cache.store(&first, &1.0);
        assert_eq!(cache.recall(&second), None);
    }

    #[test]
    fn get_cached_refreshes_on_every_get() {
        let cache = handle("c_get");
        let slot = GetCached::new(field_slot("c_get"), cache.clone());
        let device = Device::new();

        *device.field.lock() = 4.0;
        assert_eq!(slot.get(&device).unwrap(), 4.0);
        assert_eq!(cache.recall(&device), Some(4.0));

        *device.field.lock() = 5.0;
        assert_eq!(slot.get(&device).unwrap(), 5.0);
        assert_eq!(cache.recall(&device), Some(5.0));
        assert_eq!(*device.gets.lock(), 2);
    }

    #[test]
    fn set_cached_stores_the_written_value() {
        let cache = handle("c_set");
        let slot = SetCached::new(field_slot("c_set"), cache.clone());
        let device = Device::new();

        slot.set(&device, 3.0).unwrap();
        assert_eq!(cache.recall(&device), Some(3.0));
        assert_eq!(*device.field.lock(), 3.0);
    }

    #[test]
    fn failed_set_leaves_the_cache_alone() {
        let cache = handle("c_setfail");
        let failing: Raw<Device, f64> = Raw::new("c_setfail").setter(|_, _| Err("refused".into()));
        let slot = SetCached::new(failing, cache.clone());
        let device = Device::new();

        assert!(slot.set(&device, 3.0).is_err());
        assert_eq!(cache.recall(&device), None);
    }

    #[test]
    fn prevent_skips_equal_sets() {
        let cache = handle("c_prevent");
        let slot = PreventUnnecessarySet::new(field_slot("c_prevent"), cache.clone());
        let device = Device::new();

        slot.set(&device, 1.0).unwrap();
        slot.set(&device, 1.0).unwrap();
        slot.set(&device, 1.0).unwrap();
        assert_eq!(*device.sets.lock(), 1);

        slot.set(&device, 2.0).unwrap();
        assert_eq!(*device.sets.lock(), 2);
        assert_eq!(cache.recall(&device), Some(2.0));

        let skipped = device
            .records
            .lock()
            .iter()
            .filter(|(l, m)| *l == Level::INFO && m.contains("no need to set"))
            .count();
        assert_eq!(skipped, 2);
    }

    #[test]
    fn prevent_force_set_always_runs_the_setter() {
        let cache = handle("c_force");
        let slot = PreventUnnecessarySet::new(field_slot("c_force"), cache.clone());
        let device = Device::new();

        slot.set(&device, 1.0).unwrap();
        slot.force_set(&device, 1.0).unwrap();
        assert_eq!(*device.sets.lock(), 2);
        assert_eq!(cache.recall(&device), Some(1.0));
    }

    #[test]
    fn read_once_returns_cached_without_getter() {
        let cache = handle("c_ronce");
        let slot = ReadOnce::new(
            GetCached::new(field_slot("c_ronce"), cache.clone()),
            cache,
            SlotName::new("c_ronce"),
            true,
        );
        let device = Device::new();
        *device.field.lock() = 4.0;

        assert_eq!(slot.get(&device).unwrap(), 4.0);
        *device.field.lock() = 9.0;
        // The second get answers from the cache; the getter does not run.
        assert_eq!(slot.get(&device).unwrap(), 4.0);
        assert_eq!(*device.gets.lock(), 1);
    }

    #[test]
    fn read_once_disabled_always_reads_through() {
        let cache = handle("c_roff");
        let slot = ReadOnce::new(
            GetCached::new(field_slot("c_roff"), cache.clone()),
            cache.clone(),
            SlotName::new("c_roff"),
            false,
        );
        let device = Device::new();
        *device.field.lock() = 4.0;

        assert_eq!(slot.get(&device).unwrap(), 4.0);
        *device.field.lock() = 9.0;
        assert_eq!(slot.get(&device).unwrap(), 9.0);
        assert_eq!(*device.gets.lock(), 2);
        assert_eq!(cache.recall(&device), Some(9.0));
    }

    #[test]
    fn read_once_flag_is_per_instance() {
        let cache = handle("c_rflag");
        let slot = ReadOnce::new(
            GetCached::new(field_slot("c_rflag"), cache.clone()),
            cache,
            SlotName::new("c_rflag"),
            false,
        );
        let pinned = Device::new();
        let live = Device::new();
        slot.switch().read_once_iset(&pinned, true).unwrap();

        for device in [&pinned, &live] {
            *device.field.lock() = 1.0;
            let _ = slot.get(device).unwrap();
            *device.field.lock() = 2.0;
        }

        assert_eq!(slot.get(&pinned).unwrap(), 1.0);
        assert_eq!(slot.get(&live).unwrap(), 2.0);
    }

    #[test]
    fn observed_store_emits_only_on_change() {
        let cache = handle("c_emit");
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let watchers = Watchers::new();
        watchers.subscribe(move |change: Change<'_, f64>| {
            sink.lock().push((*change.new, change.old.copied()));
        });
        cache.observe(Arc::new(watchers));

        let device = Device::new();
        cache.store(&device, &1.0);
        cache.store(&device, &1.0);
        cache.store(&device, &2.0);

        let events = events.lock();
        assert_eq!(*events, [(1.0, None), (2.0, Some(1.0))]);
    }

    #[test]
    fn emission_happens_after_the_store() {
        // Pin the hook ordering: the new value is already recallable from
        // inside a subscriber, while `old` carries the pre-store value.
        let cache = handle("c_order");
        let device = Arc::new(Device::new());

        let watchers = Watchers::new();
        let observer_cache = cache.clone();
        let observer_device = Arc::clone(&device);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        watchers.subscribe(move |change: Change<'_, f64>| {
            let recalled = observer_cache.recall(&*observer_device);
            sink.lock().push((recalled, change.old.copied(), *change.new));
        });
        cache.observe(Arc::new(watchers));

        cache.store(&*device, &1.0);
        cache.store(&*device, &2.0);

        let seen = seen.lock();
        assert_eq!(*seen, [(Some(1.0), None, 1.0), (Some(2.0), Some(1.0), 2.0)]);
    }

    #[test]
    fn keyed_names_emit_their_key() {
        use crate::name::SlotKey;

        let cache: CacheHandle<f64> = CacheHandle::new(SlotName::keyed("c_keyed", "x"));
        let keys = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&keys);
        let watchers = Watchers::new();
        watchers.subscribe(move |change: Change<'_, f64>| {
            sink.lock().push(change.key.cloned());
        });
        cache.observe(Arc::new(watchers));

        let device = Device::new();
        cache.store(&device, &1.0);

        assert_eq!(*keys.lock(), [Some(SlotKey::from("x"))]);
    }

    #[test]
    #[should_panic(expected = "already observed")]
    fn observing_twice_panics() {
        let cache = handle("c_twice");
        cache.observe(Arc::new(Watchers::new()));
        cache.observe(Arc::new(Watchers::new()));
    }
}
