// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Slot declaration: the builder and the facade.
//!
//! [`SlotBuilder`] assembles an interceptor chain as one concrete nested
//! type. Each call wraps the chain built so far, so composition order is
//! the call order — layers added later sit further out and run first:
//!
//! ```rust
//! use parking_lot::{Mutex, ReentrantMutex};
//! use trellis_slot::{
//!     InstanceStorage, Level, Lockable, Logs, SlotBuilder, Storage,
//! };
//!
//! struct Device {
//!     storage: InstanceStorage,
//!     lock: ReentrantMutex<()>,
//!     volts: Mutex<f64>,
//! }
//!
//! impl Storage for Device {
//!     fn storage(&self) -> &InstanceStorage {
//!         &self.storage
//!     }
//! }
//!
//! impl Logs for Device {
//!     fn log(&self, level: Level, message: std::fmt::Arguments<'_>) {
//!         trellis_slot::emit(level, message);
//!     }
//! }
//!
//! impl Lockable for Device {
//!     fn lock(&self) -> &ReentrantMutex<()> {
//!         &self.lock
//!     }
//! }
//!
//! let voltage = SlotBuilder::<Device, f64, _>::new("voltage")
//!     .getter(|d| Ok(*d.volts.lock()))
//!     .setter(|d, v| {
//!         *d.volts.lock() = v;
//!         Ok(())
//!     })
//!     .timed()
//!     .logged()
//!     .locked()
//!     .build();
//!
//! let device = Device {
//!     storage: InstanceStorage::new(),
//!     lock: ReentrantMutex::new(()),
//!     volts: Mutex::new(0.0),
//! };
//!
//! voltage.set(&device, 1.5).unwrap();
//! assert_eq!(voltage.get(&device).unwrap(), 1.5);
//! assert_eq!(voltage.stats(&device, "set").count, 1);
//! ```
//!
//! [`Slot`] is the built result: the chain plus handles to the state the
//! chain keeps per instance (cache, transforms, read-once flag, timing
//! statistics), so callers reach cache and configuration operations
//! without knowing where in the chain they live.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use trellis_stats::Stats;

use crate::cache::{CacheHandle, GetCached, PreventUnnecessarySet, ReadOnce, ReadOnceSwitch, SetCached};
use crate::capability::{Lockable, Logs};
use crate::error::{DynError, SlotError};
use crate::name::SlotName;
use crate::observe::{ChangeChannel, Observable};
use crate::slot::{
    Getter, Locked, Logged, Raw, Setter, SlotData, SlotLayer, Timed, Transformed, TransformHooks,
    ValueLogging, timing_stats,
};
use crate::storage::Storage;

/// Builder for a slot's interceptor chain.
///
/// Start with [`SlotBuilder::new`], attach accessors, then wrap layers in
/// the order they should nest. The crate-level docs walk through a full
/// example.
pub struct SlotBuilder<O, T, L> {
    name: SlotName,
    chain: L,
    cache: Option<CacheHandle<T>>,
    channel_seed: Option<Arc<dyn ChangeChannel<T>>>,
    transforms: Option<TransformHooks<T>>,
    read_once: Option<ReadOnceSwitch>,
    timed: bool,
    _owner: PhantomData<fn(&O)>,
}

impl<O, T: SlotData> SlotBuilder<O, T, Raw<O, T>> {
    /// Starts a chain for the slot `name`.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self::for_name(SlotName::new(name))
    }

    pub(crate) fn for_name(name: SlotName) -> Self {
        let chain = Raw::new(name.clone());
        Self {
            name,
            chain,
            cache: None,
            channel_seed: None,
            transforms: None,
            read_once: None,
            timed: false,
            _owner: PhantomData,
        }
    }

    /// Attaches the getter.
    #[must_use]
    pub fn getter(mut self, f: impl Fn(&O) -> Result<T, DynError> + Send + Sync + 'static) -> Self {
        self.chain = self.chain.getter(f);
        self
    }

    /// Attaches the setter.
    #[must_use]
    pub fn setter(
        mut self,
        f: impl Fn(&O, T) -> Result<(), DynError> + Send + Sync + 'static,
    ) -> Self {
        self.chain = self.chain.setter(f);
        self
    }

    /// Attaches the deleter.
    #[must_use]
    pub fn deleter(
        mut self,
        f: impl Fn(&O) -> Result<(), DynError> + Send + Sync + 'static,
    ) -> Self {
        self.chain = self.chain.deleter(f);
        self
    }

    pub(crate) fn accessors(mut self, fget: Option<Getter<O, T>>, fset: Option<Setter<O, T>>) -> Self {
        self.chain.set_accessors(fget, fset);
        self
    }

    pub(crate) fn seed_channel(mut self, channel: Arc<dyn ChangeChannel<T>>) -> Self {
        self.channel_seed = Some(channel);
        self
    }
}

impl<O, T: SlotData, L: SlotLayer<O, T>> SlotBuilder<O, T, L> {
    fn map_chain<M>(self, f: impl FnOnce(L) -> M) -> SlotBuilder<O, T, M> {
        SlotBuilder {
            name: self.name,
            chain: f(self.chain),
            cache: self.cache,
            channel_seed: self.channel_seed,
            transforms: self.transforms,
            read_once: self.read_once,
            timed: self.timed,
            _owner: PhantomData,
        }
    }

    fn ensure_cache(&mut self) -> CacheHandle<T> {
        if let Some(cache) = &self.cache {
            return cache.clone();
        }
        let handle = CacheHandle::new(self.name.clone());
        if let Some(channel) = self.channel_seed.take() {
            handle.observe(channel);
        }
        self.cache = Some(handle.clone());
        handle
    }

    /// Wraps the chain in the logging layer.
    #[must_use]
    pub fn logged(self) -> SlotBuilder<O, T, Logged<L, T>>
    where
        O: Logs,
    {
        self.map_chain(Logged::new)
    }

    /// Wraps the chain in the logging layer with an explicit value policy.
    #[must_use]
    pub fn logged_values(self, values: ValueLogging<T>) -> SlotBuilder<O, T, Logged<L, T>>
    where
        O: Logs,
    {
        self.map_chain(|chain| Logged::with_values(chain, values))
    }

    /// Wraps the chain in the locking layer.
    #[must_use]
    pub fn locked(self) -> SlotBuilder<O, T, Locked<L>>
    where
        O: Lockable,
    {
        self.map_chain(Locked::new)
    }

    /// Wraps the chain in the timing-statistics layer.
    #[must_use]
    pub fn timed(self) -> SlotBuilder<O, T, Timed<L>>
    where
        O: Storage,
    {
        let mut out = self.map_chain(Timed::new);
        out.timed = true;
        out
    }

    /// Wraps the chain in the transform layer.
    #[must_use]
    pub fn transformed(self) -> SlotBuilder<O, T, Transformed<L, T>>
    where
        O: Storage + Logs,
    {
        let name = self.name.clone();
        let mut out = self.map_chain(|chain| Transformed::new(chain, name));
        out.transforms = Some(out.chain.hooks().clone());
        out
    }

    /// Gives the slot a cache without hooking get or set.
    ///
    /// The built slot exposes recall/store/invalidate; nothing updates the
    /// cache automatically.
    #[must_use]
    pub fn cached(mut self) -> Self
    where
        O: Storage,
    {
        let _ = self.ensure_cache();
        self
    }

    /// Caches the value produced by every successful get.
    #[must_use]
    pub fn cached_on_get(mut self) -> SlotBuilder<O, T, GetCached<L, T>>
    where
        O: Storage,
    {
        let cache = self.ensure_cache();
        self.map_chain(|chain| GetCached::new(chain, cache))
    }

    /// Caches the value written by every successful set.
    #[must_use]
    pub fn cached_on_set(mut self) -> SlotBuilder<O, T, SetCached<L, T>>
    where
        O: Storage,
    {
        let cache = self.ensure_cache();
        self.map_chain(|chain| SetCached::new(chain, cache))
    }

    /// Caches on both get and set.
    #[must_use]
    pub fn cached_on_get_set(self) -> SlotBuilder<O, T, GetCached<SetCached<L, T>, T>>
    where
        O: Storage,
    {
        self.cached_on_set().cached_on_get()
    }

    /// Skips sets whose value equals the cached one.
    #[must_use]
    pub fn prevent_unnecessary_set(
        mut self,
    ) -> SlotBuilder<O, T, PreventUnnecessarySet<L, T>>
    where
        O: Storage + Logs,
    {
        let cache = self.ensure_cache();
        self.map_chain(|chain| PreventUnnecessarySet::new(chain, cache))
    }

    /// Answers gets from the cache once a value is known.
    ///
    /// Compose over a get-caching layer so the first real get primes the
    /// cache. `initial` is the shared starting value of the flag.
    #[must_use]
    pub fn read_once(mut self, initial: bool) -> SlotBuilder<O, T, ReadOnce<L, T>>
    where
        O: Storage,
    {
        let cache = self.ensure_cache();
        let name = self.name.clone();
        let mut out = self.map_chain(|chain| ReadOnce::new(chain, cache, name, initial));
        out.read_once = Some(out.chain.switch().clone());
        out
    }

    /// Observes the slot: cache stores that change the value emit change
    /// events on a channel built by the owner's declared factory.
    #[must_use]
    pub fn observed(mut self) -> Self
    where
        O: Observable,
    {
        let cache = self.ensure_cache();
        cache.observe(O::change_channel::<T>(&self.name));
        self
    }

    /// Finishes the chain.
    #[must_use]
    pub fn build(self) -> Slot<O, T, L> {
        Slot {
            name: self.name,
            chain: self.chain,
            cache: self.cache,
            transforms: self.transforms,
            read_once: self.read_once,
            timed: self.timed,
            _owner: PhantomData,
        }
    }
}

impl<O, T, L: fmt::Debug> fmt::Debug for SlotBuilder<O, T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotBuilder")
            .field("name", &self.name)
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

/// A built slot: the interceptor chain plus its per-instance state handles.
///
/// Shared by every instance of the owning type; all instance state lives
/// in the instances' storage.
pub struct Slot<O, T, L> {
    name: SlotName,
    chain: L,
    cache: Option<CacheHandle<T>>,
    transforms: Option<TransformHooks<T>>,
    read_once: Option<ReadOnceSwitch>,
    timed: bool,
    _owner: PhantomData<fn(&O)>,
}

impl<O, T: SlotData, L: SlotLayer<O, T>> Slot<O, T, L> {
    /// Returns the slot's name.
    #[must_use]
    pub fn name(&self) -> &SlotName {
        &self.name
    }

    /// Reads the slot's value for `owner` through the chain.
    pub fn get(&self, owner: &O) -> Result<T, SlotError> {
        self.chain.get(owner)
    }

    /// Writes `value` for `owner` through the chain.
    pub fn set(&self, owner: &O, value: T) -> Result<(), SlotError> {
        self.chain.set(owner, value)
    }

    /// Deletes the slot's value for `owner` through the chain.
    pub fn delete(&self, owner: &O) -> Result<(), SlotError> {
        self.chain.delete(owner)
    }

    /// Returns the cache handle, if the slot has a cache layer.
    #[must_use]
    pub fn cache(&self) -> Option<&CacheHandle<T>> {
        self.cache.as_ref()
    }

    fn require_cache(&self) -> &CacheHandle<T> {
        self.cache
            .as_ref()
            .unwrap_or_else(|| panic!("slot {} has no cache layer", self.name))
    }

    /// Returns the cached value for `owner`.
    ///
    /// # Panics
    ///
    /// Panics if the slot has no cache layer.
    #[must_use]
    pub fn recall(&self, owner: &O) -> Option<T>
    where
        O: Storage,
    {
        self.require_cache().recall(owner)
    }

    /// Stores `value` into the cache directly.
    ///
    /// # Panics
    ///
    /// Panics if the slot has no cache layer.
    pub fn store(&self, owner: &O, value: &T)
    where
        O: Storage,
    {
        self.require_cache().store(owner, value);
    }

    /// Erases the cached value.
    ///
    /// # Panics
    ///
    /// Panics if the slot has no cache layer.
    pub fn invalidate(&self, owner: &O)
    where
        O: Storage,
    {
        self.require_cache().invalidate(owner);
    }

    /// Sets unconditionally: invalidates the cache first so a
    /// prevent-unnecessary-set layer cannot skip the write.
    pub fn force_set(&self, owner: &O, value: T) -> Result<(), SlotError>
    where
        O: Storage,
    {
        if let Some(cache) = &self.cache {
            cache.invalidate(owner);
        }
        self.chain.set(owner, value)
    }

    /// Returns timing statistics recorded for `owner`.
    ///
    /// Categories are `"get"`, `"set"` and their `"failed_"` counterparts.
    /// All-zero statistics are reported when the slot has no timing layer
    /// or nothing was recorded yet.
    #[must_use]
    pub fn stats(&self, owner: &O, category: &str) -> Stats
    where
        O: Storage,
    {
        if !self.timed {
            return Stats::default();
        }
        timing_stats(owner, &self.name, category)
    }

    /// Returns the transform configuration accessors, if the slot has a
    /// transform layer.
    #[must_use]
    pub fn transforms(&self) -> Option<&TransformHooks<T>> {
        self.transforms.as_ref()
    }

    /// Returns the read-once flag accessors, if the slot has a read-once
    /// layer.
    #[must_use]
    pub fn read_once(&self) -> Option<&ReadOnceSwitch> {
        self.read_once.as_ref()
    }
}

impl<O, T, L: fmt::Debug> fmt::Debug for Slot<O, T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("name", &self.name)
            .field("chain", &self.chain)
            .field("cached", &self.cache.is_some())
            .field("timed", &self.timed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Level;
    use crate::storage::InstanceStorage;
    use parking_lot::{Mutex, ReentrantMutex};

    struct Device {
        storage: InstanceStorage,
        lock: ReentrantMutex<()>,
        field: Mutex<f64>,
        gets: Mutex<u32>,
        sets: Mutex<u32>,
        records: Mutex<Vec<(Level, String)>>,
    }

    impl Device {
        fn new() -> Self {
            Self {
                storage: InstanceStorage::new(),
                lock: ReentrantMutex::new(()),
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

    impl Lockable for Device {
        fn lock(&self) -> &ReentrantMutex<()> {
            &self.lock
        }
    }

    fn builder(name: &'static str) -> SlotBuilder<Device, f64, Raw<Device, f64>> {
        SlotBuilder::new(name)
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

    #[test]
    fn round_trip_through_stats_logging_locking() {
        let slot = builder("b_round").timed().logged().locked().build();
        let device = Device::new();

        slot.set(&device, 2.5).unwrap();
        assert_eq!(slot.get(&device).unwrap(), 2.5);

        assert_eq!(slot.stats(&device, "set").count, 1);
        assert_eq!(slot.stats(&device, "get").count, 1);
        assert_eq!(slot.stats(&device, "failed_get").count, 0);
        assert!(device.records.lock().iter().any(|(_, m)| m == "getting b_round"));
    }

    #[test]
    fn stats_on_untimed_slot_are_zero() {
        let slot = builder("b_untimed").build();
        let device = Device::new();
        let _ = slot.get(&device);

        assert_eq!(slot.stats(&device, "get").count, 0);
    }

    #[test]
    fn cache_handles_are_shared_between_layers_and_facade() {
        let slot = builder("b_cache").cached_on_get_set().build();
        let device = Device::new();

        slot.set(&device, 4.0).unwrap();
        assert_eq!(slot.recall(&device), Some(4.0));

        slot.invalidate(&device);
        assert_eq!(slot.recall(&device), None);

        let _ = slot.get(&device).unwrap();
        assert_eq!(slot.recall(&device), Some(4.0));
    }

    #[test]
    fn force_set_defeats_prevention() {
        let slot = builder("b_force").cached_on_set().prevent_unnecessary_set().build();
        let device = Device::new();

        slot.set(&device, 1.0).unwrap();
        slot.set(&device, 1.0).unwrap();
        assert_eq!(*device.sets.lock(), 1);

        slot.force_set(&device, 1.0).unwrap();
        assert_eq!(*device.sets.lock(), 2);
        assert_eq!(slot.recall(&device), Some(1.0));
    }

    #[test]
    fn read_once_composes_over_get_cache() {
        let slot = builder("b_ronce").cached_on_get().read_once(true).build();
        let device = Device::new();
        *device.field.lock() = 1.0;

        assert_eq!(slot.get(&device).unwrap(), 1.0);
        *device.field.lock() = 2.0;
        assert_eq!(slot.get(&device).unwrap(), 1.0);
        assert_eq!(*device.gets.lock(), 1);

        slot.read_once().unwrap().read_once_iset(&device, false).unwrap();
        assert_eq!(slot.get(&device).unwrap(), 2.0);
        assert_eq!(*device.gets.lock(), 2);
    }

    #[test]
    fn transform_hooks_are_reachable_from_the_facade() {
        use crate::slot::Transform;

        let slot = builder("b_hooks").transformed().logged().build();
        let device = Device::new();

        slot.transforms()
            .unwrap()
            .set_pre_set(Some(Transform::map(|v: f64| v.clamp(0.0, 10.0))))
            .unwrap();

        slot.set(&device, 42.0).unwrap();
        assert_eq!(*device.field.lock(), 10.0);
    }

    #[test]
    #[should_panic(expected = "has no cache layer")]
    fn recall_without_cache_panics() {
        let slot = builder("b_nocache").build();
        let device = Device::new();
        let _ = slot.recall(&device);
    }

    #[test]
    fn facade_exposes_name_and_cache_presence() {
        let slot = builder("b_meta").cached().build();
        assert_eq!(slot.name().to_string(), "b_meta");
        assert!(slot.cache().is_some());
        assert!(slot.transforms().is_none());
        assert!(slot.read_once().is_none());
    }
}
