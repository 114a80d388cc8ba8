// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Multiplexed slots: one declared slot, many keyed sub-slots.
//!
//! A [`MultiSlot`] fans a single declared slot out into independently
//! tracked sub-slots, one per distinct key. Each sub-slot is an ordinary
//! [`Slot`] built lazily on first access to its key, with the declared
//! accessors bound to that key and the chain assembled by a caller-supplied
//! closure. Every sub-slot therefore carries the full layer set (logging,
//! timing, caching, notification) under its composite `name[key]` identity, and
//! every namespaced store keeps its state per (instance, sub-slot).
//!
//! The key domain is open by default; [`MultiSlot::keys`] restricts it to
//! an explicit set, and [`MultiSlot::mapping`] additionally translates each
//! external key to an internal storage key before delegating. Unknown keys
//! are rejected with an error naming the key and the domain.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::builder::{Slot, SlotBuilder};
use crate::error::{DynError, SlotError};
use crate::name::{SlotKey, SlotName};
use crate::observe::{ChangeChannel, Observable};
use crate::slot::{Getter, Raw, Setter, SlotData, SlotLayer};
use crate::storage::Storage;

/// The declared key domain of a multiplexed slot.
#[derive(Clone, Debug)]
pub enum KeyDomain {
    /// Any key is accepted; sub-slots exist for the keys actually used.
    Open,
    /// Only the listed keys are accepted.
    Set(Vec<SlotKey>),
    /// Only the listed external keys are accepted; each translates to an
    /// internal storage key before delegating.
    Mapping(Vec<(SlotKey, SlotKey)>),
}

impl KeyDomain {
    /// Validates `key` and returns the internal key to use, or `None` for
    /// a key outside the domain.
    #[must_use]
    pub fn resolve(&self, key: &SlotKey) -> Option<SlotKey> {
        match self {
            Self::Open => Some(key.clone()),
            Self::Set(keys) => keys.contains(key).then(|| key.clone()),
            Self::Mapping(pairs) => pairs
                .iter()
                .find(|(external, _)| external == key)
                .map(|(_, internal)| internal.clone()),
        }
    }

    /// Returns the declared (external, internal) key pairs, or `None` for
    /// an open domain.
    #[must_use]
    pub fn declared(&self) -> Option<Vec<(SlotKey, SlotKey)>> {
        match self {
            Self::Open => None,
            Self::Set(keys) => Some(keys.iter().map(|k| (k.clone(), k.clone())).collect()),
            Self::Mapping(pairs) => Some(pairs.clone()),
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Open => String::from("any key"),
            Self::Set(keys) => {
                let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
                format!("[{}]", keys.join(", "))
            }
            Self::Mapping(pairs) => {
                let keys: Vec<String> = pairs.iter().map(|(k, _)| k.to_string()).collect();
                format!("[{}]", keys.join(", "))
            }
        }
    }
}

type KeyedGetter<O, T> = Arc<dyn Fn(&O, &SlotKey) -> Result<T, DynError> + Send + Sync>;
type KeyedSetter<O, T> = Arc<dyn Fn(&O, &SlotKey, T) -> Result<(), DynError> + Send + Sync>;
type Assemble<O, T, L> = Box<dyn Fn(SlotBuilder<O, T, Raw<O, T>>) -> Slot<O, T, L> + Send + Sync>;

/// A multiplexed slot.
///
/// Declared once per attribute; each distinct key gets its own sub-slot,
/// built on first access by the assemble closure and shared by every
/// instance of the owning type from then on.
///
/// # Example
///
/// ```rust
/// use parking_lot::Mutex;
/// use trellis_slot::{InstanceStorage, MultiSlot, SlotKey, Storage};
///
/// struct Mux {
///     storage: InstanceStorage,
///     lines: Mutex<[f64; 4]>,
/// }
///
/// impl Storage for Mux {
///     fn storage(&self) -> &InstanceStorage {
///         &self.storage
///     }
/// }
///
/// fn line_index(key: &SlotKey) -> usize {
///     match key {
///         SlotKey::Int(i) => *i as usize,
///         SlotKey::Str(_) => unreachable!("the key domain is integers"),
///     }
/// }
///
/// let level = MultiSlot::<Mux, f64, _>::new("level", |b| b.timed().build())
///     .keys([0, 1, 2, 3])
///     .getter(|m, key| Ok(m.lines.lock()[line_index(key)]))
///     .setter(|m, key, v| {
///         m.lines.lock()[line_index(key)] = v;
///         Ok(())
///     });
///
/// let mux = Mux {
///     storage: InstanceStorage::new(),
///     lines: Mutex::new([0.0; 4]),
/// };
///
/// level.set_item(&mux, 2, 0.7).unwrap();
/// assert_eq!(level.get_item(&mux, 2).unwrap(), 0.7);
/// assert!(level.get_item(&mux, 9).is_err());
/// ```
pub struct MultiSlot<O, T, L> {
    name: SlotName,
    domain: KeyDomain,
    fget: Option<KeyedGetter<O, T>>,
    fset: Option<KeyedSetter<O, T>>,
    assemble: Assemble<O, T, L>,
    channel: Option<Arc<dyn ChangeChannel<T>>>,
    subs: RwLock<HashMap<SlotKey, Arc<Slot<O, T, L>>>>,
}

impl<O: 'static, T: SlotData, L: SlotLayer<O, T>> MultiSlot<O, T, L> {
    /// Starts a multiplexed slot named `name` with an open key domain.
    ///
    /// `assemble` turns each sub-slot's accessor builder into its full
    /// chain; it runs once per distinct key, on first access. The plain
    /// passthrough is `|b| b.build()`.
    #[must_use]
    pub fn new(
        name: &'static str,
        assemble: impl Fn(SlotBuilder<O, T, Raw<O, T>>) -> Slot<O, T, L> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: SlotName::new(name),
            domain: KeyDomain::Open,
            fget: None,
            fset: None,
            assemble: Box::new(assemble),
            channel: None,
            subs: RwLock::new(HashMap::new()),
        }
    }

    /// Restricts the key domain to an explicit set.
    #[must_use]
    pub fn keys(mut self, keys: impl IntoIterator<Item = impl Into<SlotKey>>) -> Self {
        self.domain = KeyDomain::Set(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts the key domain to a key-to-key mapping.
    ///
    /// Callers index with the external (left) keys; storage and the
    /// underlying accessors see the internal (right) keys.
    #[must_use]
    pub fn mapping(
        mut self,
        pairs: impl IntoIterator<Item = (impl Into<SlotKey>, impl Into<SlotKey>)>,
    ) -> Self {
        self.domain = KeyDomain::Mapping(
            pairs
                .into_iter()
                .map(|(external, internal)| (external.into(), internal.into()))
                .collect(),
        );
        self
    }

    /// Attaches the keyed getter.
    #[must_use]
    pub fn getter(
        mut self,
        f: impl Fn(&O, &SlotKey) -> Result<T, DynError> + Send + Sync + 'static,
    ) -> Self {
        self.fget = Some(Arc::new(f));
        self
    }

    /// Attaches the keyed setter.
    #[must_use]
    pub fn setter(
        mut self,
        f: impl Fn(&O, &SlotKey, T) -> Result<(), DynError> + Send + Sync + 'static,
    ) -> Self {
        self.fset = Some(Arc::new(f));
        self
    }

    /// Observes the slot: one change channel, built by the owner's
    /// declared factory, shared by every sub-slot. Events carry the
    /// sub-slot key.
    ///
    /// The channel only fires if the assemble closure gives sub-slots a
    /// cache layer.
    #[must_use]
    pub fn observed(mut self) -> Self
    where
        O: Observable,
    {
        self.channel = Some(O::change_channel::<T>(&self.name));
        self
    }

    /// Returns the slot's declared (parent) name.
    #[must_use]
    pub fn name(&self) -> &SlotName {
        &self.name
    }

    /// Returns the declared key domain.
    #[must_use]
    pub fn domain(&self) -> &KeyDomain {
        &self.domain
    }

    fn resolve(&self, key: &SlotKey) -> Result<SlotKey, SlotError> {
        self.domain.resolve(key).ok_or_else(|| SlotError::InvalidKey {
            slot: self.name.clone(),
            key: key.clone(),
            domain: self.domain.render(),
        })
    }

    /// Returns the sub-slot for one internal key, building it on first use.
    fn sub(&self, internal: &SlotKey) -> Arc<Slot<O, T, L>> {
        if let Some(slot) = self.subs.read().get(internal) {
            return Arc::clone(slot);
        }

        let mut subs = self.subs.write();
        if let Some(slot) = subs.get(internal) {
            return Arc::clone(slot);
        }

        let name = SlotName::keyed(self.name.base(), internal.clone());
        let fget = self.fget.clone().map(|g| {
            let key = internal.clone();
            Box::new(move |owner: &O| g(owner, &key)) as Getter<O, T>
        });
        let fset = self.fset.clone().map(|s| {
            let key = internal.clone();
            Box::new(move |owner: &O, value| s(owner, &key, value)) as Setter<O, T>
        });
        let mut builder = SlotBuilder::for_name(name).accessors(fget, fset);
        if let Some(channel) = &self.channel {
            builder = builder.seed_channel(Arc::clone(channel));
        }
        let slot = Arc::new((self.assemble)(builder));
        subs.insert(internal.clone(), Arc::clone(&slot));
        slot
    }

    /// Reads one sub-slot's value for `owner`.
    pub fn get_item(&self, owner: &O, key: impl Into<SlotKey>) -> Result<T, SlotError> {
        let internal = self.resolve(&key.into())?;
        self.sub(&internal).get(owner)
    }

    /// Writes one sub-slot's value for `owner`.
    pub fn set_item(
        &self,
        owner: &O,
        key: impl Into<SlotKey>,
        value: T,
    ) -> Result<(), SlotError> {
        let internal = self.resolve(&key.into())?;
        self.sub(&internal).set(owner, value)
    }

    /// Deletes one sub-slot's value for `owner`.
    pub fn del_item(&self, owner: &O, key: impl Into<SlotKey>) -> Result<(), SlotError> {
        let internal = self.resolve(&key.into())?;
        self.sub(&internal).delete(owner)
    }

    /// The (external, internal) key pairs the whole-slot operations cover:
    /// the declared domain, or for an open domain the keys used so far.
    fn known_keys(&self) -> Vec<(SlotKey, SlotKey)> {
        self.domain.declared().unwrap_or_else(|| {
            self.subs
                .read()
                .keys()
                .map(|k| (k.clone(), k.clone()))
                .collect()
        })
    }

    /// Reads every known sub-slot, keyed by external key.
    ///
    /// Covers the declared domain, or for an open domain the keys used so
    /// far. Fails on the first sub-slot whose get fails.
    pub fn get_all(&self, owner: &O) -> Result<HashMap<SlotKey, T>, SlotError> {
        let mut out = HashMap::new();
        for (external, internal) in self.known_keys() {
            let value = self.sub(&internal).get(owner)?;
            out.insert(external, value);
        }
        Ok(out)
    }

    /// Fans a mapping of values out to per-key sets.
    pub fn set_all(
        &self,
        owner: &O,
        values: impl IntoIterator<Item = (impl Into<SlotKey>, T)>,
    ) -> Result<(), SlotError> {
        for (key, value) in values {
            self.set_item(owner, key, value)?;
        }
        Ok(())
    }

    /// Returns the cached value of every known sub-slot, keyed by external
    /// key; `None` for sub-slots that have never stored a value.
    #[must_use]
    pub fn recall_all(&self, owner: &O) -> HashMap<SlotKey, Option<T>>
    where
        O: Storage,
    {
        let keys = self.known_keys();
        let subs = self.subs.read();
        keys.into_iter()
            .map(|(external, internal)| {
                let cached = subs
                    .get(&internal)
                    .and_then(|slot| slot.cache())
                    .and_then(|cache| cache.recall(owner));
                (external, cached)
            })
            .collect()
    }

    /// Erases every sub-slot's cached value for `owner`.
    pub fn invalidate_all(&self, owner: &O)
    where
        O: Storage,
    {
        for slot in self.subs.read().values() {
            if let Some(cache) = slot.cache() {
                cache.invalidate(owner);
            }
        }
    }
}

impl<O, T, L> fmt::Debug for MultiSlot<O, T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiSlot")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("built", &self.subs.read().len())
            .finish_non_exhaustive()
    }
}
