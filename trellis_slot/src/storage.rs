// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-instance namespaced storage.
//!
//! Chain layers are shared by every instance of the owning type, so any
//! state they keep per instance (cache contents, timing statistics,
//! configuration overrides) lives in the instance itself: each consuming
//! type carries an [`InstanceStorage`] and exposes it through the
//! [`Storage`] capability. The storage is subdivided into namespaces, one
//! per descriptor family, each keyed by slot name inside.
//!
//! ## Namespace ownership
//!
//! A namespace belongs to exactly one family. Families register their
//! namespace in a process-wide registry the first time they are used; a
//! later registration of the same name by an unrelated family panics right
//! there, so collisions surface when the conflicting family is wired up,
//! not when an instance first touches the storage. A family may extend
//! another and share its namespace (see [`Namespace::register_extending`]).
//!
//! ## Example
//!
//! ```rust
//! use hashbrown::HashMap;
//! use trellis_slot::{InstanceStorage, Namespace, SlotName, Storage};
//!
//! struct CountersFamily;
//!
//! struct Device {
//!     storage: InstanceStorage,
//! }
//!
//! impl Storage for Device {
//!     fn storage(&self) -> &InstanceStorage {
//!         &self.storage
//!     }
//! }
//!
//! let ns: Namespace<HashMap<SlotName, u64>> =
//!     Namespace::register::<CountersFamily>("doc_counters");
//!
//! let device = Device { storage: InstanceStorage::new() };
//! ns.with(device.storage(), |area| {
//!     *area.entry(SlotName::new("reads")).or_default() += 1;
//! });
//! let reads = ns.with(device.storage(), |area| area[&SlotName::new("reads")]);
//! assert_eq!(reads, 1);
//! ```

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::marker::PhantomData;
use std::sync::OnceLock;

use hashbrown::HashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

/// The per-instance private storage area.
///
/// Lazily populated: a namespace's area is created the first time that
/// namespace is touched for this instance. The storage is internally
/// synchronized so chain layers can reach it through a shared reference
/// to the owner.
#[derive(Default)]
pub struct InstanceStorage {
    areas: Mutex<HashMap<&'static str, Box<dyn Any + Send>>>,
}

impl InstanceStorage {
    /// Creates an empty storage area.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the names of the namespaces that have been initialized for
    /// this instance.
    #[must_use]
    pub fn namespaces(&self) -> Vec<&'static str> {
        self.areas.lock().keys().copied().collect()
    }
}

impl fmt::Debug for InstanceStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceStorage")
            .field("namespaces", &self.namespaces())
            .finish()
    }
}

/// Capability: the owning type carries per-instance storage.
///
/// Required by every layer that persists instance state (statistics,
/// caching, per-instance configuration).
pub trait Storage {
    /// Returns this instance's private storage area.
    fn storage(&self) -> &InstanceStorage;
}

/// A typed handle to one storage namespace.
///
/// The type parameter `S` is the shape of the per-instance area this
/// namespace holds, created via `S::default()` on first access. Handles are
/// cheap to copy and carry no instance state; all state lives in the
/// instance's [`InstanceStorage`].
pub struct Namespace<S> {
    name: &'static str,
    _marker: PhantomData<fn() -> S>,
}

impl<S> Copy for Namespace<S> {}

impl<S> Clone for Namespace<S> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> fmt::Debug for Namespace<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("area", &type_name::<S>())
            .finish()
    }
}

impl<S: Default + Send + 'static> Namespace<S> {
    /// Registers `name` as owned by the family `F` and returns a handle.
    ///
    /// Registering the same name again for the same family is a no-op and
    /// returns an equivalent handle.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already owned by a family unrelated to `F`.
    #[must_use]
    pub fn register<F: 'static>(name: &'static str) -> Self {
        registry_bind(name, family_entry::<F>(None));
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Registers `name` for the family `F`, which extends the family `P`.
    ///
    /// Extension is single-inheritance: `F` may share any namespace owned
    /// by `P` or by one of `P`'s own ancestors.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already owned by a family unrelated to `F`'s
    /// lineage.
    #[must_use]
    pub fn register_extending<F: 'static, P: 'static>(name: &'static str) -> Self {
        registry_bind(name, family_entry::<F>(Some(TypeId::of::<P>())));
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Returns the namespace name.
    #[must_use]
    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Runs `f` with mutable access to this namespace's area in `storage`.
    ///
    /// The area is created via `S::default()` on first access. The storage
    /// lock is held for the duration of `f`; do not call back into the same
    /// instance's storage from inside the closure.
    pub fn with<R>(&self, storage: &InstanceStorage, f: impl FnOnce(&mut S) -> R) -> R {
        let mut areas = storage.areas.lock();
        let area = areas
            .entry(self.name)
            .or_insert_with(|| Box::new(S::default()));
        let area = area
            .downcast_mut::<S>()
            .expect("namespace area type diverged from its registration");
        f(area)
    }

}

struct FamilyEntry {
    family: TypeId,
    family_name: &'static str,
    lineage: SmallVec<[TypeId; 4]>,
}

fn family_entry<F: 'static>(extends: Option<TypeId>) -> FamilyEntry {
    let family = TypeId::of::<F>();
    let mut lineage = SmallVec::new();
    lineage.push(family);
    if let Some(parent) = extends {
        lineage.push(parent);
    }
    FamilyEntry {
        family,
        family_name: type_name::<F>(),
        lineage,
    }
}

fn namespace_registry() -> &'static Mutex<HashMap<&'static str, FamilyEntry>> {
    static REGISTRY: OnceLock<Mutex<HashMap<&'static str, FamilyEntry>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn registry_bind(name: &'static str, mut entry: FamilyEntry) {
    let mut registry = namespace_registry().lock();

    // Fold the declared parent's lineage in, so grandchildren of a
    // registered family still count as related.
    if let Some(parent) = entry.lineage.get(1).copied()
        && let Some(parent_entry) = registry.values().find(|e| e.family == parent)
    {
        for ancestor in &parent_entry.lineage {
            if !entry.lineage.contains(ancestor) {
                entry.lineage.push(*ancestor);
            }
        }
    }

    match registry.get(name) {
        None => {
            registry.insert(name, entry);
        }
        Some(existing) => {
            let related = existing.family == entry.family
                || entry.lineage.contains(&existing.family)
                || existing.lineage.contains(&entry.family);
            assert!(
                related,
                "storage namespace '{name}' is owned by {}; {} is not related to it",
                existing.family_name, entry.family_name,
            );
            // First registrant wins; related families share its entry.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::SlotName;

    type Area = HashMap<SlotName, u32>;

    struct FamilyA;
    struct FamilyB;
    struct FamilyABis;

    #[test]
    fn area_is_lazily_created_and_reused() {
        let ns: Namespace<Area> = Namespace::register::<FamilyA>("test_lazy");
        let storage = InstanceStorage::new();

        assert!(storage.namespaces().is_empty());

        ns.with(&storage, |area| {
            area.insert(SlotName::new("a"), 1);
        });
        assert_eq!(storage.namespaces(), ["test_lazy"]);

        let value = ns.with(&storage, |area| area[&SlotName::new("a")]);
        assert_eq!(value, 1);
    }

    #[test]
    fn areas_are_instance_private() {
        let ns: Namespace<Area> = Namespace::register::<FamilyA>("test_private");
        let first = InstanceStorage::new();
        let second = InstanceStorage::new();

        ns.with(&first, |area| {
            area.insert(SlotName::new("a"), 1);
        });

        let absent = ns.with(&second, |area| area.get(&SlotName::new("a")).copied());
        assert_eq!(absent, None);
    }

    #[test]
    fn removing_a_missing_entry_is_a_noop() {
        let ns: Namespace<Area> = Namespace::register::<FamilyA>("test_discard");
        let storage = InstanceStorage::new();

        ns.with(&storage, |area| {
            area.remove(&SlotName::new("never"));
        });

        let len = ns.with(&storage, |area| area.len());
        assert_eq!(len, 0);
    }

    #[test]
    fn same_family_may_reregister() {
        let a: Namespace<Area> = Namespace::register::<FamilyA>("test_rereg");
        let b: Namespace<Area> = Namespace::register::<FamilyA>("test_rereg");
        assert_eq!(a.name(), b.name());
    }

    #[test]
    fn extending_family_shares_the_namespace() {
        let _parent: Namespace<Area> = Namespace::register::<FamilyA>("test_extend");
        let _child: Namespace<Area> =
            Namespace::register_extending::<FamilyABis, FamilyA>("test_extend");
    }

    #[test]
    fn parent_registered_after_child_is_still_related() {
        let _child: Namespace<Area> =
            Namespace::register_extending::<FamilyABis, FamilyA>("test_extend_rev");
        let _parent: Namespace<Area> = Namespace::register::<FamilyA>("test_extend_rev");
    }

    #[test]
    #[should_panic(expected = "is not related")]
    fn unrelated_family_collision_panics() {
        let _a: Namespace<Area> = Namespace::register::<FamilyA>("test_collide");
        let _b: Namespace<Area> = Namespace::register::<FamilyB>("test_collide");
    }

    #[test]
    fn storage_is_shareable_across_threads() {
        let ns: Namespace<Area> = Namespace::register::<FamilyA>("test_threads");
        let storage = std::sync::Arc::new(InstanceStorage::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let storage = std::sync::Arc::clone(&storage);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        ns.with(&storage, |area| {
                            *area.entry(SlotName::new("hits")).or_default() += 1;
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let hits = ns.with(&storage, |area| area[&SlotName::new("hits")]);
        assert_eq!(hits, 400);
    }
}
