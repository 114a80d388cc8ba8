// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Trellis Slot: composable interceptor chains for instrumented attribute
//! slots.
//!
//! This crate augments attribute access on consuming types with composable
//! cross-cutting behaviors: logging, timing statistics, mutual-exclusion
//! locking, value caching, change notification, input/output
//! transformation, and per-instance configuration of all of the above.
//!
//! The engineering problem underneath is that a slot is declared once per
//! type and shared by every instance, while most of these behaviors (cache
//! contents, accumulated statistics, configuration overrides) are
//! instance-specific. The crate solves it with instance-scoped namespaced
//! storage: every consuming instance carries an [`InstanceStorage`], and
//! chain layers persist their per-instance state there, keyed by
//! (namespace, slot name), with namespace ownership checked in a
//! process-wide registry.
//!
//! ## Core Concepts
//!
//! ### Slots and Chains
//!
//! A **slot** is a named attribute governed by an interceptor chain: a
//! linear nesting of layers, each implementing [`SlotLayer`] and
//! delegating to the one it wraps. [`SlotBuilder`] assembles the chain as
//! one concrete nested type; composition order is the call order. The
//! built [`Slot`] is the facade: get/set/delete plus handles to the cache,
//! the transforms and the read-once flag, wherever they sit in the chain.
//!
//! **Actions** are the callable counterpart ([`ActionBuilder`],
//! [`Action`]): the same layer discipline around a named function, with
//! timing under `"call"`/`"failed_call"` in a namespace of its own, and
//! background dispatch through the owner's single-worker queue.
//!
//! ### Capabilities
//!
//! What a layer needs from the owning type is an ordinary trait bound,
//! checked where the chain is declared: [`Storage`] for anything that
//! persists instance state, [`Logs`] for the logging layers, [`Lockable`]
//! for the locking layers, [`Observable`] for change notification and
//! [`Spawns`] for background dispatch.
//!
//! ### Multiplexed Slots
//!
//! A [`MultiSlot`] fans one declared slot out into independently tracked
//! sub-slots, one per key, each a full chain under its composite
//! `name[key]` identity, with optional key domains and key translation.
//!
//! ## Quick Start
//!
//! ```rust
//! use parking_lot::{Mutex, ReentrantMutex};
//! use trellis_slot::{
//!     InstanceStorage, Level, Lockable, Logs, SlotBuilder, Storage,
//! };
//!
//! struct Sensor {
//!     storage: InstanceStorage,
//!     lock: ReentrantMutex<()>,
//!     volts: Mutex<f64>,
//! }
//!
//! impl Storage for Sensor {
//!     fn storage(&self) -> &InstanceStorage {
//!         &self.storage
//!     }
//! }
//!
//! impl Logs for Sensor {
//!     fn log(&self, level: Level, message: std::fmt::Arguments<'_>) {
//!         trellis_slot::emit(level, message);
//!     }
//! }
//!
//! impl Lockable for Sensor {
//!     fn lock(&self) -> &ReentrantMutex<()> {
//!         &self.lock
//!     }
//! }
//!
//! // Innermost accessors, then layers outward: timing, logging, locking.
//! let voltage = SlotBuilder::<Sensor, f64, _>::new("voltage")
//!     .getter(|s| Ok(*s.volts.lock()))
//!     .setter(|s, v| {
//!         *s.volts.lock() = v;
//!         Ok(())
//!     })
//!     .timed()
//!     .logged()
//!     .locked()
//!     .build();
//!
//! let sensor = Sensor {
//!     storage: InstanceStorage::new(),
//!     lock: ReentrantMutex::new(()),
//!     volts: Mutex::new(0.0),
//! };
//!
//! voltage.set(&sensor, 1.5).unwrap();
//! assert_eq!(voltage.get(&sensor).unwrap(), 1.5);
//! assert_eq!(voltage.stats(&sensor, "get").count, 1);
//! assert_eq!(voltage.stats(&sensor, "set").count, 1);
//! ```
//!
//! ## Per-Instance State
//!
//! Each instance's storage, cache, lock, statistics and configuration
//! overrides are exclusively its own; nothing is shared or merged across
//! instances. The only process-wide state is the namespace registry, which
//! binds each storage namespace to the one descriptor family allowed to
//! use it; a collision between unrelated families panics when the
//! offending family registers, not at first use.
//!
//! ## Error Handling
//!
//! Runtime failures are [`SlotError`]s propagated with `?`: access-mode
//! errors (no getter/setter/deleter), key errors on multiplexed slots,
//! configuration validation failures ([`ConfigError`]) and errors raised
//! by user-supplied code, which the chain logs with slot context and
//! propagates unchanged. Declaration-time misuse (namespace collisions,
//! unknown or missing configuration names at construction) panics while
//! the program wires up its types.

mod action;
mod builder;
mod cache;
mod capability;
mod config;
mod error;
mod multi;
mod name;
mod observe;
mod slot;
mod storage;
mod value;
mod worker;

pub use action::{
    Action, ActionBuilder, ActionData, ActionFn, ActionHooks, ActionLayer, LockedAction,
    LoggedAction, RawAction, TimedAction, TransformedAction, action_timing_stats,
};
pub use builder::{Slot, SlotBuilder};
pub use cache::{
    CacheArea, CacheHandle, GetCached, PreventUnnecessarySet, ReadOnce, ReadOnceSwitch, SetCached,
    recall_many,
};
pub use capability::{Level, Lockable, Logs, emit};
pub use config::{
    ConfigArea, ConfigData, ConfigDecl, ConfigDecls, ConfigScope, ConfigValues, InstanceConfig,
    OnConfigSet,
};
pub use error::{ConfigError, DynError, SlotError};
pub use multi::{KeyDomain, MultiSlot};
pub use name::{SlotKey, SlotName};
pub use observe::{Change, ChangeChannel, Observable, Watchers};
pub use slot::{
    Deleter, Getter, Locked, Logged, Projection, Raw, Setter, SlotData, SlotLayer, StatsArea,
    Timed, Transform, TransformHooks, Transformed, ValueLogging, timing_stats,
};
pub use storage::{InstanceStorage, Namespace, Storage};
pub use value::OpaqueValue;
pub use worker::{Spawns, TaskHandle, Worker};
