// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The slot interceptor chain.
//!
//! A slot is a linear chain of cooperating layers, each implementing
//! [`SlotLayer`] and delegating to the one it wraps. The innermost layer is
//! always [`Raw`], which holds the user-supplied getter/setter/deleter;
//! around it the caller composes, in any order, logging ([`Logged`]),
//! locking ([`Locked`]), timing statistics ([`Timed`]) and value
//! transformation ([`Transformed`]). The caching and notification layers
//! live in [`crate::cache`].
//!
//! Layers are shared by every instance of the owning type: anything
//! instance-specific goes through the owner's [`Storage`] capability.
//! What a layer requires of the owning type is expressed as a trait bound
//! on its `SlotLayer` implementation, so attaching a layer to a type that
//! cannot support it fails to compile at the declaration site.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use trellis_stats::{RunningStats, Stats};

use crate::capability::{Lockable, Logs};
use crate::config::{ConfigArea, ConfigDecl, ConfigDecls, ConfigValues, InstanceConfig};
use crate::error::{ConfigError, DynError, SlotError};
use crate::name::SlotName;
use crate::storage::{Namespace, Storage};

/// Marker bounds for a slot value type.
pub trait SlotData: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static> SlotData for T {}

/// One layer of a slot's interceptor chain.
///
/// Every layer exposes the same three operations and the slot's name;
/// wrappers do their own work before or after delegating inward, and may
/// short-circuit (a read-once layer answering from cache) or post-process
/// (a transform layer rewriting the produced value).
pub trait SlotLayer<O, T> {
    /// Returns the name of the slot this chain belongs to.
    fn name(&self) -> &SlotName;

    /// Reads the slot's value for `owner`.
    fn get(&self, owner: &O) -> Result<T, SlotError>;

    /// Writes `value` to the slot for `owner`.
    fn set(&self, owner: &O, value: T) -> Result<(), SlotError>;

    /// Deletes the slot's value for `owner`.
    fn delete(&self, owner: &O) -> Result<(), SlotError>;
}

/// A user-supplied slot getter.
pub type Getter<O, T> = Box<dyn Fn(&O) -> Result<T, DynError> + Send + Sync>;

/// A user-supplied slot setter.
pub type Setter<O, T> = Box<dyn Fn(&O, T) -> Result<(), DynError> + Send + Sync>;

/// A user-supplied slot deleter.
pub type Deleter<O> = Box<dyn Fn(&O) -> Result<(), DynError> + Send + Sync>;

/// The innermost chain layer: the slot's accessors.
///
/// Each accessor is optional. Reading without a getter, writing without a
/// setter or deleting without a deleter is an access-mode error naming the
/// slot; a slot with no deleter is permanent.
pub struct Raw<O, T> {
    name: SlotName,
    fget: Option<Getter<O, T>>,
    fset: Option<Setter<O, T>>,
    fdel: Option<Deleter<O>>,
}

impl<O, T> Raw<O, T> {
    /// Creates an accessor layer with no getter, setter or deleter.
    #[must_use]
    pub fn new(name: impl Into<SlotName>) -> Self {
        Self {
            name: name.into(),
            fget: None,
            fset: None,
            fdel: None,
        }
    }

    /// Attaches the getter.
    #[must_use]
    pub fn getter(mut self, f: impl Fn(&O) -> Result<T, DynError> + Send + Sync + 'static) -> Self {
        self.fget = Some(Box::new(f));
        self
    }

    /// Attaches the setter.
    #[must_use]
    pub fn setter(
        mut self,
        f: impl Fn(&O, T) -> Result<(), DynError> + Send + Sync + 'static,
    ) -> Self {
        self.fset = Some(Box::new(f));
        self
    }

    /// Attaches the deleter.
    #[must_use]
    pub fn deleter(
        mut self,
        f: impl Fn(&O) -> Result<(), DynError> + Send + Sync + 'static,
    ) -> Self {
        self.fdel = Some(Box::new(f));
        self
    }

    pub(crate) fn set_accessors(
        &mut self,
        fget: Option<Getter<O, T>>,
        fset: Option<Setter<O, T>>,
    ) {
        self.fget = fget;
        self.fset = fset;
    }
}

impl<O, T> fmt::Debug for Raw<O, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raw")
            .field("name", &self.name)
            .field("has_getter", &self.fget.is_some())
            .field("has_setter", &self.fset.is_some())
            .field("has_deleter", &self.fdel.is_some())
            .finish()
    }
}

impl<O, T: SlotData> SlotLayer<O, T> for Raw<O, T> {
    fn name(&self) -> &SlotName {
        &self.name
    }

    fn get(&self, owner: &O) -> Result<T, SlotError> {
        match &self.fget {
            Some(fget) => fget(owner).map_err(SlotError::Raised),
            None => Err(SlotError::NoGetter {
                slot: self.name.clone(),
            }),
        }
    }

    fn set(&self, owner: &O, value: T) -> Result<(), SlotError> {
        match &self.fset {
            Some(fset) => fset(owner, value).map_err(SlotError::Raised),
            None => Err(SlotError::NoSetter {
                slot: self.name.clone(),
            }),
        }
    }

    fn delete(&self, owner: &O) -> Result<(), SlotError> {
        match &self.fdel {
            Some(fdel) => fdel(owner).map_err(SlotError::Raised),
            None => Err(SlotError::Permanent {
                slot: self.name.clone(),
            }),
        }
    }
}

/// A projection applied to values before they are logged.
pub struct Projection<T>(Arc<dyn Fn(&T) -> Result<String, DynError> + Send + Sync>);

impl<T> Projection<T> {
    /// Wraps a projection function.
    #[must_use]
    pub fn new(f: impl Fn(&T) -> Result<String, DynError> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl<T> Clone for Projection<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Projection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Projection(..)")
    }
}

/// What the logging layer records about slot values.
#[derive(Debug, Clone, Default)]
pub enum ValueLogging<T> {
    /// Log the value itself (its `Debug` form).
    #[default]
    Values,
    /// Log a projection of the value, falling back to the type name when
    /// the projection fails.
    Projected(Projection<T>),
    /// Log only the value's type name.
    Types,
}

impl<T: fmt::Debug> ValueLogging<T> {
    fn render(&self, value: &T) -> String {
        match self {
            Self::Values => format!("{value:?}"),
            Self::Projected(projection) => (projection.0)(value)
                .unwrap_or_else(|_| String::from(std::any::type_name::<T>())),
            Self::Types => String::from(std::any::type_name::<T>()),
        }
    }
}

/// The logging layer.
///
/// Emits an info record before a get, debug records around successful
/// operations, and an error record (then propagates unchanged) when the
/// inner chain fails. Requires the owner to implement [`Logs`].
pub struct Logged<L, T> {
    inner: L,
    values: ValueLogging<T>,
}

impl<L, T> Logged<L, T> {
    /// Wraps `inner`, logging raw values.
    #[must_use]
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            values: ValueLogging::default(),
        }
    }

    /// Wraps `inner` with an explicit value-logging policy.
    #[must_use]
    pub fn with_values(inner: L, values: ValueLogging<T>) -> Self {
        Self { inner, values }
    }
}

impl<L: fmt::Debug, T> fmt::Debug for Logged<L, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logged").field("inner", &self.inner).finish_non_exhaustive()
    }
}

impl<O: Logs, T: SlotData, L: SlotLayer<O, T>> SlotLayer<O, T> for Logged<L, T> {
    fn name(&self) -> &SlotName {
        self.inner.name()
    }

    fn get(&self, owner: &O) -> Result<T, SlotError> {
        owner.log_info(format_args!("getting {}", self.name()));
        match self.inner.get(owner) {
            Ok(value) => {
                owner.log_debug(format_args!(
                    "got {} for {}",
                    self.values.render(&value),
                    self.name(),
                ));
                Ok(value)
            }
            Err(err) => {
                owner.log_error(format_args!("while getting {}: {err}", self.name()));
                Err(err)
            }
        }
    }

    fn set(&self, owner: &O, value: T) -> Result<(), SlotError> {
        let rendered = self.values.render(&value);
        owner.log_debug(format_args!("setting {} to {rendered}", self.name()));
        match self.inner.set(owner, value) {
            Ok(()) => {
                owner.log_debug(format_args!("{} was set to {rendered}", self.name()));
                Ok(())
            }
            Err(err) => {
                owner.log_error(format_args!(
                    "while setting {} to {rendered}: {err}",
                    self.name(),
                ));
                Err(err)
            }
        }
    }

    fn delete(&self, owner: &O) -> Result<(), SlotError> {
        self.inner.delete(owner)
    }
}

/// The locking layer.
///
/// Serializes get and set through the owner's per-instance re-entrant
/// lock. Requires the owner to implement [`Lockable`].
#[derive(Debug)]
pub struct Locked<L> {
    inner: L,
}

impl<L> Locked<L> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: L) -> Self {
        Self { inner }
    }
}

impl<O: Lockable, T: SlotData, L: SlotLayer<O, T>> SlotLayer<O, T> for Locked<L> {
    fn name(&self) -> &SlotName {
        self.inner.name()
    }

    fn get(&self, owner: &O) -> Result<T, SlotError> {
        let _guard = owner.lock().lock();
        self.inner.get(owner)
    }

    fn set(&self, owner: &O, value: T) -> Result<(), SlotError> {
        let _guard = owner.lock().lock();
        self.inner.set(owner, value)
    }

    fn delete(&self, owner: &O) -> Result<(), SlotError> {
        self.inner.delete(owner)
    }
}

/// The per-instance storage shape of the slot statistics namespace.
pub type StatsArea = HashMap<SlotName, RunningStats>;

struct SlotStatsFamily;

pub(crate) fn slot_stats_ns() -> Namespace<StatsArea> {
    Namespace::register::<SlotStatsFamily>("stats")
}

struct SlotConfigFamily;

pub(crate) fn slot_config_ns() -> Namespace<ConfigArea> {
    Namespace::register::<SlotConfigFamily>("iconfig")
}

/// Reads the timing statistics recorded for a slot on one instance.
///
/// Categories are `"get"`, `"set"`, and their `"failed_"` counterparts. A
/// category that was never recorded reports all-zero statistics.
#[must_use]
pub fn timing_stats<O: Storage>(owner: &O, slot: &SlotName, category: &str) -> Stats {
    slot_stats_ns().with(owner.storage(), |area| {
        area.get(slot).map(|stats| stats.stats(category)).unwrap_or_default()
    })
}

/// The timing-statistics layer.
///
/// Times every get and set; successes record under `"get"`/`"set"`,
/// failures under `"failed_get"`/`"failed_set"`, then propagate. Each
/// instance accumulates independently. Requires the owner to implement
/// [`Storage`].
#[derive(Debug)]
pub struct Timed<L> {
    inner: L,
    ns: Namespace<StatsArea>,
}

impl<L> Timed<L> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            ns: slot_stats_ns(),
        }
    }

    fn record<O: Storage>(&self, owner: &O, name: &SlotName, category: &'static str, elapsed: f64) {
        self.ns.with(owner.storage(), |area| {
            area.entry(name.clone()).or_default().add(category, elapsed);
        });
    }
}

impl<O: Storage, T: SlotData, L: SlotLayer<O, T>> SlotLayer<O, T> for Timed<L> {
    fn name(&self) -> &SlotName {
        self.inner.name()
    }

    fn get(&self, owner: &O) -> Result<T, SlotError> {
        let tic = Instant::now();
        let out = self.inner.get(owner);
        let elapsed = tic.elapsed().as_secs_f64();
        let category = if out.is_ok() { "get" } else { "failed_get" };
        self.record(owner, self.inner.name(), category, elapsed);
        out
    }

    fn set(&self, owner: &O, value: T) -> Result<(), SlotError> {
        let tic = Instant::now();
        let out = self.inner.set(owner, value);
        let elapsed = tic.elapsed().as_secs_f64();
        let category = if out.is_ok() { "set" } else { "failed_set" };
        self.record(owner, self.inner.name(), category, elapsed);
        out
    }

    fn delete(&self, owner: &O) -> Result<(), SlotError> {
        self.inner.delete(owner)
    }
}

/// A value transformation hook.
///
/// Wraps a fallible `T -> T` function shared between the class-level
/// default and per-instance overrides of the transform layer.
pub struct Transform<T>(Arc<dyn Fn(T) -> Result<T, DynError> + Send + Sync>);

impl<T> Transform<T> {
    /// Wraps a fallible transformation.
    #[must_use]
    pub fn new(f: impl Fn(T) -> Result<T, DynError> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Wraps an infallible transformation.
    #[must_use]
    pub fn map(f: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        Self(Arc::new(move |value| Ok(f(value))))
    }

    /// Applies the transformation.
    pub fn apply(&self, value: T) -> Result<T, DynError> {
        (self.0)(value)
    }
}

impl<T> Clone for Transform<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Transform<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transform(..)")
    }
}

/// Accessors for the transform layer's configuration.
///
/// `pre_set` rewrites incoming values before the inner set; `post_get`
/// rewrites produced values after the inner get. Both are per-instance
/// configuration slots: the `*_iget`/`*_iset` pair resolves against one
/// owning instance, the plain pair against the shared class-level value.
pub struct TransformHooks<T> {
    config: Arc<InstanceConfig>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TransformHooks<T> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TransformHooks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformHooks").finish_non_exhaustive()
    }
}

impl<T: SlotData> TransformHooks<T> {
    /// Returns the shared `pre_set` transform.
    #[must_use]
    pub fn pre_set(&self) -> Option<Transform<T>> {
        self.config.get_shared("pre_set")
    }

    /// Sets the shared `pre_set` transform.
    pub fn set_pre_set(&self, transform: Option<Transform<T>>) -> Result<(), ConfigError> {
        self.config.set_shared("pre_set", transform)
    }

    /// Returns the `pre_set` transform as seen by `owner`.
    #[must_use]
    pub fn pre_set_iget<O: Storage>(&self, owner: &O) -> Option<Transform<T>> {
        self.config.get_for(owner, "pre_set")
    }

    /// Overrides the `pre_set` transform for `owner` only.
    pub fn pre_set_iset<O: Storage>(
        &self,
        owner: &O,
        transform: Option<Transform<T>>,
    ) -> Result<(), ConfigError> {
        self.config.set_for(owner, "pre_set", transform)
    }

    /// Returns the shared `post_get` transform.
    #[must_use]
    pub fn post_get(&self) -> Option<Transform<T>> {
        self.config.get_shared("post_get")
    }

    /// Sets the shared `post_get` transform.
    pub fn set_post_get(&self, transform: Option<Transform<T>>) -> Result<(), ConfigError> {
        self.config.set_shared("post_get", transform)
    }

    /// Returns the `post_get` transform as seen by `owner`.
    #[must_use]
    pub fn post_get_iget<O: Storage>(&self, owner: &O) -> Option<Transform<T>> {
        self.config.get_for(owner, "post_get")
    }

    /// Overrides the `post_get` transform for `owner` only.
    pub fn post_get_iset<O: Storage>(
        &self,
        owner: &O,
        transform: Option<Transform<T>>,
    ) -> Result<(), ConfigError> {
        self.config.set_for(owner, "post_get", transform)
    }
}

/// The transform layer.
///
/// Applies the per-instance-configurable `pre_set` transform to incoming
/// values and `post_get` to produced values. Transformation failures are
/// logged with the slot name and the untransformed value, then propagated.
/// Requires the owner to implement [`Storage`] and [`Logs`].
pub struct Transformed<L, T> {
    inner: L,
    hooks: TransformHooks<T>,
}

impl<L, T: SlotData> Transformed<L, T> {
    /// Wraps `inner`, declaring the `pre_set` and `post_get` slots.
    #[must_use]
    pub fn new(inner: L, name: SlotName) -> Self {
        let decls = ConfigDecls::new()
            .declare(
                ConfigDecl::<Option<Transform<T>>>::new("pre_set")
                    .per_instance()
                    .default(None)
                    .doc("transformation applied to values before the setter runs"),
            )
            .declare(
                ConfigDecl::<Option<Transform<T>>>::new("post_get")
                    .per_instance()
                    .default(None)
                    .doc("transformation applied to values the getter produced"),
            );
        let config = InstanceConfig::new(name, slot_config_ns(), decls, ConfigValues::new());
        Self {
            inner,
            hooks: TransformHooks {
                config: Arc::new(config),
                _marker: PhantomData,
            },
        }
    }

    /// Returns the transform configuration accessors.
    #[must_use]
    pub fn hooks(&self) -> &TransformHooks<T> {
        &self.hooks
    }
}

impl<L: fmt::Debug, T> fmt::Debug for Transformed<L, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformed").field("inner", &self.inner).finish_non_exhaustive()
    }
}

impl<O: Storage + Logs, T: SlotData, L: SlotLayer<O, T>> SlotLayer<O, T> for Transformed<L, T> {
    fn name(&self) -> &SlotName {
        self.inner.name()
    }

    fn get(&self, owner: &O) -> Result<T, SlotError> {
        let value = self.inner.get(owner)?;
        let Some(transform) = self.hooks.post_get_iget(owner) else {
            return Ok(value);
        };

        match transform.apply(value.clone()) {
            Ok(out) => {
                owner.log_debug(format_args!("<T> got {out:?} for {}", self.name()));
                Ok(out)
            }
            Err(err) => {
                owner.log_error(format_args!(
                    "while post-processing {value:?} for {}: {err}",
                    self.name(),
                ));
                Err(SlotError::Raised(err))
            }
        }
    }

    fn set(&self, owner: &O, value: T) -> Result<(), SlotError> {
        let value = match self.hooks.pre_set_iget(owner) {
            None => value,
            Some(transform) => match transform.apply(value.clone()) {
                Ok(out) => {
                    owner.log_info(format_args!("<T> setting {} = {out:?}", self.name()));
                    out
                }
                Err(err) => {
                    owner.log_error(format_args!(
                        "while pre-processing {value:?} for {}: {err}",
                        self.name(),
                    ));
                    return Err(SlotError::Raised(err));
                }
            },
        };
        self.inner.set(owner, value)
    }

    fn delete(&self, owner: &O) -> Result<(), SlotError> {
        self.inner.delete(owner)
    }
}
