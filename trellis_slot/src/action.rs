// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The action interceptor chain, for callable slots.
//!
//! An action is the callable counterpart of a value slot: a named function
//! of the owning type, wrapped in a linear chain of [`ActionLayer`]s. The
//! innermost layer is [`RawAction`], which holds the function itself;
//! around it the caller composes logging, locking, timing statistics and
//! argument/return transformation, in the same way a value slot composes
//! its layers.
//!
//! Actions keep their per-instance state (timing statistics, configuration
//! overrides) in namespaces of their own, separate from the value-slot
//! namespaces, so a slot and an action sharing a name never collide.
//!
//! Background dispatch is a facade concern, not a layer:
//! [`Action::call_async`] submits the whole chain to the owner's
//! single-worker queue and returns a [`TaskHandle`](crate::TaskHandle)
//! immediately.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use trellis_stats::Stats;

use crate::capability::{Lockable, Logs};
use crate::config::{ConfigArea, ConfigDecl, ConfigDecls, ConfigValues, InstanceConfig};
use crate::error::{ConfigError, DynError, SlotError};
use crate::name::SlotName;
use crate::slot::{StatsArea, Transform};
use crate::storage::{Namespace, Storage};
use crate::worker::{Spawns, TaskHandle};

/// Marker bounds for an action's argument and return types.
pub trait ActionData: Clone + fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + fmt::Debug + Send + Sync + 'static> ActionData for T {}

/// One layer of an action's interceptor chain.
///
/// The argument type `A` is the whole argument value of the action (for
/// several parameters, a tuple). Layers delegate inward, doing their own
/// work before or after the inner call.
pub trait ActionLayer<O, A, R> {
    /// Returns the name of the action this chain belongs to.
    fn name(&self) -> &SlotName;

    /// Invokes the action for `owner`.
    fn call(&self, owner: &O, args: A) -> Result<R, SlotError>;
}

/// A user-supplied action body.
pub type ActionFn<O, A, R> = Box<dyn Fn(&O, A) -> Result<R, DynError> + Send + Sync>;

/// The innermost chain layer: the action's function.
pub struct RawAction<O, A, R> {
    name: SlotName,
    func: ActionFn<O, A, R>,
}

impl<O, A, R> RawAction<O, A, R> {
    /// Wraps the function `f` under the action name `name`.
    #[must_use]
    pub fn new(
        name: impl Into<SlotName>,
        f: impl Fn(&O, A) -> Result<R, DynError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Box::new(f),
        }
    }
}

impl<O, A, R> fmt::Debug for RawAction<O, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawAction").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<O, A, R> ActionLayer<O, A, R> for RawAction<O, A, R> {
    fn name(&self) -> &SlotName {
        &self.name
    }

    fn call(&self, owner: &O, args: A) -> Result<R, SlotError> {
        (self.func)(owner, args).map_err(SlotError::Raised)
    }
}

/// The logging layer for actions.
///
/// Emits an info record with the arguments before the call, an info record
/// with the produced value after success, and an error record (then
/// propagates unchanged) when the inner chain fails. Requires the owner to
/// implement [`Logs`].
#[derive(Debug)]
pub struct LoggedAction<L> {
    inner: L,
}

impl<L> LoggedAction<L> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: L) -> Self {
        Self { inner }
    }
}

impl<O: Logs, A: ActionData, R: ActionData, L: ActionLayer<O, A, R>> ActionLayer<O, A, R>
    for LoggedAction<L>
{
    fn name(&self) -> &SlotName {
        self.inner.name()
    }

    fn call(&self, owner: &O, args: A) -> Result<R, SlotError> {
        owner.log_info(format_args!("calling {} with {args:?}", self.name()));
        match self.inner.call(owner, args) {
            Ok(out) => {
                owner.log_info(format_args!("{} returned {out:?}", self.name()));
                Ok(out)
            }
            Err(err) => {
                owner.log_error(format_args!("while calling {}: {err}", self.name()));
                Err(err)
            }
        }
    }
}

/// The locking layer for actions.
///
/// Serializes calls through the owner's per-instance re-entrant lock.
/// Requires the owner to implement [`Lockable`].
#[derive(Debug)]
pub struct LockedAction<L> {
    inner: L,
}

impl<L> LockedAction<L> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: L) -> Self {
        Self { inner }
    }
}

impl<O: Lockable, A, R, L: ActionLayer<O, A, R>> ActionLayer<O, A, R> for LockedAction<L> {
    fn name(&self) -> &SlotName {
        self.inner.name()
    }

    fn call(&self, owner: &O, args: A) -> Result<R, SlotError> {
        let _guard = owner.lock().lock();
        self.inner.call(owner, args)
    }
}

struct ActionStatsFamily;

pub(crate) fn action_stats_ns() -> Namespace<StatsArea> {
    Namespace::register::<ActionStatsFamily>("action_stats")
}

struct ActionConfigFamily;

pub(crate) fn action_config_ns() -> Namespace<ConfigArea> {
    Namespace::register::<ActionConfigFamily>("action_iconfig")
}

/// Reads the timing statistics recorded for an action on one instance.
///
/// Categories are `"call"` and `"failed_call"`. A category that was never
/// recorded reports all-zero statistics.
#[must_use]
pub fn action_timing_stats<O: Storage>(owner: &O, action: &SlotName, category: &str) -> Stats {
    action_stats_ns().with(owner.storage(), |area| {
        area.get(action).map(|stats| stats.stats(category)).unwrap_or_default()
    })
}

/// The timing-statistics layer for actions.
///
/// Times every call; successes record under `"call"`, failures under
/// `"failed_call"`, then propagate. Each instance accumulates
/// independently, in a namespace separate from the value-slot statistics.
/// Requires the owner to implement [`Storage`].
#[derive(Debug)]
pub struct TimedAction<L> {
    inner: L,
    ns: Namespace<StatsArea>,
}

impl<L> TimedAction<L> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            ns: action_stats_ns(),
        }
    }
}

impl<O: Storage, A, R, L: ActionLayer<O, A, R>> ActionLayer<O, A, R> for TimedAction<L> {
    fn name(&self) -> &SlotName {
        self.inner.name()
    }

    fn call(&self, owner: &O, args: A) -> Result<R, SlotError> {
        let tic = Instant::now();
        let out = self.inner.call(owner, args);
        let elapsed = tic.elapsed().as_secs_f64();
        let category = if out.is_ok() { "call" } else { "failed_call" };
        let name = self.inner.name();
        self.ns.with(owner.storage(), |area| {
            area.entry(name.clone()).or_default().add(category, elapsed);
        });
        out
    }
}

/// Accessors for the action transform layer's configuration.
///
/// `pre_call` rewrites the whole argument value before the inner call;
/// `post_call` rewrites the produced value. Both are per-instance
/// configuration slots with the usual `_iget`/`_iset` explicit-instance
/// accessor pair.
pub struct ActionHooks<A, R> {
    config: Arc<InstanceConfig>,
    _marker: PhantomData<fn() -> (A, R)>,
}

impl<A, R> Clone for ActionHooks<A, R> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            _marker: PhantomData,
        }
    }
}

impl<A, R> fmt::Debug for ActionHooks<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionHooks").finish_non_exhaustive()
    }
}

impl<A: ActionData, R: ActionData> ActionHooks<A, R> {
    /// Returns the shared `pre_call` transform.
    #[must_use]
    pub fn pre_call(&self) -> Option<Transform<A>> {
        self.config.get_shared("pre_call")
    }

    /// Sets the shared `pre_call` transform.
    pub fn set_pre_call(&self, transform: Option<Transform<A>>) -> Result<(), ConfigError> {
        self.config.set_shared("pre_call", transform)
    }

    /// Returns the `pre_call` transform as seen by `owner`.
    #[must_use]
    pub fn pre_call_iget<O: Storage>(&self, owner: &O) -> Option<Transform<A>> {
        self.config.get_for(owner, "pre_call")
    }

    /// Overrides the `pre_call` transform for `owner` only.
    pub fn pre_call_iset<O: Storage>(
        &self,
        owner: &O,
        transform: Option<Transform<A>>,
    ) -> Result<(), ConfigError> {
        self.config.set_for(owner, "pre_call", transform)
    }

    /// Returns the shared `post_call` transform.
    #[must_use]
    pub fn post_call(&self) -> Option<Transform<R>> {
        self.config.get_shared("post_call")
    }

    /// Sets the shared `post_call` transform.
    pub fn set_post_call(&self, transform: Option<Transform<R>>) -> Result<(), ConfigError> {
        self.config.set_shared("post_call", transform)
    }

    /// Returns the `post_call` transform as seen by `owner`.
    #[must_use]
    pub fn post_call_iget<O: Storage>(&self, owner: &O) -> Option<Transform<R>> {
        self.config.get_for(owner, "post_call")
    }

    /// Overrides the `post_call` transform for `owner` only.
    pub fn post_call_iset<O: Storage>(
        &self,
        owner: &O,
        transform: Option<Transform<R>>,
    ) -> Result<(), ConfigError> {
        self.config.set_for(owner, "post_call", transform)
    }
}

/// The transform layer for actions.
///
/// Applies the per-instance-configurable `pre_call` transform to the whole
/// argument value and `post_call` to the produced value. Transformation
/// failures are logged with the action name and the untransformed value,
/// then propagated. Requires the owner to implement [`Storage`] and
/// [`Logs`].
pub struct TransformedAction<L, A, R> {
    inner: L,
    hooks: ActionHooks<A, R>,
}

impl<L, A: ActionData, R: ActionData> TransformedAction<L, A, R> {
    /// Wraps `inner`, declaring the `pre_call` and `post_call` slots.
    #[must_use]
    pub fn new(inner: L, name: SlotName) -> Self {
        let decls = ConfigDecls::new()
            .declare(
                ConfigDecl::<Option<Transform<A>>>::new("pre_call")
                    .per_instance()
                    .default(None)
                    .doc("transformation applied to the arguments before the call"),
            )
            .declare(
                ConfigDecl::<Option<Transform<R>>>::new("post_call")
                    .per_instance()
                    .default(None)
                    .doc("transformation applied to the produced value"),
            );
        let config = InstanceConfig::new(name, action_config_ns(), decls, ConfigValues::new());
        Self {
            inner,
            hooks: ActionHooks {
                config: Arc::new(config),
                _marker: PhantomData,
            },
        }
    }

    /// Returns the transform configuration accessors.
    #[must_use]
    pub fn hooks(&self) -> &ActionHooks<A, R> {
        &self.hooks
    }
}

impl<L: fmt::Debug, A, R> fmt::Debug for TransformedAction<L, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformedAction")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<O, A, R, L> ActionLayer<O, A, R> for TransformedAction<L, A, R>
where
    O: Storage + Logs,
    A: ActionData,
    R: ActionData,
    L: ActionLayer<O, A, R>,
{
    fn name(&self) -> &SlotName {
        self.inner.name()
    }

    fn call(&self, owner: &O, args: A) -> Result<R, SlotError> {
        let args = match self.hooks.pre_call_iget(owner) {
            None => args,
            Some(transform) => match transform.apply(args.clone()) {
                Ok(out) => {
                    owner.log_info(format_args!("<T> calling {} with {out:?}", self.name()));
                    out
                }
                Err(err) => {
                    owner.log_error(format_args!(
                        "while pre-processing {args:?} for {}: {err}",
                        self.name(),
                    ));
                    return Err(SlotError::Raised(err));
                }
            },
        };

        let out = self.inner.call(owner, args)?;
        let Some(transform) = self.hooks.post_call_iget(owner) else {
            return Ok(out);
        };

        match transform.apply(out.clone()) {
            Ok(out) => Ok(out),
            Err(err) => {
                owner.log_error(format_args!(
                    "while post-processing {out:?} for {}: {err}",
                    self.name(),
                ));
                Err(SlotError::Raised(err))
            }
        }
    }
}

/// Builder for an action's interceptor chain.
///
/// Start with [`ActionBuilder::new`], then wrap layers in the order they
/// should nest; layers added later sit further out and run first.
pub struct ActionBuilder<O, A, R, L> {
    name: SlotName,
    chain: L,
    hooks: Option<ActionHooks<A, R>>,
    timed: bool,
    _owner: PhantomData<fn(&O)>,
}

impl<O, A, R> ActionBuilder<O, A, R, RawAction<O, A, R>> {
    /// Starts a chain for the action `name` around the function `f`.
    #[must_use]
    pub fn new(
        name: &'static str,
        f: impl Fn(&O, A) -> Result<R, DynError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: SlotName::new(name),
            chain: RawAction::new(SlotName::new(name), f),
            hooks: None,
            timed: false,
            _owner: PhantomData,
        }
    }
}

impl<O, A: ActionData, R: ActionData, L: ActionLayer<O, A, R>> ActionBuilder<O, A, R, L> {
    fn map_chain<M>(self, f: impl FnOnce(L) -> M) -> ActionBuilder<O, A, R, M> {
        ActionBuilder {
            name: self.name,
            chain: f(self.chain),
            hooks: self.hooks,
            timed: self.timed,
            _owner: PhantomData,
        }
    }

    /// Wraps the chain in the logging layer.
    #[must_use]
    pub fn logged(self) -> ActionBuilder<O, A, R, LoggedAction<L>>
    where
        O: Logs,
    {
        self.map_chain(LoggedAction::new)
    }

    /// Wraps the chain in the locking layer.
    #[must_use]
    pub fn locked(self) -> ActionBuilder<O, A, R, LockedAction<L>>
    where
        O: Lockable,
    {
        self.map_chain(LockedAction::new)
    }

    /// Wraps the chain in the timing-statistics layer.
    #[must_use]
    pub fn timed(self) -> ActionBuilder<O, A, R, TimedAction<L>>
    where
        O: Storage,
    {
        let mut out = self.map_chain(TimedAction::new);
        out.timed = true;
        out
    }

    /// Wraps the chain in the transform layer.
    #[must_use]
    pub fn transformed(self) -> ActionBuilder<O, A, R, TransformedAction<L, A, R>>
    where
        O: Storage + Logs,
    {
        let name = self.name.clone();
        let mut out = self.map_chain(|chain| TransformedAction::new(chain, name));
        out.hooks = Some(out.chain.hooks().clone());
        out
    }

    /// Finishes the chain.
    #[must_use]
    pub fn build(self) -> Action<O, A, R, L> {
        Action {
            name: self.name,
            chain: self.chain,
            hooks: self.hooks,
            timed: self.timed,
            _owner: PhantomData,
        }
    }
}

impl<O, A, R, L: fmt::Debug> fmt::Debug for ActionBuilder<O, A, R, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionBuilder")
            .field("name", &self.name)
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

/// A built action: the interceptor chain plus its configuration handles.
///
/// Shared by every instance of the owning type; all instance state lives
/// in the instances' storage.
///
/// # Example
///
/// ```rust
/// use trellis_slot::{ActionBuilder, InstanceStorage, Storage};
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
/// let scale = ActionBuilder::<Device, (f64, f64), f64, _>::new(
///     "scale",
///     |_d, (value, factor)| Ok(value * factor),
/// )
/// .timed()
/// .build();
///
/// let device = Device { storage: InstanceStorage::new() };
/// assert_eq!(scale.call(&device, (3.0, 2.0)).unwrap(), 6.0);
/// assert_eq!(scale.stats(&device, "call").count, 1);
/// ```
pub struct Action<O, A, R, L> {
    name: SlotName,
    chain: L,
    hooks: Option<ActionHooks<A, R>>,
    timed: bool,
    _owner: PhantomData<fn(&O)>,
}

impl<O, A: ActionData, R: ActionData, L: ActionLayer<O, A, R>> Action<O, A, R, L> {
    /// Returns the action's name.
    #[must_use]
    pub fn name(&self) -> &SlotName {
        &self.name
    }

    /// Invokes the action for `owner` through the chain.
    pub fn call(&self, owner: &O, args: A) -> Result<R, SlotError> {
        self.chain.call(owner, args)
    }

    /// Returns timing statistics recorded for `owner`.
    ///
    /// Categories are `"call"` and `"failed_call"`. All-zero statistics
    /// are reported when the action has no timing layer or nothing was
    /// recorded yet.
    #[must_use]
    pub fn stats(&self, owner: &O, category: &str) -> Stats
    where
        O: Storage,
    {
        if !self.timed {
            return Stats::default();
        }
        action_timing_stats(owner, &self.name, category)
    }

    /// Returns the transform configuration accessors, if the action has a
    /// transform layer.
    #[must_use]
    pub fn transforms(&self) -> Option<&ActionHooks<A, R>> {
        self.hooks.as_ref()
    }

    /// Submits the call to the owner's background worker.
    ///
    /// Returns immediately; the call runs on the worker thread in
    /// submission order, behind any previously submitted calls. The
    /// result, including any error the chain raises, surfaces through the
    /// returned handle. There is no cancellation: an in-flight call can
    /// only be awaited or polled.
    pub fn call_async(self: &Arc<Self>, owner: &Arc<O>, args: A) -> TaskHandle<Result<R, SlotError>>
    where
        O: Spawns + Send + Sync + 'static,
        A: Send,
        R: Send,
        L: Send + Sync + 'static,
    {
        let action = Arc::clone(self);
        let task_owner = Arc::clone(owner);
        owner.worker().submit(move || action.call(&task_owner, args))
    }
}

impl<O, A, R, L: fmt::Debug> fmt::Debug for Action<O, A, R, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("chain", &self.chain)
            .field("timed", &self.timed)
            .finish_non_exhaustive()
    }
}
