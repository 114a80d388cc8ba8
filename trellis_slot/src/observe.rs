// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Change notification channels.
//!
//! An observed slot emits a [`Change`] every time its cached value is
//! replaced by a different one, whether the store came from a get, a set
//! or a direct cache write. Delivery is the channel implementation's
//! business: the core only calls [`ChangeChannel::emit`]. The crate ships
//! [`Watchers`], a synchronous subscriber list, as the ready-made channel.

use std::fmt;

use parking_lot::RwLock;

use crate::name::{SlotKey, SlotName};

/// A change event: the new value, the previous one, and (for a sub-slot
/// of a multiplexed slot) the sub-slot key.
///
/// `old` is `None` when the cache held no value before the store.
#[derive(Debug)]
pub struct Change<'a, T> {
    /// The value that was just stored.
    pub new: &'a T,
    /// The previously cached value, if any.
    pub old: Option<&'a T>,
    /// The sub-slot key, for multiplexed slots.
    pub key: Option<&'a SlotKey>,
}

/// A channel carrying change events for one slot.
///
/// The factory declared by the owning type (see [`Observable`]) decides
/// the delivery semantics (synchronous, queued, fanned out); the core
/// never looks past `emit`.
pub trait ChangeChannel<T>: Send + Sync {
    /// Delivers one change event.
    fn emit(&self, change: Change<'_, T>);
}

/// Capability: the owning type declares how change channels are built.
///
/// One channel is created per observed slot when the slot is declared,
/// shared by every instance of the owning type.
///
/// ```rust
/// use std::sync::Arc;
/// use trellis_slot::{ChangeChannel, Observable, SlotName, Watchers};
///
/// struct Device;
///
/// impl Observable for Device {
///     fn change_channel<T: Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static>(
///         _name: &SlotName,
///     ) -> Arc<dyn ChangeChannel<T>> {
///         Arc::new(Watchers::new())
///     }
/// }
/// ```
pub trait Observable {
    /// Builds the change channel for the slot `name`.
    fn change_channel<T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static>(
        name: &SlotName,
    ) -> std::sync::Arc<dyn ChangeChannel<T>>;
}

type Watcher<T> = Box<dyn Fn(Change<'_, T>) + Send + Sync>;

/// A synchronous subscriber-list channel.
///
/// Subscribers run on the emitting thread, in subscription order.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use trellis_slot::{Change, ChangeChannel, Watchers};
///
/// let seen = Arc::new(AtomicUsize::new(0));
/// let watchers = Watchers::new();
/// let counter = Arc::clone(&seen);
/// watchers.subscribe(move |_change: Change<'_, i32>| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// watchers.emit(Change { new: &1, old: None, key: None });
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// ```
pub struct Watchers<T> {
    watchers: RwLock<Vec<Watcher<T>>>,
}

impl<T> Default for Watchers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Watchers<T> {
    /// Creates a channel with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            watchers: RwLock::new(Vec::new()),
        }
    }

    /// Adds a subscriber.
    pub fn subscribe(&self, watcher: impl Fn(Change<'_, T>) + Send + Sync + 'static) {
        self.watchers.write().push(Box::new(watcher));
    }

    /// Returns the number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.watchers.read().len()
    }

    /// Returns `true` if nobody is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watchers.read().is_empty()
    }
}

impl<T> fmt::Debug for Watchers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watchers")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl<T: Send + Sync> ChangeChannel<T> for Watchers<T> {
    fn emit(&self, change: Change<'_, T>) {
        for watcher in self.watchers.read().iter() {
            watcher(Change {
                new: change.new,
                old: change.old,
                key: change.key,
            });
        }
    }
}
