// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Capability traits for consuming types.
//!
//! Each chain layer states what the owning type must provide as an
//! ordinary trait bound: [`Logs`] for the logging layers, [`Lockable`] for
//! the locking layers, [`Storage`](crate::Storage) for anything that
//! persists instance state, [`Observable`](crate::Observable) for change
//! notification and [`Spawns`](crate::Spawns) for background dispatch.
//! Attaching a layer to a type that lacks a capability is a compile error
//! at the point the chain is declared, not a failure on first use.

use std::fmt;

use parking_lot::ReentrantMutex;
pub use tracing::Level;

/// Capability: the owning type can emit leveled log records.
///
/// One method is required; the severity helpers are provided. The message
/// arrives as preformatted [`fmt::Arguments`], so implementations only
/// decide where the record goes; most forward to [`emit`]:
///
/// ```rust
/// use trellis_slot::{Level, Logs};
/// use std::fmt;
///
/// struct Device;
///
/// impl Logs for Device {
///     fn log(&self, level: Level, message: fmt::Arguments<'_>) {
///         trellis_slot::emit(level, message);
///     }
/// }
///
/// Device.log_info(format_args!("powered on"));
/// ```
pub trait Logs {
    /// Logs `message` at the given severity.
    fn log(&self, level: Level, message: fmt::Arguments<'_>);

    /// Logs at severity `INFO`.
    fn log_info(&self, message: fmt::Arguments<'_>) {
        self.log(Level::INFO, message);
    }

    /// Logs at severity `DEBUG`.
    fn log_debug(&self, message: fmt::Arguments<'_>) {
        self.log(Level::DEBUG, message);
    }

    /// Logs at severity `WARN`.
    fn log_warning(&self, message: fmt::Arguments<'_>) {
        self.log(Level::WARN, message);
    }

    /// Logs at severity `ERROR`.
    fn log_error(&self, message: fmt::Arguments<'_>) {
        self.log(Level::ERROR, message);
    }
}

/// Forwards a log record to the `tracing` subscriber for this thread.
///
/// This is the default sink for [`Logs`] implementations. The record
/// carries the formatted message only; routing, filtering and formatting
/// stay with the subscriber.
pub fn emit(level: Level, message: fmt::Arguments<'_>) {
    if level == Level::ERROR {
        tracing::error!("{message}");
    } else if level == Level::WARN {
        tracing::warn!("{message}");
    } else if level == Level::INFO {
        tracing::info!("{message}");
    } else if level == Level::DEBUG {
        tracing::debug!("{message}");
    } else {
        tracing::trace!("{message}");
    }
}

/// Capability: the owning type carries a per-instance re-entrant lock.
///
/// The locking layers serialize slot operations on one instance through
/// this lock. It is re-entrant so a locked operation can reach another
/// locked slot of the same instance without deadlocking; there is no
/// timeout.
///
/// ```rust
/// use parking_lot::ReentrantMutex;
/// use trellis_slot::Lockable;
///
/// struct Device {
///     lock: ReentrantMutex<()>,
/// }
///
/// impl Lockable for Device {
///     fn lock(&self) -> &ReentrantMutex<()> {
///         &self.lock
///     }
/// }
/// ```
pub trait Lockable {
    /// Returns this instance's lock.
    fn lock(&self) -> &ReentrantMutex<()>;
}
