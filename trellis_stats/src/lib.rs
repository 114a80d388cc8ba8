// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Trellis Stats: online running-statistics accumulators.
//!
//! This crate provides single-pass accumulators for event durations and
//! other scalar observations, grouped by a category key. It is the
//! measurement primitive behind the timing layers in `trellis_slot`, but
//! has no dependency on them and can be used on its own.
//!
//! ## Core Concepts
//!
//! - [`RunningState`] accumulates one stream of values: last, count, sum,
//!   sum of squares, min and max.
//! - [`RunningStats`] maps category keys to [`RunningState`]s, creating
//!   each category lazily on first use.
//! - [`Stats`] is the derived snapshot: `(last, count, mean, std, min, max)`.
//!
//! ## Quick Start
//!
//! ```rust
//! use trellis_stats::RunningStats;
//!
//! let mut stats = RunningStats::new();
//! stats.add("get", 0.5);
//! stats.add("get", 1.5);
//!
//! let snapshot = stats.stats("get");
//! assert_eq!(snapshot.count, 2);
//! assert_eq!(snapshot.mean, 1.0);
//!
//! // Untouched categories report zeros instead of failing.
//! assert_eq!(stats.stats("set").count, 0);
//! assert_eq!(stats.stats("set").min, 0.0);
//! ```
//!
//! ## Timed Spans
//!
//! [`RunningStats::time`] runs a fallible closure and records the elapsed
//! seconds under the given category on success, or under
//! `"failed_" + category` on error, propagating the result unchanged:
//!
//! ```rust
//! use trellis_stats::RunningStats;
//!
//! let mut stats = RunningStats::new();
//! let out: Result<u32, &str> = stats.time("call", || Ok(42));
//! assert_eq!(out, Ok(42));
//! assert_eq!(stats.stats("call").count, 1);
//!
//! let out: Result<u32, &str> = stats.time("call", || Err("boom"));
//! assert!(out.is_err());
//! assert_eq!(stats.stats("failed_call").count, 1);
//! ```
//!
//! ## Semantics
//!
//! The standard deviation is the population form computed from the running
//! sum and sum of squares, not the Bessel-corrected sample form. A category
//! that has never received a value reports all-zero statistics; the zero
//! min/max is a defined sentinel result, not a true minimum.

use std::borrow::Cow;
use std::time::Instant;

use hashbrown::HashMap;

/// A derived statistics snapshot for one category.
///
/// Returned by [`RunningStats::stats`]. All fields are zero for a category
/// that has never received a value.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Stats {
    /// Most recent value added.
    pub last: f64,
    /// Number of values added.
    pub count: u64,
    /// Arithmetic mean of the added values.
    pub mean: f64,
    /// Population standard deviation of the added values.
    pub std: f64,
    /// Smallest value added.
    pub min: f64,
    /// Largest value added.
    pub max: f64,
}

/// Accumulator for a single stream of values.
///
/// Tracks last/count/sum/sum-of-squares/min/max in a single pass. Derived
/// statistics are computed on demand by [`RunningState::stats`].
///
/// # Example
///
/// ```rust
/// use trellis_stats::RunningState;
///
/// let mut state = RunningState::new();
/// state.add(1.0);
/// state.add(3.0);
///
/// let stats = state.stats();
/// assert_eq!(stats.count, 2);
/// assert_eq!(stats.mean, 2.0);
/// assert_eq!(stats.min, 1.0);
/// assert_eq!(stats.max, 3.0);
/// ```
#[derive(Clone, Debug)]
pub struct RunningState {
    last: f64,
    count: u64,
    sum: f64,
    sum2: f64,
    min: f64,
    max: f64,
}

impl Default for RunningState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningState {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: 0.0,
            count: 0,
            sum: 0.0,
            sum2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Adds a value to the accumulator.
    pub fn add(&mut self, value: f64) {
        self.last = value;
        self.count += 1;
        self.sum += value;
        self.sum2 += value * value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Returns the number of values added so far.
    #[must_use]
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Computes the derived statistics snapshot.
    ///
    /// An empty accumulator reports all zeros rather than NaN or infinite
    /// min/max.
    #[must_use]
    pub fn stats(&self) -> Stats {
        if self.count == 0 {
            return Stats::default();
        }

        let count = self.count as f64;
        let mean = self.sum / count;
        let std = ((self.sum2 - 2.0 * self.sum * mean + count * mean * mean) / count).sqrt();
        Stats {
            last: self.last,
            count: self.count,
            mean,
            std,
            min: self.min,
            max: self.max,
        }
    }
}

/// Accumulator for categorized event statistics.
///
/// Categories are created lazily the first time they receive a value and
/// grow monotonically; to reset, replace the whole accumulator.
///
/// # Example
///
/// ```rust
/// use trellis_stats::RunningStats;
///
/// let mut stats = RunningStats::new();
/// stats.add("set", 0.25);
/// assert_eq!(stats.stats("set").count, 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct RunningStats {
    states: HashMap<Cow<'static, str>, RunningState>,
}

impl RunningStats {
    /// Creates an empty set of accumulators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value to the given category, creating it on first use.
    pub fn add(&mut self, category: impl Into<Cow<'static, str>>, value: f64) {
        self.states.entry(category.into()).or_default().add(value);
    }

    /// Returns the statistics snapshot for a category.
    ///
    /// An unknown or empty category reports all zeros.
    #[must_use]
    pub fn stats(&self, category: &str) -> Stats {
        self.states
            .get(category)
            .map(RunningState::stats)
            .unwrap_or_default()
    }

    /// Returns `true` if no category has received a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Returns an iterator over the category keys seen so far.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(Cow::as_ref)
    }

    /// Runs `f` inside a timed span for `category`.
    ///
    /// On `Ok` the elapsed seconds are recorded under `category`; on `Err`
    /// they are recorded under `"failed_" + category`. The result is
    /// returned unchanged either way, and the span closes exactly once
    /// regardless of the exit path.
    pub fn time<T, E>(
        &mut self,
        category: impl Into<Cow<'static, str>>,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let category = category.into();
        let tic = Instant::now();
        let out = f();
        let elapsed = tic.elapsed().as_secs_f64();
        match &out {
            Ok(_) => self.add(category, elapsed),
            Err(_) => self.add(format!("failed_{category}"), elapsed),
        }
        out
    }
}
