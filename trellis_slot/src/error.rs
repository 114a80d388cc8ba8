// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types for slot access and configuration validation.
//!
//! Declaration-time misuse (namespace collisions, unknown or missing
//! configuration names at construction) panics at the point the offending
//! family or slot is wired up; the types here cover the failures a caller
//! can hit at runtime. User-supplied getters, setters and transforms report
//! errors as [`DynError`], which the chain propagates unchanged inside
//! [`SlotError::Raised`].

use thiserror::Error;

use crate::name::{SlotKey, SlotName};

/// A boxed error raised by user-supplied code (getters, setters,
/// transforms, check predicates).
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error raised by a slot operation.
#[derive(Debug, Error)]
pub enum SlotError {
    /// The slot was read but declares no getter.
    #[error("{slot} is a write-only slot (it has no getter)")]
    NoGetter {
        /// The slot that was accessed.
        slot: SlotName,
    },

    /// The slot was written but declares no setter.
    #[error("{slot} is a read-only slot (it has no setter)")]
    NoSetter {
        /// The slot that was accessed.
        slot: SlotName,
    },

    /// The slot was deleted but is permanent (it declares no deleter).
    #[error("{slot} is a permanent slot (it has no deleter)")]
    Permanent {
        /// The slot that was accessed.
        slot: SlotName,
    },

    /// A multiplexed slot was indexed with a key outside its declared
    /// domain.
    #[error("{key} is not a valid key for {slot}; expected one of {domain}")]
    InvalidKey {
        /// The slot that was indexed.
        slot: SlotName,
        /// The rejected key.
        key: SlotKey,
        /// A rendering of the declared key domain.
        domain: String,
    },

    /// A configuration write failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error raised by user-supplied code, propagated unchanged.
    #[error("{0}")]
    Raised(#[source] DynError),
}

impl SlotError {
    /// Wraps an error raised by user-supplied code.
    #[must_use]
    pub fn raised(err: impl Into<DynError>) -> Self {
        Self::Raised(err.into())
    }
}

/// An error raised when a configuration value fails validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The value is outside the declared allowed set.
    #[error("{value} is not a valid value for {name}; should be in {allowed}")]
    NotAllowed {
        /// The configuration slot name.
        name: &'static str,
        /// The rejected value.
        value: String,
        /// The declared allowed set.
        allowed: String,
    },

    /// The check predicate returned `false`.
    #[error("the value provided for {name} does not pass the check function")]
    Rejected {
        /// The configuration slot name.
        name: &'static str,
    },

    /// The check predicate itself failed.
    #[error("the value provided for {name} does not pass the check function: {source}")]
    CheckFailed {
        /// The configuration slot name.
        name: &'static str,
        /// The error raised inside the predicate.
        #[source]
        source: DynError,
    },
}
