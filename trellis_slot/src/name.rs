// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Slot identification types.
//!
//! This module provides [`SlotName`] for identifying a declared slot and
//! [`SlotKey`] for addressing one sub-slot of a multiplexed slot. A keyed
//! name behaves like an ordinary slot name everywhere: it keys storage
//! entries, renders in log records and error messages, and compares and
//! hashes by value.

use std::borrow::Cow;
use std::fmt;

/// A key addressing one sub-slot of a multiplexed slot.
///
/// Keys are either strings or integers; domain declarations and sub-slot
/// identities use them interchangeably. Anything convertible into a
/// `SlotKey` can be used where one is expected:
///
/// ```rust
/// use trellis_slot::SlotKey;
///
/// let a: SlotKey = "x".into();
/// let b: SlotKey = 2.into();
/// assert_ne!(a, b);
/// assert_eq!(a.to_string(), "'x'");
/// assert_eq!(b.to_string(), "2");
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum SlotKey {
    /// A string key.
    Str(Cow<'static, str>),
    /// An integer key.
    Int(i64),
}

impl fmt::Debug for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "SlotKey({s:?})"),
            Self::Int(i) => write!(f, "SlotKey({i})"),
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "'{s}'"),
            Self::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&'static str> for SlotKey {
    fn from(s: &'static str) -> Self {
        Self::Str(Cow::Borrowed(s))
    }
}

impl From<String> for SlotKey {
    fn from(s: String) -> Self {
        Self::Str(Cow::Owned(s))
    }
}

impl From<i64> for SlotKey {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for SlotKey {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

/// The identity of a declared slot.
///
/// A plain name identifies an ordinary slot; a keyed name identifies one
/// sub-slot of a multiplexed slot and renders as `name[key]`. Names are
/// assigned once when the slot is built and never change afterwards.
///
/// # Example
///
/// ```rust
/// use trellis_slot::SlotName;
///
/// let plain = SlotName::new("voltage");
/// assert_eq!(plain.to_string(), "voltage");
/// assert!(plain.key().is_none());
///
/// let keyed = SlotName::keyed("voltage", "x");
/// assert_eq!(keyed.to_string(), "voltage['x']");
/// assert_eq!(keyed.base(), "voltage");
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SlotName {
    base: &'static str,
    key: Option<SlotKey>,
}

impl SlotName {
    /// Creates a plain slot name.
    #[must_use]
    pub const fn new(base: &'static str) -> Self {
        Self { base, key: None }
    }

    /// Creates a sub-slot name for one key of a multiplexed slot.
    #[must_use]
    pub fn keyed(base: &'static str, key: impl Into<SlotKey>) -> Self {
        Self {
            base,
            key: Some(key.into()),
        }
    }

    /// Returns the declared (parent) name.
    #[must_use]
    #[inline]
    pub const fn base(&self) -> &'static str {
        self.base
    }

    /// Returns the sub-slot key, if this is a keyed name.
    #[must_use]
    #[inline]
    pub fn key(&self) -> Option<&SlotKey> {
        self.key.as_ref()
    }
}

impl fmt::Debug for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotName({self})")
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}[{key}]", self.base),
            None => f.write_str(self.base),
        }
    }
}

impl From<&'static str> for SlotName {
    fn from(base: &'static str) -> Self {
        Self::new(base)
    }
}
