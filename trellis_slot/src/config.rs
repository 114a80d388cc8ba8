// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Configuration slots for chain layers.
//!
//! A layer declares named, validated, defaulted configuration slots with
//! [`ConfigDecl`]; the declarations and the values supplied at
//! construction resolve into an [`InstanceConfig`], the layer's
//! configuration store. Every slot holds a concrete value once the layer
//! is built: a declared default, or a supplied value, or construction
//! panics listing what is missing.
//!
//! Values resolve in two scopes. A [`ConfigScope::Shared`] slot has one
//! value for every instance of the owning type. A
//! [`ConfigScope::PerInstance`] slot falls back from an instance override
//! (kept in that instance's storage under the configuration namespace) to
//! the shared value.
//!
//! ```rust
//! use trellis_slot::{ConfigDecl, ConfigDecls, ConfigValues, InstanceConfig, Namespace, SlotName};
//! # use trellis_slot::{ConfigArea, InstanceStorage, Storage};
//! # struct DocFamily;
//! # struct Device { storage: InstanceStorage }
//! # impl Storage for Device {
//! #     fn storage(&self) -> &InstanceStorage { &self.storage }
//! # }
//!
//! let decls = ConfigDecls::new().declare(
//!     ConfigDecl::<u32>::new("retries")
//!         .per_instance()
//!         .check(|v| Ok(*v <= 5))
//!         .default(1)
//!         .doc("attempts before giving up"),
//! );
//!
//! let config = InstanceConfig::new(
//!     SlotName::new("doc_slot"),
//!     Namespace::register::<DocFamily>("doc_config"),
//!     decls,
//!     ConfigValues::new(),
//! );
//! assert_eq!(config.get_shared::<u32>("retries"), 1);
//!
//! let device = Device { storage: InstanceStorage::new() };
//! config.set_for(&device, "retries", 3_u32).unwrap();
//! assert_eq!(config.get_for::<_, u32>(&device, "retries"), 3);
//! assert_eq!(config.get_shared::<u32>("retries"), 1);
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::error::{ConfigError, DynError};
use crate::name::SlotName;
use crate::storage::{Namespace, Storage};
use crate::value::OpaqueValue;

/// Marker bounds for a configuration value type.
pub trait ConfigData: Clone + fmt::Debug + Send + Sync + 'static {}

impl<C: Clone + fmt::Debug + Send + Sync + 'static> ConfigData for C {}

/// How a configuration slot is scoped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigScope {
    /// One value shared by every instance of the owning type.
    Shared,
    /// A shared fallback value that individual instances may override.
    PerInstance,
}

type Validator<C> = Arc<dyn Fn(&C) -> Result<(), ConfigError> + Send + Sync>;

/// Declaration of one named configuration slot.
///
/// Built fluently, then collected into [`ConfigDecls`]:
///
/// ```rust
/// use trellis_slot::ConfigDecl;
///
/// let mode = ConfigDecl::<&'static str>::new("mode")
///     .allowed(["slow", "safe"])
///     .default("safe")
///     .doc("acquisition mode");
/// assert!(mode.validate(&"slow").is_ok());
/// assert!(mode.validate(&"fast").is_err());
/// ```
pub struct ConfigDecl<C> {
    name: &'static str,
    scope: ConfigScope,
    doc: &'static str,
    default: Option<C>,
    validators: Vec<Validator<C>>,
    constraints: Vec<String>,
}

impl<C: ConfigData> ConfigDecl<C> {
    /// Starts a declaration for the slot `name`, shared-scope by default.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            scope: ConfigScope::Shared,
            doc: "",
            default: None,
            validators: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Makes the slot overridable per instance.
    #[must_use]
    pub fn per_instance(mut self) -> Self {
        self.scope = ConfigScope::PerInstance;
        self
    }

    /// Restricts the slot to the given values.
    #[must_use]
    pub fn allowed(mut self, values: impl IntoIterator<Item = C>) -> Self
    where
        C: PartialEq,
    {
        let values: Vec<C> = values.into_iter().collect();
        let name = self.name;
        self.constraints.push(format!("{values:?}"));
        self.validators.push(Arc::new(move |candidate| {
            if values.contains(candidate) {
                Ok(())
            } else {
                Err(ConfigError::NotAllowed {
                    name,
                    value: format!("{candidate:?}"),
                    allowed: format!("{values:?}"),
                })
            }
        }));
        self
    }

    /// Adds a check predicate.
    ///
    /// `Ok(false)` rejects the value; an `Err` from the predicate itself is
    /// reported as a validation failure carrying the original error.
    #[must_use]
    pub fn check(
        mut self,
        predicate: impl Fn(&C) -> Result<bool, DynError> + Send + Sync + 'static,
    ) -> Self {
        let name = self.name;
        self.constraints.push(String::from("check function"));
        self.validators.push(Arc::new(move |candidate| {
            match predicate(candidate) {
                Ok(true) => Ok(()),
                Ok(false) => Err(ConfigError::Rejected { name }),
                Err(source) => Err(ConfigError::CheckFailed { name, source }),
            }
        }));
        self
    }

    /// Sets the default value.
    ///
    /// A slot without a default must be given a value at construction.
    #[must_use]
    pub fn default(mut self, value: C) -> Self {
        self.default = Some(value);
        self
    }

    /// Attaches documentation text.
    #[must_use]
    pub fn doc(mut self, doc: &'static str) -> Self {
        self.doc = doc;
        self
    }

    /// Returns the slot name.
    #[must_use]
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runs every declared validator against `value`.
    pub fn validate(&self, value: &C) -> Result<(), ConfigError> {
        for validator in &self.validators {
            validator(value)?;
        }
        Ok(())
    }
}

impl<C: ConfigData> fmt::Debug for ConfigDecl<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigDecl")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("default", &self.default)
            .field("validators", &self.validators.len())
            .finish()
    }
}

trait ErasedDecl: Send + Sync {
    fn name(&self) -> &'static str;
    fn scope(&self) -> ConfigScope;
    fn default_value(&self) -> Option<OpaqueValue>;
    fn validate_erased(&self, slot: &SlotName, value: &OpaqueValue) -> Result<(), ConfigError>;
    fn describe(&self) -> String;
    fn as_any(&self) -> &dyn Any;
}

impl<C: ConfigData> ErasedDecl for ConfigDecl<C> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn scope(&self) -> ConfigScope {
        self.scope
    }

    fn default_value(&self) -> Option<OpaqueValue> {
        self.default.clone().map(OpaqueValue::new)
    }

    fn validate_erased(&self, slot: &SlotName, value: &OpaqueValue) -> Result<(), ConfigError> {
        let Some(value) = value.downcast_ref::<C>() else {
            panic!(
                "configuration '{}' of {slot} expects {}, got {}",
                self.name,
                std::any::type_name::<C>(),
                value.type_name(),
            );
        };
        self.validate(value)
    }

    fn describe(&self) -> String {
        let mut line = String::from(self.name);
        if !self.constraints.is_empty() {
            line.push_str(" : ");
            line.push_str(&self.constraints.join(" and "));
        }
        if let Some(default) = &self.default {
            line.push_str(&format!(" (default={default:?})"));
        }
        if !self.doc.is_empty() {
            line.push_str("\n    ");
            line.push_str(self.doc);
        }
        line
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The set of configuration slots a layer declares.
#[derive(Default)]
pub struct ConfigDecls {
    decls: Vec<Arc<dyn ErasedDecl>>,
}

impl ConfigDecls {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a declaration.
    ///
    /// # Panics
    ///
    /// Panics if a slot with the same name is already declared.
    #[must_use]
    pub fn declare<C: ConfigData>(mut self, decl: ConfigDecl<C>) -> Self {
        assert!(
            self.decls.iter().all(|d| d.name() != decl.name()),
            "configuration '{}' is already declared",
            decl.name(),
        );
        self.decls.push(Arc::new(decl));
        self
    }
}

impl fmt::Debug for ConfigDecls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.decls.iter().map(|d| d.name()))
            .finish()
    }
}

/// Configuration values supplied when a layer is constructed.
#[derive(Default)]
pub struct ConfigValues {
    values: Vec<(&'static str, OpaqueValue)>,
}

impl ConfigValues {
    /// Creates an empty value set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies a value for the named slot.
    #[must_use]
    pub fn set<C: ConfigData>(mut self, name: &'static str, value: C) -> Self {
        self.values.push((name, OpaqueValue::new(value)));
        self
    }
}

impl fmt::Debug for ConfigValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.values.iter().map(|(name, _)| name))
            .finish()
    }
}

/// The per-instance storage shape of the configuration namespace.
pub type ConfigArea = HashMap<SlotName, HashMap<&'static str, OpaqueValue>>;

/// A hook observing every configuration write.
pub type OnConfigSet = Arc<dyn Fn(&'static str, &OpaqueValue) + Send + Sync>;

/// A layer's resolved configuration store.
///
/// Holds the declarations, the shared values, and the namespace handle
/// through which instance overrides are kept. Reads never observe an
/// unset slot: construction fails unless every slot resolves.
pub struct InstanceConfig {
    slot: SlotName,
    ns: Namespace<ConfigArea>,
    decls: Vec<Arc<dyn ErasedDecl>>,
    shared: RwLock<HashMap<&'static str, OpaqueValue>>,
    on_set: Option<OnConfigSet>,
}

impl InstanceConfig {
    /// Resolves declarations against supplied values.
    ///
    /// # Panics
    ///
    /// Panics if a supplied name is not declared, if a supplied value fails
    /// validation, or if any slot is left with neither a default nor a
    /// supplied value (all missing names are listed together).
    #[must_use]
    pub fn new(
        slot: SlotName,
        ns: Namespace<ConfigArea>,
        decls: ConfigDecls,
        supplied: ConfigValues,
    ) -> Self {
        let decls = decls.decls;
        let mut shared: HashMap<&'static str, OpaqueValue> = HashMap::new();

        for (name, value) in supplied.values {
            let Some(decl) = decls.iter().find(|d| d.name() == name) else {
                panic!("{slot} got an unexpected configuration '{name}'");
            };
            if let Err(err) = decl.validate_erased(&slot, &value) {
                panic!("invalid configuration for {slot}: {err}");
            }
            shared.insert(name, value);
        }

        for decl in &decls {
            if !shared.contains_key(decl.name())
                && let Some(default) = decl.default_value()
            {
                shared.insert(decl.name(), default);
            }
        }

        let missing: Vec<_> = decls
            .iter()
            .map(|d| d.name())
            .filter(|name| !shared.contains_key(*name))
            .collect();
        assert!(
            missing.is_empty(),
            "{slot} is missing {} configuration value(s): {}",
            missing.len(),
            missing.join(", "),
        );

        Self {
            slot,
            ns,
            decls,
            shared: RwLock::new(shared),
            on_set: None,
        }
    }

    /// Attaches a hook observing every configuration write.
    #[must_use]
    pub fn with_on_set(mut self, hook: OnConfigSet) -> Self {
        self.on_set = Some(hook);
        self
    }

    /// Returns the slot this configuration belongs to.
    #[must_use]
    #[inline]
    pub fn slot(&self) -> &SlotName {
        &self.slot
    }

    fn decl(&self, name: &str) -> &Arc<dyn ErasedDecl> {
        self.decls
            .iter()
            .find(|d| d.name() == name)
            .unwrap_or_else(|| panic!("{} has no configuration '{name}'", self.slot))
    }

    fn typed_decl<C: ConfigData>(&self, name: &str) -> &ConfigDecl<C> {
        self.decl(name)
            .as_any()
            .downcast_ref()
            .unwrap_or_else(|| {
                panic!(
                    "configuration '{name}' of {} was declared with a different type",
                    self.slot,
                )
            })
    }

    /// Returns the shared (class-level) value of a slot.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not declared or was declared with another type.
    #[must_use]
    pub fn get_shared<C: ConfigData>(&self, name: &str) -> C {
        let _ = self.typed_decl::<C>(name);
        self.shared.read()[name]
            .extract()
            .expect("shared configuration value type diverged from its declaration")
    }

    /// Returns the value of a slot as seen by `owner`.
    ///
    /// Per-instance slots fall back from the instance override to the
    /// shared value; shared slots always resolve to the shared value.
    #[must_use]
    pub fn get_for<O: Storage, C: ConfigData>(&self, owner: &O, name: &str) -> C {
        let decl = self.decl(name);
        if decl.scope() == ConfigScope::PerInstance {
            let slot = &self.slot;
            let existing = self.ns.with(owner.storage(), |area| {
                area.get(slot).and_then(|overrides| {
                    overrides.get(name).map(|value| {
                        value
                            .extract::<C>()
                            .expect("configuration override type diverged from its declaration")
                    })
                })
            });
            if let Some(value) = existing {
                return value;
            }
        }
        self.get_shared(name)
    }

    /// Writes the shared (class-level) value of a slot.
    pub fn set_shared<C: ConfigData>(&self, name: &'static str, value: C) -> Result<(), ConfigError> {
        self.typed_decl::<C>(name).validate(&value)?;
        let value = OpaqueValue::new(value);
        if let Some(hook) = &self.on_set {
            hook(name, &value);
        }
        self.shared.write().insert(name, value);
        Ok(())
    }

    /// Writes a slot's value for one instance.
    ///
    /// Per-instance slots store the override in `owner`'s storage only;
    /// for a shared slot this is the same as [`InstanceConfig::set_shared`].
    pub fn set_for<O: Storage, C: ConfigData>(
        &self,
        owner: &O,
        name: &'static str,
        value: C,
    ) -> Result<(), ConfigError> {
        let decl = self.decl(name);
        if decl.scope() != ConfigScope::PerInstance {
            return self.set_shared(name, value);
        }

        self.typed_decl::<C>(name).validate(&value)?;
        let value = OpaqueValue::new(value);
        if let Some(hook) = &self.on_set {
            hook(name, &value);
        }
        let slot = self.slot.clone();
        self.ns.with(owner.storage(), move |area| {
            area.entry(slot).or_default().insert(name, value);
        });
        Ok(())
    }

    /// Clears an instance override, if any.
    ///
    /// Clearing a slot that was never overridden is a no-op.
    pub fn clear_for<O: Storage>(&self, owner: &O, name: &'static str) {
        let slot = &self.slot;
        self.ns.with(owner.storage(), |area| {
            if let Some(overrides) = area.get_mut(slot) {
                overrides.remove(name);
            }
        });
    }

    /// Iterates (name, resolved value) pairs as seen by `owner`.
    #[must_use]
    pub fn iter_for<O: Storage>(&self, owner: &O) -> Vec<(&'static str, OpaqueValue)> {
        self.decls
            .iter()
            .map(|decl| {
                let name = decl.name();
                let value = if decl.scope() == ConfigScope::PerInstance {
                    let slot = &self.slot;
                    self.ns
                        .with(owner.storage(), |area| {
                            area.get(slot).and_then(|overrides| overrides.get(name).cloned())
                        })
                        .unwrap_or_else(|| self.shared.read()[name].clone())
                } else {
                    self.shared.read()[name].clone()
                };
                (name, value)
            })
            .collect()
    }

    /// Renders the declared slots, their constraints, defaults and docs.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for decl in &self.decls {
            out.push_str(&decl.describe());
            out.push('\n');
        }
        out
    }
}

impl fmt::Debug for InstanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceConfig")
            .field("slot", &self.slot)
            .field("decls", &self.decls.iter().map(|d| d.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InstanceStorage;

    struct TestFamily;

    struct Owner {
        storage: InstanceStorage,
    }

    impl Owner {
        fn new() -> Self {
            Self {
                storage: InstanceStorage::new(),
            }
        }
    }

    impl Storage for Owner {
        fn storage(&self) -> &InstanceStorage {
            &self.storage
        }
    }

    fn config_ns() -> Namespace<ConfigArea> {
        Namespace::register::<TestFamily>("test_iconfig")
    }

    fn retries_decl() -> ConfigDecls {
        ConfigDecls::new().declare(
            ConfigDecl::<u32>::new("retries")
                .per_instance()
                .check(|v| Ok(*v <= 5))
                .default(1),
        )
    }

    #[test]
    fn default_resolves_before_any_write() {
        let config = InstanceConfig::new(
            SlotName::new("s"),
            config_ns(),
            retries_decl(),
            ConfigValues::new(),
        );
        assert_eq!(config.get_shared::<u32>("retries"), 1);

        let owner = Owner::new();
        assert_eq!(config.get_for::<_, u32>(&owner, "retries"), 1);
    }

    #[test]
    fn supplied_value_overrides_default() {
        let config = InstanceConfig::new(
            SlotName::new("s"),
            config_ns(),
            retries_decl(),
            ConfigValues::new().set("retries", 4_u32),
        );
        assert_eq!(config.get_shared::<u32>("retries"), 4);
    }

    #[test]
    fn instance_override_is_invisible_elsewhere() {
        let config = InstanceConfig::new(
            SlotName::new("s"),
            config_ns(),
            retries_decl(),
            ConfigValues::new(),
        );
        let first = Owner::new();
        let second = Owner::new();

        config.set_for(&first, "retries", 3_u32).unwrap();

        assert_eq!(config.get_for::<_, u32>(&first, "retries"), 3);
        assert_eq!(config.get_for::<_, u32>(&second, "retries"), 1);
        assert_eq!(config.get_shared::<u32>("retries"), 1);
    }

    #[test]
    fn shared_write_is_the_fallback_for_everyone() {
        let config = InstanceConfig::new(
            SlotName::new("s"),
            config_ns(),
            retries_decl(),
            ConfigValues::new(),
        );
        let overridden = Owner::new();
        let plain = Owner::new();
        config.set_for(&overridden, "retries", 5_u32).unwrap();

        config.set_shared("retries", 2_u32).unwrap();

        assert_eq!(config.get_for::<_, u32>(&plain, "retries"), 2);
        assert_eq!(config.get_for::<_, u32>(&overridden, "retries"), 5);
    }

    #[test]
    fn clear_for_restores_the_fallback() {
        let config = InstanceConfig::new(
            SlotName::new("s"),
            config_ns(),
            retries_decl(),
            ConfigValues::new(),
        );
        let owner = Owner::new();

        config.set_for(&owner, "retries", 3_u32).unwrap();
        config.clear_for(&owner, "retries");
        assert_eq!(config.get_for::<_, u32>(&owner, "retries"), 1);

        // Clearing again is a no-op.
        config.clear_for(&owner, "retries");
    }

    #[test]
    fn allowed_set_rejects_outsiders() {
        let decls = ConfigDecls::new().declare(
            ConfigDecl::<&'static str>::new("mode")
                .allowed(["slow", "safe"])
                .default("safe"),
        );
        let config = InstanceConfig::new(
            SlotName::new("s"),
            config_ns(),
            decls,
            ConfigValues::new(),
        );

        assert!(config.set_shared("mode", "slow").is_ok());
        let err = config.set_shared("mode", "fast").unwrap_err();
        assert!(matches!(err, ConfigError::NotAllowed { name: "mode", .. }));
        assert_eq!(config.get_shared::<&'static str>("mode"), "slow");
    }

    #[test]
    fn check_rejection_and_check_failure_are_distinct() {
        let decls = ConfigDecls::new().declare(
            ConfigDecl::<f64>::new("gain")
                .check(|v| {
                    if v.is_nan() {
                        Err("NaN gain".into())
                    } else {
                        Ok(*v > 0.0)
                    }
                })
                .default(1.0),
        );
        let config = InstanceConfig::new(
            SlotName::new("s"),
            config_ns(),
            decls,
            ConfigValues::new(),
        );

        assert!(matches!(
            config.set_shared("gain", -1.0).unwrap_err(),
            ConfigError::Rejected { name: "gain" }
        ));
        assert!(matches!(
            config.set_shared("gain", f64::NAN).unwrap_err(),
            ConfigError::CheckFailed { name: "gain", .. }
        ));
    }

    #[test]
    #[should_panic(expected = "unexpected configuration")]
    fn unknown_supplied_name_panics() {
        let _ = InstanceConfig::new(
            SlotName::new("s"),
            config_ns(),
            retries_decl(),
            ConfigValues::new().set("retrys", 1_u32),
        );
    }

    #[test]
    #[should_panic(expected = "missing 2 configuration value(s): alpha, beta")]
    fn missing_required_values_are_listed_together() {
        let decls = ConfigDecls::new()
            .declare(ConfigDecl::<u32>::new("alpha"))
            .declare(ConfigDecl::<u32>::new("beta"))
            .declare(ConfigDecl::<u32>::new("gamma").default(0));
        let _ = InstanceConfig::new(
            SlotName::new("s"),
            config_ns(),
            decls,
            ConfigValues::new(),
        );
    }

    #[test]
    #[should_panic(expected = "invalid configuration")]
    fn supplied_value_failing_validation_panics() {
        let _ = InstanceConfig::new(
            SlotName::new("s"),
            config_ns(),
            retries_decl(),
            ConfigValues::new().set("retries", 9_u32),
        );
    }

    #[test]
    fn on_set_hook_sees_every_write() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let config = InstanceConfig::new(
            SlotName::new("s"),
            config_ns(),
            retries_decl(),
            ConfigValues::new(),
        )
        .with_on_set(Arc::new(move |name, _value| sink.lock().push(name)));

        let owner = Owner::new();
        config.set_shared("retries", 2_u32).unwrap();
        config.set_for(&owner, "retries", 3_u32).unwrap();

        assert_eq!(*seen.lock(), ["retries", "retries"]);
    }

    #[test]
    fn iter_resolves_per_owner() {
        let config = InstanceConfig::new(
            SlotName::new("s"),
            config_ns(),
            retries_decl(),
            ConfigValues::new(),
        );
        let owner = Owner::new();
        config.set_for(&owner, "retries", 3_u32).unwrap();

        let resolved = config.iter_for(&owner);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0, "retries");
        assert_eq!(resolved[0].1.extract::<u32>(), Some(3));
    }

    #[test]
    fn describe_renders_constraints_and_docs() {
        let decls = ConfigDecls::new().declare(
            ConfigDecl::<u32>::new("retries")
                .check(|v| Ok(*v <= 5))
                .default(1)
                .doc("attempts before giving up"),
        );
        let config = InstanceConfig::new(
            SlotName::new("s"),
            config_ns(),
            decls,
            ConfigValues::new(),
        );

        let text = config.describe();
        assert!(text.contains("retries"));
        assert!(text.contains("check function"));
        assert!(text.contains("default=1"));
        assert!(text.contains("attempts before giving up"));
    }
}
