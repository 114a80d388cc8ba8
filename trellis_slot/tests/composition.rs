// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cross-layer composition tests for the `trellis_slot` crate.
//!
//! Each unit test module covers one layer; the scenarios here exercise
//! chains the way consuming code builds them, with several layers composed
//! on one owning type, and pin the interaction contracts: cache sharing
//! between layers, per-instance isolation, notification ordering, and the
//! statistics a composed chain records.

use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use trellis_slot::{
    ActionBuilder, Change, InstanceStorage, Level, Lockable, Logs, MultiSlot, Raw, SlotBuilder,
    SlotError, SlotKey, Spawns, Storage, Transform, Watchers, Worker,
};

/// An instrument front-end carrying every capability the chain layers use.
struct Instrument {
    storage: InstanceStorage,
    lock: ReentrantMutex<()>,
    worker: std::sync::OnceLock<Worker>,
    volts: Mutex<f64>,
    gets: Mutex<u32>,
    sets: Mutex<u32>,
    records: Mutex<Vec<(Level, String)>>,
}

impl Instrument {
    fn new() -> Self {
        Self {
            storage: InstanceStorage::new(),
            lock: ReentrantMutex::new(()),
            worker: std::sync::OnceLock::new(),
            volts: Mutex::new(0.0),
            gets: Mutex::new(0),
            sets: Mutex::new(0),
            records: Mutex::new(Vec::new()),
        }
    }

    fn messages(&self) -> Vec<String> {
        self.records.lock().iter().map(|(_, m)| m.clone()).collect()
    }
}

impl Storage for Instrument {
    fn storage(&self) -> &InstanceStorage {
        &self.storage
    }
}

impl Logs for Instrument {
    fn log(&self, level: Level, message: std::fmt::Arguments<'_>) {
        self.records.lock().push((level, message.to_string()));
    }
}

impl Lockable for Instrument {
    fn lock(&self) -> &ReentrantMutex<()> {
        &self.lock
    }
}

impl Spawns for Instrument {
    fn worker(&self) -> &Worker {
        self.worker.get_or_init(Worker::new)
    }
}

fn voltage_builder(name: &'static str) -> SlotBuilder<Instrument, f64, Raw<Instrument, f64>> {
    SlotBuilder::new(name)
        .getter(|i: &Instrument| {
            *i.gets.lock() += 1;
            Ok(*i.volts.lock())
        })
        .setter(|i: &Instrument, v| {
            *i.sets.lock() += 1;
            *i.volts.lock() = v;
            Ok(())
        })
}

#[test]
fn round_trip_with_stats_logging_and_locking() {
    let voltage = voltage_builder("voltage").timed().logged().locked().build();
    let instrument = Instrument::new();

    voltage.set(&instrument, 1.5).unwrap();
    assert_eq!(voltage.get(&instrument).unwrap(), 1.5);

    assert_eq!(voltage.stats(&instrument, "set").count, 1);
    assert_eq!(voltage.stats(&instrument, "get").count, 1);
    assert_eq!(voltage.stats(&instrument, "failed_set").count, 0);
    assert_eq!(voltage.stats(&instrument, "failed_get").count, 0);

    let messages = instrument.messages();
    assert!(messages.contains(&String::from("getting voltage")));
    assert!(messages.contains(&String::from("voltage was set to 1.5")));
}

#[test]
fn statistics_split_successes_and_failures_per_instance() {
    let flaky = SlotBuilder::<Instrument, f64, _>::new("flaky")
        .getter(|i: &Instrument| {
            let mut gets = i.gets.lock();
            *gets += 1;
            if *gets % 2 == 0 {
                Err("glitch".into())
            } else {
                Ok(*i.volts.lock())
            }
        })
        .timed()
        .build();
    let first = Instrument::new();
    let second = Instrument::new();

    for _ in 0..5 {
        let _ = flaky.get(&first);
    }

    assert_eq!(flaky.stats(&first, "get").count, 3);
    assert_eq!(flaky.stats(&first, "failed_get").count, 2);
    // A fresh instance starts at zero regardless of the first's history.
    assert_eq!(flaky.stats(&second, "get").count, 0);
    assert_eq!(flaky.stats(&second, "failed_get").count, 0);
}

#[test]
fn read_once_idempotence_depends_on_the_flag() {
    let voltage = voltage_builder("ronce_flag").cached_on_get().read_once(true).build();
    let instrument = Instrument::new();
    *instrument.volts.lock() = 1.0;

    assert_eq!(voltage.get(&instrument).unwrap(), 1.0);
    *instrument.volts.lock() = 2.0;
    // Enabled: the second get answers from the cache without the getter.
    assert_eq!(voltage.get(&instrument).unwrap(), 1.0);
    assert_eq!(*instrument.gets.lock(), 1);

    // Disabled: the getter runs again and the cache refreshes.
    voltage.read_once().unwrap().read_once_iset(&instrument, false).unwrap();
    assert_eq!(voltage.get(&instrument).unwrap(), 2.0);
    assert_eq!(*instrument.gets.lock(), 2);
    assert_eq!(voltage.recall(&instrument), Some(2.0));
}

#[test]
fn prevent_unnecessary_set_skips_equal_values_only() {
    let voltage = voltage_builder("prevent").prevent_unnecessary_set().logged().build();
    let instrument = Instrument::new();

    voltage.set(&instrument, 1.0).unwrap();
    voltage.set(&instrument, 1.0).unwrap();
    assert_eq!(*instrument.sets.lock(), 1);

    voltage.set(&instrument, 2.0).unwrap();
    assert_eq!(*instrument.sets.lock(), 2);
    assert_eq!(voltage.recall(&instrument), Some(2.0));

    // force_set always reaches the setter, equal cache or not.
    voltage.force_set(&instrument, 2.0).unwrap();
    assert_eq!(*instrument.sets.lock(), 3);
}

#[test]
fn change_events_fire_once_per_actual_change() {
    let voltage = voltage_builder("observed").cached_on_set().build();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let watchers = Watchers::new();
    watchers.subscribe(move |change: Change<'_, f64>| {
        sink.lock().push((*change.new, change.old.copied()));
    });
    voltage.cache().unwrap().observe(Arc::new(watchers));

    let instrument = Instrument::new();
    voltage.set(&instrument, 1.0).unwrap();
    voltage.set(&instrument, 1.0).unwrap();
    voltage.set(&instrument, 2.0).unwrap();

    let events = events.lock();
    assert_eq!(*events, [(1.0, None), (2.0, Some(1.0))]);
}

#[test]
fn change_events_see_the_store_already_applied() {
    // Store-then-emit: from inside a subscriber the cache already recalls
    // the new value, while the event still carries the old one.
    let voltage = voltage_builder("ordering").cached_on_set().build();
    let cache = voltage.cache().unwrap().clone();
    let instrument = Arc::new(Instrument::new());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let observer_instrument = Arc::clone(&instrument);
    let watchers = Watchers::new();
    watchers.subscribe(move |change: Change<'_, f64>| {
        let recalled = cache.recall(&*observer_instrument);
        sink.lock().push((recalled, change.old.copied()));
    });
    voltage.cache().unwrap().observe(Arc::new(watchers));

    voltage.set(&*instrument, 1.0).unwrap();
    voltage.set(&*instrument, 2.0).unwrap();

    let seen = seen.lock();
    assert_eq!(*seen, [(Some(1.0), None), (Some(2.0), Some(1.0))]);
}

#[test]
fn transforms_compose_with_caching_and_stats() {
    let voltage = voltage_builder("shaped").transformed().cached_on_set().timed().build();
    let instrument = Instrument::new();

    voltage
        .transforms()
        .unwrap()
        .set_pre_set(Some(Transform::map(|v: f64| v.clamp(0.0, 5.0))))
        .unwrap();

    voltage.set(&instrument, 9.0).unwrap();

    // The transform sits inside the cache layer here, so the cache holds
    // the untransformed value while the hardware saw the clamped one.
    assert_eq!(*instrument.volts.lock(), 5.0);
    assert_eq!(voltage.recall(&instrument), Some(9.0));
    assert_eq!(voltage.stats(&instrument, "set").count, 1);
}

#[test]
fn instance_overrides_do_not_leak_between_instances() {
    let voltage = voltage_builder("pinned").transformed().build();
    let inverted = Instrument::new();
    let plain = Instrument::new();

    voltage
        .transforms()
        .unwrap()
        .pre_set_iset(&inverted, Some(Transform::map(|v: f64| -v)))
        .unwrap();

    voltage.set(&inverted, 3.0).unwrap();
    voltage.set(&plain, 3.0).unwrap();

    assert_eq!(*inverted.volts.lock(), -3.0);
    assert_eq!(*plain.volts.lock(), 3.0);
    // The shared value is still the default.
    assert!(voltage.transforms().unwrap().pre_set().is_none());
}

#[test]
fn full_stack_chain_behaves_end_to_end() {
    let voltage = voltage_builder("full")
        .transformed()
        .cached_on_get_set()
        .prevent_unnecessary_set()
        .timed()
        .logged()
        .locked()
        .build();
    let instrument = Instrument::new();

    voltage.set(&instrument, 1.0).unwrap();
    voltage.set(&instrument, 1.0).unwrap();
    assert_eq!(*instrument.sets.lock(), 1);
    assert_eq!(voltage.get(&instrument).unwrap(), 1.0);

    // The skipped set still went through the timing layer.
    assert_eq!(voltage.stats(&instrument, "set").count, 2);
    assert_eq!(voltage.stats(&instrument, "get").count, 1);
    assert!(
        instrument
            .messages()
            .iter()
            .any(|m| m.contains("no need to set full"))
    );
}

#[test]
fn errors_propagate_through_a_composed_chain_unchanged() {
    let broken = SlotBuilder::<Instrument, f64, _>::new("broken")
        .getter(|_: &Instrument| Err("bus timeout".into()))
        .timed()
        .logged()
        .locked()
        .build();
    let instrument = Instrument::new();

    let err = broken.get(&instrument).unwrap_err();
    assert_eq!(err.to_string(), "bus timeout");
    assert!(matches!(err, SlotError::Raised(_)));

    assert_eq!(broken.stats(&instrument, "failed_get").count, 1);
    assert!(
        instrument
            .messages()
            .iter()
            .any(|m| m.contains("while getting broken: bus timeout"))
    );
}

#[test]
fn multiplexed_mapping_translates_and_rejects() {
    // The declared mapping {'x' -> 1, 2 -> 'y'}: external keys are 'x'
    // and 2; everything else, including the internal keys themselves,
    // is rejected.
    let level: MultiSlot<Instrument, f64, _> = MultiSlot::new("level", |b| b.timed().build())
        .mapping([
            (SlotKey::from("x"), SlotKey::from(1)),
            (SlotKey::from(2), SlotKey::from("y")),
        ])
        .getter(|i: &Instrument, _key| Ok(*i.volts.lock()))
        .setter(|i: &Instrument, key, v| {
            assert_eq!(key, &SlotKey::from(1), "external 'x' stores under internal 1");
            *i.volts.lock() = v;
            Ok(())
        });
    let instrument = Instrument::new();

    level.set_item(&instrument, "x", 3.0).unwrap();
    assert_eq!(*instrument.volts.lock(), 3.0);

    let err = level.set_item(&instrument, 1, 3.0).unwrap_err();
    assert!(matches!(err, SlotError::InvalidKey { .. }));

    // Sub-slot statistics accumulate under the composite internal name.
    assert_eq!(level.get_item(&instrument, "x").unwrap(), 3.0);
    assert_eq!(
        trellis_slot::timing_stats(
            &instrument,
            &trellis_slot::SlotName::keyed("level", 1),
            "get"
        )
        .count,
        1,
    );
}

#[test]
fn actions_compose_and_dispatch_in_the_background() {
    let step = Arc::new(
        ActionBuilder::<Instrument, f64, f64, _>::new("step", |i, delta| {
            let mut volts = i.volts.lock();
            *volts += delta;
            Ok(*volts)
        })
        .timed()
        .logged()
        .locked()
        .build(),
    );
    let instrument = Arc::new(Instrument::new());

    assert_eq!(step.call(&instrument, 1.0).unwrap(), 1.0);

    let handles: Vec<_> = (0..3).map(|_| step.call_async(&instrument, 1.0)).collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
    assert_eq!(results, [2.0, 3.0, 4.0]);

    assert_eq!(step.stats(&instrument, "call").count, 4);
    assert!(
        instrument
            .messages()
            .iter()
            .any(|m| m.contains("calling step with 1.0"))
    );
}
