//! Concurrency tests for the registry's lock discipline.
//!
//! Admission requests and watcher events hit the same registry from many
//! threads; these tests check the reserve decision stays atomic.

use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tiergate_core::{Delta, Tier, WorkloadKey};
use tiergate_registry::{Decision, WorkloadPolicy, WorkloadRegistry};

fn shared_registry() -> Arc<WorkloadRegistry> {
    Arc::new(WorkloadRegistry::new(Duration::from_secs(300)))
}

fn race_reservations(registry: &Arc<WorkloadRegistry>, key: &WorkloadKey, n: usize) -> Vec<Decision> {
    let barrier = Arc::new(Barrier::new(n));
    let handles: Vec<_> = (0..n)
        .map(|_| {
            let registry = Arc::clone(registry);
            let barrier = Arc::clone(&barrier);
            let key = key.clone();
            thread::spawn(move || {
                barrier.wait();
                registry.decide_and_reserve(&key)
            })
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn exactly_one_guaranteed_under_contention() {
    let registry = shared_registry();
    let key = WorkloadKey::new("ns1", "svc");
    registry.register(&key, WorkloadPolicy::new(1, Some(32), true));

    let decisions = race_reservations(&registry, &key, 32);

    let guaranteed = decisions
        .iter()
        .filter(|d| **d == Decision::Reserved(Tier::Guaranteed))
        .count();
    let preemptible = decisions
        .iter()
        .filter(|d| **d == Decision::Reserved(Tier::Preemptible))
        .count();
    assert_eq!(guaranteed, 1);
    assert_eq!(preemptible, 31);

    let state = registry.snapshot(&key).unwrap();
    assert_eq!(state.guaranteed_count, 1);
    assert_eq!(state.preemptible_count, 31);
}

#[test]
fn cap_holds_with_interleaved_watcher_events() {
    let registry = shared_registry();
    let key = WorkloadKey::new("ns1", "svc");
    registry.register(&key, WorkloadPolicy::new(4, None, true));

    let barrier = Arc::new(Barrier::new(2));

    let admissions = {
        let registry = Arc::clone(&registry);
        let barrier = Arc::clone(&barrier);
        let key = key.clone();
        thread::spawn(move || {
            barrier.wait();
            (0..64).map(|_| registry.decide_and_reserve(&key)).collect::<Vec<_>>()
        })
    };

    // Preemptible churn from the watcher never touches the guaranteed cap.
    let watcher = {
        let registry = Arc::clone(&registry);
        let barrier = Arc::clone(&barrier);
        let key = key.clone();
        thread::spawn(move || {
            barrier.wait();
            for _ in 0..64 {
                registry.adjust_count(&key, Tier::Preemptible, Delta::Increment);
                registry.adjust_count(&key, Tier::Preemptible, Delta::Decrement);
            }
        })
    };

    let decisions = admissions.join().unwrap();
    watcher.join().unwrap();

    let guaranteed = decisions.iter().filter(|d| d.tier() == Tier::Guaranteed).count();
    assert_eq!(guaranteed, 4);
    assert_eq!(registry.snapshot(&key).unwrap().guaranteed_count, 4);
}

#[test]
fn independent_registries_do_not_share_state() {
    let a = shared_registry();
    let b = shared_registry();
    let key = WorkloadKey::new("ns1", "svc");
    a.register(&key, WorkloadPolicy::new(1, None, true));

    assert_eq!(b.decide_and_reserve(&key), Decision::Unmanaged);
    assert_eq!(a.decide_and_reserve(&key), Decision::Reserved(Tier::Guaranteed));
}

#[test]
fn keys_are_isolated_under_contention() {
    let registry = shared_registry();
    let keys: Vec<WorkloadKey> = (0..4).map(|i| WorkloadKey::new("ns1", format!("svc-{i}"))).collect();
    for key in &keys {
        registry.register(key, WorkloadPolicy::new(2, None, true));
    }

    let barrier = Arc::new(Barrier::new(keys.len() * 8));
    let handles: Vec<_> = keys
        .iter()
        .flat_map(|key| std::iter::repeat(key.clone()).take(8))
        .map(|key| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (key.clone(), registry.decide_and_reserve(&key))
            })
        })
        .collect();

    let mut guaranteed_per_key: HashMap<WorkloadKey, usize> = HashMap::new();
    for handle in handles {
        let (key, decision) = handle.join().unwrap();
        if decision == Decision::Reserved(Tier::Guaranteed) {
            *guaranteed_per_key.entry(key).or_default() += 1;
        }
    }

    for key in &keys {
        assert_eq!(guaranteed_per_key.get(key), Some(&2), "{key}");
    }
}
