//! Workload registry — policy and live tier counts per workload.
//!
//! Counting model: the pod watcher is authoritative. An admission-time
//! reservation bumps the count immediately (so concurrent admissions see
//! it) but is only provisional. When the watcher later observes the pod
//! being created, the reservation is confirmed instead of counted twice.
//! Reservations that are never confirmed (the pod was rejected further
//! down the admission chain) expire after `reservation_ttl`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use tiergate_core::{Delta, Tier, TierCounts, WorkloadKey};

use crate::state::{Decision, WorkloadPolicy, WorkloadState};

/// Outstanding admission-time reservations, oldest first.
#[derive(Debug, Default)]
struct Provisional {
    guaranteed: VecDeque<Instant>,
    preemptible: VecDeque<Instant>,
}

impl Provisional {
    fn queue(&mut self, tier: Tier) -> &mut VecDeque<Instant> {
        match tier {
            Tier::Guaranteed => &mut self.guaranteed,
            Tier::Preemptible => &mut self.preemptible,
        }
    }

    fn counts(&self) -> TierCounts {
        TierCounts {
            guaranteed: self.guaranteed.len() as u32,
            preemptible: self.preemptible.len() as u32,
        }
    }

    fn clear(&mut self) {
        self.guaranteed.clear();
        self.preemptible.clear();
    }
}

#[derive(Debug)]
struct Entry {
    policy: WorkloadPolicy,
    counts: TierCounts,
    provisional: Provisional,
}

impl Entry {
    fn new(policy: WorkloadPolicy, counts: TierCounts) -> Self {
        Self {
            policy,
            counts,
            provisional: Provisional::default(),
        }
    }

    /// Release reservations older than `ttl`.
    fn expire(&mut self, now: Instant, ttl: Duration) {
        for tier in [Tier::Guaranteed, Tier::Preemptible] {
            loop {
                let queue = self.provisional.queue(tier);
                let stale = queue
                    .front()
                    .is_some_and(|reserved_at| now.saturating_duration_since(*reserved_at) >= ttl);
                if !stale {
                    break;
                }
                queue.pop_front();
                self.counts.apply(tier, Delta::Decrement);
            }
        }
    }

    /// Provisional reservations can never exceed the count they are part of.
    fn trim_provisional(&mut self, tier: Tier) {
        let live = self.counts.get(tier) as usize;
        let queue = self.provisional.queue(tier);
        while queue.len() > live {
            queue.pop_front();
        }
    }

    fn snapshot(&self) -> WorkloadState {
        WorkloadState::from_parts(&self.policy, &self.counts, &self.provisional.counts())
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<WorkloadKey, Entry>,
    /// Pod deltas observed for keys that are not registered yet.
    pending: HashMap<WorkloadKey, TierCounts>,
}

impl Inner {
    /// Take the buffered counts for a key about to be registered.
    fn adopt_pending(&mut self, key: &WorkloadKey) -> TierCounts {
        self.pending.remove(key).unwrap_or_default()
    }

    fn buffer(&mut self, key: &WorkloadKey, tier: Tier, delta: Delta) -> TierCounts {
        let counts = self.pending.entry(key.clone()).or_default();
        counts.apply(tier, delta);
        let buffered = *counts;
        if buffered.is_zero() {
            self.pending.remove(key);
        }
        buffered
    }
}

/// Per-workload placement counters behind a single lock.
///
/// Shared as `Arc<WorkloadRegistry>` between the admission gateway and
/// the watchers. Every method takes the lock once, does O(1) work on a
/// single entry (re-list reconciliation excepted), and releases it before
/// logging.
#[derive(Debug)]
pub struct WorkloadRegistry {
    inner: Mutex<Inner>,
    reservation_ttl: Duration,
}

impl WorkloadRegistry {
    /// Create an empty registry.
    pub fn new(reservation_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            reservation_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Counters stay consistent even if a holder panicked mid-update:
        // every mutation is a single saturating step.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace (or create) the entry for `key` with zeroed counters.
    ///
    /// Re-registering a known workload discards its tracked counts. Use
    /// [`update_policy`](Self::update_policy) for update-shaped events. A
    /// first registration adopts pod deltas buffered while the key was
    /// unknown.
    pub fn register(&self, key: &WorkloadKey, policy: WorkloadPolicy) {
        let (replaced, adopted) = {
            let mut inner = self.lock();
            let adopted = inner.adopt_pending(key);
            let replaced = inner
                .entries
                .insert(key.clone(), Entry::new(policy, adopted))
                .is_some();
            (replaced, adopted)
        };

        info!(
            %key,
            max_guaranteed = policy.max_guaranteed,
            replicas = policy.declared_replicas,
            enabled = policy.enabled,
            replaced,
            adopted_guaranteed = adopted.guaranteed,
            adopted_preemptible = adopted.preemptible,
            "workload registered"
        );
    }

    /// Merge a new policy into an existing entry, keeping its counts.
    ///
    /// Creates the entry (as [`register`](Self::register) would) if the
    /// key is unknown. Returns `true` if an entry already existed.
    pub fn update_policy(&self, key: &WorkloadKey, policy: WorkloadPolicy) -> bool {
        let existed = {
            let mut inner = self.lock();
            match inner.entries.get_mut(key) {
                Some(entry) => {
                    entry.policy = policy;
                    true
                }
                None => {
                    let adopted = inner.adopt_pending(key);
                    inner.entries.insert(key.clone(), Entry::new(policy, adopted));
                    false
                }
            }
        };

        if existed {
            debug!(%key, max_guaranteed = policy.max_guaranteed, enabled = policy.enabled, "workload policy updated");
        } else {
            info!(%key, max_guaranteed = policy.max_guaranteed, enabled = policy.enabled, "workload registered from update");
        }
        existed
    }

    /// Remove a workload. Returns `true` if it was registered.
    pub fn deregister(&self, key: &WorkloadKey) -> bool {
        let removed = {
            let mut inner = self.lock();
            inner.pending.remove(key);
            inner.entries.remove(key).is_some()
        };
        if removed {
            info!(%key, "workload deregistered");
        }
        removed
    }

    /// Apply a unit delta to one tier of a workload, clamping at zero.
    ///
    /// Unknown keys never create an entry: the delta is buffered until
    /// the workload registers, and logged at debug level.
    pub fn adjust_count(&self, key: &WorkloadKey, tier: Tier, delta: Delta) {
        let now = Instant::now();
        let applied = {
            let mut inner = self.lock();
            match inner.entries.get_mut(key) {
                Some(entry) => {
                    entry.expire(now, self.reservation_ttl);
                    entry.counts.apply(tier, delta);
                    if delta == Delta::Decrement {
                        entry.trim_provisional(tier);
                    }
                    Ok(entry.counts.get(tier))
                }
                None => Err(inner.buffer(key, tier, delta)),
            }
        };

        match applied {
            Ok(count) => debug!(%key, %tier, ?delta, count, "count adjusted"),
            Err(buffered) => debug!(
                %key,
                %tier,
                ?delta,
                buffered_guaranteed = buffered.guaranteed,
                buffered_preemptible = buffered.preemptible,
                "count adjusted for unregistered workload, buffered"
            ),
        }
    }

    /// Record a pod observed in `tier`.
    ///
    /// Confirms the oldest outstanding reservation for that tier if there
    /// is one; otherwise counts the pod.
    pub fn observe_created(&self, key: &WorkloadKey, tier: Tier) {
        let now = Instant::now();
        let confirmed = {
            let mut inner = self.lock();
            inner.entries.get_mut(key).map(|entry| {
                entry.expire(now, self.reservation_ttl);
                let confirmed = entry.provisional.queue(tier).pop_front().is_some();
                if !confirmed {
                    entry.counts.apply(tier, Delta::Increment);
                }
                confirmed
            })
        };

        match confirmed {
            Some(true) => debug!(%key, %tier, "reservation confirmed by observed pod"),
            Some(false) => debug!(%key, %tier, "observed pod counted"),
            None => self.adjust_count(key, tier, Delta::Increment),
        }
    }

    /// Consistent copy of a workload's policy and counts. `None` means the
    /// workload is unmanaged.
    pub fn snapshot(&self, key: &WorkloadKey) -> Option<WorkloadState> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.entries.get_mut(key).map(|entry| {
            entry.expire(now, self.reservation_ttl);
            entry.snapshot()
        })
    }

    /// Decide a tier and reserve it in one critical section.
    ///
    /// The guaranteed tier is chosen while `guaranteed_count` is below the
    /// cap. Unknown and disabled workloads are not mutated.
    pub fn decide_and_reserve(&self, key: &WorkloadKey) -> Decision {
        let now = Instant::now();
        let (decision, state) = {
            let mut inner = self.lock();
            let Some(entry) = inner.entries.get_mut(key) else {
                return Decision::Unmanaged;
            };
            entry.expire(now, self.reservation_ttl);
            if !entry.policy.enabled {
                (Decision::Exempt, None)
            } else {
                let tier = choose_tier(&entry.policy, &entry.counts);
                entry.counts.apply(tier, Delta::Increment);
                entry.provisional.queue(tier).push_back(now);
                (Decision::Reserved(tier), Some(entry.snapshot()))
            }
        };

        if let Some(state) = state {
            debug!(
                %key,
                tier = %decision.tier(),
                guaranteed = state.guaranteed_count,
                preemptible = state.preemptible_count,
                max_guaranteed = state.max_guaranteed,
                "tier reserved"
            );
        }
        decision
    }

    /// The decision [`decide_and_reserve`](Self::decide_and_reserve) would
    /// make right now, without reserving anything.
    pub fn peek(&self, key: &WorkloadKey) -> Decision {
        let now = Instant::now();
        let mut inner = self.lock();
        let Some(entry) = inner.entries.get_mut(key) else {
            return Decision::Unmanaged;
        };
        entry.expire(now, self.reservation_ttl);
        if !entry.policy.enabled {
            return Decision::Exempt;
        }
        Decision::Reserved(choose_tier(&entry.policy, &entry.counts))
    }

    /// Replace all counts with a census taken from a full pod re-list.
    ///
    /// Outstanding reservations are dropped: pods created after the list
    /// arrive as fresh watch events and are counted then. Census entries
    /// for unregistered workloads become the new pending buffer.
    pub fn reconcile_pods(&self, census: &HashMap<WorkloadKey, TierCounts>) {
        let (drifted, pending) = {
            let mut inner = self.lock();
            let mut drifted = 0usize;
            for (key, entry) in inner.entries.iter_mut() {
                let observed = census.get(key).copied().unwrap_or_default();
                if entry.counts != observed {
                    drifted += 1;
                }
                entry.counts = observed;
                entry.provisional.clear();
            }

            let pending: HashMap<WorkloadKey, TierCounts> = census
                .iter()
                .filter(|(key, counts)| !inner.entries.contains_key(*key) && !counts.is_zero())
                .map(|(key, counts)| (key.clone(), *counts))
                .collect();
            let pending_len = pending.len();
            inner.pending = pending;
            (drifted, pending_len)
        };

        info!(
            workloads = census.len(),
            drifted,
            pending,
            "registry reconciled from pod re-list"
        );
    }

    /// Drop every registered workload not in `live`. Returns how many
    /// entries were removed.
    pub fn retain_workloads(&self, live: &HashSet<WorkloadKey>) -> usize {
        let removed: Vec<WorkloadKey> = {
            let mut inner = self.lock();
            let stale: Vec<WorkloadKey> = inner
                .entries
                .keys()
                .filter(|key| !live.contains(*key))
                .cloned()
                .collect();
            for key in &stale {
                inner.entries.remove(key);
            }
            stale
        };

        for key in &removed {
            info!(%key, "workload no longer present in cluster, deregistered");
        }
        removed.len()
    }

    /// All registered workloads, sorted by key.
    pub fn workloads(&self) -> Vec<(WorkloadKey, WorkloadState)> {
        let now = Instant::now();
        let mut list: Vec<(WorkloadKey, WorkloadState)> = {
            let mut inner = self.lock();
            inner
                .entries
                .iter_mut()
                .map(|(key, entry)| {
                    entry.expire(now, self.reservation_ttl);
                    (key.clone(), entry.snapshot())
                })
                .collect()
        };
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    /// Number of registered workloads.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffered counts for a workload that is not registered yet.
    pub fn pending(&self, key: &WorkloadKey) -> Option<TierCounts> {
        self.lock().pending.get(key).copied()
    }
}

fn choose_tier(policy: &WorkloadPolicy, counts: &TierCounts) -> Tier {
    if counts.guaranteed < policy.max_guaranteed {
        Tier::Guaranteed
    } else {
        Tier::Preemptible
    }
}
