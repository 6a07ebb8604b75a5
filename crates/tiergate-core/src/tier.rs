//! Capacity tiers and per-tier counters.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The capacity tier a pod is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Reliable, non-preemptible capacity. Capped per workload.
    Guaranteed,
    /// Interruptible, lower-cost capacity. The default tier.
    Preemptible,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Guaranteed => f.write_str("guaranteed"),
            Tier::Preemptible => f.write_str("preemptible"),
        }
    }
}

/// A unit change applied to a tier counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Increment,
    Decrement,
}

/// Live pod counts for both tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub guaranteed: u32,
    pub preemptible: u32,
}

impl TierCounts {
    pub fn get(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Guaranteed => self.guaranteed,
            Tier::Preemptible => self.preemptible,
        }
    }

    fn slot(&mut self, tier: Tier) -> &mut u32 {
        match tier {
            Tier::Guaranteed => &mut self.guaranteed,
            Tier::Preemptible => &mut self.preemptible,
        }
    }

    /// Apply a delta to one tier. Decrements saturate at zero.
    pub fn apply(&mut self, tier: Tier, delta: Delta) {
        let slot = self.slot(tier);
        *slot = match delta {
            Delta::Increment => slot.saturating_add(1),
            Delta::Decrement => slot.saturating_sub(1),
        };
    }

    pub fn is_zero(&self) -> bool {
        self.guaranteed == 0 && self.preemptible == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrement_saturates_at_zero() {
        let mut counts = TierCounts::default();
        counts.apply(Tier::Guaranteed, Delta::Decrement);
        counts.apply(Tier::Preemptible, Delta::Decrement);
        assert_eq!(counts, TierCounts::default());
    }

    #[test]
    fn apply_touches_only_one_tier() {
        let mut counts = TierCounts::default();
        counts.apply(Tier::Guaranteed, Delta::Increment);
        counts.apply(Tier::Guaranteed, Delta::Increment);
        counts.apply(Tier::Preemptible, Delta::Increment);
        counts.apply(Tier::Guaranteed, Delta::Decrement);

        assert_eq!(counts.get(Tier::Guaranteed), 1);
        assert_eq!(counts.get(Tier::Preemptible), 1);
        assert!(!counts.is_zero());
    }
}
