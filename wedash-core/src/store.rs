//! The unit store: the single shared view of all discovered units.
//!
//! All mutation funnels through here, keyed by identity, so background
//! completions never race each other into a half-updated unit.

use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::unit::{Unit, UnitId, UnitMeta, UnitStatus};

#[derive(Debug)]
pub struct UnitStore {
    units: BTreeMap<UnitId, Unit>,
    next_order: u64,
    /// Consecutive missed scans before a vanished unit is evicted.
    evict_after: u32,
}

impl UnitStore {
    pub fn new(evict_after: u32) -> Self {
        Self {
            units: BTreeMap::new(),
            next_order: 0,
            evict_after: evict_after.max(1),
        }
    }

    /// Fold a fresh candidate set into the store.
    ///
    /// New candidates enter with status Unknown and no pid. Existing units
    /// keep their probe state. Units no longer qualifying accumulate a miss
    /// count and are evicted only after `evict_after` consecutive misses,
    /// absorbing transient filesystem flakiness.
    pub fn reconcile(&mut self, candidates: Vec<UnitMeta>) {
        let mut seen: Vec<UnitId> = Vec::with_capacity(candidates.len());

        for meta in candidates {
            seen.push(meta.identity.clone());
            match self.units.get_mut(&meta.identity) {
                Some(unit) => {
                    unit.missed_scans = 0;
                    // A rename of the descriptor-derived name is the one
                    // mutable piece of metadata worth refreshing.
                    unit.meta.name = meta.name;
                }
                None => {
                    let order = self.next_order;
                    self.next_order += 1;
                    self.units
                        .insert(meta.identity.clone(), Unit::new(meta, order));
                }
            }
        }

        let evict_after = self.evict_after;
        self.units.retain(|id, unit| {
            if seen.iter().any(|s| s == id) {
                true
            } else {
                unit.missed_scans += 1;
                unit.missed_scans < evict_after
            }
        });
    }

    /// Apply a probe result. Last write wins, except that probes racing an
    /// in-flight restart are discarded: the restart completion re-probes.
    pub fn apply_probe(
        &mut self,
        id: &str,
        status: UnitStatus,
        pid: Option<u32>,
        at: SystemTime,
    ) {
        if let Some(unit) = self.units.get_mut(id) {
            if unit.busy {
                return;
            }
            unit.status = status;
            unit.pid = pid;
            unit.last_probe_time = Some(at);
        }
    }

    pub fn set_busy(&mut self, id: &str) {
        if let Some(unit) = self.units.get_mut(id) {
            unit.busy = true;
        }
    }

    /// Clear the busy flag; a timed-out restart degrades the unit to a
    /// transient Failed until the next successful probe.
    pub fn clear_busy(&mut self, id: &str, timed_out: bool) {
        if let Some(unit) = self.units.get_mut(id) {
            unit.busy = false;
            if timed_out {
                unit.status = UnitStatus::Failed;
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Unit> {
        self.units.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    pub fn is_busy(&self, id: &str) -> bool {
        self.units.get(id).map(|u| u.busy).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
