//! Per-tier cell entry bookkeeping
//!
//! A cell is either absent (unrequested), in flight with a cancellation token, or loaded.
//! Loaded cells keep their raw payload so an unload can recover the entity ids without
//! holding on to the decoded geometry.

use crate::cell::CellId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A loaded cell
#[derive(Debug, Clone)]
pub(crate) enum LoadedCell {
    /// The producer's "no content" sentinel; never refetched
    Empty,
    Buffer(Arc<[u8]>),
}

/// A fetch that has been started and not yet applied
#[derive(Debug)]
pub(crate) struct InFlight {
    pub token: CancellationToken,
    /// Matches completions to the request that produced them
    pub serial: u64,
    pub started: instant::Instant,
}

#[derive(Debug, Default)]
pub(crate) struct TierCache {
    loaded: HashMap<CellId, LoadedCell>,
    in_flight: HashMap<CellId, InFlight>,
}

impl TierCache {
    /// Whether the cell is loaded or being fetched
    pub fn is_known(&self, cell: CellId) -> bool {
        self.loaded.contains_key(&cell) || self.in_flight.contains_key(&cell)
    }

    pub fn is_loaded(&self, cell: CellId) -> bool {
        self.loaded.contains_key(&cell)
    }

    pub fn is_in_flight(&self, cell: CellId) -> bool {
        self.in_flight.contains_key(&cell)
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn loaded_cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.loaded.keys().copied()
    }

    pub fn begin(&mut self, cell: CellId, entry: InFlight) {
        if let Some(previous) = self.in_flight.insert(cell, entry) {
            previous.token.cancel();
        }
    }

    /// Take the in-flight entry for a completion, only if the serial still matches
    pub fn finish(&mut self, cell: CellId, serial: u64) -> Option<InFlight> {
        match self.in_flight.get(&cell) {
            Some(entry) if entry.serial == serial => self.in_flight.remove(&cell),
            _ => None,
        }
    }

    pub fn mark_loaded(&mut self, cell: CellId, loaded: LoadedCell) {
        self.loaded.insert(cell, loaded);
    }

    /// Cancel one in-flight fetch, returning whether there was one
    pub fn cancel(&mut self, cell: CellId) -> bool {
        match self.in_flight.remove(&cell) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn unload(&mut self, cell: CellId) -> Option<LoadedCell> {
        self.loaded.remove(&cell)
    }

    /// Cancel every in-flight fetch outside `used`, returning the cancelled cells
    pub fn cancel_unused(&mut self, used: &HashSet<CellId>) -> Vec<CellId> {
        let stale: Vec<CellId> = self
            .in_flight
            .keys()
            .filter(|cell| !used.contains(cell))
            .copied()
            .collect();
        for cell in &stale {
            self.cancel(*cell);
        }
        stale
    }

    /// Drop every loaded cell outside `used`, returning what was dropped
    pub fn evict_unused(&mut self, used: &HashSet<CellId>) -> Vec<(CellId, LoadedCell)> {
        let stale: Vec<CellId> = self
            .loaded
            .keys()
            .filter(|cell| !used.contains(cell))
            .copied()
            .collect();
        stale
            .into_iter()
            .filter_map(|cell| self.loaded.remove(&cell).map(|loaded| (cell, loaded)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(serial: u64) -> InFlight {
        InFlight {
            token: CancellationToken::new(),
            serial,
            started: instant::Instant::now(),
        }
    }

    #[test]
    fn test_stale_serial_is_ignored() {
        let mut cache = TierCache::default();
        let cell = CellId::new(1 << 60);
        cache.begin(cell, entry(1));
        assert!(cache.finish(cell, 0).is_none());
        assert!(cache.is_in_flight(cell));
        assert!(cache.finish(cell, 1).is_some());
        assert!(!cache.is_known(cell));
    }

    #[test]
    fn test_cancel_unused_fires_tokens() {
        let mut cache = TierCache::default();
        let kept = CellId::new(1 << 60);
        let dropped = CellId::new(3 << 58);
        let first = entry(1);
        let second = entry(2);
        let dropped_token = second.token.clone();
        cache.begin(kept, first);
        cache.begin(dropped, second);

        let used = HashSet::from([kept]);
        assert_eq!(cache.cancel_unused(&used), vec![dropped]);
        assert!(dropped_token.is_cancelled());
        assert_eq!(cache.in_flight_count(), 1);
    }

    #[test]
    fn test_evict_unused() {
        let mut cache = TierCache::default();
        let kept = CellId::new(1 << 60);
        let dropped = CellId::new(3 << 58);
        cache.mark_loaded(kept, LoadedCell::Empty);
        cache.mark_loaded(dropped, LoadedCell::Buffer(Arc::from(vec![0u8; 16])));

        let evicted = cache.evict_unused(&HashSet::from([kept]));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].0, dropped);
        assert!(cache.is_loaded(kept));
        assert_eq!(cache.loaded_count(), 1);
        assert!(cache.unload(kept).is_some());
        assert_eq!(cache.loaded_cells().count(), 0);
    }
}
