//! Entity store fed by scheduler callbacks
//!
//! Keeps every loaded path and trail, the path to trail back-references, and one bounds
//! quadtree per tier for hit testing. Cells overlap in content, so every entity is
//! reference counted per tier: it enters a tier's index with the first cell that carries it
//! and leaves with the last.

use crate::cell::{CellId, Tier, Viewport};
use crate::config::CacheConfig;
use crate::entities::{CellContent, CellEntities, Path, Trail};
use crate::quadtree::{BoundHandle, BoundsQuadtree};
use crate::scheduler::CellListener;
use crate::utils;
use geo::{Coord, Rect};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

/// Key of an indexed entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    Path(u64),
    Trail(u64),
}

/// Result of a closest-entity probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub key: EntityKey,
    /// Distance in the projected plane
    pub distance: f64,
}

#[derive(Debug)]
struct Indexed {
    handle: BoundHandle,
    refs: usize,
}

#[derive(Debug)]
struct TierIndex {
    tree: BoundsQuadtree<EntityKey>,
    entries: HashMap<EntityKey, Indexed>,
}

impl Default for TierIndex {
    fn default() -> Self {
        Self {
            tree: BoundsQuadtree::world(),
            entries: HashMap::new(),
        }
    }
}

impl TierIndex {
    fn retain(&mut self, key: EntityKey, bound: Rect<f64>) {
        match self.entries.entry(key) {
            Entry::Occupied(mut entry) => entry.get_mut().refs += 1,
            Entry::Vacant(entry) => {
                let handle = self.tree.insert(key, bound);
                entry.insert(Indexed { handle, refs: 1 });
            }
        }
    }

    fn release(&mut self, key: EntityKey) {
        if let Entry::Occupied(mut entry) = self.entries.entry(key) {
            entry.get_mut().refs -= 1;
            if entry.get().refs == 0 {
                let indexed = entry.remove();
                self.tree.delete(indexed.handle);
            }
        }
    }
}

/// Consumer-side state for loaded cells
#[derive(Debug)]
pub struct EntityStore {
    config: CacheConfig,
    paths: HashMap<u64, Arc<Path>>,
    trails: HashMap<u64, Arc<Trail>>,
    paths_to_trails: HashMap<u64, SmallVec<[u64; 2]>>,
    /// Number of loaded cells, over all tiers, carrying each entity
    refs: HashMap<EntityKey, usize>,
    indices: [TierIndex; 3],
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl EntityStore {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Use the tier activation zooms of `config` for [`EntityStore::active_tier`]
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            config,
            paths: HashMap::new(),
            trails: HashMap::new(),
            paths_to_trails: HashMap::new(),
            refs: HashMap::new(),
            indices: Default::default(),
        }
    }

    pub fn get_path(&self, id: u64) -> Option<&Arc<Path>> {
        self.paths.get(&id)
    }

    pub fn get_trail(&self, id: u64) -> Option<&Arc<Trail>> {
        self.trails.get(&id)
    }

    /// Loaded trails that reference a path, in either direction
    pub fn list_trails_on_path(&self, path_id: u64) -> Vec<Arc<Trail>> {
        self.paths_to_trails
            .get(&path_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.trails.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    pub fn trail_count(&self) -> usize {
        self.trails.len()
    }

    /// Entities currently in a tier's index
    pub fn indexed_count(&self, tier: Tier) -> usize {
        self.indices[tier.index()].tree.len()
    }

    /// Finest tier with content at `zoom`, the one to hit test against
    pub fn active_tier(&self, zoom: f64) -> Tier {
        self.config.finest_active(zoom)
    }

    /// Entities whose bound intersects a projected-plane rectangle
    pub fn query_rect(&self, tier: Tier, rect: Rect<f64>) -> Vec<EntityKey> {
        let mut found = Vec::new();
        self.indices[tier.index()].tree.query_rect(rect, &mut found);
        found
    }

    /// Entities whose bound intersects a projected-plane circle
    pub fn query_circle(&self, tier: Tier, center: Coord<f64>, radius: f64) -> Vec<EntityKey> {
        let mut found = Vec::new();
        self.indices[tier.index()]
            .tree
            .query_circle(center, radius, &mut found);
        found
    }

    /// Entities visible in a lat/lng viewport
    pub fn query_viewport(&self, tier: Tier, viewport: &Viewport) -> Vec<EntityKey> {
        let mut found = Vec::new();
        for rect in viewport.rects() {
            self.indices[tier.index()]
                .tree
                .query_rect(utils::project_rect(rect), &mut found);
        }
        found.sort_unstable();
        found.dedup();
        found
    }

    /// Nearest path polyline or trail marker within `radius` of a projected point
    pub fn query_closest(&self, tier: Tier, point: Coord<f64>, radius: f64) -> Option<Hit> {
        self.query_circle(tier, point, radius)
            .into_iter()
            .filter_map(|key| {
                let distance = match key {
                    EntityKey::Path(id) => polyline_distance(point, self.paths.get(&id)?),
                    EntityKey::Trail(id) => {
                        let marker = self.trails.get(&id)?.marker;
                        (point.x - marker.x).hypot(point.y - marker.y)
                    }
                };
                (distance <= radius).then_some(Hit { key, distance })
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    fn acquire(&mut self, key: EntityKey) -> bool {
        let refs = self.refs.entry(key).or_insert(0);
        *refs += 1;
        *refs == 1
    }

    /// Returns true once the last reference is gone
    fn drop_ref(&mut self, key: EntityKey) -> bool {
        match self.refs.entry(key) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() -= 1;
                if *entry.get() == 0 {
                    entry.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    fn forget_trail(&mut self, id: u64) {
        let Some(trail) = self.trails.remove(&id) else {
            return;
        };
        for path_id in trail.path_ids() {
            if let Entry::Occupied(mut entry) = self.paths_to_trails.entry(path_id) {
                entry.get_mut().retain(|trail_id| *trail_id != id);
                if entry.get().is_empty() {
                    entry.remove();
                }
            }
        }
    }
}

impl CellListener for EntityStore {
    fn on_load(&mut self, tier: Tier, cell: CellId, content: &CellContent) {
        #[cfg(feature = "profiling")]
        profiling::scope!("EntityStore::on_load");
        let tiers = indexed_tiers(tier, cell);

        for path in &content.paths {
            let key = EntityKey::Path(path.id);
            if self.acquire(key) {
                self.paths.insert(path.id, path.clone());
            }
            for tier in tiers {
                self.indices[tier.index()].retain(key, path.bound);
            }
        }

        for trail in &content.trails {
            let key = EntityKey::Trail(trail.id);
            if self.acquire(key) {
                self.trails.insert(trail.id, trail.clone());
                for path_id in trail.path_ids() {
                    let trails = self.paths_to_trails.entry(path_id).or_default();
                    if !trails.contains(&trail.id) {
                        trails.push(trail.id);
                    }
                }
            }
            for tier in tiers {
                self.indices[tier.index()].retain(key, trail.bound());
            }
        }

        tracing::trace!(
            %tier,
            %cell,
            paths = self.paths.len(),
            trails = self.trails.len(),
            "Store updated after load"
        );
    }

    fn on_unload(&mut self, tier: Tier, cell: CellId, entities: &CellEntities) {
        let tiers = indexed_tiers(tier, cell);
        for id in &entities.path_ids {
            let key = EntityKey::Path(*id);
            for tier in tiers {
                self.indices[tier.index()].release(key);
            }
            if self.drop_ref(key) {
                self.paths.remove(id);
            }
        }

        for id in &entities.trail_ids {
            let key = EntityKey::Trail(*id);
            for tier in tiers {
                self.indices[tier.index()].release(key);
            }
            if self.drop_ref(key) {
                self.forget_trail(*id);
            }
        }

        tracing::trace!(
            %tier,
            %cell,
            paths = self.paths.len(),
            trails = self.trails.len(),
            "Store updated after unload"
        );
    }
}

/// Tier indices a cell's entities go into; the pin is hit-testable at every zoom
fn indexed_tiers(tier: Tier, cell: CellId) -> &'static [Tier] {
    if cell.is_pin() {
        &Tier::ALL
    } else {
        match tier {
            Tier::Overview => &[Tier::Overview],
            Tier::Coarse => &[Tier::Coarse],
            Tier::Fine => &[Tier::Fine],
        }
    }
}

/// Shortest distance from a point to a path's polyline
fn polyline_distance(point: Coord<f64>, path: &Path) -> f64 {
    let points: Vec<Coord<f64>> = path.points().collect();
    match points.as_slice() {
        [] => f64::INFINITY,
        [only] => (point.x - only.x).hypot(point.y - only.y),
        _ => points
            .windows(2)
            .map(|segment| segment_distance(point, segment[0], segment[1]))
            .fold(f64::INFINITY, f64::min),
    }
}

fn segment_distance(point: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let length2 = dx * dx + dy * dy;
    let t = if length2 > 0.0 {
        (((point.x - a.x) * dx + (point.y - a.y) * dy) / length2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (point.x - (a.x + t * dx)).hypot(point.y - (a.y + t * dy))
}
