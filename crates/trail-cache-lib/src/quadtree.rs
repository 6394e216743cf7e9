//! Bounds quadtree spatial index for hit testing
//!
//! Values are stored with an axis-aligned bounding rectangle in the projected plane. Each
//! node splits its square at the center; a bound that straddles the center on either axis
//! stays at that node, everything else descends into exactly one child. This keeps every
//! value in a single bucket, so queries never double count.
//!
//! Deletion is keyed by the [`BoundHandle`] returned from [`BoundsQuadtree::insert`]. Handles
//! index into an arena of slots and carry a generation, so a stale handle deletes nothing.

use geo::{Coord, Rect};

/// Bucket size at which a leaf splits, and below which a subtree collapses back
pub const SPLIT_THRESHOLD: usize = 100;

/// Nodes at or below this half-extent never split
pub const MIN_HALF_EXTENT: f64 = 1.0 / 16384.0;

/// Opaque key for a stored bound, returned by insert and consumed by delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot<V> {
    generation: u32,
    entry: Option<(V, Rect<f64>)>,
}

/// Root container for the bounds quadtree
#[derive(Debug)]
pub struct BoundsQuadtree<V> {
    root: QuadtreeNode,
    slots: Vec<Slot<V>>,
    free: Vec<u32>,
}

/// A single node: a bucket of (slot, bound) pairs plus, once split, four owned children
#[derive(Debug)]
struct QuadtreeNode {
    center: Coord<f64>,
    half_extent: f64,
    values: Vec<(u32, Rect<f64>)>,
    /// Children in order (+x,+y), (+x,-y), (-x,+y), (-x,-y)
    children: Option<Box<[QuadtreeNode; 4]>>,
    /// Exact number of values stored in this subtree
    value_count: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<V> BoundsQuadtree<V> {
    /// Create an empty quadtree covering `center ± half_extent`
    ///
    /// Bounds outside that square are still accepted; they just never benefit from splitting.
    pub fn new(center: Coord<f64>, half_extent: f64) -> Self {
        Self {
            root: QuadtreeNode::new(center, half_extent),
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Create an empty quadtree covering the whole projected plane
    pub fn world() -> Self {
        Self::new(
            Coord { x: 0.0, y: 0.0 },
            crate::utils::WORLD_HALF_EXTENT,
        )
    }

    /// Insert a value and return the handle needed to delete it later
    pub fn insert(&mut self, value: V, bound: Rect<f64>) -> BoundHandle {
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some((value, bound));
                BoundHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some((value, bound)),
                });
                BoundHandle {
                    index,
                    generation: 0,
                }
            }
        };

        self.root.insert(handle.index, bound);
        handle
    }

    /// Remove the value stored under `handle`, returning whether anything was removed
    pub fn delete(&mut self, handle: BoundHandle) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            return false;
        };
        if slot.generation != handle.generation {
            return false;
        }
        let Some((_, bound)) = slot.entry.as_ref() else {
            return false;
        };
        let bound = *bound;

        if !self.root.delete(handle.index, &bound) {
            tracing::warn!(index = handle.index, "Live slot missing from quadtree");
            return false;
        }

        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        true
    }

    /// Look up the value and bound stored under `handle`
    pub fn get(&self, handle: BoundHandle) -> Option<(&V, &Rect<f64>)> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref().map(|(value, bound)| (value, bound))
    }

    /// Number of values currently stored
    pub fn len(&self) -> usize {
        self.root.value_count
    }

    pub fn is_empty(&self) -> bool {
        self.root.value_count == 0
    }

    /// Number of nodes in the tree, 1 when the root is a single bucket
    pub fn node_count(&self) -> usize {
        self.root.node_count()
    }

    /// Append every value whose bound intersects `rect`
    pub fn query_rect(&self, rect: Rect<f64>, output: &mut Vec<V>)
    where
        V: Clone,
    {
        let slots = &self.slots;
        self.root.query_rect(&rect, &mut |index| {
            if let Some((value, _)) = &slots[index as usize].entry {
                output.push(value.clone());
            }
        });
    }

    /// Append every value whose bound intersects the circle
    pub fn query_circle(&self, center: Coord<f64>, radius: f64, output: &mut Vec<V>)
    where
        V: Clone,
    {
        let slots = &self.slots;
        self.root.query_circle(center, radius, &mut |index| {
            if let Some((value, _)) = &slots[index as usize].entry {
                output.push(value.clone());
            }
        });
    }
}

impl QuadtreeNode {
    fn new(center: Coord<f64>, half_extent: f64) -> Self {
        Self {
            center,
            half_extent,
            values: Vec::new(),
            children: None,
            value_count: 0,
        }
    }

    /// Whether the bound crosses this node's center on either axis
    #[inline]
    fn straddles(&self, bound: &Rect<f64>) -> bool {
        (bound.min().x <= self.center.x && self.center.x <= bound.max().x)
            || (bound.min().y <= self.center.y && self.center.y <= bound.max().y)
    }

    /// Child holding a non-straddling bound; any corner of it decides
    #[inline]
    fn child_index(&self, bound: &Rect<f64>) -> usize {
        let xi = (bound.min().x <= self.center.x) as usize;
        let yi = (bound.min().y <= self.center.y) as usize;
        (xi << 1) + yi
    }

    /// Subdivide this node into 4 children
    fn subdivide(&mut self) {
        if self.children.is_some() {
            return;
        }

        let quarter = self.half_extent / 2.0;
        let Coord { x, y } = self.center;
        let child = |dx: f64, dy: f64| {
            QuadtreeNode::new(
                Coord {
                    x: x + dx,
                    y: y + dy,
                },
                quarter,
            )
        };

        self.children = Some(Box::new([
            child(quarter, quarter),
            child(quarter, -quarter),
            child(-quarter, quarter),
            child(-quarter, -quarter),
        ]));
    }

    fn insert(&mut self, index: u32, bound: Rect<f64>) {
        self.value_count += 1;

        if self.children.is_some() || self.straddles(&bound) {
            self.place(index, bound);
            return;
        }

        if self.half_extent > MIN_HALF_EXTENT && self.values.len() + 1 >= SPLIT_THRESHOLD {
            self.subdivide();

            // Counts above already include these values, only the children need updating
            let values = std::mem::take(&mut self.values);
            for (existing, existing_bound) in values {
                self.place(existing, existing_bound);
            }
            self.place(index, bound);
        } else {
            self.values.push((index, bound));
        }
    }

    /// Store at this node if straddling, otherwise hand to the owning child
    fn place(&mut self, index: u32, bound: Rect<f64>) {
        if self.straddles(&bound) {
            self.values.push((index, bound));
            return;
        }
        let child = self.child_index(&bound);
        match self.children.as_mut() {
            Some(children) => children[child].insert(index, bound),
            None => self.values.push((index, bound)),
        }
    }

    fn delete(&mut self, index: u32, bound: &Rect<f64>) -> bool {
        let straddles = self.straddles(bound);
        let child = self.child_index(bound);

        let deleted = match self.children.as_mut() {
            Some(children) if !straddles => children[child].delete(index, bound),
            _ => match self.values.iter().position(|(i, _)| *i == index) {
                Some(position) => {
                    self.values.swap_remove(position);
                    true
                }
                None => false,
            },
        };

        if deleted {
            self.value_count -= 1;
        }
        if self.children.is_some() && self.value_count < SPLIT_THRESHOLD {
            self.collapse();
        }
        deleted
    }

    /// Pull every value of the subtree back into this node's bucket
    fn collapse(&mut self) {
        if let Some(children) = self.children.take() {
            let children: [QuadtreeNode; 4] = *children;
            for child in children {
                child.drain_into(&mut self.values);
            }
        }
    }

    fn drain_into(self, output: &mut Vec<(u32, Rect<f64>)>) {
        output.extend(self.values);
        if let Some(children) = self.children {
            let children: [QuadtreeNode; 4] = *children;
            for child in children {
                child.drain_into(output);
            }
        }
    }

    fn node_count(&self) -> usize {
        1 + self
            .children
            .as_ref()
            .map(|children| children.iter().map(QuadtreeNode::node_count).sum())
            .unwrap_or(0)
    }

    fn query_rect(&self, rect: &Rect<f64>, visit: &mut impl FnMut(u32)) {
        for (index, bound) in &self.values {
            if intersects_rect(rect, bound) {
                visit(*index);
            }
        }

        // Children are halves of this node, so test the query against the center only
        if let Some(children) = &self.children {
            let Coord { x: cx, y: cy } = self.center;
            if rect.min().x <= cx {
                if rect.min().y <= cy {
                    children[3].query_rect(rect, visit);
                }
                if rect.max().y > cy {
                    children[2].query_rect(rect, visit);
                }
            }
            if rect.max().x > cx {
                if rect.min().y <= cy {
                    children[1].query_rect(rect, visit);
                }
                if rect.max().y > cy {
                    children[0].query_rect(rect, visit);
                }
            }
        }
    }

    fn query_circle(&self, point: Coord<f64>, radius: f64, visit: &mut impl FnMut(u32)) {
        for (index, bound) in &self.values {
            if intersects_circle(point, radius, bound) {
                visit(*index);
            }
        }

        if let Some(children) = &self.children {
            let Coord { x: cx, y: cy } = self.center;
            if point.x - radius <= cx {
                if point.y - radius <= cy {
                    children[3].query_circle(point, radius, visit);
                }
                if point.y + radius > cy {
                    children[2].query_circle(point, radius, visit);
                }
            }
            if point.x + radius > cx {
                if point.y - radius <= cy {
                    children[1].query_circle(point, radius, visit);
                }
                if point.y + radius > cy {
                    children[0].query_circle(point, radius, visit);
                }
            }
        }
    }
}

/// Separating axis test between two rectangles, touching edges intersect
#[inline]
pub fn intersects_rect(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    !(a.min().x > b.max().x
        || b.min().x > a.max().x
        || a.min().y > b.max().y
        || b.min().y > a.max().y)
}

/// Whether a circle intersects a rectangle
///
/// The rectangle's circumscribed and inscribed disks settle most cases; only the band in
/// between needs the closest-point distance.
#[inline]
pub fn intersects_circle(point: Coord<f64>, radius: f64, bound: &Rect<f64>) -> bool {
    let half_width = bound.width() / 2.0;
    let half_height = bound.height() / 2.0;
    let dx = point.x - (bound.min().x + half_width);
    let dy = point.y - (bound.min().y + half_height);
    let distance2 = dx * dx + dy * dy;

    let outer = radius + (half_width * half_width + half_height * half_height).sqrt();
    if distance2 > outer * outer {
        return false;
    }
    let inner = radius + half_width.min(half_height);
    if distance2 <= inner * inner {
        return true;
    }

    let ex = dx - dx.clamp(-half_width, half_width);
    let ey = dy - dy.clamp(-half_height, half_height);
    ex * ex + ey * ey <= radius * radius
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Rect<f64> {
        Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 })
    }

    fn whole_plane() -> Rect<f64> {
        rect(-10.0, -10.0, 10.0, 10.0)
    }

    fn random_bound(rng: &mut StdRng) -> Rect<f64> {
        let x = rng.gen_range(-1.0..1.0);
        let y = rng.gen_range(-1.0..1.0);
        let w = rng.gen_range(0.0..0.01);
        let h = rng.gen_range(0.0..0.01);
        rect(x, y, x + w, y + h)
    }

    fn sorted(mut values: Vec<usize>) -> Vec<usize> {
        values.sort_unstable();
        values
    }

    #[test]
    fn test_insert_and_query_rect() {
        let mut tree = BoundsQuadtree::world();
        tree.insert(1, rect(0.1, 0.1, 0.2, 0.2));
        tree.insert(2, rect(-0.5, -0.5, -0.4, -0.4));
        tree.insert(3, rect(-0.1, -0.1, 0.1, 0.1));

        let mut found = Vec::new();
        tree.query_rect(rect(0.15, 0.15, 0.5, 0.5), &mut found);
        assert_eq!(found, vec![1]);

        let mut found = Vec::new();
        tree.query_rect(rect(-0.05, -0.05, 0.0, 0.0), &mut found);
        assert_eq!(found, vec![3]);
    }

    #[test]
    fn test_straddling_bound_stays_at_root() {
        let mut tree = BoundsQuadtree::world();
        for i in 0..SPLIT_THRESHOLD * 2 {
            let offset = i as f64 * 0.001;
            tree.insert(i, rect(-0.5, 0.1 + offset, 0.5, 0.1 + offset));
        }
        // Every bound crosses x = 0, so nothing can descend
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.len(), SPLIT_THRESHOLD * 2);
    }

    #[test]
    fn test_split_and_collapse() {
        let mut tree = BoundsQuadtree::world();
        let mut handles = Vec::new();
        for i in 0..150 {
            let x = 0.01 + (i % 15) as f64 * 0.06;
            let y = 0.01 + (i / 15) as f64 * 0.09;
            handles.push(tree.insert(i, rect(x, y, x + 0.001, y + 0.001)));
        }
        assert!(tree.node_count() > 1);
        assert_eq!(tree.len(), 150);

        for handle in handles.drain(..100) {
            assert!(tree.delete(handle));
        }
        assert_eq!(tree.len(), 50);
        assert_eq!(tree.node_count(), 1);

        let mut found = Vec::new();
        tree.query_rect(whole_plane(), &mut found);
        assert_eq!(sorted(found), (100..150).collect::<Vec<_>>());

        // Reinserting after a collapse must not resurrect stale children
        for i in 150..160 {
            handles.push(tree.insert(i, rect(0.5, 0.5, 0.51, 0.51)));
        }
        let mut found = Vec::new();
        tree.query_rect(whole_plane(), &mut found);
        assert_eq!(found.len(), 60);
        assert_eq!(sorted(found), (100..160).collect::<Vec<_>>());
    }

    #[test]
    fn test_delete_absent_handle() {
        let mut tree = BoundsQuadtree::world();
        let handle = tree.insert("a", rect(0.1, 0.1, 0.2, 0.2));
        assert!(tree.delete(handle));
        assert!(!tree.delete(handle));

        // A reused slot must not honor the old handle
        let fresh = tree.insert("b", rect(0.1, 0.1, 0.2, 0.2));
        assert!(!tree.delete(handle));
        assert_eq!(tree.get(fresh).map(|(v, _)| *v), Some("b"));
        assert!(tree.delete(fresh));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_identical_bounds_delete_by_handle() {
        let mut tree = BoundsQuadtree::world();
        let bound = rect(0.3, 0.3, 0.4, 0.4);
        let first = tree.insert(1, bound);
        let _second = tree.insert(2, bound);

        assert!(tree.delete(first));
        let mut found = Vec::new();
        tree.query_rect(bound, &mut found);
        assert_eq!(found, vec![2]);
    }

    #[test]
    fn test_random_insert_delete_matches_live_set() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut tree = BoundsQuadtree::world();
        let mut live: Vec<(usize, BoundHandle)> = Vec::new();

        for step in 0..5_000 {
            if live.is_empty() || rng.gen_bool(0.6) {
                let bound = random_bound(&mut rng);
                live.push((step, tree.insert(step, bound)));
            } else {
                let victim = rng.gen_range(0..live.len());
                let (_, handle) = live.swap_remove(victim);
                assert!(tree.delete(handle));
            }

            if step % 250 == 0 {
                let mut found = Vec::new();
                tree.query_rect(whole_plane(), &mut found);
                let expected = sorted(live.iter().map(|(v, _)| *v).collect());
                assert_eq!(sorted(found), expected);
            }
        }
        assert_eq!(tree.len(), live.len());
    }

    #[test]
    fn test_query_circle_is_exact() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut tree = BoundsQuadtree::world();
        let mut bounds = Vec::new();
        for i in 0..2_000 {
            let bound = random_bound(&mut rng);
            tree.insert(i, bound);
            bounds.push(bound);
        }

        for _ in 0..200 {
            let center = Coord {
                x: rng.gen_range(-1.0..1.0),
                y: rng.gen_range(-1.0..1.0),
            };
            let radius = rng.gen_range(0.0..0.2);

            let mut found = Vec::new();
            tree.query_circle(center, radius, &mut found);

            let expected: Vec<usize> = bounds
                .iter()
                .enumerate()
                .filter(|(_, b)| {
                    let cx = center.x.clamp(b.min().x, b.max().x);
                    let cy = center.y.clamp(b.min().y, b.max().y);
                    let (dx, dy) = (center.x - cx, center.y - cy);
                    dx * dx + dy * dy <= radius * radius
                })
                .map(|(i, _)| i)
                .collect();
            assert_eq!(sorted(found), expected);
        }
    }

    #[test]
    fn test_intersects_circle_cases() {
        let bound = rect(0.0, 0.0, 2.0, 1.0);
        // Inside
        assert!(intersects_circle(Coord { x: 1.0, y: 0.5 }, 0.01, &bound));
        // Near a corner but outside the radius
        assert!(!intersects_circle(Coord { x: 2.5, y: 1.5 }, 0.7, &bound));
        // Near a corner and reaching it
        assert!(intersects_circle(Coord { x: 2.5, y: 1.5 }, 0.75, &bound));
        // Far away
        assert!(!intersects_circle(Coord { x: 10.0, y: 10.0 }, 1.0, &bound));
    }

    #[test]
    fn test_intersects_rect_touching() {
        let a = rect(0.0, 0.0, 1.0, 1.0);
        assert!(intersects_rect(&a, &rect(1.0, 1.0, 2.0, 2.0)));
        assert!(!intersects_rect(&a, &rect(1.01, 0.0, 2.0, 1.0)));
    }
}
