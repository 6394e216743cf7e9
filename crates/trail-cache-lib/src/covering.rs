//! Covering sets: which cells of a level are needed for a lat/lng rectangle

use crate::cell::{CellId, MAX_LEVEL};
use geo::{Coord, Rect};
use std::collections::BTreeSet;

/// Computes the cells of `level` whose union contains a non-wrapping lat/lng rectangle
/// (x = lng, y = lat, degrees). Must be deterministic: equal inputs give equal sets.
pub trait Coverer: Send + Sync {
    fn cover(&self, rect: &Rect<f64>, level: u8) -> Vec<CellId>;
}

/// Equirectangular quadtree grid over the whole globe
///
/// Level `L` divides longitude and latitude into `2^L` equal bands each. With
/// `include_ancestors` the covering also holds every enclosing cell up to the root, so
/// content indexed at coarser levels is fetched along with the base cells.
#[derive(Debug, Clone, Copy)]
pub struct GridCoverer {
    pub include_ancestors: bool,
}

impl Default for GridCoverer {
    fn default() -> Self {
        Self {
            include_ancestors: true,
        }
    }
}

impl GridCoverer {
    pub fn new(include_ancestors: bool) -> Self {
        Self { include_ancestors }
    }

    /// Grid column and row holding a lat/lng position at `level`
    fn grid_position(lat: f64, lng: f64, level: u8) -> (u32, u32) {
        let cells = (1u64 << level) as f64;
        let max = (1u64 << level) - 1;
        let column = (((lng + 180.0) / 360.0) * cells).floor().clamp(0.0, max as f64);
        let row = (((lat + 90.0) / 180.0) * cells).floor().clamp(0.0, max as f64);
        (column as u32, row as u32)
    }

    /// Cell of `level` containing a lat/lng position
    pub fn cell_at(&self, lat: f64, lng: f64, level: u8) -> CellId {
        let level = level.min(MAX_LEVEL);
        let (x, y) = Self::grid_position(lat, lng, level);
        CellId::from_grid(level, x, y)
    }

    /// Lat/lng rectangle of a cell, `None` for the pin sentinel
    pub fn cell_bounds(&self, cell: CellId) -> Option<Rect<f64>> {
        let (level, x, y) = cell.to_grid()?;
        let cells = (1u64 << level) as f64;
        let lng_step = 360.0 / cells;
        let lat_step = 180.0 / cells;
        Some(Rect::new(
            Coord {
                x: -180.0 + x as f64 * lng_step,
                y: -90.0 + y as f64 * lat_step,
            },
            Coord {
                x: -180.0 + (x + 1) as f64 * lng_step,
                y: -90.0 + (y + 1) as f64 * lat_step,
            },
        ))
    }
}

impl Coverer for GridCoverer {
    #[cfg_attr(feature = "profiling", profiling::function)]
    fn cover(&self, rect: &Rect<f64>, level: u8) -> Vec<CellId> {
        let level = level.min(MAX_LEVEL);
        let (x0, y0) = Self::grid_position(rect.min().y, rect.min().x, level);
        let (x1, y1) = Self::grid_position(rect.max().y, rect.max().x, level);

        let mut cells = BTreeSet::new();
        for x in x0..=x1 {
            for y in y0..=y1 {
                let cell = CellId::from_grid(level, x, y);
                if self.include_ancestors {
                    // Siblings share ancestors, stop at the first one already present
                    for ancestor in cell.ancestors() {
                        if !cells.insert(ancestor) {
                            break;
                        }
                    }
                }
                cells.insert(cell);
            }
        }
        cells.into_iter().collect()
    }
}
