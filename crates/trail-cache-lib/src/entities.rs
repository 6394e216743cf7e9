//! Decoded cell entities and the cell payload layout
//!
//! A cell payload is a list of paths (polylines in the projected plane) followed by a list of
//! trails (named routes that reference paths and carry a marker position).

use crate::Result;
use crate::wire::{WireReader, WireWriter};
use geo::{Coord, Rect};
use smallvec::SmallVec;
use std::sync::Arc;

/// Payloads at or below this size carry no content
pub const EMPTY_PAYLOAD_MAX_BYTES: usize = 8;

/// Half-size of the square bound around a trail marker
const TRAIL_MARKER_RADIUS: f64 = 1e-5;

/// A polyline with interleaved x,y vertices in the projected plane
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub id: u64,
    pub path_type: u32,
    pub vertices: Vec<f32>,
    pub bound: Rect<f64>,
}

impl Path {
    /// Build a path, deriving its bound from the vertices
    pub fn new(id: u64, path_type: u32, vertices: Vec<f32>) -> Self {
        let bound = vertex_bound(&vertices);
        Self {
            id,
            path_type,
            vertices,
            bound,
        }
    }

    /// Vertices as projected coordinates, ignoring a dangling odd value
    pub fn points(&self) -> impl Iterator<Item = Coord<f64>> + '_ {
        self.vertices.chunks_exact(2).map(|xy| Coord {
            x: xy[0] as f64,
            y: xy[1] as f64,
        })
    }
}

/// A named route made of one or more paths
#[derive(Debug, Clone, PartialEq)]
pub struct Trail {
    pub id: u64,
    pub name: String,
    pub trail_type: u32,
    /// Path ids with a direction flag in bit 0
    pub path_refs: SmallVec<[i64; 4]>,
    pub marker: Coord<f64>,
    pub length_meters: f32,
}

impl Trail {
    /// Referenced path ids with the direction flag stripped
    pub fn path_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.path_refs.iter().map(|path_ref| (*path_ref & !1) as u64)
    }

    /// Point-like bound around the marker
    pub fn bound(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.marker.x - TRAIL_MARKER_RADIUS,
                y: self.marker.y - TRAIL_MARKER_RADIUS,
            },
            Coord {
                x: self.marker.x + TRAIL_MARKER_RADIUS,
                y: self.marker.y + TRAIL_MARKER_RADIUS,
            },
        )
    }
}

/// Everything decoded from one non-empty cell
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellContent {
    pub paths: Vec<Arc<Path>>,
    pub trails: Vec<Arc<Trail>>,
}

impl CellContent {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.trails.is_empty()
    }

    /// Identifiers contributed by this cell
    pub fn entities(&self) -> CellEntities {
        CellEntities {
            path_ids: self.paths.iter().map(|path| path.id).collect(),
            trail_ids: self.trails.iter().map(|trail| trail.id).collect(),
        }
    }
}

/// Identifiers a cell contributed, recovered on unload without decoding geometry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellEntities {
    pub path_ids: Vec<u64>,
    pub trail_ids: Vec<u64>,
}

fn vertex_bound(vertices: &[f32]) -> Rect<f64> {
    let mut points = vertices.chunks_exact(2);
    let Some(first) = points.next() else {
        return Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 });
    };

    let (mut min_x, mut min_y) = (first[0] as f64, first[1] as f64);
    let (mut max_x, mut max_y) = (min_x, min_y);
    for xy in points {
        let (x, y) = (xy[0] as f64, xy[1] as f64);
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y })
}

/// Decode a cell payload, `None` for the empty sentinel
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn decode_cell(bytes: &[u8]) -> Result<Option<CellContent>> {
    if bytes.len() <= EMPTY_PAYLOAD_MAX_BYTES {
        return Ok(None);
    }

    let mut reader = WireReader::new(bytes);

    let path_count = reader.read_count()?;
    let mut paths = Vec::with_capacity(path_count.min(reader.remaining()));
    for _ in 0..path_count {
        let id = reader.read_varint64()?;
        let path_type = reader.read_varint32()?;
        let vertex_count = reader.read_count()?;
        reader.align(4)?;
        let vertices = reader.read_f32_array(vertex_count)?;
        paths.push(Arc::new(Path::new(id, path_type, vertices)));
    }

    let trail_count = reader.read_count()?;
    let mut trails = Vec::with_capacity(trail_count.min(reader.remaining()));
    for _ in 0..trail_count {
        let id = reader.read_varint64()?;
        let name_length = reader.read_count()?;
        let name = std::str::from_utf8(reader.read_bytes(name_length)?)?.to_owned();
        let trail_type = reader.read_varint32()?;
        let ref_count = reader.read_count()?;
        reader.align(8)?;
        let path_refs = SmallVec::from_vec(reader.read_i64_array(ref_count)?);
        let marker = Coord {
            x: reader.read_f64()?,
            y: reader.read_f64()?,
        };
        let length_meters = reader.read_f32()?;
        trails.push(Arc::new(Trail {
            id,
            name,
            trail_type,
            path_refs,
            marker,
            length_meters,
        }));
    }

    if reader.has_remaining() {
        tracing::trace!(remaining = reader.remaining(), "Trailing bytes after cell");
    }

    Ok(Some(CellContent { paths, trails }))
}

/// Recover only the entity ids of a payload, skipping over geometry and names
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn scan_entity_ids(bytes: &[u8]) -> Result<CellEntities> {
    let mut entities = CellEntities::default();
    if bytes.len() <= EMPTY_PAYLOAD_MAX_BYTES {
        return Ok(entities);
    }

    let mut reader = WireReader::new(bytes);

    let path_count = reader.read_count()?;
    for _ in 0..path_count {
        entities.path_ids.push(reader.read_varint64()?);
        reader.read_varint32()?;
        let vertex_count = reader.read_count()?;
        reader.align(4)?;
        reader.skip(vertex_count.saturating_mul(4))?;
    }

    let trail_count = reader.read_count()?;
    for _ in 0..trail_count {
        entities.trail_ids.push(reader.read_varint64()?);
        let name_length = reader.read_count()?;
        reader.skip(name_length)?;
        reader.read_varint32()?;
        let ref_count = reader.read_count()?;
        reader.align(8)?;
        reader.skip(ref_count.saturating_mul(8))?;
        reader.skip(8 + 8 + 4)?;
    }

    Ok(entities)
}

/// Encode content into the cell payload layout
pub fn encode_cell(content: &CellContent) -> Vec<u8> {
    let mut writer = WireWriter::new();

    writer.write_varint32(content.paths.len() as u32);
    for path in &content.paths {
        writer.write_varint64(path.id);
        writer.write_varint32(path.path_type);
        writer.write_varint32(path.vertices.len() as u32);
        writer.align(4);
        writer.write_f32_array(&path.vertices);
    }

    writer.write_varint32(content.trails.len() as u32);
    for trail in &content.trails {
        writer.write_varint64(trail.id);
        writer.write_varint32(trail.name.len() as u32);
        writer.write_bytes(trail.name.as_bytes());
        writer.write_varint32(trail.trail_type);
        writer.write_varint32(trail.path_refs.len() as u32);
        writer.align(8);
        writer.write_i64_array(&trail.path_refs);
        writer.write_f64(trail.marker.x);
        writer.write_f64(trail.marker.y);
        writer.write_f32(trail.length_meters);
    }

    writer.into_bytes()
}
