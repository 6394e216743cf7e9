//! Cell identifiers, resolution tiers and the viewport
//!
//! Cell ids use the S2 bit layout over a single root square: the Morton-interleaved position
//! bits come first, followed by a sentinel `1` bit, and the remaining low bits are zero. The
//! level is therefore derivable from the number of trailing zeros.

use geo::{Coord, Rect};
use smallvec::SmallVec;
use std::fmt;

/// Deepest level representable in a 64-bit id
pub const MAX_LEVEL: u8 = 30;

/// Identifier of one cell of the hierarchy, or the pin sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellId(u64);

impl CellId {
    /// Reserved id for viewport-independent per-entity fetches
    pub const PIN: CellId = CellId(0);

    /// Wrap a raw id as produced by a covering
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Id of the cell at grid position (x, y) of the given level
    ///
    /// Positions outside `0..2^level` are clamped.
    pub fn from_grid(level: u8, x: u32, y: u32) -> Self {
        let level = level.min(MAX_LEVEL);
        let max = (1u64 << level) - 1;
        let x = (x as u64).min(max);
        let y = (y as u64).min(max);
        let position = interleave(x) << 1 | interleave(y);
        Self(((position << 1) | 1) << (2 * (MAX_LEVEL - level) as u32))
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_pin(self) -> bool {
        self.0 == 0
    }

    /// Lowest set bit, the sentinel marking the level
    #[inline]
    fn lsb(self) -> u64 {
        self.0 & self.0.wrapping_neg()
    }

    /// Subdivision level, `None` for the pin sentinel
    pub fn level(self) -> Option<u8> {
        if self.is_pin() {
            return None;
        }
        let zeros = self.0.trailing_zeros().min(2 * MAX_LEVEL as u32);
        Some(MAX_LEVEL - (zeros / 2) as u8)
    }

    /// Grid position (level, x, y), `None` for the pin sentinel
    pub fn to_grid(self) -> Option<(u8, u32, u32)> {
        let level = self.level()?;
        let position = self.0 >> (2 * (MAX_LEVEL - level) as u32 + 1);
        Some((
            level,
            deinterleave(position >> 1) as u32,
            deinterleave(position) as u32,
        ))
    }

    /// Enclosing cell one level up, `None` at the root or for the pin sentinel
    pub fn parent(self) -> Option<CellId> {
        match self.level()? {
            0 => None,
            _ => {
                let lsb = self.lsb() << 2;
                Some(Self((self.0 & lsb.wrapping_neg()) | lsb))
            }
        }
    }

    /// Every enclosing cell up to and including the root
    pub fn ancestors(self) -> impl Iterator<Item = CellId> {
        std::iter::successors(self.parent(), |cell| cell.parent())
    }

    /// Compact hex token: trailing zero nibbles stripped, `X` for the sentinel
    pub fn to_token(self) -> String {
        if self.is_pin() {
            return "X".to_owned();
        }
        let hex = format!("{:016x}", self.0);
        hex.trim_end_matches('0').to_owned()
    }

    /// Parse a token produced by [`CellId::to_token`]
    pub fn from_token(token: &str) -> Option<Self> {
        if token == "X" {
            return Some(Self::PIN);
        }
        if token.is_empty() || token.len() > 16 {
            return None;
        }
        let value = u64::from_str_radix(token, 16).ok()?;
        Some(Self(value << (4 * (16 - token.len()) as u32)))
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_token())
    }
}

/// Spread the low 32 bits of `value` to the even bit positions
fn interleave(value: u64) -> u64 {
    let mut v = value & 0xffff_ffff;
    v = (v | (v << 16)) & 0x0000_ffff_0000_ffff;
    v = (v | (v << 8)) & 0x00ff_00ff_00ff_00ff;
    v = (v | (v << 4)) & 0x0f0f_0f0f_0f0f_0f0f;
    v = (v | (v << 2)) & 0x3333_3333_3333_3333;
    (v | (v << 1)) & 0x5555_5555_5555_5555
}

/// Gather the even bit positions of `value` back into the low 32 bits
fn deinterleave(value: u64) -> u64 {
    let mut v = value & 0x5555_5555_5555_5555;
    v = (v | (v >> 1)) & 0x3333_3333_3333_3333;
    v = (v | (v >> 2)) & 0x0f0f_0f0f_0f0f_0f0f;
    v = (v | (v >> 4)) & 0x00ff_00ff_00ff_00ff;
    v = (v | (v >> 8)) & 0x0000_ffff_0000_ffff;
    (v | (v >> 16)) & 0xffff_ffff
}

/// Level-of-detail tier, each with its own depth and activation zoom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Tier {
    Overview,
    Coarse,
    Fine,
}

impl Tier {
    /// All tiers from coarsest to finest
    pub const ALL: [Tier; 3] = [Tier::Overview, Tier::Coarse, Tier::Fine];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Tier::Overview => "overview",
            Tier::Coarse => "coarse",
            Tier::Fine => "fine",
        }
    }

    /// Path segment of the server's fetch endpoint for this tier
    pub const fn url_segment(self) -> &'static str {
        match self {
            Tier::Overview => "overview",
            Tier::Coarse => "metadata",
            Tier::Fine => "detail",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Camera state: a lat/lng rectangle (x = lng, y = lat, degrees) and a fractional zoom
///
/// `low.x > high.x` means the rectangle wraps across the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub low: Coord<f64>,
    pub high: Coord<f64>,
    pub zoom: f64,
}

impl Viewport {
    pub fn new(lat_lo: f64, lng_lo: f64, lat_hi: f64, lng_hi: f64, zoom: f64) -> Self {
        Self {
            low: Coord {
                x: lng_lo,
                y: lat_lo.min(lat_hi),
            },
            high: Coord {
                x: lng_hi,
                y: lat_lo.max(lat_hi),
            },
            zoom,
        }
    }

    pub fn wraps_antimeridian(&self) -> bool {
        self.low.x > self.high.x
    }

    /// Non-wrapping lat/lng rectangles that together make up the viewport
    pub fn rects(&self) -> SmallVec<[Rect<f64>; 2]> {
        let mut rects = SmallVec::new();
        if self.wraps_antimeridian() {
            rects.push(Rect::new(
                self.low,
                Coord {
                    x: 180.0,
                    y: self.high.y,
                },
            ));
            rects.push(Rect::new(
                Coord {
                    x: -180.0,
                    y: self.low.y,
                },
                self.high,
            ));
        } else {
            rects.push(Rect::new(self.low, self.high));
        }
        rects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_and_levels() {
        let root = CellId::from_grid(0, 0, 0);
        assert_eq!(root.raw(), 1 << 60);
        assert_eq!(root.level(), Some(0));
        assert_eq!(root.parent(), None);

        let leaf = CellId::from_grid(MAX_LEVEL, 12345, 67890);
        assert_eq!(leaf.raw() & 1, 1);
        assert_eq!(leaf.level(), Some(MAX_LEVEL));
        assert_eq!(leaf.to_grid(), Some((MAX_LEVEL, 12345, 67890)));
    }

    #[test]
    fn test_parent_chain() {
        let cell = CellId::from_grid(10, 613, 402);
        let parent = cell.parent().unwrap();
        assert_eq!(parent, CellId::from_grid(9, 306, 201));

        let ancestors: Vec<_> = cell.ancestors().collect();
        assert_eq!(ancestors.len(), 10);
        assert_eq!(ancestors.last().copied(), Some(CellId::from_grid(0, 0, 0)));
        for (i, ancestor) in ancestors.iter().enumerate() {
            assert_eq!(ancestor.level(), Some(9 - i as u8));
        }
    }

    #[test]
    fn test_pin_sentinel() {
        assert!(CellId::PIN.is_pin());
        assert_eq!(CellId::PIN.level(), None);
        assert_eq!(CellId::PIN.parent(), None);
        assert_eq!(CellId::PIN.to_token(), "X");
        assert_eq!(CellId::from_token("X"), Some(CellId::PIN));
    }

    #[test]
    fn test_tokens_roundtrip() {
        let root = CellId::from_grid(0, 0, 0);
        assert_eq!(root.to_token(), "1");

        for (level, x, y) in [(1, 1, 0), (7, 100, 3), (10, 1023, 1023), (30, 5, 9)] {
            let cell = CellId::from_grid(level, x, y);
            let token = cell.to_token();
            assert!(!token.ends_with('0'));
            assert_eq!(CellId::from_token(&token), Some(cell));
        }

        assert_eq!(CellId::from_token(""), None);
        assert_eq!(CellId::from_token("zz"), None);
        assert_eq!(CellId::from_token("12345678123456781"), None);
    }

    #[test]
    fn test_tier_segments() {
        let segments: Vec<_> = Tier::ALL.iter().map(|tier| tier.url_segment()).collect();
        assert_eq!(segments, ["overview", "metadata", "detail"]);
        assert_eq!(Tier::Fine.index(), 2);
    }

    #[test]
    fn test_viewport_wrap_split() {
        let plain = Viewport::new(-10.0, 20.0, 10.0, 30.0, 5.0);
        assert!(!plain.wraps_antimeridian());
        assert_eq!(plain.rects().len(), 1);

        let wrapped = Viewport::new(-10.0, 170.0, 10.0, -170.0, 5.0);
        assert!(wrapped.wraps_antimeridian());
        let rects = wrapped.rects();
        assert_eq!(rects.len(), 2);
        assert_eq!(rects[0].max().x, 180.0);
        assert_eq!(rects[1].min().x, -180.0);
    }
}
