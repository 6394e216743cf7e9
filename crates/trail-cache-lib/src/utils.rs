//! Utility functions for coordinate conversions between WGS84 and the projected plane
//!
//! The projected plane is a unit Web Mercator square: longitude maps linearly onto
//! `x ∈ [-1, 1]` and latitude onto `y ∈ [-1, 1]` through the Mercator stretch. Path
//! vertices on the wire are already in this plane.

use geo::{Coord, Point, Rect};

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Half-extent of the projected world square
pub const WORLD_HALF_EXTENT: f64 = 1.0;

/// Convert WGS84 (lat, lon) in degrees to the projected plane
///
/// Latitude is clamped to the valid Web Mercator range first.
#[inline(always)]
pub fn project_lat_lng(lat: f64, lng: f64) -> Point<f64> {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = lng / 180.0;
    let lat_rad = lat.to_radians();
    let y = (std::f64::consts::FRAC_PI_4 + lat_rad / 2.0).tan().ln() / std::f64::consts::PI;
    Point::new(x, y)
}

/// Convert a projected point back to WGS84 (lat, lon) in degrees
#[inline(always)]
pub fn unproject(x: f64, y: f64) -> (f64, f64) {
    let lng = x * 180.0;
    let lat = (2.0 * (y * std::f64::consts::PI).exp().atan() - std::f64::consts::FRAC_PI_2)
        .to_degrees();
    (lat, lng)
}

/// Project a lat/lng rectangle (x = lng, y = lat, degrees) onto the plane
pub fn project_rect(rect: Rect<f64>) -> Rect<f64> {
    let low = project_lat_lng(rect.min().y, rect.min().x);
    let high = project_lat_lng(rect.max().y, rect.max().x);
    Rect::new(
        Coord {
            x: low.x(),
            y: low.y(),
        },
        Coord {
            x: high.x(),
            y: high.y(),
        },
    )
}
