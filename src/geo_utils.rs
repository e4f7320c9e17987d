//! # Geographic Utilities
//!
//! Geographic computations over GPS traces.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two waypoints |
//! | [`polyline_length`] | Total length of a trace in meters |
//! | [`compute_bounds`] | Bounding box of a trace |
//! | [`compute_center`] | Mean waypoint of a trace |
//! | [`bounds_intersect`] | Check if two bounding boxes intersect |
//!
//! ## Example
//!
//! ```rust
//! use pegasus::{Waypoint, geo_utils};
//!
//! let track = vec![
//!     Waypoint::new(51.5074, -0.1278, 11.0),
//!     Waypoint::new(51.5080, -0.1290, 12.0),
//!     Waypoint::new(51.5090, -0.1300, 15.0),
//! ];
//!
//! let length = geo_utils::polyline_length(&track);
//! assert!(length > 100.0 && length < 300.0);
//!
//! let bounds = geo_utils::compute_bounds(&track);
//! assert_eq!(bounds.max_lat, 51.5090);
//! ```
//!
//! All functions expect WGS84 coordinates (latitude/longitude in degrees).

use geo::{Coord, Distance, Haversine, Intersects, Point, Rect};

use crate::{Bounds, Waypoint};

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance in meters between two waypoints. Elevation is ignored.
#[inline]
pub fn haversine_distance(p1: &Waypoint, p2: &Waypoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Total length of a trace in meters.
///
/// Sums the haversine distance between consecutive waypoints. Empty or
/// single-point traces return 0.0.
pub fn polyline_length(points: &[Waypoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// Compute the bounding box of a trace.
///
/// For empty input the result has inverted MIN/MAX values that fail every
/// intersection check; use [`Bounds::from_waypoints`] to get an `Option`.
pub fn compute_bounds(points: &[Waypoint]) -> Bounds {
    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;

    for p in points {
        min_lat = min_lat.min(p.latitude);
        max_lat = max_lat.max(p.latitude);
        min_lng = min_lng.min(p.longitude);
        max_lng = max_lng.max(p.longitude);
    }

    Bounds { min_lat, max_lat, min_lng, max_lng }
}

fn is_degenerate(b: &Bounds) -> bool {
    !(b.min_lat <= b.max_lat && b.min_lng <= b.max_lng)
}

fn to_rect(b: &Bounds) -> Rect<f64> {
    Rect::new(
        Coord { x: b.min_lng, y: b.min_lat },
        Coord { x: b.max_lng, y: b.max_lat },
    )
}

/// Check if two bounding boxes intersect. Touching edges count.
///
/// Inverted boxes (such as [`compute_bounds`] of an empty trace) never
/// intersect anything.
///
/// # Example
///
/// ```rust
/// use pegasus::{Bounds, geo_utils};
///
/// let a = Bounds { min_lat: 51.50, max_lat: 51.51, min_lng: -0.13, max_lng: -0.12 };
/// let b = Bounds { min_lat: 51.505, max_lat: 51.515, min_lng: -0.125, max_lng: -0.115 };
/// assert!(geo_utils::bounds_intersect(&a, &b));
/// ```
pub fn bounds_intersect(a: &Bounds, b: &Bounds) -> bool {
    if is_degenerate(a) || is_degenerate(b) {
        return false;
    }
    to_rect(a).intersects(&to_rect(b))
}

// =============================================================================
// Center/Centroid Functions
// =============================================================================

/// Arithmetic mean of all waypoints, elevation included.
///
/// Returns (0, 0, 0) for empty input. Not meaningful for traces that cross
/// the antimeridian.
pub fn compute_center(points: &[Waypoint]) -> Waypoint {
    if points.is_empty() {
        return Waypoint::default();
    }

    let n = points.len() as f64;
    let sum = points.iter().fold(Waypoint::default(), |acc, p| {
        Waypoint::new(
            acc.latitude + p.latitude,
            acc.longitude + p.longitude,
            acc.elevation + p.elevation,
        )
    });

    Waypoint::new(sum.latitude / n, sum.longitude / n, sum.elevation / n)
}

// =============================================================================
// Unit Tests
// =============================================================================
