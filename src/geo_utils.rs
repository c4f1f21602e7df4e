//! Spherical geometry over GPS coordinate sequences.
//!
//! All functions are pure. Distances use the haversine formula on a sphere of
//! radius [`EARTH_RADIUS_M`]; areas use the spherical-excess approximation,
//! which is accurate for the city-block sized polygons claimed in play and
//! degrades for very large polygons.

use crate::{Bounds, GpsPoint};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude (approximately constant).
pub const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Great-circle distance between two points in meters.
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let phi1 = p1.latitude.to_radians();
    let phi2 = p2.latitude.to_radians();
    let delta_phi = (p2.latitude - p1.latitude).to_radians();
    let delta_lambda = (p2.longitude - p1.longitude).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Sum of consecutive haversine distances in meters.
pub fn path_distance(points: &[GpsPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Distance between the first and last vertex, `None` for an empty path.
pub fn closure_gap(points: &[GpsPoint]) -> Option<f64> {
    let first = points.first()?;
    let last = points.last()?;
    Some(haversine_distance(first, last))
}

/// True iff the endpoints are within `threshold` meters of each other.
pub fn is_closed(points: &[GpsPoint], threshold: f64) -> bool {
    closure_gap(points).is_some_and(|gap| gap <= threshold)
}

/// Spherical-excess polygon area in square meters.
///
/// Accumulates `(lng_j - lng_i) * (2 + sin(lat_i) + sin(lat_j))` over every
/// edge (wrapping last to first), scales by `R²/2` and takes the absolute
/// value. Self-intersecting rings are measured as given.
pub fn polygon_area(points: &[GpsPoint]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }

    let mut area = 0.0;
    for i in 0..points.len() {
        let j = (i + 1) % points.len();
        let lat1 = points[i].latitude.to_radians();
        let lat2 = points[j].latitude.to_radians();
        let lng1 = points[i].longitude.to_radians();
        let lng2 = points[j].longitude.to_radians();
        area += (lng2 - lng1) * (2.0 + lat1.sin() + lat2.sin());
    }

    (area * EARTH_RADIUS_M * EARTH_RADIUS_M / 2.0).abs()
}

/// Ring perimeter in meters, wrapping last to first.
pub fn perimeter(points: &[GpsPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    (0..points.len())
        .map(|i| haversine_distance(&points[i], &points[(i + 1) % points.len()]))
        .sum()
}

/// Average pace in minutes per kilometer. Zero distance yields zero.
pub fn average_pace(distance_meters: f64, duration_seconds: f64) -> f64 {
    if distance_meters <= 0.0 {
        return 0.0;
    }
    (duration_seconds / 60.0) / (distance_meters / 1000.0)
}

/// Speed in m/s between two timestamped points, `None` without usable timestamps.
pub fn speed_between(p1: &GpsPoint, p2: &GpsPoint) -> Option<f64> {
    let elapsed_ms = p2.timestamp_ms? - p1.timestamp_ms?;
    if elapsed_ms <= 0 {
        return None;
    }
    Some(haversine_distance(p1, p2) / (elapsed_ms as f64 / 1000.0))
}

/// Compute the bounding box of a track. Empty tracks yield an all-zero box.
pub fn compute_bounds(points: &[GpsPoint]) -> Bounds {
    Bounds::from_points(points).unwrap_or(Bounds {
        min_lat: 0.0,
        max_lat: 0.0,
        min_lng: 0.0,
        max_lng: 0.0,
    })
}

/// Mean position of a track. Empty tracks yield (0, 0).
pub fn compute_center(points: &[GpsPoint]) -> GpsPoint {
    if points.is_empty() {
        return GpsPoint::new(0.0, 0.0);
    }
    let n = points.len() as f64;
    let lat = points.iter().map(|p| p.latitude).sum::<f64>() / n;
    let lng = points.iter().map(|p| p.longitude).sum::<f64>() / n;
    GpsPoint::new(lat, lng)
}

/// Convert a distance in meters to degrees of longitude at `latitude`.
///
/// Longitude degrees shrink towards the poles, so this is also an upper
/// bound for the latitude degrees covering the same distance.
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let cos_lat = latitude.to_radians().cos().abs().max(1e-6);
    meters / (METERS_PER_DEG_LAT * cos_lat)
}

/// Check whether two boxes overlap once each is grown by `buffer_meters`.
pub fn bounds_overlap(a: &Bounds, b: &Bounds, buffer_meters: f64, reference_lat: f64) -> bool {
    let buffer_lat = buffer_meters / METERS_PER_DEG_LAT;
    let buffer_lng = meters_to_degrees(buffer_meters, reference_lat);

    a.min_lat - buffer_lat <= b.max_lat + buffer_lat
        && a.max_lat + buffer_lat >= b.min_lat - buffer_lat
        && a.min_lng - buffer_lng <= b.max_lng + buffer_lng
        && a.max_lng + buffer_lng >= b.min_lng - buffer_lng
}

/// True when two non-adjacent edges of the ring cross.
///
/// Works in planar lng/lat space, which is adequate at claim scale. A
/// repeated closing vertex is ignored.
pub fn has_self_intersection(points: &[GpsPoint]) -> bool {
    let mut ring: &[GpsPoint] = points;
    if ring.len() > 1 && ring[0].same_position(&ring[ring.len() - 1]) {
        ring = &ring[..ring.len() - 1];
    }
    let n = ring.len();
    if n < 4 {
        return false;
    }

    for i in 0..n {
        let a1 = &ring[i];
        let a2 = &ring[(i + 1) % n];
        for j in (i + 2)..n {
            // Edges sharing the wrap-around vertex are adjacent
            if i == 0 && j == n - 1 {
                continue;
            }
            let b1 = &ring[j];
            let b2 = &ring[(j + 1) % n];
            if segments_cross(a1, a2, b1, b2) {
                return true;
            }
        }
    }
    false
}

fn orientation(a: &GpsPoint, b: &GpsPoint, c: &GpsPoint) -> f64 {
    (b.longitude - a.longitude) * (c.latitude - a.latitude)
        - (b.latitude - a.latitude) * (c.longitude - a.longitude)
}

/// Proper crossing test: touching endpoints and collinear overlap do not count.
fn segments_cross(a1: &GpsPoint, a2: &GpsPoint, b1: &GpsPoint, b2: &GpsPoint) -> bool {
    let d1 = orientation(b1, b2, a1);
    let d2 = orientation(b1, b2, a2);
    let d3 = orientation(a1, a2, b1);
    let d4 = orientation(a1, a2, b2);
    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}
