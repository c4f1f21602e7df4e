//! Polygon boolean operations on claimed loops.
//!
//! Boolean operations run on the `geo` crate in planar lng/lat space (fine at
//! claim scale); resulting areas are measured with the spherical formula in
//! [`crate::geo_utils`] so every area in the engine comes from one formula.
//!
//! Every operation is two-stage: the direct operation is attempted first,
//! and if it fails (backend panic or degenerate output) both inputs are
//! repaired with a zero-width self-union, the equivalent of a zero buffer,
//! and the operation is retried. The stage that produced the result is part
//! of the typed outcome so callers and tests can tell them apart.

use std::panic::{AssertUnwindSafe, catch_unwind};

use geo::{BooleanOps, Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use log::{debug, warn};

use crate::geo_utils::polygon_area;
use crate::{ClosedLoop, GpsPoint};

/// Outcome of a union or repair.
#[derive(Debug, Clone, PartialEq)]
pub enum BooleanOutcome {
    /// The direct operation succeeded.
    Clean(ClosedLoop),
    /// The operation succeeded only after repairing the inputs.
    Repaired(ClosedLoop),
    /// No usable polygon could be produced.
    Failed,
}

impl BooleanOutcome {
    /// The produced polygon, if any.
    pub fn polygon(&self) -> Option<&ClosedLoop> {
        match self {
            BooleanOutcome::Clean(p) | BooleanOutcome::Repaired(p) => Some(p),
            BooleanOutcome::Failed => None,
        }
    }
}

/// Outcome of subtracting a cut polygon from a base polygon.
///
/// Distinguishes the numerical failure from the game-rule threshold: both
/// make [`safe_difference`] return `None`, but only one is a robustness
/// fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum DifferenceOutcome {
    /// A livable remainder of at least the minimum area.
    Remainder {
        polygon: ClosedLoop,
        area: f64,
        repaired: bool,
    },
    /// The operation succeeded but what remains is smaller than the minimum.
    BelowMinimum { area: f64 },
    /// The cut lies inside the base, so the remainder would surround a hole.
    /// A loop is a single ring and cannot carry it.
    Enclosed { hole_area: f64 },
    /// The cut covers the base entirely.
    Consumed,
    /// Both the direct and the repaired operation failed.
    Failed,
}

/// Convert a loop to a `geo` polygon (x = longitude, y = latitude).
pub fn to_polygon(ring: &ClosedLoop) -> Polygon<f64> {
    let coords: Vec<Coord<f64>> = ring
        .points()
        .iter()
        .map(|p| Coord {
            x: p.longitude,
            y: p.latitude,
        })
        .collect();
    Polygon::new(LineString::new(coords), vec![])
}

fn to_multi(ring: &ClosedLoop) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![to_polygon(ring)])
}

/// Exterior ring of a `geo` polygon as a loop. Holes are not carried over.
fn exterior_to_loop(polygon: &Polygon<f64>) -> Option<ClosedLoop> {
    let points: Vec<GpsPoint> = polygon
        .exterior()
        .coords()
        .map(|c| GpsPoint::new(c.y, c.x))
        .collect();
    if points.iter().any(|p| !p.is_valid()) {
        return None;
    }
    ClosedLoop::close(points)
}

fn ring_area(ring: &LineString<f64>) -> f64 {
    let points: Vec<GpsPoint> = ring.coords().map(|c| GpsPoint::new(c.y, c.x)).collect();
    polygon_area(&points)
}

/// A difference part as a loop, with its area net of holes and the area of
/// its holes.
fn measure_part(polygon: &Polygon<f64>) -> Option<(ClosedLoop, f64, f64)> {
    let ring = exterior_to_loop(polygon)?;
    let holes: f64 = polygon.interiors().iter().map(ring_area).sum();
    let area = polygon_area(ring.points()) - holes;
    Some((ring, area, holes))
}

/// Largest polygon of a multipolygon, measured spherically.
fn largest_part(parts: &MultiPolygon<f64>) -> Option<(ClosedLoop, f64)> {
    parts
        .0
        .iter()
        .filter_map(exterior_to_loop)
        .map(|ring| {
            let area = polygon_area(ring.points());
            (ring, area)
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// Run a boolean operation, mapping a backend panic or non-finite output to `None`.
fn guarded<F>(op: F) -> Option<MultiPolygon<f64>>
where
    F: FnOnce() -> MultiPolygon<f64>,
{
    let result = catch_unwind(AssertUnwindSafe(op)).ok()?;
    let finite = result
        .0
        .iter()
        .flat_map(|p| p.exterior().coords())
        .all(|c| c.x.is_finite() && c.y.is_finite());
    finite.then_some(result)
}

/// Zero-width repair: union a polygon with nothing, which rebuilds the ring
/// and resolves self-intersections into valid parts.
fn repair(shape: &MultiPolygon<f64>) -> Option<MultiPolygon<f64>> {
    let empty = MultiPolygon::<f64>::new(vec![]);
    guarded(|| shape.union(&empty)).filter(|r| !r.0.is_empty())
}

/// Repair a possibly self-intersecting loop, keeping its largest valid part.
pub fn repair_loop(ring: &ClosedLoop) -> BooleanOutcome {
    match repair(&to_multi(ring)).as_ref().and_then(largest_part) {
        Some((polygon, _)) => BooleanOutcome::Repaired(polygon),
        None => BooleanOutcome::Failed,
    }
}

/// Union of an owner's holding with a newly claimed adjoining loop.
///
/// A union producing more than one part (the loops do not touch) counts as a
/// failure to unify.
pub fn try_union(owner: &ClosedLoop, addition: &ClosedLoop) -> BooleanOutcome {
    let base = to_multi(owner);
    let other = to_multi(addition);

    if let Some(merged) = guarded(|| base.union(&other)) {
        if merged.0.len() == 1 {
            if let Some(ring) = exterior_to_loop(&merged.0[0]) {
                return BooleanOutcome::Clean(ring);
            }
        } else {
            debug!(
                "[Polygon] Direct union produced {} parts, retrying with repaired inputs",
                merged.0.len()
            );
        }
    }

    let (Some(base), Some(other)) = (repair(&base), repair(&other)) else {
        return BooleanOutcome::Failed;
    };
    match guarded(|| base.union(&other)) {
        Some(merged) if merged.0.len() == 1 => exterior_to_loop(&merged.0[0])
            .map(BooleanOutcome::Repaired)
            .unwrap_or(BooleanOutcome::Failed),
        _ => BooleanOutcome::Failed,
    }
}

/// Merge `addition` into `owner`, keeping `owner` unchanged when they cannot
/// be unified. Never fails.
pub fn union(owner: &ClosedLoop, addition: &ClosedLoop) -> ClosedLoop {
    match try_union(owner, addition) {
        BooleanOutcome::Clean(merged) | BooleanOutcome::Repaired(merged) => merged,
        BooleanOutcome::Failed => {
            warn!("[Polygon] Could not unify loops, keeping the original polygon");
            owner.clone()
        }
    }
}

/// Subtract `cut` from `base`, classifying the result against `minimum_area`.
pub fn difference(base: &ClosedLoop, cut: &ClosedLoop, minimum_area: f64) -> DifferenceOutcome {
    let base_shape = to_multi(base);
    let cut_shape = to_multi(cut);

    let (result, repaired) = match guarded(|| base_shape.difference(&cut_shape)) {
        Some(direct) if !direct.0.is_empty() => (direct, false),
        direct => {
            debug!("[Polygon] Direct difference empty or failed, retrying with repaired inputs");
            let retried = match (repair(&base_shape), repair(&cut_shape)) {
                (Some(b), Some(c)) => guarded(|| b.difference(&c)),
                _ => None,
            };
            match (direct, retried) {
                (_, Some(r)) if !r.0.is_empty() => (r, true),
                (None, None) => {
                    warn!("[Polygon] Difference failed after repair");
                    return DifferenceOutcome::Failed;
                }
                // At least one stage ran and left nothing of the base
                _ => return DifferenceOutcome::Consumed,
            }
        }
    };

    let largest = result
        .0
        .iter()
        .filter_map(measure_part)
        .max_by(|a, b| a.1.total_cmp(&b.1));

    match largest {
        Some((_, area, _)) if area < minimum_area => DifferenceOutcome::BelowMinimum { area },
        Some((_, _, holes)) if holes > 0.0 => DifferenceOutcome::Enclosed { hole_area: holes },
        Some((polygon, area, _)) => DifferenceOutcome::Remainder {
            polygon,
            area,
            repaired,
        },
        None => DifferenceOutcome::Failed,
    }
}

/// Remainder of `base - cut`, or `None` when the operation fails or the
/// remainder is smaller than `minimum_area`. A `None` means the caller must
/// treat the cut as a total annexation.
///
/// A cut strictly inside the base also yields `None`; use [`difference`] to
/// tell that case apart, since annexing it would hand over the whole base.
pub fn safe_difference(base: &ClosedLoop, cut: &ClosedLoop, minimum_area: f64) -> Option<ClosedLoop> {
    match difference(base, cut, minimum_area) {
        DifferenceOutcome::Remainder { polygon, .. } => Some(polygon),
        _ => None,
    }
}

/// Area of the overlap between two loops in square meters.
pub fn intersection_area(a: &ClosedLoop, b: &ClosedLoop) -> f64 {
    let a_shape = to_multi(a);
    let b_shape = to_multi(b);
    let overlap = guarded(|| a_shape.intersection(&b_shape)).or_else(|| {
        let (a, b) = (repair(&a_shape)?, repair(&b_shape)?);
        guarded(|| a.intersection(&b))
    });

    overlap
        .map(|parts| {
            parts
                .0
                .iter()
                .filter_map(exterior_to_loop)
                .map(|ring| polygon_area(ring.points()))
                .sum()
        })
        .unwrap_or(0.0)
}

/// True when `outer` fully covers `inner`.
pub fn covers(outer: &ClosedLoop, inner: &ClosedLoop) -> bool {
    let outer = to_polygon(outer);
    let inner = to_polygon(inner);
    catch_unwind(AssertUnwindSafe(|| outer.contains(&inner))).unwrap_or(false)
}

/// True when the point lies strictly inside the loop.
pub fn contains_point(ring: &ClosedLoop, point: &GpsPoint) -> bool {
    let polygon = to_polygon(ring);
    polygon.contains(&Point::new(point.longitude, point.latitude))
}
