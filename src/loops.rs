//! Closed loop extraction from raw traces.
//!
//! A run can cross its own path several times; every self-closing stretch is
//! an independent claimable polygon. Extraction is greedy: for each start
//! index the earliest vertex at least three steps later that comes back
//! within the closure threshold closes a loop, and scanning resumes after
//! that vertex. Whatever trails after the last loop is discarded.

use log::debug;
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use serde::{Deserialize, Serialize};

use crate::geo_utils::{haversine_distance, meters_to_degrees};
use crate::{ClosedLoop, GpsPoint};

/// Closure thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Closure threshold when extracting sub-loops from a longer trace.
    /// Default: 30.0 meters
    pub sub_loop_closure_meters: f64,

    /// Closure threshold for a full live run.
    /// Default: 50.0 meters
    pub live_closure_meters: f64,

    /// Closure threshold for an imported file (tolerates export jitter).
    /// Default: 100.0 meters
    pub import_closure_meters: f64,

    /// Traces longer than this use the R-tree indexed scan.
    /// Default: 400 points
    pub indexed_scan_above_points: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            sub_loop_closure_meters: 30.0,
            live_closure_meters: 50.0,
            import_closure_meters: 100.0,
            indexed_scan_above_points: 400,
        }
    }
}

/// Smallest index distance between a loop's opening and closing vertex.
const MIN_INDEX_GAP: usize = 3;

/// Extract loops with the threshold and scan strategy from `config`.
pub fn extract_loops_with_config(trace: &[GpsPoint], config: &LoopConfig) -> Vec<ClosedLoop> {
    if trace.len() > config.indexed_scan_above_points {
        extract_loops_indexed(trace, config.sub_loop_closure_meters)
    } else {
        extract_loops(trace, config.sub_loop_closure_meters)
    }
}

/// Greedy O(n²) scan for self-closing sub-paths.
///
/// # Example
/// ```
/// use loopclaim::{GpsPoint, loops::extract_loops};
///
/// let square = vec![
///     GpsPoint::new(0.0, 0.0),
///     GpsPoint::new(0.0, 0.001),
///     GpsPoint::new(0.001, 0.001),
///     GpsPoint::new(0.001, 0.0),
///     GpsPoint::new(0.0, 0.0),
/// ];
/// let loops = extract_loops(&square, 30.0);
/// assert_eq!(loops.len(), 1);
/// ```
pub fn extract_loops(trace: &[GpsPoint], threshold: f64) -> Vec<ClosedLoop> {
    let mut loops = Vec::new();
    let mut i = 0;

    while i + MIN_INDEX_GAP < trace.len() {
        let closing = (i + MIN_INDEX_GAP..trace.len())
            .find(|&j| haversine_distance(&trace[i], &trace[j]) <= threshold);

        match closing {
            Some(j) => {
                push_loop(&mut loops, trace, i, j);
                i = j + 1;
            }
            None => i += 1,
        }
    }

    debug!(
        "[Loops] Extracted {} loops from {} points",
        loops.len(),
        trace.len()
    );
    loops
}

/// Same partition as [`extract_loops`], with closure candidates found through
/// an R-tree instead of a linear scan.
pub fn extract_loops_indexed(trace: &[GpsPoint], threshold: f64) -> Vec<ClosedLoop> {
    let tree = build_rtree(trace);
    let mut loops = Vec::new();
    let mut i = 0;

    while i + MIN_INDEX_GAP < trace.len() {
        let origin = &trace[i];
        // Degree radius generous enough to cover the threshold along both axes
        let radius = meters_to_degrees(threshold, origin.latitude) * 1.5;
        let closing = tree
            .locate_within_distance([origin.latitude, origin.longitude], radius * radius)
            .filter(|p| p.idx >= i + MIN_INDEX_GAP)
            .filter(|p| haversine_distance(origin, &trace[p.idx]) <= threshold)
            .map(|p| p.idx)
            .min();

        match closing {
            Some(j) => {
                push_loop(&mut loops, trace, i, j);
                i = j + 1;
            }
            None => i += 1,
        }
    }

    debug!(
        "[Loops] Extracted {} loops from {} points (indexed)",
        loops.len(),
        trace.len()
    );
    loops
}

fn push_loop(loops: &mut Vec<ClosedLoop>, trace: &[GpsPoint], start: usize, end: usize) {
    let mut ring = trace[start..=end].to_vec();
    // Always duplicate the opening vertex, even if the closing one sits on it
    ring.push(trace[start]);
    if let Some(closed) = ClosedLoop::close(ring) {
        loops.push(closed);
    }
}

/// A trace vertex with its index for R-tree queries
#[derive(Debug, Clone, Copy)]
struct IndexedPoint {
    idx: usize,
    lat: f64,
    lng: f64,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lat, self.lng])
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dlat = self.lat - point[0];
        let dlng = self.lng - point[1];
        dlat * dlat + dlng * dlng
    }
}

fn build_rtree(points: &[GpsPoint]) -> RTree<IndexedPoint> {
    let indexed: Vec<IndexedPoint> = points
        .iter()
        .enumerate()
        .map(|(i, p)| IndexedPoint {
            idx: i,
            lat: p.latitude,
            lng: p.longitude,
        })
        .collect();
    RTree::bulk_load(indexed)
}
