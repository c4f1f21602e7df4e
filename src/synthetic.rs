//! Synthetic run generator for testing and benchmarking.
//!
//! Generates runs with a known number of closed loops followed by an open
//! tail, providing ground truth for loop extraction and claim resolution.
//!
//! # Example
//!
//! ```rust
//! use loopclaim::synthetic::RunScenario;
//! use loopclaim::loops::extract_loops;
//!
//! let run = RunScenario::multi_loop().generate();
//! assert_eq!(extract_loops(&run.trace, 30.0).len(), run.expected_loops);
//! ```

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::contest::Territory;
use crate::geo_utils::{METERS_PER_DEG_LAT, haversine_distance};
use crate::{ClosedLoop, GpsPoint};

// ============================================================================
// Types
// ============================================================================

/// Scenario configuration for a synthetic run.
#[derive(Debug, Clone)]
pub struct RunScenario {
    /// South-west corner of the first loop.
    pub origin: GpsPoint,
    /// Number of square loops run one after another, west to east.
    pub loop_count: usize,
    /// Side of each square loop in meters.
    pub loop_side_meters: f64,
    /// Gap between neighbouring loops in meters.
    pub loop_gap_meters: f64,
    /// Length of the open tail after the last loop in meters.
    pub tail_meters: f64,
    /// Target spacing between samples in meters. Kept above the sub-loop
    /// closure threshold so straight stretches never close on themselves.
    pub point_spacing_meters: f64,
    /// Running speed used to timestamp samples.
    pub speed_mps: f64,
    /// GPS noise standard deviation in meters.
    pub gps_noise_sigma_meters: f64,
    /// Timestamp of the first sample, unix ms.
    pub start_ms: i64,
    /// RNG seed for deterministic reproduction.
    pub seed: u64,
}

/// A generated run with its ground truth.
#[derive(Debug, Clone)]
pub struct SyntheticRun {
    /// Timestamped samples in running order.
    pub trace: Vec<GpsPoint>,
    /// Loops a correct extractor finds in `trace`.
    pub expected_loops: usize,
    /// Total running time in seconds.
    pub duration_seconds: f64,
}

// ============================================================================
// Coordinate Helpers
// ============================================================================

/// Convert meters to degrees of latitude.
fn meters_to_deg_lat(meters: f64) -> f64 {
    meters / METERS_PER_DEG_LAT
}

/// Convert meters to degrees of longitude at a given latitude.
fn meters_to_deg_lng(meters: f64, latitude: f64) -> f64 {
    let meters_per_deg_lng = METERS_PER_DEG_LAT * latitude.to_radians().cos();
    if meters_per_deg_lng.abs() < 1e-10 {
        return 0.0;
    }
    meters / meters_per_deg_lng
}

/// Move `from` by `north` and `east` meters.
pub fn offset(from: &GpsPoint, north: f64, east: f64) -> GpsPoint {
    GpsPoint::new(
        from.latitude + meters_to_deg_lat(north),
        from.longitude + meters_to_deg_lng(east, from.latitude),
    )
}

/// Evenly spaced samples from `a` towards `b`, excluding `b`.
fn segment(a: &GpsPoint, b: &GpsPoint, spacing: f64) -> Vec<GpsPoint> {
    let steps = (haversine_distance(a, b) / spacing).ceil().max(1.0) as usize;
    (0..steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            GpsPoint::new(
                a.latitude + (b.latitude - a.latitude) * t,
                a.longitude + (b.longitude - a.longitude) * t,
            )
        })
        .collect()
}

// ============================================================================
// Shapes
// ============================================================================

/// A closed rectangular path run counter-clockwise from the south-west
/// corner, ending exactly on its first sample.
pub fn rectangle_loop(
    south: f64,
    west: f64,
    north: f64,
    east: f64,
    spacing_meters: f64,
) -> Vec<GpsPoint> {
    let corners = [
        GpsPoint::new(south, west),
        GpsPoint::new(south, east),
        GpsPoint::new(north, east),
        GpsPoint::new(north, west),
    ];
    let mut points: Vec<GpsPoint> = corners
        .iter()
        .zip(corners.iter().cycle().skip(1))
        .flat_map(|(a, b)| segment(a, b, spacing_meters))
        .collect();
    points.push(corners[0]);
    points
}

/// A square loop of `side_meters` with its south-west corner at `origin`.
pub fn square_loop(origin: &GpsPoint, side_meters: f64, spacing_meters: f64) -> Vec<GpsPoint> {
    let ne = offset(origin, side_meters, side_meters);
    rectangle_loop(
        origin.latitude,
        origin.longitude,
        ne.latitude,
        ne.longitude,
        spacing_meters,
    )
}

/// Stamp samples with times consistent with running at `speed_mps`.
pub fn with_timestamps(points: &[GpsPoint], start_ms: i64, speed_mps: f64) -> Vec<GpsPoint> {
    let mut elapsed = 0.0;
    let mut stamped = Vec::with_capacity(points.len());
    for (i, p) in points.iter().enumerate() {
        if i > 0 {
            elapsed += haversine_distance(&points[i - 1], p) / speed_mps;
        }
        stamped.push(GpsPoint {
            timestamp_ms: Some(start_ms + (elapsed * 1000.0).round() as i64),
            ..*p
        });
    }
    stamped
}

/// Add Gaussian GPS noise to a polyline.
fn add_gps_noise(points: &[GpsPoint], sigma_meters: f64, rng: &mut StdRng) -> Vec<GpsPoint> {
    if sigma_meters <= 0.0 {
        return points.to_vec();
    }

    points
        .iter()
        .map(|p| {
            // Box-Muller transform for Gaussian noise
            let u1: f64 = rng.gen_range(0.0001..1.0);
            let u2: f64 = rng.r#gen();
            let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
            let z1 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).sin();

            GpsPoint {
                latitude: p.latitude + meters_to_deg_lat(z0 * sigma_meters),
                longitude: p.longitude + meters_to_deg_lng(z1 * sigma_meters, p.latitude),
                ..*p
            }
        })
        .collect()
}

/// Wander away southwards for `length_meters` without coming back.
fn open_tail(start: &GpsPoint, length_meters: f64, spacing: f64, rng: &mut StdRng) -> Vec<GpsPoint> {
    let steps = (length_meters / spacing).ceil() as usize;
    let mut heading = -PI / 2.0;
    let mut current = *start;
    let mut points = Vec::with_capacity(steps);

    for _ in 0..steps {
        // Drift, pulled back towards due south
        heading += rng.gen_range(-0.2..0.2) - (heading + PI / 2.0) * 0.5;
        current = offset(&current, spacing * heading.sin(), spacing * heading.cos());
        points.push(current);
    }
    points
}

// ============================================================================
// Scenario Implementation
// ============================================================================

impl RunScenario {
    /// Generate the run.
    pub fn generate(&self) -> SyntheticRun {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let spacing = self.point_spacing_meters;
        let stride = self.loop_side_meters + self.loop_gap_meters;

        let mut path: Vec<GpsPoint> = Vec::new();
        for k in 0..self.loop_count {
            let corner = offset(&self.origin, 0.0, stride * k as f64);
            let square = square_loop(&corner, self.loop_side_meters, spacing);
            // The connector ends on this corner, which also opens the loop
            if path.last().is_some_and(|last| last.same_position(&corner)) {
                path.pop();
            }
            path.extend(square);

            if k + 1 < self.loop_count {
                let next = offset(&self.origin, 0.0, stride * (k + 1) as f64);
                path.extend(segment(&corner, &next, spacing).into_iter().skip(1));
                path.push(next);
            }
        }

        let tail_start = path.last().copied().unwrap_or(self.origin);
        path.extend(open_tail(&tail_start, self.tail_meters, spacing, &mut rng));

        let noisy = add_gps_noise(&path, self.gps_noise_sigma_meters, &mut rng);
        let trace = with_timestamps(&noisy, self.start_ms, self.speed_mps);
        let duration_seconds = match (trace.first(), trace.last()) {
            (Some(first), Some(last)) => {
                (last.timestamp_ms.unwrap_or(0) - first.timestamp_ms.unwrap_or(0)) as f64 / 1000.0
            }
            _ => 0.0,
        };

        SyntheticRun {
            trace,
            expected_loops: self.loop_count,
            duration_seconds,
        }
    }

    /// One 150 m block and no tail: a path closed end to end.
    pub fn single_block() -> Self {
        Self {
            origin: GpsPoint::new(40.4168, -3.7038),
            loop_count: 1,
            loop_side_meters: 150.0,
            loop_gap_meters: 0.0,
            tail_meters: 0.0,
            point_spacing_meters: 40.0,
            speed_mps: 3.0,
            gps_noise_sigma_meters: 0.0,
            start_ms: 1_700_000_000_000,
            seed: 42,
        }
    }

    /// Three 150 m blocks followed by a 400 m open tail.
    pub fn multi_loop() -> Self {
        Self {
            loop_count: 3,
            loop_gap_meters: 100.0,
            tail_meters: 400.0,
            gps_noise_sigma_meters: 2.0,
            ..Self::single_block()
        }
    }

    /// Enough loops to exceed the default point cap.
    pub fn long_run() -> Self {
        Self {
            loop_count: 12,
            loop_side_meters: 400.0,
            point_spacing_meters: 35.0,
            ..Self::multi_loop()
        }
    }
}

/// A `rows` x `cols` grid of square territories of `side_meters`, owned in
/// turn by `owners`.
pub fn territory_grid(
    origin: &GpsPoint,
    rows: usize,
    cols: usize,
    side_meters: f64,
    owners: &[&str],
    avg_pace: f64,
) -> Vec<Territory> {
    let stride = side_meters * 1.1;
    let mut territories = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        for c in 0..cols {
            let corner = offset(origin, stride * r as f64, stride * c as f64);
            let Some(polygon) = ClosedLoop::close(square_loop(&corner, side_meters, 40.0)) else {
                continue;
            };
            let index = r * cols + c;
            let owner = owners.get(index % owners.len().max(1)).copied().unwrap_or("rival");
            territories.push(Territory::new(
                format!("territory_{:04}", index),
                owner,
                polygon,
                avg_pace,
            ));
        }
    }
    territories
}

// ============================================================================
// Tests
// ============================================================================
