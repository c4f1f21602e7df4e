//! FFI bindings for mobile platforms (iOS/Android).
//!
//! The client pre-check links these instead of reimplementing the balance
//! rules, so its numbers match the authoritative resolution exactly. All
//! FFI functions are prefixed with `ffi_` to avoid naming conflicts with the
//! internal API.

use log::{debug, info};

use crate::claim::{ClaimProcessor, ClaimRequest};
use crate::geo_utils;
use crate::offline_queue::backoff_ms;
use crate::rewards::{self, LevelInfo};
use crate::{ClaimSource, GpsPoint, PolygonMetrics, init_logging};

// ============================================================================
// Geometry
// ============================================================================

/// Great-circle distance between two points in meters.
#[uniffi::export]
pub fn ffi_distance(a: GpsPoint, b: GpsPoint) -> f64 {
    geo_utils::haversine_distance(&a, &b)
}

/// Sum of consecutive distances along a path in meters.
#[uniffi::export]
pub fn ffi_path_distance(points: Vec<GpsPoint>) -> f64 {
    geo_utils::path_distance(&points)
}

#[uniffi::export]
pub fn ffi_is_closed(points: Vec<GpsPoint>, threshold_meters: f64) -> bool {
    geo_utils::is_closed(&points, threshold_meters)
}

/// Area, perimeter and pace of a closed path.
#[uniffi::export]
pub fn ffi_polygon_metrics(
    points: Vec<GpsPoint>,
    distance_meters: f64,
    duration_seconds: f64,
) -> PolygonMetrics {
    PolygonMetrics {
        area: geo_utils::polygon_area(&points),
        perimeter: geo_utils::perimeter(&points),
        avg_pace_min_per_km: geo_utils::average_pace(distance_meters, duration_seconds),
    }
}

/// Closed sub-loops of a trace, each explicitly closed.
#[uniffi::export]
pub fn ffi_extract_loops(points: Vec<GpsPoint>) -> Vec<Vec<GpsPoint>> {
    init_logging();
    let loops = crate::loops::extract_loops_with_config(&points, &Default::default());
    debug!(
        "[LoopClaimRust] Extracted {} loops from {} points",
        loops.len(),
        points.len()
    );
    loops.into_iter().map(|l| l.into_points()).collect()
}

// ============================================================================
// Claim Pre-check
// ============================================================================

/// Local verdict on a run before it is submitted.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPrecheck {
    pub is_valid: bool,
    pub loop_count: u32,
    pub area: f64,
    pub distance: f64,
    pub avg_pace: f64,
    pub errors: Vec<String>,
}

/// Run the same loop detection and validation the server will.
#[uniffi::export]
pub fn ffi_precheck_claim(
    path: Vec<GpsPoint>,
    duration_seconds: f64,
    source: ClaimSource,
    total_points: u64,
) -> FfiPrecheck {
    init_logging();
    let processor = ClaimProcessor::default();
    let level = processor.balance().rewards.level(total_points);
    let request = ClaimRequest {
        path,
        duration: duration_seconds,
        source,
        is_public: false,
    };

    let run = match processor.measure(&request, level) {
        Ok(run) => run,
        Err(e) => {
            return FfiPrecheck {
                is_valid: false,
                loop_count: 0,
                area: 0.0,
                distance: 0.0,
                avg_pace: 0.0,
                errors: vec![e.to_string()],
            };
        }
    };

    let errors: Vec<String> = run
        .invalid
        .iter()
        .flat_map(|l| l.errors.iter().map(ToString::to_string))
        .collect();
    info!(
        "[LoopClaimRust] Pre-check: {} valid loops, {:.0} m², {} errors",
        run.valid.len(),
        run.valid_area(),
        errors.len()
    );

    FfiPrecheck {
        is_valid: !run.valid.is_empty(),
        loop_count: run.valid.len() as u32,
        area: run.valid_area(),
        distance: run.distance,
        avg_pace: geo_utils::average_pace(run.distance, duration_seconds),
        errors,
    }
}

// ============================================================================
// Rewards
// ============================================================================

#[uniffi::export]
pub fn ffi_reward_points(distance_meters: f64, area: f64, is_steal: bool) -> u64 {
    rewards::reward_points(distance_meters, area, is_steal)
}

#[uniffi::export]
pub fn ffi_calculate_level(total_points: u64) -> u32 {
    rewards::calculate_level(total_points)
}

#[uniffi::export]
pub fn ffi_level_info(total_points: u64) -> LevelInfo {
    rewards::level_info(total_points)
}

#[uniffi::export]
pub fn ffi_level_title(level: u32) -> String {
    rewards::level_title(level).to_string()
}

#[uniffi::export]
pub fn ffi_required_pace(territory_pace: f64, level: u32) -> f64 {
    rewards::required_pace(territory_pace, level)
}

#[uniffi::export]
pub fn ffi_max_area_for_level(level: u32) -> f64 {
    rewards::max_area_for_level(level)
}

/// Delay in ms before retrying a queued claim after `attempts` failures.
#[uniffi::export]
pub fn ffi_offline_backoff_ms(attempts: u32) -> i64 {
    backoff_ms(attempts)
}
