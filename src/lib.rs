//! # Loop Claim
//!
//! Territory geometry and contest resolution for running-based location games.
//!
//! A player's GPS trace becomes a claim on ground territory. This library provides:
//! - Adaptive GPS ingest filtering (accuracy, interval, anomaly rejection)
//! - Closed loop extraction from raw traces
//! - Spherical polygon metrics (area, perimeter, pace)
//! - Robust polygon boolean operations (union, safe difference)
//! - Run plausibility validation (anti-cheat)
//! - Contest resolution (conquer / steal / reinforce / reject) with optimistic concurrency
//! - Deterministic reward and level calculation
//!
//! ## Features
//!
//! - **`parallel`** - Compute overlaps against many territories with rayon
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android), so the
//!   client pre-check links the exact same balance code as the server
//!
//! ## Quick Start
//!
//! ```rust
//! use loopclaim::{GpsPoint, geo_utils, loops::extract_loops};
//!
//! let trace = vec![
//!     GpsPoint::new(0.0, 0.0),
//!     GpsPoint::new(0.0, 0.001),
//!     GpsPoint::new(0.001, 0.001),
//!     GpsPoint::new(0.001, 0.0),
//!     GpsPoint::new(0.00001, 0.0),
//! ];
//!
//! let loops = extract_loops(&trace, 30.0);
//! assert_eq!(loops.len(), 1);
//! let area = geo_utils::polygon_area(loops[0].points());
//! assert!(area > 11_000.0);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{ClaimError, OptionExt, Result};

// Geographic utilities (distance, area, perimeter, pace, bounds)
pub mod geo_utils;

// Polygon boolean operations with typed fallbacks
pub mod polygon;
pub use polygon::{BooleanOutcome, DifferenceOutcome, safe_difference, union};

// Adaptive GPS ingest filter
pub mod gps_filter;
pub use gps_filter::{AdaptiveGpsFilter, DropReason, GpsFilterConfig, RecordResult};

// Closed loop extraction
pub mod loops;
pub use loops::{LoopConfig, extract_loops, extract_loops_indexed};

// Run plausibility validation
pub mod validation;
pub use validation::{ValidationConfig, ValidationError, ValidationReport, validate_run};

// Reward, level and pace tables
pub mod rewards;
pub use rewards::{LevelInfo, RewardConfig};

// Contest resolution against existing territories
pub mod contest;
pub use contest::{
    Challenger, ClaimAction, ClaimOutcome, ContestConfig, ContestResolver, LoopClaim,
    MemoryTerritoryStore, PointOfInterest, RejectReason, Territory, TerritoryStore, ThemeTag,
};

// End-to-end claim processing
pub mod claim;
pub use claim::{ChallengeBoard, ClaimProcessor, ClaimRequest, ClaimResponse, PlayerProfile};

// Offline claim queue contract
pub mod offline_queue;
pub use offline_queue::{OfflineQueue, OfflineRunEntry};

// Synthetic run generation for tests and benchmarks
pub mod synthetic;

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("LoopClaimRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS sample with latitude and longitude in degrees (WGS84, treated as a sphere).
///
/// Serialized with the short `lat`/`lng`/`timestamp` keys used by claim payloads.
///
/// # Example
/// ```
/// use loopclaim::GpsPoint;
/// let point = GpsPoint::new(40.4168, -3.7038); // Madrid
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GpsPoint {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lng")]
    pub longitude: f64,
    /// Reported horizontal accuracy in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Unix timestamp in milliseconds
    #[serde(default, rename = "timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
}

impl GpsPoint {
    /// Create a new GPS point without accuracy or timestamp.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            timestamp_ms: None,
        }
    }

    /// Create a new GPS point stamped with a unix time in milliseconds.
    pub fn at(latitude: f64, longitude: f64, timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms: Some(timestamp_ms),
            ..Self::new(latitude, longitude)
        }
    }

    /// Attach a reported accuracy in meters.
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// Exact coordinate equality, ignoring accuracy and timestamp.
    pub fn same_position(&self, other: &GpsPoint) -> bool {
        self.latitude.to_bits() == other.latitude.to_bits()
            && self.longitude.to_bits() == other.longitude.to_bits()
    }
}

/// Bounding box of a trace or polygon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
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

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// Check whether two boxes share any area or edge.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lng <= other.max_lng
            && self.max_lng >= other.min_lng
    }
}

/// An explicitly closed polygon ring.
///
/// The first vertex is always repeated as the last one and the ring holds at
/// least [`ClosedLoop::MIN_VERTICES`] vertices. A loop is never mutated after
/// creation; operations that change geometry produce a new loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<GpsPoint>", into = "Vec<GpsPoint>")]
pub struct ClosedLoop {
    points: Vec<GpsPoint>,
}

impl ClosedLoop {
    /// Minimum vertex count of a closed ring, closing vertex included.
    pub const MIN_VERTICES: usize = 4;

    /// Close a ring by duplicating its first vertex when needed.
    ///
    /// Returns `None` when the closed ring would have fewer than
    /// [`Self::MIN_VERTICES`] vertices.
    pub fn close(mut points: Vec<GpsPoint>) -> Option<Self> {
        let first = *points.first()?;
        let last = *points.last()?;
        if !first.same_position(&last) {
            points.push(first);
        }
        if points.len() < Self::MIN_VERTICES {
            return None;
        }
        Some(Self { points })
    }

    /// The ring's vertices, closing vertex included.
    pub fn points(&self) -> &[GpsPoint] {
        &self.points
    }

    /// Number of vertices, closing vertex included.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false for a constructed loop; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Bounding box of the ring.
    pub fn bounds(&self) -> Bounds {
        // A constructed loop always has vertices.
        Bounds::from_points(&self.points).unwrap_or(Bounds {
            min_lat: 0.0,
            max_lat: 0.0,
            min_lng: 0.0,
            max_lng: 0.0,
        })
    }

    /// Consume the loop and return its vertices.
    pub fn into_points(self) -> Vec<GpsPoint> {
        self.points
    }
}

impl TryFrom<Vec<GpsPoint>> for ClosedLoop {
    type Error = ClaimError;

    fn try_from(points: Vec<GpsPoint>) -> Result<Self> {
        let count = points.len();
        ClosedLoop::close(points).ok_or_insufficient_points(
            "polygon",
            count,
            ClosedLoop::MIN_VERTICES,
        )
    }
}

impl From<ClosedLoop> for Vec<GpsPoint> {
    fn from(closed: ClosedLoop) -> Self {
        closed.points
    }
}

/// Derived measurements of a claimed loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct PolygonMetrics {
    /// Spherical-excess area in square meters
    pub area: f64,
    /// Ring perimeter in meters
    pub perimeter: f64,
    /// Average pace of the run in minutes per kilometer
    pub avg_pace_min_per_km: f64,
}

impl PolygonMetrics {
    /// Measure a loop run over `distance` meters in `duration_seconds`.
    pub fn measure(polygon: &ClosedLoop, distance: f64, duration_seconds: f64) -> Self {
        Self {
            area: geo_utils::polygon_area(polygon.points()),
            perimeter: geo_utils::perimeter(polygon.points()),
            avg_pace_min_per_km: geo_utils::average_pace(distance, duration_seconds),
        }
    }
}

/// Where a claimed path came from.
///
/// Live runs must close within the live threshold, imported files get a looser
/// threshold to tolerate export jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum ClaimSource {
    #[default]
    Live,
    /// Manually drawn or simulated run, closed like a live one
    Manual,
    Import,
}

impl ClaimSource {
    /// Closure threshold in meters for a full path from this source.
    pub fn closure_threshold(&self, config: &LoopConfig) -> f64 {
        match self {
            ClaimSource::Live | ClaimSource::Manual => config.live_closure_meters,
            ClaimSource::Import => config.import_closure_meters,
        }
    }
}

// ============================================================================
// Balance Configuration
// ============================================================================

/// Every tunable game-balance constant, grouped by component.
///
/// Defaults reproduce the production balance table. Load overrides from JSON
/// with [`BalanceConfig::from_json_str`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    pub gps: GpsFilterConfig,
    pub loops: LoopConfig,
    pub validation: ValidationConfig,
    pub contest: ContestConfig,
    pub rewards: RewardConfig,
}

impl BalanceConfig {
    /// Parse a (possibly partial) JSON balance file and check it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: BalanceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        let thresholds = &self.rewards.level_thresholds;
        if thresholds.is_empty() {
            return Err(ClaimError::InvalidConfig(
                "level_thresholds must not be empty".to_string(),
            ));
        }
        if thresholds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ClaimError::InvalidConfig(
                "level_thresholds must be strictly increasing".to_string(),
            ));
        }
        if self.rewards.extra_level_points == 0 {
            return Err(ClaimError::InvalidConfig(
                "extra_level_points must be positive".to_string(),
            ));
        }
        if self.rewards.area_m2_per_point <= 0.0 {
            return Err(ClaimError::InvalidConfig(
                "area_m2_per_point must be positive".to_string(),
            ));
        }
        if self.loops.sub_loop_closure_meters <= 0.0
            || self.loops.live_closure_meters <= 0.0
            || self.loops.import_closure_meters <= 0.0
        {
            return Err(ClaimError::InvalidConfig(
                "closure thresholds must be positive".to_string(),
            ));
        }
        if self.gps.max_path_points < ClosedLoop::MIN_VERTICES {
            return Err(ClaimError::InvalidConfig(format!(
                "max_path_points must be at least {}",
                ClosedLoop::MIN_VERTICES
            )));
        }
        if self.contest.max_resolution_attempts == 0 {
            return Err(ClaimError::InvalidConfig(
                "max_resolution_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
