//! Adaptive GPS ingest filter.
//!
//! Decides sample by sample which raw locations to keep during a live run.
//! Slow movement stretches the minimum interval between samples to save
//! battery, fast movement shortens it for precision, and implausible jumps
//! are discarded. Dropped samples are not errors: they are logged at debug
//! level and reported through [`DropReason`].

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::GpsPoint;
use crate::geo_utils::haversine_distance;

/// Thresholds of the adaptive filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsFilterConfig {
    /// Minimum movement to record a sample.
    /// Default: 5.0 meters
    pub min_distance_meters: f64,

    /// Base minimum interval between samples.
    /// Default: 2000 ms
    pub min_time_ms: i64,

    /// Floor for the shortened interval at high speed.
    /// Default: 1000 ms
    pub min_adaptive_time_ms: i64,

    /// Samples with a worse reported accuracy are discarded.
    /// Default: 25.0 meters
    pub max_accuracy_meters: f64,

    /// Speed pivot: below it the interval doubles, above 3x it the interval halves.
    /// Default: 2.0 m/s (brisk walk)
    pub adaptive_speed_threshold: f64,

    /// Speed above which a sample is a suspected jump.
    /// Default: 14.0 m/s (~50 km/h)
    pub anomaly_speed_mps: f64,

    /// A suspected jump is only dropped when the previous speed was below this.
    /// Default: 5.0 m/s
    pub anomaly_previous_speed_mps: f64,

    /// Maximum vertices kept in a finished trace.
    /// Default: 400
    pub max_path_points: usize,
}

impl Default for GpsFilterConfig {
    fn default() -> Self {
        Self {
            min_distance_meters: 5.0,
            min_time_ms: 2000,
            min_adaptive_time_ms: 1000,
            max_accuracy_meters: 25.0,
            adaptive_speed_threshold: 2.0,
            anomaly_speed_mps: 14.0,
            anomaly_previous_speed_mps: 5.0,
            max_path_points: 400,
        }
    }
}

/// Why a sample was not recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DropReason {
    InvalidCoordinates { latitude: f64, longitude: f64 },
    LowAccuracy { accuracy: f64, max: f64 },
    TooSoon { elapsed_ms: i64, required_ms: i64 },
    TooClose { distance: f64, min: f64 },
    AnomalousJump { speed_mps: f64 },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::InvalidCoordinates {
                latitude,
                longitude,
            } => write!(f, "invalid coordinates: ({latitude}, {longitude})"),
            DropReason::LowAccuracy { accuracy, max } => {
                write!(f, "low accuracy: {accuracy:.0}m > {max:.0}m")
            }
            DropReason::TooSoon {
                elapsed_ms,
                required_ms,
            } => write!(f, "too soon: {elapsed_ms}ms < {required_ms}ms"),
            DropReason::TooClose { distance, min } => {
                write!(f, "too close: {distance:.1}m < {min:.0}m")
            }
            DropReason::AnomalousJump { speed_mps } => {
                write!(f, "anomalous jump: {:.1} km/h", speed_mps * 3.6)
            }
        }
    }
}

/// Result of offering one sample to the filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordResult {
    pub recorded: bool,
    /// Distance added by this sample (0 when dropped)
    pub distance: f64,
    pub total_distance: f64,
    pub dropped: Option<DropReason>,
}

/// Snapshot of the filter state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterStats {
    pub points_count: usize,
    pub total_distance: f64,
    pub last_speed: f64,
    pub last_point: Option<GpsPoint>,
}

/// Stateful sample filter for one live run.
#[derive(Debug, Clone, Default)]
pub struct AdaptiveGpsFilter {
    config: GpsFilterConfig,
    last_point: Option<GpsPoint>,
    last_timestamp: i64,
    last_speed: f64,
    points: Vec<GpsPoint>,
    total_distance: f64,
}

impl AdaptiveGpsFilter {
    /// Create a filter with custom thresholds.
    pub fn new(config: GpsFilterConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &GpsFilterConfig {
        &self.config
    }

    /// Minimum interval required after moving at `speed` m/s.
    pub fn adaptive_interval_ms(&self, speed: f64) -> i64 {
        let base = self.config.min_time_ms;
        if speed < self.config.adaptive_speed_threshold {
            base * 2
        } else if speed > self.config.adaptive_speed_threshold * 3.0 {
            (base / 2).max(self.config.min_adaptive_time_ms)
        } else {
            base
        }
    }

    /// Decide whether a sample would be kept, without changing state.
    ///
    /// Returns the distance from the last kept sample on acceptance.
    pub fn evaluate(
        &self,
        point: &GpsPoint,
        accuracy: Option<f64>,
        timestamp_ms: i64,
    ) -> Result<f64, DropReason> {
        if !point.is_valid() {
            return Err(DropReason::InvalidCoordinates {
                latitude: point.latitude,
                longitude: point.longitude,
            });
        }

        if let Some(accuracy) = accuracy
            && accuracy > self.config.max_accuracy_meters
        {
            return Err(DropReason::LowAccuracy {
                accuracy,
                max: self.config.max_accuracy_meters,
            });
        }

        let Some(last) = self.last_point else {
            return Ok(0.0);
        };

        let elapsed_ms = timestamp_ms - self.last_timestamp;
        let distance = haversine_distance(&last, point);
        let speed = speed_mps(distance, elapsed_ms);

        let required_ms = self.adaptive_interval_ms(speed);
        if elapsed_ms < required_ms {
            return Err(DropReason::TooSoon {
                elapsed_ms,
                required_ms,
            });
        }

        if distance < self.config.min_distance_meters {
            return Err(DropReason::TooClose {
                distance,
                min: self.config.min_distance_meters,
            });
        }

        if speed > self.config.anomaly_speed_mps
            && self.last_speed < self.config.anomaly_previous_speed_mps
        {
            return Err(DropReason::AnomalousJump { speed_mps: speed });
        }

        Ok(distance)
    }

    /// Offer a sample; keeps it if it passes every rule.
    pub fn record_point(
        &mut self,
        point: GpsPoint,
        accuracy: Option<f64>,
        timestamp_ms: i64,
    ) -> RecordResult {
        let distance = match self.evaluate(&point, accuracy, timestamp_ms) {
            Ok(distance) => distance,
            Err(reason) => {
                debug!("[GpsFilter] Sample dropped: {}", reason);
                return RecordResult {
                    recorded: false,
                    distance: 0.0,
                    total_distance: self.total_distance,
                    dropped: Some(reason),
                };
            }
        };

        let speed = if self.last_point.is_some() {
            speed_mps(distance, timestamp_ms - self.last_timestamp)
        } else {
            0.0
        };

        let stored = GpsPoint {
            accuracy: accuracy.or(point.accuracy),
            timestamp_ms: Some(timestamp_ms),
            ..point
        };
        self.last_point = Some(stored);
        self.last_timestamp = timestamp_ms;
        self.last_speed = speed;
        self.points.push(stored);
        self.total_distance += distance;

        debug!(
            "[GpsFilter] Sample recorded: +{:.1}m at {:.1} km/h",
            distance,
            speed * 3.6
        );

        RecordResult {
            recorded: true,
            distance,
            total_distance: self.total_distance,
            dropped: None,
        }
    }

    /// Forget every recorded sample.
    pub fn reset(&mut self) {
        self.last_point = None;
        self.last_timestamp = 0;
        self.last_speed = 0.0;
        self.points.clear();
        self.total_distance = 0.0;
    }

    pub fn stats(&self) -> FilterStats {
        FilterStats {
            points_count: self.points.len(),
            total_distance: self.total_distance,
            last_speed: self.last_speed,
            last_point: self.last_point,
        }
    }

    /// Recorded samples in arrival order.
    pub fn points(&self) -> &[GpsPoint] {
        &self.points
    }

    /// Smoothed trace capped to `max_path_points`, ready for claiming.
    pub fn finish(&self) -> Vec<GpsPoint> {
        cap_path(&smooth_path(&self.points), self.config.max_path_points)
    }
}

fn speed_mps(distance: f64, elapsed_ms: i64) -> f64 {
    if elapsed_ms > 0 {
        distance / (elapsed_ms as f64 / 1000.0)
    } else {
        0.0
    }
}

/// Three-point moving average over interior vertices.
///
/// Endpoints are kept as recorded so closure is not affected. Timestamps and
/// accuracy of each vertex are preserved.
pub fn smooth_path(points: &[GpsPoint]) -> Vec<GpsPoint> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut smoothed = Vec::with_capacity(points.len());
    smoothed.push(points[0]);
    for w in points.windows(3) {
        smoothed.push(GpsPoint {
            latitude: (w[0].latitude + w[1].latitude + w[2].latitude) / 3.0,
            longitude: (w[0].longitude + w[1].longitude + w[2].longitude) / 3.0,
            ..w[1]
        });
    }
    smoothed.push(points[points.len() - 1]);
    smoothed
}

/// Uniformly sample a path down to `max_points`, always keeping both ends.
pub fn cap_path(points: &[GpsPoint], max_points: usize) -> Vec<GpsPoint> {
    if points.len() <= max_points || max_points < 2 {
        return points.to_vec();
    }

    let step = (points.len() - 1) as f64 / (max_points - 1) as f64;
    let mut capped: Vec<GpsPoint> = (0..max_points - 1)
        .map(|i| points[(i as f64 * step) as usize])
        .collect();
    capped.push(points[points.len() - 1]);
    capped
}
