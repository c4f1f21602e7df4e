//! Run plausibility validation (anti-cheat).
//!
//! A loop is only submitted for contest resolution if it looks like real
//! human effort. Every rule is checked and every violation is reported, so
//! callers can present a complete list; a loop is never partially accepted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geo_utils::{
    closure_gap, has_self_intersection, haversine_distance, path_distance, speed_between,
};
use crate::rewards::RewardConfig;
use crate::{ClaimSource, ClosedLoop, GpsPoint, LoopConfig};

/// Plausibility thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Minimum vertices including the closing vertex.
    /// Default: 4
    pub min_vertices: usize,

    /// Runs shorter than this are treated as instant.
    /// Default: 60 seconds
    pub min_duration_seconds: f64,

    /// Ceiling for speed between consecutive timestamped samples and for
    /// the loop's average speed.
    /// Default: 14.0 m/s (~50 km/h, a fast bike)
    pub max_speed_mps: f64,

    /// Longest allowed gap between consecutive vertices when the pair
    /// carries no usable timestamps. Timed pairs are judged by speed.
    /// Default: 100.0 meters
    pub max_segment_meters: f64,

    /// Speed of a suspected jump between timestamped samples.
    /// Default: 14.0 m/s
    pub jump_speed_mps: f64,

    /// A suspected jump counts when the previous segment was slower than this.
    /// Default: 5.0 m/s
    pub jump_previous_speed_mps: f64,

    /// Global minimum territory area.
    /// Default: 10,000 m²
    pub min_area_m2: f64,

    /// Reject loops whose ring crosses itself instead of measuring them.
    /// Default: false
    pub reject_self_intersecting: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_vertices: ClosedLoop::MIN_VERTICES,
            min_duration_seconds: 60.0,
            max_speed_mps: 14.0,
            max_segment_meters: 100.0,
            jump_speed_mps: 14.0,
            jump_previous_speed_mps: 5.0,
            min_area_m2: 10_000.0,
            reject_self_intersecting: false,
        }
    }
}

/// One violated plausibility rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "camelCase")]
pub enum ValidationError {
    TooFewPoints { count: usize, min: usize },
    InvalidDuration { duration: f64 },
    TooShort { duration: f64, min: f64 },
    SpeedTooHigh { speed_mps: f64, max_mps: f64 },
    AverageSpeedTooHigh { speed_mps: f64, max_mps: f64 },
    GpsJump { index: usize, distance: f64 },
    AreaTooSmall { area: f64, min: f64 },
    AreaTooLarge { area: f64, max: f64 },
    NotClosed { gap: f64, threshold: f64 },
    SelfIntersecting,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::TooFewPoints { count, min } => {
                write!(f, "route has {count} points, at least {min} required")
            }
            ValidationError::InvalidDuration { duration } => {
                write!(f, "invalid duration {duration}s")
            }
            ValidationError::TooShort { duration, min } => {
                write!(f, "run lasted {duration:.0}s, at least {min:.0}s required")
            }
            ValidationError::SpeedTooHigh { speed_mps, max_mps } => write!(
                f,
                "speed {:.1} km/h exceeds {:.1} km/h",
                speed_mps * 3.6,
                max_mps * 3.6
            ),
            ValidationError::AverageSpeedTooHigh { speed_mps, max_mps } => write!(
                f,
                "average speed {:.1} km/h exceeds {:.1} km/h",
                speed_mps * 3.6,
                max_mps * 3.6
            ),
            ValidationError::GpsJump { index, distance } => {
                write!(f, "GPS jump of {distance:.0}m at point {index}")
            }
            ValidationError::AreaTooSmall { area, min } => {
                write!(f, "area {area:.0} m² is below the minimum {min:.0} m²")
            }
            ValidationError::AreaTooLarge { area, max } => {
                write!(f, "area {area:.0} m² exceeds your limit of {max:.0} m²")
            }
            ValidationError::NotClosed { gap, threshold } => write!(
                f,
                "route ends {gap:.0}m from its start, must close within {threshold:.0}m"
            ),
            ValidationError::SelfIntersecting => write!(f, "route crosses itself"),
        }
    }
}

/// Result of validating a loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    /// Human readable messages, one per violated rule.
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

/// Validate a loop run in `duration_seconds` with measured `area` by a
/// player at `level`.
pub fn validate_run(
    points: &[GpsPoint],
    duration_seconds: f64,
    area: f64,
    level: u32,
    config: &ValidationConfig,
    rewards: &RewardConfig,
) -> ValidationReport {
    ValidationReport::from_errors(collect_errors(
        points,
        duration_seconds,
        area,
        level,
        config,
        rewards,
    ))
}

/// [`validate_run`] plus the closure rule of the path's source, for a raw
/// path that has not been closed yet. A [`ClosedLoop`] always passes the
/// closure rule, so closed loops go through [`validate_run`].
///
/// Imports close within a looser threshold than live runs. The
/// same-calendar-week rule for imports is the caller's concern.
#[allow(clippy::too_many_arguments)]
pub fn validate_for_source(
    points: &[GpsPoint],
    duration_seconds: f64,
    area: f64,
    level: u32,
    source: ClaimSource,
    loops: &LoopConfig,
    config: &ValidationConfig,
    rewards: &RewardConfig,
) -> ValidationReport {
    let mut errors = collect_errors(points, duration_seconds, area, level, config, rewards);

    let threshold = source.closure_threshold(loops);
    if let Some(gap) = closure_gap(points)
        && gap > threshold
    {
        errors.push(ValidationError::NotClosed { gap, threshold });
    }

    ValidationReport::from_errors(errors)
}

fn collect_errors(
    points: &[GpsPoint],
    duration_seconds: f64,
    area: f64,
    level: u32,
    config: &ValidationConfig,
    rewards: &RewardConfig,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if points.len() < config.min_vertices {
        errors.push(ValidationError::TooFewPoints {
            count: points.len(),
            min: config.min_vertices,
        });
    }

    if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
        errors.push(ValidationError::InvalidDuration {
            duration: duration_seconds,
        });
    } else {
        if duration_seconds < config.min_duration_seconds {
            errors.push(ValidationError::TooShort {
                duration: duration_seconds,
                min: config.min_duration_seconds,
            });
        }
        let average = path_distance(points) / duration_seconds;
        if average > config.max_speed_mps {
            errors.push(ValidationError::AverageSpeedTooHigh {
                speed_mps: average,
                max_mps: config.max_speed_mps,
            });
        }
    }

    if let Some(speed) = max_segment_speed(points)
        && speed > config.max_speed_mps
    {
        errors.push(ValidationError::SpeedTooHigh {
            speed_mps: speed,
            max_mps: config.max_speed_mps,
        });
    }

    if let Some((index, distance)) = first_jump(points, config) {
        errors.push(ValidationError::GpsJump { index, distance });
    }

    if area < config.min_area_m2 {
        errors.push(ValidationError::AreaTooSmall {
            area,
            min: config.min_area_m2,
        });
    }

    let max_area = rewards.max_area_for_level(level);
    if area > max_area {
        errors.push(ValidationError::AreaTooLarge {
            area,
            max: max_area,
        });
    }

    if config.reject_self_intersecting && has_self_intersection(points) {
        errors.push(ValidationError::SelfIntersecting);
    }

    errors
}

/// Fastest speed between consecutive timestamped samples.
fn max_segment_speed(points: &[GpsPoint]) -> Option<f64> {
    points
        .windows(2)
        .filter_map(|w| speed_between(&w[0], &w[1]))
        .max_by(f64::total_cmp)
}

/// First implausible jump.
///
/// A timed segment is a jump when it bursts above the jump speed right after
/// slow movement, the same rule the live filter applies. A segment without
/// usable timestamps (missing, equal or out of order, like the closing
/// vertex of a loop) falls back to the distance limit.
fn first_jump(points: &[GpsPoint], config: &ValidationConfig) -> Option<(usize, f64)> {
    let mut previous_speed: Option<f64> = None;

    for (i, w) in points.windows(2).enumerate() {
        let distance = haversine_distance(&w[0], &w[1]);
        match speed_between(&w[0], &w[1]) {
            Some(speed) => {
                if let Some(previous) = previous_speed
                    && speed > config.jump_speed_mps
                    && previous < config.jump_previous_speed_mps
                {
                    return Some((i + 1, distance));
                }
                previous_speed = Some(speed);
            }
            None => {
                if distance > config.max_segment_meters {
                    return Some((i + 1, distance));
                }
                previous_speed = None;
            }
        }
    }
    None
}
