//! # Contest Resolution
//!
//! Decides what a claimed loop does to the territories it overlaps and
//! produces the new ownership state.
//!
//! ## Architecture
//!
//! - `ContestResolver` - Conquer / steal / reinforce / reject decisions with retry
//! - `TerritoryStore` - Versioned snapshot reads and atomic commits
//! - `MemoryTerritoryStore` - In-memory store behind a read-write lock
//! - `TerritoryIndex` - R-tree over territory bounding boxes
//! - `PointOfInterest` - Map features that tag the territories around them
//!
//! Every overlapping territory is resolved independently, and all writes of
//! one resolution are committed together so concurrent claims on the same
//! territory serialize.

pub mod resolver;
pub mod spatial_index;
pub mod store;

pub use resolver::ContestResolver;
pub use spatial_index::{TerritoryBounds, TerritoryIndex};
pub use store::{AttemptStamp, ChangeSet, MemoryTerritoryStore, StoreError, TerritoryStore};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geo_utils::{perimeter, polygon_area};
use crate::polygon::contains_point;
use crate::{Bounds, ClosedLoop, GpsPoint, PolygonMetrics};

const HOUR_MS: i64 = 60 * 60 * 1000;

/// Timing and overlap rules of contests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContestConfig {
    /// Protection granted after a conquest, steal or reinforcement.
    /// Default: 24 hours
    pub protection_ms: i64,

    /// Cooldown on a territory after it was conquered or stolen from.
    /// Default: 6 hours
    pub steal_cooldown_ms: i64,

    /// Minimum time between two attempts of the same attacker on a territory.
    /// Default: 6 hours
    pub attacker_cooldown_ms: i64,

    /// Overlap below this area is treated as touching, not overlapping.
    /// Default: 1.0 m²
    pub min_overlap_area_m2: f64,

    /// Fraction of a territory that must be covered to contest it.
    /// Default: 0.0 (any overlap)
    pub min_overlap_ratio: f64,

    /// Resolution attempts before a conflict is reported to the caller.
    /// Default: 3
    pub max_resolution_attempts: u32,
}

impl Default for ContestConfig {
    fn default() -> Self {
        Self {
            protection_ms: 24 * HOUR_MS,
            steal_cooldown_ms: 6 * HOUR_MS,
            attacker_cooldown_ms: 6 * HOUR_MS,
            min_overlap_area_m2: 1.0,
            min_overlap_ratio: 0.0,
            max_resolution_attempts: 3,
        }
    }
}

/// A claimed area owned by one player.
///
/// Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Territory {
    pub id: String,
    pub owner_id: String,
    pub polygon: ClosedLoop,
    /// Square meters
    pub area: f64,
    /// Meters
    pub perimeter: f64,
    /// Pace of the run that last took or reinforced it, min/km
    pub avg_pace: f64,
    /// Pace a challenger must match or beat, as computed when it was taken
    #[serde(default)]
    pub required_pace: f64,
    /// Points awarded when it was taken
    #[serde(default)]
    pub conquest_points: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected_until: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<i64>,
    #[serde(default)]
    pub shield_active: bool,
    /// End of the shield; an active shield without expiry lasts until removed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shield_expires: Option<i64>,
    /// Themes of the points of interest inside the territory
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub theme_tags: Vec<ThemeTag>,
    /// Bumped by the store on every committed update
    #[serde(default)]
    pub version: u64,
}

impl Territory {
    /// A fresh territory measured from its polygon.
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        polygon: ClosedLoop,
        avg_pace: f64,
    ) -> Self {
        let area = polygon_area(polygon.points());
        let perimeter = perimeter(polygon.points());
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            polygon,
            area,
            perimeter,
            avg_pace,
            required_pace: 0.0,
            conquest_points: 0,
            protected_until: None,
            cooldown_until: None,
            shield_active: false,
            shield_expires: None,
            theme_tags: Vec::new(),
            version: 0,
        }
    }

    /// Replace the polygon and re-measure it.
    pub fn reshape(&mut self, polygon: ClosedLoop) {
        self.area = polygon_area(polygon.points());
        self.perimeter = perimeter(polygon.points());
        self.polygon = polygon;
    }

    pub fn is_shielded(&self, now_ms: i64) -> bool {
        self.shield_active && self.shield_expires.is_none_or(|expires| now_ms < expires)
    }

    pub fn is_protected(&self, now_ms: i64) -> bool {
        self.protected_until.is_some_and(|until| now_ms < until)
    }

    pub fn in_cooldown(&self, now_ms: i64) -> bool {
        self.cooldown_until.is_some_and(|until| now_ms < until)
    }

    pub fn bounds(&self) -> Bounds {
        self.polygon.bounds()
    }

    /// Names of the tagged points of interest, comma separated.
    pub fn poi_summary(&self) -> Option<String> {
        if self.theme_tags.is_empty() {
            return None;
        }
        let names: Vec<&str> = self.theme_tags.iter().map(|t| t.name.as_str()).collect();
        Some(names.join(", "))
    }
}

/// A named map feature (park, monument, stadium...) that lends its theme to
/// the territory around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointOfInterest {
    pub id: String,
    pub name: String,
    pub category: String,
    pub location: GpsPoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeTag {
    pub category: String,
    pub name: String,
}

impl From<&PointOfInterest> for ThemeTag {
    fn from(poi: &PointOfInterest) -> Self {
        Self {
            category: poi.category.clone(),
            name: poi.name.clone(),
        }
    }
}

/// Tags of every point of interest inside `polygon`, in the order given.
pub fn theme_tags(polygon: &ClosedLoop, pois: &[PointOfInterest]) -> Vec<ThemeTag> {
    pois.iter()
        .filter(|poi| contains_point(polygon, &poi.location))
        .map(ThemeTag::from)
        .collect()
}

/// The player submitting a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenger {
    pub player_id: String,
    pub level: u32,
}

impl Challenger {
    pub fn new(player_id: impl Into<String>, level: u32) -> Self {
        Self {
            player_id: player_id.into(),
            level,
        }
    }
}

/// One loop of a run, measured and ready for resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopClaim {
    pub polygon: ClosedLoop,
    pub metrics: PolygonMetrics,
    /// Distance run along the loop in meters
    pub distance: f64,
}

impl LoopClaim {
    /// Measure a loop run over `distance` meters in `duration_seconds`.
    pub fn new(polygon: ClosedLoop, distance: f64, duration_seconds: f64) -> Self {
        let metrics = PolygonMetrics::measure(&polygon, distance, duration_seconds);
        Self {
            polygon,
            metrics,
            distance,
        }
    }

    pub fn area(&self) -> f64 {
        self.metrics.area
    }

    pub fn pace(&self) -> f64 {
        self.metrics.avg_pace_min_per_km
    }
}

/// Terminal result of resolving a loop against one territory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimAction {
    Conquered,
    Stolen,
    Reinforced,
    Rejected,
}

/// Why an attack was blocked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum RejectReason {
    Shielded,
    Protected { until_ms: i64 },
    Cooldown { until_ms: i64 },
    AttackerCooldown { retry_at_ms: i64 },
    PaceTooSlow { required: f64, actual: f64 },
    /// The loop lies inside the territory without reaching its edge.
    Enclosed,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Shielded => write!(f, "territory is shielded"),
            RejectReason::Protected { .. } => write!(f, "territory is temporarily protected"),
            RejectReason::Cooldown { .. } => write!(f, "territory is cooling down after a steal"),
            RejectReason::AttackerCooldown { .. } => {
                write!(f, "wait before attacking this territory again")
            }
            RejectReason::PaceTooSlow { required, actual } => write!(
                f,
                "a pace of {required:.2} min/km or faster is required, ran {actual:.2} min/km"
            ),
            RejectReason::Enclosed => {
                write!(f, "the loop must reach the territory's edge to take ground")
            }
        }
    }
}

/// Why a successful steal took the whole territory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "camelCase")]
pub enum AnnexCause {
    /// The loop covers the territory entirely.
    Covered,
    /// The remainder would be smaller than the minimum territory area.
    RemainderBelowMinimum { area: f64 },
    /// The subtraction left nothing.
    Consumed,
    /// The subtraction failed even after repair.
    DifferenceFailed,
}

/// How much of a territory a successful steal took.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StealKind {
    /// The defender keeps the untouched remainder.
    Partial { remaining_area: f64, repaired: bool },
    /// The defender's territory is deleted.
    Annexed { cause: AnnexCause },
}

/// Outcome of a loop against one territory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
    pub action: ClaimAction,
    /// Territory the decision was about (the new one for a conquest)
    pub territory_id: String,
    /// Territory the claimant holds afterwards, if any
    pub claimed_territory_id: Option<String>,
    pub defender_id: Option<String>,
    /// Square meters gained by the claimant
    pub area_delta: f64,
    pub points_gained: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steal: Option<StealKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Conquest,
    Steal,
    Reinforce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventResult {
    Success,
    Failed,
    Neutral,
}

/// Entry of the territory history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerritoryEvent {
    pub territory_id: String,
    pub attacker_id: String,
    pub defender_id: Option<String>,
    pub kind: EventKind,
    pub result: EventResult,
    /// Overlapped fraction of the territory, 1.0 for conquests
    pub overlap_ratio: f64,
    pub pace: f64,
    pub area: f64,
    pub points_awarded: u64,
    pub created_at_ms: i64,
}
