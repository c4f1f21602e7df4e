//! Reward, level and pace tables.
//!
//! These functions are pure and deterministic: the client pre-check and the
//! authoritative resolution must compute exactly the same numbers.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// One row of the defense bonus table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DefenseTier {
    /// Lowest level this tier applies to
    pub min_level: u32,
    /// Minutes per km subtracted from the incumbent pace
    pub bonus_minutes: f64,
}

/// Scoring coefficients and progression tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Points per kilometer run.
    /// Default: 10
    pub points_per_km: f64,

    /// Square meters per area point.
    /// Default: 2000
    pub area_m2_per_point: f64,

    /// Flat bonus for conquering unclaimed ground.
    /// Default: 50
    pub conquer_bonus: u64,

    /// Flat bonus for stealing ground.
    /// Default: 75
    pub steal_bonus: u64,

    /// Total points needed for each level, level 1 first.
    pub level_thresholds: Vec<u64>,

    /// Points per level beyond the table.
    /// Default: 3000
    pub extra_level_points: u64,

    /// Maximum claimable area, independent of level.
    /// Default: 5,000,000 m²
    pub max_area_m2: f64,

    /// Defense bonus tiers, checked from the highest `min_level` down.
    pub defense_tiers: Vec<DefenseTier>,

    /// Bonus below every tier.
    /// Default: 0.5 min/km
    pub base_defense_bonus: f64,

    /// Fastest pace ever required to steal.
    /// Default: 2.5 min/km
    pub min_required_pace: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            points_per_km: 10.0,
            area_m2_per_point: 2000.0,
            conquer_bonus: 50,
            steal_bonus: 75,
            level_thresholds: vec![
                0, 100, 250, 500, 850, 1300, 1900, 2600, 3400, 4300, 5300, 6500, 7900, 9500,
                11300, 13300, 15500, 18000, 20800, 24000,
            ],
            extra_level_points: 3000,
            max_area_m2: 5_000_000.0,
            defense_tiers: vec![
                DefenseTier {
                    min_level: 11,
                    bonus_minutes: 1.0,
                },
                DefenseTier {
                    min_level: 6,
                    bonus_minutes: 0.75,
                },
            ],
            base_defense_bonus: 0.5,
            min_required_pace: 2.5,
        }
    }
}

/// Progress of a player within their level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct LevelInfo {
    pub level: u32,
    pub current_level_points: u64,
    pub next_level_points: u64,
    pub progress_percentage: f64,
    pub points_to_next_level: u64,
}

impl RewardConfig {
    /// Points for a claim covering `distance` meters and `area` m².
    pub fn reward_points(&self, distance: f64, area: f64, is_steal: bool) -> u64 {
        let distance_points = (distance / 1000.0 * self.points_per_km).round().max(0.0) as u64;
        let area_points = (area / self.area_m2_per_point).floor().max(0.0) as u64;
        let action_points = if is_steal {
            self.steal_bonus
        } else {
            self.conquer_bonus
        };
        distance_points + area_points + action_points
    }

    /// Level reached with `total_points`.
    pub fn level(&self, total_points: u64) -> u32 {
        self.level_info(total_points).level
    }

    /// Level plus progress towards the next one.
    pub fn level_info(&self, total_points: u64) -> LevelInfo {
        let table = &self.level_thresholds;
        let reached = table.iter().take_while(|&&t| total_points >= t).count();
        let level = reached.max(1);
        let current = table.get(level - 1).copied().unwrap_or(0);

        let (level, current, next) = if level >= table.len() {
            let last = table.last().copied().unwrap_or(0);
            let step = self.extra_level_points.max(1);
            let extra = total_points.saturating_sub(last) / step;
            let floor = last + extra * step;
            (table.len() as u64 + extra, floor, floor + step)
        } else {
            (level as u64, current, table[level])
        };

        let span = next.saturating_sub(current).max(1);
        let progress = (total_points.saturating_sub(current) as f64 / span as f64 * 100.0).min(100.0);

        LevelInfo {
            level: u32::try_from(level).unwrap_or(u32::MAX),
            current_level_points: current,
            next_level_points: next,
            progress_percentage: progress,
            points_to_next_level: next.saturating_sub(total_points),
        }
    }

    /// Maximum claimable area for a level.
    ///
    /// Flat across levels in the current balance table.
    pub fn max_area_for_level(&self, _level: u32) -> f64 {
        self.max_area_m2
    }

    /// Minutes per km of pace advantage granted at `level`.
    pub fn defense_bonus_minutes(&self, level: u32) -> f64 {
        self.defense_tiers
            .iter()
            .filter(|tier| level >= tier.min_level)
            .max_by_key(|tier| tier.min_level)
            .map_or(self.base_defense_bonus, |tier| tier.bonus_minutes)
    }

    /// Pace (min/km) a challenger must match or beat to steal a territory
    /// held at `territory_pace`.
    pub fn required_pace(&self, territory_pace: f64, level: u32) -> f64 {
        (territory_pace - self.defense_bonus_minutes(level)).max(self.min_required_pace)
    }
}

static DEFAULT_REWARDS: Lazy<RewardConfig> = Lazy::new(RewardConfig::default);

/// [`RewardConfig::reward_points`] with the default table.
pub fn reward_points(distance: f64, area: f64, is_steal: bool) -> u64 {
    DEFAULT_REWARDS.reward_points(distance, area, is_steal)
}

/// [`RewardConfig::level`] with the default table.
pub fn calculate_level(total_points: u64) -> u32 {
    DEFAULT_REWARDS.level(total_points)
}

/// [`RewardConfig::level_info`] with the default table.
pub fn level_info(total_points: u64) -> LevelInfo {
    DEFAULT_REWARDS.level_info(total_points)
}

/// [`RewardConfig::max_area_for_level`] with the default table.
pub fn max_area_for_level(level: u32) -> f64 {
    DEFAULT_REWARDS.max_area_for_level(level)
}

/// [`RewardConfig::defense_bonus_minutes`] with the default table.
pub fn defense_bonus_minutes(level: u32) -> f64 {
    DEFAULT_REWARDS.defense_bonus_minutes(level)
}

/// [`RewardConfig::required_pace`] with the default table.
pub fn required_pace(territory_pace: f64, level: u32) -> f64 {
    DEFAULT_REWARDS.required_pace(territory_pace, level)
}

/// Rank name shown for a level.
pub fn level_title(level: u32) -> &'static str {
    match level {
        20.. => "Legend",
        17..=19 => "Elite",
        14..=16 => "Veteran",
        11..=13 => "Expert",
        8..=10 => "Athlete",
        5..=7 => "Explorer",
        _ => "Rookie",
    }
}
