//! End-to-end claim processing.
//!
//! Takes a submitted run from raw path to committed ownership state:
//! sanitize and cap the path, find its loops, measure and validate each one,
//! resolve the valid ones against the territory store, then score the run,
//! complete any map challenges inside the claimed loops and report the
//! points of interest they enclose.

use std::collections::HashSet;
use std::sync::RwLock;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contest::{
    Challenger, ClaimAction, ClaimOutcome, ContestResolver, PointOfInterest, StealKind, StoreError,
    TerritoryStore, ThemeTag, theme_tags,
};
use crate::error::{ClaimError, OptionExt, Result};
use crate::geo_utils::{average_pace, closure_gap, is_closed, path_distance};
use crate::gps_filter::cap_path;
use crate::loops::extract_loops_with_config;
use crate::polygon::contains_point;
use crate::validation::{ValidationError, validate_run};
use crate::{BalanceConfig, ClaimSource, ClosedLoop, GpsPoint, LoopClaim};

/// A run submitted for claiming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub path: Vec<GpsPoint>,
    /// Seconds
    pub duration: f64,
    #[serde(default)]
    pub source: ClaimSource,
    #[serde(default)]
    pub is_public: bool,
}

/// The claimant as known to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    pub player_id: String,
    pub total_points: u64,
}

impl PlayerProfile {
    pub fn new(player_id: impl Into<String>, total_points: u64) -> Self {
        Self {
            player_id: player_id.into(),
            total_points,
        }
    }
}

/// A bonus location on the map, completed once per player by claiming a
/// loop around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapChallenge {
    pub id: String,
    pub name: String,
    pub location: GpsPoint,
    pub reward_points: u64,
}

/// Active map challenges and who completed them.
#[derive(Debug, Default)]
pub struct ChallengeBoard {
    challenges: Vec<MapChallenge>,
    completed: RwLock<HashSet<(String, String)>>,
}

impl ChallengeBoard {
    pub fn new(challenges: Vec<MapChallenge>) -> Self {
        Self {
            challenges,
            completed: RwLock::new(HashSet::new()),
        }
    }

    pub fn challenges(&self) -> &[MapChallenge] {
        &self.challenges
    }

    /// Complete every challenge inside `polygon` the player has not completed yet.
    pub fn complete_in(&self, polygon: &ClosedLoop, player_id: &str) -> Result<Vec<MapChallenge>> {
        let mut completed = self
            .completed
            .write()
            .map_err(|_| StoreError::Unavailable("challenge lock poisoned".to_string()))?;

        let newly: Vec<MapChallenge> = self
            .challenges
            .iter()
            .filter(|c| contains_point(polygon, &c.location))
            .filter(|c| completed.insert((c.id.clone(), player_id.to_string())))
            .cloned()
            .collect();

        for challenge in &newly {
            debug!(
                "[Claim] {} completed challenge {} (+{})",
                player_id, challenge.name, challenge.reward_points
            );
        }
        Ok(newly)
    }

    pub fn is_completed(&self, challenge_id: &str, player_id: &str) -> bool {
        self.completed.read().is_ok_and(|done| {
            done.contains(&(challenge_id.to_string(), player_id.to_string()))
        })
    }
}

/// A loop that failed validation and was left out of the claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedLoop {
    pub area: f64,
    pub errors: Vec<ValidationError>,
}

/// Loops of a run, measured and split by validity.
#[derive(Debug, Clone)]
pub struct MeasuredRun {
    pub valid: Vec<LoopClaim>,
    pub invalid: Vec<RejectedLoop>,
    /// Distance run along all loops in meters
    pub distance: f64,
}

impl MeasuredRun {
    pub fn valid_area(&self) -> f64 {
        self.valid.iter().map(LoopClaim::area).sum()
    }
}

/// Everything a processed claim produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReport {
    pub run_id: String,
    pub distance: f64,
    pub avg_pace: f64,
    pub outcomes: Vec<ClaimOutcome>,
    pub invalid_loops: Vec<RejectedLoop>,
    pub challenge_rewards: Vec<String>,
    /// Points of interest inside the loops that took or kept ground
    pub theme_tags: Vec<ThemeTag>,
    /// Claim rewards plus challenge rewards
    pub points_gained: u64,
}

impl ClaimReport {
    fn count(&self, action: ClaimAction) -> usize {
        self.outcomes.iter().filter(|o| o.action == action).count()
    }

    /// The headline action of the run: a steal beats a reinforcement beats a conquest.
    pub fn action(&self) -> ClaimAction {
        [ClaimAction::Stolen, ClaimAction::Reinforced, ClaimAction::Conquered]
            .into_iter()
            .find(|action| self.count(*action) > 0)
            .unwrap_or(ClaimAction::Rejected)
    }

    pub fn territories_conquered(&self) -> usize {
        self.count(ClaimAction::Conquered)
    }

    pub fn territories_stolen(&self) -> usize {
        self.count(ClaimAction::Stolen)
    }

    /// Defender territories deleted by annexation.
    pub fn territories_lost(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.steal, Some(StealKind::Annexed { .. })))
            .count()
    }
}

/// Payload of a successful claim response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimData {
    pub action: ClaimAction,
    pub territories_conquered: usize,
    pub territories_stolen: usize,
    pub territories_lost: usize,
    pub points_gained: u64,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub challenge_rewards: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub poi_tags: Vec<ThemeTag>,
}

/// Wire response of a claim submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ClaimData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ClaimReport> for ClaimResponse {
    fn from(report: &ClaimReport) -> Self {
        Self {
            success: true,
            data: Some(ClaimData {
                action: report.action(),
                territories_conquered: report.territories_conquered(),
                territories_stolen: report.territories_stolen(),
                territories_lost: report.territories_lost(),
                points_gained: report.points_gained,
                run_id: report.run_id.clone(),
                challenge_rewards: report.challenge_rewards.clone(),
                poi_tags: report.theme_tags.clone(),
            }),
            error: None,
        }
    }
}

impl ClaimResponse {
    pub fn failure(error: &ClaimError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }

    pub fn from_result(result: &Result<ClaimReport>) -> Self {
        match result {
            Ok(report) => report.into(),
            Err(error) => Self::failure(error),
        }
    }
}

/// Runs the full claim pipeline against a territory store.
#[derive(Debug, Default)]
pub struct ClaimProcessor {
    balance: BalanceConfig,
    resolver: ContestResolver,
    challenges: ChallengeBoard,
}

impl ClaimProcessor {
    pub fn new(balance: BalanceConfig) -> Self {
        Self {
            resolver: ContestResolver::from_balance(&balance),
            balance,
            challenges: ChallengeBoard::default(),
        }
    }

    pub fn with_challenges(mut self, challenges: ChallengeBoard) -> Self {
        self.challenges = challenges;
        self
    }

    /// Tag claimed territories with the points of interest inside them.
    pub fn with_pois(mut self, pois: Vec<PointOfInterest>) -> Self {
        self.resolver = self.resolver.with_pois(pois);
        self
    }

    pub fn balance(&self) -> &BalanceConfig {
        &self.balance
    }

    pub fn challenges(&self) -> &ChallengeBoard {
        &self.challenges
    }

    /// Find the claimable loops of a request's path.
    ///
    /// A path closing within its source's threshold is claimed whole;
    /// otherwise every self-closing sub-loop is claimed and the open tail
    /// is discarded.
    pub fn loops_for(&self, request: &ClaimRequest) -> Result<Vec<ClosedLoop>> {
        let path = self.prepare_path(&request.path)?;
        let threshold = request.source.closure_threshold(&self.balance.loops);

        let max_points = self.balance.gps.max_path_points;

        if is_closed(&path, threshold) {
            let count = path.len();
            return ClosedLoop::close(cap_path(&path, max_points))
                .ok_or_insufficient_points("path", count, ClosedLoop::MIN_VERTICES)
                .map(|whole| vec![whole]);
        }

        // Loops are found on the full path and capped one by one, so a long
        // run keeps every loop it closed
        let loops: Vec<ClosedLoop> = extract_loops_with_config(&path, &self.balance.loops)
            .into_iter()
            .filter_map(|l| {
                if l.len() > max_points {
                    ClosedLoop::close(cap_path(l.points(), max_points))
                } else {
                    Some(l)
                }
            })
            .collect();
        if loops.is_empty() {
            return Err(ClaimError::NotClosed {
                gap_meters: closure_gap(&path).unwrap_or(0.0),
                threshold_meters: threshold,
            });
        }
        Ok(loops)
    }

    /// Find, measure and validate the loops of a request for a player at
    /// `level`, without touching any territory.
    pub fn measure(&self, request: &ClaimRequest, level: u32) -> Result<MeasuredRun> {
        if !request.duration.is_finite() || request.duration <= 0.0 {
            return Err(ClaimError::InvalidDuration {
                duration: request.duration,
            });
        }

        let loops = self.loops_for(request)?;
        let total_distance: f64 = loops.iter().map(|l| path_distance(l.points())).sum();

        let mut run = MeasuredRun {
            valid: Vec::with_capacity(loops.len()),
            invalid: Vec::new(),
            distance: total_distance,
        };
        for polygon in loops {
            let distance = path_distance(polygon.points());
            // Loops share the run's duration in proportion to their length
            let duration = if total_distance > 0.0 {
                request.duration * distance / total_distance
            } else {
                request.duration
            };
            let claim = LoopClaim::new(polygon, distance, duration);

            // Closure was settled by `loops_for` on the raw path
            let report = validate_run(
                claim.polygon.points(),
                duration,
                claim.area(),
                level,
                &self.balance.validation,
                &self.balance.rewards,
            );
            if report.is_valid {
                run.valid.push(claim);
            } else {
                debug!(
                    "[Claim] Loop of {:.0} m² failed validation: {}",
                    claim.area(),
                    report.messages().join("; ")
                );
                run.invalid.push(RejectedLoop {
                    area: claim.area(),
                    errors: report.errors,
                });
            }
        }
        Ok(run)
    }

    /// Process a claim at time `now_ms`.
    pub fn process<S>(
        &self,
        store: &S,
        request: &ClaimRequest,
        player: &PlayerProfile,
        now_ms: i64,
    ) -> Result<ClaimReport>
    where
        S: TerritoryStore + ?Sized,
    {
        let level = self.balance.rewards.level(player.total_points);
        let challenger = Challenger::new(player.player_id.clone(), level);
        let MeasuredRun {
            valid,
            invalid: invalid_loops,
            distance: total_distance,
        } = self.measure(request, level)?;

        if valid.is_empty() {
            let errors = invalid_loops.into_iter().flat_map(|l| l.errors).collect();
            return Err(ClaimError::ValidationFailed(errors));
        }

        let mut outcomes = Vec::new();
        let mut challenge_rewards = Vec::new();
        let mut tags: Vec<ThemeTag> = Vec::new();
        let mut points_gained = 0;
        for claim in &valid {
            let loop_outcomes = self.resolver.resolve(store, claim, &challenger, now_ms)?;

            if loop_outcomes.iter().any(|o| o.action != ClaimAction::Rejected) {
                for challenge in self
                    .challenges
                    .complete_in(&claim.polygon, &player.player_id)?
                {
                    points_gained += challenge.reward_points;
                    challenge_rewards.push(challenge.name);
                }
                for tag in theme_tags(&claim.polygon, self.resolver.pois()) {
                    if !tags.contains(&tag) {
                        tags.push(tag);
                    }
                }
            }
            points_gained += loop_outcomes.iter().map(|o| o.points_gained).sum::<u64>();
            outcomes.extend(loop_outcomes);
        }

        if let Some(first) = outcomes.first()
            && outcomes.iter().all(|o| o.action == ClaimAction::Rejected)
            && let Some(reason) = first.reject_reason.clone()
        {
            warn!(
                "[Claim] Every loop of {} was rejected: {}",
                player.player_id, reason
            );
            return Err(ClaimError::Rejected(reason));
        }

        let report = ClaimReport {
            run_id: Uuid::now_v7().to_string(),
            distance: total_distance,
            avg_pace: average_pace(total_distance, request.duration),
            outcomes,
            invalid_loops,
            challenge_rewards,
            theme_tags: tags,
            points_gained,
        };

        info!(
            "[Claim] Run {} by {}: {:?}, {} conquered, {} stolen, +{} points",
            report.run_id,
            player.player_id,
            report.action(),
            report.territories_conquered(),
            report.territories_stolen(),
            report.points_gained
        );
        Ok(report)
    }

    /// Drop unusable samples.
    fn prepare_path(&self, path: &[GpsPoint]) -> Result<Vec<GpsPoint>> {
        let valid: Vec<GpsPoint> = path.iter().copied().filter(GpsPoint::is_valid).collect();
        if valid.len() < path.len() {
            debug!(
                "[Claim] Dropped {} invalid samples",
                path.len() - valid.len()
            );
        }
        if valid.len() < ClosedLoop::MIN_VERTICES {
            return Err(ClaimError::InsufficientPoints {
                context: "path".to_string(),
                point_count: valid.len(),
                minimum_required: ClosedLoop::MIN_VERTICES,
            });
        }
        Ok(valid)
    }
}
