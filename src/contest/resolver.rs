//! Contest resolution against existing territories.

use log::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ClaimError, Result};
use crate::polygon::{self, DifferenceOutcome};
use crate::rewards::RewardConfig;
use crate::{BalanceConfig, ClosedLoop, ValidationConfig};

use super::store::{AttemptStamp, ChangeSet, StoreError, TerritoryStore};
use super::{
    AnnexCause, Challenger, ClaimAction, ClaimOutcome, ContestConfig, EventKind, EventResult,
    LoopClaim, PointOfInterest, RejectReason, StealKind, Territory, TerritoryEvent, theme_tags,
};

/// What a steal leaves the defender: a remainder (polygon, area, repaired)
/// or the reason the whole territory is annexed.
type Cut = std::result::Result<(ClosedLoop, f64, bool), AnnexCause>;

/// A territory the claimed loop overlaps.
#[derive(Debug, Clone)]
struct Overlap {
    territory: Territory,
    area: f64,
    ratio: f64,
}

/// Resolves claimed loops against a [`TerritoryStore`].
///
/// The resolver holds only configuration; all state lives in the store, so
/// one resolver can be shared across threads.
#[derive(Debug, Clone)]
pub struct ContestResolver {
    config: ContestConfig,
    rewards: RewardConfig,
    minimum_area: f64,
    pois: Vec<PointOfInterest>,
}

impl Default for ContestResolver {
    fn default() -> Self {
        Self::new(
            ContestConfig::default(),
            RewardConfig::default(),
            ValidationConfig::default().min_area_m2,
        )
    }
}

impl ContestResolver {
    /// Create a resolver. Partially stolen territories whose remainder is
    /// below `minimum_area` are annexed whole.
    pub fn new(config: ContestConfig, rewards: RewardConfig, minimum_area: f64) -> Self {
        Self {
            config,
            rewards,
            minimum_area,
            pois: Vec::new(),
        }
    }

    /// Tag every territory the resolver writes with the points of interest
    /// inside it. Without points of interest existing tags are left alone.
    pub fn with_pois(mut self, pois: Vec<PointOfInterest>) -> Self {
        self.pois = pois;
        self
    }

    pub fn pois(&self) -> &[PointOfInterest] {
        &self.pois
    }

    /// Create a resolver from a full balance configuration.
    pub fn from_balance(balance: &BalanceConfig) -> Self {
        Self::new(
            balance.contest.clone(),
            balance.rewards.clone(),
            balance.validation.min_area_m2,
        )
    }

    pub fn config(&self) -> &ContestConfig {
        &self.config
    }

    /// Resolve one loop at time `now_ms`, committing the new ownership state.
    ///
    /// Concurrent modifications of the territories involved are retried
    /// against fresh state; after `max_resolution_attempts` the claim fails
    /// with [`ClaimError::TerritoryChanged`].
    pub fn resolve<S>(
        &self,
        store: &S,
        claim: &LoopClaim,
        challenger: &Challenger,
        now_ms: i64,
    ) -> Result<Vec<ClaimOutcome>>
    where
        S: TerritoryStore + ?Sized,
    {
        let max_attempts = self.config.max_resolution_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let (outcomes, changes) = self.plan(store, claim, challenger, now_ms)?;

            match store.commit(changes) {
                Ok(()) => {
                    info!(
                        "[Contest] {} resolved loop of {:.0} m²: {}",
                        challenger.player_id,
                        claim.area(),
                        summarize(&outcomes)
                    );
                    return Ok(outcomes);
                }
                Err(StoreError::Conflict { territory_id }) if attempts < max_attempts => {
                    debug!(
                        "[Contest] Territory {} changed during resolution, retrying ({}/{})",
                        territory_id, attempts, max_attempts
                    );
                }
                Err(StoreError::Conflict { territory_id }) => {
                    warn!(
                        "[Contest] Giving up on territory {} after {} attempts",
                        territory_id, attempts
                    );
                    return Err(ClaimError::TerritoryChanged {
                        territory_id,
                        attempts,
                    });
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Decide every outcome against a fresh snapshot without writing.
    fn plan<S>(
        &self,
        store: &S,
        claim: &LoopClaim,
        challenger: &Challenger,
        now_ms: i64,
    ) -> Result<(Vec<ClaimOutcome>, ChangeSet)>
    where
        S: TerritoryStore + ?Sized,
    {
        let region = claim.polygon.bounds();
        let snapshot = store.territories_in(&region)?;
        let mut changes = ChangeSet {
            region: Some(region),
            expected: snapshot.iter().map(|t| (t.id.clone(), t.version)).collect(),
            ..ChangeSet::default()
        };

        let overlaps = self.overlaps(&claim.polygon, snapshot);
        if overlaps.is_empty() {
            let outcome = self.conquer(claim, challenger, now_ms, &mut changes);
            self.tag_themes(&mut changes);
            return Ok((vec![outcome], changes));
        }

        let mut outcomes = Vec::with_capacity(overlaps.len() + 1);
        let mut reinforced: Option<String> = None;

        for overlap in overlaps {
            let outcome = if overlap.territory.owner_id == challenger.player_id {
                let outcome = self.reinforce(overlap, claim, challenger, now_ms, &mut changes);
                if reinforced.is_none() {
                    reinforced = Some(outcome.territory_id.clone());
                }
                outcome
            } else {
                let last_attempt_ms =
                    store.last_attempt(&challenger.player_id, &overlap.territory.id)?;
                changes.attempts.push(AttemptStamp {
                    attacker_id: challenger.player_id.clone(),
                    territory_id: overlap.territory.id.clone(),
                    last_attempt_ms,
                });
                let blocked =
                    self.blocked(&overlap.territory, claim, challenger, last_attempt_ms, now_ms);
                let cut = match blocked {
                    Some(reason) => Err(reason),
                    None => self.carve(&overlap.territory, claim),
                };
                match cut {
                    Ok(cut) => self.steal(overlap, cut, claim, challenger, now_ms, &mut changes),
                    Err(reason) => {
                        self.reject(overlap, claim, challenger, reason, now_ms, &mut changes)
                    }
                }
            };
            outcomes.push(outcome);
        }

        let stolen = outcomes.iter().any(|o| o.action == ClaimAction::Stolen);
        if stolen {
            let points = self.rewards.reward_points(claim.distance, claim.area(), true);
            let claimed_id = match &reinforced {
                Some(id) => id.clone(),
                None => {
                    let territory = self.new_territory(claim, challenger, points, now_ms);
                    let id = territory.id.clone();
                    changes.upserts.push(territory);
                    id
                }
            };

            let mut credited = false;
            for outcome in outcomes.iter_mut() {
                if outcome.action != ClaimAction::Stolen {
                    continue;
                }
                outcome.claimed_territory_id = Some(claimed_id.clone());
                if !credited {
                    outcome.points_gained = points;
                    credited = true;
                }
            }
            for event in changes.events.iter_mut() {
                if event.kind == EventKind::Steal && event.result == EventResult::Success {
                    event.points_awarded = points;
                    break;
                }
            }
        }

        self.tag_themes(&mut changes);
        Ok((outcomes, changes))
    }

    /// Re-derive theme tags of every territory about to be written.
    fn tag_themes(&self, changes: &mut ChangeSet) {
        if self.pois.is_empty() {
            return;
        }
        for territory in changes.upserts.iter_mut() {
            territory.theme_tags = theme_tags(&territory.polygon, &self.pois);
            if let Some(summary) = territory.poi_summary() {
                debug!("[Contest] Territory {} tagged: {}", territory.id, summary);
            }
        }
    }

    /// Territories the loop overlaps by more than a touch, largest overlap first.
    fn overlaps(&self, polygon: &ClosedLoop, snapshot: Vec<Territory>) -> Vec<Overlap> {
        let measure = |territory: Territory| {
            let area = polygon::intersection_area(polygon, &territory.polygon);
            let ratio = if territory.area > 0.0 {
                area / territory.area
            } else {
                0.0
            };
            (area >= self.config.min_overlap_area_m2 && ratio >= self.config.min_overlap_ratio)
                .then_some(Overlap {
                    territory,
                    area,
                    ratio,
                })
        };

        #[cfg(feature = "parallel")]
        let mut overlaps: Vec<Overlap> = {
            use rayon::prelude::*;
            snapshot.into_par_iter().filter_map(measure).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let mut overlaps: Vec<Overlap> = snapshot.into_iter().filter_map(measure).collect();

        overlaps.sort_by(|a, b| {
            b.area
                .total_cmp(&a.area)
                .then_with(|| a.territory.id.cmp(&b.territory.id))
        });
        overlaps
    }

    /// First rule blocking an attack on `territory`, checked in a fixed order.
    fn blocked(
        &self,
        territory: &Territory,
        claim: &LoopClaim,
        challenger: &Challenger,
        last_attempt_ms: Option<i64>,
        now_ms: i64,
    ) -> Option<RejectReason> {
        if territory.is_shielded(now_ms) {
            return Some(RejectReason::Shielded);
        }
        if let Some(until_ms) = territory.protected_until
            && now_ms < until_ms
        {
            return Some(RejectReason::Protected { until_ms });
        }
        if let Some(until_ms) = territory.cooldown_until
            && now_ms < until_ms
        {
            return Some(RejectReason::Cooldown { until_ms });
        }
        if let Some(last) = last_attempt_ms {
            let retry_at_ms = last + self.config.attacker_cooldown_ms;
            if now_ms < retry_at_ms {
                return Some(RejectReason::AttackerCooldown { retry_at_ms });
            }
        }

        let required = self
            .rewards
            .required_pace(territory.avg_pace, challenger.level);
        if claim.pace() > required {
            return Some(RejectReason::PaceTooSlow {
                required,
                actual: claim.pace(),
            });
        }
        None
    }

    fn new_territory(
        &self,
        claim: &LoopClaim,
        challenger: &Challenger,
        points: u64,
        now_ms: i64,
    ) -> Territory {
        let mut territory = Territory::new(
            Uuid::now_v7().to_string(),
            challenger.player_id.clone(),
            claim.polygon.clone(),
            claim.pace(),
        );
        territory.required_pace = self.rewards.required_pace(claim.pace(), challenger.level);
        territory.conquest_points = points;
        territory.protected_until = Some(now_ms + self.config.protection_ms);
        territory.cooldown_until = Some(now_ms + self.config.steal_cooldown_ms);
        territory
    }

    fn conquer(
        &self,
        claim: &LoopClaim,
        challenger: &Challenger,
        now_ms: i64,
        changes: &mut ChangeSet,
    ) -> ClaimOutcome {
        let points = self
            .rewards
            .reward_points(claim.distance, claim.area(), false);
        let territory = self.new_territory(claim, challenger, points, now_ms);
        let id = territory.id.clone();

        changes.events.push(TerritoryEvent {
            territory_id: id.clone(),
            attacker_id: challenger.player_id.clone(),
            defender_id: None,
            kind: EventKind::Conquest,
            result: EventResult::Success,
            overlap_ratio: 1.0,
            pace: claim.pace(),
            area: claim.area(),
            points_awarded: points,
            created_at_ms: now_ms,
        });
        changes.upserts.push(territory);

        ClaimOutcome {
            action: ClaimAction::Conquered,
            territory_id: id.clone(),
            claimed_territory_id: Some(id),
            defender_id: None,
            area_delta: claim.area(),
            points_gained: points,
            reject_reason: None,
            steal: None,
        }
    }

    /// Merge the loop into the claimant's own territory. Never blocked by
    /// protection, cooldown or shield.
    fn reinforce(
        &self,
        overlap: Overlap,
        claim: &LoopClaim,
        challenger: &Challenger,
        now_ms: i64,
        changes: &mut ChangeSet,
    ) -> ClaimOutcome {
        let mut territory = overlap.territory;
        let previous_area = territory.area;

        territory.reshape(polygon::union(&territory.polygon, &claim.polygon));
        territory.avg_pace = claim.pace();
        territory.required_pace = self.rewards.required_pace(claim.pace(), challenger.level);
        territory.protected_until = Some(now_ms + self.config.protection_ms);

        let area_delta = territory.area - previous_area;
        let id = territory.id.clone();

        changes.events.push(TerritoryEvent {
            territory_id: id.clone(),
            attacker_id: challenger.player_id.clone(),
            defender_id: None,
            kind: EventKind::Reinforce,
            result: EventResult::Neutral,
            overlap_ratio: overlap.ratio,
            pace: claim.pace(),
            area: claim.area(),
            points_awarded: 0,
            created_at_ms: now_ms,
        });
        changes.upserts.push(territory);

        ClaimOutcome {
            action: ClaimAction::Reinforced,
            territory_id: id.clone(),
            claimed_territory_id: Some(id),
            defender_id: None,
            area_delta,
            points_gained: 0,
            reject_reason: None,
            steal: None,
        }
    }

    fn reject(
        &self,
        overlap: Overlap,
        claim: &LoopClaim,
        challenger: &Challenger,
        reason: RejectReason,
        now_ms: i64,
        changes: &mut ChangeSet,
    ) -> ClaimOutcome {
        let territory = overlap.territory;
        debug!(
            "[Contest] Attack on {} by {} rejected: {}",
            territory.id, challenger.player_id, reason
        );

        changes.events.push(TerritoryEvent {
            territory_id: territory.id.clone(),
            attacker_id: challenger.player_id.clone(),
            defender_id: Some(territory.owner_id.clone()),
            kind: EventKind::Steal,
            result: EventResult::Failed,
            overlap_ratio: overlap.ratio,
            pace: claim.pace(),
            area: claim.area(),
            points_awarded: 0,
            created_at_ms: now_ms,
        });

        ClaimOutcome {
            action: ClaimAction::Rejected,
            territory_id: territory.id,
            claimed_territory_id: None,
            defender_id: Some(territory.owner_id),
            area_delta: 0.0,
            points_gained: 0,
            reject_reason: Some(reason),
            steal: None,
        }
    }

    /// Work out what an unblocked attack takes from `territory`.
    ///
    /// A loop inside the territory would leave the defender a ring around a
    /// hole, which a territory cannot hold, so that attack is rejected.
    fn carve(
        &self,
        territory: &Territory,
        claim: &LoopClaim,
    ) -> std::result::Result<Cut, RejectReason> {
        if polygon::covers(&claim.polygon, &territory.polygon) {
            return Ok(Err(AnnexCause::Covered));
        }
        let cut = match polygon::difference(&territory.polygon, &claim.polygon, self.minimum_area)
        {
            DifferenceOutcome::Remainder {
                polygon,
                area,
                repaired,
            } => Ok((polygon, area, repaired)),
            DifferenceOutcome::BelowMinimum { area } => {
                Err(AnnexCause::RemainderBelowMinimum { area })
            }
            DifferenceOutcome::Consumed => Err(AnnexCause::Consumed),
            DifferenceOutcome::Failed => Err(AnnexCause::DifferenceFailed),
            DifferenceOutcome::Enclosed { hole_area } => {
                warn!(
                    "[Contest] Loop of {:.0} m² lies inside territory {}, nothing to carve",
                    hole_area, territory.id
                );
                return Err(RejectReason::Enclosed);
            }
        };
        Ok(cut)
    }

    /// Take the overlapped ground: shrink the defender to its remainder, or
    /// annex the whole territory when no livable remainder exists.
    fn steal(
        &self,
        overlap: Overlap,
        cut: Cut,
        claim: &LoopClaim,
        challenger: &Challenger,
        now_ms: i64,
        changes: &mut ChangeSet,
    ) -> ClaimOutcome {
        let mut territory = overlap.territory;
        let original_area = territory.area;

        let (steal, area_delta) = match cut {
            Ok((remainder, remaining_area, repaired)) => {
                territory.reshape(remainder);
                territory.cooldown_until = Some(now_ms + self.config.steal_cooldown_ms);
                changes.upserts.push(territory.clone());
                (
                    StealKind::Partial {
                        remaining_area,
                        repaired,
                    },
                    (original_area - remaining_area).max(0.0),
                )
            }
            Err(cause) => {
                if cause == AnnexCause::DifferenceFailed {
                    warn!(
                        "[Contest] Difference failed for territory {}, annexing it whole",
                        territory.id
                    );
                }
                changes.deletions.push(territory.id.clone());
                (StealKind::Annexed { cause }, original_area)
            }
        };

        changes.events.push(TerritoryEvent {
            territory_id: territory.id.clone(),
            attacker_id: challenger.player_id.clone(),
            defender_id: Some(territory.owner_id.clone()),
            kind: EventKind::Steal,
            result: EventResult::Success,
            overlap_ratio: overlap.ratio,
            pace: claim.pace(),
            area: claim.area(),
            points_awarded: 0,
            created_at_ms: now_ms,
        });

        ClaimOutcome {
            action: ClaimAction::Stolen,
            territory_id: territory.id,
            claimed_territory_id: None,
            defender_id: Some(territory.owner_id),
            area_delta,
            points_gained: 0,
            reject_reason: None,
            steal: Some(steal),
        }
    }
}

fn summarize(outcomes: &[ClaimOutcome]) -> String {
    outcomes
        .iter()
        .map(|o| format!("{:?} {}", o.action, o.territory_id))
        .collect::<Vec<_>>()
        .join(", ")
}
