//! Tests for ContestResolver

use loopclaim::contest::{AnnexCause, EventKind, EventResult, StealKind, ThemeTag};
use loopclaim::synthetic::offset;
use loopclaim::polygon::intersection_area;
use loopclaim::rewards::reward_points;
use loopclaim::{
    Challenger, ClaimAction, ContestResolver, MemoryTerritoryStore, PointOfInterest, RejectReason,
    Territory, TerritoryStore,
};

use crate::fixtures::*;

fn resolver() -> ContestResolver {
    ContestResolver::default()
}

#[test]
fn test_conquer_unclaimed_ground() {
    let store = MemoryTerritoryStore::new();
    let claim = claim_at_pace(rect(0.0, 0.0, 200.0, 200.0), 5.0);

    let outcomes = resolver()
        .resolve(&store, &claim, &Challenger::new("alice", 1), NOW)
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert_eq!(outcome.action, ClaimAction::Conquered);
    assert_eq!(
        outcome.points_gained,
        reward_points(claim.distance, claim.area(), false)
    );
    assert_eq!(outcome.claimed_territory_id.as_ref(), Some(&outcome.territory_id));
    assert!(approx_eq(outcome.area_delta, claim.area(), 1e-9));

    let territory = store.territory(&outcome.territory_id).unwrap().unwrap();
    assert_eq!(territory.owner_id, "alice");
    assert_eq!(territory.version, 1);
    assert_eq!(territory.protected_until, Some(NOW + 24 * HOUR));
    assert_eq!(territory.cooldown_until, Some(NOW + 6 * HOUR));
    assert!(approx_eq(territory.avg_pace, 5.0, 1e-9));
    assert!(approx_eq(territory.required_pace, 4.5, 1e-9));

    let events = store.events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Conquest);
    assert_eq!(events[0].result, EventResult::Success);
}

#[test]
fn test_slower_challenger_rejected() {
    // Required pace is max(5.2 - 1.0, 2.5) = 4.2 for a level 12 challenger
    let store = MemoryTerritoryStore::with_territories([block_territory("block", "bob", 5.2)]);
    let claim = sixty_percent_claim(5.0);

    let outcomes = resolver()
        .resolve(&store, &claim, &Challenger::new("alice", 12), NOW)
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].action, ClaimAction::Rejected);
    assert_eq!(outcomes[0].defender_id.as_deref(), Some("bob"));
    assert_eq!(outcomes[0].points_gained, 0);
    match &outcomes[0].reject_reason {
        Some(RejectReason::PaceTooSlow { required, actual }) => {
            assert!(approx_eq(*required, 4.2, 1e-9));
            assert!(approx_eq(*actual, 5.0, 1e-9));
        }
        other => panic!("expected a pace rejection, got {:?}", other),
    }

    // Nothing changed hands, but the attempt is on record
    assert_eq!(store.len(), 1);
    let block = store.territory("block").unwrap().unwrap();
    assert_eq!(block.owner_id, "bob");
    assert_eq!(block.version, 1);
    let events = store.events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].result, EventResult::Failed);
}

#[test]
fn test_faster_challenger_partially_steals() {
    let store = MemoryTerritoryStore::with_territories([block_territory("block", "bob", 5.2)]);
    let original_area = store.territory("block").unwrap().unwrap().area;
    let claim = sixty_percent_claim(4.0);

    let outcomes = resolver()
        .resolve(&store, &claim, &Challenger::new("alice", 12), NOW)
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert_eq!(outcome.action, ClaimAction::Stolen);
    assert_eq!(outcome.territory_id, "block");
    assert_eq!(
        outcome.points_gained,
        reward_points(claim.distance, claim.area(), true)
    );
    let Some(StealKind::Partial { remaining_area, .. }) = outcome.steal else {
        panic!("expected a partial steal, got {:?}", outcome.steal);
    };
    assert!(approx_eq(remaining_area, 0.4 * original_area, 500.0));

    // The defender keeps the east 40% of the block
    let block = store.territory("block").unwrap().unwrap();
    assert_eq!(block.owner_id, "bob");
    assert!(approx_eq(block.area, remaining_area, 1e-6));
    assert_eq!(block.cooldown_until, Some(NOW + 6 * HOUR));
    assert_eq!(block.version, 2);

    // The attacker owns the whole loop as a new territory
    let claimed_id = outcome.claimed_territory_id.clone().unwrap();
    assert_ne!(claimed_id, "block");
    let claimed = store.territory(&claimed_id).unwrap().unwrap();
    assert_eq!(claimed.owner_id, "alice");
    assert!(approx_eq(claimed.area, claim.area(), 1e-6));
    assert_eq!(claimed.conquest_points, outcome.points_gained);
    assert_eq!(store.len(), 2);
}

#[test]
fn test_covering_claim_annexes() {
    let store = MemoryTerritoryStore::with_territories([block_territory("block", "bob", 5.2)]);

    let outcomes = resolver()
        .resolve(&store, &covering_claim(4.0), &Challenger::new("alice", 1), NOW)
        .unwrap();

    assert_eq!(outcomes[0].action, ClaimAction::Stolen);
    assert_eq!(
        outcomes[0].steal,
        Some(StealKind::Annexed {
            cause: AnnexCause::Covered
        })
    );
    assert!(store.territory("block").unwrap().is_none());
    assert_eq!(store.len(), 1);
    assert_eq!(store.territories().unwrap()[0].owner_id, "alice");
}

#[test]
fn test_small_remainder_annexes() {
    let store = MemoryTerritoryStore::with_territories([block_territory("block", "bob", 5.2)]);
    // Leaves a 40 m strip of ~8,000 m², below the 10,000 m² minimum
    let claim = claim_at_pace(rect(-20.0, -20.0, 220.0, 160.0), 4.0);

    let outcomes = resolver()
        .resolve(&store, &claim, &Challenger::new("alice", 1), NOW)
        .unwrap();

    assert!(matches!(
        outcomes[0].steal,
        Some(StealKind::Annexed {
            cause: AnnexCause::RemainderBelowMinimum { .. }
        })
    ));
    assert!(store.territory("block").unwrap().is_none());
}

#[test]
fn test_protected_territory_rejects() {
    let mut block = block_territory("block", "bob", 9.0);
    block.protected_until = Some(NOW + HOUR);
    let store = MemoryTerritoryStore::with_territories([block]);

    let outcomes = resolver()
        .resolve(&store, &covering_claim(4.0), &Challenger::new("alice", 1), NOW)
        .unwrap();

    assert_eq!(
        outcomes[0].reject_reason,
        Some(RejectReason::Protected {
            until_ms: NOW + HOUR
        })
    );
    assert!(store.territory("block").unwrap().is_some());
}

#[test]
fn test_protection_expires() {
    let mut block = block_territory("block", "bob", 9.0);
    block.protected_until = Some(NOW - 1);
    let store = MemoryTerritoryStore::with_territories([block]);

    let outcomes = resolver()
        .resolve(&store, &covering_claim(4.0), &Challenger::new("alice", 1), NOW)
        .unwrap();
    assert_eq!(outcomes[0].action, ClaimAction::Stolen);
}

#[test]
fn test_cooldown_rejects() {
    let mut block = block_territory("block", "bob", 9.0);
    block.cooldown_until = Some(NOW + HOUR);
    let store = MemoryTerritoryStore::with_territories([block]);

    let outcomes = resolver()
        .resolve(&store, &covering_claim(4.0), &Challenger::new("alice", 1), NOW)
        .unwrap();
    assert_eq!(
        outcomes[0].reject_reason,
        Some(RejectReason::Cooldown {
            until_ms: NOW + HOUR
        })
    );
}

#[test]
fn test_shield_rejects_until_expiry() {
    let mut block = block_territory("block", "bob", 9.0);
    block.shield_active = true;
    let store = MemoryTerritoryStore::with_territories([block.clone()]);

    let outcomes = resolver()
        .resolve(&store, &covering_claim(4.0), &Challenger::new("alice", 1), NOW)
        .unwrap();
    assert_eq!(outcomes[0].reject_reason, Some(RejectReason::Shielded));

    block.shield_expires = Some(NOW - 1);
    let store = MemoryTerritoryStore::with_territories([block]);
    let outcomes = resolver()
        .resolve(&store, &covering_claim(4.0), &Challenger::new("alice", 1), NOW)
        .unwrap();
    assert_eq!(outcomes[0].action, ClaimAction::Stolen);
}

#[test]
fn test_attacker_cooldown() {
    let store = MemoryTerritoryStore::with_territories([block_territory("block", "bob", 5.2)]);
    let alice = Challenger::new("alice", 1);

    // Too slow: rejected, but the attempt starts the attacker cooldown
    let first = resolver()
        .resolve(&store, &covering_claim(6.0), &alice, NOW)
        .unwrap();
    assert_eq!(first[0].action, ClaimAction::Rejected);

    let retry = resolver()
        .resolve(&store, &covering_claim(4.0), &alice, NOW + HOUR)
        .unwrap();
    assert_eq!(
        retry[0].reject_reason,
        Some(RejectReason::AttackerCooldown {
            retry_at_ms: NOW + 6 * HOUR
        })
    );

    // Other attackers are not affected
    let carol = resolver()
        .resolve(&store, &sixty_percent_claim(4.0), &Challenger::new("carol", 1), NOW + HOUR)
        .unwrap();
    assert_eq!(carol[0].action, ClaimAction::Stolen);
}

#[test]
fn test_reinforce_own_territory() {
    let mut own = block_territory("home", "alice", 6.0);
    own.protected_until = Some(NOW + HOUR);
    own.cooldown_until = Some(NOW + HOUR);
    let store = MemoryTerritoryStore::with_territories([own]);
    let before = store.territory("home").unwrap().unwrap().area;

    // Overlaps the east 50 m of the block and sticks out 20 m north and south
    let claim = claim_at_pace(rect(-20.0, 150.0, 220.0, 350.0), 5.0);
    let outcomes = resolver()
        .resolve(&store, &claim, &Challenger::new("alice", 1), NOW)
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].action, ClaimAction::Reinforced);
    assert_eq!(outcomes[0].points_gained, 0);
    assert_eq!(outcomes[0].claimed_territory_id.as_deref(), Some("home"));

    let home = store.territory("home").unwrap().unwrap();
    let expected = before + claim.area() - intersection_area(&claim.polygon, &rect(0.0, 0.0, 200.0, 200.0));
    assert!(approx_eq(home.area, expected, 200.0), "got {} expected {}", home.area, expected);
    assert!(approx_eq(outcomes[0].area_delta, home.area - before, 1e-6));
    assert!(approx_eq(home.avg_pace, 5.0, 1e-9));
    assert_eq!(home.protected_until, Some(NOW + 24 * HOUR));
    assert_eq!(store.len(), 1);

    let events = store.events().unwrap();
    assert_eq!(events[0].kind, EventKind::Reinforce);
    assert_eq!(events[0].result, EventResult::Neutral);
}

#[test]
fn test_touching_territory_is_not_contested() {
    let store = MemoryTerritoryStore::with_territories([block_territory("block", "bob", 3.0)]);
    // Shares the east edge of the block
    let claim = claim_at_pace(rect(0.0, 200.0, 200.0, 400.0), 6.0);

    let outcomes = resolver()
        .resolve(&store, &claim, &Challenger::new("alice", 1), NOW)
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].action, ClaimAction::Conquered);
    assert_eq!(store.len(), 2);
}

#[test]
fn test_steal_and_reinforce_in_one_loop() {
    let store = MemoryTerritoryStore::with_territories([
        block_territory("block", "bob", 5.2),
        loopclaim::Territory::new("home", "alice", rect(0.0, 300.0, 200.0, 500.0), 6.0),
    ]);
    let claim = claim_at_pace(rect(-20.0, -20.0, 220.0, 350.0), 4.0);

    let outcomes = resolver()
        .resolve(&store, &claim, &Challenger::new("alice", 1), NOW)
        .unwrap();

    // Largest overlap first
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].action, ClaimAction::Stolen);
    assert_eq!(outcomes[0].territory_id, "block");
    assert_eq!(outcomes[1].action, ClaimAction::Reinforced);

    // The stolen ground joins the reinforced territory, no new one is created
    assert_eq!(outcomes[0].claimed_territory_id.as_deref(), Some("home"));
    assert_eq!(
        outcomes[0].points_gained,
        reward_points(claim.distance, claim.area(), true)
    );
    assert_eq!(store.len(), 1);
    let home = store.territory("home").unwrap().unwrap();
    assert!(home.area > claim.area());
}

#[test]
fn test_points_credited_once_for_multiple_steals() {
    let store = MemoryTerritoryStore::with_territories([
        block_territory("west", "bob", 5.2),
        loopclaim::Territory::new("east", "carol", rect(0.0, 250.0, 200.0, 450.0), 5.2),
    ]);
    let claim = claim_at_pace(rect(-20.0, -20.0, 220.0, 470.0), 4.0);

    let outcomes = resolver()
        .resolve(&store, &claim, &Challenger::new("alice", 1), NOW)
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.action == ClaimAction::Stolen));
    let total: u64 = outcomes.iter().map(|o| o.points_gained).sum();
    assert_eq!(total, reward_points(claim.distance, claim.area(), true));

    // Both steals point at the same new territory
    assert_eq!(outcomes[0].claimed_territory_id, outcomes[1].claimed_territory_id);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_loop_inside_territory_is_rejected() {
    let estate = Territory::new("estate", "bob", rect(0.0, 0.0, 400.0, 400.0), 7.0);
    let estate_area = estate.area;
    let store = MemoryTerritoryStore::with_territories([estate]);
    // Fast enough to steal, but the loop never reaches the estate's edge
    let claim = claim_at_pace(rect(150.0, 150.0, 250.0, 250.0), 4.0);

    let outcomes = resolver()
        .resolve(&store, &claim, &Challenger::new("alice", 1), NOW)
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].action, ClaimAction::Rejected);
    assert_eq!(outcomes[0].reject_reason, Some(RejectReason::Enclosed));
    assert!(outcomes[0].claimed_territory_id.is_none());

    assert_eq!(store.len(), 1);
    let estate = store.territory("estate").unwrap().unwrap();
    assert_eq!(estate.owner_id, "bob");
    assert_eq!(estate.version, 1);
    assert_eq!(estate.area, estate_area);
    assert_eq!(store.events().unwrap()[0].result, EventResult::Failed);
}

fn poi(id: &str, name: &str, category: &str, north: f64, east: f64) -> PointOfInterest {
    PointOfInterest {
        id: id.to_string(),
        name: name.to_string(),
        category: category.to_string(),
        location: offset(&origin(), north, east),
    }
}

fn map_pois() -> Vec<PointOfInterest> {
    vec![
        // West part of the block, inside the sixty percent claim
        poi("fountain", "Fuente de la Alcachofa", "monument", 100.0, 50.0),
        // East part of the block, left to the defender
        poi("garden", "Rosaleda", "park", 100.0, 170.0),
        poi("stadium", "Estadio", "sport", 900.0, 900.0),
    ]
}

fn tag(category: &str, name: &str) -> ThemeTag {
    ThemeTag {
        category: category.to_string(),
        name: name.to_string(),
    }
}

#[test]
fn test_conquest_tagged_with_pois_inside() {
    let store = MemoryTerritoryStore::new();
    let claim = claim_at_pace(rect(0.0, 0.0, 200.0, 200.0), 5.0);

    let outcomes = resolver()
        .with_pois(map_pois())
        .resolve(&store, &claim, &Challenger::new("alice", 1), NOW)
        .unwrap();

    let territory = store.territory(&outcomes[0].territory_id).unwrap().unwrap();
    assert_eq!(
        territory.theme_tags,
        vec![
            tag("monument", "Fuente de la Alcachofa"),
            tag("park", "Rosaleda")
        ]
    );
    assert_eq!(
        territory.poi_summary().as_deref(),
        Some("Fuente de la Alcachofa, Rosaleda")
    );
}

#[test]
fn test_partial_steal_retags_both_sides() {
    let mut block = block_territory("block", "bob", 5.2);
    block.theme_tags = vec![
        tag("monument", "Fuente de la Alcachofa"),
        tag("park", "Rosaleda"),
    ];
    let store = MemoryTerritoryStore::with_territories([block]);

    let outcomes = resolver()
        .with_pois(map_pois())
        .resolve(&store, &sixty_percent_claim(4.0), &Challenger::new("alice", 12), NOW)
        .unwrap();
    assert_eq!(outcomes[0].action, ClaimAction::Stolen);

    let block = store.territory("block").unwrap().unwrap();
    assert_eq!(block.theme_tags, vec![tag("park", "Rosaleda")]);

    let claimed_id = outcomes[0].claimed_territory_id.clone().unwrap();
    let claimed = store.territory(&claimed_id).unwrap().unwrap();
    assert_eq!(
        claimed.theme_tags,
        vec![tag("monument", "Fuente de la Alcachofa")]
    );
}

#[test]
fn test_no_pois_leaves_tags_alone() {
    let mut block = block_territory("block", "bob", 5.0);
    block.theme_tags = vec![tag("park", "Rosaleda")];
    let store = MemoryTerritoryStore::with_territories([block]);
    // Reinforcing rewrites the territory
    let claim = claim_at_pace(rect(100.0, 100.0, 300.0, 300.0), 5.0);

    let outcomes = resolver()
        .resolve(&store, &claim, &Challenger::new("bob", 1), NOW)
        .unwrap();
    assert_eq!(outcomes[0].action, ClaimAction::Reinforced);

    let block = store.territory("block").unwrap().unwrap();
    assert_eq!(block.version, 2);
    assert_eq!(block.theme_tags, vec![tag("park", "Rosaleda")]);
}
