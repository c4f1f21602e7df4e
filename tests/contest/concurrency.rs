//! Tests for optimistic concurrency in contest resolution

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;

use loopclaim::contest::{ChangeSet, EventKind, EventResult, StoreError, TerritoryEvent};
use loopclaim::{
    Bounds, Challenger, ClaimAction, ClaimError, ContestConfig, ContestResolver,
    MemoryTerritoryStore, RejectReason, RewardConfig, Territory, TerritoryStore,
};

use crate::fixtures::*;

/// Store whose first commits fail as if another claim got there first.
struct FlakyStore {
    inner: MemoryTerritoryStore,
    conflicts: AtomicU32,
}

impl FlakyStore {
    fn new(conflicts: u32) -> Self {
        Self {
            inner: MemoryTerritoryStore::new(),
            conflicts: AtomicU32::new(conflicts),
        }
    }
}

impl TerritoryStore for FlakyStore {
    fn territories_in(&self, bounds: &Bounds) -> Result<Vec<Territory>, StoreError> {
        self.inner.territories_in(bounds)
    }

    fn territory(&self, territory_id: &str) -> Result<Option<Territory>, StoreError> {
        self.inner.territory(territory_id)
    }

    fn last_attempt(
        &self,
        attacker_id: &str,
        territory_id: &str,
    ) -> Result<Option<i64>, StoreError> {
        self.inner.last_attempt(attacker_id, territory_id)
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let pending = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(StoreError::Conflict {
                territory_id: "contested".to_string(),
            });
        }
        self.inner.commit(changes)
    }
}

/// Store where another device of the same attacker records a failed attempt
/// on the block between the first read and the first commit.
struct SecondDeviceStore {
    inner: MemoryTerritoryStore,
    interleaved: AtomicBool,
}

impl SecondDeviceStore {
    fn new(territories: impl IntoIterator<Item = Territory>) -> Self {
        Self {
            inner: MemoryTerritoryStore::with_territories(territories),
            interleaved: AtomicBool::new(false),
        }
    }
}

impl TerritoryStore for SecondDeviceStore {
    fn territories_in(&self, bounds: &Bounds) -> Result<Vec<Territory>, StoreError> {
        self.inner.territories_in(bounds)
    }

    fn territory(&self, territory_id: &str) -> Result<Option<Territory>, StoreError> {
        self.inner.territory(territory_id)
    }

    fn last_attempt(
        &self,
        attacker_id: &str,
        territory_id: &str,
    ) -> Result<Option<i64>, StoreError> {
        self.inner.last_attempt(attacker_id, territory_id)
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if !self.interleaved.swap(true, Ordering::SeqCst) {
            self.inner.commit(ChangeSet {
                events: vec![TerritoryEvent {
                    territory_id: "block".to_string(),
                    attacker_id: "alice".to_string(),
                    defender_id: Some("bob".to_string()),
                    kind: EventKind::Steal,
                    result: EventResult::Failed,
                    overlap_ratio: 1.0,
                    pace: 6.0,
                    area: 40_000.0,
                    points_awarded: 0,
                    created_at_ms: NOW,
                }],
                ..ChangeSet::default()
            })?;
        }
        self.inner.commit(changes)
    }
}

fn resolver_with_attempts(max_resolution_attempts: u32) -> ContestResolver {
    ContestResolver::new(
        ContestConfig {
            max_resolution_attempts,
            ..ContestConfig::default()
        },
        RewardConfig::default(),
        10_000.0,
    )
}

#[test]
fn test_transient_conflicts_are_retried() {
    let store = FlakyStore::new(2);
    let claim = claim_at_pace(rect(0.0, 0.0, 200.0, 200.0), 5.0);

    let outcomes = resolver_with_attempts(3)
        .resolve(&store, &claim, &Challenger::new("alice", 1), NOW)
        .unwrap();

    assert_eq!(outcomes[0].action, ClaimAction::Conquered);
    assert_eq!(store.inner.len(), 1);
}

#[test]
fn test_gives_up_after_max_attempts() {
    let store = FlakyStore::new(3);
    let claim = claim_at_pace(rect(0.0, 0.0, 200.0, 200.0), 5.0);

    let result = resolver_with_attempts(3).resolve(&store, &claim, &Challenger::new("alice", 1), NOW);

    match result {
        Err(ClaimError::TerritoryChanged {
            territory_id,
            attempts,
        }) => {
            assert_eq!(territory_id, "contested");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected TerritoryChanged, got {:?}", other),
    }
    assert!(store.inner.is_empty());
    assert!(store.inner.events().unwrap().is_empty());
}

#[test]
fn test_attempt_from_second_device_triggers_attacker_cooldown() {
    let store = SecondDeviceStore::new([block_territory("block", "bob", 5.2)]);

    let outcomes = resolver_with_attempts(3)
        .resolve(&store, &covering_claim(4.0), &Challenger::new("alice", 1), NOW)
        .unwrap();

    // The retry sees the other attempt and the cooldown it starts
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].action, ClaimAction::Rejected);
    assert_eq!(
        outcomes[0].reject_reason,
        Some(RejectReason::AttackerCooldown {
            retry_at_ms: NOW + 6 * HOUR
        })
    );

    let block = store.inner.territory("block").unwrap().unwrap();
    assert_eq!(block.owner_id, "bob");
    assert_eq!(block.version, 1);
    assert_eq!(store.inner.len(), 1);
    assert_eq!(store.inner.events().unwrap().len(), 2);
}

#[test]
fn test_racing_attackers_steal_once() {
    const ATTACKERS: u32 = 8;
    let store = Arc::new(MemoryTerritoryStore::with_territories([block_territory(
        "block", "bob", 5.2,
    )]));
    // Each attacker fails at most once per competing commit
    let resolver = Arc::new(resolver_with_attempts(ATTACKERS));

    let handles: Vec<_> = (0..ATTACKERS)
        .map(|i| {
            let store = Arc::clone(&store);
            let resolver = Arc::clone(&resolver);
            thread::spawn(move || {
                let challenger = Challenger::new(format!("attacker-{}", i), 1);
                resolver.resolve(store.as_ref(), &covering_claim(4.0), &challenger, NOW)
            })
        })
        .collect();

    let outcomes: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap().unwrap())
        .collect();

    let stolen: Vec<_> = outcomes
        .iter()
        .filter(|o| o.action == ClaimAction::Stolen)
        .collect();
    assert_eq!(stolen.len(), 1);
    assert!(
        outcomes
            .iter()
            .filter(|o| o.action != ClaimAction::Stolen)
            .all(|o| o.action == ClaimAction::Rejected)
    );

    // The winner holds the only territory; the block is gone
    let territories = store.territories().unwrap();
    assert_eq!(territories.len(), 1);
    assert_eq!(
        Some(territories[0].id.clone()),
        stolen[0].claimed_territory_id
    );
    assert!(store.territory("block").unwrap().is_none());
}

#[test]
fn test_racing_conquests_of_same_ground() {
    const RUNNERS: u32 = 8;
    let store = Arc::new(MemoryTerritoryStore::new());
    let resolver = Arc::new(resolver_with_attempts(RUNNERS));

    let handles: Vec<_> = (0..RUNNERS)
        .map(|i| {
            let store = Arc::clone(&store);
            let resolver = Arc::clone(&resolver);
            thread::spawn(move || {
                let claim = claim_at_pace(rect(0.0, 0.0, 200.0, 200.0), 5.0);
                let challenger = Challenger::new(format!("runner-{}", i), 1);
                resolver.resolve(store.as_ref(), &claim, &challenger, NOW)
            })
        })
        .collect();

    let outcomes: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap().unwrap())
        .collect();

    let conquered = outcomes
        .iter()
        .filter(|o| o.action == ClaimAction::Conquered)
        .count();
    assert_eq!(conquered, 1);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_disjoint_conquests_do_not_conflict() {
    let store = Arc::new(MemoryTerritoryStore::new());
    // A single attempt is enough when nobody competes for the ground
    let resolver = Arc::new(resolver_with_attempts(1));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let store = Arc::clone(&store);
            let resolver = Arc::clone(&resolver);
            thread::spawn(move || {
                let west = i as f64 * 500.0;
                let claim = claim_at_pace(rect(0.0, west, 200.0, west + 200.0), 5.0);
                let challenger = Challenger::new(format!("runner-{}", i), 1);
                resolver.resolve(store.as_ref(), &claim, &challenger, NOW)
            })
        })
        .collect();

    for handle in handles {
        let outcomes = handle.join().unwrap().unwrap();
        assert_eq!(outcomes[0].action, ClaimAction::Conquered);
    }
    assert_eq!(store.len(), 6);
}
