//! Tests for MemoryTerritoryStore

use loopclaim::contest::{
    AttemptStamp, ChangeSet, EventKind, EventResult, StoreError, TerritoryEvent, ThemeTag,
};
use loopclaim::{MemoryTerritoryStore, Territory, TerritoryStore};

use crate::fixtures::*;

fn far_territory(id: &str) -> Territory {
    Territory::new(id, "carol", rect(5000.0, 5000.0, 5200.0, 5200.0), 6.0)
}

fn attempt(attacker: &str, territory: &str, at: i64) -> TerritoryEvent {
    TerritoryEvent {
        territory_id: territory.to_string(),
        attacker_id: attacker.to_string(),
        defender_id: Some("bob".to_string()),
        kind: EventKind::Steal,
        result: EventResult::Failed,
        overlap_ratio: 0.5,
        pace: 6.0,
        area: 20_000.0,
        points_awarded: 0,
        created_at_ms: at,
    }
}

#[test]
fn test_with_territories_starts_at_version_one() {
    let store = MemoryTerritoryStore::with_territories([block_territory("block", "bob", 5.0)]);

    assert_eq!(store.len(), 1);
    assert!(!store.is_empty());
    let block = store.territory("block").unwrap().unwrap();
    assert_eq!(block.version, 1);
    assert!(store.territory("missing").unwrap().is_none());
}

#[test]
fn test_territories_in_bounds() {
    let store = MemoryTerritoryStore::with_territories([
        block_territory("block", "bob", 5.0),
        far_territory("far"),
    ]);

    let near = store.territories_in(&rect(50.0, 50.0, 100.0, 100.0).bounds()).unwrap();
    assert_eq!(near.len(), 1);
    assert_eq!(near[0].id, "block");

    let nothing = store
        .territories_in(&rect(-900.0, -900.0, -800.0, -800.0).bounds())
        .unwrap();
    assert!(nothing.is_empty());
}

#[test]
fn test_commit_bumps_versions() {
    let store = MemoryTerritoryStore::with_territories([block_territory("block", "bob", 5.0)]);
    let mut block = store.territory("block").unwrap().unwrap();
    block.avg_pace = 4.0;

    store
        .commit(ChangeSet {
            expected: vec![("block".to_string(), 1)],
            upserts: vec![block],
            ..ChangeSet::default()
        })
        .unwrap();

    let block = store.territory("block").unwrap().unwrap();
    assert_eq!(block.version, 2);
    assert_eq!(block.avg_pace, 4.0);
}

#[test]
fn test_stale_version_conflicts() {
    let store = MemoryTerritoryStore::with_territories([block_territory("block", "bob", 5.0)]);
    let block = store.territory("block").unwrap().unwrap();

    let result = store.commit(ChangeSet {
        expected: vec![("block".to_string(), 0)],
        deletions: vec![block.id.clone()],
        ..ChangeSet::default()
    });

    assert_eq!(
        result,
        Err(StoreError::Conflict {
            territory_id: "block".to_string()
        })
    );
    // Nothing was applied
    assert!(store.territory("block").unwrap().is_some());
}

#[test]
fn test_deleted_territory_conflicts() {
    let store = MemoryTerritoryStore::with_territories([block_territory("block", "bob", 5.0)]);
    store
        .commit(ChangeSet {
            expected: vec![("block".to_string(), 1)],
            deletions: vec!["block".to_string()],
            ..ChangeSet::default()
        })
        .unwrap();

    let result = store.commit(ChangeSet {
        expected: vec![("block".to_string(), 1)],
        ..ChangeSet::default()
    });
    assert!(matches!(result, Err(StoreError::Conflict { .. })));
}

#[test]
fn test_new_territory_in_region_conflicts() {
    // A conquest planned against empty ground...
    let store = MemoryTerritoryStore::new();
    let region = rect(0.0, 0.0, 200.0, 200.0).bounds();

    // ...while someone else claimed the same spot
    store
        .commit(ChangeSet {
            upserts: vec![block_territory("block", "bob", 5.0)],
            ..ChangeSet::default()
        })
        .unwrap();

    let result = store.commit(ChangeSet {
        region: Some(region),
        upserts: vec![block_territory("mine", "alice", 5.0)],
        ..ChangeSet::default()
    });
    assert_eq!(
        result,
        Err(StoreError::Conflict {
            territory_id: "block".to_string()
        })
    );
    assert_eq!(store.len(), 1);
}

#[test]
fn test_territory_outside_region_does_not_conflict() {
    let store = MemoryTerritoryStore::with_territories([far_territory("far")]);

    store
        .commit(ChangeSet {
            region: Some(rect(0.0, 0.0, 200.0, 200.0).bounds()),
            upserts: vec![block_territory("block", "alice", 5.0)],
            ..ChangeSet::default()
        })
        .unwrap();
    assert_eq!(store.len(), 2);
}

#[test]
fn test_unread_upsert_conflicts() {
    let store = MemoryTerritoryStore::with_territories([block_territory("block", "bob", 5.0)]);

    let result = store.commit(ChangeSet {
        upserts: vec![block_territory("block", "alice", 5.0)],
        ..ChangeSet::default()
    });
    assert!(matches!(result, Err(StoreError::Conflict { .. })));
    assert_eq!(store.territory("block").unwrap().unwrap().owner_id, "bob");
}

#[test]
fn test_deleting_missing_territory() {
    let store = MemoryTerritoryStore::new();
    let result = store.commit(ChangeSet {
        deletions: vec!["ghost".to_string()],
        ..ChangeSet::default()
    });
    assert_eq!(
        result,
        Err(StoreError::Missing {
            territory_id: "ghost".to_string()
        })
    );
}

#[test]
fn test_last_attempt() {
    let store = MemoryTerritoryStore::with_territories([block_territory("block", "bob", 5.0)]);
    store
        .commit(ChangeSet {
            events: vec![
                attempt("alice", "block", NOW),
                attempt("alice", "block", NOW + HOUR),
                attempt("carol", "block", NOW + 2 * HOUR),
            ],
            ..ChangeSet::default()
        })
        .unwrap();

    assert_eq!(store.last_attempt("alice", "block").unwrap(), Some(NOW + HOUR));
    assert_eq!(store.last_attempt("carol", "block").unwrap(), Some(NOW + 2 * HOUR));
    assert_eq!(store.last_attempt("dave", "block").unwrap(), None);
    assert_eq!(store.events().unwrap().len(), 3);
}

#[test]
fn test_newer_attempt_conflicts() {
    let store = MemoryTerritoryStore::with_territories([block_territory("block", "bob", 5.0)]);
    let stamp = |last_attempt_ms| AttemptStamp {
        attacker_id: "alice".to_string(),
        territory_id: "block".to_string(),
        last_attempt_ms,
    };

    // Read with no attempt on record, then another attempt lands
    store
        .commit(ChangeSet {
            events: vec![attempt("alice", "block", NOW)],
            ..ChangeSet::default()
        })
        .unwrap();

    let stale = store.commit(ChangeSet {
        expected: vec![("block".to_string(), 1)],
        attempts: vec![stamp(None)],
        events: vec![attempt("alice", "block", NOW + 1)],
        ..ChangeSet::default()
    });
    assert_eq!(
        stale,
        Err(StoreError::Conflict {
            territory_id: "block".to_string()
        })
    );
    assert_eq!(store.events().unwrap().len(), 1);

    store
        .commit(ChangeSet {
            expected: vec![("block".to_string(), 1)],
            attempts: vec![stamp(Some(NOW))],
            events: vec![attempt("alice", "block", NOW + 1)],
            ..ChangeSet::default()
        })
        .unwrap();
    assert_eq!(store.last_attempt("alice", "block").unwrap(), Some(NOW + 1));
}

#[test]
fn test_index_rebuilt_only_after_writes() {
    let store = MemoryTerritoryStore::with_territories([block_territory("block", "bob", 5.0)]);
    let region = rect(-50.0, -50.0, 250.0, 250.0).bounds();
    assert!(store.index_is_stale());

    assert_eq!(store.territories_in(&region).unwrap().len(), 1);
    assert!(!store.index_is_stale());
    // Clean reads leave the index alone
    assert_eq!(store.territories_in(&region).unwrap().len(), 1);
    assert!(!store.index_is_stale());

    store
        .commit(ChangeSet {
            upserts: vec![Territory::new("annex", "bob", rect(100.0, 100.0, 240.0, 240.0), 5.0)],
            ..ChangeSet::default()
        })
        .unwrap();
    assert!(store.index_is_stale());
    assert_eq!(store.territories_in(&region).unwrap().len(), 2);
    assert!(!store.index_is_stale());

    // Events alone do not touch geometry
    store
        .commit(ChangeSet {
            events: vec![attempt("alice", "block", NOW)],
            ..ChangeSet::default()
        })
        .unwrap();
    assert!(!store.index_is_stale());
}

#[test]
fn test_change_set_is_empty() {
    assert!(ChangeSet::default().is_empty());
    let with_event = ChangeSet {
        events: vec![attempt("alice", "block", NOW)],
        ..ChangeSet::default()
    };
    assert!(!with_event.is_empty());
}

#[test]
fn test_territory_json_round_trip() {
    let mut block = block_territory("block", "bob", 5.0);
    block.protected_until = Some(NOW);

    let json = serde_json::to_string(&block).unwrap();
    assert!(json.contains("\"ownerId\":\"bob\""));
    assert!(json.contains("\"protectedUntil\""));
    assert!(!json.contains("cooldownUntil"));
    assert!(!json.contains("themeTags"));

    let parsed: Territory = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, block);

    block.theme_tags = vec![ThemeTag {
        category: "park".to_string(),
        name: "Rosaleda".to_string(),
    }];
    let json = serde_json::to_string(&block).unwrap();
    assert!(json.contains("\"themeTags\":[{\"category\":\"park\",\"name\":\"Rosaleda\"}]"));
    let parsed: Territory = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, block);
}
