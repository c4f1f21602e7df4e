//! Territory persistence seam with optimistic concurrency.
//!
//! Resolution reads a versioned snapshot, decides outside any lock, and
//! commits all of its writes atomically. A commit whose read set moved in
//! the meantime fails with [`StoreError::Conflict`] and the resolver retries
//! against fresh state. The read set covers the attacker's attempt history
//! too, so two concurrent attempts cannot both pass the attacker cooldown.

use std::collections::HashMap;
use std::sync::RwLock;

use log::debug;
use thiserror::Error;

use crate::Bounds;

use super::spatial_index::TerritoryIndex;
use super::{Territory, TerritoryEvent};

/// Failures of a territory store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// A territory read by the resolution changed, appeared or disappeared.
    #[error("territory {territory_id} was modified concurrently")]
    Conflict { territory_id: String },

    #[error("territory {territory_id} does not exist")]
    Missing { territory_id: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// An attacker's most recent attempt on a territory, as seen by a resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptStamp {
    pub attacker_id: String,
    pub territory_id: String,
    pub last_attempt_ms: Option<i64>,
}

/// Every write of one resolution attempt, applied all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Region whose territories were read; any territory appearing in it
    /// since the snapshot is a conflict.
    pub region: Option<Bounds>,
    /// Territories read, with the version they were read at.
    pub expected: Vec<(String, u64)>,
    /// Attempt history read for the attacker cooldown; a newer attempt
    /// since the snapshot is a conflict.
    pub attempts: Vec<AttemptStamp>,
    /// New territories or new states of read territories.
    pub upserts: Vec<Territory>,
    /// Territories to delete.
    pub deletions: Vec<String>,
    /// Events appended to the log.
    pub events: Vec<TerritoryEvent>,
}

impl ChangeSet {
    /// Whether the change set would write anything.
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletions.is_empty() && self.events.is_empty()
    }
}

/// Storage used by the contest resolver.
///
/// Implementations must make [`TerritoryStore::commit`] atomic and reject it
/// when any territory in `expected` no longer has the expected version, or
/// when an unexpected territory now intersects `region`, or when an attempt in
/// `attempts` is no longer the attacker's latest.
pub trait TerritoryStore: Send + Sync {
    /// Snapshot of every territory whose bounding box intersects `bounds`.
    fn territories_in(&self, bounds: &Bounds) -> Result<Vec<Territory>, StoreError>;

    /// Snapshot of one territory.
    fn territory(&self, territory_id: &str) -> Result<Option<Territory>, StoreError>;

    /// Time (unix ms) of the attacker's most recent attempt on a territory.
    fn last_attempt(&self, attacker_id: &str, territory_id: &str)
    -> Result<Option<i64>, StoreError>;

    /// Apply a change set atomically.
    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct StoreState {
    territories: HashMap<String, Territory>,
    events: Vec<TerritoryEvent>,
    index: TerritoryIndex,
}

impl StoreState {
    fn ids_in(&mut self, bounds: &Bounds) -> Vec<String> {
        self.index.ensure_built(&self.territories);
        self.index.query(bounds)
    }

    fn snapshot(&self, ids: &[String]) -> Vec<Territory> {
        ids.iter()
            .filter_map(|id| self.territories.get(id).cloned())
            .collect()
    }

    fn last_attempt(&self, attacker_id: &str, territory_id: &str) -> Option<i64> {
        self.events
            .iter()
            .filter(|e| e.attacker_id == attacker_id && e.territory_id == territory_id)
            .map(|e| e.created_at_ms)
            .max()
    }

    fn check(&mut self, changes: &ChangeSet) -> Result<(), StoreError> {
        for (id, version) in &changes.expected {
            match self.territories.get(id) {
                Some(current) if current.version == *version => {}
                _ => {
                    return Err(StoreError::Conflict {
                        territory_id: id.clone(),
                    });
                }
            }
        }

        for stamp in &changes.attempts {
            if self.last_attempt(&stamp.attacker_id, &stamp.territory_id) != stamp.last_attempt_ms {
                return Err(StoreError::Conflict {
                    territory_id: stamp.territory_id.clone(),
                });
            }
        }

        if let Some(region) = &changes.region {
            let unexpected = self
                .ids_in(region)
                .into_iter()
                .find(|id| !changes.expected.iter().any(|(e, _)| e == id));
            if let Some(territory_id) = unexpected {
                return Err(StoreError::Conflict { territory_id });
            }
        }

        for upsert in &changes.upserts {
            let read = changes.expected.iter().any(|(e, _)| *e == upsert.id);
            if !read && self.territories.contains_key(&upsert.id) {
                return Err(StoreError::Conflict {
                    territory_id: upsert.id.clone(),
                });
            }
        }

        for id in &changes.deletions {
            if !self.territories.contains_key(id) {
                return Err(StoreError::Missing {
                    territory_id: id.clone(),
                });
            }
        }
        Ok(())
    }
}

/// In-memory territory store behind a read-write lock.
///
/// Versions start at 1 and increase by one on every committed update.
#[derive(Debug, Default)]
pub struct MemoryTerritoryStore {
    state: RwLock<StoreState>,
}

impl MemoryTerritoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with existing territories, e.g. a map snapshot.
    pub fn with_territories(territories: impl IntoIterator<Item = Territory>) -> Self {
        let mut state = StoreState::default();
        for mut territory in territories {
            territory.version = territory.version.max(1);
            state.territories.insert(territory.id.clone(), territory);
        }
        state.index.mark_dirty();
        Self {
            state: RwLock::new(state),
        }
    }

    /// Every territory currently stored, in no particular order.
    pub fn territories(&self) -> Result<Vec<Territory>, StoreError> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.territories.values().cloned().collect())
    }

    /// The full event log, oldest first.
    pub fn events(&self) -> Result<Vec<TerritoryEvent>, StoreError> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.events.clone())
    }

    /// Whether the next region query has to rebuild the spatial index.
    pub fn index_is_stale(&self) -> bool {
        self.state.read().map_or(true, |s| s.index.is_dirty())
    }

    pub fn len(&self) -> usize {
        self.state.read().map_or(0, |s| s.territories.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Unavailable("territory lock poisoned".to_string())
}

impl TerritoryStore for MemoryTerritoryStore {
    fn territories_in(&self, bounds: &Bounds) -> Result<Vec<Territory>, StoreError> {
        {
            let state = self.state.read().map_err(poisoned)?;
            if !state.index.is_dirty() {
                let ids = state.index.query(bounds);
                return Ok(state.snapshot(&ids));
            }
        }

        // Index rebuilds need the write lock
        let mut state = self.state.write().map_err(poisoned)?;
        let ids = state.ids_in(bounds);
        Ok(state.snapshot(&ids))
    }

    fn territory(&self, territory_id: &str) -> Result<Option<Territory>, StoreError> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.territories.get(territory_id).cloned())
    }

    fn last_attempt(
        &self,
        attacker_id: &str,
        territory_id: &str,
    ) -> Result<Option<i64>, StoreError> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.last_attempt(attacker_id, territory_id))
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(poisoned)?;
        state.check(&changes)?;

        let ChangeSet {
            upserts,
            deletions,
            events,
            ..
        } = changes;

        let geometry_changed = !upserts.is_empty() || !deletions.is_empty();
        for id in &deletions {
            state.territories.remove(id);
        }
        for mut territory in upserts {
            territory.version = state
                .territories
                .get(&territory.id)
                .map_or(1, |current| current.version + 1);
            state.territories.insert(territory.id.clone(), territory);
        }
        state.events.extend(events);
        if geometry_changed {
            state.index.mark_dirty();
        }

        debug!(
            "[TerritoryStore] Committed change set, {} territories stored",
            state.territories.len()
        );
        Ok(())
    }
}
