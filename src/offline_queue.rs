//! Offline claim queue.
//!
//! When a claim cannot reach the resolver the client keeps it in a queue
//! persisted as opaque JSON and retries with exponential backoff. The engine
//! never talks to the network; this module only defines the entry format and
//! the retry policy both sides agree on.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::claim::ClaimRequest;
use crate::error::Result;
use crate::geo_utils::{average_pace, path_distance, polygon_area};
use crate::{ClaimSource, GpsPoint};

/// Longest wait between two attempts.
pub const MAX_BACKOFF_MS: i64 = 5 * 60 * 1000;

/// Attempts beyond this no longer grow the backoff.
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Delay before the next attempt after `attempts` failures.
pub fn backoff_ms(attempts: u32) -> i64 {
    let exponent = attempts.min(MAX_BACKOFF_EXPONENT);
    MAX_BACKOFF_MS.min(2_i64.pow(exponent) * 1000)
}

/// What the claim endpoint needs, as submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineRunPayload {
    pub path: Vec<GpsPoint>,
    pub duration: f64,
    pub source: ClaimSource,
    pub user_id: String,
}

impl OfflineRunPayload {
    pub fn to_request(&self) -> ClaimRequest {
        ClaimRequest {
            path: self.path.clone(),
            duration: self.duration,
            source: self.source,
            is_public: false,
        }
    }
}

/// Locally computed summary shown while the run waits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineRunMetadata {
    pub created_at: DateTime<Utc>,
    pub distance: f64,
    pub area: f64,
    pub avg_pace: f64,
}

impl OfflineRunMetadata {
    /// Measure a path the way the claim pipeline will.
    pub fn measure(path: &[GpsPoint], duration_seconds: f64, created_at: DateTime<Utc>) -> Self {
        let distance = path_distance(path);
        Self {
            created_at,
            distance,
            area: polygon_area(path),
            avg_pace: average_pace(distance, duration_seconds),
        }
    }
}

/// A queued claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineRunEntry {
    pub id: String,
    pub payload: OfflineRunPayload,
    pub metadata: OfflineRunMetadata,
    #[serde(default)]
    pub attempts: u32,
    /// Unix ms; 0 means immediately
    #[serde(default)]
    pub next_attempt_at: i64,
}

impl OfflineRunEntry {
    /// Whether the entry may be retried at `now_ms`.
    pub fn should_attempt(&self, now_ms: i64) -> bool {
        self.next_attempt_at == 0 || self.next_attempt_at <= now_ms
    }
}

/// Ordered queue of pending claims.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfflineQueue {
    entries: Vec<OfflineRunEntry>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a persisted queue. Anything unreadable yields an empty queue.
    pub fn from_json(json: &str) -> Self {
        if json.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str(json) {
            Ok(queue) => queue,
            Err(e) => {
                warn!("[OfflineQueue] Discarding unreadable queue: {}", e);
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Append a run and return its entry.
    pub fn enqueue(
        &mut self,
        payload: OfflineRunPayload,
        metadata: OfflineRunMetadata,
        now_ms: i64,
    ) -> &OfflineRunEntry {
        let id = format!("offline-{}-{}", now_ms, random_suffix());
        debug!("[OfflineQueue] Queued {}", id);
        self.entries.push(OfflineRunEntry {
            id,
            payload,
            metadata,
            attempts: 0,
            next_attempt_at: 0,
        });
        &self.entries[self.entries.len() - 1]
    }

    /// Record a failed attempt and schedule the next one.
    ///
    /// Returns the new next-attempt time, or `None` for an unknown id.
    pub fn mark_failed(&mut self, id: &str, now_ms: i64) -> Option<i64> {
        let entry = self.entries.iter_mut().find(|e| e.id == id)?;
        entry.attempts += 1;
        entry.next_attempt_at = now_ms + backoff_ms(entry.attempts);
        debug!(
            "[OfflineQueue] {} failed {} times, next attempt at {}",
            id, entry.attempts, entry.next_attempt_at
        );
        Some(entry.next_attempt_at)
    }

    /// Entries ready for another attempt, oldest first.
    pub fn due(&self, now_ms: i64) -> impl Iterator<Item = &OfflineRunEntry> {
        self.entries.iter().filter(move |e| e.should_attempt(now_ms))
    }

    pub fn get(&self, id: &str) -> Option<&OfflineRunEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Remove an entry, typically after a successful submission.
    pub fn remove(&mut self, id: &str) -> Option<OfflineRunEntry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[OfflineRunEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Five lowercase base-36 characters.
fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..5)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
