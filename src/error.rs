//! Unified error type for claim processing.
//!
//! Samples dropped by the GPS filter and geometric fallbacks are not errors;
//! they are reported through typed outcomes in their own modules. Only
//! conditions the caller must act on surface here.

use thiserror::Error;

use crate::contest::{RejectReason, StoreError};
use crate::validation::ValidationError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClaimError>;

/// Errors surfaced to the caller of the claim pipeline.
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("{context} has {point_count} points, at least {minimum_required} required")]
    InsufficientPoints {
        context: String,
        point_count: usize,
        minimum_required: usize,
    },

    #[error("invalid run duration: {duration}s")]
    InvalidDuration { duration: f64 },

    #[error("path is not closed: endpoints {gap_meters:.0}m apart (threshold {threshold_meters:.0}m)")]
    NotClosed {
        gap_meters: f64,
        threshold_meters: f64,
    },

    #[error("run failed validation: {}", join_errors(.0))]
    ValidationFailed(Vec<ValidationError>),

    #[error("claim rejected: {0}")]
    Rejected(RejectReason),

    #[error("territory {territory_id} changed during resolution after {attempts} attempts, try again")]
    TerritoryChanged { territory_id: String, attempts: u32 },

    #[error("territory store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid balance configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience conversions from `Option` into [`ClaimError`].
pub trait OptionExt<T> {
    /// Map `None` to [`ClaimError::InsufficientPoints`].
    fn ok_or_insufficient_points(
        self,
        context: &str,
        point_count: usize,
        minimum_required: usize,
    ) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_insufficient_points(
        self,
        context: &str,
        point_count: usize,
        minimum_required: usize,
    ) -> Result<T> {
        self.ok_or_else(|| ClaimError::InsufficientPoints {
            context: context.to_string(),
            point_count,
            minimum_required,
        })
    }
}
