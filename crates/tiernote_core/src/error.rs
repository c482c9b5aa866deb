//! Core error taxonomy.
//!
//! # Responsibility
//! - Give every failure one stable class that maps to a caller action
//!   (fix input, upgrade, refetch, retry later, report).
//! - Separate store-level write contention from business-rule aborts.
//!
//! # Invariants
//! - Only `Db` errors for which `DbError::is_write_conflict` holds are retried.
//! - `QuotaExceeded` always carries the limit and the pre-reservation usage.

use crate::blob::BlobError;
use crate::db::DbError;
use crate::model::tier::QuotaResource;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CoreResult<T> = Result<T, CoreError>;

/// Details of a rejected reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaExceeded {
    pub resource: QuotaResource,
    pub limit: u64,
    /// Counter value observed before the rejected reservation.
    pub used: u64,
    /// Amount the caller tried to reserve.
    pub requested: u64,
}

/// Errors surfaced by quota, ordering and storage operations.
#[derive(Debug)]
pub enum CoreError {
    /// Malformed input.
    Validation(String),
    /// Reservation would push a counter above its tier limit.
    QuotaExceeded(QuotaExceeded),
    /// Tier does not grant the requested feature.
    FeatureUnavailable { tier: String, feature: String },
    /// Tier name is not declared and strict tier resolution is enabled.
    TierUnknown(String),
    /// Optimistic concurrency failure; caller should refetch and retry.
    Conflict(String),
    /// Entity is missing, deleted, or not owned by the caller.
    NotFound { entity: &'static str, id: String },
    /// Request deadline expired while waiting on the store.
    Unavailable(String),
    /// Blob store failure.
    Blob(BlobError),
    /// SQLite/bootstrap failure.
    Db(DbError),
    /// Invariant violation or unexpected persisted state.
    Internal(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true for store-level write contention that may be retried.
    pub fn is_write_conflict(&self) -> bool {
        match self {
            Self::Db(err) => err.is_write_conflict(),
            _ => false,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::FeatureUnavailable { .. } => "feature_unavailable",
            Self::TierUnknown(_) => "tier_unknown",
            Self::Conflict(_) => "conflict",
            Self::NotFound { .. } => "not_found",
            Self::Unavailable(_) => "unavailable",
            Self::Blob(_) => "blob_unavailable",
            Self::Db(_) => "internal_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(message) => write!(f, "invalid input: {message}"),
            Self::QuotaExceeded(details) => write!(
                f,
                "quota exceeded for {}: limit {}, used {}, requested {}",
                details.resource.as_str(),
                details.limit,
                details.used,
                details.requested
            ),
            Self::FeatureUnavailable { tier, feature } => {
                write!(f, "tier `{tier}` does not include feature `{feature}`")
            }
            Self::TierUnknown(tier) => write!(f, "unknown tier: `{tier}`"),
            Self::Conflict(message) => write!(f, "conflict: {message}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Unavailable(message) => write!(f, "store unavailable: {message}"),
            Self::Blob(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Internal(message) => write!(f, "internal error: {message}"),
        }
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Blob(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for CoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<BlobError> for CoreError {
    fn from(value: BlobError) -> Self {
        Self::Blob(value)
    }
}

impl From<QuotaExceeded> for CoreError {
    fn from(value: QuotaExceeded) -> Self {
        Self::QuotaExceeded(value)
    }
}
