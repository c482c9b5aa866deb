//! SQL access helpers used inside counter-store transactions.
//!
//! # Responsibility
//! - Keep SQL text and row parsing inside the repository boundary.
//! - Expose plain functions over `&Connection` so services can compose them
//!   within one transaction.
//!
//! # Invariants
//! - Only live rows (`is_deleted = 0`) are returned unless stated otherwise.
//! - Ownership mismatches surface as `NotFound`, never as a foreign row.
//! - Counter columns are written only through the `write_*_count` helpers,
//!   which services call exclusively from quota/ordering transactions.

pub mod file_repo;
pub mod module_repo;
pub mod note_repo;
pub mod order_repo;
pub mod tag_repo;
pub mod user_repo;

use crate::error::{CoreError, CoreResult};
use uuid::Uuid;

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> CoreResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| CoreError::Internal(format!("invalid uuid `{value}` in {column}")))
}

pub(crate) fn to_u64(value: i64, column: &'static str) -> CoreResult<u64> {
    u64::try_from(value)
        .map_err(|_| CoreError::Internal(format!("negative value `{value}` in {column}")))
}

pub(crate) fn to_i64(value: u64, column: &'static str) -> CoreResult<i64> {
    i64::try_from(value)
        .map_err(|_| CoreError::Internal(format!("value `{value}` overflows {column}")))
}
