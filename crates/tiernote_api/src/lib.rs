//! Use-case API boundary for TierNote.
//!
//! Handlers take an already verified caller identity, run one core use case
//! and return a status-coded, serde-serializable envelope.

pub mod api;
pub mod context;
pub mod response;

pub use context::{ApiContext, AuthContext};
pub use response::{status_for, ApiError, ApiResponse};
