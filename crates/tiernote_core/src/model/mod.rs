//! Domain model for tier limits and quota-governed entities.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Keep the tier table an explicit value instead of global state.
//!
//! # Invariants
//! - Every entity is identified by a stable id.
//! - Limits use an explicit unbounded variant, never float infinity.

pub mod entity;
pub mod tier;
