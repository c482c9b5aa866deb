//! Transactional counter store.
//!
//! # Responsibility
//! - Own the only path through which counter and ordering writes reach
//!   SQLite.
//!
//! # Invariants
//! - Every write happens inside `CounterStore::run_transaction`.

pub mod counter_store;
