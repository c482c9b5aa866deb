//! Core domain logic for TierNote.
//! This crate owns tier quotas, denormalized counters and manual ordering;
//! every invariant over them is enforced here.

pub mod blob;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod store;

pub use blob::{BlobError, BlobStore, FsBlobStore, InMemoryBlobStore};
pub use config::{
    ConfigError, CoreConfig, LoggingConfig, OrderingConfig, QuotaConfig, RetryPolicy,
};
pub use error::{CoreError, CoreResult, QuotaExceeded};
pub use logging::{
    default_log_level, init_logging, init_logging_from_config, logging_status, sanitize_message,
};
pub use model::entity::{
    FileId, FileStatus, Module, ModuleId, Note, NoteId, StoredFile, Tag, TagId, User, UserId,
};
pub use model::tier::{Limit, QuotaResource, TierLimits, TierPolicy, TierPolicyError};
pub use repo::order_repo::OrderScope;
pub use service::ordering_service::{OrderedItem, OrderingManager, Placement};
pub use service::quota_service::{QuotaEnforcer, QuotaGuard, QuotaStatus, Reservation};
pub use service::storage_service::StorageAccounting;
pub use service::workspace_service::WorkspaceService;
pub use store::counter_store::{CounterStore, SqliteCounterStore, TxScope};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
