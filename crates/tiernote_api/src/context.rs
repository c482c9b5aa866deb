//! Per-execution-unit handler context.
//!
//! # Responsibility
//! - Own the counter store, tier policy and blob store one worker uses.
//! - Build the core services each handler call composes.
//!
//! # Invariants
//! - One `ApiContext` per thread; the SQLite connection it owns is not shared.
//! - The tier policy is built once from config and never mutated.

use log::info;
use std::sync::Arc;
use tiernote_core::{
    init_logging_from_config, BlobStore, CoreConfig, CoreError, CoreResult, FsBlobStore,
    InMemoryBlobStore, OrderingConfig, QuotaGuard, SqliteCounterStore, StorageAccounting,
    WorkspaceService,
};

/// Caller identity already verified by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: String,
    pub tier: String,
}

impl AuthContext {
    pub fn new(user_id: impl Into<String>, tier: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tier: tier.into(),
        }
    }
}

/// Handler dependencies.
pub struct ApiContext {
    store: SqliteCounterStore,
    guard: QuotaGuard,
    spacing: OrderingConfig,
    blobs: Arc<dyn BlobStore>,
}

impl ApiContext {
    pub fn new(
        store: SqliteCounterStore,
        guard: QuotaGuard,
        spacing: OrderingConfig,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            store,
            guard,
            spacing,
            blobs,
        }
    }

    /// Opens the store and blob store described by `config`.
    ///
    /// Missing `database_path` selects an in-memory database; missing
    /// `blob_dir` selects an in-memory blob store.
    pub fn from_config(config: &CoreConfig) -> CoreResult<Self> {
        config
            .validate()
            .map_err(|err| CoreError::Validation(err.to_string()))?;
        init_logging_from_config(&config.logging).map_err(CoreError::Validation)?;

        let policy = config
            .tier_policy()
            .map_err(|err| CoreError::Validation(err.to_string()))?;
        let store = match &config.database_path {
            Some(path) => SqliteCounterStore::open(path, config.retry.clone())?,
            None => SqliteCounterStore::open_in_memory(config.retry.clone())?,
        };
        let blobs: Arc<dyn BlobStore> = match &config.blob_dir {
            Some(dir) => Arc::new(FsBlobStore::open(dir)?),
            None => Arc::new(InMemoryBlobStore::new()),
        };

        info!(
            "event=api_context module=api status=ok tiers={} persistent_db={} persistent_blobs={}",
            policy.tiers().count(),
            config.database_path.is_some(),
            config.blob_dir.is_some()
        );
        Ok(Self::new(
            store,
            QuotaGuard::new(Arc::new(policy), config.quota),
            config.ordering,
            blobs,
        ))
    }

    pub fn store(&self) -> &SqliteCounterStore {
        &self.store
    }

    pub fn guard(&self) -> &QuotaGuard {
        &self.guard
    }

    pub(crate) fn workspace(&self) -> WorkspaceService<'_, SqliteCounterStore> {
        WorkspaceService::new(&self.store, self.guard.clone(), self.spacing)
    }

    pub(crate) fn storage(&self) -> StorageAccounting<'_, SqliteCounterStore> {
        StorageAccounting::new(&self.store, self.guard.clone(), Arc::clone(&self.blobs))
    }
}
