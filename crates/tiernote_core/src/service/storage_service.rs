//! Storage accounting around the non-transactional blob store.
//!
//! # Responsibility
//! - Reserve bytes before an upload, confirm or compensate after it.
//! - Release bytes only after the blob delete is confirmed.
//!
//! # Invariants
//! - A rejected reservation never touches the blob store.
//! - While a file row exists (pending or stored) its size is counted in the
//!   owner's `storage_used_bytes`.
//! - A failed compensation leaves an over-count, never an under-count.
//! - Only `stored` rows can be deleted; a `pending` row belongs to an
//!   in-flight upload.

use crate::blob::{BlobError, BlobStore};
use crate::error::{CoreError, CoreResult};
use crate::model::entity::{FileId, FileStatus, StoredFile};
use crate::model::tier::FEATURE_FILE_UPLOAD;
use crate::repo::file_repo::{
    delete_file_row, insert_file, require_owned_file, set_file_status,
};
use crate::repo::user_repo::require_user;
use crate::service::quota_service::QuotaGuard;
use crate::store::counter_store::{CounterStore, TxScope};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Blob key for a file id.
pub fn blob_key_for(file_id: FileId) -> String {
    format!("files/{file_id}")
}

/// Owned file whose upload has completed. Pending rows belong to an
/// in-flight upload and cannot be deleted yet.
fn require_stored_file(
    conn: &Connection,
    user_id: &str,
    file_id: FileId,
) -> CoreResult<StoredFile> {
    let file = require_owned_file(conn, user_id, file_id)?;
    if file.status != FileStatus::Stored {
        return Err(CoreError::Conflict(format!(
            "upload of file {file_id} is still in progress"
        )));
    }
    Ok(file)
}

/// Storage accounting service.
pub struct StorageAccounting<'s, S: CounterStore> {
    store: &'s S,
    guard: QuotaGuard,
    blobs: Arc<dyn BlobStore>,
}

impl<'s, S: CounterStore> StorageAccounting<'s, S> {
    pub fn new(store: &'s S, guard: QuotaGuard, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            guard,
            blobs,
        }
    }

    /// Uploads `bytes` for `user_id` under storage quota.
    pub fn upload_file(
        &self,
        user_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> CoreResult<StoredFile> {
        let started_at = Instant::now();
        let file_name = file_name.trim();
        if file_name.is_empty() {
            return Err(CoreError::Validation(
                "file name must not be blank".to_string(),
            ));
        }
        if bytes.is_empty() {
            return Err(CoreError::Validation("file must not be empty".to_string()));
        }
        let size = i64::try_from(bytes.len())
            .map_err(|_| CoreError::Validation("file is too large".to_string()))?;

        let file_id = Uuid::new_v4();
        let mut file = StoredFile {
            file_id,
            user_id: user_id.to_string(),
            file_name: file_name.to_string(),
            size_bytes: bytes.len() as u64,
            blob_key: blob_key_for(file_id),
            status: FileStatus::Pending,
        };
        let scope = TxScope::File(file_id);

        self.store.run_transaction(&scope, |conn| {
            self.require_upload_feature(conn, user_id)?;
            self.guard.reserve_storage(conn, user_id, size)?;
            insert_file(conn, &file)
        })?;

        if let Err(upload_err) = self.blobs.put(&file.blob_key, bytes) {
            warn!(
                "event=storage_upload module=storage status=error user_id={} file_id={} size_bytes={} error={}",
                user_id, file_id, size, upload_err
            );
            self.compensate(user_id, file_id, size);
            return Err(CoreError::Blob(upload_err));
        }

        let marked = self.store.run_transaction(&scope, |conn| {
            set_file_status(conn, file_id, FileStatus::Stored)
        });
        match marked {
            Ok(()) => file.status = FileStatus::Stored,
            Err(CoreError::NotFound { .. }) => {
                self.discard_orphan(user_id, &file);
                return Err(CoreError::Conflict(format!(
                    "file {file_id} was removed while its upload was in progress"
                )));
            }
            Err(err) => {
                // Bytes stay reserved and the row stays pending.
                error!(
                    "event=storage_upload module=storage status=error user_id={} file_id={} size_bytes={} error_code=storage_mark_stored_failed error={}",
                    user_id, file_id, size, err
                );
                return Err(err);
            }
        }

        info!(
            "event=storage_upload module=storage status=ok user_id={} file_id={} size_bytes={} duration_ms={}",
            user_id,
            file_id,
            size,
            started_at.elapsed().as_millis()
        );
        Ok(file)
    }

    /// Deletes one owned file and releases its bytes.
    pub fn delete_file(&self, user_id: &str, file_id: FileId) -> CoreResult<StoredFile> {
        let scope = TxScope::File(file_id);
        let file = self
            .store
            .read_snapshot(&scope, |conn| require_stored_file(conn, user_id, file_id))?;

        if self.blobs.exists(&file.blob_key)? {
            match self.blobs.delete(&file.blob_key) {
                Ok(()) | Err(BlobError::Missing(_)) => {}
                Err(err) => return Err(err.into()),
            }
        } else {
            debug!(
                "event=storage_delete module=storage status=blob_missing user_id={} file_id={}",
                user_id, file_id
            );
        }

        let size = i64::try_from(file.size_bytes).map_err(|_| {
            CoreError::Internal(format!("file {file_id} size exceeds counter range"))
        })?;
        self.store.run_transaction(&scope, |conn| {
            require_stored_file(conn, user_id, file_id)?;
            delete_file_row(conn, file_id)?;
            self.guard.reserve_storage(conn, user_id, -size)?;
            Ok(())
        })?;

        info!(
            "event=storage_delete module=storage status=ok user_id={} file_id={} size_bytes={}",
            user_id, file_id, size
        );
        Ok(file)
    }

    /// Loads one owned file row.
    pub fn get_file(&self, user_id: &str, file_id: FileId) -> CoreResult<StoredFile> {
        self.store.read_snapshot(&TxScope::File(file_id), |conn| {
            require_owned_file(conn, user_id, file_id)
        })
    }

    fn require_upload_feature(&self, conn: &Connection, user_id: &str) -> CoreResult<()> {
        let user = require_user(conn, user_id)?;
        let limits = self.guard.limits_for(&user, false)?;
        if !limits.has_feature(FEATURE_FILE_UPLOAD) {
            info!(
                "event=storage_upload module=storage status=rejected user_id={} tier={} error_code=feature_unavailable",
                user_id, user.tier
            );
            return Err(CoreError::FeatureUnavailable {
                tier: limits.name.clone(),
                feature: FEATURE_FILE_UPLOAD.to_string(),
            });
        }
        Ok(())
    }

    /// Removes a blob whose row vanished before it could be marked stored.
    fn discard_orphan(&self, user_id: &str, file: &StoredFile) {
        match self.blobs.delete(&file.blob_key) {
            Ok(()) | Err(BlobError::Missing(_)) => warn!(
                "event=storage_upload module=storage status=orphan_removed user_id={} file_id={}",
                user_id, file.file_id
            ),
            Err(err) => error!(
                "event=storage_upload module=storage status=error user_id={} file_id={} error_code=storage_orphan_blob error={}",
                user_id, file.file_id, err
            ),
        }
    }

    /// Drops the pending row and releases its bytes after a failed upload.
    fn compensate(&self, user_id: &str, file_id: FileId, size: i64) {
        let outcome = self.store.run_transaction(&TxScope::File(file_id), |conn| {
            delete_file_row(conn, file_id)?;
            self.guard.reserve_storage(conn, user_id, -size)?;
            Ok(())
        });
        match outcome {
            Ok(()) => info!(
                "event=storage_compensate module=storage status=ok user_id={} file_id={} size_bytes={}",
                user_id, file_id, size
            ),
            Err(err) => error!(
                "event=storage_compensate module=storage status=error user_id={} file_id={} size_bytes={} error_code=storage_compensation_failed error={}",
                user_id, file_id, size, err
            ),
        }
    }
}
