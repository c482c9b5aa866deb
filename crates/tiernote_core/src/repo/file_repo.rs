//! Stored-file metadata rows.
//!
//! # Invariants
//! - A row exists from the storage reservation until the compensating or
//!   deleting transaction; its size is counted in `users.storage_used_bytes`
//!   for that whole window.

use super::{parse_uuid, to_i64, to_u64};
use crate::error::{CoreError, CoreResult};
use crate::model::entity::{FileId, FileStatus, StoredFile};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Inserts one file row.
pub fn insert_file(conn: &Connection, file: &StoredFile) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO stored_files (
            file_uuid,
            user_id,
            file_name,
            size_bytes,
            blob_key,
            status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        params![
            file.file_id.to_string(),
            file.user_id,
            file.file_name,
            to_i64(file.size_bytes, "stored_files.size_bytes")?,
            file.blob_key,
            file.status.as_str(),
        ],
    )?;
    Ok(())
}

/// Loads one file row regardless of owner.
pub fn load_file(conn: &Connection, file_id: FileId) -> CoreResult<Option<StoredFile>> {
    conn.query_row(
        "SELECT file_uuid, user_id, file_name, size_bytes, blob_key, status
         FROM stored_files
         WHERE file_uuid = ?1;",
        [file_id.to_string()],
        |row| Ok(parse_file_row(row)),
    )
    .optional()?
    .transpose()
}

/// Loads one file row owned by `user_id`, or `NotFound`.
pub fn require_owned_file(
    conn: &Connection,
    user_id: &str,
    file_id: FileId,
) -> CoreResult<StoredFile> {
    match load_file(conn, file_id)? {
        Some(file) if file.user_id == user_id => Ok(file),
        _ => Err(CoreError::not_found("file", file_id)),
    }
}

/// Updates the upload status of one row.
pub fn set_file_status(conn: &Connection, file_id: FileId, status: FileStatus) -> CoreResult<()> {
    let changed = conn.execute(
        "UPDATE stored_files
         SET status = ?2,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE file_uuid = ?1;",
        params![file_id.to_string(), status.as_str()],
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("file", file_id));
    }
    Ok(())
}

/// Deletes one row.
pub fn delete_file_row(conn: &Connection, file_id: FileId) -> CoreResult<()> {
    let changed = conn.execute(
        "DELETE FROM stored_files WHERE file_uuid = ?1;",
        [file_id.to_string()],
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("file", file_id));
    }
    Ok(())
}

/// Sum of sizes of all rows owned by `user_id`.
pub fn total_file_bytes(conn: &Connection, user_id: &str) -> CoreResult<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(size_bytes), 0) FROM stored_files WHERE user_id = ?1;",
        [user_id],
        |row| row.get(0),
    )?;
    to_u64(total, "stored_files.size_bytes")
}

fn parse_file_row(row: &Row<'_>) -> CoreResult<StoredFile> {
    let file_uuid: String = row.get("file_uuid")?;
    let status_text: String = row.get("status")?;
    let status = FileStatus::parse(&status_text).ok_or_else(|| {
        CoreError::Internal(format!(
            "invalid status `{status_text}` in stored_files.status"
        ))
    })?;
    Ok(StoredFile {
        file_id: parse_uuid(&file_uuid, "stored_files.file_uuid")?,
        user_id: row.get("user_id")?,
        file_name: row.get("file_name")?,
        size_bytes: to_u64(row.get("size_bytes")?, "stored_files.size_bytes")?,
        blob_key: row.get("blob_key")?,
        status,
    })
}
