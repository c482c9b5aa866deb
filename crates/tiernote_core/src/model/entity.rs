//! Quota-governed workspace entities.
//!
//! # Invariants
//! - Counter fields are denormalized and only mutated by quota/ordering
//!   transactions.
//! - `sort_order` is unique among live siblings; gaps are allowed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable user identifier supplied by the auth collaborator.
pub type UserId = String;
/// Stable module identifier.
pub type ModuleId = Uuid;
/// Stable note identifier.
pub type NoteId = Uuid;
/// Stable tag identifier.
pub type TagId = Uuid;
/// Stable stored-file identifier.
pub type FileId = Uuid;

/// User row with its denormalized usage counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub tier: String,
    pub module_count: u64,
    /// Aggregate across all live modules.
    pub note_count: u64,
    pub tag_count: u64,
    pub storage_used_bytes: u64,
}

/// Note container owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub module_id: ModuleId,
    pub user_id: UserId,
    pub name: String,
    pub sort_order: i64,
    pub note_count: u64,
}

/// Note owned by exactly one module at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub note_id: NoteId,
    pub module_id: ModuleId,
    pub user_id: UserId,
    pub title: String,
    pub sort_order: i64,
}

/// User-scoped tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub tag_id: TagId,
    pub user_id: UserId,
    /// Normalized lowercase name.
    pub name: String,
}

/// Upload lifecycle of a stored file row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Bytes reserved, blob upload not yet confirmed.
    Pending,
    /// Blob upload confirmed.
    Stored,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Stored => "stored",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "stored" => Some(Self::Stored),
            _ => None,
        }
    }
}

/// Metadata row for one blob owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub file_id: FileId,
    pub user_id: UserId,
    pub file_name: String,
    pub size_bytes: u64,
    pub blob_key: String,
    pub status: FileStatus,
}
