//! User rows and their usage counters.

use super::{to_i64, to_u64};
use crate::error::{CoreError, CoreResult};
use crate::model::entity::User;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Counter columns on the `users` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCounter {
    Modules,
    Notes,
    Tags,
    StorageBytes,
}

impl UserCounter {
    fn column(self) -> &'static str {
        match self {
            Self::Modules => "module_count",
            Self::Notes => "note_count",
            Self::Tags => "tag_count",
            Self::StorageBytes => "storage_used_bytes",
        }
    }

    /// Reads this counter from a loaded user.
    pub fn value_of(self, user: &User) -> u64 {
        match self {
            Self::Modules => user.module_count,
            Self::Notes => user.note_count,
            Self::Tags => user.tag_count,
            Self::StorageBytes => user.storage_used_bytes,
        }
    }
}

const USER_SELECT_SQL: &str = "SELECT
    user_id,
    tier,
    module_count,
    note_count,
    tag_count,
    storage_used_bytes
FROM users";

/// Inserts a user with zeroed counters. Returns false when it already exists.
pub fn insert_user_if_missing(conn: &Connection, user_id: &str, tier: &str) -> CoreResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO users (user_id, tier) VALUES (?1, ?2);",
        params![user_id, tier],
    )?;
    Ok(inserted == 1)
}

/// Loads one user row.
pub fn load_user(conn: &Connection, user_id: &str) -> CoreResult<Option<User>> {
    let sql = format!("{USER_SELECT_SQL} WHERE user_id = ?1;");
    conn.query_row(&sql, [user_id], |row| Ok(parse_user_row(row)))
        .optional()?
        .transpose()
}

/// Loads one user row or fails with `NotFound`.
pub fn require_user(conn: &Connection, user_id: &str) -> CoreResult<User> {
    load_user(conn, user_id)?.ok_or_else(|| CoreError::not_found("user", user_id))
}

/// Replaces the tier name of one user.
pub fn update_tier(conn: &Connection, user_id: &str, tier: &str) -> CoreResult<()> {
    let changed = conn.execute(
        "UPDATE users
         SET tier = ?2,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE user_id = ?1;",
        params![user_id, tier],
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("user", user_id));
    }
    Ok(())
}

/// Overwrites one counter column.
pub fn write_user_count(
    conn: &Connection,
    user_id: &str,
    counter: UserCounter,
    value: u64,
) -> CoreResult<()> {
    let sql = format!(
        "UPDATE users
         SET {} = ?2,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE user_id = ?1;",
        counter.column()
    );
    let changed = conn.execute(&sql, params![user_id, to_i64(value, counter.column())?])?;
    if changed == 0 {
        return Err(CoreError::not_found("user", user_id));
    }
    Ok(())
}

fn parse_user_row(row: &Row<'_>) -> CoreResult<User> {
    Ok(User {
        user_id: row.get("user_id")?,
        tier: row.get("tier")?,
        module_count: to_u64(row.get("module_count")?, "users.module_count")?,
        note_count: to_u64(row.get("note_count")?, "users.note_count")?,
        tag_count: to_u64(row.get("tag_count")?, "users.tag_count")?,
        storage_used_bytes: to_u64(
            row.get("storage_used_bytes")?,
            "users.storage_used_bytes",
        )?,
    })
}
