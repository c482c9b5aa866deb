//! User-scoped tag rows.
//!
//! # Invariants
//! - Tag names are normalized (trimmed, lowercase) before persistence.
//! - Live tag names are unique per user (partial unique index).

use super::parse_uuid;
use crate::error::{CoreError, CoreResult};
use crate::model::entity::{Tag, TagId};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Row};

static TAG_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L}\p{N}][\p{L}\p{N} _\-]{0,31}$").expect("valid tag regex"));

/// Normalizes one tag value; `None` for blank input.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Normalizes and validates a tag name for persistence.
pub fn validated_tag_name(tag: &str) -> CoreResult<String> {
    let normalized = normalize_tag(tag)
        .ok_or_else(|| CoreError::Validation("tag name must not be blank".to_string()))?;
    if !TAG_NAME_RE.is_match(&normalized) {
        return Err(CoreError::Validation(format!(
            "tag name `{normalized}` must be 1-32 letters, digits, spaces, `_` or `-`"
        )));
    }
    Ok(normalized)
}

/// Returns whether the user already has a live tag with this name.
pub fn live_tag_name_exists(conn: &Connection, user_id: &str, name: &str) -> CoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM tags
            WHERE user_id = ?1
              AND name = ?2 COLLATE NOCASE
              AND is_deleted = 0
        );",
        params![user_id, name],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

/// Inserts one live tag.
pub fn insert_tag(conn: &Connection, tag: &Tag) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO tags (tag_uuid, user_id, name, is_deleted) VALUES (?1, ?2, ?3, 0);",
        params![tag.tag_id.to_string(), tag.user_id, tag.name],
    )?;
    Ok(())
}

/// Loads one live tag owned by `user_id`, or `NotFound`.
pub fn require_owned_tag(conn: &Connection, user_id: &str, tag_id: TagId) -> CoreResult<Tag> {
    let tag = conn
        .query_row(
            "SELECT tag_uuid, user_id, name
             FROM tags
             WHERE tag_uuid = ?1
               AND is_deleted = 0;",
            [tag_id.to_string()],
            |row| Ok(parse_tag_row(row)),
        )
        .optional()?
        .transpose()?;
    match tag {
        Some(tag) if tag.user_id == user_id => Ok(tag),
        _ => Err(CoreError::not_found("tag", tag_id)),
    }
}

/// Lists live tags of one user sorted by name.
pub fn list_tags(conn: &Connection, user_id: &str) -> CoreResult<Vec<Tag>> {
    let mut stmt = conn.prepare(
        "SELECT tag_uuid, user_id, name
         FROM tags
         WHERE user_id = ?1
           AND is_deleted = 0
         ORDER BY name COLLATE NOCASE ASC;",
    )?;
    let mut rows = stmt.query([user_id])?;
    let mut tags = Vec::new();
    while let Some(row) = rows.next()? {
        tags.push(parse_tag_row(row)?);
    }
    Ok(tags)
}

/// Tombstones one tag.
pub fn soft_delete_tag(conn: &Connection, tag_id: TagId) -> CoreResult<()> {
    let changed = conn.execute(
        "UPDATE tags SET is_deleted = 1 WHERE tag_uuid = ?1 AND is_deleted = 0;",
        [tag_id.to_string()],
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("tag", tag_id));
    }
    Ok(())
}

fn parse_tag_row(row: &Row<'_>) -> CoreResult<Tag> {
    let tag_uuid: String = row.get("tag_uuid")?;
    Ok(Tag {
        tag_id: parse_uuid(&tag_uuid, "tags.tag_uuid")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
    })
}

#[cfg(test)]
mod tests {
    use super::{normalize_tag, validated_tag_name};

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(normalize_tag("  Work ").as_deref(), Some("work"));
        assert_eq!(normalize_tag("   "), None);
    }

    #[test]
    fn validates_tag_shape() {
        assert_eq!(validated_tag_name("Deep Work").expect("valid"), "deep work");
        assert_eq!(validated_tag_name("读书-2024").expect("unicode"), "读书-2024");
        assert!(validated_tag_name("-leading").is_err());
        assert!(validated_tag_name("semi;colon").is_err());
        assert!(validated_tag_name(&"x".repeat(33)).is_err());
        assert!(validated_tag_name(" ").is_err());
    }
}
