//! Note rows: ordered members of exactly one module.
//!
//! # Invariants
//! - Listing is deterministic: `sort_order ASC, note_uuid ASC`.
//! - A note's `user_id` always equals its module's `user_id`.

use super::{parse_uuid, to_u64};
use crate::error::{CoreError, CoreResult};
use crate::model::entity::{ModuleId, Note, NoteId};
use rusqlite::{params, Connection, OptionalExtension, Row};

const NOTE_SELECT_SQL: &str = "SELECT
    note_uuid,
    module_uuid,
    user_id,
    title,
    sort_order
FROM notes";

/// Inserts one live note.
pub fn insert_note(conn: &Connection, note: &Note) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO notes (
            note_uuid,
            module_uuid,
            user_id,
            title,
            sort_order,
            is_deleted
        ) VALUES (?1, ?2, ?3, ?4, ?5, 0);",
        params![
            note.note_id.to_string(),
            note.module_id.to_string(),
            note.user_id,
            note.title,
            note.sort_order,
        ],
    )?;
    Ok(())
}

/// Loads one live note regardless of owner.
pub fn load_note(conn: &Connection, note_id: NoteId) -> CoreResult<Option<Note>> {
    let sql = format!("{NOTE_SELECT_SQL} WHERE note_uuid = ?1 AND is_deleted = 0;");
    conn.query_row(&sql, [note_id.to_string()], |row| Ok(parse_note_row(row)))
        .optional()?
        .transpose()
}

/// Loads one live note owned by `user_id`, or `NotFound`.
pub fn require_owned_note(conn: &Connection, user_id: &str, note_id: NoteId) -> CoreResult<Note> {
    match load_note(conn, note_id)? {
        Some(note) if note.user_id == user_id => Ok(note),
        _ => Err(CoreError::not_found("note", note_id)),
    }
}

/// Lists live notes of one module in display order.
pub fn list_notes(conn: &Connection, module_id: ModuleId) -> CoreResult<Vec<Note>> {
    let sql = format!(
        "{NOTE_SELECT_SQL}
         WHERE module_uuid = ?1
           AND is_deleted = 0
         ORDER BY sort_order ASC, note_uuid ASC;"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([module_id.to_string()])?;
    let mut notes = Vec::new();
    while let Some(row) = rows.next()? {
        notes.push(parse_note_row(row)?);
    }
    Ok(notes)
}

/// Counts live notes of one module straight from the rows.
pub fn count_live_notes(conn: &Connection, module_id: ModuleId) -> CoreResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*)
         FROM notes
         WHERE module_uuid = ?1
           AND is_deleted = 0;",
        [module_id.to_string()],
        |row| row.get(0),
    )?;
    to_u64(count, "notes.count")
}

/// Re-parents one note and assigns its key in the destination module.
pub fn reassign_note(
    conn: &Connection,
    note_id: NoteId,
    module_id: ModuleId,
    sort_order: i64,
) -> CoreResult<()> {
    let changed = conn.execute(
        "UPDATE notes
         SET module_uuid = ?2,
             sort_order = ?3,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE note_uuid = ?1
           AND is_deleted = 0;",
        params![note_id.to_string(), module_id.to_string(), sort_order],
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("note", note_id));
    }
    Ok(())
}

/// Tombstones one note.
pub fn soft_delete_note(conn: &Connection, note_id: NoteId) -> CoreResult<()> {
    let changed = conn.execute(
        "UPDATE notes
         SET is_deleted = 1,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE note_uuid = ?1
           AND is_deleted = 0;",
        [note_id.to_string()],
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("note", note_id));
    }
    Ok(())
}

/// Tombstones every live note of one module; returns how many changed.
pub fn soft_delete_notes_in_module(conn: &Connection, module_id: ModuleId) -> CoreResult<u64> {
    let changed = conn.execute(
        "UPDATE notes
         SET is_deleted = 1,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE module_uuid = ?1
           AND is_deleted = 0;",
        [module_id.to_string()],
    )?;
    Ok(changed as u64)
}

fn parse_note_row(row: &Row<'_>) -> CoreResult<Note> {
    let note_uuid: String = row.get("note_uuid")?;
    let module_uuid: String = row.get("module_uuid")?;
    Ok(Note {
        note_id: parse_uuid(&note_uuid, "notes.note_uuid")?,
        module_id: parse_uuid(&module_uuid, "notes.module_uuid")?,
        user_id: row.get("user_id")?,
        title: row.get("title")?,
        sort_order: row.get("sort_order")?,
    })
}
