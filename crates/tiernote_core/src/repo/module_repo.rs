//! Module rows: per-user containers with a note counter.
//!
//! # Invariants
//! - Listing is deterministic: `sort_order ASC, module_uuid ASC`.

use super::{parse_uuid, to_i64, to_u64};
use crate::error::{CoreError, CoreResult};
use crate::model::entity::{Module, ModuleId};
use rusqlite::{params, Connection, OptionalExtension, Row};

const MODULE_SELECT_SQL: &str = "SELECT
    module_uuid,
    user_id,
    name,
    sort_order,
    note_count
FROM modules";

/// Inserts one live module.
pub fn insert_module(conn: &Connection, module: &Module) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO modules (
            module_uuid,
            user_id,
            name,
            sort_order,
            note_count,
            is_deleted
        ) VALUES (?1, ?2, ?3, ?4, ?5, 0);",
        params![
            module.module_id.to_string(),
            module.user_id,
            module.name,
            module.sort_order,
            to_i64(module.note_count, "modules.note_count")?,
        ],
    )?;
    Ok(())
}

/// Loads one live module regardless of owner.
pub fn load_module(conn: &Connection, module_id: ModuleId) -> CoreResult<Option<Module>> {
    let sql = format!("{MODULE_SELECT_SQL} WHERE module_uuid = ?1 AND is_deleted = 0;");
    conn.query_row(&sql, [module_id.to_string()], |row| {
        Ok(parse_module_row(row))
    })
    .optional()?
    .transpose()
}

/// Loads one live module owned by `user_id`, or `NotFound`.
pub fn require_owned_module(
    conn: &Connection,
    user_id: &str,
    module_id: ModuleId,
) -> CoreResult<Module> {
    match load_module(conn, module_id)? {
        Some(module) if module.user_id == user_id => Ok(module),
        _ => Err(CoreError::not_found("module", module_id)),
    }
}

/// Lists live modules of one user in display order.
pub fn list_modules(conn: &Connection, user_id: &str) -> CoreResult<Vec<Module>> {
    let sql = format!(
        "{MODULE_SELECT_SQL}
         WHERE user_id = ?1
           AND is_deleted = 0
         ORDER BY sort_order ASC, module_uuid ASC;"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([user_id])?;
    let mut modules = Vec::new();
    while let Some(row) = rows.next()? {
        modules.push(parse_module_row(row)?);
    }
    Ok(modules)
}

/// Overwrites the note counter of one module.
pub fn write_module_note_count(
    conn: &Connection,
    module_id: ModuleId,
    value: u64,
) -> CoreResult<()> {
    let changed = conn.execute(
        "UPDATE modules
         SET note_count = ?2,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE module_uuid = ?1
           AND is_deleted = 0;",
        params![module_id.to_string(), to_i64(value, "modules.note_count")?],
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("module", module_id));
    }
    Ok(())
}

/// Tombstones one module.
pub fn soft_delete_module(conn: &Connection, module_id: ModuleId) -> CoreResult<()> {
    let changed = conn.execute(
        "UPDATE modules
         SET is_deleted = 1,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE module_uuid = ?1
           AND is_deleted = 0;",
        [module_id.to_string()],
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("module", module_id));
    }
    Ok(())
}

fn parse_module_row(row: &Row<'_>) -> CoreResult<Module> {
    let module_uuid: String = row.get("module_uuid")?;
    Ok(Module {
        module_id: parse_uuid(&module_uuid, "modules.module_uuid")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        sort_order: row.get("sort_order")?,
        note_count: to_u64(row.get("note_count")?, "modules.note_count")?,
    })
}
