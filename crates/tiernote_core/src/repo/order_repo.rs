//! `sort_order` key access shared by module and note ordering scopes.

use super::parse_uuid;
use crate::error::{CoreError, CoreResult};
use crate::model::entity::{ModuleId, UserId};
use rusqlite::{params, Connection};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Key space in which `sort_order` values must be pairwise distinct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderScope {
    /// All live modules of one user.
    UserModules(UserId),
    /// All live notes of one module.
    ModuleNotes(ModuleId),
}

impl OrderScope {
    fn table(&self) -> &'static str {
        match self {
            Self::UserModules(_) => "modules",
            Self::ModuleNotes(_) => "notes",
        }
    }

    fn id_column(&self) -> &'static str {
        match self {
            Self::UserModules(_) => "module_uuid",
            Self::ModuleNotes(_) => "note_uuid",
        }
    }

    fn owner_column(&self) -> &'static str {
        match self {
            Self::UserModules(_) => "user_id",
            Self::ModuleNotes(_) => "module_uuid",
        }
    }

    fn owner_value(&self) -> String {
        match self {
            Self::UserModules(user_id) => user_id.clone(),
            Self::ModuleNotes(module_id) => module_id.to_string(),
        }
    }

    /// Entity name of scope members, for error messages.
    pub fn member_entity(&self) -> &'static str {
        match self {
            Self::UserModules(_) => "module",
            Self::ModuleNotes(_) => "note",
        }
    }
}

impl Display for OrderScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserModules(user_id) => write!(f, "modules_of:{user_id}"),
            Self::ModuleNotes(module_id) => write!(f, "notes_of:{module_id}"),
        }
    }
}

/// Live `(id, sort_order)` pairs of a scope in display order.
pub fn list_scope_keys(conn: &Connection, scope: &OrderScope) -> CoreResult<Vec<(Uuid, i64)>> {
    let sql = format!(
        "SELECT {id}, sort_order
         FROM {table}
         WHERE {owner} = ?1
           AND is_deleted = 0
         ORDER BY sort_order ASC, {id} ASC;",
        id = scope.id_column(),
        table = scope.table(),
        owner = scope.owner_column(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([scope.owner_value()])?;
    let mut keys = Vec::new();
    while let Some(row) = rows.next()? {
        let id_text: String = row.get(0)?;
        keys.push((parse_uuid(&id_text, scope.id_column())?, row.get(1)?));
    }
    Ok(keys)
}

/// Largest live key in a scope.
pub fn max_scope_key(conn: &Connection, scope: &OrderScope) -> CoreResult<Option<i64>> {
    let sql = format!(
        "SELECT MAX(sort_order)
         FROM {table}
         WHERE {owner} = ?1
           AND is_deleted = 0;",
        table = scope.table(),
        owner = scope.owner_column(),
    );
    let max: Option<i64> = conn.query_row(&sql, [scope.owner_value()], |row| row.get(0))?;
    Ok(max)
}

/// Assigns one member's key; the member must be live and inside the scope.
pub fn write_sort_order(
    conn: &Connection,
    scope: &OrderScope,
    member_id: Uuid,
    sort_order: i64,
) -> CoreResult<()> {
    let sql = format!(
        "UPDATE {table}
         SET sort_order = ?3,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE {id} = ?1
           AND {owner} = ?2
           AND is_deleted = 0;",
        table = scope.table(),
        id = scope.id_column(),
        owner = scope.owner_column(),
    );
    let changed = conn.execute(
        &sql,
        params![member_id.to_string(), scope.owner_value(), sort_order],
    )?;
    if changed == 0 {
        return Err(CoreError::not_found(scope.member_entity(), member_id));
    }
    Ok(())
}
