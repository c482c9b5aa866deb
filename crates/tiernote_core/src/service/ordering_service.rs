//! Manual ordering of modules and notes.
//!
//! # Responsibility
//! - Assign `sort_order` keys on append, single-item reposition, bulk reorder
//!   and cross-module note moves.
//! - Renumber a scope when neighbouring keys have converged.
//!
//! # Invariants
//! - Keys are pairwise distinct inside a scope after every commit.
//! - A bulk reorder applies only when the submitted ids equal the live set.
//! - A cross-module move commits the quota transfer and the re-parenting in
//!   one transaction, or neither.

use crate::config::OrderingConfig;
use crate::error::{CoreError, CoreResult};
use crate::model::entity::{Module, ModuleId, Note, NoteId};
use crate::repo::module_repo::{list_modules, require_owned_module};
use crate::repo::note_repo::{list_notes, reassign_note, require_owned_note};
use crate::repo::order_repo::{list_scope_keys, max_scope_key, write_sort_order, OrderScope};
use crate::service::quota_service::QuotaGuard;
use crate::store::counter_store::{CounterStore, TxScope};
use log::info;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

/// Requested position of an item inside its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// After every current member.
    End,
    /// Between two members adjacent in the current listing. An absent `prev`
    /// means "first", an absent `next` means "last"; both absent is `End`.
    Between {
        prev: Option<Uuid>,
        next: Option<Uuid>,
    },
}

/// One member of an ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderedItem {
    pub id: Uuid,
    pub sort_order: i64,
}

/// Result of planning one placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPlan {
    /// Write this key for the placed item only.
    Key(i64),
    /// No integer fits; rewrite the whole scope in this order.
    Renumber(Vec<Uuid>),
}

/// Evenly spaced key for position `index` (0-based).
pub fn spaced_key(spacing: &OrderingConfig, index: usize) -> CoreResult<i64> {
    i64::try_from(index)
        .ok()
        .and_then(|index| index.checked_mul(spacing.gap))
        .and_then(|offset| spacing.base.checked_add(offset))
        .ok_or_else(|| CoreError::Internal(format!("sort_order overflow at position {index}")))
}

/// Computes the key for `item` placed among `others` (which excludes it).
pub fn plan_placement(
    spacing: &OrderingConfig,
    others: &[(Uuid, i64)],
    item: Uuid,
    placement: Placement,
) -> CoreResult<KeyPlan> {
    let (prev, next) = match placement {
        Placement::End => (None, None),
        Placement::Between { prev, next } => (prev, next),
    };
    if prev == Some(item) || next == Some(item) {
        return Err(CoreError::Validation(
            "an item cannot be placed next to itself".to_string(),
        ));
    }

    let position = |id: Uuid| {
        others
            .iter()
            .position(|(member, _)| *member == id)
            .ok_or_else(|| {
                CoreError::Conflict(format!("neighbour {id} is no longer in this list"))
            })
    };

    let (insert_at, key) = match (prev, next) {
        (None, None) => match others.last() {
            Some((_, last)) => (others.len(), last.checked_add(spacing.gap)),
            None => (0, Some(spacing.base)),
        },
        (Some(prev), None) => {
            let at = position(prev)?;
            if at + 1 != others.len() {
                return Err(CoreError::Conflict(format!(
                    "{prev} is no longer the last item"
                )));
            }
            (at + 1, others[at].1.checked_add(spacing.gap))
        }
        (None, Some(next)) => {
            let at = position(next)?;
            if at != 0 {
                return Err(CoreError::Conflict(format!(
                    "{next} is no longer the first item"
                )));
            }
            (0, others[0].1.checked_sub(spacing.gap))
        }
        (Some(prev), Some(next)) => {
            let lo_at = position(prev)?;
            let hi_at = position(next)?;
            if hi_at != lo_at + 1 {
                return Err(CoreError::Conflict(format!(
                    "{prev} and {next} are no longer adjacent"
                )));
            }
            let (lo, hi) = (others[lo_at].1, others[hi_at].1);
            let key = hi
                .checked_sub(lo)
                .filter(|distance| *distance >= 2)
                .map(|distance| lo + distance / 2);
            (hi_at, key)
        }
    };

    Ok(match key {
        Some(key) => KeyPlan::Key(key),
        None => {
            let mut order: Vec<Uuid> = others.iter().map(|(id, _)| *id).collect();
            order.insert(insert_at, item);
            KeyPlan::Renumber(order)
        }
    })
}

/// Ordering service over a counter store.
pub struct OrderingManager<'s, S: CounterStore> {
    store: &'s S,
    guard: QuotaGuard,
    spacing: OrderingConfig,
}

impl<'s, S: CounterStore> OrderingManager<'s, S> {
    pub fn new(store: &'s S, guard: QuotaGuard, spacing: OrderingConfig) -> Self {
        Self {
            store,
            guard,
            spacing,
        }
    }

    pub fn spacing(&self) -> &OrderingConfig {
        &self.spacing
    }

    /// Key for a new member appended to `scope`. Runs inside the caller's
    /// transaction.
    pub fn append_key(&self, conn: &Connection, scope: &OrderScope) -> CoreResult<i64> {
        match max_scope_key(conn, scope)? {
            Some(max) => max.checked_add(self.spacing.gap).ok_or_else(|| {
                CoreError::Internal(format!("sort_order overflow appending to {scope}"))
            }),
            None => Ok(self.spacing.base),
        }
    }

    /// Moves one member of `scope` to `placement`; returns its new key.
    pub fn reposition(
        &self,
        user_id: &str,
        scope: &OrderScope,
        item_id: Uuid,
        placement: Placement,
    ) -> CoreResult<i64> {
        self.store.run_transaction(&tx_scope(scope), |conn| {
            authorize_scope(conn, user_id, scope)?;
            self.reposition_in_tx(conn, scope, item_id, placement)
        })
    }

    /// Rewrites every key of `scope` to follow `ordered_ids`.
    pub fn reorder(
        &self,
        user_id: &str,
        scope: &OrderScope,
        ordered_ids: &[Uuid],
    ) -> CoreResult<Vec<OrderedItem>> {
        let mut seen = HashSet::with_capacity(ordered_ids.len());
        if let Some(duplicate) = ordered_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(CoreError::Validation(format!(
                "duplicate id {duplicate} in reorder request"
            )));
        }

        self.store.run_transaction(&tx_scope(scope), |conn| {
            authorize_scope(conn, user_id, scope)?;
            let live = list_scope_keys(conn, scope)?;
            let stale = live.len() != ordered_ids.len()
                || live.iter().any(|(id, _)| !seen.contains(id));
            if stale {
                info!(
                    "event=ordering_reorder module=ordering status=rejected scope={} submitted={} live={}",
                    scope,
                    ordered_ids.len(),
                    live.len()
                );
                return Err(CoreError::Conflict(format!(
                    "submitted ids do not match the current listing of {scope}"
                )));
            }

            let mut ordered = Vec::with_capacity(ordered_ids.len());
            for (index, id) in ordered_ids.iter().enumerate() {
                let key = spaced_key(&self.spacing, index)?;
                let unchanged = live
                    .iter()
                    .any(|(live_id, live_key)| live_id == id && *live_key == key);
                if !unchanged {
                    write_sort_order(conn, scope, *id, key)?;
                }
                ordered.push(OrderedItem {
                    id: *id,
                    sort_order: key,
                });
            }
            info!(
                "event=ordering_reorder module=ordering status=ok scope={} count={}",
                scope,
                ordered.len()
            );
            Ok(ordered)
        })
    }

    /// Moves a note into `destination` at `placement`.
    ///
    /// `expected_source` is the module the caller last saw the note in; a
    /// mismatch is a `Conflict`.
    pub fn move_note_to_module(
        &self,
        user_id: &str,
        note_id: NoteId,
        expected_source: ModuleId,
        destination: ModuleId,
        placement: Placement,
    ) -> CoreResult<Note> {
        let scope = if expected_source == destination {
            TxScope::Module(destination)
        } else {
            TxScope::ModulePair {
                from: expected_source,
                to: destination,
            }
        };

        self.store.run_transaction(&scope, |conn| {
            let note = require_owned_note(conn, user_id, note_id)?;
            if note.module_id != expected_source {
                return Err(CoreError::Conflict(format!(
                    "note {note_id} is no longer in module {expected_source}"
                )));
            }

            let target = OrderScope::ModuleNotes(destination);
            if expected_source == destination {
                self.reposition_in_tx(conn, &target, note_id, placement)?;
                return require_owned_note(conn, user_id, note_id);
            }

            require_owned_module(conn, user_id, destination)?;
            let others = list_scope_keys(conn, &target)?;
            let plan = plan_placement(&self.spacing, &others, note_id, placement)?;
            self.guard
                .transfer_note_slot(conn, user_id, expected_source, destination)?;
            match plan {
                KeyPlan::Key(key) => reassign_note(conn, note_id, destination, key)?,
                KeyPlan::Renumber(order) => {
                    reassign_note(conn, note_id, destination, self.spacing.base)?;
                    self.renumber(conn, &target, &order)?;
                }
            }
            info!(
                "event=ordering_move module=ordering status=ok note_id={} from={} to={}",
                note_id, expected_source, destination
            );
            require_owned_note(conn, user_id, note_id)
        })
    }

    /// Live modules of `user_id` in display order.
    pub fn list_modules(&self, user_id: &str) -> CoreResult<Vec<Module>> {
        self.store
            .read_snapshot(&TxScope::User(user_id.to_string()), |conn| {
                list_modules(conn, user_id)
            })
    }

    /// Live notes of one owned module in display order.
    pub fn list_notes(&self, user_id: &str, module_id: ModuleId) -> CoreResult<Vec<Note>> {
        self.store
            .read_snapshot(&TxScope::Module(module_id), |conn| {
                require_owned_module(conn, user_id, module_id)?;
                list_notes(conn, module_id)
            })
    }

    fn reposition_in_tx(
        &self,
        conn: &Connection,
        scope: &OrderScope,
        item_id: Uuid,
        placement: Placement,
    ) -> CoreResult<i64> {
        let keys = list_scope_keys(conn, scope)?;
        if !keys.iter().any(|(id, _)| *id == item_id) {
            return Err(CoreError::not_found(scope.member_entity(), item_id));
        }
        let others: Vec<(Uuid, i64)> = keys
            .into_iter()
            .filter(|(id, _)| *id != item_id)
            .collect();

        match plan_placement(&self.spacing, &others, item_id, placement)? {
            KeyPlan::Key(key) => {
                write_sort_order(conn, scope, item_id, key)?;
                Ok(key)
            }
            KeyPlan::Renumber(order) => {
                self.renumber(conn, scope, &order)?;
                let at = order.iter().position(|id| *id == item_id).unwrap_or(0);
                spaced_key(&self.spacing, at)
            }
        }
    }

    fn renumber(&self, conn: &Connection, scope: &OrderScope, order: &[Uuid]) -> CoreResult<()> {
        for (index, id) in order.iter().enumerate() {
            write_sort_order(conn, scope, *id, spaced_key(&self.spacing, index)?)?;
        }
        info!(
            "event=ordering_renumber module=ordering status=ok scope={} count={}",
            scope,
            order.len()
        );
        Ok(())
    }
}

fn tx_scope(scope: &OrderScope) -> TxScope {
    match scope {
        OrderScope::UserModules(user_id) => TxScope::User(user_id.clone()),
        OrderScope::ModuleNotes(module_id) => TxScope::Module(*module_id),
    }
}

/// Scope must belong to the caller.
fn authorize_scope(conn: &Connection, user_id: &str, scope: &OrderScope) -> CoreResult<()> {
    match scope {
        OrderScope::UserModules(owner) if owner == user_id => Ok(()),
        OrderScope::UserModules(owner) => Err(CoreError::not_found("user", owner)),
        OrderScope::ModuleNotes(module_id) => {
            require_owned_module(conn, user_id, *module_id).map(|_| ())
        }
    }
}
