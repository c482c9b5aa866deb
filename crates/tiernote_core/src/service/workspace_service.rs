//! Workspace entity lifecycle.
//!
//! # Responsibility
//! - Provision users and apply tier changes.
//! - Create and delete modules, notes and tags through the quota enforcer
//!   and ordering manager so counters and keys stay consistent.
//!
//! # Invariants
//! - Every create runs its entity insert inside the reservation transaction.
//! - Every delete releases counters in the same transaction as the tombstone.
//! - A tier change never deletes existing resources.

use crate::config::OrderingConfig;
use crate::error::{CoreError, CoreResult};
use crate::model::entity::{Module, ModuleId, Note, NoteId, Tag, TagId, User};
use crate::model::tier::normalize_tier_name;
use crate::repo::module_repo::{insert_module, require_owned_module, soft_delete_module};
use crate::repo::note_repo::{
    insert_note, require_owned_note, soft_delete_note, soft_delete_notes_in_module,
};
use crate::repo::order_repo::OrderScope;
use crate::repo::tag_repo::{
    insert_tag, list_tags, live_tag_name_exists, require_owned_tag, soft_delete_tag,
    validated_tag_name,
};
use crate::repo::user_repo::{insert_user_if_missing, require_user, update_tier};
use crate::service::ordering_service::OrderingManager;
use crate::service::quota_service::{QuotaEnforcer, QuotaGuard};
use crate::store::counter_store::{CounterStore, TxScope};
use log::{info, warn};
use uuid::Uuid;

/// Entity lifecycle facade.
pub struct WorkspaceService<'s, S: CounterStore> {
    store: &'s S,
    quota: QuotaEnforcer<'s, S>,
    ordering: OrderingManager<'s, S>,
}

impl<'s, S: CounterStore> WorkspaceService<'s, S> {
    pub fn new(store: &'s S, guard: QuotaGuard, spacing: OrderingConfig) -> Self {
        Self {
            store,
            quota: QuotaEnforcer::new(store, guard.clone()),
            ordering: OrderingManager::new(store, guard, spacing),
        }
    }

    pub fn quota(&self) -> &QuotaEnforcer<'s, S> {
        &self.quota
    }

    pub fn ordering(&self) -> &OrderingManager<'s, S> {
        &self.ordering
    }

    /// Ensures a user row exists and carries `tier`.
    pub fn provision_user(&self, user_id: &str, tier: &str) -> CoreResult<User> {
        let user_id = normalize_required(user_id, "user id")?;
        let tier = normalize_tier_name(tier);
        if tier.is_empty() {
            return Err(CoreError::Validation("tier must not be blank".to_string()));
        }

        self.store
            .run_transaction(&TxScope::User(user_id.to_string()), |conn| {
                if insert_user_if_missing(conn, user_id, &tier)? {
                    info!(
                        "event=user_provision module=workspace status=created user_id={} tier={}",
                        user_id, tier
                    );
                } else {
                    let current = require_user(conn, user_id)?;
                    if current.tier != tier {
                        update_tier(conn, user_id, &tier)?;
                        info!(
                            "event=user_provision module=workspace status=tier_changed user_id={} from={} to={}",
                            user_id, current.tier, tier
                        );
                    }
                }
                require_user(conn, user_id)
            })
    }

    pub fn get_user(&self, user_id: &str) -> CoreResult<User> {
        self.store
            .read_snapshot(&TxScope::User(user_id.to_string()), |conn| {
                require_user(conn, user_id)
            })
    }

    /// Creates a module appended after the user's existing modules.
    pub fn create_module(&self, user_id: &str, name: &str) -> CoreResult<Module> {
        let name = normalize_required(name, "module name")?;
        let scope = OrderScope::UserModules(user_id.to_string());
        self.quota.reserve_module_creation(user_id, |conn, _| {
            let module = Module {
                module_id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                name: name.to_string(),
                sort_order: self.ordering.append_key(conn, &scope)?,
                note_count: 0,
            };
            insert_module(conn, &module)?;
            Ok(module)
        })
    }

    /// Tombstones a module and its notes, releasing their counts.
    pub fn delete_module(&self, user_id: &str, module_id: ModuleId) -> CoreResult<()> {
        self.store
            .run_transaction(&TxScope::Module(module_id), |conn| {
                let module = require_owned_module(conn, user_id, module_id)?;
                let removed = soft_delete_notes_in_module(conn, module_id)?;
                if removed != module.note_count {
                    warn!(
                        "event=module_delete module=workspace status=drift module_id={} note_count={} live_notes={}",
                        module_id, module.note_count, removed
                    );
                }
                soft_delete_module(conn, module_id)?;
                self.quota.guard().release_module(conn, user_id, removed)?;
                info!(
                    "event=module_delete module=workspace status=ok user_id={} module_id={} notes={}",
                    user_id, module_id, removed
                );
                Ok(())
            })
    }

    /// Creates a note appended to the end of `module_id`.
    pub fn create_note(&self, user_id: &str, module_id: ModuleId, title: &str) -> CoreResult<Note> {
        let title = normalize_required(title, "note title")?;
        let scope = OrderScope::ModuleNotes(module_id);
        self.quota
            .reserve_note_creation(module_id, user_id, |conn, _| {
                let note = Note {
                    note_id: Uuid::new_v4(),
                    module_id,
                    user_id: user_id.to_string(),
                    title: title.to_string(),
                    sort_order: self.ordering.append_key(conn, &scope)?,
                };
                insert_note(conn, &note)?;
                Ok(note)
            })
    }

    pub fn delete_note(&self, user_id: &str, note_id: NoteId) -> CoreResult<()> {
        self.store
            .run_transaction(&TxScope::User(user_id.to_string()), |conn| {
                let note = require_owned_note(conn, user_id, note_id)?;
                soft_delete_note(conn, note_id)?;
                self.quota
                    .guard()
                    .release_note(conn, user_id, note.module_id)?;
                Ok(())
            })
    }

    /// Creates a tag; names are unique per user among live tags.
    pub fn create_tag(&self, user_id: &str, name: &str) -> CoreResult<Tag> {
        let name = validated_tag_name(name)?;
        self.quota.reserve_tag_creation(user_id, |conn, _| {
            if live_tag_name_exists(conn, user_id, &name)? {
                return Err(CoreError::Conflict(format!("tag `{name}` already exists")));
            }
            let tag = Tag {
                tag_id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                name: name.clone(),
            };
            insert_tag(conn, &tag)?;
            Ok(tag)
        })
    }

    pub fn delete_tag(&self, user_id: &str, tag_id: TagId) -> CoreResult<()> {
        self.store
            .run_transaction(&TxScope::User(user_id.to_string()), |conn| {
                require_owned_tag(conn, user_id, tag_id)?;
                soft_delete_tag(conn, tag_id)?;
                self.quota.guard().release_tag(conn, user_id)?;
                Ok(())
            })
    }

    pub fn list_tags(&self, user_id: &str) -> CoreResult<Vec<Tag>> {
        self.store
            .read_snapshot(&TxScope::User(user_id.to_string()), |conn| {
                list_tags(conn, user_id)
            })
    }
}

fn normalize_required<'a>(value: &'a str, what: &str) -> CoreResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(format!("{what} must not be blank")));
    }
    Ok(trimmed)
}
