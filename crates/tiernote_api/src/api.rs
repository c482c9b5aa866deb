//! Use-case handlers.
//!
//! # Responsibility
//! - Sync the caller's user row from the verified auth context.
//! - Run one core use case and wrap the outcome in `ApiResponse`.
//!
//! # Invariants
//! - Handlers never panic; every failure becomes a status-coded envelope.
//! - Advisory checks are read-only; mutations re-check quota authoritatively.

use crate::context::{ApiContext, AuthContext};
use crate::response::ApiResponse;
use log::debug;
use serde::{Deserialize, Serialize};
use tiernote_core::{
    core_version as core_version_inner, ping as ping_inner, CoreResult, Limit, Module, ModuleId,
    Note, NoteId, OrderScope, OrderedItem, Placement, QuotaStatus, SqliteCounterStore,
    StoredFile, Tag, TagId, WorkspaceService,
};
use uuid::Uuid;

/// Advisory quota answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaCheckResponse {
    pub allowed: bool,
    /// `None` when the limit is unbounded.
    pub remaining: Option<u64>,
    pub limit: Limit,
}

impl From<QuotaStatus> for QuotaCheckResponse {
    fn from(value: QuotaStatus) -> Self {
        Self {
            allowed: value.allowed,
            remaining: value.remaining,
            limit: value.limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReorderRequest {
    pub ordered_ids: Vec<Uuid>,
}

/// Move/reposition request for one note.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReorderNoteRequest {
    /// Module the caller last saw the note in.
    pub source_module_id: ModuleId,
    /// Destination module; may equal the source.
    pub module_id: ModuleId,
    #[serde(default)]
    pub prev_id: Option<NoteId>,
    #[serde(default)]
    pub next_id: Option<NoteId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateModuleRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateNoteRequest {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateTagRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadFileRequest {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Minimal health-check API.
pub fn ping() -> String {
    ping_inner().to_owned()
}

pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// May the caller create one more module?
pub fn check_module_creation(
    ctx: &ApiContext,
    auth: &AuthContext,
) -> ApiResponse<QuotaCheckResponse> {
    handle(ctx, auth, "check_module_creation", |service| {
        service
            .quota()
            .check_module_creation(&auth.user_id)
            .map(Into::into)
    })
}

/// May the caller add one more note to `module_id`?
pub fn check_note_creation(
    ctx: &ApiContext,
    auth: &AuthContext,
    module_id: ModuleId,
) -> ApiResponse<QuotaCheckResponse> {
    handle(ctx, auth, "check_note_creation", |service| {
        service
            .quota()
            .check_note_creation(&auth.user_id, module_id)
            .map(Into::into)
    })
}

/// May the caller upload `file_size` bytes?
pub fn check_file_upload(
    ctx: &ApiContext,
    auth: &AuthContext,
    file_size: u64,
) -> ApiResponse<QuotaCheckResponse> {
    handle(ctx, auth, "check_file_upload", |service| {
        service
            .quota()
            .check_file_upload(&auth.user_id, file_size)
            .map(Into::into)
    })
}

pub fn list_modules(ctx: &ApiContext, auth: &AuthContext) -> ApiResponse<Vec<Module>> {
    handle(ctx, auth, "list_modules", |service| {
        service.ordering().list_modules(&auth.user_id)
    })
}

pub fn list_notes(
    ctx: &ApiContext,
    auth: &AuthContext,
    module_id: ModuleId,
) -> ApiResponse<Vec<Note>> {
    handle(ctx, auth, "list_notes", |service| {
        service.ordering().list_notes(&auth.user_id, module_id)
    })
}

/// Replaces the caller's module order; 409 when the id set is stale.
pub fn reorder_modules(
    ctx: &ApiContext,
    auth: &AuthContext,
    request: &ReorderRequest,
) -> ApiResponse<Vec<OrderedItem>> {
    handle(ctx, auth, "reorder_modules", |service| {
        service.ordering().reorder(
            &auth.user_id,
            &OrderScope::UserModules(auth.user_id.clone()),
            &request.ordered_ids,
        )
    })
}

/// Replaces one module's note order; 409 when the id set is stale.
pub fn reorder_notes(
    ctx: &ApiContext,
    auth: &AuthContext,
    module_id: ModuleId,
    request: &ReorderRequest,
) -> ApiResponse<Vec<OrderedItem>> {
    handle(ctx, auth, "reorder_notes", |service| {
        service.ordering().reorder(
            &auth.user_id,
            &OrderScope::ModuleNotes(module_id),
            &request.ordered_ids,
        )
    })
}

/// Moves or repositions one note.
pub fn move_note(
    ctx: &ApiContext,
    auth: &AuthContext,
    note_id: NoteId,
    request: &ReorderNoteRequest,
) -> ApiResponse<Note> {
    let placement = match (request.prev_id, request.next_id) {
        (None, None) => Placement::End,
        (prev, next) => Placement::Between { prev, next },
    };
    handle(ctx, auth, "move_note", |service| {
        service.ordering().move_note_to_module(
            &auth.user_id,
            note_id,
            request.source_module_id,
            request.module_id,
            placement,
        )
    })
}

pub fn create_module(
    ctx: &ApiContext,
    auth: &AuthContext,
    request: &CreateModuleRequest,
) -> ApiResponse<Module> {
    handle(ctx, auth, "create_module", |service| {
        service.create_module(&auth.user_id, &request.name)
    })
}

pub fn delete_module(
    ctx: &ApiContext,
    auth: &AuthContext,
    module_id: ModuleId,
) -> ApiResponse<()> {
    handle(ctx, auth, "delete_module", |service| {
        service.delete_module(&auth.user_id, module_id)
    })
}

pub fn create_note(
    ctx: &ApiContext,
    auth: &AuthContext,
    module_id: ModuleId,
    request: &CreateNoteRequest,
) -> ApiResponse<Note> {
    handle(ctx, auth, "create_note", |service| {
        service.create_note(&auth.user_id, module_id, &request.title)
    })
}

pub fn delete_note(ctx: &ApiContext, auth: &AuthContext, note_id: NoteId) -> ApiResponse<()> {
    handle(ctx, auth, "delete_note", |service| {
        service.delete_note(&auth.user_id, note_id)
    })
}

pub fn create_tag(
    ctx: &ApiContext,
    auth: &AuthContext,
    request: &CreateTagRequest,
) -> ApiResponse<Tag> {
    handle(ctx, auth, "create_tag", |service| {
        service.create_tag(&auth.user_id, &request.name)
    })
}

pub fn delete_tag(ctx: &ApiContext, auth: &AuthContext, tag_id: TagId) -> ApiResponse<()> {
    handle(ctx, auth, "delete_tag", |service| {
        service.delete_tag(&auth.user_id, tag_id)
    })
}

pub fn upload_file(
    ctx: &ApiContext,
    auth: &AuthContext,
    request: &UploadFileRequest,
) -> ApiResponse<StoredFile> {
    handle(ctx, auth, "upload_file", |_| {
        ctx.storage()
            .upload_file(&auth.user_id, &request.file_name, &request.bytes)
    })
}

pub fn delete_file(
    ctx: &ApiContext,
    auth: &AuthContext,
    file_id: Uuid,
) -> ApiResponse<StoredFile> {
    handle(ctx, auth, "delete_file", |_| {
        ctx.storage().delete_file(&auth.user_id, file_id)
    })
}

/// Syncs the user row from `auth`, then runs `f`.
fn handle<T>(
    ctx: &ApiContext,
    auth: &AuthContext,
    operation: &str,
    f: impl FnOnce(&WorkspaceService<'_, SqliteCounterStore>) -> CoreResult<T>,
) -> ApiResponse<T> {
    let service = ctx.workspace();
    let result = service
        .provision_user(&auth.user_id, &auth.tier)
        .and_then(|_| f(&service));
    let response = ApiResponse::from_result(operation, result);
    debug!(
        "event=api_call module=api status={} operation={} user_id={} http_status={}",
        if response.is_ok() { "ok" } else { "rejected" },
        operation,
        auth.user_id,
        response.status
    );
    response
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
