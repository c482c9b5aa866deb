//! Tier quota enforcement.
//!
//! # Responsibility
//! - Validate-and-reserve counter capacity inside the same transaction as the
//!   entity mutation that consumes it.
//! - Release capacity on deletes and moves.
//! - Answer advisory, non-binding pre-checks from a read snapshot.
//!
//! # Invariants
//! - A positive reservation commits only if `used + delta <= limit`.
//! - Releases never fail on quota; a release below zero is counter drift and
//!   aborts with `Internal`.
//! - `QuotaExceeded` is a stable outcome and is never retried.
//! - Advisory checks never write and never stand in for the authoritative
//!   check.

use crate::config::QuotaConfig;
use crate::error::{CoreError, CoreResult, QuotaExceeded};
use crate::model::entity::{ModuleId, User};
use crate::model::tier::{Limit, QuotaResource, TierLimits, TierPolicy, FEATURE_FILE_UPLOAD};
use crate::repo::module_repo::{require_owned_module, write_module_note_count};
use crate::repo::user_repo::{require_user, write_user_count, UserCounter};
use crate::store::counter_store::{CounterStore, TxScope};
use log::{debug, info, warn};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::Arc;

/// Outcome of one committed counter change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub resource: QuotaResource,
    pub before: u64,
    pub after: u64,
    pub limit: Limit,
}

/// Advisory answer to "may I create/upload this now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub resource: QuotaResource,
    pub allowed: bool,
    pub used: u64,
    pub limit: Limit,
    /// `None` when the limit is unbounded.
    pub remaining: Option<u64>,
}

/// Applies `delta` to `used` under `limit`.
///
/// Positive deltas are checked against the limit; negative deltas release
/// capacity unconditionally but must not underflow.
pub fn apply_delta(
    resource: QuotaResource,
    used: u64,
    delta: i64,
    limit: Limit,
) -> CoreResult<u64> {
    if delta >= 0 {
        let requested = delta as u64;
        let exceeded = QuotaExceeded {
            resource,
            limit: limit.as_finite().unwrap_or(u64::MAX),
            used,
            requested,
        };
        let projected = used.checked_add(requested).ok_or(exceeded)?;
        if !limit.admits(projected) {
            return Err(exceeded.into());
        }
        return Ok(projected);
    }

    used.checked_sub(delta.unsigned_abs()).ok_or_else(|| {
        CoreError::Internal(format!(
            "{} counter drift: releasing {} from {used}",
            resource.as_str(),
            delta.unsigned_abs()
        ))
    })
}

/// In-transaction reservation logic shared by quota, ordering and storage
/// services.
#[derive(Debug, Clone)]
pub struct QuotaGuard {
    policy: Arc<TierPolicy>,
    config: QuotaConfig,
}

impl QuotaGuard {
    pub fn new(policy: Arc<TierPolicy>, config: QuotaConfig) -> Self {
        Self { policy, config }
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    /// Resolves the limits governing `user`.
    ///
    /// `strict` turns an unknown tier into `TierUnknown` when the config asks
    /// for it; otherwise the most restrictive tier applies.
    pub fn limits_for(&self, user: &User, strict: bool) -> CoreResult<&TierLimits> {
        let resolution = self.policy.resolve(&user.tier);
        if !resolution.recognized {
            if strict && self.config.reject_unknown_tiers {
                warn!(
                    "event=tier_resolve module=quota status=rejected user_id={} tier={}",
                    user.user_id, user.tier
                );
                return Err(CoreError::TierUnknown(user.tier.clone()));
            }
            warn!(
                "event=tier_resolve module=quota status=fallback user_id={} tier={} applied_tier={}",
                user.user_id, user.tier, resolution.limits.name
            );
        }
        Ok(resolution.limits)
    }

    /// Reserves one module slot for `user_id`.
    pub fn reserve_module(&self, conn: &Connection, user_id: &str) -> CoreResult<Reservation> {
        let user = require_user(conn, user_id)?;
        let limit = self.limits_for(&user, true)?.max_modules;
        self.apply_user_delta(conn, &user, UserCounter::Modules, QuotaResource::Modules, 1, limit)
    }

    /// Reserves one note slot in `module_id`; also bumps the user aggregate.
    pub fn reserve_note(
        &self,
        conn: &Connection,
        user_id: &str,
        module_id: ModuleId,
    ) -> CoreResult<Reservation> {
        let user = require_user(conn, user_id)?;
        let module = require_owned_module(conn, user_id, module_id)?;
        let limit = self.limits_for(&user, false)?.max_notes_per_module;
        let after = self.checked(
            &user,
            apply_delta(QuotaResource::NotesPerModule, module.note_count, 1, limit),
        )?;
        write_module_note_count(conn, module_id, after)?;
        let aggregate = apply_delta(
            QuotaResource::NotesPerModule,
            user.note_count,
            1,
            Limit::Unbounded,
        )?;
        write_user_count(conn, user_id, UserCounter::Notes, aggregate)?;
        Ok(self.reserved(
            &user,
            Reservation {
                resource: QuotaResource::NotesPerModule,
                before: module.note_count,
                after,
                limit,
            },
        ))
    }

    /// Reserves one tag slot for `user_id`.
    pub fn reserve_tag(&self, conn: &Connection, user_id: &str) -> CoreResult<Reservation> {
        let user = require_user(conn, user_id)?;
        let limit = self.limits_for(&user, false)?.max_tags;
        self.apply_user_delta(conn, &user, UserCounter::Tags, QuotaResource::Tags, 1, limit)
    }

    /// Reserves (`delta > 0`) or releases (`delta < 0`) storage bytes.
    pub fn reserve_storage(
        &self,
        conn: &Connection,
        user_id: &str,
        delta_bytes: i64,
    ) -> CoreResult<Reservation> {
        let user = require_user(conn, user_id)?;
        let limit = self.limits_for(&user, false)?.max_storage_bytes;
        self.apply_user_delta(
            conn,
            &user,
            UserCounter::StorageBytes,
            QuotaResource::StorageBytes,
            delta_bytes,
            limit,
        )
    }

    /// Releases one module slot plus the notes it still held.
    pub fn release_module(
        &self,
        conn: &Connection,
        user_id: &str,
        notes_in_module: u64,
    ) -> CoreResult<Reservation> {
        let user = require_user(conn, user_id)?;
        let notes_delta = i64::try_from(notes_in_module)
            .map_err(|_| CoreError::Internal("module note count overflow".to_string()))?;
        let aggregate = apply_delta(
            QuotaResource::NotesPerModule,
            user.note_count,
            -notes_delta,
            Limit::Unbounded,
        )?;
        write_user_count(conn, user_id, UserCounter::Notes, aggregate)?;
        self.apply_user_delta(
            conn,
            &user,
            UserCounter::Modules,
            QuotaResource::Modules,
            -1,
            Limit::Unbounded,
        )
    }

    /// Releases one note slot in `module_id` and in the user aggregate.
    pub fn release_note(
        &self,
        conn: &Connection,
        user_id: &str,
        module_id: ModuleId,
    ) -> CoreResult<Reservation> {
        let user = require_user(conn, user_id)?;
        let reservation = self.release_module_note_slot(conn, module_id, user_id)?;
        let aggregate = apply_delta(
            QuotaResource::NotesPerModule,
            user.note_count,
            -1,
            Limit::Unbounded,
        )?;
        write_user_count(conn, user_id, UserCounter::Notes, aggregate)?;
        Ok(reservation)
    }

    /// Releases one tag slot.
    pub fn release_tag(&self, conn: &Connection, user_id: &str) -> CoreResult<Reservation> {
        let user = require_user(conn, user_id)?;
        self.apply_user_delta(
            conn,
            &user,
            UserCounter::Tags,
            QuotaResource::Tags,
            -1,
            Limit::Unbounded,
        )
    }

    /// Moves one note slot from `from` to `to` without touching the user
    /// aggregate. The destination reservation is checked first so a full
    /// destination leaves the source untouched.
    pub fn transfer_note_slot(
        &self,
        conn: &Connection,
        user_id: &str,
        from: ModuleId,
        to: ModuleId,
    ) -> CoreResult<Reservation> {
        let user = require_user(conn, user_id)?;
        let destination = require_owned_module(conn, user_id, to)?;
        let limit = self.limits_for(&user, false)?.max_notes_per_module;
        let after = self.checked(
            &user,
            apply_delta(QuotaResource::NotesPerModule, destination.note_count, 1, limit),
        )?;
        self.release_module_note_slot(conn, from, user_id)?;
        write_module_note_count(conn, to, after)?;
        Ok(self.reserved(
            &user,
            Reservation {
                resource: QuotaResource::NotesPerModule,
                before: destination.note_count,
                after,
                limit,
            },
        ))
    }

    /// Read-only status for one resource given current usage.
    pub fn status(
        &self,
        limits: &TierLimits,
        resource: QuotaResource,
        used: u64,
        requested: u64,
    ) -> QuotaStatus {
        let limit = limits.limit_for(resource);
        QuotaStatus {
            resource,
            allowed: used
                .checked_add(requested)
                .is_some_and(|projected| limit.admits(projected)),
            used,
            limit,
            remaining: limit.remaining(used),
        }
    }

    fn release_module_note_slot(
        &self,
        conn: &Connection,
        module_id: ModuleId,
        user_id: &str,
    ) -> CoreResult<Reservation> {
        let module = require_owned_module(conn, user_id, module_id)?;
        let after = apply_delta(
            QuotaResource::NotesPerModule,
            module.note_count,
            -1,
            Limit::Unbounded,
        )?;
        write_module_note_count(conn, module_id, after)?;
        Ok(Reservation {
            resource: QuotaResource::NotesPerModule,
            before: module.note_count,
            after,
            limit: Limit::Unbounded,
        })
    }

    fn apply_user_delta(
        &self,
        conn: &Connection,
        user: &User,
        counter: UserCounter,
        resource: QuotaResource,
        delta: i64,
        limit: Limit,
    ) -> CoreResult<Reservation> {
        let before = counter.value_of(user);
        let after = self.checked(user, apply_delta(resource, before, delta, limit))?;
        write_user_count(conn, &user.user_id, counter, after)?;
        Ok(self.reserved(
            user,
            Reservation {
                resource,
                before,
                after,
                limit,
            },
        ))
    }

    fn checked(&self, user: &User, outcome: CoreResult<u64>) -> CoreResult<u64> {
        if let Err(CoreError::QuotaExceeded(details)) = &outcome {
            info!(
                "event=quota_reserve module=quota status=rejected user_id={} tier={} resource={} used={} limit={} requested={}",
                user.user_id,
                user.tier,
                details.resource.as_str(),
                details.used,
                details.limit,
                details.requested
            );
        }
        outcome
    }

    fn reserved(&self, user: &User, reservation: Reservation) -> Reservation {
        debug!(
            "event=quota_reserve module=quota status=ok user_id={} resource={} before={} after={} limit={}",
            user.user_id,
            reservation.resource.as_str(),
            reservation.before,
            reservation.after,
            reservation.limit
        );
        reservation
    }
}

/// Transactional quota enforcer over a counter store.
pub struct QuotaEnforcer<'s, S: CounterStore> {
    store: &'s S,
    guard: QuotaGuard,
}

impl<'s, S: CounterStore> QuotaEnforcer<'s, S> {
    pub fn new(store: &'s S, guard: QuotaGuard) -> Self {
        Self { store, guard }
    }

    pub fn guard(&self) -> &QuotaGuard {
        &self.guard
    }

    /// Reserves a module slot and runs `create` in the same transaction.
    pub fn reserve_module_creation<T, F>(&self, user_id: &str, mut create: F) -> CoreResult<T>
    where
        F: FnMut(&Connection, &Reservation) -> CoreResult<T>,
    {
        let scope = TxScope::User(user_id.to_string());
        self.store.run_transaction(&scope, |conn| {
            let reservation = self.guard.reserve_module(conn, user_id)?;
            create(conn, &reservation)
        })
    }

    /// Reserves a note slot in `module_id` and runs `create` in the same
    /// transaction.
    pub fn reserve_note_creation<T, F>(
        &self,
        module_id: ModuleId,
        user_id: &str,
        mut create: F,
    ) -> CoreResult<T>
    where
        F: FnMut(&Connection, &Reservation) -> CoreResult<T>,
    {
        let scope = TxScope::Module(module_id);
        self.store.run_transaction(&scope, |conn| {
            let reservation = self.guard.reserve_note(conn, user_id, module_id)?;
            create(conn, &reservation)
        })
    }

    /// Reserves a tag slot and runs `create` in the same transaction.
    pub fn reserve_tag_creation<T, F>(&self, user_id: &str, mut create: F) -> CoreResult<T>
    where
        F: FnMut(&Connection, &Reservation) -> CoreResult<T>,
    {
        let scope = TxScope::User(user_id.to_string());
        self.store.run_transaction(&scope, |conn| {
            let reservation = self.guard.reserve_tag(conn, user_id)?;
            create(conn, &reservation)
        })
    }

    /// Reserves or releases storage bytes on their own.
    pub fn reserve_storage(&self, user_id: &str, delta_bytes: i64) -> CoreResult<Reservation> {
        self.reserve_storage_with(user_id, delta_bytes, |_, reservation| Ok(*reservation))
    }

    /// Reserves or releases storage bytes and runs `then` in the same
    /// transaction.
    pub fn reserve_storage_with<T, F>(
        &self,
        user_id: &str,
        delta_bytes: i64,
        mut then: F,
    ) -> CoreResult<T>
    where
        F: FnMut(&Connection, &Reservation) -> CoreResult<T>,
    {
        let scope = TxScope::User(user_id.to_string());
        self.store.run_transaction(&scope, |conn| {
            let reservation = self.guard.reserve_storage(conn, user_id, delta_bytes)?;
            then(conn, &reservation)
        })
    }

    /// Advisory: may `user_id` create one more module now?
    pub fn check_module_creation(&self, user_id: &str) -> CoreResult<QuotaStatus> {
        let scope = TxScope::User(user_id.to_string());
        self.store.read_snapshot(&scope, |conn| {
            let user = require_user(conn, user_id)?;
            let limits = self.guard.limits_for(&user, false)?;
            Ok(self
                .guard
                .status(limits, QuotaResource::Modules, user.module_count, 1))
        })
    }

    /// Advisory: may `user_id` add one more note to `module_id` now?
    pub fn check_note_creation(&self, user_id: &str, module_id: ModuleId) -> CoreResult<QuotaStatus> {
        let scope = TxScope::Module(module_id);
        self.store.read_snapshot(&scope, |conn| {
            let user = require_user(conn, user_id)?;
            let module = require_owned_module(conn, user_id, module_id)?;
            let limits = self.guard.limits_for(&user, false)?;
            Ok(self.guard.status(
                limits,
                QuotaResource::NotesPerModule,
                module.note_count,
                1,
            ))
        })
    }

    /// Advisory: may `user_id` upload `file_size` bytes now?
    pub fn check_file_upload(&self, user_id: &str, file_size: u64) -> CoreResult<QuotaStatus> {
        let scope = TxScope::User(user_id.to_string());
        self.store.read_snapshot(&scope, |conn| {
            let user = require_user(conn, user_id)?;
            let limits = self.guard.limits_for(&user, false)?;
            let mut status = self.guard.status(
                limits,
                QuotaResource::StorageBytes,
                user.storage_used_bytes,
                file_size,
            );
            status.allowed = status.allowed && limits.has_feature(FEATURE_FILE_UPLOAD);
            Ok(status)
        })
    }
}
