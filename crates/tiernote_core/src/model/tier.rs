//! Tier limit table and lookup policy.
//!
//! # Responsibility
//! - Define per-tier resource limits with an explicit unbounded variant.
//! - Resolve tier names to limits with a restrictive fallback.
//!
//! # Invariants
//! - A `TierPolicy` is never empty and never mutated after construction.
//! - Unknown tier names resolve to the most restrictive tier, never to an
//!   unbounded one.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Feature flag gating file uploads.
pub const FEATURE_FILE_UPLOAD: &str = "file_upload";
/// Feature flag gating markdown/zip export.
pub const FEATURE_EXPORT: &str = "export";
/// Feature flag gating note sharing links.
pub const FEATURE_SHARING: &str = "sharing";

/// Name of the built-in entry tier.
pub const TIER_FREE: &str = "free";
/// Name of the built-in paid tier.
pub const TIER_PRO: &str = "pro";

const MIB: u64 = 1024 * 1024;

/// Upper bound for one counted resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "LimitRepr", into = "LimitRepr")]
pub enum Limit {
    /// Hard cap; usage may reach but never exceed it.
    Finite(u64),
    /// No cap for this resource.
    Unbounded,
}

impl Limit {
    /// Returns true when `projected` usage stays within this limit.
    pub fn admits(self, projected: u64) -> bool {
        match self {
            Self::Finite(max) => projected <= max,
            Self::Unbounded => true,
        }
    }

    /// Remaining headroom for `used`, `None` when unbounded.
    pub fn remaining(self, used: u64) -> Option<u64> {
        match self {
            Self::Finite(max) => Some(max.saturating_sub(used)),
            Self::Unbounded => None,
        }
    }

    /// Finite cap value, `None` when unbounded.
    pub fn as_finite(self) -> Option<u64> {
        match self {
            Self::Finite(max) => Some(max),
            Self::Unbounded => None,
        }
    }

    fn restrictiveness_rank(self) -> (u8, u64) {
        // Lower rank = more restrictive.
        match self {
            Self::Finite(max) => (0, max),
            Self::Unbounded => (1, 0),
        }
    }
}

impl Display for Limit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Finite(max) => write!(f, "{max}"),
            Self::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Serialized limit shape: a non-negative integer or the string `"unbounded"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum LimitRepr {
    Count(u64),
    Keyword(String),
}

impl TryFrom<LimitRepr> for Limit {
    type Error = String;

    fn try_from(value: LimitRepr) -> Result<Self, Self::Error> {
        match value {
            LimitRepr::Count(max) => Ok(Self::Finite(max)),
            LimitRepr::Keyword(keyword) if keyword.trim() == "unbounded" => Ok(Self::Unbounded),
            LimitRepr::Keyword(other) => Err(format!(
                "invalid limit `{other}`; expected a non-negative integer or \"unbounded\""
            )),
        }
    }
}

impl From<Limit> for LimitRepr {
    fn from(value: Limit) -> Self {
        match value {
            Limit::Finite(max) => Self::Count(max),
            Limit::Unbounded => Self::Keyword("unbounded".to_string()),
        }
    }
}

/// Counted resource classes governed by tier limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaResource {
    Modules,
    NotesPerModule,
    Tags,
    StorageBytes,
}

impl QuotaResource {
    /// Stable string id used in logs and API payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Modules => "modules",
            Self::NotesPerModule => "notes_per_module",
            Self::Tags => "tags",
            Self::StorageBytes => "storage_bytes",
        }
    }
}

/// Limits attached to one named tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub name: String,
    pub max_modules: Limit,
    pub max_notes_per_module: Limit,
    pub max_tags: Limit,
    pub max_storage_bytes: Limit,
    #[serde(default)]
    pub features: BTreeSet<String>,
}

impl TierLimits {
    /// Returns the limit governing `resource`.
    pub fn limit_for(&self, resource: QuotaResource) -> Limit {
        match resource {
            QuotaResource::Modules => self.max_modules,
            QuotaResource::NotesPerModule => self.max_notes_per_module,
            QuotaResource::Tags => self.max_tags,
            QuotaResource::StorageBytes => self.max_storage_bytes,
        }
    }

    /// Returns whether this tier grants `feature`.
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    /// Built-in `free` tier.
    pub fn free() -> Self {
        Self {
            name: TIER_FREE.to_string(),
            max_modules: Limit::Finite(3),
            max_notes_per_module: Limit::Finite(20),
            max_tags: Limit::Finite(10),
            max_storage_bytes: Limit::Finite(50 * MIB),
            features: [FEATURE_FILE_UPLOAD]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Built-in `pro` tier.
    pub fn pro() -> Self {
        Self {
            name: TIER_PRO.to_string(),
            max_modules: Limit::Unbounded,
            max_notes_per_module: Limit::Unbounded,
            max_tags: Limit::Unbounded,
            max_storage_bytes: Limit::Finite(10 * 1024 * MIB),
            features: [FEATURE_FILE_UPLOAD, FEATURE_EXPORT, FEATURE_SHARING]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Fewest unbounded limits first, then finite values field by field.
    fn restrictiveness_key(&self) -> (usize, [(u8, u64); 4], usize) {
        let ranks = [
            self.max_modules.restrictiveness_rank(),
            self.max_notes_per_module.restrictiveness_rank(),
            self.max_tags.restrictiveness_rank(),
            self.max_storage_bytes.restrictiveness_rank(),
        ];
        let unbounded = ranks.iter().filter(|(class, _)| *class > 0).count();
        (unbounded, ranks, self.features.len())
    }
}

/// Result of resolving a tier name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierResolution<'a> {
    pub limits: &'a TierLimits,
    /// False when the name was unknown and the restrictive fallback applied.
    pub recognized: bool,
}

/// Tier table construction errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierPolicyError {
    EmptyTable,
    BlankTierName,
    DuplicateTier(String),
}

impl Display for TierPolicyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTable => write!(f, "tier table must contain at least one tier"),
            Self::BlankTierName => write!(f, "tier name must not be blank"),
            Self::DuplicateTier(name) => write!(f, "tier declared more than once: {name}"),
        }
    }
}

impl Error for TierPolicyError {}

/// Immutable tier lookup table.
#[derive(Debug, Clone)]
pub struct TierPolicy {
    tiers: BTreeMap<String, TierLimits>,
    most_restrictive: String,
}

impl TierPolicy {
    /// Builds a policy from declared tiers.
    ///
    /// Tier names are trimmed and matched case-insensitively.
    pub fn new(tiers: Vec<TierLimits>) -> Result<Self, TierPolicyError> {
        if tiers.is_empty() {
            return Err(TierPolicyError::EmptyTable);
        }

        let mut table = BTreeMap::new();
        for mut tier in tiers {
            let key = normalize_tier_name(&tier.name);
            if key.is_empty() {
                return Err(TierPolicyError::BlankTierName);
            }
            tier.name = key.clone();
            if table.insert(key.clone(), tier).is_some() {
                return Err(TierPolicyError::DuplicateTier(key));
            }
        }

        let most_restrictive = table
            .values()
            .min_by(|a, b| {
                a.restrictiveness_key()
                    .cmp(&b.restrictiveness_key())
                    .then_with(|| a.name.cmp(&b.name))
            })
            .map(|tier| tier.name.clone())
            .ok_or(TierPolicyError::EmptyTable)?;

        Ok(Self {
            tiers: table,
            most_restrictive,
        })
    }

    /// Built-in `free` + `pro` table.
    pub fn builtin() -> Self {
        let mut tiers = BTreeMap::new();
        tiers.insert(TIER_FREE.to_string(), TierLimits::free());
        tiers.insert(TIER_PRO.to_string(), TierLimits::pro());
        Self {
            tiers,
            most_restrictive: TIER_FREE.to_string(),
        }
    }

    /// Returns limits for `tier_name`, falling back to the most restrictive
    /// tier for unknown names.
    pub fn lookup(&self, tier_name: &str) -> &TierLimits {
        self.resolve(tier_name).limits
    }

    /// Like [`TierPolicy::lookup`] but reports whether the name was known.
    pub fn resolve(&self, tier_name: &str) -> TierResolution<'_> {
        match self.tiers.get(normalize_tier_name(tier_name).as_str()) {
            Some(limits) => TierResolution {
                limits,
                recognized: true,
            },
            None => TierResolution {
                limits: self.most_restrictive(),
                recognized: false,
            },
        }
    }

    /// Returns the most restrictive declared tier.
    pub fn most_restrictive(&self) -> &TierLimits {
        // Constructors guarantee the key exists.
        &self.tiers[self.most_restrictive.as_str()]
    }

    /// Returns whether `tier_name` is declared.
    pub fn contains(&self, tier_name: &str) -> bool {
        self.tiers.contains_key(normalize_tier_name(tier_name).as_str())
    }

    /// Iterates declared tiers in name order.
    pub fn tiers(&self) -> impl Iterator<Item = &TierLimits> {
        self.tiers.values()
    }
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Normalizes a tier name for lookup.
pub fn normalize_tier_name(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}
