//! Core data types shared across the crate
//!
//! A [`VersionRecord`] is one observed snapshot of a product's published
//! version data. Records are created on every accepted fetch and replaced
//! wholesale; the previous record is demoted to `old` inside the
//! [`CacheEntry`] and kept only so diffs can be rendered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Field names considered significant for the accept decision.
///
/// A candidate is `New` if and only if at least one of these differs from
/// the current record. The comparison is total over this set, never a
/// first-difference short-circuit that leaves later fields unchecked.
pub const SIGNIFICANT_FIELDS: &[&str] = &["build", "build_text"];

/// One observed version snapshot for a product in one region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Region this row came from (e.g. "us")
    pub region: String,
    /// Build configuration hash
    pub build_config: String,
    /// CDN configuration hash
    pub cdn_config: String,
    /// Build number, kept as the wire delivers it
    pub build: String,
    /// Canonical version text, trailing build-number segment stripped
    pub build_text: String,
    /// Product configuration hash (input to the encryption probe)
    pub product_config: String,
    /// Keyring hash, when the endpoint publishes one
    #[serde(default)]
    pub keyring: Option<String>,
    /// Whether the content is decryption-gated; `None` until a probe concludes
    #[serde(default)]
    pub encrypted: Option<bool>,
    /// Sequence number shared by every region row of the response
    pub seqn: u64,
    /// When this record was observed
    pub observed_at: DateTime<Utc>,
}

impl VersionRecord {
    /// Names of wire fields that differ between `self` and `other`.
    pub fn changed_fields(&self, other: &VersionRecord) -> BTreeSet<&'static str> {
        let mut changed = BTreeSet::new();
        if self.build_config != other.build_config {
            changed.insert("build_config");
        }
        if self.cdn_config != other.cdn_config {
            changed.insert("cdn_config");
        }
        if self.build != other.build {
            changed.insert("build");
        }
        if self.build_text != other.build_text {
            changed.insert("build_text");
        }
        if self.product_config != other.product_config {
            changed.insert("product_config");
        }
        if self.keyring != other.keyring {
            changed.insert("keyring");
        }
        changed
    }

    /// Whether any significant field differs from `other`.
    pub fn differs_significantly(&self, other: &VersionRecord) -> bool {
        let changed = self.changed_fields(other);
        SIGNIFICANT_FIELDS.iter().any(|f| changed.contains(f))
    }

    /// Merge non-significant sharpening from `candidate` into `self`.
    ///
    /// Used when the decision is `Unchanged`: hashes and keyring take the
    /// candidate's values, and `encrypted` moves only toward certainty:
    /// an inconclusive probe (`None`) never reverts a known state.
    pub fn absorb(&mut self, candidate: &VersionRecord) {
        self.build_config = candidate.build_config.clone();
        self.cdn_config = candidate.cdn_config.clone();
        self.product_config = candidate.product_config.clone();
        self.keyring = candidate.keyring.clone();
        self.encrypted = candidate.encrypted.or(self.encrypted);
        self.observed_at = candidate.observed_at;
    }
}

/// Result of fetching one product: one record per region plus the shared
/// sequence number the response carried.
#[derive(Debug, Clone)]
pub struct ProductVersions {
    /// One record per region row, response order preserved
    pub records: Vec<VersionRecord>,
    /// Sequence number applying to every record above
    pub seqn: u64,
}

impl ProductVersions {
    /// Record for the given region, if the response included it.
    pub fn for_region(&self, region: &str) -> Option<&VersionRecord> {
        self.records.iter().find(|r| r.region == region)
    }
}

/// Cached state for one product: the current record plus the immediately
/// prior one, retained only for diff rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Last accepted record
    pub current: VersionRecord,
    /// Record the current one replaced
    #[serde(default)]
    pub old: Option<VersionRecord>,
}

/// Outcome of comparing a candidate record against the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Candidate accepted; an update event should be emitted
    New,
    /// Sequence number already processed
    Duplicate,
    /// Candidate carries an older sequence than the accepted one
    Stale,
    /// No significant difference (or deferred to another writer)
    Unchanged,
}

/// A change accepted within one poll cycle. Ephemeral: built per cycle,
/// discarded after dispatch.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    /// Product identifier
    pub product: String,
    /// Public display name for rendering
    pub public_name: String,
    /// Notification topic the product belongs to
    pub topic: String,
    /// Record the accepted one replaced, `None` for a first observation
    pub old: Option<VersionRecord>,
    /// The accepted record
    pub new: VersionRecord,
    /// Names of the fields that changed
    pub changed: BTreeSet<&'static str>,
}

/// Opaque per-cycle token preventing duplicate secondary broadcast.
///
/// Generated once at the start of a cycle and attached to everything that
/// cycle dispatches; never reused across cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupeToken(uuid::Uuid);

impl DedupeToken {
    /// Generate a fresh token
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for DedupeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A rendered notification payload for one (topic, destination) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Headline, e.g. the topic's update title
    pub title: String,
    /// When the underlying cycle observed the changes
    pub timestamp: DateTime<Utc>,
    /// One line per changed product
    pub lines: Vec<String>,
    /// Optional deep link to a diff viewer
    pub link: Option<String>,
}
