//! Tiered verdicts against the known-record store.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::fingerprint::{ContentHash, FingerprintSet};
use crate::policy::EnforcementPolicy;
use crate::store::FingerprintStore;

/// Matcher confidence bucket, ordered from weakest to strongest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    None,
    Moderate,
    Strong,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Moderate => "moderate",
            Self::Strong => "strong",
        })
    }
}

/// Outcome of matching one fingerprint set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchVerdict {
    pub tier: Tier,
    /// Smallest perceptual distance among duplicates, if any were found
    pub best_distance: Option<u32>,
    /// Duplicates labeled `phish`
    pub labeled_hit_count: u32,
    pub exact_content_match: bool,
    /// Closest duplicate, or the exact-content record when there is one
    pub best_match: Option<Uuid>,
}

impl MatchVerdict {
    /// The verdict used whenever nothing could be decided.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_actionable(&self) -> bool {
        self.tier != Tier::None
    }
}

/// Decide the tier for `set` against `store`.
///
/// An exact content match is strong whatever its label. Anything else needs
/// labeled corroboration: `strong` when the closest duplicate is within
/// `strong_distance` and at least `min_labeled_duplicates` duplicates are
/// `phish`, `moderate` when at least one `phish` duplicate exists.
pub fn decide(
    set: &FingerprintSet,
    store: &FingerprintStore,
    content_hash: &ContentHash,
    policy: &EnforcementPolicy,
) -> MatchVerdict {
    let duplicates = store.find_duplicates(set, policy.moderate_distance);
    let exact_record = store.get(content_hash);

    if duplicates.is_empty() && exact_record.is_none() {
        return MatchVerdict::none();
    }

    let best_distance = duplicates.first().map(|(distance, _)| *distance);
    let labeled_hit_count = duplicates
        .iter()
        .filter(|(_, record)| record.is_phish())
        .count() as u32;
    let exact_content_match = exact_record.is_some()
        || duplicates
            .iter()
            .any(|(_, record)| record.content_hash == *content_hash);

    let tier = if exact_content_match
        || best_distance.is_some_and(|d| {
            d <= policy.strong_distance && labeled_hit_count >= policy.min_labeled_duplicates
        }) {
        Tier::Strong
    } else if best_distance.is_some_and(|d| d <= policy.moderate_distance)
        && labeled_hit_count >= 1
    {
        Tier::Moderate
    } else {
        Tier::None
    };

    let best_match = exact_record
        .map(|r| r.id)
        .or_else(|| duplicates.first().map(|(_, r)| r.id));

    debug!(
        content_hash = %content_hash.short(),
        candidates = duplicates.len(),
        best_distance = ?best_distance,
        labeled_hit_count,
        exact_content_match,
        tier = %tier,
        "Matched fingerprint set"
    );

    MatchVerdict {
        tier,
        best_distance,
        labeled_hit_count,
        exact_content_match,
        best_match,
    }
}

/// Verdict from the content hash alone, for attachments that could not be
/// decoded. Only an exact stored match counts.
pub fn decide_exact(store: &FingerprintStore, content_hash: &ContentHash) -> MatchVerdict {
    match store.get(content_hash) {
        Some(record) => MatchVerdict {
            tier: Tier::Strong,
            best_distance: None,
            labeled_hit_count: u32::from(record.is_phish()),
            exact_content_match: true,
            best_match: Some(record.id),
        },
        None => MatchVerdict::none(),
    }
}
