//! Enforcement policy: which action each verdict tier earns.
//!
//! The policy is data supplied from configuration. It holds no state and
//! never looks anything up on its own.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::matcher::Tier;

/// Moderation action, ordered by severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Observe only.
    #[default]
    None,
    Delete,
    Timeout,
    Kick,
    Ban,
}

impl Action {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Delete => "delete",
            Self::Timeout => "timeout",
            Self::Kick => "kick",
            Self::Ban => "ban",
        };
        f.write_str(s)
    }
}

/// Action per actionable tier. `none` has no entry: it always observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierActions {
    pub strong: Action,
    pub moderate: Action,
}

impl Default for TierActions {
    fn default() -> Self {
        Self {
            strong: Action::Ban,
            moderate: Action::Delete,
        }
    }
}

/// Distance thresholds plus the tier → action table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnforcementPolicy {
    pub strong_distance: u32,
    pub moderate_distance: u32,
    pub min_labeled_duplicates: u32,
    pub action_for_tier: TierActions,
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        Self {
            strong_distance: 4,
            moderate_distance: 8,
            min_labeled_duplicates: 1,
            action_for_tier: TierActions::default(),
        }
    }
}

impl EnforcementPolicy {
    pub fn action_for(&self, tier: Tier) -> Action {
        match tier {
            Tier::None => Action::None,
            Tier::Moderate => self.action_for_tier.moderate,
            Tier::Strong => self.action_for_tier.strong,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.strong_distance > self.moderate_distance {
            return Err(WardenError::InvalidConfig(format!(
                "strongDistance ({}) must not exceed moderateDistance ({})",
                self.strong_distance, self.moderate_distance
            )));
        }
        if self.min_labeled_duplicates == 0 {
            return Err(WardenError::InvalidConfig(
                "minLabeledDuplicates must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
