//! Round identifiers and the fixed round order.
//!
//! Every pipeline run walks the same statically ordered list of rounds.
//! Each round declares which earlier rounds it reads from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One stage in the article pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoundId {
    /// Trend discovery for the seed topic
    Trends,

    /// Article ideas with research notes
    Ideation,

    /// Choose one idea and the angle to write it from
    AngleSelection,

    /// Draft the article section by section
    SectionDrafting,

    /// Title, slug, description, keywords
    Metadata,

    /// Final edit pass over the drafted sections
    Polish,

    /// Push the article out and return its link
    Publish,
}

impl RoundId {
    /// All rounds in execution order
    pub const ALL: [RoundId; 7] = [
        RoundId::Trends,
        RoundId::Ideation,
        RoundId::AngleSelection,
        RoundId::SectionDrafting,
        RoundId::Metadata,
        RoundId::Polish,
        RoundId::Publish,
    ];

    /// Position of this round in the fixed order
    pub fn index(self) -> usize {
        self as usize
    }

    /// Kebab-case name (e.g. "section-drafting")
    pub fn name(self) -> &'static str {
        match self {
            RoundId::Trends => "trends",
            RoundId::Ideation => "ideation",
            RoundId::AngleSelection => "angle-selection",
            RoundId::SectionDrafting => "section-drafting",
            RoundId::Metadata => "metadata",
            RoundId::Polish => "polish",
            RoundId::Publish => "publish",
        }
    }

    /// Persisted artifact key ("r0".."r6")
    pub fn key(self) -> String {
        format!("r{}", self.index())
    }

    /// Upstream rounds whose outputs this round consumes
    pub fn dependencies(self) -> &'static [RoundId] {
        match self {
            RoundId::Trends => &[],
            RoundId::Ideation => &[RoundId::Trends],
            RoundId::AngleSelection => &[RoundId::Ideation],
            RoundId::SectionDrafting => &[RoundId::Ideation, RoundId::AngleSelection],
            RoundId::Metadata => &[RoundId::AngleSelection, RoundId::SectionDrafting],
            RoundId::Polish => &[RoundId::SectionDrafting, RoundId::Metadata],
            RoundId::Publish => &[RoundId::Metadata, RoundId::Polish],
        }
    }

    /// Whether a failed execution may be retried unless configured otherwise.
    ///
    /// Publishing has an outward side effect, so it is not retried by default.
    pub fn retryable_by_default(self) -> bool {
        !matches!(self, RoundId::Publish)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error parsing a round identifier
#[derive(Debug, Clone, Error)]
#[error("Unknown round: '{0}' (expected r0..r6 or a round name)")]
pub struct UnknownRound(pub String);

impl FromStr for RoundId {
    type Err = UnknownRound;

    /// Accepts either the artifact key ("r3") or the name ("section-drafting")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some(digits) = s.strip_prefix('r') {
            if digits.len() == 1 {
                if let Ok(idx) = digits.parse::<usize>() {
                    return Self::ALL
                        .get(idx)
                        .copied()
                        .ok_or_else(|| UnknownRound(s.to_string()));
                }
            }
        }

        Self::ALL
            .iter()
            .copied()
            .find(|r| r.name() == s)
            .ok_or_else(|| UnknownRound(s.to_string()))
    }
}
