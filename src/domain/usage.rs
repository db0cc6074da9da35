//! Per-owner usage counters.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which counter a usage event increments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    /// Completed record enrichments
    Enrichments,

    /// Generated content entries
    Generations,
}

impl UsageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enrichments => "enrichments",
            Self::Generations => "generations",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "enrichments" => Some(Self::Enrichments),
            "generations" => Some(Self::Generations),
            _ => None,
        }
    }
}

impl fmt::Display for UsageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current value of one counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub owner_id: String,
    pub kind: UsageKind,
    pub count: u64,
}
