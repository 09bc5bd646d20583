//! Scaling verdicts

use serde::{Deserialize, Serialize};

/// What the decision engine wants done this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingVerdict {
    DoNothing,
    /// Provision this many nodes
    Expand(u32),
    /// Decommission this many idle nodes
    Shrink(u32),
}

impl std::fmt::Display for ScalingVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalingVerdict::DoNothing => write!(f, "do nothing"),
            ScalingVerdict::Expand(n) => write!(f, "expand by {}", n),
            ScalingVerdict::Shrink(n) => write!(f, "shrink by {}", n),
        }
    }
}
