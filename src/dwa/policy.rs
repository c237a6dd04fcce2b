//! Selection policies and the pluggable composite scoring function.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::metrics::ProviderMetrics;

/// Ranking rule applied by
/// [`DynamicWeightAlgorithm::select_best_provider`](super::DynamicWeightAlgorithm::select_best_provider).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Highest weighted score of accuracy, speed and availability.
    #[default]
    WeightedComposite,
    /// Cycle through eligible providers, ignoring metrics.
    RoundRobin,
    /// Highest accuracy, availability as tie-break.
    MaxAccuracy,
    /// First eligible provider of the configured static order.
    Priority,
}

impl SelectionPolicy {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WeightedComposite => "weighted_composite",
            Self::RoundRobin => "round_robin",
            Self::MaxAccuracy => "max_accuracy",
            Self::Priority => "priority",
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weighted_composite" => Ok(Self::WeightedComposite),
            "round_robin" => Ok(Self::RoundRobin),
            "max_accuracy" => Ok(Self::MaxAccuracy),
            "priority" => Ok(Self::Priority),
            other => Err(format!("unknown selection policy: {other}")),
        }
    }
}

/// Replacement composite scoring function: metrics in, score out.
///
/// Higher is better. Non-finite results rank below every finite score.
pub type WeightingFn = Arc<dyn Fn(&ProviderMetrics) -> f64 + Send + Sync>;
