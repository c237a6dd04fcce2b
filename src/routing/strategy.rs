//! Routing strategy enumeration.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Static strategy for choosing one provider out of several candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Rotate through the candidates.
    RoundRobin,
    /// Candidate with the fewest in-flight requests.
    #[default]
    LoadBalanced,
    /// Uniformly random candidate.
    Random,
    /// First candidate in provider enumeration order.
    Priority,
}

impl RoutingStrategy {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LoadBalanced => "load_balanced",
            Self::Random => "random",
            Self::Priority => "priority",
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round_robin" => Ok(Self::RoundRobin),
            "load_balanced" => Ok(Self::LoadBalanced),
            "random" => Ok(Self::Random),
            "priority" => Ok(Self::Priority),
            other => Err(format!("unknown routing strategy: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_load_balanced() {
        assert_eq!(RoutingStrategy::default(), RoutingStrategy::LoadBalanced);
    }

    #[test]
    fn test_from_str_round_trips_as_str() {
        for s in [
            RoutingStrategy::RoundRobin,
            RoutingStrategy::LoadBalanced,
            RoutingStrategy::Random,
            RoutingStrategy::Priority,
        ] {
            assert_eq!(s.as_str().parse::<RoutingStrategy>(), Ok(s));
        }
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        assert!("fastest".parse::<RoutingStrategy>().is_err());
    }

    #[test]
    fn test_serializes_to_snake_case() {
        let json = serde_json::to_string(&RoutingStrategy::RoundRobin).expect("test: serialize");
        assert_eq!(json, "\"round_robin\"");
    }
}
