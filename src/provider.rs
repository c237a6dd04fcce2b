//! Provider identities.
//!
//! The set of backends is fixed at compile time. Enumeration order
//! ([`ProviderId::ALL`]) is the deterministic tie-break order used by every
//! selection policy.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::OrchestratorError;

/// Supported backend providers.
///
/// # Panics
///
/// This type never panics.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    /// OpenAI (GPT family).
    OpenAi,
    /// Anthropic Claude.
    Anthropic,
    /// Google Gemini.
    Gemini,
    /// xAI Grok.
    Grok,
}

impl ProviderId {
    /// Every known provider, in enumeration order.
    pub const ALL: [ProviderId; 4] = [
        ProviderId::OpenAi,
        ProviderId::Anthropic,
        ProviderId::Gemini,
        ProviderId::Grok,
    ];

    /// Stable snake_case name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "open_ai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Grok => "grok",
        }
    }

    /// Model used when the configuration does not name one.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4",
            Self::Anthropic => "claude-3-sonnet",
            Self::Gemini => "gemini-pro",
            Self::Grok => "grok-1",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_env(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::Grok => "GROK_API_KEY",
        }
    }

    /// Human-readable label used in simulated responses.
    pub fn display_label(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI GPT-4",
            Self::Anthropic => "Anthropic Claude",
            Self::Gemini => "Google Gemini",
            Self::Grok => "xAI Grok",
        }
    }

    /// Position in [`ProviderId::ALL`].
    pub fn index(self) -> usize {
        match self {
            Self::OpenAi => 0,
            Self::Anthropic => 1,
            Self::Gemini => 2,
            Self::Grok => 3,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = OrchestratorError;

    /// Accepts the snake_case name as well as the common short spellings
    /// (`openai`, `claude`, `google`, `xai`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open_ai" | "openai" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "gemini" | "google" => Ok(Self::Gemini),
            "grok" | "xai" => Ok(Self::Grok),
            other => Err(OrchestratorError::ConfigError(format!(
                "unknown provider: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_is_in_index_order() {
        for (i, p) in ProviderId::ALL.iter().enumerate() {
            assert_eq!(p.index(), i);
        }
    }

    #[test]
    fn test_provider_serializes_to_snake_case() {
        let json = serde_json::to_string(&ProviderId::OpenAi).expect("test: serialization");
        assert_eq!(json, "\"open_ai\"");
    }

    #[test]
    fn test_as_str_matches_serde_name() {
        for p in ProviderId::ALL {
            let json = serde_json::to_string(&p).expect("test: serialization");
            assert_eq!(json, format!("\"{}\"", p.as_str()));
        }
    }

    #[test]
    fn test_from_str_accepts_aliases() {
        assert_eq!("OpenAI".parse::<ProviderId>().ok(), Some(ProviderId::OpenAi));
        assert_eq!("claude".parse::<ProviderId>().ok(), Some(ProviderId::Anthropic));
        assert_eq!(" gemini ".parse::<ProviderId>().ok(), Some(ProviderId::Gemini));
        assert_eq!("xai".parse::<ProviderId>().ok(), Some(ProviderId::Grok));
    }

    #[test]
    fn test_from_str_unknown_returns_config_error() {
        let err = "mistral".parse::<ProviderId>().unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigError(_)));
        assert!(err.to_string().contains("mistral"));
    }

    #[test]
    fn test_default_models_are_distinct() {
        let mut models: Vec<_> = ProviderId::ALL.iter().map(|p| p.default_model()).collect();
        models.sort_unstable();
        models.dedup();
        assert_eq!(models.len(), ProviderId::ALL.len());
    }
}
