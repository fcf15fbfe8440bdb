//! Vendor-agnostic message, usage and stream types

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

use crate::error::LlmError;

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A single conversation turn. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub role: Role,
    pub content: String,
}

impl NormalizedMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
}

/// Token accounting for one call.
///
/// `None` means the vendor never reported the figure; it is not zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    /// Output tokens were estimated from whitespace-delimited words.
    #[serde(default)]
    pub approximate: bool,
}

impl NormalizedUsage {
    pub fn is_empty(&self) -> bool {
        self.input_tokens.is_none() && self.output_tokens.is_none() && self.total_tokens.is_none()
    }

    /// Overwrites fields that `other` reports. An authoritative report clears
    /// the approximation flag.
    pub fn merge_from(&mut self, other: &NormalizedUsage) {
        if other.input_tokens.is_some() {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens.is_some() {
            self.output_tokens = other.output_tokens;
            self.approximate = other.approximate;
        }
        if other.total_tokens.is_some() {
            self.total_tokens = other.total_tokens;
        }
    }

    /// Fills `total_tokens` from input + output when both are known.
    pub fn with_total(mut self) -> Self {
        if self.total_tokens.is_none() {
            if let (Some(input), Some(output)) = (self.input_tokens, self.output_tokens) {
                self.total_tokens = Some(input + output);
            }
        }
        self
    }
}

impl fmt::Display for NormalizedUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show(v: Option<u64>) -> String {
            v.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string())
        }
        write!(
            f,
            "in={} out={}{} total={}",
            show(self.input_tokens),
            if self.approximate { "~" } else { "" },
            show(self.output_tokens),
            show(self.total_tokens)
        )
    }
}

/// Generation parameters shared by all vendors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { max_tokens: 4096, temperature: 0.7 }
    }
}

/// A normalized request as handed to an adapter
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<NormalizedMessage>,
    pub system_prompt: String,
    pub options: GenerationOptions,
}

/// Non-streaming reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    pub content: String,
    pub usage: NormalizedUsage,
}

/// One item of a normalized stream. `Finished` is always last on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    /// Counts known so far, emitted when the vendor reports them before the
    /// end of the stream. `Finished` supersedes it.
    Usage(NormalizedUsage),
    Finished(NormalizedUsage),
}

/// Lazy, single-pass stream of text deltas ending in usage
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

/// Outcome of a cheap probe request
#[derive(Debug, Clone)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
    pub error: Option<LlmError>,
}

impl ConnectionTestResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into(), error: None }
    }

    pub fn failed(error: LlmError) -> Self {
        Self { success: false, message: error.user_message(), error: Some(error) }
    }
}

/// Supported vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Bedrock,
    Gemini,
    Groq,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Bedrock, ProviderKind::Gemini, ProviderKind::Groq];

    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::Bedrock => "bedrock",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Groq => "groq",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Bedrock => "AWS Bedrock (Claude)",
            ProviderKind::Gemini => "Google Gemini",
            ProviderKind::Groq => "Groq",
        }
    }

    pub fn parse(id: &str) -> Option<Self> {
        let id = id.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.id() == id)
    }

    /// Unrecognized ids fall back to the default provider.
    pub fn parse_or_default(id: &str) -> Self {
        Self::parse(id).unwrap_or_else(|| {
            log::warn!("Unknown provider '{}', falling back to {}", id, ProviderKind::default());
            ProviderKind::default()
        })
    }
}

impl Default for ProviderKind {
    fn default() -> Self {
        ProviderKind::Bedrock
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_usage_stays_unknown() {
        let usage = NormalizedUsage::default().with_total();
        assert!(usage.is_empty());
        assert_eq!(usage.total_tokens, None);
    }

    #[test]
    fn test_merge_overrides_only_reported_fields() {
        let mut usage = NormalizedUsage {
            input_tokens: Some(12),
            output_tokens: Some(40),
            total_tokens: None,
            approximate: true,
        };
        usage.merge_from(&NormalizedUsage {
            output_tokens: Some(37),
            ..Default::default()
        });
        assert_eq!(usage.input_tokens, Some(12));
        assert_eq!(usage.output_tokens, Some(37));
        assert!(!usage.approximate);
        assert_eq!(usage.with_total().total_tokens, Some(49));
    }

    #[test]
    fn test_provider_kind_parse_or_default() {
        assert_eq!(ProviderKind::parse_or_default("Gemini"), ProviderKind::Gemini);
        assert_eq!(ProviderKind::parse_or_default(" groq "), ProviderKind::Groq);
        assert_eq!(ProviderKind::parse_or_default("openai"), ProviderKind::Bedrock);
    }

    #[test]
    fn test_usage_display_marks_estimates() {
        let usage = NormalizedUsage {
            input_tokens: None,
            output_tokens: Some(5),
            total_tokens: None,
            approximate: true,
        };
        assert_eq!(usage.to_string(), "in=? out=~5 total=?");
    }
}
