use notewright_llm::{BedrockSettings, GenerationOptions, ProviderKind, ProviderSettings, VendorSettings};
use serde::{Deserialize, Serialize};

use crate::context::ContextConfig;

/// Environment variables that override credentials and provider selection.
pub const ENV_BEDROCK_KEY: &str = "AWS_BEARER_TOKEN_BEDROCK";
pub const ENV_GEMINI_KEY: &str = "GEMINI_API_KEY";
pub const ENV_GROQ_KEY: &str = "GROQ_API_KEY";
pub const ENV_PROVIDER: &str = "NOTEWRIGHT_PROVIDER";

/// Main configuration for notewright
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotewrightConfig {
    /// Active provider id (`bedrock`, `gemini`, `groq`). Unknown values
    /// select Bedrock.
    pub provider: String,
    pub bedrock: BedrockSettings,
    pub gemini: VendorSettings,
    pub groq: VendorSettings,
    pub generation: GenerationOptions,
    pub connection: ConnectionConfig,
    pub context: ContextConfig,
    pub edit: EditConfig,
}

impl Default for NotewrightConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default().id().to_string(),
            bedrock: BedrockSettings::default(),
            gemini: VendorSettings::gemini(),
            groq: VendorSettings::groq(),
            generation: GenerationOptions::default(),
            connection: ConnectionConfig::default(),
            context: ContextConfig::default(),
            edit: EditConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How long a connection probe result is reused.
    pub cache_duration_secs: i64,
    pub request_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            cache_duration_secs: notewright_llm::DEFAULT_CACHE_DURATION_SECS,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditConfig {
    /// Teach the model the edit protocol and apply the commands it emits.
    pub enabled: bool,
}

impl Default for EditConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl NotewrightConfig {
    pub fn active_provider(&self) -> ProviderKind {
        ProviderKind::parse_or_default(&self.provider)
    }

    /// Settings consumed by the provider layer.
    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            provider: self.provider.clone(),
            bedrock: self.bedrock.clone(),
            gemini: self.gemini.clone(),
            groq: self.groq.clone(),
            generation: self.generation,
            request_timeout_secs: self.connection.request_timeout_secs,
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Applies overrides from `lookup`. Empty values are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = get(ENV_BEDROCK_KEY) {
            self.bedrock.api_key = Some(key);
        }
        if let Some(key) = get(ENV_GEMINI_KEY) {
            self.gemini.api_key = Some(key);
        }
        if let Some(key) = get(ENV_GROQ_KEY) {
            self.groq.api_key = Some(key);
        }
        if let Some(provider) = get(ENV_PROVIDER) {
            log::debug!("Provider overridden from environment: {}", provider);
            self.provider = provider;
        }
    }

    /// Copy safe to print: API keys are masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for key in [&mut copy.bedrock.api_key, &mut copy.gemini.api_key, &mut copy.groq.api_key] {
            if let Some(value) = key.as_mut() {
                *value = mask(value);
            }
        }
        copy
    }
}

fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.trim().chars().collect();
    if chars.len() <= 8 {
        return "********".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [(ENV_GROQ_KEY, "gsk-123"), (ENV_PROVIDER, "groq"), (ENV_GEMINI_KEY, "  ")]
            .into_iter()
            .collect();
        let mut config = NotewrightConfig::default();
        config.apply_overrides_from(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.active_provider(), ProviderKind::Groq);
        assert_eq!(config.groq.api_key.as_deref(), Some("gsk-123"));
        assert_eq!(config.gemini.api_key, None);
    }

    #[test]
    fn test_unknown_provider_falls_back() {
        let config = NotewrightConfig {
            provider: "openai".into(),
            ..Default::default()
        };
        assert_eq!(config.active_provider(), ProviderKind::Bedrock);
        assert_eq!(config.provider_settings().active_kind(), ProviderKind::Bedrock);
    }

    #[test]
    fn test_redacted_masks_keys() {
        let mut config = NotewrightConfig::default();
        config.gemini.api_key = Some("AIzaSyExampleKey1234".into());
        config.groq.api_key = Some("short".into());
        let shown = config.redacted();
        assert_eq!(shown.gemini.api_key.as_deref(), Some("****1234"));
        assert_eq!(shown.groq.api_key.as_deref(), Some("********"));
        assert_eq!(shown.bedrock.api_key, None);
    }
}
