//! Provider settings shared between the application and the adapters.
//!
//! Adapters hold a [`SettingsHandle`] and read it on every call, so a
//! settings change (new key, different model) applies to the next request.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

use crate::types::{GenerationOptions, ProviderKind};

/// Model selector value that defers to `custom_model_id`.
pub const CUSTOM_MODEL_SENTINEL: &str = "other";

pub const DEFAULT_BEDROCK_MODEL: &str = "anthropic.claude-3-5-sonnet-20241022-v2:0";
pub const DEFAULT_BEDROCK_REGION: &str = "us-east-1";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BedrockSettings {
    pub api_key: Option<String>,
    pub region: String,
    pub model: String,
    pub custom_model_id: String,
    /// Overrides the regional runtime endpoint.
    pub endpoint: Option<String>,
}

impl Default for BedrockSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            region: DEFAULT_BEDROCK_REGION.to_string(),
            model: DEFAULT_BEDROCK_MODEL.to_string(),
            custom_model_id: String::new(),
            endpoint: None,
        }
    }
}

impl BedrockSettings {
    pub fn base_url(&self) -> String {
        match &self.endpoint {
            Some(url) if !url.trim().is_empty() => url.trim_end_matches('/').to_string(),
            _ => {
                let region = if self.region.trim().is_empty() {
                    DEFAULT_BEDROCK_REGION
                } else {
                    self.region.trim()
                };
                format!("https://bedrock-runtime.{}.amazonaws.com", region)
            }
        }
    }
}

/// Settings for vendors addressed by API key + model only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub custom_model_id: String,
    pub base_url: String,
}

impl VendorSettings {
    pub fn gemini() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            custom_model_id: String::new(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn groq() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_GROQ_MODEL.to_string(),
            custom_model_id: String::new(),
            base_url: DEFAULT_GROQ_BASE_URL.to_string(),
        }
    }

    pub fn trimmed_base_url(&self, fallback: &str) -> String {
        let url = self.base_url.trim();
        if url.is_empty() {
            fallback.to_string()
        } else {
            url.trim_end_matches('/').to_string()
        }
    }
}

impl Default for VendorSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: String::new(),
            custom_model_id: String::new(),
            base_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Raw configured provider id; unknown values select the default.
    pub provider: String,
    pub bedrock: BedrockSettings,
    pub gemini: VendorSettings,
    pub groq: VendorSettings,
    pub generation: GenerationOptions,
    pub request_timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default().id().to_string(),
            bedrock: BedrockSettings::default(),
            gemini: VendorSettings::gemini(),
            groq: VendorSettings::groq(),
            generation: GenerationOptions::default(),
            request_timeout_secs: 120,
        }
    }
}

impl ProviderSettings {
    pub fn active_kind(&self) -> ProviderKind {
        ProviderKind::parse_or_default(&self.provider)
    }

    pub fn into_handle(self) -> SettingsHandle {
        Arc::new(RwLock::new(self))
    }
}

pub type SettingsHandle = Arc<RwLock<ProviderSettings>>;

/// Clones the current settings. A poisoned lock still yields the last
/// written value.
pub fn snapshot(handle: &SettingsHandle) -> ProviderSettings {
    match handle.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Applies `f` to the shared settings.
pub fn update(handle: &SettingsHandle, f: impl FnOnce(&mut ProviderSettings)) {
    match handle.write() {
        Ok(mut guard) => f(&mut guard),
        Err(poisoned) => f(&mut poisoned.into_inner()),
    }
}

/// Resolves the effective model id. The sentinel selects the custom id;
/// empty values fall back to `default`.
pub fn resolve_model_id(configured: &str, custom: &str, default: &str) -> String {
    let configured = configured.trim();
    let chosen = if configured == CUSTOM_MODEL_SENTINEL {
        custom.trim()
    } else {
        configured
    };
    if chosen.is_empty() {
        default.to_string()
    } else {
        chosen.to_string()
    }
}

/// Credential presence check shared by the adapters.
pub fn has_key(key: &Option<String>) -> bool {
    key.as_deref().map(|k| !k.trim().is_empty()).unwrap_or(false)
}
