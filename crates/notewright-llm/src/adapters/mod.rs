//! Vendor adapters

pub mod bedrock;
pub mod gemini;
pub mod groq;

pub use bedrock::BedrockAdapter;
pub use gemini::GeminiAdapter;
pub use groq::GroqAdapter;

use std::sync::Arc;

use crate::adapter::ProviderAdapter;
use crate::settings::SettingsHandle;
use crate::types::ProviderKind;

/// Builds the adapter for `kind`, bound to the shared settings.
pub fn create_adapter(kind: ProviderKind, settings: SettingsHandle) -> Arc<dyn ProviderAdapter> {
    match kind {
        ProviderKind::Bedrock => Arc::new(BedrockAdapter::new(settings)),
        ProviderKind::Gemini => Arc::new(GeminiAdapter::new(settings)),
        ProviderKind::Groq => Arc::new(GroqAdapter::new(settings)),
    }
}
