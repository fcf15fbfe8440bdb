use thiserror::Error;

use crate::types::ProviderKind;

/// Normalized vendor error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VendorErrorCategory {
    Authentication,
    RateLimited,
    QuotaExceeded,
    Timeout,
    ModelNotFound,
    ModelNotReady,
    Validation,
    Other,
}

impl VendorErrorCategory {
    /// Best-effort category from an HTTP status alone.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            404 => Self::ModelNotFound,
            408 | 504 => Self::Timeout,
            400 | 422 => Self::Validation,
            429 => Self::RateLimited,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Provider not initialized; raised before any network attempt.
    #[error("{0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    Transport(String),

    #[error("{provider} error ({category:?}): {message}")]
    Vendor {
        provider: ProviderKind,
        category: VendorErrorCategory,
        message: String,
    },

    /// The caller aborted the stream.
    #[error("Request cancelled")]
    Cancelled,

    #[error("Failed to decode {provider} response: {message}")]
    Decode { provider: ProviderKind, message: String },
}

impl LlmError {
    pub fn vendor(provider: ProviderKind, category: VendorErrorCategory, message: impl Into<String>) -> Self {
        Self::Vendor { provider, category, message: message.into() }
    }

    pub fn decode(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self::Decode { provider, message: message.into() }
    }

    pub fn not_configured(provider: ProviderKind) -> Self {
        Self::Configuration(format!(
            "{} is not configured. Add an API key in the notewright config or environment.",
            provider.display_name()
        ))
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn category(&self) -> Option<VendorErrorCategory> {
        match self {
            Self::Vendor { category, .. } => Some(*category),
            _ => None,
        }
    }

    /// A sentence fit for the end user. Unmapped vendor errors keep the raw
    /// vendor message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(msg) => msg.clone(),
            Self::Transport(msg) => format!("Network error: {}", msg),
            Self::Cancelled => "Request cancelled.".to_string(),
            Self::Decode { provider, message } => {
                format!("{} returned a response that could not be read: {}", provider.display_name(), message)
            }
            Self::Vendor { provider, category, message } => {
                let name = provider.display_name();
                match category {
                    VendorErrorCategory::Authentication => {
                        format!("Authentication failed for {}. Check your API key.", name)
                    }
                    VendorErrorCategory::RateLimited => {
                        format!("{} rate limit exceeded. Wait a moment and try again.", name)
                    }
                    VendorErrorCategory::QuotaExceeded => format!("{} quota exceeded.", name),
                    VendorErrorCategory::Timeout => format!("{} timed out. Try again.", name),
                    VendorErrorCategory::ModelNotFound => {
                        format!("The selected model was not found or is not enabled on {}.", name)
                    }
                    VendorErrorCategory::ModelNotReady => {
                        format!("The selected {} model is not ready yet. Try again shortly.", name)
                    }
                    VendorErrorCategory::Validation => format!("{} rejected the request: {}", name, message),
                    VendorErrorCategory::Other => message.clone(),
                }
            }
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("Request timeout: {}", err))
        } else if err.is_connect() {
            Self::Transport(format!("Connection error: {}", err))
        } else {
            Self::Transport(err.to_string())
        }
    }
}
