//! The contract every vendor adapter implements, plus the plumbing the
//! adapters share (request building, cancellable reads, HTTP client setup).

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use log::{debug, warn};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{LlmError, VendorErrorCategory};
use crate::types::{
    ChatRequest, ChatResponse, ConnectionTestResult, GenerationOptions, NormalizedMessage, ProviderKind, Role,
    TokenStream,
};

/// Prompt used by connection probes.
pub const PROBE_PROMPT: &str = "Reply with 'OK'";

/// Generation options used by connection probes.
pub const PROBE_OPTIONS: GenerationOptions = GenerationOptions {
    max_tokens: 10,
    temperature: 0.0,
};

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Effective model id, resolved from the current settings.
    fn model_id(&self) -> String;

    /// True when the required credentials are present. Never touches the
    /// network.
    fn is_initialized(&self) -> bool;

    /// Generation options from the current settings.
    fn generation_options(&self) -> GenerationOptions;

    /// One non-streaming round trip.
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Opens a stream of deltas. The stream ends with
    /// [`StreamEvent::Finished`](crate::StreamEvent::Finished) on success or
    /// [`LlmError::Cancelled`] when `cancel` fires.
    async fn complete_stream(
        &self,
        request: ChatRequest,
        cancel: Option<CancellationToken>,
    ) -> Result<TokenStream, LlmError>;

    async fn send_message(
        &self,
        messages: &[NormalizedMessage],
        system_prompt: &str,
    ) -> Result<ChatResponse, LlmError> {
        let request = build_request(messages, system_prompt, self.generation_options());
        self.complete(request).await
    }

    async fn send_message_stream(
        &self,
        messages: &[NormalizedMessage],
        system_prompt: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<TokenStream, LlmError> {
        let request = build_request(messages, system_prompt, self.generation_options());
        self.complete_stream(request, cancel).await
    }

    /// Sends a tiny probe request; any non-empty reply counts as connected.
    async fn test_connection(&self) -> ConnectionTestResult {
        let kind = self.kind();
        if !self.is_initialized() {
            return ConnectionTestResult::failed(LlmError::not_configured(kind));
        }

        let request = ChatRequest {
            messages: vec![NormalizedMessage::user(PROBE_PROMPT)],
            system_prompt: String::new(),
            options: PROBE_OPTIONS,
        };
        debug!("Probing {} with model {}", kind.display_name(), self.model_id());

        match self.complete(request).await {
            Ok(response) if !response.content.trim().is_empty() => ConnectionTestResult::ok(format!(
                "Connected to {} ({})",
                kind.display_name(),
                self.model_id()
            )),
            Ok(_) => ConnectionTestResult::failed(LlmError::vendor(
                kind,
                VendorErrorCategory::Other,
                "Model returned an empty response",
            )),
            Err(e) => {
                warn!("Connection test for {} failed: {}", kind.display_name(), e);
                ConnectionTestResult::failed(e)
            }
        }
    }
}

/// Builds a request, dropping system-role entries: system intent travels only
/// in `system_prompt`.
pub fn build_request(messages: &[NormalizedMessage], system_prompt: &str, options: GenerationOptions) -> ChatRequest {
    ChatRequest {
        messages: non_system_messages(messages),
        system_prompt: system_prompt.to_string(),
        options,
    }
}

pub fn non_system_messages(messages: &[NormalizedMessage]) -> Vec<NormalizedMessage> {
    messages.iter().filter(|m| m.role != Role::System).cloned().collect()
}

/// Reads the next item, racing it against `cancel`.
///
/// The token is checked before the read and again if the read fails, so a
/// transport abort caused by the cancellation still reports as
/// [`LlmError::Cancelled`].
pub(crate) async fn next_or_cancel<S, T, E>(
    stream: &mut S,
    cancel: Option<&CancellationToken>,
) -> Result<Option<T>, LlmError>
where
    S: Stream<Item = Result<T, E>> + Unpin,
    E: Into<LlmError>,
{
    let item = match cancel {
        Some(token) => {
            if token.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(LlmError::Cancelled),
                item = stream.next() => item,
            }
        }
        None => stream.next().await,
    };

    match item {
        None => Ok(None),
        Some(Ok(value)) => Ok(Some(value)),
        Some(Err(_)) if cancel.is_some_and(|t| t.is_cancelled()) => Err(LlmError::Cancelled),
        Some(Err(e)) => Err(e.into()),
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

/// Status, headers and body text of a failed response.
pub(crate) struct ErrorResponse {
    pub status: u16,
    pub headers: reqwest::header::HeaderMap,
    pub body: String,
}

impl ErrorResponse {
    pub async fn read(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Self { status, headers, body }
    }

    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// Raw fallback message when the vendor body is not structured.
    pub fn raw_message(&self) -> String {
        if self.body.trim().is_empty() {
            format!("HTTP {}", self.status)
        } else {
            format!("HTTP {}: {}", self.status, self.body.trim())
        }
    }
}

/// Whitespace-delimited word count, the fallback output-token estimate.
pub(crate) fn approximate_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Trace logging of raw vendor events, enabled by
/// `NOTEWRIGHT_STREAMING_DEBUG`.
pub(crate) fn streaming_debug() -> bool {
    std::env::var("NOTEWRIGHT_STREAMING_DEBUG").is_ok()
}
