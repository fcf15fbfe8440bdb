//! Groq adapter (OpenAI-compatible chat completions).
//!
//! Groq does not meter tokens mid-stream, so output tokens are estimated from
//! the deltas until an authoritative usage block arrives.

use async_trait::async_trait;
use log::{debug, error, trace};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::adapter::{
    approximate_tokens, http_client, next_or_cancel, streaming_debug, ErrorResponse, ProviderAdapter,
};
use crate::error::{LlmError, VendorErrorCategory};
use crate::settings::{has_key, resolve_model_id, snapshot, SettingsHandle, DEFAULT_GROQ_BASE_URL, DEFAULT_GROQ_MODEL};
use crate::sse::{json_events, SseEvent};
use crate::types::{ChatRequest, ChatResponse, GenerationOptions, NormalizedUsage, ProviderKind, StreamEvent, TokenStream};

const KIND: ProviderKind = ProviderKind::Groq;

pub struct GroqAdapter {
    settings: SettingsHandle,
}

impl GroqAdapter {
    pub fn new(settings: SettingsHandle) -> Self {
        Self { settings }
    }

    async fn post(&self, request: &ChatRequest, streaming: bool) -> Result<reqwest::Response, LlmError> {
        let settings = snapshot(&self.settings);
        let url = format!(
            "{}/openai/v1/chat/completions",
            settings.groq.trimmed_base_url(DEFAULT_GROQ_BASE_URL)
        );
        let api_key = settings.groq.api_key.clone().unwrap_or_default();
        debug!("Groq: POST {} (stream={})", url, streaming);

        let response = http_client(settings.request_timeout_secs)?
            .post(&url)
            .bearer_auth(api_key.trim())
            .json(&build_body(request, &self.model_id(), streaming))
            .send()
            .await?;

        if !response.status().is_success() {
            let err = classify_http_error(&ErrorResponse::read(response).await);
            error!("Groq request failed: {}", err);
            return Err(err);
        }
        Ok(response)
    }
}

fn build_body(request: &ChatRequest, model: &str, stream: bool) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if !request.system_prompt.trim().is_empty() {
        messages.push(json!({ "role": "system", "content": request.system_prompt }));
    }
    messages.extend(
        request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content })),
    );

    json!({
        "model": model,
        "messages": messages,
        "max_tokens": request.options.max_tokens,
        "temperature": request.options.temperature,
        "stream": stream,
    })
}

/// Authoritative usage from `x_groq.usage` or a top-level `usage` block.
fn reported_usage(chunk: &Value) -> Option<NormalizedUsage> {
    let usage = chunk
        .get("x_groq")
        .and_then(|x| x.get("usage"))
        .or_else(|| chunk.get("usage"))
        .filter(|u| u.is_object())?;
    Some(NormalizedUsage {
        input_tokens: usage["prompt_tokens"].as_u64(),
        output_tokens: usage["completion_tokens"].as_u64(),
        total_tokens: usage["total_tokens"].as_u64(),
        approximate: false,
    })
}

/// Maps Groq's `error.code` (falling back to HTTP status) to a category.
pub fn error_category(code: Option<&str>, status: u16) -> VendorErrorCategory {
    match code {
        Some("invalid_api_key") => VendorErrorCategory::Authentication,
        Some("rate_limit_exceeded") => VendorErrorCategory::RateLimited,
        Some("insufficient_quota") => VendorErrorCategory::QuotaExceeded,
        Some("model_not_found") | Some("model_decommissioned") => VendorErrorCategory::ModelNotFound,
        Some("context_length_exceeded") => VendorErrorCategory::Validation,
        _ => match status {
            503 => VendorErrorCategory::ModelNotReady,
            other => VendorErrorCategory::from_status(other),
        },
    }
}

fn error_from_value(error: &Value, status: u16) -> LlmError {
    let message = error["message"].as_str().unwrap_or("Unknown Groq error").to_string();
    LlmError::vendor(KIND, error_category(error["code"].as_str(), status), message)
}

fn classify_http_error(resp: &ErrorResponse) -> LlmError {
    match resp.json() {
        Some(body) if body["error"].is_object() => error_from_value(&body["error"], resp.status),
        _ => LlmError::vendor(KIND, VendorErrorCategory::from_status(resp.status), resp.raw_message()),
    }
}

/// Usage accounting for one stream: a running estimate, replaced by the
/// vendor's figures when they arrive.
#[derive(Debug, Clone, Default)]
struct UsageTracker {
    estimated_output: u64,
    saw_content: bool,
    reported: Option<NormalizedUsage>,
}

impl UsageTracker {
    fn observe_delta(&mut self, text: &str) {
        self.saw_content = true;
        self.estimated_output += approximate_tokens(text);
    }

    fn observe_report(&mut self, usage: NormalizedUsage) {
        self.reported = Some(usage);
    }

    fn finish(self) -> NormalizedUsage {
        match self.reported {
            Some(usage) => usage.with_total(),
            None if self.saw_content => NormalizedUsage {
                output_tokens: Some(self.estimated_output),
                approximate: true,
                ..Default::default()
            },
            None => NormalizedUsage::default(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GroqAdapter {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn model_id(&self) -> String {
        let s = snapshot(&self.settings).groq;
        resolve_model_id(&s.model, &s.custom_model_id, DEFAULT_GROQ_MODEL)
    }

    fn is_initialized(&self) -> bool {
        has_key(&snapshot(&self.settings).groq.api_key)
    }

    fn generation_options(&self) -> GenerationOptions {
        snapshot(&self.settings).generation
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let response = self.post(&request, false).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| LlmError::decode(KIND, e.to_string()))?;

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(ChatResponse {
            content,
            usage: reported_usage(&body).unwrap_or_default().with_total(),
        })
    }

    async fn complete_stream(
        &self,
        request: ChatRequest,
        cancel: Option<CancellationToken>,
    ) -> Result<TokenStream, LlmError> {
        let response = self.post(&request, true).await?;

        let stream = async_stream::try_stream! {
            let mut events = json_events(response.bytes_stream());
            let mut tracker = UsageTracker::default();

            while let Some(event) = next_or_cancel(&mut events, cancel.as_ref()).await? {
                let chunk = match event {
                    SseEvent::Message(chunk) => chunk,
                    SseEvent::Done => break,
                };
                if streaming_debug() {
                    trace!("Groq chunk: {}", chunk);
                }
                if chunk["error"].is_object() {
                    Err::<(), _>(error_from_value(&chunk["error"], 200))?;
                }
                if let Some(usage) = reported_usage(&chunk) {
                    tracker.observe_report(usage);
                }
                if let Some(text) = chunk["choices"][0]["delta"]["content"].as_str() {
                    if !text.is_empty() {
                        tracker.observe_delta(text);
                        yield StreamEvent::Delta(text.to_string());
                    }
                }
            }

            yield StreamEvent::Finished(tracker.finish());
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NormalizedMessage;

    #[test]
    fn test_system_prompt_leads_messages() {
        let request = ChatRequest {
            messages: vec![NormalizedMessage::user("hi")],
            system_prompt: "sys".into(),
            options: GenerationOptions::default(),
        };
        let body = build_body(&request, "m", true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_tracker_estimates_then_defers_to_report() {
        let mut tracker = UsageTracker::default();
        tracker.observe_delta("three word delta");
        tracker.observe_delta(" and two");
        let estimated = tracker.clone().finish();
        assert_eq!(estimated.output_tokens, Some(5));
        assert!(estimated.approximate);
        assert_eq!(estimated.input_tokens, None);

        tracker.observe_report(NormalizedUsage {
            input_tokens: Some(20),
            output_tokens: Some(7),
            total_tokens: Some(27),
            approximate: false,
        });
        let final_usage = tracker.finish();
        assert_eq!(final_usage.output_tokens, Some(7));
        assert!(!final_usage.approximate);
    }

    #[test]
    fn test_no_content_no_usage_stays_unknown() {
        assert!(UsageTracker::default().finish().is_empty());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(error_category(Some("invalid_api_key"), 401), VendorErrorCategory::Authentication);
        assert_eq!(error_category(Some("model_decommissioned"), 400), VendorErrorCategory::ModelNotFound);
        assert_eq!(error_category(None, 429), VendorErrorCategory::RateLimited);
        assert_eq!(error_category(Some("something_new"), 500), VendorErrorCategory::Other);
    }
}
