//! AWS Bedrock adapter for Anthropic Claude models.
//!
//! Streaming responses arrive as AWS event-stream frames whose `chunk`
//! payloads wrap base64-encoded Anthropic message events.

use async_trait::async_trait;
use base64::Engine;
use log::{debug, error, trace};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::adapter::{http_client, next_or_cancel, streaming_debug, ErrorResponse, ProviderAdapter};
use crate::error::{LlmError, VendorErrorCategory};
use crate::eventstream::{Frame, FrameDecoder};
use crate::settings::{has_key, resolve_model_id, snapshot, SettingsHandle, DEFAULT_BEDROCK_MODEL};
use crate::types::{ChatRequest, ChatResponse, GenerationOptions, NormalizedUsage, ProviderKind, StreamEvent, TokenStream};

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
const KIND: ProviderKind = ProviderKind::Bedrock;

pub struct BedrockAdapter {
    settings: SettingsHandle,
}

impl BedrockAdapter {
    pub fn new(settings: SettingsHandle) -> Self {
        Self { settings }
    }

    fn endpoint(&self, model: &str, streaming: bool) -> String {
        let base = snapshot(&self.settings).bedrock.base_url();
        let op = if streaming { "invoke-with-response-stream" } else { "invoke" };
        format!("{}/model/{}/{}", base, model, op)
    }

    async fn post(&self, request: &ChatRequest, streaming: bool) -> Result<reqwest::Response, LlmError> {
        let settings = snapshot(&self.settings);
        let api_key = settings.bedrock.api_key.clone().unwrap_or_default();
        let model = self.model_id();
        let url = self.endpoint(&model, streaming);
        debug!("Bedrock: POST {} (stream={})", url, streaming);

        let accept = if streaming { "application/vnd.amazon.eventstream" } else { "application/json" };
        let response = http_client(settings.request_timeout_secs)?
            .post(&url)
            .bearer_auth(api_key.trim())
            .header(reqwest::header::ACCEPT, accept)
            .json(&build_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let err = classify_http_error(&ErrorResponse::read(response).await);
            error!("Bedrock request failed: {}", err);
            return Err(err);
        }
        Ok(response)
    }
}

/// Anthropic messages body. System prompt travels in `system` only.
fn build_body(request: &ChatRequest) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();

    let GenerationOptions { max_tokens, temperature } = request.options;
    let mut body = json!({
        "anthropic_version": ANTHROPIC_VERSION,
        "max_tokens": max_tokens,
        "temperature": temperature,
        "messages": messages,
    });
    if !request.system_prompt.trim().is_empty() {
        body["system"] = Value::String(request.system_prompt.clone());
    }
    body
}

fn parse_response(body: &Value) -> ChatResponse {
    let content = body["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"] == "text")
                .filter_map(|b| b["text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default();

    let usage = NormalizedUsage {
        input_tokens: body["usage"]["input_tokens"].as_u64(),
        output_tokens: body["usage"]["output_tokens"].as_u64(),
        ..Default::default()
    }
    .with_total();

    ChatResponse { content, usage }
}

/// Maps a Bedrock exception name to a category.
pub fn exception_category(name: &str) -> VendorErrorCategory {
    let short = name.split(':').next().unwrap_or(name).trim();
    let lower = short.to_ascii_lowercase();
    match lower.trim_end_matches("exception") {
        "throttling" | "toomanyrequests" => VendorErrorCategory::RateLimited,
        "accessdenied" | "unrecognizedclient" | "expiredtoken" | "invalidsignature" => {
            VendorErrorCategory::Authentication
        }
        "modelnotready" => VendorErrorCategory::ModelNotReady,
        "resourcenotfound" => VendorErrorCategory::ModelNotFound,
        "validation" => VendorErrorCategory::Validation,
        "servicequotaexceeded" => VendorErrorCategory::QuotaExceeded,
        "modeltimeout" => VendorErrorCategory::Timeout,
        _ => VendorErrorCategory::Other,
    }
}

fn vendor_message(body: &Value) -> Option<String> {
    body.get("message")
        .or_else(|| body.get("Message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn classify_http_error(resp: &ErrorResponse) -> LlmError {
    let body = resp.json().unwrap_or(Value::Null);
    let message = vendor_message(&body).unwrap_or_else(|| resp.raw_message());

    let category = resp
        .headers
        .get("x-amzn-ErrorType")
        .and_then(|v| v.to_str().ok())
        .or_else(|| body.get("__type").and_then(Value::as_str))
        .map(exception_category)
        .filter(|c| *c != VendorErrorCategory::Other)
        .unwrap_or_else(|| VendorErrorCategory::from_status(resp.status));

    LlmError::vendor(KIND, category, message)
}

fn classify_exception_frame(frame: &Frame) -> LlmError {
    let name = frame
        .header_str(":exception-type")
        .or_else(|| frame.header_str(":error-code"))
        .unwrap_or("UnknownException");
    let message = serde_json::from_slice::<Value>(&frame.payload)
        .ok()
        .and_then(|v| vendor_message(&v))
        .or_else(|| frame.header_str(":error-message").map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(&frame.payload).into_owned());
    let category = exception_category(name);
    let message = if category == VendorErrorCategory::Other {
        format!("{}: {}", name, message)
    } else {
        message
    };
    LlmError::vendor(KIND, category, message)
}

/// Per-stream state: accumulates usage from Anthropic events.
#[derive(Debug, Default)]
struct ClaudeEventState {
    usage: NormalizedUsage,
}

impl ClaudeEventState {
    /// Returns the normalized event carried by `event`, if any. Usage is
    /// surfaced as soon as the vendor reports it.
    fn apply(&mut self, event: &Value) -> Result<Option<StreamEvent>, LlmError> {
        match event["type"].as_str().unwrap_or_default() {
            "message_start" => Ok(event["message"]["usage"]["input_tokens"].as_u64().map(|input| {
                self.usage.input_tokens = Some(input);
                StreamEvent::Usage(self.usage)
            })),
            "content_block_delta" => Ok(event["delta"]["text"]
                .as_str()
                .map(|text| StreamEvent::Delta(text.to_string()))),
            "message_delta" => Ok(event["usage"]["output_tokens"].as_u64().map(|output| {
                self.usage.output_tokens = Some(output);
                StreamEvent::Usage(self.usage)
            })),
            "message_stop" => {
                let metrics = &event["amazon-bedrock-invocationMetrics"];
                if let Some(input) = metrics["inputTokenCount"].as_u64() {
                    self.usage.input_tokens = Some(input);
                }
                if let Some(output) = metrics["outputTokenCount"].as_u64() {
                    self.usage.output_tokens = Some(output);
                }
                Ok(None)
            }
            "error" => {
                let kind = event["error"]["type"].as_str().unwrap_or("error");
                let message = event["error"]["message"].as_str().unwrap_or(kind).to_string();
                let category = match kind {
                    "overloaded_error" | "rate_limit_error" => VendorErrorCategory::RateLimited,
                    "invalid_request_error" => VendorErrorCategory::Validation,
                    "authentication_error" | "permission_error" => VendorErrorCategory::Authentication,
                    _ => VendorErrorCategory::Other,
                };
                Err(LlmError::vendor(KIND, category, message))
            }
            _ => Ok(None),
        }
    }

    /// Interprets one event-stream frame.
    fn handle_frame(&mut self, frame: &Frame) -> Result<Option<StreamEvent>, LlmError> {
        match frame.header_str(":message-type").unwrap_or("event") {
            "exception" | "error" => Err(classify_exception_frame(frame)),
            _ => {
                if frame.header_str(":event-type").is_some_and(|t| t != "chunk") {
                    return Ok(None);
                }
                let envelope: Value = serde_json::from_slice(&frame.payload)
                    .map_err(|e| LlmError::decode(KIND, format!("chunk envelope: {}", e)))?;
                let Some(encoded) = envelope["bytes"].as_str() else {
                    return Ok(None);
                };
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| LlmError::decode(KIND, format!("chunk bytes: {}", e)))?;
                let event: Value = serde_json::from_slice(&decoded)
                    .map_err(|e| LlmError::decode(KIND, format!("chunk event: {}", e)))?;
                if streaming_debug() {
                    trace!("Bedrock event: {}", event);
                }
                self.apply(&event)
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for BedrockAdapter {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn model_id(&self) -> String {
        let s = snapshot(&self.settings).bedrock;
        resolve_model_id(&s.model, &s.custom_model_id, DEFAULT_BEDROCK_MODEL)
    }

    fn is_initialized(&self) -> bool {
        has_key(&snapshot(&self.settings).bedrock.api_key)
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
        Ok(parse_response(&body))
    }

    async fn complete_stream(
        &self,
        request: ChatRequest,
        cancel: Option<CancellationToken>,
    ) -> Result<TokenStream, LlmError> {
        let response = self.post(&request, true).await?;

        let stream = async_stream::try_stream! {
            let mut bytes = Box::pin(response.bytes_stream());
            let mut decoder = FrameDecoder::new();
            let mut state = ClaudeEventState::default();

            while let Some(chunk) = next_or_cancel(&mut bytes, cancel.as_ref()).await? {
                decoder.push(&chunk);
                while let Some(frame) = decoder
                    .next_frame()
                    .map_err(|e| LlmError::decode(KIND, e.to_string()))?
                {
                    if let Some(event) = state.handle_frame(&frame)? {
                        yield event;
                    }
                }
            }
            decoder.finish().map_err(|e| LlmError::decode(KIND, e.to_string()))?;

            yield StreamEvent::Finished(state.usage.with_total());
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NormalizedMessage;

    #[test]
    fn test_body_carries_system_prompt_separately() {
        let request = ChatRequest {
            messages: vec![NormalizedMessage::user("hi")],
            system_prompt: "be brief".into(),
            options: GenerationOptions { max_tokens: 10, temperature: 0.0 },
        };
        let body = build_body(&request);
        assert_eq!(body["anthropic_version"], ANTHROPIC_VERSION);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["max_tokens"], 10);
    }

    #[test]
    fn test_exception_categories() {
        assert_eq!(exception_category("ThrottlingException"), VendorErrorCategory::RateLimited);
        assert_eq!(exception_category("throttlingException"), VendorErrorCategory::RateLimited);
        assert_eq!(
            exception_category("AccessDeniedException:http://internal.amazon.com/coral/"),
            VendorErrorCategory::Authentication
        );
        assert_eq!(exception_category("ModelNotReadyException"), VendorErrorCategory::ModelNotReady);
        assert_eq!(exception_category("ModelStreamErrorException"), VendorErrorCategory::Other);
    }

    #[test]
    fn test_usage_state_machine_prefers_invocation_metrics() {
        let mut state = ClaudeEventState::default();
        let started = state
            .apply(&json!({"type": "message_start", "message": {"usage": {"input_tokens": 9, "output_tokens": 1}}}))
            .unwrap();
        assert!(matches!(started, Some(StreamEvent::Usage(u)) if u.input_tokens == Some(9)));
        assert_eq!(state.usage.input_tokens, Some(9));
        assert_eq!(state.usage.output_tokens, None);

        state.apply(&json!({"type": "message_delta", "usage": {"output_tokens": 30}})).unwrap();
        assert_eq!(state.usage.output_tokens, Some(30));

        state
            .apply(&json!({
                "type": "message_stop",
                "amazon-bedrock-invocationMetrics": {"inputTokenCount": 11, "outputTokenCount": 31}
            }))
            .unwrap();
        assert_eq!(state.usage.with_total().total_tokens, Some(42));
    }

    #[test]
    fn test_text_deltas() {
        let mut state = ClaudeEventState::default();
        let text = state
            .apply(&json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "Hel"}}))
            .unwrap();
        assert_eq!(text, Some(StreamEvent::Delta("Hel".into())));
    }
}
