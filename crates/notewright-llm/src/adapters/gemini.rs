use async_trait::async_trait;
use log::{debug, error, trace};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::adapter::{http_client, next_or_cancel, streaming_debug, ErrorResponse, ProviderAdapter};
use crate::error::{LlmError, VendorErrorCategory};
use crate::settings::{has_key, resolve_model_id, snapshot, SettingsHandle, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};
use crate::sse::{json_events, SseEvent};
use crate::types::{
    ChatRequest, ChatResponse, GenerationOptions, NormalizedUsage, ProviderKind, Role, StreamEvent, TokenStream,
};

const KIND: ProviderKind = ProviderKind::Gemini;

/// Google Gemini adapter (Generative Language API, `v1beta`).
pub struct GeminiAdapter {
    settings: SettingsHandle,
}

impl GeminiAdapter {
    pub fn new(settings: SettingsHandle) -> Self {
        Self { settings }
    }

    async fn post(&self, request: &ChatRequest, streaming: bool) -> Result<reqwest::Response, LlmError> {
        let settings = snapshot(&self.settings);
        let base = settings.gemini.trimmed_base_url(DEFAULT_GEMINI_BASE_URL);
        let model = self.model_id();
        let url = if streaming {
            format!("{}/v1beta/models/{}:streamGenerateContent?alt=sse", base, model)
        } else {
            format!("{}/v1beta/models/{}:generateContent", base, model)
        };
        let api_key = settings.gemini.api_key.clone().unwrap_or_default();
        debug!("Gemini: POST {}", url);

        let response = http_client(settings.request_timeout_secs)?
            .post(&url)
            .header("x-goog-api-key", api_key.trim())
            .json(&build_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let err = classify_http_error(&ErrorResponse::read(response).await);
            error!("Gemini request failed: {}", err);
            return Err(err);
        }
        Ok(response)
    }
}

fn build_body(request: &ChatRequest) -> Value {
    let contents: Vec<Value> = request
        .messages
        .iter()
        .map(|m| {
            let role = if m.role == Role::Assistant { "model" } else { "user" };
            json!({ "role": role, "parts": [{ "text": m.content }] })
        })
        .collect();

    let GenerationOptions { max_tokens, temperature } = request.options;
    let mut body = json!({
        "contents": contents,
        "generationConfig": { "maxOutputTokens": max_tokens, "temperature": temperature },
    });
    if !request.system_prompt.trim().is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": request.system_prompt }] });
    }
    body
}

/// Concatenated text of the first candidate.
fn candidate_text(chunk: &Value) -> String {
    chunk["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
        .unwrap_or_default()
}

fn usage_metadata(chunk: &Value) -> Option<NormalizedUsage> {
    let meta = chunk.get("usageMetadata")?;
    Some(NormalizedUsage {
        input_tokens: meta["promptTokenCount"].as_u64(),
        output_tokens: meta["candidatesTokenCount"].as_u64(),
        total_tokens: meta["totalTokenCount"].as_u64(),
        approximate: false,
    })
}

/// Maps a Gemini `error.status` (plus message hints) to a category.
pub fn status_category(status: &str, message: &str) -> VendorErrorCategory {
    let lower = message.to_ascii_lowercase();
    match status {
        "UNAUTHENTICATED" | "PERMISSION_DENIED" => VendorErrorCategory::Authentication,
        "INVALID_ARGUMENT" if lower.contains("api key") => VendorErrorCategory::Authentication,
        "RESOURCE_EXHAUSTED" if lower.contains("quota") => VendorErrorCategory::QuotaExceeded,
        "RESOURCE_EXHAUSTED" => VendorErrorCategory::RateLimited,
        "NOT_FOUND" => VendorErrorCategory::ModelNotFound,
        "INVALID_ARGUMENT" | "FAILED_PRECONDITION" => VendorErrorCategory::Validation,
        "DEADLINE_EXCEEDED" => VendorErrorCategory::Timeout,
        "UNAVAILABLE" => VendorErrorCategory::ModelNotReady,
        _ => VendorErrorCategory::Other,
    }
}

fn error_from_value(error: &Value, http_status: Option<u16>) -> LlmError {
    let message = error["message"].as_str().unwrap_or("Unknown Gemini error").to_string();
    let category = match error["status"].as_str() {
        Some(status) => status_category(status, &message),
        None => http_status.map(VendorErrorCategory::from_status).unwrap_or(VendorErrorCategory::Other),
    };
    LlmError::vendor(KIND, category, message)
}

fn classify_http_error(resp: &ErrorResponse) -> LlmError {
    match resp.json() {
        Some(body) if body.get("error").is_some() => error_from_value(&body["error"], Some(resp.status)),
        _ => LlmError::vendor(KIND, VendorErrorCategory::from_status(resp.status), resp.raw_message()),
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn model_id(&self) -> String {
        let s = snapshot(&self.settings).gemini;
        resolve_model_id(&s.model, &s.custom_model_id, DEFAULT_GEMINI_MODEL)
    }

    fn is_initialized(&self) -> bool {
        has_key(&snapshot(&self.settings).gemini.api_key)
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
        if body.get("error").is_some() {
            return Err(error_from_value(&body["error"], None));
        }

        Ok(ChatResponse {
            content: candidate_text(&body),
            usage: usage_metadata(&body).unwrap_or_default().with_total(),
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
            let mut usage = NormalizedUsage::default();

            while let Some(event) = next_or_cancel(&mut events, cancel.as_ref()).await? {
                let chunk = match event {
                    SseEvent::Message(chunk) => chunk,
                    SseEvent::Done => break,
                };
                if streaming_debug() {
                    trace!("Gemini chunk: {}", chunk);
                }
                if chunk.get("error").is_some() {
                    Err::<(), _>(error_from_value(&chunk["error"], None))?;
                }
                // Usage may appear on any chunk; the latest report wins.
                if let Some(reported) = usage_metadata(&chunk) {
                    let before = usage;
                    usage.merge_from(&reported);
                    if usage != before {
                        yield StreamEvent::Usage(usage);
                    }
                }
                let text = candidate_text(&chunk);
                if !text.is_empty() {
                    yield StreamEvent::Delta(text);
                }
            }

            yield StreamEvent::Finished(usage.with_total());
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NormalizedMessage;

    #[test]
    fn test_body_maps_roles_and_system_instruction() {
        let request = ChatRequest {
            messages: vec![NormalizedMessage::user("hi"), NormalizedMessage::assistant("hello")],
            system_prompt: "sys".into(),
            options: GenerationOptions { max_tokens: 50, temperature: 0.5 },
        };
        let body = build_body(&request);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 50);
    }

    #[test]
    fn test_empty_system_prompt_is_omitted() {
        let request = ChatRequest {
            messages: vec![NormalizedMessage::user("hi")],
            system_prompt: String::new(),
            options: GenerationOptions::default(),
        };
        assert!(build_body(&request).get("systemInstruction").is_none());
    }

    #[test]
    fn test_status_categories() {
        assert_eq!(status_category("RESOURCE_EXHAUSTED", "Too many requests"), VendorErrorCategory::RateLimited);
        assert_eq!(
            status_category("RESOURCE_EXHAUSTED", "You exceeded your current quota"),
            VendorErrorCategory::QuotaExceeded
        );
        assert_eq!(
            status_category("INVALID_ARGUMENT", "API key not valid. Please pass a valid API key."),
            VendorErrorCategory::Authentication
        );
        assert_eq!(status_category("INTERNAL", "boom"), VendorErrorCategory::Other);
    }

    #[test]
    fn test_candidate_text_joins_parts() {
        let chunk = json!({"candidates": [{"content": {"parts": [{"text": "a"}, {"text": "b"}]}}]});
        assert_eq!(candidate_text(&chunk), "ab");
        assert_eq!(candidate_text(&json!({})), "");
    }
}
