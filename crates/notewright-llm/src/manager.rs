//! Provider selection, "not configured" short-circuiting, connection probe
//! caching and call telemetry.

use futures_util::Stream;
use log::{debug, info};
use pin_project::pin_project;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::adapter::ProviderAdapter;
use crate::adapters::create_adapter;
use crate::connection::{ConnectionCache, ConnectionState, ConnectionUpdate};
use crate::error::LlmError;
use crate::settings::{snapshot, SettingsHandle};
use crate::telemetry::{CallRecord, TelemetrySink};
use crate::types::{ChatResponse, ConnectionTestResult, NormalizedMessage, NormalizedUsage, ProviderKind, StreamEvent, TokenStream};

pub struct ProviderManager {
    settings: SettingsHandle,
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    telemetry: Arc<dyn TelemetrySink>,
    connection: Arc<ConnectionCache>,
}

impl ProviderManager {
    /// Registers the built-in adapter for every provider.
    pub fn new(settings: SettingsHandle, telemetry: Arc<dyn TelemetrySink>, connection: Arc<ConnectionCache>) -> Self {
        let adapters = ProviderKind::ALL
            .into_iter()
            .map(|kind| create_adapter(kind, settings.clone()))
            .collect();
        Self::with_adapters(settings, adapters, telemetry, connection)
    }

    /// Uses the given adapters instead of the built-in ones. A later adapter
    /// for the same provider replaces an earlier one.
    pub fn with_adapters(
        settings: SettingsHandle,
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        telemetry: Arc<dyn TelemetrySink>,
        connection: Arc<ConnectionCache>,
    ) -> Self {
        let adapters = adapters.into_iter().map(|a| (a.kind(), a)).collect();
        Self {
            settings,
            adapters,
            telemetry,
            connection,
        }
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// Configured provider; unknown ids select the default.
    pub fn active_kind(&self) -> ProviderKind {
        snapshot(&self.settings).active_kind()
    }

    pub fn active_adapter(&self) -> Result<Arc<dyn ProviderAdapter>, LlmError> {
        let kind = self.active_kind();
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| LlmError::Configuration(format!("No adapter registered for {}", kind.display_name())))
    }

    pub fn is_configured(&self) -> bool {
        self.active_adapter().map(|a| a.is_initialized()).unwrap_or(false)
    }

    /// Active adapter, failing without network access when it lacks
    /// credentials.
    fn ready_adapter(&self) -> Result<Arc<dyn ProviderAdapter>, LlmError> {
        let adapter = self.active_adapter()?;
        if !adapter.is_initialized() {
            return Err(LlmError::not_configured(adapter.kind()));
        }
        Ok(adapter)
    }

    pub async fn send_message(
        &self,
        messages: &[NormalizedMessage],
        system_prompt: &str,
    ) -> Result<ChatResponse, LlmError> {
        let adapter = self.ready_adapter()?;
        let mut call = CallGuard::start(self.telemetry.clone(), adapter.kind(), adapter.model_id());

        let result = adapter.send_message(messages, system_prompt).await;
        match &result {
            Ok(response) => call.succeed(response.usage),
            Err(e) => call.fail(e),
        }
        result
    }

    /// Opens a stream on the active provider. Telemetry is reported once,
    /// when the stream finishes, fails, or is dropped early.
    pub async fn send_message_stream(
        &self,
        messages: &[NormalizedMessage],
        system_prompt: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<TokenStream, LlmError> {
        let adapter = self.ready_adapter()?;
        let mut call = CallGuard::start(self.telemetry.clone(), adapter.kind(), adapter.model_id());

        match adapter.send_message_stream(messages, system_prompt, cancel).await {
            Ok(inner) => Ok(Box::pin(MeteredStream { inner, call })),
            Err(e) => {
                call.fail(&e);
                Err(e)
            }
        }
    }

    /// Probes the active provider unless a cached result for it is still
    /// fresh. `force` bypasses the cache.
    pub async fn test_connection(&self, force: bool) -> ConnectionTestResult {
        let kind = self.active_kind();

        if !force && self.connection.is_cache_valid() {
            let state = self.connection.state();
            if state.provider == Some(kind) {
                debug!("Using cached connection state for {}", kind.display_name());
                return cached_result(kind, state);
            }
        }

        let adapter = match self.ready_adapter() {
            Ok(adapter) => adapter,
            Err(e) => return ConnectionTestResult::failed(e),
        };

        let result = adapter.test_connection().await;
        info!("Connection test for {}: {}", kind.display_name(), result.message);
        self.connection.update_connection_state(ConnectionUpdate {
            is_connected: result.success,
            last_error: (!result.success).then(|| result.message.clone()),
            provider: Some(kind),
        });
        result
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn clear_connection_cache(&self) {
        self.connection.clear_cache();
    }
}

fn cached_result(kind: ProviderKind, state: ConnectionState) -> ConnectionTestResult {
    if state.is_connected {
        ConnectionTestResult::ok(format!("Connected to {} (cached)", kind.display_name()))
    } else {
        ConnectionTestResult {
            success: false,
            message: state
                .last_error
                .unwrap_or_else(|| format!("{} is not reachable", kind.display_name())),
            error: None,
        }
    }
}

/// Times one call and reports it exactly once: explicitly on completion, or
/// from `Drop` when the call is abandoned.
struct CallGuard {
    sink: Arc<dyn TelemetrySink>,
    provider: ProviderKind,
    model_id: String,
    started: Instant,
    /// Last counts seen, reported if the call fails or is abandoned.
    usage: NormalizedUsage,
    reported: bool,
}

impl CallGuard {
    fn start(sink: Arc<dyn TelemetrySink>, provider: ProviderKind, model_id: String) -> Self {
        debug!("Dispatching {} call ({})", provider.id(), model_id);
        Self {
            sink,
            provider,
            model_id,
            started: Instant::now(),
            usage: NormalizedUsage::default(),
            reported: false,
        }
    }

    fn succeed(&mut self, usage: NormalizedUsage) {
        self.report(usage, None);
    }

    fn observe(&mut self, usage: NormalizedUsage) {
        self.usage = usage;
    }

    fn fail(&mut self, error: &LlmError) {
        self.report(self.usage, Some(error.to_string()));
    }

    fn report(&mut self, usage: NormalizedUsage, error_message: Option<String>) {
        if self.reported {
            return;
        }
        self.reported = true;
        self.sink.record_call(CallRecord {
            provider: self.provider,
            model_id: self.model_id.clone(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            success: error_message.is_none(),
            error_message,
        });
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if !self.reported {
            self.report(self.usage, Some("Call abandoned before completion".to_string()));
        }
    }
}

/// Passes events through unchanged and reports the call on its terminal event.
#[pin_project]
struct MeteredStream<S> {
    #[pin]
    inner: S,
    call: CallGuard,
}

impl<S> Stream for MeteredStream<S>
where
    S: Stream<Item = Result<StreamEvent, LlmError>>,
{
    type Item = Result<StreamEvent, LlmError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let polled = this.inner.poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(StreamEvent::Usage(usage)))) => this.call.observe(*usage),
            Poll::Ready(Some(Ok(StreamEvent::Finished(usage)))) => this.call.succeed(*usage),
            Poll::Ready(Some(Err(e))) => this.call.fail(e),
            Poll::Ready(None) => this
                .call
                .fail(&LlmError::Transport("Stream ended without a terminal event".to_string())),
            _ => {}
        }
        polled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{update, ProviderSettings};
    use crate::telemetry::MemoryTelemetrySink;

    fn manager_with(settings: ProviderSettings) -> (ProviderManager, Arc<MemoryTelemetrySink>) {
        let sink = Arc::new(MemoryTelemetrySink::new());
        let manager = ProviderManager::new(settings.into_handle(), sink.clone(), Arc::new(ConnectionCache::default()));
        (manager, sink)
    }

    #[test]
    fn test_unknown_provider_falls_back_to_default() {
        let (manager, _) = manager_with(ProviderSettings {
            provider: "mystery".into(),
            ..Default::default()
        });
        assert_eq!(manager.active_kind(), ProviderKind::Bedrock);
    }

    #[tokio::test]
    async fn test_not_configured_short_circuits() {
        let (manager, sink) = manager_with(ProviderSettings {
            provider: "gemini".into(),
            ..Default::default()
        });
        assert!(!manager.is_configured());

        let err = manager
            .send_message(&[NormalizedMessage::user("hi")], "")
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Configuration(ref msg) if msg.contains("Google Gemini")));

        let result = manager.send_message_stream(&[NormalizedMessage::user("hi")], "", None).await;
        assert!(matches!(result, Err(LlmError::Configuration(_))));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_probe_is_not_cached() {
        let (manager, _) = manager_with(ProviderSettings::default());
        let result = manager.test_connection(false).await;
        assert!(!result.success);
        assert!(manager.connection_state().last_check_time.is_none());

        update(manager.settings(), |s| s.bedrock.api_key = Some("k".into()));
        assert!(manager.is_configured());
    }

    fn metered(
        sink: &Arc<MemoryTelemetrySink>,
        events: Vec<Result<StreamEvent, LlmError>>,
    ) -> MeteredStream<futures_util::stream::Iter<std::vec::IntoIter<Result<StreamEvent, LlmError>>>> {
        MeteredStream {
            inner: futures_util::stream::iter(events),
            call: CallGuard::start(sink.clone(), ProviderKind::Bedrock, "claude-test".into()),
        }
    }

    fn input_only(tokens: u64) -> NormalizedUsage {
        NormalizedUsage {
            input_tokens: Some(tokens),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cancelled_stream_keeps_known_input_tokens() {
        use futures_util::StreamExt;

        let sink = Arc::new(MemoryTelemetrySink::new());
        let mut stream = metered(
            &sink,
            vec![
                Ok(StreamEvent::Usage(input_only(11))),
                Ok(StreamEvent::Delta("par".into())),
                Err(LlmError::Cancelled),
            ],
        );
        while let Some(event) = stream.next().await {
            if event.is_err() {
                break;
            }
        }
        drop(stream);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert_eq!(records[0].input_tokens, Some(11));
        assert_eq!(records[0].output_tokens, None);
    }

    #[tokio::test]
    async fn test_abandoned_stream_keeps_known_input_tokens() {
        use futures_util::StreamExt;

        let sink = Arc::new(MemoryTelemetrySink::new());
        let mut stream = metered(
            &sink,
            vec![
                Ok(StreamEvent::Usage(input_only(7))),
                Ok(StreamEvent::Delta("never read".into())),
            ],
        );
        assert!(matches!(stream.next().await, Some(Ok(StreamEvent::Usage(_)))));
        drop(stream);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert_eq!(records[0].input_tokens, Some(7));
    }
}
