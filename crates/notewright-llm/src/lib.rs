//! # notewright-llm
//!
//! One streaming chat interface over AWS Bedrock (Claude), Google Gemini and
//! Groq.
//!
//! Every adapter turns its vendor's wire format into the same lazy
//! [`TokenStream`]: zero or more [`StreamEvent::Delta`] items followed by a
//! single [`StreamEvent::Finished`] carrying [`NormalizedUsage`]. Token counts
//! a vendor never reports stay `None`.
//!
//! ```rust,no_run
//! use notewright_llm::{
//!     ConnectionCache, LogTelemetrySink, NormalizedMessage, ProviderManager, ProviderSettings, StreamEvent,
//! };
//! use futures_util::StreamExt;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), notewright_llm::LlmError> {
//! let manager = ProviderManager::new(
//!     ProviderSettings::default().into_handle(),
//!     Arc::new(LogTelemetrySink),
//!     Arc::new(ConnectionCache::default()),
//! );
//! let mut stream = manager
//!     .send_message_stream(&[NormalizedMessage::user("Hello")], "Be brief.", None)
//!     .await?;
//! while let Some(event) = stream.next().await {
//!     match event? {
//!         StreamEvent::Delta(text) => print!("{}", text),
//!         StreamEvent::Usage(_) => {}
//!         StreamEvent::Finished(usage) => println!("\n[{}]", usage),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod adapters;
pub mod connection;
pub mod error;
pub mod eventstream;
pub mod manager;
pub mod settings;
pub mod sse;
pub mod telemetry;
pub mod types;

pub use adapter::{build_request, ProviderAdapter, PROBE_OPTIONS, PROBE_PROMPT};
pub use adapters::{create_adapter, BedrockAdapter, GeminiAdapter, GroqAdapter};
pub use connection::{ConnectionCache, ConnectionState, ConnectionUpdate, DEFAULT_CACHE_DURATION_SECS};
pub use error::{LlmError, VendorErrorCategory};
pub use manager::ProviderManager;
pub use settings::{BedrockSettings, ProviderSettings, SettingsHandle, VendorSettings};
pub use telemetry::{CallRecord, LogTelemetrySink, MemoryTelemetrySink, TelemetrySink};
pub use types::{
    ChatRequest, ChatResponse, ConnectionTestResult, GenerationOptions, NormalizedMessage, NormalizedUsage,
    ProviderKind, Role, StreamEvent, TokenStream,
};
