//! # notewright
//!
//! An LLM writing assistant for Markdown notes. A turn assembles the note and
//! conversation into a prompt, streams the reply from the configured provider
//! (AWS Bedrock, Google Gemini or Groq) and applies the edit commands the
//! reply carries.
//!
//! The provider layer lives in `notewright-llm` and the edit protocol in
//! `notewright-edit`; both are re-exported here.

pub mod assistant;
pub mod cli;
pub mod config;
pub mod context;
pub mod utils;

pub use assistant::{AssistantTurn, NoteAssistant};
pub use config::NotewrightConfig;
pub use context::{build_system_prompt, AssembledContext, ContextAssembler, ContextConfig, NoteContext};

pub use notewright_edit as edit;
pub use notewright_llm as llm;

/// Current version of the notewright crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
