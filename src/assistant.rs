//! One assistant turn: context assembly, streaming, edit extraction and
//! execution.

use futures_util::StreamExt;
use log::{debug, info};
use notewright_edit::{execute_commands, parse_reply, BatchReport, TextBuffer};
use notewright_llm::{LlmError, NormalizedMessage, NormalizedUsage, ProviderManager, StreamEvent};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::context::{ContextAssembler, ContextConfig, NoteContext};

/// Outcome of [`NoteAssistant::respond`].
#[derive(Debug, Clone)]
pub struct AssistantTurn {
    /// The full reply as streamed.
    pub reply: String,
    /// The reply with edit command blocks removed.
    pub display_text: String,
    pub usage: NormalizedUsage,
    /// Present when edits are enabled and the reply carried commands.
    pub report: Option<BatchReport>,
}

pub struct NoteAssistant {
    manager: Arc<ProviderManager>,
    assembler: ContextAssembler,
    edit_enabled: bool,
}

impl NoteAssistant {
    pub fn new(manager: Arc<ProviderManager>, context: ContextConfig, edit_enabled: bool) -> Self {
        Self {
            manager,
            assembler: ContextAssembler::new(context, edit_enabled),
            edit_enabled,
        }
    }

    pub fn manager(&self) -> &ProviderManager {
        &self.manager
    }

    /// Streams a reply to `user_message`, forwarding each delta to
    /// `on_delta` in arrival order, then applies any edit commands to
    /// `buffer`.
    ///
    /// Errors from the provider propagate unchanged, so a cancelled stream
    /// returns [`LlmError::Cancelled`]. Edit failures do not error; they are
    /// reported in [`AssistantTurn::report`].
    pub async fn respond<B, F>(
        &self,
        history: &[NormalizedMessage],
        user_message: &str,
        mut buffer: Option<&mut B>,
        note_title: Option<String>,
        cancel: Option<CancellationToken>,
        mut on_delta: F,
    ) -> Result<AssistantTurn, LlmError>
    where
        B: TextBuffer + ?Sized,
        F: FnMut(&str),
    {
        let note = buffer.as_deref().map(|b| NoteContext::from_buffer(note_title, b));
        let assembled = self.assembler.assemble(history, user_message, note.as_ref());
        debug!(
            "Sending {} message(s), system prompt {} chars",
            assembled.messages.len(),
            assembled.system_prompt.len()
        );

        let mut stream = self
            .manager
            .send_message_stream(&assembled.messages, &assembled.system_prompt, cancel.clone())
            .await?;

        let mut reply = String::new();
        let mut usage = NormalizedUsage::default();
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Delta(text) => {
                    on_delta(&text);
                    reply.push_str(&text);
                }
                StreamEvent::Usage(_) => {}
                StreamEvent::Finished(reported) => usage = reported,
            }
        }
        drop(stream);
        info!("Reply complete ({} chars, {})", reply.len(), usage);

        if !self.edit_enabled {
            return Ok(AssistantTurn {
                display_text: reply.trim().to_string(),
                reply,
                usage,
                report: None,
            });
        }

        let parsed = parse_reply(&reply);
        let report = if parsed.commands.is_empty() {
            None
        } else {
            info!("Applying {} edit command(s)", parsed.commands.len());
            Some(execute_commands(&parsed.commands, buffer.as_deref_mut(), cancel.as_ref()))
        };

        Ok(AssistantTurn {
            reply,
            display_text: parsed.display_text,
            usage,
            report,
        })
    }
}
