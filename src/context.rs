//! Builds the system prompt and message list for one assistant turn.

use notewright_edit::{TextBuffer, EDIT_END, EDIT_START};
use notewright_llm::{NormalizedMessage, Role};
use serde::{Deserialize, Serialize};

const BASE_PROMPT: &str = "You are a writing assistant working inside a Markdown note. \
Answer concisely. When the user asks a question about the note, answer it from the note's content. \
Never invent content that the user did not ask for.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Notes longer than this many characters are truncated.
    pub max_note_chars: usize,
    /// Most recent history messages kept.
    pub max_history_messages: usize,
    pub include_note: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_note_chars: 12_000,
            max_history_messages: 20,
            include_note: true,
        }
    }
}

/// The note the user is looking at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteContext {
    pub title: Option<String>,
    pub content: String,
    pub selection: Option<String>,
}

impl NoteContext {
    pub fn from_buffer<B: TextBuffer + ?Sized>(title: Option<String>, buffer: &B) -> Self {
        Self {
            title,
            content: buffer.content(),
            selection: Some(buffer.selected_text()).filter(|s| !s.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    pub system_prompt: String,
    pub messages: Vec<NormalizedMessage>,
}

/// System instructions, plus the edit protocol when edits are enabled.
pub fn build_system_prompt(edit_enabled: bool) -> String {
    if !edit_enabled {
        return BASE_PROMPT.to_string();
    }
    format!(
        r#"{base}

When the user asks you to change the note, describe the change in one or two sentences and then emit one edit command per change. Each command is a JSON object on its own, wrapped in markers:

{start}
{{"action": "append", "params": {{"text": "New paragraph."}}}}
{end}

In the <note> block every line starts with its zero-based line number followed by "| ". That prefix is not part of the note; never copy it into text you write.

Every command has a string "action" and an object "params". Available actions:
- replace_selection: replace the selected text. params: text
- insert_at_cursor: insert at the cursor. params: text
- replace_range: replace whole lines startLine..endLine (zero-based, inclusive). params: startLine, endLine, text
- find_replace: replace the first occurrence of find, or every occurrence when all is true. params: find, replace, all
- update_section: replace a section below a heading, up to the next heading of the same or higher level. params: heading, text
- append: add text at the end of the note. params: text
- prepend: add text at the start of the note, after any frontmatter. params: text
- replace_all: replace the whole note. params: text
- insert_after_heading: insert text on the line after a heading. params: heading, text

Commands run in order and stop at the first one that fails. Use valid JSON with double quotes and escaped newlines (\n). Do not put anything except the JSON object between the markers. Only emit commands when the user asked for a change."#,
        base = BASE_PROMPT,
        start = EDIT_START,
        end = EDIT_END,
    )
}

pub struct ContextAssembler {
    config: ContextConfig,
    edit_enabled: bool,
}

impl ContextAssembler {
    pub fn new(config: ContextConfig, edit_enabled: bool) -> Self {
        Self { config, edit_enabled }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn edit_enabled(&self) -> bool {
        self.edit_enabled
    }

    pub fn assemble(
        &self,
        history: &[NormalizedMessage],
        user_message: &str,
        note: Option<&NoteContext>,
    ) -> AssembledContext {
        let mut messages = self.trim_history(history);

        let content = match note.filter(|_| self.config.include_note) {
            Some(note) => format!("{}{}", self.describe_note(note), user_message),
            None => user_message.to_string(),
        };
        messages.push(NormalizedMessage::user(content));

        AssembledContext {
            system_prompt: build_system_prompt(self.edit_enabled),
            messages,
        }
    }

    /// Most recent non-system entries, starting with a user turn.
    fn trim_history(&self, history: &[NormalizedMessage]) -> Vec<NormalizedMessage> {
        let conversational: Vec<&NormalizedMessage> = history.iter().filter(|m| m.role != Role::System).collect();
        let keep_from = conversational.len().saturating_sub(self.config.max_history_messages);

        conversational[keep_from..]
            .iter()
            .skip_while(|m| m.role == Role::Assistant)
            .map(|m| (*m).clone())
            .collect()
    }

    fn describe_note(&self, note: &NoteContext) -> String {
        let mut out = String::new();
        match note.title.as_deref() {
            Some(title) if !title.trim().is_empty() => out.push_str(&format!("Current note: {}\n", title.trim())),
            _ => out.push_str("Current note:\n"),
        }
        out.push_str("<note>\n");
        let content = truncate_chars(&note.content, self.config.max_note_chars);
        if self.edit_enabled {
            out.push_str(&number_lines(&content));
        } else {
            out.push_str(&content);
        }
        out.push_str("\n</note>\n\n");

        if let Some(selection) = note.selection.as_deref() {
            out.push_str("Selected text:\n<selection>\n");
            out.push_str(selection);
            out.push_str("\n</selection>\n\n");
        }
        out
    }
}

/// Prefixes each line with its zero-based number, the addressing
/// `replace_range` uses.
fn number_lines(text: &str) -> String {
    text.split('\n')
        .enumerate()
        .map(|(n, line)| format!("{}| {}", n, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cuts `text` to `max` chars, appending a notice when anything was dropped.
fn truncate_chars(text: &str, max: usize) -> String {
    let total = text.chars().count();
    if total <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max).collect();
    format!("{}\n[... note truncated: showing the first {} of {} characters]", kept, max, total)
}
