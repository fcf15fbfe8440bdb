//! Edit command data model.
//!
//! Commands arrive as loosely-typed JSON (`RawCommand`). Structural
//! validation turns them into [`EditCommand`] with a normalized parameter bag;
//! the per-action required fields are only checked when the command is
//! resolved into an [`EditOperation`] right before execution.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{ExecutionError, SkipReason};

/// A parsed JSON candidate that has not been validated yet.
pub type RawCommand = Value;

/// The closed set of edit actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditAction {
    ReplaceSelection,
    InsertAtCursor,
    ReplaceRange,
    FindReplace,
    UpdateSection,
    Append,
    Prepend,
    ReplaceAll,
    InsertAfterHeading,
}

impl EditAction {
    pub const ALL: [EditAction; 9] = [
        EditAction::ReplaceSelection,
        EditAction::InsertAtCursor,
        EditAction::ReplaceRange,
        EditAction::FindReplace,
        EditAction::UpdateSection,
        EditAction::Append,
        EditAction::Prepend,
        EditAction::ReplaceAll,
        EditAction::InsertAfterHeading,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EditAction::ReplaceSelection => "replace_selection",
            EditAction::InsertAtCursor => "insert_at_cursor",
            EditAction::ReplaceRange => "replace_range",
            EditAction::FindReplace => "find_replace",
            EditAction::UpdateSection => "update_section",
            EditAction::Append => "append",
            EditAction::Prepend => "prepend",
            EditAction::ReplaceAll => "replace_all",
            EditAction::InsertAfterHeading => "insert_after_heading",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }
}

impl fmt::Display for EditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized parameter bag. `text` already holds whichever of the
/// `text`/`content` aliases the model used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditCommandParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub find: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<usize>,
}

impl EditCommandParams {
    /// Coalesces aliases and lenient scalar encodings from a JSON object.
    pub fn from_json(params: &Map<String, Value>) -> Self {
        Self {
            text: string_field(params, "text").or_else(|| string_field(params, "content")),
            find: string_field(params, "find"),
            replace: string_field(params, "replace"),
            all: params.get("all").and_then(lenient_bool),
            heading: string_field(params, "heading"),
            start_line: line_field(params, "startLine", "start_line"),
            end_line: line_field(params, "endLine", "end_line"),
        }
    }

    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

fn string_field(params: &Map<String, Value>, key: &str) -> Option<String> {
    match params.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn line_field(params: &Map<String, Value>, camel: &str, snake: &str) -> Option<usize> {
    let value = params.get(camel).or_else(|| params.get(snake))?;
    match value {
        Value::Number(n) => n.as_u64().map(|v| v as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A structurally valid edit command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditCommand {
    pub action: EditAction,
    pub params: EditCommandParams,
}

impl EditCommand {
    pub fn new(action: EditAction, params: EditCommandParams) -> Self {
        Self { action, params }
    }

    /// Structural validation: a non-null object, a known string `action`,
    /// and an object `params`. Nothing action-specific is checked here.
    pub fn from_raw(raw: &RawCommand) -> Result<Self, SkipReason> {
        let obj = raw.as_object().ok_or(SkipReason::NotAnObject)?;
        let action = match obj.get("action") {
            Some(Value::String(name)) => {
                EditAction::parse(name).ok_or_else(|| SkipReason::UnknownAction(name.clone()))?
            }
            _ => return Err(SkipReason::MissingAction),
        };
        let params = match obj.get("params") {
            Some(Value::Object(map)) => EditCommandParams::from_json(map),
            _ => return Err(SkipReason::MissingParams),
        };
        Ok(Self { action, params })
    }

    /// Execution-time validation into the per-action operation.
    pub fn resolve(&self) -> Result<EditOperation, ExecutionError> {
        let p = &self.params;
        let text = p.text_or_empty().to_string();
        let op = match self.action {
            EditAction::ReplaceSelection => EditOperation::ReplaceSelection { text },
            EditAction::InsertAtCursor => EditOperation::InsertAtCursor { text },
            EditAction::ReplaceRange => match (p.start_line, p.end_line) {
                (Some(start_line), Some(end_line)) => EditOperation::ReplaceRange {
                    start_line,
                    end_line,
                    text,
                },
                _ => return Err(ExecutionError::MissingParam("startLine and endLine")),
            },
            EditAction::FindReplace => {
                let find = p
                    .find
                    .clone()
                    .filter(|f| !f.is_empty())
                    .ok_or(ExecutionError::MissingParam("find"))?;
                EditOperation::FindReplace {
                    find,
                    replace: p.replace.clone().unwrap_or_default(),
                    all: p.all.unwrap_or(false),
                }
            }
            EditAction::UpdateSection => EditOperation::UpdateSection {
                heading: required_heading(p)?,
                text,
            },
            EditAction::Append => EditOperation::Append { text },
            EditAction::Prepend => EditOperation::Prepend { text },
            EditAction::ReplaceAll => EditOperation::ReplaceAll { text },
            EditAction::InsertAfterHeading => EditOperation::InsertAfterHeading {
                heading: required_heading(p)?,
                text,
            },
        };
        Ok(op)
    }

    /// Short human-readable summary used in result listings.
    pub fn describe(&self) -> String {
        let p = &self.params;
        match self.action {
            EditAction::FindReplace => format!("find_replace \"{}\"", p.find.as_deref().unwrap_or("")),
            EditAction::UpdateSection | EditAction::InsertAfterHeading => {
                format!("{} \"{}\"", self.action, p.heading.as_deref().unwrap_or(""))
            }
            EditAction::ReplaceRange => format!(
                "replace_range {}-{}",
                p.start_line.map(|v| v.to_string()).unwrap_or_else(|| "?".into()),
                p.end_line.map(|v| v.to_string()).unwrap_or_else(|| "?".into())
            ),
            other => other.to_string(),
        }
    }
}

fn required_heading(p: &EditCommandParams) -> Result<String, ExecutionError> {
    p.heading
        .clone()
        .filter(|h| !h.trim().is_empty())
        .ok_or(ExecutionError::MissingParam("heading"))
}

/// One fully-specified edit, ready to run against a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOperation {
    ReplaceSelection { text: String },
    InsertAtCursor { text: String },
    ReplaceRange { start_line: usize, end_line: usize, text: String },
    FindReplace { find: String, replace: String, all: bool },
    UpdateSection { heading: String, text: String },
    Append { text: String },
    Prepend { text: String },
    ReplaceAll { text: String },
    InsertAfterHeading { heading: String, text: String },
}

/// Outcome of one attempted command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub command: EditCommand,
    pub success: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_names_round_trip() {
        for action in EditAction::ALL {
            assert_eq!(EditAction::parse(action.as_str()), Some(action));
            let encoded = serde_json::to_value(action).unwrap();
            assert_eq!(encoded, json!(action.as_str()));
        }
        assert_eq!(EditAction::parse("delete_everything"), None);
    }

    #[test]
    fn test_content_alias_is_coalesced() {
        let cmd = EditCommand::from_raw(&json!({"action": "append", "params": {"content": "x"}})).unwrap();
        assert_eq!(cmd.params.text.as_deref(), Some("x"));
    }

    #[test]
    fn test_text_wins_over_content() {
        let cmd = EditCommand::from_raw(&json!({
            "action": "append",
            "params": {"text": "a", "content": "b"}
        }))
        .unwrap();
        assert_eq!(cmd.params.text.as_deref(), Some("a"));
    }

    #[test]
    fn test_structural_rejections() {
        assert_eq!(EditCommand::from_raw(&json!(null)), Err(SkipReason::NotAnObject));
        assert_eq!(
            EditCommand::from_raw(&json!({"params": {}})),
            Err(SkipReason::MissingAction)
        );
        assert_eq!(
            EditCommand::from_raw(&json!({"action": 3, "params": {}})),
            Err(SkipReason::MissingAction)
        );
        assert_eq!(
            EditCommand::from_raw(&json!({"action": "rewrite", "params": {}})),
            Err(SkipReason::UnknownAction("rewrite".into()))
        );
        assert_eq!(
            EditCommand::from_raw(&json!({"action": "append", "params": null})),
            Err(SkipReason::MissingParams)
        );
    }

    #[test]
    fn test_missing_required_fields_pass_structure_but_fail_resolve() {
        let cmd = EditCommand::from_raw(&json!({"action": "find_replace", "params": {"replace": "y"}})).unwrap();
        assert_eq!(cmd.resolve(), Err(ExecutionError::MissingParam("find")));

        let cmd = EditCommand::from_raw(&json!({"action": "replace_range", "params": {"startLine": 1}})).unwrap();
        assert!(matches!(cmd.resolve(), Err(ExecutionError::MissingParam(_))));

        let cmd = EditCommand::from_raw(&json!({"action": "update_section", "params": {"text": "x"}})).unwrap();
        assert_eq!(cmd.resolve(), Err(ExecutionError::MissingParam("heading")));
    }

    #[test]
    fn test_line_numbers_accept_numeric_strings() {
        let cmd = EditCommand::from_raw(&json!({
            "action": "replace_range",
            "params": {"startLine": "2", "endLine": 4, "text": "t"}
        }))
        .unwrap();
        assert_eq!(
            cmd.resolve().unwrap(),
            EditOperation::ReplaceRange { start_line: 2, end_line: 4, text: "t".into() }
        );
    }

    #[test]
    fn test_all_flag_accepts_string() {
        let cmd = EditCommand::from_raw(&json!({
            "action": "find_replace",
            "params": {"find": "a", "replace": "b", "all": "true"}
        }))
        .unwrap();
        assert_eq!(cmd.params.all, Some(true));
    }
}
