//! Extraction of edit commands from free-form model replies.
//!
//! The pipeline is: marker repair → strict block extraction → JSON repair →
//! structural validation. Every stage is best-effort; a candidate that fails
//! any stage is dropped without affecting the others.
//!
//! Malformations that are NOT recovered:
//! - one JSON object split across several marker pairs,
//! - a start marker with no end marker after it,
//! - unescaped quotes nested inside JSON strings,
//! - objects missing closing braces.

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::command::{EditCommand, RawCommand};
use crate::error::SkipReason;

pub const EDIT_START: &str = "<<<EDIT_START>>>";
pub const EDIT_END: &str = "<<<EDIT_END>>>";

static START_VARIANT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<+[ \t]*EDIT[_ ]START[ \t]*>*|EDIT[_ ]START[ \t]*>+").expect("valid start marker regex")
});

static END_VARIANT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<+[ \t]*EDIT[_ ]END[ \t]*>*|EDIT[_ ]END[ \t]*>+").expect("valid end marker regex")
});

static STRAY_BRACE_AFTER_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<<<EDIT_END>>>[ \t]*\}+").expect("valid stray brace regex"));

static BARE_COMMAND_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\{\s*"action"\s*:"#).expect("valid bare command regex"));

static COMMAND_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<<<EDIT_START>>>(.*?)<<<EDIT_END>>>").expect("valid block regex"));

static EMPTY_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*```[A-Za-z]*[ \t]*\n(?:[ \t]*\n)*[ \t]*```[ \t]*$").expect("valid fence regex"));

static EXCESS_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid blank line regex"));

/// A reply split into what the user should see and what should be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub display_text: String,
    pub commands: Vec<EditCommand>,
}

pub fn parse_reply(text: &str) -> ParsedReply {
    ParsedReply {
        display_text: strip_commands(text),
        commands: parse_commands(text),
    }
}

/// Normalizes damaged markers and wraps bare command objects. Idempotent.
pub fn repair_markers(text: &str) -> String {
    let repaired = START_VARIANT.replace_all(text, EDIT_START);
    let repaired = END_VARIANT.replace_all(&repaired, EDIT_END);
    let repaired = STRAY_BRACE_AFTER_END.replace_all(&repaired, EDIT_END);
    wrap_bare_commands(&repaired)
}

/// Byte ranges covered by marker blocks, including unterminated trailing ones.
fn protected_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut cursor = 0;
    while let Some(rel) = text[cursor..].find(EDIT_START) {
        let start = cursor + rel;
        let body = start + EDIT_START.len();
        match text[body..].find(EDIT_END) {
            Some(end_rel) => {
                let end = body + end_rel + EDIT_END.len();
                ranges.push((start, end));
                cursor = end;
            }
            None => {
                ranges.push((start, text.len()));
                break;
            }
        }
    }
    ranges
}

fn wrap_bare_commands(text: &str) -> String {
    let protected = protected_ranges(text);
    let inside = |pos: usize| protected.iter().any(|&(s, e)| pos >= s && pos < e);

    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut search_from = 0;
    while let Some(m) = BARE_COMMAND_START.find_at(text, search_from) {
        let start = m.start();
        if inside(start) {
            search_from = m.end();
            continue;
        }
        let Some(end) = matching_close(text, start) else {
            search_from = m.end();
            continue;
        };
        let object = &text[start..end];
        if !object.contains("\"params\"") {
            search_from = end;
            continue;
        }
        out.push_str(&text[copied..start]);
        out.push_str(EDIT_START);
        out.push('\n');
        out.push_str(object);
        out.push('\n');
        out.push_str(EDIT_END);
        copied = end;
        search_from = end;
    }
    out.push_str(&text[copied..]);
    out
}

/// Byte index just past the brace that closes the object opened at `open`.
fn matching_close(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[open..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Cleans one candidate payload before parsing: trims prose around the JSON,
/// removes trailing commas and drops surplus closing braces.
pub fn repair_json(candidate: &str) -> String {
    // A top-level array counts only when it opens the payload; a bracket in
    // prose (`[[wikilink]]`, `[x]`) must not swallow the object after it.
    let leading = candidate.len() - candidate.trim_start().len();
    let first = if candidate[leading..].starts_with('[') {
        leading
    } else {
        match candidate.find('{') {
            Some(first) => first,
            None => return candidate.trim().to_string(),
        }
    };
    let Some(last) = candidate.rfind(&['}', ']'][..]) else {
        return candidate.trim().to_string();
    };
    if last < first {
        return candidate.trim().to_string();
    }
    let trimmed = &candidate[first..=last];
    drop_surplus_closers(&strip_trailing_commas(trimmed))
}

fn strip_trailing_commas(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;
    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().copied().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn drop_surplus_closers(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for c in json.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                if depth == 0 {
                    continue;
                }
                depth -= 1;
            }
            _ => {}
        }
        out.push(c);
    }
    out
}

/// Parses every JSON value in a repaired candidate. Arrays are flattened so a
/// block may carry a list of commands.
fn parse_candidate(candidate: &str) -> Result<Vec<RawCommand>, SkipReason> {
    let mut values = Vec::new();
    let stream = serde_json::Deserializer::from_str(candidate).into_iter::<Value>();
    for item in stream {
        match item {
            Ok(Value::Array(items)) => values.extend(items),
            Ok(value) => values.push(value),
            Err(e) if values.is_empty() => return Err(SkipReason::InvalidJson(e.to_string())),
            Err(e) => {
                debug!("Ignoring trailing garbage in edit block: {e}");
                break;
            }
        }
    }
    Ok(values)
}

/// Structural check of one parsed candidate. Per-action fields are left for
/// execution time.
pub fn validate_structure(raw: &RawCommand) -> Result<EditCommand, SkipReason> {
    EditCommand::from_raw(raw)
}

/// Extracts all structurally valid commands, in order of appearance.
pub fn parse_commands(text: &str) -> Vec<EditCommand> {
    let repaired = repair_markers(text);
    let mut commands = Vec::new();

    for (idx, caps) in COMMAND_BLOCK.captures_iter(&repaired).enumerate() {
        let candidate = repair_json(&caps[1]);
        let values = match parse_candidate(&candidate) {
            Ok(values) => values,
            Err(reason) => {
                debug!("Skipping edit block {idx}: {reason}");
                continue;
            }
        };
        for value in values {
            match validate_structure(&value) {
                Ok(cmd) => commands.push(cmd),
                Err(reason) => debug!("Skipping candidate in edit block {idx}: {reason}"),
            }
        }
    }

    debug!("Extracted {} edit command(s) from reply", commands.len());
    commands
}

/// The reply with every command block removed, for display.
pub fn strip_commands(text: &str) -> String {
    let repaired = repair_markers(text);
    let without_blocks = COMMAND_BLOCK.replace_all(&repaired, "");
    let without_markers = without_blocks.replace(EDIT_START, "").replace(EDIT_END, "");
    let without_fences = EMPTY_FENCE.replace_all(&without_markers, "");
    EXCESS_BLANK_LINES
        .replace_all(&without_fences, "\n\n")
        .trim()
        .to_string()
}

/// Renders a command as a canonical marker block.
pub fn format_command(command: &EditCommand) -> String {
    let p = &command.params;
    let mut params = Map::new();
    if let Some(text) = &p.text {
        params.insert("text".into(), Value::from(text.as_str()));
    }
    if let Some(find) = &p.find {
        params.insert("find".into(), Value::from(find.as_str()));
    }
    if let Some(replace) = &p.replace {
        params.insert("replace".into(), Value::from(replace.as_str()));
    }
    if let Some(all) = p.all {
        params.insert("all".into(), Value::from(all));
    }
    if let Some(heading) = &p.heading {
        params.insert("heading".into(), Value::from(heading.as_str()));
    }
    if let Some(start) = p.start_line {
        params.insert("startLine".into(), Value::from(start));
    }
    if let Some(end) = p.end_line {
        params.insert("endLine".into(), Value::from(end));
    }

    let mut body = Map::new();
    body.insert("action".into(), Value::from(command.action.as_str()));
    body.insert("params".into(), Value::Object(params));
    format!("{EDIT_START}\n{}\n{EDIT_END}", Value::Object(body))
}
