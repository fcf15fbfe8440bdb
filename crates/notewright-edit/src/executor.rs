//! Sequential execution of edit batches against a [`TextBuffer`].
//!
//! Each command commits directly to the buffer. A batch runs left to right
//! and halts at the first failure; mutations already applied stay applied.

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::buffer::{offset_to_position, Position, TextBuffer};
use crate::command::{EditCommand, EditOperation, ExecutionResult};
use crate::error::ExecutionError;

/// Terminal state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Every command succeeded.
    Completed,
    /// The command at `index` failed; later commands were not attempted.
    Halted { index: usize },
    /// Cancellation was observed before the command at `index` started.
    Cancelled { index: usize },
}

/// Results of the executed prefix of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub results: Vec<ExecutionResult>,
    pub state: BatchState,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.state == BatchState::Completed
    }

    pub fn applied(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    /// The result that halted the batch, if any.
    pub fn failure(&self) -> Option<&ExecutionResult> {
        match self.state {
            BatchState::Halted { index } => self.results.get(index),
            _ => None,
        }
    }
}

/// Runs `commands` in order, stopping at the first failure.
///
/// Cancellation is checked before each command starts; a command that has
/// started always runs to completion.
pub fn execute_commands<B: TextBuffer + ?Sized>(
    commands: &[EditCommand],
    mut buffer: Option<&mut B>,
    cancel: Option<&CancellationToken>,
) -> BatchReport {
    let mut results = Vec::with_capacity(commands.len());

    for (index, command) in commands.iter().enumerate() {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            info!("Edit batch cancelled before command {} of {}", index + 1, commands.len());
            return BatchReport {
                results,
                state: BatchState::Cancelled { index },
            };
        }

        let result = execute_command(command, buffer.as_deref_mut());
        let failed = !result.success;
        results.push(result);

        if failed {
            warn!(
                "Edit batch halted at command {} of {} ({}): {}",
                index + 1,
                commands.len(),
                command.action,
                results[index].message
            );
            return BatchReport {
                results,
                state: BatchState::Halted { index },
            };
        }
    }

    BatchReport {
        results,
        state: BatchState::Completed,
    }
}

/// Runs a single command and captures the outcome.
pub fn execute_command<B: TextBuffer + ?Sized>(command: &EditCommand, buffer: Option<&mut B>) -> ExecutionResult {
    let outcome = command
        .resolve()
        .and_then(|op| match buffer {
            Some(buf) => apply(&op, buf),
            None => Err(ExecutionError::NoActiveEditor),
        });

    match outcome {
        Ok(message) => {
            debug!("Applied {}: {}", command.describe(), message);
            ExecutionResult {
                command: command.clone(),
                success: true,
                message,
            }
        }
        Err(err) => ExecutionResult {
            command: command.clone(),
            success: false,
            message: err.to_string(),
        },
    }
}

fn apply<B: TextBuffer + ?Sized>(op: &EditOperation, buf: &mut B) -> Result<String, ExecutionError> {
    match op {
        EditOperation::ReplaceSelection { text } => {
            let selection = buf
                .selection()
                .filter(|s| !s.is_empty())
                .ok_or(ExecutionError::NoSelection)?;
            buf.replace_range(text, selection.from(), selection.to());
            Ok("Replaced selection".to_string())
        }
        EditOperation::InsertAtCursor { text } => {
            let cursor = buf.cursor();
            buf.replace_range(text, cursor, cursor);
            Ok(format!("Inserted text at line {}", cursor.line + 1))
        }
        EditOperation::ReplaceRange { start_line, end_line, text } => {
            let line_count = buf.line_count();
            if start_line > end_line || *end_line >= line_count {
                return Err(ExecutionError::InvalidRange {
                    start: *start_line,
                    end: *end_line,
                    line_count,
                });
            }
            let to = Position::new(*end_line, buf.line_len(*end_line));
            buf.replace_range(text, Position::new(*start_line, 0), to);
            Ok(format!("Replaced lines {}-{}", start_line, end_line))
        }
        EditOperation::FindReplace { find, replace, all } => find_replace(buf, find, replace, *all),
        EditOperation::UpdateSection { heading, text } => update_section(buf, heading, text),
        EditOperation::Append { text } => {
            append(buf, text);
            Ok("Appended text to note".to_string())
        }
        EditOperation::Prepend { text } => {
            prepend(buf, text);
            Ok("Prepended text to note".to_string())
        }
        EditOperation::ReplaceAll { text } => {
            let end = buf.end();
            buf.replace_range(text, Position::new(0, 0), end);
            Ok("Replaced entire note".to_string())
        }
        EditOperation::InsertAfterHeading { heading, text } => {
            let (line, _) = find_heading(buf, heading).ok_or_else(|| ExecutionError::HeadingNotFound(heading.clone()))?;
            let at = Position::new(line, buf.line_len(line));
            buf.replace_range(&format!("\n{text}"), at, at);
            Ok(format!("Inserted text after heading \"{}\"", heading))
        }
    }
}

fn find_replace<B: TextBuffer + ?Sized>(
    buf: &mut B,
    find: &str,
    replace: &str,
    all: bool,
) -> Result<String, ExecutionError> {
    let content = buf.content();
    let occurrences = content.matches(find).count();
    if occurrences == 0 {
        return Err(ExecutionError::TextNotFound(find.to_string()));
    }

    if all {
        let updated = content.replace(find, replace);
        let end = buf.end();
        buf.replace_range(&updated, Position::new(0, 0), end);
        return Ok(format!("Replaced {} occurrence(s)", occurrences));
    }

    // First textual occurrence, regardless of cursor position.
    let byte_idx = content.find(find).ok_or_else(|| ExecutionError::TextNotFound(find.to_string()))?;
    let start = content[..byte_idx].chars().count();
    let from = offset_to_position(&content, start);
    let to = offset_to_position(&content, start + find.chars().count());
    buf.replace_range(replace, from, to);
    Ok("Replaced 1 occurrence".to_string())
}

fn append<B: TextBuffer + ?Sized>(buf: &mut B, text: &str) {
    let end = buf.end();
    let last = buf.line(buf.last_line()).unwrap_or_default();
    let separator = if buf.line_count() == 1 && last.is_empty() {
        ""
    } else if last.trim().is_empty() {
        "\n"
    } else {
        "\n\n"
    };
    buf.replace_range(&format!("{separator}{text}"), end, end);
}

fn prepend<B: TextBuffer + ?Sized>(buf: &mut B, text: &str) {
    if let Some(close) = frontmatter_end(buf) {
        if close < buf.last_line() {
            let at = Position::new(close + 1, 0);
            buf.replace_range(&format!("{text}\n"), at, at);
        } else {
            let at = Position::new(close, buf.line_len(close));
            buf.replace_range(&format!("\n{text}"), at, at);
        }
        return;
    }

    let start = Position::new(0, 0);
    if buf.line_count() == 1 && buf.line_len(0) == 0 {
        buf.replace_range(text, start, start);
    } else {
        buf.replace_range(&format!("{text}\n"), start, start);
    }
}

/// Line index of the closing `---` fence of leading frontmatter.
fn frontmatter_end<B: TextBuffer + ?Sized>(buf: &B) -> Option<usize> {
    if buf.line(0)?.trim_end() != "---" {
        return None;
    }
    (1..buf.line_count()).find(|&n| buf.line(n).is_some_and(|l| l.trim_end() == "---"))
}

fn update_section<B: TextBuffer + ?Sized>(buf: &mut B, heading: &str, text: &str) -> Result<String, ExecutionError> {
    let (start, level) = find_heading(buf, heading).ok_or_else(|| ExecutionError::HeadingNotFound(heading.to_string()))?;
    let next_heading = headings(buf)
        .into_iter()
        .find(|&(line, lvl)| line > start && lvl <= level)
        .map(|(line, _)| line);
    let end = match next_heading {
        Some(line) => line - 1,
        None => buf.last_line(),
    };

    let heading_line = buf.line(start).unwrap_or_default();
    let mut replacement = format!("{heading_line}\n\n{text}");
    if next_heading.is_some() && !text.ends_with('\n') {
        replacement.push('\n');
    }

    let to = Position::new(end, buf.line_len(end));
    buf.replace_range(&replacement, Position::new(start, 0), to);
    Ok(format!("Updated section \"{}\" (lines {}-{})", heading, start, end))
}

/// Heading level of a markdown ATX heading line.
pub fn heading_level(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    match trimmed[level..].chars().next() {
        None => Some(level),
        Some(c) if c.is_whitespace() => Some(level),
        _ => None,
    }
}

/// Heading text reduced to its comparable form: no leading `#`, no
/// punctuation, lower-cased, trimmed.
pub fn normalize_heading(text: &str) -> String {
    text.trim()
        .trim_start_matches('#')
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect::<String>()
        .trim()
        .to_lowercase()
}

/// All heading lines outside fenced code blocks, with their levels.
fn headings<B: TextBuffer + ?Sized>(buf: &B) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    let mut in_fence = false;
    for n in 0..buf.line_count() {
        let Some(line) = buf.line(n) else { continue };
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(level) = heading_level(&line) {
            found.push((n, level));
        }
    }
    found
}

fn find_heading<B: TextBuffer + ?Sized>(buf: &B, heading: &str) -> Option<(usize, usize)> {
    let wanted = normalize_heading(heading);
    headings(buf).into_iter().find(|&(line, _)| {
        buf.line(line)
            .map(|l| normalize_heading(&l) == wanted)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MemoryBuffer;
    use crate::command::{EditAction, EditCommandParams};

    fn cmd(action: EditAction, params: EditCommandParams) -> EditCommand {
        EditCommand::new(action, params)
    }

    fn text(t: &str) -> EditCommandParams {
        EditCommandParams {
            text: Some(t.into()),
            ..Default::default()
        }
    }

    fn run(buf: &mut MemoryBuffer, command: EditCommand) -> ExecutionResult {
        execute_command(&command, Some(buf))
    }

    #[test]
    fn test_append_separator_after_non_empty_line() {
        let mut buf = MemoryBuffer::from_text("Line1");
        assert!(run(&mut buf, cmd(EditAction::Append, text("Done."))).success);
        assert_eq!(buf.content(), "Line1\n\nDone.");
    }

    #[test]
    fn test_append_separator_after_empty_line() {
        let mut buf = MemoryBuffer::from_text("Line1\n");
        run(&mut buf, cmd(EditAction::Append, text("Done.")));
        assert_eq!(buf.content(), "Line1\n\nDone.");
    }

    #[test]
    fn test_append_to_empty_document() {
        let mut buf = MemoryBuffer::default();
        run(&mut buf, cmd(EditAction::Append, text("First")));
        assert_eq!(buf.content(), "First");
    }

    #[test]
    fn test_prepend_skips_frontmatter() {
        let mut buf = MemoryBuffer::from_text("---\ntags: [a]\n---\nBody");
        run(&mut buf, cmd(EditAction::Prepend, text("Intro")));
        assert_eq!(buf.content(), "---\ntags: [a]\n---\nIntro\nBody");
    }

    #[test]
    fn test_prepend_without_frontmatter() {
        let mut buf = MemoryBuffer::from_text("Body");
        run(&mut buf, cmd(EditAction::Prepend, text("Intro")));
        assert_eq!(buf.content(), "Intro\nBody");
    }

    #[test]
    fn test_prepend_frontmatter_only_document() {
        let mut buf = MemoryBuffer::from_text("---\na: 1\n---");
        run(&mut buf, cmd(EditAction::Prepend, text("Intro")));
        assert_eq!(buf.content(), "---\na: 1\n---\nIntro");
    }

    #[test]
    fn test_replace_selection_requires_selection() {
        let mut buf = MemoryBuffer::from_text("hello world");
        let result = run(&mut buf, cmd(EditAction::ReplaceSelection, text("x")));
        assert!(!result.success);
        assert_eq!(result.message, "No text selected");

        let mut buf = MemoryBuffer::from_text("hello world").with_selection(Position::new(0, 6), Position::new(0, 11));
        assert!(run(&mut buf, cmd(EditAction::ReplaceSelection, text("there"))).success);
        assert_eq!(buf.content(), "hello there");
    }

    #[test]
    fn test_replace_selection_accepts_content_alias() {
        let params = EditCommandParams::from_json(serde_json::json!({"content": "there"}).as_object().unwrap());
        let mut buf = MemoryBuffer::from_text("hello world").with_selection(Position::new(0, 6), Position::new(0, 11));
        run(&mut buf, cmd(EditAction::ReplaceSelection, params));
        assert_eq!(buf.content(), "hello there");
    }

    #[test]
    fn test_insert_at_cursor() {
        let mut buf = MemoryBuffer::from_text("ab\ncd").with_cursor(Position::new(1, 1));
        run(&mut buf, cmd(EditAction::InsertAtCursor, text("X")));
        assert_eq!(buf.content(), "ab\ncXd");
    }

    #[test]
    fn test_replace_range_inclusive_lines() {
        let mut buf = MemoryBuffer::from_text("a\nb\nc\nd");
        let params = EditCommandParams {
            text: Some("B\nC".into()),
            start_line: Some(1),
            end_line: Some(2),
            ..Default::default()
        };
        assert!(run(&mut buf, cmd(EditAction::ReplaceRange, params)).success);
        assert_eq!(buf.content(), "a\nB\nC\nd");
    }

    #[test]
    fn test_replace_range_out_of_bounds() {
        let mut buf = MemoryBuffer::from_text("a\nb");
        let params = EditCommandParams {
            text: Some("x".into()),
            start_line: Some(1),
            end_line: Some(5),
            ..Default::default()
        };
        let result = run(&mut buf, cmd(EditAction::ReplaceRange, params));
        assert!(!result.success);
        assert_eq!(buf.content(), "a\nb");
    }

    #[test]
    fn test_find_replace_first_only() {
        let mut buf = MemoryBuffer::from_text("cat cat\ncat");
        let params = EditCommandParams {
            find: Some("cat".into()),
            replace: Some("dog".into()),
            ..Default::default()
        };
        let result = run(&mut buf, cmd(EditAction::FindReplace, params));
        assert!(result.success);
        assert_eq!(buf.content(), "dog cat\ncat");
    }

    #[test]
    fn test_find_replace_all_is_literal() {
        let mut buf = MemoryBuffer::from_text("a.b a.b axb");
        let params = EditCommandParams {
            find: Some("a.b".into()),
            replace: Some("$1".into()),
            all: Some(true),
            ..Default::default()
        };
        let result = run(&mut buf, cmd(EditAction::FindReplace, params));
        assert_eq!(result.message, "Replaced 2 occurrence(s)");
        assert_eq!(buf.content(), "$1 $1 axb");
    }

    #[test]
    fn test_find_replace_not_found() {
        let mut buf = MemoryBuffer::from_text("abc");
        let params = EditCommandParams {
            find: Some("zzz".into()),
            replace: Some("y".into()),
            ..Default::default()
        };
        let result = run(&mut buf, cmd(EditAction::FindReplace, params));
        assert!(!result.success);
        assert_eq!(result.message, "Text not found: \"zzz\"");
    }

    #[test]
    fn test_find_replace_first_is_not_idempotent_when_replacement_contains_find() {
        let mut buf = MemoryBuffer::from_text("a");
        let params = EditCommandParams {
            find: Some("a".into()),
            replace: Some("aa".into()),
            ..Default::default()
        };
        let command = cmd(EditAction::FindReplace, params);
        run(&mut buf, command.clone());
        run(&mut buf, command);
        assert_eq!(buf.content(), "aaa");
    }

    #[test]
    fn test_update_section_stops_at_same_level_heading() {
        let mut buf = MemoryBuffer::from_text("## A\nl1\nl2\nl3\n\n## B\nb1");
        let params = EditCommandParams {
            heading: Some("A".into()),
            text: Some("new".into()),
            ..Default::default()
        };
        assert!(run(&mut buf, cmd(EditAction::UpdateSection, params)).success);
        assert_eq!(buf.content(), "## A\n\nnew\n\n## B\nb1");
    }

    #[test]
    fn test_update_section_includes_deeper_subsections() {
        let mut buf = MemoryBuffer::from_text("# Top\n## A\nx\n### A.1\ny\n## B\nz");
        let params = EditCommandParams {
            heading: Some("## a".into()),
            text: Some("fresh".into()),
            ..Default::default()
        };
        run(&mut buf, cmd(EditAction::UpdateSection, params));
        assert_eq!(buf.content(), "# Top\n## A\n\nfresh\n\n## B\nz");
    }

    #[test]
    fn test_update_section_runs_to_end_of_document() {
        let mut buf = MemoryBuffer::from_text("# Notes\n## Todo\n- one\n- two");
        let params = EditCommandParams {
            heading: Some("todo".into()),
            text: Some("- three".into()),
            ..Default::default()
        };
        run(&mut buf, cmd(EditAction::UpdateSection, params));
        assert_eq!(buf.content(), "# Notes\n## Todo\n\n- three");
    }

    #[test]
    fn test_heading_match_ignores_case_and_punctuation() {
        let mut buf = MemoryBuffer::from_text("## Q&A: Open Items!\nold");
        let params = EditCommandParams {
            heading: Some("qa open items".into()),
            text: Some("added".into()),
            ..Default::default()
        };
        assert!(run(&mut buf, cmd(EditAction::InsertAfterHeading, params)).success);
        assert_eq!(buf.content(), "## Q&A: Open Items!\nadded\nold");
    }

    #[test]
    fn test_heading_inside_code_fence_is_ignored() {
        let mut buf = MemoryBuffer::from_text("```\n# Setup\n```\ntext");
        let params = EditCommandParams {
            heading: Some("Setup".into()),
            text: Some("x".into()),
            ..Default::default()
        };
        let result = run(&mut buf, cmd(EditAction::InsertAfterHeading, params));
        assert!(!result.success);
        assert_eq!(result.message, "Heading not found: \"Setup\"");
    }

    #[test]
    fn test_replace_all() {
        let mut buf = MemoryBuffer::from_text("old\ncontent");
        run(&mut buf, cmd(EditAction::ReplaceAll, text("new")));
        assert_eq!(buf.content(), "new");
    }

    #[test]
    fn test_no_active_editor() {
        let result = execute_command::<MemoryBuffer>(&cmd(EditAction::ReplaceAll, text("x")), None);
        assert!(!result.success);
        assert_eq!(result.message, "No active editor");
    }

    #[test]
    fn test_batch_halts_at_first_failure_without_rollback() {
        let mut buf = MemoryBuffer::from_text("Line1");
        let commands = vec![
            cmd(EditAction::Append, text("Two")),
            cmd(
                EditAction::FindReplace,
                EditCommandParams {
                    find: Some("missing".into()),
                    replace: Some("x".into()),
                    ..Default::default()
                },
            ),
            cmd(EditAction::Append, text("Three")),
        ];
        let report = execute_commands(&commands, Some(&mut buf), None);
        assert_eq!(report.results.len(), 2);
        assert!(report.results[0].success);
        assert!(!report.results[1].success);
        assert_eq!(report.state, BatchState::Halted { index: 1 });
        assert_eq!(report.failure().map(|r| r.command.action), Some(EditAction::FindReplace));
        assert_eq!(buf.content(), "Line1\n\nTwo");
    }

    #[test]
    fn test_batch_completes() {
        let mut buf = MemoryBuffer::from_text("x");
        let commands = vec![cmd(EditAction::Prepend, text("a")), cmd(EditAction::Append, text("b"))];
        let report = execute_commands(&commands, Some(&mut buf), None);
        assert!(report.is_complete());
        assert_eq!(report.applied(), 2);
        assert_eq!(buf.content(), "a\nx\n\nb");
    }

    #[test]
    fn test_cancelled_batch_stops_before_next_command() {
        let mut buf = MemoryBuffer::from_text("x");
        let token = CancellationToken::new();
        token.cancel();
        let commands = vec![cmd(EditAction::Append, text("a"))];
        let report = execute_commands(&commands, Some(&mut buf), Some(&token));
        assert!(report.results.is_empty());
        assert_eq!(report.state, BatchState::Cancelled { index: 0 });
        assert_eq!(buf.content(), "x");
    }

    #[test]
    fn test_heading_level() {
        assert_eq!(heading_level("## Title"), Some(2));
        assert_eq!(heading_level("#"), Some(1));
        assert_eq!(heading_level("#tag"), None);
        assert_eq!(heading_level("####### seven"), None);
        assert_eq!(heading_level("plain"), None);
    }
}
