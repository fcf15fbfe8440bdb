use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::Colorize;
use notewright_edit::{BatchState, MemoryBuffer, TextBuffer};
use notewright_llm::{LlmError, LogTelemetrySink, MemoryTelemetrySink, TelemetrySink};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::assistant::{AssistantTurn, NoteAssistant};
use crate::config::NotewrightConfig;

use super::commands::build_manager;

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Markdown note to work on. Created on write if it does not exist.
    #[arg(long)]
    pub note: PathBuf,

    /// Message to send. Read from stdin when omitted.
    #[arg(short, long)]
    pub message: Option<String>,

    /// Apply edits in memory only and print the result instead of writing the note
    #[arg(long)]
    pub dry_run: bool,

    /// Do not teach or apply the edit protocol
    #[arg(long)]
    pub no_edits: bool,

    /// Print call timing and token usage after the reply
    #[arg(long)]
    pub stats: bool,
}

fn read_message(args: &ChatArgs) -> Result<String> {
    let message = match &args.message {
        Some(message) => message.clone(),
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read message from stdin")?;
            input
        }
    };
    let message = message.trim().to_string();
    if message.is_empty() {
        return Err(anyhow!("No message given. Pass --message or pipe text on stdin."));
    }
    Ok(message)
}

fn load_note(path: &Path) -> Result<MemoryBuffer> {
    let text = if path.exists() {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read note: {}", path.display()))?
    } else {
        log::info!("Note '{}' does not exist yet; starting empty", path.display());
        String::new()
    };
    let buffer = MemoryBuffer::from_text(&text);
    let end = buffer.end();
    Ok(buffer.with_cursor(end))
}

/// Cancels `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
}

pub async fn handle_chat(args: &ChatArgs, config: &NotewrightConfig) -> Result<()> {
    let message = read_message(args)?;
    let mut buffer = load_note(&args.note)?;
    let original = buffer.content();
    let title = args
        .note
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned());

    let stats = Arc::new(MemoryTelemetrySink::new());
    let telemetry: Arc<dyn TelemetrySink> = if args.stats {
        stats.clone()
    } else {
        Arc::new(LogTelemetrySink)
    };
    let manager = Arc::new(build_manager(config, telemetry));
    if !manager.is_configured() {
        let kind = manager.active_kind();
        return Err(anyhow!(LlmError::not_configured(kind).user_message()));
    }

    let edit_enabled = config.edit.enabled && !args.no_edits;
    let assistant = NoteAssistant::new(manager, config.context.clone(), edit_enabled);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mut printer = ReplyPrinter::new(std::io::stdout(), !edit_enabled);
    let result = assistant
        .respond(&[], &message, Some(&mut buffer), title, Some(cancel), |delta| printer.delta(delta))
        .await;

    let turn = match result {
        Ok(turn) => turn,
        Err(e) => {
            printer.interrupted()?;
            if e.is_cancellation() {
                println!("{}", "Cancelled.".yellow());
                return Ok(());
            }
            return Err(anyhow!(e.user_message()));
        }
    };
    printer.finish(&turn)?;

    print_report(&turn);
    if args.stats {
        print_stats(&stats, &turn);
    }

    let updated = buffer.content();
    if updated == original {
        return Ok(());
    }
    if args.dry_run {
        println!("{}", "--- dry run: resulting note ---".dimmed());
        println!("{}", updated);
    } else {
        std::fs::write(&args.note, &updated)
            .with_context(|| format!("Failed to write note: {}", args.note.display()))?;
        println!("{} {}", "Saved".green(), args.note.display());
    }
    Ok(())
}

/// Writes the reply. Raw deltas are streamed only when edits are off; with
/// edits on they carry command blocks, so the command-free display text is
/// written once the reply is complete.
struct ReplyPrinter<W: Write> {
    out: W,
    stream_deltas: bool,
}

impl<W: Write> ReplyPrinter<W> {
    fn new(out: W, stream_deltas: bool) -> Self {
        Self { out, stream_deltas }
    }

    fn delta(&mut self, text: &str) {
        if self.stream_deltas {
            let _ = write!(self.out, "{}", text);
            let _ = self.out.flush();
        }
    }

    fn finish(&mut self, turn: &AssistantTurn) -> std::io::Result<()> {
        if self.stream_deltas {
            writeln!(self.out)?;
        } else if !turn.display_text.is_empty() {
            writeln!(self.out, "{}", turn.display_text)?;
        }
        self.out.flush()
    }

    /// Ends a partially streamed line.
    fn interrupted(&mut self) -> std::io::Result<()> {
        if self.stream_deltas {
            writeln!(self.out)?;
        }
        self.out.flush()
    }
}

fn print_report(turn: &AssistantTurn) {
    let Some(report) = &turn.report else {
        return;
    };
    println!();
    for result in &report.results {
        let mark = if result.success { "✓".green() } else { "✗".red() };
        println!("{} {}: {}", mark, result.command.describe(), result.message);
    }
    match report.state {
        BatchState::Completed => {}
        BatchState::Halted { index } => {
            let skipped = count_commands(turn).saturating_sub(index + 1);
            if skipped > 0 {
                println!("{}", format!("{} later command(s) not attempted", skipped).yellow());
            }
        }
        BatchState::Cancelled { index } => {
            println!("{}", format!("Cancelled before command {}", index + 1).yellow());
        }
    }
}

fn count_commands(turn: &AssistantTurn) -> usize {
    notewright_edit::parse_commands(&turn.reply).len()
}

fn print_stats(stats: &MemoryTelemetrySink, turn: &AssistantTurn) {
    println!();
    for record in stats.records() {
        println!(
            "{} {} {}ms {}",
            record.provider.id().cyan(),
            record.model_id,
            record.elapsed_ms,
            if record.success { "ok".green() } else { "failed".red() }
        );
    }
    println!("usage: {}", turn.usage);
}

#[cfg(test)]
mod tests {
    use super::*;
    use notewright_edit::parse_reply;
    use notewright_llm::NormalizedUsage;

    const DELTAS: [&str; 3] = [
        "Sure!\n<<<EDIT_",
        "START>>>\n{\"action\":\"append\",\"params\":{\"text\":\"Done.\"}}\n",
        "<<<EDIT_END>>>",
    ];

    fn turn_for(deltas: &[&str]) -> AssistantTurn {
        let reply = deltas.concat();
        AssistantTurn {
            display_text: parse_reply(&reply).display_text,
            reply,
            usage: NormalizedUsage::default(),
            report: None,
        }
    }

    fn render(stream_deltas: bool) -> String {
        let mut printer = ReplyPrinter::new(Vec::new(), stream_deltas);
        for delta in DELTAS {
            printer.delta(delta);
        }
        printer.finish(&turn_for(&DELTAS)).unwrap();
        String::from_utf8(printer.out).unwrap()
    }

    #[test]
    fn test_edit_mode_prints_display_text_only() {
        let output = render(false);
        assert_eq!(output, "Sure!\n");
        assert!(!output.contains("EDIT_START"));
        assert!(!output.contains("\"action\""));
    }

    #[test]
    fn test_raw_mode_streams_every_delta() {
        assert_eq!(render(true), format!("{}\n", DELTAS.concat()));
    }

    #[test]
    fn test_interrupted_edit_mode_writes_nothing() {
        let mut printer = ReplyPrinter::new(Vec::new(), false);
        printer.delta(DELTAS[0]);
        printer.interrupted().unwrap();
        assert!(printer.out.is_empty());
    }

    #[test]
    fn test_load_note_places_cursor_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("todo.md");
        std::fs::write(&path, "one\ntwo").unwrap();

        let buffer = load_note(&path).unwrap();
        assert_eq!(buffer.cursor(), buffer.end());
        assert_eq!(buffer.content(), "one\ntwo");
        assert_eq!(load_note(&dir.path().join("missing.md")).unwrap().content(), "");
    }
}
