//! Edit-command protocol for LLM-authored note edits.
//!
//! Replies carry JSON commands between `<<<EDIT_START>>>` / `<<<EDIT_END>>>`
//! markers. This crate repairs the usual model damage, extracts and validates
//! the commands, and runs them against any [`TextBuffer`].

/// Line-addressable document abstraction
pub mod buffer;

/// Command data model
pub mod command;

/// Error types
pub mod error;

/// Batch and single-command execution
pub mod executor;

/// Marker repair, extraction and formatting
pub mod protocol;

pub use buffer::{MemoryBuffer, Position, Selection, TextBuffer};
pub use command::{EditAction, EditCommand, EditCommandParams, EditOperation, ExecutionResult, RawCommand};
pub use error::{ExecutionError, SkipReason};
pub use executor::{execute_command, execute_commands, BatchReport, BatchState};
pub use protocol::{
    format_command, parse_commands, parse_reply, strip_commands, validate_structure, ParsedReply, EDIT_END, EDIT_START,
};
