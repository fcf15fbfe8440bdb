use thiserror::Error;

/// Why a parsed JSON candidate was not accepted as an edit command.
/// These are never shown to the user.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SkipReason {
    #[error("candidate is not valid JSON after repair: {0}")]
    InvalidJson(String),

    #[error("candidate is not a JSON object")]
    NotAnObject,

    #[error("missing or non-string action")]
    MissingAction,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("missing or non-object params")]
    MissingParams,
}

/// A structurally valid command that could not be applied.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("No active editor")]
    NoActiveEditor,

    #[error("No text selected")]
    NoSelection,

    #[error("Missing required parameter: {0}")]
    MissingParam(&'static str),

    #[error("Line range {start}-{end} is outside the document ({line_count} lines)")]
    InvalidRange {
        start: usize,
        end: usize,
        line_count: usize,
    },

    #[error("Text not found: \"{0}\"")]
    TextNotFound(String),

    #[error("Heading not found: \"{0}\"")]
    HeadingNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_messages() {
        assert_eq!(ExecutionError::NoSelection.to_string(), "No text selected");
        assert_eq!(
            ExecutionError::HeadingNotFound("Intro".into()).to_string(),
            "Heading not found: \"Intro\""
        );
        assert_eq!(
            ExecutionError::InvalidRange { start: 4, end: 9, line_count: 5 }.to_string(),
            "Line range 4-9 is outside the document (5 lines)"
        );
    }
}
