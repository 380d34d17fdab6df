//! Unified error type for the transcoder.
//!
//! All crates funnel their failures into [`Error`]. The variants follow the
//! task lifecycle taxonomy: lookups that miss, transitions that are illegal
//! for the current status, storage and transport failures, and encoder
//! failures tagged by whether the hardware path is to blame.

use std::fmt;

/// Why an encoder run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeFailureKind {
    /// The hardware encoder failed; a software retry is worthwhile.
    Hardware,
    /// The process was killed because its task was aborted.
    Cancelled,
    /// Any other non-zero exit, spawn failure, or timeout.
    Other,
}

impl fmt::Display for EncodeFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeFailureKind::Hardware => f.write_str("hardware"),
            EncodeFailureKind::Cancelled => f.write_str("cancelled"),
            EncodeFailureKind::Other => f.write_str("other"),
        }
    }
}

/// Unified error type covering all failure modes in the transcoder.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "task").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The operation is not legal for the entity's current status.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Input data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A document store operation failed.
    #[error("Database error: {source}")]
    Database {
        /// The underlying database error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A broker or blob store call failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool returned an error outside of an encode run.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// The encoder process failed.
    #[error("Encode failure ({kind}): {message}")]
    Encode {
        /// Hardware, cancellation, or anything else.
        kind: EncodeFailureKind,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::InvalidState`].
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState(message.into())
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Transport`].
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport(message.into())
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Encode`].
    pub fn encode(kind: EncodeFailureKind, message: impl Into<String>) -> Self {
        Error::Encode {
            kind,
            message: message.into(),
        }
    }

    /// True for the `NotFound` variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Process exit code used by the CLI when this error ends a command.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NotFound { .. } => 2,
            Error::InvalidState(_) => 3,
            Error::Validation(_) => 4,
            Error::Database { .. } | Error::Transport(_) | Error::Io { .. } => 5,
            Error::Tool { .. } | Error::Encode { .. } => 6,
            Error::Internal(_) => 1,
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::not_found("task", "abc-123");
        assert_eq!(err.to_string(), "task not found: abc-123");
        assert!(err.is_not_found());
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn invalid_state_display() {
        let err = Error::invalid_state("cannot retry a task that is processing");
        assert_eq!(
            err.to_string(),
            "Invalid state: cannot retry a task that is processing"
        );
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn database_display() {
        let err = Error::database("disk I/O error");
        assert!(err.to_string().contains("disk I/O error"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn transport_display() {
        let err = Error::transport("receive failed");
        assert_eq!(err.to_string(), "Transport error: receive failed");
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn encode_display_carries_kind() {
        let err = Error::encode(EncodeFailureKind::Hardware, "nvenc init failed");
        assert_eq!(err.to_string(), "Encode failure (hardware): nvenc init failed");

        let err = Error::encode(EncodeFailureKind::Other, "exit status 1");
        assert_eq!(err.to_string(), "Encode failure (other): exit status 1");
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffmpeg", "exit code 1");
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: exit code 1");
        assert_eq!(err.exit_code(), 6);
    }
}
