//! Error types for the agent session and its wire codec.

use std::io;

/// A line from the agent that could not be turned into a [`Response`].
///
/// [`Response`]: crate::protocol::Response
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed response ({reason}): {line}")]
    Malformed { line: String, reason: String },

    #[error("unexpected response type `{kind}`: {line}")]
    UnexpectedVariant { kind: String, line: String },
}

impl DecodeError {
    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        DecodeError::Malformed {
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    /// What went wrong, without the offending line.
    pub fn reason(&self) -> String {
        match self {
            DecodeError::Malformed { reason, .. } => format!("malformed response ({reason})"),
            DecodeError::UnexpectedVariant { kind, .. } => {
                format!("unexpected response type `{kind}`")
            }
        }
    }

    /// The offending raw line, kept for diagnosis.
    pub fn line(&self) -> &str {
        match self {
            DecodeError::Malformed { line, .. } | DecodeError::UnexpectedVariant { line, .. } => {
                line
            }
        }
    }
}

/// Failures that prevent a session from being established or kept alive.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to start parallel ssh agent `{program}`: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("parallel ssh agent has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("parallel ssh agent init failed: agent produced no output")]
    NoOutput,

    #[error("parallel ssh agent init failed: unexpected handshake: {line}")]
    UnexpectedHandshake { line: String },

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("agent i/o failed: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    /// True for errors raised before the request could be sent.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            SessionError::Spawn { .. }
                | SessionError::MissingPipe(_)
                | SessionError::NoOutput
                | SessionError::UnexpectedHandshake { .. }
        )
    }
}
