//! Error types for sending code to a remote listener.
//!
//! A status token other than `ok` is not an error here: the server answered
//! and the caller decides how to present it (see [`crate::protocol::Status`]).
//! Everything in [`SendError`] means no usable answer was obtained.

use std::io;

/// Failures of a single send request.
#[derive(Debug)]
pub enum SendError {
    /// Could not connect to the listener (refused, unreachable, timed out).
    /// Nothing was written.
    Connect { addr: String, source: io::Error },

    /// A send or receive failed after the connection was established.
    Transport(io::Error),

    /// The stream closed, or an empty line arrived, before a status line.
    EmptyResponse,

    /// A response line arrived but carried no status token.
    MalformedResponse(String),

    /// A header value contains a line break and would corrupt the header block.
    InvalidHeader { name: &'static str, value: String },
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Connect { addr, source } => {
                write!(f, "Could not connect to {}: {}", addr, source)
            }
            SendError::Transport(e) => write!(f, "Connection error: {}", e),
            SendError::EmptyResponse => {
                write!(f, "Connection closed before a status line was received")
            }
            SendError::MalformedResponse(line) => {
                write!(f, "Malformed response line: {:?}", line)
            }
            SendError::InvalidHeader { name, value } => {
                write!(f, "Invalid {} header value: {:?}", name, value)
            }
        }
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SendError::Connect { source, .. } => Some(source),
            SendError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SendError {
    fn from(e: io::Error) -> Self {
        SendError::Transport(e)
    }
}
