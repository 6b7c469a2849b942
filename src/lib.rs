//! send-code: deliver source code to a remote code executor.
//!
//! The receiving side (for example a code receiver plugin inside a host
//! application) listens on TCP and speaks a small line-oriented protocol:
//! a block of `Key: value` headers, a blank line, the raw payload framed by
//! its `Content-length`, and a single `<prefix>: <status>` line in reply.
//!
//! Modules:
//! - `socket`: buffered socket with byte-exact and line reads
//! - `protocol`: request encoding and status parsing
//! - `client`: one connection per request, closed on every exit path
//! - `source`: reads the payload from disk
//! - `config`: CLI arguments and TOML configuration

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod socket;
pub mod source;

pub use client::Client;
pub use error::SendError;
pub use protocol::{password_digest, Request, Status};
pub use socket::{BufferedSocket, TcpTransport, Transport};
pub use source::SourceFile;
