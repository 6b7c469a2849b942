//! Code receiver wire protocol: request encoder and status parser.
//!
//! One request per connection:
//!
//! ```text
//! Request:  Content-length: <payload bytes>\n
//!           Encoding: <name>\n
//!           Filename: <name>\n
//!           Origin: <name>\n
//!           [Password: <32 hex digits>\n]
//!           \n
//!           <payload, exactly Content-length bytes>
//!
//! Response: <anything>: <status>\n
//! ```
//!
//! The payload is framed by its length, not a terminator, so it may contain
//! newlines freely. Header values may not.

use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};
use std::fmt;
use tracing::trace;

use crate::error::SendError;
use crate::socket::{BufferedSocket, Transport};

/// Encoding declared when the caller names none. The server sniffs the
/// source for a coding declaration itself.
pub const DEFAULT_ENCODING: &str = "binary";

/// Hex MD5 digest of a password, as sent in the `Password` header.
///
/// This is unsalted MD5 of a shared secret over a plaintext connection. It
/// only exists for compatibility with existing servers and protects nothing.
pub fn password_digest(password: &str) -> String {
    format!("{:x}", Md5::digest(password.as_bytes()))
}

/// A source payload plus the metadata sent ahead of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub payload: Bytes,
    pub encoding: String,
    pub filename: String,
    pub origin: String,
    pub password: Option<String>,
}

impl Request {
    pub fn new(
        payload: impl Into<Bytes>,
        filename: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            payload: payload.into(),
            encoding: DEFAULT_ENCODING.to_string(),
            filename: filename.into(),
            origin: origin.into(),
            password: None,
        }
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    /// An empty password is the same as none: no `Password` header is sent.
    pub fn with_password(mut self, password: Option<impl Into<String>>) -> Self {
        self.password = password.map(Into::into);
        self
    }

    fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    /// Reject header values that would break the header block.
    pub fn validate(&self) -> Result<(), SendError> {
        let headers = [
            ("Encoding", &self.encoding),
            ("Filename", &self.filename),
            ("Origin", &self.origin),
        ];
        for (name, value) in headers {
            if value.contains(&['\r', '\n'][..]) {
                return Err(SendError::InvalidHeader {
                    name,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    /// Append the header block, including the blank line that ends it.
    pub fn encode_headers(&self, out: &mut BytesMut) {
        let mut push = |name: &str, value: &str| {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\n");
        };

        push("Content-length", &self.payload.len().to_string());
        push("Encoding", &self.encoding);
        push("Filename", &self.filename);
        push("Origin", &self.origin);
        if let Some(password) = self.password() {
            push("Password", &password_digest(password));
        }
        out.extend_from_slice(b"\n");
    }

    /// The complete request as sent on the wire.
    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(128 + self.payload.len());
        self.encode_headers(&mut out);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Outcome reported by the server.
///
/// Anything but [`Status::Ok`] is a refusal the caller presents to the user;
/// it is not a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    InvalidPassword,
    InvalidRequest,
    /// A token this client does not know, kept verbatim.
    Unknown(String),
}

impl Status {
    /// Parse a response line: take what follows the first colon, trimmed.
    pub fn parse(line: &[u8]) -> Result<Status, SendError> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return Err(SendError::EmptyResponse);
        }

        let text = std::str::from_utf8(line)
            .ok()
            .filter(|s| s.is_ascii())
            .ok_or_else(|| {
                SendError::MalformedResponse(String::from_utf8_lossy(line).into_owned())
            })?;

        let token = match text.split_once(':') {
            Some((_, status)) => status.trim(),
            None => "",
        };

        Ok(match token {
            "" => return Err(SendError::MalformedResponse(text.trim_end().to_string())),
            "ok" => Status::Ok,
            "invalid-password" => Status::InvalidPassword,
            "invalid-request" => Status::InvalidRequest,
            other => Status::Unknown(other.to_string()),
        })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Status::Ok => "ok",
            Status::InvalidPassword => "invalid-password",
            Status::InvalidRequest => "invalid-request",
            Status::Unknown(token) => token,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Send `request` over an open socket and read the server's status line.
///
/// Leaves the socket open; the owner closes it.
pub fn exchange<T: Transport>(
    socket: &mut BufferedSocket<T>,
    request: &Request,
) -> Result<Status, SendError> {
    let mut headers = BytesMut::with_capacity(128);
    request.encode_headers(&mut headers);
    socket.write_all(&headers)?;
    socket.write_all(&request.payload)?;
    trace!(
        header_bytes = headers.len(),
        payload_bytes = request.payload.len(),
        "Request written"
    );

    let line = socket.read_line()?;
    trace!(line = %String::from_utf8_lossy(&line).trim_end(), "Response received");

    Status::parse(&line)
}
