//! Buffered socket with byte-exact and line-oriented reads.
//!
//! A TCP stream gives no guarantee about where one receive ends and the next
//! begins, so a status line may arrive split over several receives, or share
//! a receive with bytes that belong to the next read. [`BufferedSocket`] keeps
//! every byte it pulled from the stream but has not yet handed out in a
//! private read buffer and serves later reads from it first.
//!
//! ## Line reads
//!
//! `read_line` mixes two kinds of reads:
//! - a non-blocking drain of up to [`READ_CHUNK`] bytes of whatever is
//!   already available, and
//! - when that holds no newline, a single blocking one-byte read, so the
//!   caller sleeps in the kernel instead of spinning while the peer is slow.
//!
//! The loop ends at the first newline or when the peer closes the stream.
//! Bytes after the newline go back to the front of the buffer.

use bytes::{Bytes, BytesMut};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, trace};

/// Maximum number of bytes drained per non-blocking read in `read_line`.
pub const READ_CHUNK: usize = 1024;

/// Longest line `read_line` accepts, terminator included.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// A raw byte stream under a [`BufferedSocket`].
pub trait Transport {
    /// Perform exactly one receive into `buf`.
    ///
    /// With `blocking == false` an empty stream yields
    /// `io::ErrorKind::WouldBlock`. `Ok(0)` means the peer closed the stream.
    fn recv(&mut self, buf: &mut [u8], blocking: bool) -> io::Result<usize>;

    /// Perform exactly one send. May accept fewer bytes than offered.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Release the stream.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// TCP transport that switches the socket between blocking and
/// non-blocking mode per receive.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    /// Mode the socket is currently in, to skip redundant mode switches.
    nonblocking: bool,
}

impl TcpTransport {
    /// Connect to `host:port`, trying every resolved address in turn.
    pub fn connect(host: &str, port: u16, timeout: Option<Duration>) -> io::Result<Self> {
        let mut last_err = None;

        for addr in (host, port).to_socket_addrs()? {
            match connect_addr(addr, timeout) {
                Ok(stream) => {
                    debug!(peer = %addr, "Connected");
                    return Ok(Self::from_stream(stream));
                }
                Err(e) => {
                    debug!(peer = %addr, error = %e, "Connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
        }))
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            nonblocking: false,
        }
    }

    /// Deadline applied to every blocking send and receive.
    ///
    /// The protocol defines no timeout of its own; without one a silent peer
    /// blocks `read_line` forever.
    pub fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)
    }

    fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        if self.nonblocking == blocking {
            self.stream.set_nonblocking(!blocking)?;
            self.nonblocking = !blocking;
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn recv(&mut self, buf: &mut [u8], blocking: bool) -> io::Result<usize> {
        self.set_blocking(blocking)?;
        self.stream.read(buf)
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.set_blocking(true)?;
        self.stream.write(data)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            // The peer may already have torn the connection down.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

fn connect_addr(addr: SocketAddr, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    let addr = SockAddr::from(addr);

    match timeout {
        Some(timeout) => socket.connect_timeout(&addr, timeout)?,
        None => socket.connect(&addr)?,
    }
    socket.set_nodelay(true)?;

    Ok(socket.into())
}

/// A transport with a private read buffer.
///
/// Owned by exactly one request; the transport is closed on [`close`] or
/// when the socket is dropped.
///
/// [`close`]: BufferedSocket::close
pub struct BufferedSocket<T: Transport> {
    transport: Option<T>,
    /// Bytes received but not yet handed out, oldest first.
    buffer: BytesMut,
}

impl<T: Transport> BufferedSocket<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Some(transport),
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Read up to `length` bytes.
    ///
    /// Serves buffered bytes first. If those fall short, performs exactly one
    /// receive for the remainder: non-blocking when `blocking` is false (an
    /// empty stream yields fewer bytes, never an error), blocking otherwise
    /// (zero extra bytes then means the peer closed the stream).
    ///
    /// A blocking receive that runs into the I/O timeout fails with
    /// `io::ErrorKind::TimedOut`.
    pub fn read(&mut self, length: usize, blocking: bool) -> io::Result<Bytes> {
        let buffered = length.min(self.buffer.len());
        let mut data = BytesMut::with_capacity(length);
        data.extend_from_slice(&self.buffer.split_to(buffered));

        if buffered < length {
            data.resize(length, 0);
            let n = self.recv(&mut data[buffered..], blocking)?;
            data.truncate(buffered + n);
        }

        Ok(data.freeze())
    }

    /// Read one line including its `\n` terminator.
    ///
    /// Returns a line without terminator if the peer closes mid-line, and an
    /// empty result once the stream is exhausted. A line longer than
    /// [`MAX_LINE_LENGTH`] fails the read with `io::ErrorKind::InvalidData`.
    pub fn read_line(&mut self) -> io::Result<Bytes> {
        let mut line = BytesMut::new();

        loop {
            let chunk = self.read(READ_CHUNK.min(MAX_LINE_LENGTH - line.len()), false)?;

            if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&chunk[..=pos]);
                self.unread(&chunk[pos + 1..]);
                break;
            }
            line.extend_from_slice(&chunk);

            if line.len() >= MAX_LINE_LENGTH {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "line exceeds maximum length",
                ));
            }

            // Nothing more available yet: sleep on a single byte.
            let byte = self.read(1, true)?;
            match byte.first() {
                None => {
                    trace!(len = line.len(), "Peer closed the stream");
                    break;
                }
                Some(&b) => {
                    line.extend_from_slice(&byte);
                    if b == b'\n' {
                        break;
                    }
                }
            }
        }

        Ok(line.freeze())
    }

    /// Pass `data` to a single send call. No write buffering.
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.transport_mut()?.send(data)
    }

    /// Send all of `data`, issuing as many sends as it takes.
    pub fn write_all(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            match self.write(data) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "connection accepted no more data",
                    ))
                }
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if is_timeout(&e) => return Err(timed_out("timed out sending data")),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Shut down and release the transport. Further calls are no-ops.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.shutdown() {
                debug!(error = %e, "Error closing connection");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Number of bytes waiting in the read buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// The underlying transport, unless closed.
    pub fn get_ref(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    fn transport_mut(&mut self) -> io::Result<&mut T> {
        self.transport
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is closed"))
    }

    fn recv(&mut self, buf: &mut [u8], blocking: bool) -> io::Result<usize> {
        let transport = self.transport_mut()?;
        loop {
            match transport.recv(buf, blocking) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && !blocking => return Ok(0),
                Err(e) if is_timeout(&e) => return Err(timed_out("timed out waiting for data")),
                Err(e) => return Err(e),
            }
        }
    }

    /// Put bytes back in front of everything still buffered.
    fn unread(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if self.buffer.is_empty() {
            self.buffer.extend_from_slice(data);
        } else {
            let mut restored = BytesMut::with_capacity(data.len() + self.buffer.len());
            restored.extend_from_slice(data);
            restored.extend_from_slice(&self.buffer);
            self.buffer = restored;
        }
    }
}

/// An expired socket deadline surfaces as WouldBlock on Unix, TimedOut on
/// Windows. Only meaningful for operations issued in blocking mode.
fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn timed_out(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, msg)
}

impl<T: Transport> Drop for BufferedSocket<T> {
    fn drop(&mut self) {
        self.close();
    }
}
