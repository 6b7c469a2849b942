//! Connection-owning client for the code receiver.
//!
//! Every [`Client::send`] opens its own connection, performs one exchange and
//! closes the connection again, whatever the outcome. Nothing is shared between
//! calls, so a `Client` can be used from several threads at once.

use std::time::Duration;
use tracing::debug;

use crate::error::SendError;
use crate::protocol::{exchange, Request, Status};
use crate::socket::{BufferedSocket, TcpTransport};

/// Default port of the code receiver.
pub const DEFAULT_PORT: u16 = 2900;

/// Target listener plus optional deadlines.
#[derive(Debug, Clone)]
pub struct Client {
    host: String,
    port: u16,
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
}

impl Client {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: None,
            io_timeout: None,
        }
    }

    /// Give up connecting after `timeout`. `None` waits as long as the OS does.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Deadline for each blocking send and receive. `None` blocks indefinitely.
    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, for messages.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Deliver `request` and return the server's status.
    ///
    /// Refusals (`invalid-password` and friends) come back as `Ok(status)`.
    /// No retries: every failure is reported once.
    pub fn send(&self, request: &Request) -> Result<Status, SendError> {
        request.validate()?;

        let transport = TcpTransport::connect(&self.host, self.port, self.connect_timeout)
            .map_err(|source| SendError::Connect {
                addr: self.addr(),
                source,
            })?;

        let mut socket = BufferedSocket::new(transport);
        let result = self.configure(&socket).and_then(|()| exchange(&mut socket, request));
        socket.close();

        match &result {
            Ok(status) if status.is_ok() => {
                debug!(
                    addr = %self.addr(),
                    filename = %request.filename,
                    bytes = request.payload.len(),
                    "Code delivered"
                );
            }
            Ok(status) => {
                debug!(addr = %self.addr(), %status, "Request refused");
            }
            Err(e) => {
                debug!(addr = %self.addr(), error = %e, "Request failed");
            }
        }

        result
    }

    fn configure(&self, socket: &BufferedSocket<TcpTransport>) -> Result<(), SendError> {
        if let Some(transport) = socket.get_ref() {
            transport.set_io_timeout(self.io_timeout)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// What a stub listener saw of one request.
    #[derive(Debug)]
    struct Received {
        headers: Vec<String>,
        payload: Vec<u8>,
    }

    /// Accept one connection, read the header block and exactly
    /// `Content-length` payload bytes, then answer with `reply`.
    async fn stub_listener(reply: &'static [u8]) -> (u16, tokio::task::JoinHandle<Received>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut headers = Vec::new();
            let mut length = 0usize;

            loop {
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                let line = line.trim_end_matches('\n');
                if line.is_empty() {
                    break;
                }
                if let Some(value) = line.strip_prefix("Content-length: ") {
                    length = value.parse().unwrap();
                }
                headers.push(line.to_string());
            }

            let mut payload = vec![0u8; length];
            reader.read_exact(&mut payload).await.unwrap();
            reader.get_mut().write_all(reply).await.unwrap();

            Received { headers, payload }
        });

        (port, handle)
    }

    async fn send(client: Client, request: Request) -> Result<Status, SendError> {
        tokio::task::spawn_blocking(move || client.send(&request))
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_send_end_to_end() {
        let (port, listener) = stub_listener(b"status: ok\n").await;

        let request = Request::new(&b"print(1)"[..], "a.py", "Test");
        let status = send(Client::new("127.0.0.1", port), request).await.unwrap();
        assert_eq!(status, Status::Ok);

        let received = listener.await.unwrap();
        assert_eq!(
            received.headers,
            vec![
                "Content-length: 8",
                "Encoding: binary",
                "Filename: a.py",
                "Origin: Test",
            ]
        );
        assert_eq!(received.payload, b"print(1)");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_send_with_password_refused() {
        let (port, listener) = stub_listener(b"status: invalid-password\n").await;

        let request = Request::new(&b"x\ny\n"[..], "b.py", "Test").with_password(Some("alpine"));
        let client = Client::new("localhost", port)
            .with_connect_timeout(Some(Duration::from_secs(5)))
            .with_io_timeout(Some(Duration::from_secs(5)));
        let status = send(client, request).await.unwrap();
        assert_eq!(status, Status::InvalidPassword);

        let received = listener.await.unwrap();
        assert_eq!(
            received.headers.last().unwrap(),
            &format!("Password: {}", crate::protocol::password_digest("alpine"))
        );
        assert_eq!(received.payload, b"x\ny\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_send_listener_closes_without_status() {
        let (port, listener) = stub_listener(b"").await;

        let request = Request::new(&b"pass"[..], "c.py", "Test");
        let result = send(Client::new("127.0.0.1", port), request).await;
        assert!(matches!(result, Err(SendError::EmptyResponse)));
        listener.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_send_io_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept and hold the connection without ever answering.
        let holder = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
        });

        let client =
            Client::new("127.0.0.1", port).with_io_timeout(Some(Duration::from_millis(100)));
        let request = Request::new(&b"pass"[..], "d.py", "Test");
        match send(client, request).await {
            Err(SendError::Transport(e)) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("unexpected: {:?}", other),
        }

        // Our side closed the connection, which ends the holder's read.
        holder.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_send_timeout_while_writing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept but never read, so the kernel buffers fill up.
        let holder = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            stream
        });

        let client =
            Client::new("127.0.0.1", port).with_io_timeout(Some(Duration::from_millis(200)));
        let request = Request::new(vec![b'a'; 64 << 20], "big.py", "Test");
        match send(client, request).await {
            Err(SendError::Transport(e)) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("unexpected: {:?}", other),
        }

        drop(holder.await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_sends_use_separate_connections() {
        let (port_a, listener_a) = stub_listener(b"status: ok\n").await;
        let (port_b, listener_b) = stub_listener(b"status: invalid-request\n").await;

        let first = send(
            Client::new("127.0.0.1", port_a),
            Request::new(&b"print('a')"[..], "a.py", "Test"),
        );
        let second = send(
            Client::new("127.0.0.1", port_b),
            Request::new(&b"print('bb')"[..], "b.py", "Test"),
        );
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap(), Status::Ok);
        assert_eq!(second.unwrap(), Status::InvalidRequest);

        let received_a = listener_a.await.unwrap();
        let received_b = listener_b.await.unwrap();
        assert_eq!(received_a.headers[2], "Filename: a.py");
        assert_eq!(received_a.payload, b"print('a')");
        assert_eq!(received_b.headers[2], "Filename: b.py");
        assert_eq!(received_b.payload, b"print('bb')");
    }

    #[test]
    fn test_connection_refused() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let request = Request::new(&b"print(1)"[..], "a.py", "Test");
        match Client::new("127.0.0.1", port).send(&request) {
            Err(SendError::Connect { addr, .. }) => assert_eq!(addr, format!("127.0.0.1:{}", port)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_header_checked_before_connect() {
        // Nothing listens on port 1; validation must fail first.
        let request = Request::new(&b""[..], "a.py", "Multi\nLine");
        assert!(matches!(
            Client::new("127.0.0.1", 1).send(&request),
            Err(SendError::InvalidHeader { name: "Origin", .. })
        ));
    }

    #[test]
    fn test_client_accessors() {
        let client = Client::new("localhost", DEFAULT_PORT);
        assert_eq!(client.host(), "localhost");
        assert_eq!(client.port(), 2900);
        assert_eq!(client.addr(), "localhost:2900");
    }
}
