//! Deadline-bounded duplex TCP I/O.
//!
//! Every read and write carries the connection's current per-operation
//! deadline. Any failure closes the connection; a connection that errored is
//! never returned to a pool because the wire may hold a partial frame.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::errors::{ClientError, Result};
use crate::net::host::Host;

/// One framed TCP connection to a node.
///
/// Not shared between tasks: a connection is either pooled or checked out by
/// exactly one command (or the tender).
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    /// Per-operation deadline. Zero disables the deadline.
    timeout: Duration,
    last_used: Instant,
    closed: bool,
}

impl Connection {
    /// Dials `host` within `connect_timeout`.
    ///
    /// # Errors
    ///
    /// Fails with [`ClientError::ConnectionFailed`] when the dial errors or
    /// does not complete in time.
    pub async fn connect(host: &Host, connect_timeout: Duration) -> Result<Self> {
        let dial = TcpStream::connect((host.name.as_str(), host.port));
        let stream = match tokio::time::timeout(connect_timeout, dial).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return Err(ClientError::ConnectionFailed {
                    addr: host.to_string(),
                    reason: err.to_string(),
                })
            }
            Err(_) => {
                return Err(ClientError::ConnectionFailed {
                    addr: host.to_string(),
                    reason: format!("dial timed out after {connect_timeout:?}"),
                })
            }
        };
        Ok(Self {
            stream,
            timeout: connect_timeout,
            last_used: Instant::now(),
            closed: false,
        })
    }

    /// Sets the deadline applied to each subsequent read/write. Zero
    /// disables the deadline.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Reads exactly `buf.len()` bytes within the deadline.
    ///
    /// # Errors
    ///
    /// [`ClientError::ReadTimeout`] on a missed deadline, [`ClientError::Io`]
    /// on a socket error. The connection is closed on either.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let result = if self.timeout.is_zero() {
            self.stream.read_exact(buf).await.map(|_| ())
        } else {
            match tokio::time::timeout(self.timeout, self.stream.read_exact(buf)).await {
                Ok(inner) => inner.map(|_| ()),
                Err(_) => {
                    let after = self.timeout;
                    self.close().await;
                    return Err(ClientError::ReadTimeout(after));
                }
            }
        };
        match result {
            Ok(()) => {
                self.last_used = Instant::now();
                Ok(())
            }
            Err(err) => {
                self.close().await;
                Err(ClientError::Io(err))
            }
        }
    }

    /// Writes the whole buffer within the deadline.
    ///
    /// # Errors
    ///
    /// [`ClientError::WriteTimeout`] on a missed deadline,
    /// [`ClientError::Io`] on a socket error. The connection is closed on
    /// either.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let result = if self.timeout.is_zero() {
            self.stream.write_all(buf).await
        } else {
            match tokio::time::timeout(self.timeout, self.stream.write_all(buf)).await {
                Ok(inner) => inner,
                Err(_) => {
                    let after = self.timeout;
                    self.close().await;
                    return Err(ClientError::WriteTimeout(after));
                }
            }
        };
        match result {
            Ok(()) => {
                self.last_used = Instant::now();
                Ok(())
            }
            Err(err) => {
                self.close().await;
                Err(ClientError::Io(err))
            }
        }
    }

    /// Shuts the stream down. Idempotent; the socket is also released when
    /// the connection is dropped.
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.stream.shutdown().await;
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Instant of the last successful read or write.
    #[must_use]
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Whether the connection has been idle for longer than `window`.
    #[must_use]
    pub fn idle_longer_than(&self, window: Duration) -> bool {
        self.last_used.elapsed() > window
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    async fn listener() -> (TcpListener, Host) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, Host::new("127.0.0.1", port))
    }

    #[tokio::test]
    async fn connect_and_round_trip() {
        let (listener, host) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let mut conn = Connection::connect(&host, Duration::from_secs(1))
            .await
            .unwrap();
        conn.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        conn.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ping");
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn connect_refused_is_connection_failed() {
        let (listener, host) = listener().await;
        drop(listener);

        let err = Connection::connect(&host, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConnectionFailed { .. }));
    }

    #[tokio::test]
    async fn read_deadline_closes_connection() {
        let (listener, host) = listener().await;
        // Accept but never write.
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut conn = Connection::connect(&host, Duration::from_secs(1))
            .await
            .unwrap();
        conn.set_timeout(Duration::from_millis(50));
        let mut buf = [0u8; 1];
        let err = conn.read_exact(&mut buf).await.unwrap_err();
        assert!(matches!(err, ClientError::ReadTimeout(_)));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn zero_timeout_disables_deadline() {
        let (listener, host) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            sock.write_all(b"x").await.unwrap();
        });

        let mut conn = Connection::connect(&host, Duration::from_secs(1))
            .await
            .unwrap();
        conn.set_timeout(Duration::ZERO);
        let mut buf = [0u8; 1];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"x");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (listener, host) = listener().await;
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let mut conn = Connection::connect(&host, Duration::from_secs(1))
            .await
            .unwrap();
        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());
    }
}
