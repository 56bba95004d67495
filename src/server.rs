//! TCP server for handling ident connections.
//!
//! Each accepted connection gets exactly one request/response cycle: a
//! reader task reads and classifies one line while the handler waits for
//! its result or the query timeout, whichever comes first.

use crate::config::Config;
use crate::protocol::{Response, MAX_LINE_LENGTH};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, error, info, trace, warn};

/// Listen backlog for the server socket
const LISTEN_BACKLOG: i32 = 1024;

/// Settings shared by every connection handler
#[derive(Debug, Clone)]
pub struct Session {
    /// Identity returned in USERID replies, empty for NO-USER
    pub identity: Arc<str>,
    /// Bound on the wait for a query, measured from handler start
    pub timeout: Duration,
    /// Terminate ERROR replies with CRLF
    pub crlf_all: bool,
}

impl Session {
    pub fn from_config(config: &Config) -> Self {
        Session {
            identity: Arc::from(config.identity.as_str()),
            timeout: config.timeout,
            crlf_all: config.crlf_all,
        }
    }
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    session: Session,
    connection_limit: Option<Arc<Semaphore>>,
}

impl Server {
    /// Bind the listening socket. Failure here is fatal to the process.
    pub async fn bind(config: &Config) -> io::Result<Self> {
        let listener = create_listener(config.listen)?;
        let listener = TcpListener::from_std(listener)?;

        Ok(Server {
            listener,
            session: Session::from_config(config),
            connection_limit: config
                .max_connections
                .map(|max| Arc::new(Semaphore::new(max))),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, one handler task per connection
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(address = %self.local_addr()?, "Server listening");

        loop {
            // Wait for a connection slot
            let permit = match &self.connection_limit {
                Some(limit) => Some(Arc::clone(limit).acquire_owned().await?),
                None => None,
            };

            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    info!(peer = %addr, "Accepted connection");

                    let session = self.session.clone();

                    tokio::spawn(async move {
                        handle_connection(stream, addr, session).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Handle a single client connection.
///
/// The stream is closed on every path: after a reply, after a failed
/// write, after the reader gives up, and on timeout.
pub async fn handle_connection<S>(stream: S, peer: SocketAddr, session: Session)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let (tx, rx) = oneshot::channel();

    let identity = Arc::clone(&session.identity);
    let reader_task = tokio::spawn(async move {
        if let Some(response) = read_query(BufReader::new(reader), peer, &identity).await {
            // The handler may have timed out already
            let _ = tx.send(response);
        }
    });

    match tokio::time::timeout(session.timeout, rx).await {
        Ok(Ok(response)) => {
            let data = response.encode(session.crlf_all);
            match writer.write_all(&data).await {
                Ok(()) => {
                    let text = String::from_utf8_lossy(&data);
                    info!(peer = %peer, response = %text.trim_end(), "Sent response");
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Failed to send response");
                }
            }
        }
        Ok(Err(_)) => {
            debug!(peer = %peer, "No query received");
        }
        Err(_) => {
            info!(peer = %peer, "Request timed out");
            reader_task.abort();
        }
    }

    // Release the read half before closing
    if let Err(e) = reader_task.await {
        if e.is_panic() {
            warn!(peer = %peer, error = %e, "Reader task panicked");
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!(peer = %peer, error = %e, "Failed to shut down connection");
    }
    drop(writer);

    info!(peer = %peer, "Closed connection");
}

/// Read exactly one query line and classify it.
///
/// Only the first `MAX_LINE_LENGTH` bytes are kept; the rest of an
/// oversized line is discarded. Returns `None` when no complete line
/// arrives (EOF or an I/O error).
async fn read_query<R>(mut reader: R, peer: SocketAddr, identity: &str) -> Option<Response>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(64);

    let n = match (&mut reader)
        .take(MAX_LINE_LENGTH as u64)
        .read_until(b'\n', &mut line)
        .await
    {
        Ok(0) => {
            trace!(peer = %peer, "Connection closed by client");
            return None;
        }
        Ok(n) => n,
        Err(e) => {
            debug!(peer = %peer, error = %e, "Failed to read query");
            return None;
        }
    };

    if !line.ends_with(b"\n") {
        let complete = n == MAX_LINE_LENGTH && matches!(skip_line(&mut reader).await, Ok(true));
        if !complete {
            debug!(peer = %peer, bytes = n, "Incomplete query line");
            return None;
        }
        debug!(peer = %peer, kept = n, "Truncated oversized query line");
    }

    let response = Response::classify(&line, identity);
    debug!(peer = %peer, kind = response.kind(), "Classified query");
    Some(response)
}

/// Consume input up to and including the next `\n`.
///
/// Returns `false` if the stream ends first.
async fn skip_line<R>(reader: &mut R) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(false);
        }

        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(true);
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}

/// Create a TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
