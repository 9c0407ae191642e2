//! Line-oriented TCP connector
//!
//! A minimal request/reply transport: one CRLF-terminated command line out,
//! one reply line back. Replies starting with `+` are successes and replies
//! starting with `-` are errors reported by the backend. Enough to drive a
//! Redis-style server (`PING`, `AUTH`, `ECHO`) through the pool.

use crate::core::Manager;
use crate::pool::{permanent, Connect, DialOptions, PoolError};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

/// Opens [`LineConn`] connections over TCP with keep-alive enabled
#[derive(Debug, Clone, Copy, Default)]
pub struct LineConnector;

/// A buffered TCP connection speaking one line per request and reply
#[derive(Debug)]
pub struct LineConn {
    stream: BufReader<TcpStream>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

async fn bounded<T, F>(limit: Option<Duration>, what: &str, fut: F) -> io::Result<T>
where
    F: std::future::Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("{} timed out", what)))?,
        None => fut.await,
    }
}

impl LineConn {
    pub fn new(stream: TcpStream, options: &DialOptions) -> Self {
        Self {
            stream: BufReader::new(stream),
            read_timeout: options.read_timeout,
            write_timeout: options.write_timeout,
        }
    }

    /// Send one command line and read one reply line
    ///
    /// The reply is returned without its line terminator. A closed connection
    /// is reported as `UnexpectedEof`. A line carrying its own CR or LF is
    /// rejected with `InvalidInput` before anything is written, since it would
    /// leave unread replies on the connection.
    pub async fn request(&mut self, line: &str) -> io::Result<String> {
        if line.contains(['\r', '\n']) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "command line must not contain CR or LF",
            ));
        }

        let mut frame = String::with_capacity(line.len() + 2);
        frame.push_str(line);
        frame.push_str("\r\n");

        let write_timeout = self.write_timeout;
        let stream = self.stream.get_mut();
        bounded(write_timeout, "write", async {
            stream.write_all(frame.as_bytes()).await?;
            stream.flush().await
        })
        .await?;

        let mut reply = String::new();
        let read = bounded(self.read_timeout, "read", self.stream.read_line(&mut reply)).await?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            ));
        }

        let trimmed = reply.trim_end_matches(['\r', '\n']).len();
        reply.truncate(trimmed);
        Ok(reply)
    }

    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.stream.get_ref().peer_addr()
    }
}

#[async_trait]
impl Connect for LineConnector {
    type Conn = LineConn;

    async fn connect(&self, addr: &str, options: &DialOptions) -> io::Result<LineConn> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        // Configure TCP keep-alive
        let socket = socket2::Socket::from(stream.into_std()?);
        socket.set_keepalive(true)?;
        let stream = TcpStream::from_std(socket.into())?;

        debug!(addr = %addr, "TCP connection established");
        Ok(LineConn::new(stream, options))
    }

    async fn authenticate(&self, conn: &mut LineConn, secret: &str) -> io::Result<()> {
        let reply = conn.request(&format!("AUTH {}", secret)).await?;
        if reply != "+OK" {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("authentication rejected: {}", reply),
            ));
        }
        Ok(())
    }

    async fn ping(&self, conn: &mut LineConn) -> io::Result<()> {
        let reply = conn.request("PING").await?;
        if reply != "+PONG" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected PING reply: {}", reply),
            ));
        }
        Ok(())
    }
}

impl Manager<LineConnector> {
    /// Send one command through the pool and return the reply line
    ///
    /// Transport failures are retried on fresh connections. An error reply
    /// (`-...`) leaves the connection in the pool and is returned as
    /// `PoolError::Operation` straight away.
    pub async fn command(&self, line: &str) -> Result<String, PoolError> {
        let label = line.split_whitespace().next().unwrap_or("").to_uppercase();
        let line = line.to_string();

        self.run(&label, move |conn| {
            let line = line.clone();
            Box::pin(async move { roundtrip(conn, &line).await })
        })
        .await
    }
}

async fn roundtrip(conn: &mut LineConn, line: &str) -> anyhow::Result<String> {
    let reply = match conn.request(line).await {
        Ok(reply) => reply,
        Err(err) if err.kind() == io::ErrorKind::InvalidInput => return Err(permanent(err)),
        Err(err) => return Err(err.into()),
    };
    if let Some(message) = reply.strip_prefix('-') {
        return Err(permanent(message));
    }
    Ok(reply)
}
