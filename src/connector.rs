//! Proxy connector capability and the built-in connectors.
//!
//! A [`Connector`] knows how to open a byte stream to `host:port` through one
//! configured proxy path, and how to run a reachability check through that
//! path. The probing engine only consumes these two operations.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tokio_socks::tcp::Socks5Stream;

use crate::status::StatusRanges;
use crate::transport::{self, TransportError};

/// Byte stream returned by a connector dial.
pub trait ProxyIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ProxyIo for T {}

pub type BoxedIo = Box<dyn ProxyIo>;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a stream to `host:port` through this proxy path, giving up at `deadline`.
    async fn dial(&self, host: &str, port: u16, deadline: Instant) -> io::Result<BoxedIo>;

    /// Measure how long `url` takes to answer through this proxy path.
    ///
    /// Returns the delay in milliseconds, or an error when the request fails,
    /// misses `deadline`, or answers with a status outside `expected`.
    async fn url_test(
        &self,
        url: &str,
        expected: &StatusRanges,
        deadline: Instant,
    ) -> Result<u16, TransportError>;
}

/// Connects straight to the destination without any proxy.
#[derive(Debug, Clone, Default)]
pub struct DirectConnector;

#[async_trait]
impl Connector for DirectConnector {
    async fn dial(&self, host: &str, port: u16, deadline: Instant) -> io::Result<BoxedIo> {
        let stream = with_deadline(deadline, TcpStream::connect((host, port))).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    async fn url_test(
        &self,
        url: &str,
        expected: &StatusRanges,
        deadline: Instant,
    ) -> Result<u16, TransportError> {
        transport::url_test(Arc::new(self.clone()), url, expected, deadline).await
    }
}

/// SOCKS5 proxy, optionally reached through another connector.
#[derive(Clone)]
pub struct Socks5Connector {
    server: String,
    port: u16,
    auth: Option<(String, String)>,
    via: Option<Arc<dyn Connector>>,
}

impl Socks5Connector {
    pub fn new(server: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            port,
            auth: None,
            via: None,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some((username.into(), password.into()));
        self
    }

    /// Reach the SOCKS5 server itself through `dialer` instead of a direct TCP connect.
    pub fn via(mut self, dialer: Arc<dyn Connector>) -> Self {
        self.via = Some(dialer);
        self
    }

    async fn handshake<S>(&self, socket: S, host: &str, port: u16) -> io::Result<BoxedIo>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let target = (host, port);
        let stream = match &self.auth {
            Some((user, pass)) => {
                Socks5Stream::connect_with_password_and_socket(socket, target, user, pass).await
            }
            None => Socks5Stream::connect_with_socket(socket, target).await,
        }
        .map_err(socks_to_io)?;
        Ok(Box::new(stream))
    }
}

impl std::fmt::Debug for Socks5Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socks5Connector")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("auth", &self.auth.is_some())
            .field("chained", &self.via.is_some())
            .finish()
    }
}

#[async_trait]
impl Connector for Socks5Connector {
    async fn dial(&self, host: &str, port: u16, deadline: Instant) -> io::Result<BoxedIo> {
        let connect = async {
            match &self.via {
                Some(dialer) => {
                    let socket = dialer.dial(&self.server, self.port, deadline).await?;
                    self.handshake(socket, host, port).await
                }
                None => {
                    let socket = TcpStream::connect((self.server.as_str(), self.port)).await?;
                    socket.set_nodelay(true)?;
                    self.handshake(socket, host, port).await
                }
            }
        };
        with_deadline(deadline, connect).await
    }

    async fn url_test(
        &self,
        url: &str,
        expected: &StatusRanges,
        deadline: Instant,
    ) -> Result<u16, TransportError> {
        transport::url_test(Arc::new(self.clone()), url, expected, deadline).await
    }
}

/// HTTP proxy that opens tunnels with `CONNECT`, optionally reached through another connector.
#[derive(Clone)]
pub struct HttpConnectConnector {
    server: String,
    port: u16,
    authorization: Option<String>,
    via: Option<Arc<dyn Connector>>,
}

const MAX_CONNECT_HEAD: usize = 16 * 1024;

impl HttpConnectConnector {
    pub fn new(server: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            port,
            authorization: None,
            via: None,
        }
    }

    /// Send `Proxy-Authorization: Basic` with every `CONNECT`.
    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        let credentials = format!("{username}:{password}");
        self.authorization = Some(format!("Basic {}", STANDARD.encode(credentials)));
        self
    }

    pub fn via(mut self, dialer: Arc<dyn Connector>) -> Self {
        self.via = Some(dialer);
        self
    }

    async fn tunnel(&self, mut socket: BoxedIo, host: &str, port: u16) -> io::Result<BoxedIo> {
        let target = if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        let mut req = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
        if let Some(auth) = &self.authorization {
            req.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
        }
        req.push_str("\r\n");
        socket.write_all(req.as_bytes()).await?;

        let status = read_connect_status(&mut socket).await?;
        if !(200..300).contains(&status) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("proxy answered CONNECT with {status}"),
            ));
        }
        Ok(socket)
    }
}

impl std::fmt::Debug for HttpConnectConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnectConnector")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("auth", &self.authorization.is_some())
            .field("chained", &self.via.is_some())
            .finish()
    }
}

#[async_trait]
impl Connector for HttpConnectConnector {
    async fn dial(&self, host: &str, port: u16, deadline: Instant) -> io::Result<BoxedIo> {
        let connect = async {
            let socket: BoxedIo = match &self.via {
                Some(dialer) => dialer.dial(&self.server, self.port, deadline).await?,
                None => {
                    let socket = TcpStream::connect((self.server.as_str(), self.port)).await?;
                    socket.set_nodelay(true)?;
                    Box::new(socket)
                }
            };
            self.tunnel(socket, host, port).await
        };
        with_deadline(deadline, connect).await
    }

    async fn url_test(
        &self,
        url: &str,
        expected: &StatusRanges,
        deadline: Instant,
    ) -> Result<u16, TransportError> {
        transport::url_test(Arc::new(self.clone()), url, expected, deadline).await
    }
}

/// Read a `CONNECT` response head byte by byte so no tunnel data is consumed.
async fn read_connect_status(io: &mut BoxedIo) -> io::Result<u16> {
    let mut head = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_CONNECT_HEAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "CONNECT response head too large",
            ));
        }
        io.read_exact(&mut byte).await?;
        head.push(byte[0]);
    }

    let status_line = head.split(|&b| b == b'\n').next().unwrap_or_default();
    let status_line = String::from_utf8_lossy(status_line);
    status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed CONNECT status line: {}", status_line.trim()),
            )
        })
}

async fn with_deadline<T, F>(deadline: Instant, fut: F) -> io::Result<T>
where
    F: std::future::Future<Output = io::Result<T>>,
{
    match time::timeout_at(deadline, fut).await {
        Ok(res) => res,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "dial deadline exceeded")),
    }
}

fn socks_to_io(err: tokio_socks::Error) -> io::Error {
    match err {
        tokio_socks::Error::Io(e) => e,
        other => io::Error::new(io::ErrorKind::ConnectionRefused, other),
    }
}
