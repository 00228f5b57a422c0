//! HTTP/1.1 transport whose dial step goes through a [`Connector`].
//!
//! Every exchange made through one [`ProbeTransport`] shares a single deadline.
//! Dialing, TLS and waiting for headers fail with [`TransportError::Timeout`]
//! once it passes; a body drain stops there and keeps its count. Nothing here
//! retries.

use std::future::Future;
use std::io;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use http::{header, Method, Request, Response, Uri};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::time::{self, Instant};
use tokio_native_tls::TlsConnector;
use tracing::debug;

use crate::connector::{BoxedIo, Connector};
use crate::status::StatusRanges;

const USER_AGENT: &str = concat!("proxy-speed-rs/", env!("CARGO_PKG_VERSION"));

static TLS: OnceLock<TlsConnector> = OnceLock::new();

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid port in address: {0}")]
    InvalidPort(String),

    #[error("dial failed: {0}")]
    Dial(#[source] io::Error),

    #[error("tls handshake failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("http exchange failed: {0}")]
    Http(#[from] hyper::Error),

    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("deadline exceeded")]
    Timeout,
}

/// Process-wide TLS client, built on the first `https` request.
fn shared_tls() -> Result<&'static TlsConnector, TransportError> {
    if let Some(tls) = TLS.get() {
        return Ok(tls);
    }
    let tls = TlsConnector::from(native_tls::TlsConnector::new()?);
    Ok(TLS.get_or_init(|| tls))
}

pub struct ProbeTransport {
    connector: Arc<dyn Connector>,
    deadline: Instant,
}

impl ProbeTransport {
    pub fn new(connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        Self::with_deadline(connector, Instant::now() + timeout)
    }

    pub fn with_deadline(connector: Arc<dyn Connector>, deadline: Instant) -> Self {
        Self {
            connector,
            deadline,
        }
    }

    /// Open a stream for `uri` through the connector, wrapping it in TLS for `https`.
    pub async fn connect(&self, uri: &Uri) -> Result<BoxedIo, TransportError> {
        let (host, port) = dial_target(uri)?;

        let io = self
            .connector
            .dial(&host, port, self.deadline)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::TimedOut => TransportError::Timeout,
                _ => TransportError::Dial(e),
            })?;

        if uri.scheme_str() == Some("https") {
            let tls = self.bounded(shared_tls()?.connect(&host, io)).await??;
            return Ok(Box::new(tls));
        }
        Ok(io)
    }

    /// Issue one request and return as soon as the response head is available.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
    ) -> Result<Response<Incoming>, TransportError> {
        let uri: Uri = url
            .parse()
            .map_err(|_| TransportError::InvalidUrl(url.to_string()))?;
        let req = build_request(method, &uri)?;

        let exchange = async {
            let io = self.connect(&uri).await?;
            let (mut sender, conn) = http1::handshake(TokioIo::new(io)).await?;
            tokio::spawn(async move {
                if let Err(err) = conn.await {
                    debug!("probe connection ended: {err}");
                }
            });
            Ok::<_, TransportError>(sender.send_request(req).await?)
        };
        self.bounded(exchange).await?
    }

    /// Read and drop the body, returning the number of payload bytes seen.
    ///
    /// Stops early at the deadline or on a broken body; the bytes read up to
    /// that point are still counted.
    pub async fn drain(&self, mut body: Incoming) -> u64 {
        let mut total = 0u64;
        loop {
            match time::timeout_at(self.deadline, body.frame()).await {
                Ok(Some(Ok(frame))) => {
                    if let Some(data) = frame.data_ref() {
                        total += data.len() as u64;
                    }
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    debug!(total, "body ended early: {err}");
                    break;
                }
                Err(_) => {
                    debug!(total, "body cut at deadline");
                    break;
                }
            }
        }
        total
    }

    /// Read the whole body into memory.
    pub async fn collect(&self, body: Incoming) -> Result<Bytes, TransportError> {
        let read = async move { Ok::<_, TransportError>(body.collect().await?.to_bytes()) };
        self.bounded(read).await?
    }

    async fn bounded<T>(&self, fut: impl Future<Output = T>) -> Result<T, TransportError> {
        time::timeout_at(self.deadline, fut)
            .await
            .map_err(|_| TransportError::Timeout)
    }
}

/// Reachability check through `connector`: HEAD `url` and time the response head.
pub async fn url_test(
    connector: Arc<dyn Connector>,
    url: &str,
    expected: &StatusRanges,
    deadline: Instant,
) -> Result<u16, TransportError> {
    let transport = ProbeTransport::with_deadline(connector, deadline);
    let start = Instant::now();
    let resp = transport.send(Method::HEAD, url).await?;
    let elapsed = start.elapsed();

    let status = resp.status().as_u16();
    if !expected.contains(status) {
        return Err(TransportError::UnexpectedStatus(status));
    }
    Ok(elapsed.as_millis().min(u128::from(u16::MAX)) as u16)
}

/// Resolve the `host` and `port` a request for `uri` has to dial.
pub fn dial_target(uri: &Uri) -> Result<(String, u16), TransportError> {
    let authority = uri
        .authority()
        .ok_or_else(|| TransportError::InvalidAddress(uri.to_string()))?;
    let (host, port) = split_host_port(authority.as_str())?;
    let port = match port {
        Some(p) => p,
        None => match uri.scheme_str() {
            Some("http") => 80,
            Some("https") => 443,
            _ => return Err(TransportError::InvalidAddress(uri.to_string())),
        },
    };
    Ok((host.to_string(), port))
}

/// Split an authority into host and optional port. IPv6 brackets are removed.
pub fn split_host_port(authority: &str) -> Result<(&str, Option<u16>), TransportError> {
    let hostport = authority
        .rsplit_once('@')
        .map_or(authority, |(_, rest)| rest);
    let invalid = || TransportError::InvalidAddress(authority.to_string());

    let (host, port) = if let Some(rest) = hostport.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        match tail {
            "" => (host, None),
            _ => (host, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match hostport.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (hostport, None),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = port
        .map(|p| {
            p.parse::<u16>()
                .map_err(|_| TransportError::InvalidPort(authority.to_string()))
        })
        .transpose()?;
    Ok((host, port))
}

fn build_request(method: Method, uri: &Uri) -> Result<Request<Empty<Bytes>>, TransportError> {
    let authority = uri
        .authority()
        .ok_or_else(|| TransportError::InvalidAddress(uri.to_string()))?;
    let path = uri.path_and_query().map_or("/", |p| p.as_str());

    Request::builder()
        .method(method)
        .uri(path)
        .header(header::HOST, authority.as_str())
        .header(header::USER_AGENT, USER_AGENT)
        .body(Empty::new())
        .map_err(|e| TransportError::InvalidUrl(e.to_string()))
}
