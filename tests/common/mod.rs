#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;

use proxy_speed_rs::connector::{BoxedIo, Connector};
use proxy_speed_rs::status::StatusRanges;
use proxy_speed_rs::transport::{self, TransportError};

pub const EGRESS_IP: &str = "203.0.113.7";
pub const EGRESS_COUNTRY: &str = "NL";

/// Any host works: loopback connectors route every dial to the local server.
pub const DOWN_TEMPLATE: &str = "http://speed.test/__down?bytes=%d";
pub const IDENTITY_URL: &str = "http://speed.test/__down?bytes=1";
pub const DELAY_URL: &str = "http://speed.test/generate_204";

#[derive(Deserialize)]
struct DownQuery {
    bytes: usize,
    #[serde(default)]
    delay_ms: u64,
}

async fn down(Query(q): Query<DownQuery>) -> impl IntoResponse {
    if q.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(q.delay_ms)).await;
    }
    (
        [("cf-meta-ip", EGRESS_IP), ("cf-meta-country", EGRESS_COUNTRY)],
        vec![0u8; q.bytes],
    )
}

async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn generate_204() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Start the local speed-test server and return its address.
pub async fn spawn_speed_server() -> SocketAddr {
    let app = Router::new()
        .route("/__down", get(down))
        .route("/status/{code}", get(status))
        .route("/generate_204", get(generate_204));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Raw HTTP server that announces `promised` body bytes, sends `sent`, then
/// keeps the connection open without writing more.
pub async fn spawn_stalling_server(sent: usize, promised: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut byte = [0u8; 1];
                while !head.ends_with(b"\r\n\r\n") {
                    if sock.read_exact(&mut byte).await.is_err() {
                        return;
                    }
                    head.push(byte[0]);
                }
                let resp = format!("HTTP/1.1 200 OK\r\nContent-Length: {promised}\r\n\r\n");
                if sock.write_all(resp.as_bytes()).await.is_err() {
                    return;
                }
                let _ = sock.write_all(&vec![0u8; sent]).await;
                let _ = sock.flush().await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });
    addr
}

/// Routes every dial to `addr` and remembers what was asked for.
#[derive(Clone)]
pub struct LoopbackConnector {
    addr: SocketAddr,
    pub dialed: Arc<Mutex<Vec<(String, u16)>>>,
}

impl LoopbackConnector {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            dialed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn dial_count(&self) -> usize {
        self.dialed.lock().unwrap().len()
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn dial(&self, host: &str, port: u16, _deadline: Instant) -> io::Result<BoxedIo> {
        self.dialed.lock().unwrap().push((host.to_string(), port));
        let stream = TcpStream::connect(self.addr).await?;
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

/// Every dial is refused.
#[derive(Clone, Default)]
pub struct FailingConnector;

#[async_trait]
impl Connector for FailingConnector {
    async fn dial(&self, _host: &str, _port: u16, _deadline: Instant) -> io::Result<BoxedIo> {
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
    }

    async fn url_test(
        &self,
        _url: &str,
        _expected: &StatusRanges,
        _deadline: Instant,
    ) -> Result<u16, TransportError> {
        Err(TransportError::Dial(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "refused",
        )))
    }
}

/// Reports a fixed delay; dials go to the local server.
#[derive(Clone)]
pub struct FixedDelayConnector {
    pub delay_ms: u16,
    pub inner: LoopbackConnector,
}

#[async_trait]
impl Connector for FixedDelayConnector {
    async fn dial(&self, host: &str, port: u16, deadline: Instant) -> io::Result<BoxedIo> {
        self.inner.dial(host, port, deadline).await
    }

    async fn url_test(
        &self,
        _url: &str,
        _expected: &StatusRanges,
        _deadline: Instant,
    ) -> Result<u16, TransportError> {
        Ok(self.delay_ms)
    }
}

/// Never answers.
#[derive(Clone, Default)]
pub struct HangingConnector;

#[async_trait]
impl Connector for HangingConnector {
    async fn dial(&self, _host: &str, _port: u16, _deadline: Instant) -> io::Result<BoxedIo> {
        std::future::pending().await
    }

    async fn url_test(
        &self,
        _url: &str,
        _expected: &StatusRanges,
        _deadline: Instant,
    ) -> Result<u16, TransportError> {
        std::future::pending().await
    }
}
