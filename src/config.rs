//! Loading proxy documents into named connectors.
//!
//! A document is YAML with a `proxies` list:
//!
//! ```yaml
//! proxies:
//!   - name: hk-01
//!     type: socks5
//!     server: 203.0.113.10
//!     port: 1080
//!     username: alice   # optional
//!     password: secret  # optional
//!   - name: office
//!     type: http
//!     server: 198.51.100.4
//!     port: 3128
//!   - name: local
//!     type: direct
//! ```
//!
//! Other top-level keys and per-proxy fields are ignored. Proxy types other
//! than `socks5`, `http` and `direct` are skipped, as are `http` proxies with
//! `tls: true`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use http::Method;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::connector::{Connector, DirectConnector, HttpConnectConnector, Socks5Connector};
use crate::transport::ProbeTransport;

/// Named connectors, ordered by name.
pub type ProxySet = BTreeMap<String, Arc<dyn Connector>>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("url template must contain exactly one %d placeholder: {0}")]
    InvalidTemplate(String),

    #[error("duplicate proxy name: {0}")]
    DuplicateName(String),

    #[error("proxy {0} is missing a server address or port")]
    MissingServer(String),

    #[error("invalid forward proxy {0}: {1}")]
    InvalidForwardProxy(String, String),
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    proxies: Vec<ProxyEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: bool,
}

/// Load every comma-separated source, keeping the first proxy seen for each name.
///
/// Sources that cannot be read or parsed are logged and skipped.
pub async fn load_all_proxies(
    sources: &str,
    forward: Option<Arc<dyn Connector>>,
    timeout: Duration,
) -> ProxySet {
    let mut all = ProxySet::new();

    for source in sources.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let body = match read_source(source, timeout).await {
            Ok(body) => body,
            Err(e) => {
                warn!(source, "failed to read proxy document: {e:#}");
                continue;
            }
        };

        let proxies = match parse_proxies(&body, forward.clone()) {
            Ok(p) => p,
            Err(e) => {
                warn!(source, "failed to parse proxy document: {e:#}");
                continue;
            }
        };

        info!(source, count = proxies.len(), "loaded proxies");
        for (name, connector) in proxies {
            all.entry(name).or_insert(connector);
        }
    }

    all
}

/// Read a document from a local path or an `http(s)` URL.
pub async fn read_source(source: &str, timeout: Duration) -> Result<String> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let transport = ProbeTransport::new(Arc::new(DirectConnector), timeout);
        let resp = transport.send(Method::GET, source).await?;
        if !resp.status().is_success() {
            bail!("GET {source} returned {}", resp.status());
        }
        let body = transport.collect(resp.into_body()).await?;
        return String::from_utf8(body.to_vec()).context("proxy document is not valid UTF-8");
    }

    tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("failed to read proxy document: {source}"))
}

/// Parse one YAML document into `(name, connector)` pairs in document order.
pub fn parse_proxies(
    yaml: &str,
    forward: Option<Arc<dyn Connector>>,
) -> Result<Vec<(String, Arc<dyn Connector>)>> {
    let raw: RawConfig = serde_yaml::from_str(yaml).context("invalid proxy document")?;

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.proxies.len());
    for entry in raw.proxies {
        if !seen.insert(entry.name.clone()) {
            return Err(ConfigError::DuplicateName(entry.name).into());
        }
        match build_connector(&entry, forward.clone())? {
            Some(connector) => out.push((entry.name, connector)),
            None => warn!(proxy = %entry.name, kind = %entry.kind, "skipping unsupported proxy type"),
        }
    }
    Ok(out)
}

/// Build a connector for `entry`, or `None` when its type is unsupported.
pub fn build_connector(
    entry: &ProxyEntry,
    forward: Option<Arc<dyn Connector>>,
) -> Result<Option<Arc<dyn Connector>>, ConfigError> {
    match entry.kind.to_ascii_lowercase().as_str() {
        "direct" => Ok(Some(Arc::new(DirectConnector))),
        "socks5" => {
            if entry.server.is_empty() || entry.port == 0 {
                return Err(ConfigError::MissingServer(entry.name.clone()));
            }
            let mut socks = Socks5Connector::new(&entry.server, entry.port);
            if let Some(user) = &entry.username {
                socks = socks.with_auth(user, entry.password.clone().unwrap_or_default());
            }
            if let Some(dialer) = forward {
                socks = socks.via(dialer);
            }
            Ok(Some(Arc::new(socks)))
        }
        "http" if !entry.tls => {
            if entry.server.is_empty() || entry.port == 0 {
                return Err(ConfigError::MissingServer(entry.name.clone()));
            }
            let mut http = HttpConnectConnector::new(&entry.server, entry.port);
            if let Some(user) = &entry.username {
                http = http.with_auth(user, entry.password.as_deref().unwrap_or_default());
            }
            if let Some(dialer) = forward {
                http = http.via(dialer);
            }
            Ok(Some(Arc::new(http)))
        }
        _ => Ok(None),
    }
}

/// Parse `socks5://[user:pass@]host:port` or `http://[user:pass@]host[:port]`
/// into the connector used to reach every proxy server.
pub fn parse_forward_proxy(link: &str) -> Result<Arc<dyn Connector>, ConfigError> {
    let invalid = |why: &str| ConfigError::InvalidForwardProxy(link.to_string(), why.to_string());

    let url = Url::parse(link).map_err(|e| invalid(&e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| invalid("missing host"))?
        .trim_matches(['[', ']']);
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid("missing port"))?;
    let auth = (!url.username().is_empty())
        .then(|| (url.username(), url.password().unwrap_or_default()));

    match url.scheme() {
        "socks5" => {
            let mut socks = Socks5Connector::new(host, port);
            if let Some((user, pass)) = auth {
                socks = socks.with_auth(user, pass);
            }
            Ok(Arc::new(socks))
        }
        "http" => {
            let mut http = HttpConnectConnector::new(host, port);
            if let Some((user, pass)) = auth {
                http = http.with_auth(user, pass);
            }
            Ok(Arc::new(http))
        }
        _ => Err(invalid("only socks5 and http forward proxies are supported")),
    }
}
