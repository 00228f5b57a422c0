use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, Method};
use tracing::debug;

use crate::connector::Connector;
use crate::transport::{ProbeTransport, TransportError};

pub const DEFAULT_IDENTITY_URL: &str = "https://speed.cloudflare.com/__down?bytes=1";
pub const IP_HEADER: &str = "cf-meta-ip";
pub const COUNTRY_HEADER: &str = "cf-meta-country";

/// Apparent public address and country of a proxy path's exit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Egress {
    pub ip: String,
    pub country: String,
}

/// Ask the identity echo endpoint who we appear to be through `connector`.
///
/// Makes exactly one request. Any failure returns an empty [`Egress`].
pub async fn resolve_egress(connector: Arc<dyn Connector>, url: &str, timeout: Duration) -> Egress {
    match try_resolve(connector, url, timeout).await {
        Ok(egress) => egress,
        Err(err) => {
            debug!("egress lookup failed: {err}");
            Egress::default()
        }
    }
}

async fn try_resolve(
    connector: Arc<dyn Connector>,
    url: &str,
    timeout: Duration,
) -> Result<Egress, TransportError> {
    let transport = ProbeTransport::new(connector, timeout);
    let resp = transport.send(Method::GET, url).await?;
    if !resp.status().is_success() {
        return Err(TransportError::UnexpectedStatus(resp.status().as_u16()));
    }
    Ok(Egress {
        ip: header_str(resp.headers(), IP_HEADER),
        country: header_str(resp.headers(), COUNTRY_HEADER),
    })
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
