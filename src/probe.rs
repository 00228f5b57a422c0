//! Per-target probes: fanned-out bandwidth measurement and the delay-only check.

use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::config::ConfigError;
use crate::download::{download_chunk, ChunkSample, SIZE_PLACEHOLDER};
use crate::identity::{resolve_egress, DEFAULT_IDENTITY_URL};
use crate::status::StatusRanges;
use crate::types::{Measurement, ProbeTarget, DELAY_UNREACHABLE};

pub const DEFAULT_URL_TEMPLATE: &str = "https://speed.cloudflare.com/__down?bytes=%d";
pub const DEFAULT_DELAY_URL: &str = "https://www.gstatic.com/generate_204";

const MIN_WALL_SECS: f64 = 1e-6;

/// How chunk samples are folded into one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Aggregation {
    /// Mean TTFB over successful chunks; all chunks failing yields the failure sentinel.
    #[default]
    Strict,
    /// Mean TTFB over every fan-out slot; all chunks failing yields zero bandwidth.
    Compat,
}

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub total_bytes: u64,
    pub timeout: Duration,
    pub fanout: usize,
    pub url_template: String,
    pub identity_url: String,
    pub aggregation: Aggregation,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            total_bytes: 100 * 1024 * 1024,
            timeout: Duration::from_secs(5),
            fanout: 4,
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            identity_url: DEFAULT_IDENTITY_URL.to_string(),
            aggregation: Aggregation::default(),
        }
    }
}

impl ProbeSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url_template.matches(SIZE_PLACEHOLDER).count() != 1 {
            return Err(ConfigError::InvalidTemplate(self.url_template.clone()));
        }
        Ok(())
    }

    pub fn chunk_size(&self) -> u64 {
        self.total_bytes / self.fanout.max(1) as u64
    }
}

#[derive(Debug, Clone)]
pub struct DelaySettings {
    pub url: String,
    pub expected: StatusRanges,
    pub timeout: Duration,
    pub identity_url: String,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_DELAY_URL.to_string(),
            expected: StatusRanges::any(),
            timeout: Duration::from_secs(5),
            identity_url: DEFAULT_IDENTITY_URL.to_string(),
        }
    }
}

/// Measure one target's download bandwidth with `fanout` parallel chunks.
///
/// The chunk size is `total_bytes / fanout`; the remainder is not downloaded.
/// Bandwidth is the summed chunk bytes over the wall-clock time from the first
/// chunk start to the last chunk completion. The egress lookup runs afterwards
/// and never fails the measurement.
pub async fn probe_bandwidth(target: &ProbeTarget, settings: &ProbeSettings) -> Measurement {
    let fanout = settings.fanout.max(1);
    let chunk_size = settings.chunk_size();

    let start = Instant::now();
    let mut chunks = JoinSet::new();
    for _ in 0..fanout {
        let target = target.clone();
        let template = settings.url_template.clone();
        let timeout = settings.timeout;
        chunks.spawn(async move { download_chunk(&target, chunk_size, timeout, &template).await });
    }

    let mut samples = Vec::with_capacity(fanout);
    while let Some(res) = chunks.join_next().await {
        samples.push(res.unwrap_or_else(|err| {
            debug!(proxy = %target.name, "chunk task did not complete: {err}");
            ChunkSample::failed()
        }));
    }
    let wall = start.elapsed();

    let mut measurement = aggregate(&target.name, &samples, fanout, wall, settings.aggregation);

    let egress = resolve_egress(
        target.connector.clone(),
        &settings.identity_url,
        settings.timeout,
    )
    .await;
    measurement.outbound_ip = egress.ip;
    measurement.country = egress.country;
    measurement
}

/// Fold chunk samples into one measurement for `name`.
pub fn aggregate(
    name: &str,
    samples: &[ChunkSample],
    fanout: usize,
    wall: Duration,
    policy: Aggregation,
) -> Measurement {
    let ok: Vec<&ChunkSample> = samples.iter().filter(|s| !s.is_failed()).collect();
    let bytes: u64 = ok.iter().map(|s| s.bytes).sum();
    let ttfb_sum: Duration = ok.iter().filter_map(|s| s.ttfb).sum();
    let wall_secs = wall.as_secs_f64().max(MIN_WALL_SECS);

    let slots = match policy {
        Aggregation::Strict if ok.is_empty() => return Measurement::failed(name),
        Aggregation::Strict => ok.len(),
        Aggregation::Compat => fanout.max(1),
    };

    Measurement {
        bandwidth: bytes as f64 / wall_secs,
        ttfb: Some(ttfb_sum / u32::try_from(slots).unwrap_or(u32::MAX)),
        ..Measurement::named(name)
    }
}

/// Reachability-only probe through the connector's own URL test.
///
/// Any error or a missed deadline records [`DELAY_UNREACHABLE`]. Reachable
/// targets also get an egress lookup.
pub async fn probe_delay(target: &ProbeTarget, settings: &DelaySettings) -> Measurement {
    let deadline = Instant::now() + settings.timeout;
    let check = target
        .connector
        .url_test(&settings.url, &settings.expected, deadline);

    let delay = match time::timeout_at(deadline, check).await {
        Ok(Ok(ms)) if ms < DELAY_UNREACHABLE => ms,
        Ok(Ok(ms)) => {
            debug!(proxy = %target.name, ms, "delay at or above unreachable threshold");
            DELAY_UNREACHABLE
        }
        Ok(Err(err)) => {
            debug!(proxy = %target.name, "url test failed: {err}");
            DELAY_UNREACHABLE
        }
        Err(_) => {
            debug!(proxy = %target.name, "url test timed out");
            DELAY_UNREACHABLE
        }
    };

    let mut measurement = Measurement {
        delay,
        ..Measurement::named(&target.name)
    };
    if measurement.is_reachable() {
        let egress = resolve_egress(
            target.connector.clone(),
            &settings.identity_url,
            settings.timeout,
        )
        .await;
        measurement.outbound_ip = egress.ip;
        measurement.country = egress.country;
    }
    measurement
}
