use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

use crate::connector::Connector;

/// Bandwidth value recorded when a probe produced no valid sample.
pub const FAILED_BANDWIDTH: f64 = -1.0;

/// Delay value recorded when the reachability check failed or timed out.
pub const DELAY_UNREACHABLE: u16 = 9999;

/// One named proxy path to probe. Names are unique within a run.
#[derive(Clone)]
pub struct ProbeTarget {
    pub name: String,
    pub connector: Arc<dyn Connector>,
}

impl ProbeTarget {
    pub fn new(name: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        Self {
            name: name.into(),
            connector,
        }
    }
}

impl std::fmt::Debug for ProbeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeTarget").field("name", &self.name).finish()
    }
}

/// Which kind of run produced a set of measurements.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Bandwidth,
    Delay,
}

/// Per-target result record.
///
/// `bandwidth` is bytes per second, or [`FAILED_BANDWIDTH`] when the probe failed.
/// `ttfb` is `None` when no valid time-to-first-byte was measured.
/// `delay` is milliseconds, or [`DELAY_UNREACHABLE`].
/// Egress fields are empty when the identity lookup did not succeed.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Measurement {
    pub name: String,
    pub outbound_ip: String,
    pub country: String,
    pub bandwidth: f64,
    #[serde(rename = "ttfb_ms", serialize_with = "serialize_ttfb")]
    pub ttfb: Option<Duration>,
    pub delay: u16,
}

impl Measurement {
    /// Zeroed record: bandwidth 0 and a zero TTFB, as delay-only runs report them.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outbound_ip: String::new(),
            country: String::new(),
            bandwidth: 0.0,
            ttfb: Some(Duration::ZERO),
            delay: 0,
        }
    }

    /// Sentinel record for a bandwidth probe without a usable sample.
    pub fn failed(name: impl Into<String>) -> Self {
        Self {
            bandwidth: FAILED_BANDWIDTH,
            ttfb: None,
            ..Self::named(name)
        }
    }

    /// Sentinel record for a target whose probe task never finished normally.
    pub fn aborted(name: impl Into<String>) -> Self {
        Self {
            delay: DELAY_UNREACHABLE,
            ..Self::failed(name)
        }
    }

    pub fn is_bandwidth_valid(&self) -> bool {
        self.bandwidth >= 0.0 && self.ttfb.is_some()
    }

    pub fn is_reachable(&self) -> bool {
        self.delay != DELAY_UNREACHABLE
    }

    /// TTFB in milliseconds, -1 when absent.
    pub fn ttfb_millis(&self) -> f64 {
        ttfb_millis(self.ttfb)
    }
}

fn ttfb_millis(ttfb: Option<Duration>) -> f64 {
    ttfb.map_or(-1.0, |d| d.as_secs_f64() * 1000.0)
}

fn serialize_ttfb<S: Serializer>(ttfb: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(ttfb_millis(*ttfb))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_measurement_uses_sentinels() {
        let m = Measurement::failed("hk-01");
        assert_eq!(m.bandwidth, FAILED_BANDWIDTH);
        assert!(m.ttfb.is_none());
        assert!(!m.is_bandwidth_valid());
        assert_eq!(m.delay, 0);
    }

    #[test]
    fn zeroed_record_is_consistent() {
        let m = Measurement {
            delay: 42,
            ..Measurement::named("a")
        };
        assert!(m.is_bandwidth_valid());
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["bandwidth"].as_f64(), Some(0.0));
        assert_eq!(v["ttfb_ms"].as_f64(), Some(0.0));
        assert_eq!(v["delay"].as_u64(), Some(42));
    }

    #[test]
    fn aborted_measurement_is_unreachable() {
        let m = Measurement::aborted("hk-01");
        assert!(!m.is_reachable());
        assert!(!m.is_bandwidth_valid());
    }

    #[test]
    fn ttfb_serializes_as_millis_with_sentinel() {
        let ok = Measurement {
            bandwidth: 10.0,
            ttfb: Some(Duration::from_millis(250)),
            ..Measurement::named("a")
        };
        let v = serde_json::to_value(&ok).unwrap();
        assert_eq!(v["ttfb_ms"].as_f64(), Some(250.0));

        let v = serde_json::to_value(Measurement::failed("b")).unwrap();
        assert_eq!(v["ttfb_ms"].as_f64(), Some(-1.0));
        assert_eq!(v["bandwidth"].as_f64(), Some(-1.0));
    }
}
