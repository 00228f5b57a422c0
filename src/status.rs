use anyhow::{bail, Context, Result};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Set of HTTP status codes a reachability check accepts.
///
/// Parsed from a list of codes and inclusive ranges separated by `/` or `,`,
/// e.g. `200/204/300-399`. An empty set accepts every status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusRanges {
    ranges: Vec<RangeInclusive<u16>>,
}

impl StatusRanges {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn contains(&self, code: u16) -> bool {
        self.ranges.is_empty() || self.ranges.iter().any(|r| r.contains(&code))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Parse an expected status specification into [`StatusRanges`].
pub fn parse_status_ranges(s: &str) -> Result<StatusRanges> {
    let mut ranges = Vec::new();

    for raw in s.split(['/', ',']) {
        let item = raw.trim();
        if item.is_empty() {
            continue;
        }

        if let Some((a, b)) = item.split_once('-') {
            let start = parse_status_code(a.trim())
                .with_context(|| format!("invalid start in status range: {item}"))?;
            let end = parse_status_code(b.trim())
                .with_context(|| format!("invalid end in status range: {item}"))?;
            if start > end {
                bail!("invalid status range {start}-{end} (start > end)");
            }
            ranges.push(start..=end);
            continue;
        }

        let code =
            parse_status_code(item).with_context(|| format!("invalid status code: {item}"))?;
        ranges.push(code..=code);
    }

    Ok(StatusRanges { ranges })
}

impl FromStr for StatusRanges {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_status_ranges(s)
    }
}

impl fmt::Display for StatusRanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .ranges
            .iter()
            .map(|r| {
                if r.start() == r.end() {
                    r.start().to_string()
                } else {
                    format!("{}-{}", r.start(), r.end())
                }
            })
            .collect();
        f.write_str(&parts.join("/"))
    }
}

fn parse_status_code(s: &str) -> Result<u16> {
    let val: u16 = s.parse::<u16>().map_err(|e| anyhow::anyhow!(e))?;
    if !(100..=599).contains(&val) {
        bail!("status code out of range: {val}");
    }
    Ok(val)
}
