use std::fs::File;
use std::io::Write;
use std::path::Path;

use ::time::{format_description::well_known, OffsetDateTime};
use anyhow::{Context, Result};
use serde::Serialize;

use crate::types::{Measurement, RunMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Json,
    Csv,
    Yaml,
}

impl OutputFormat {
    /// Guess the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct RunReport<'a> {
    pub mode: RunMode,
    pub started_at: String,
    pub measurements: &'a [Measurement],
}

pub fn write_results(
    path: &Path,
    format: OutputFormat,
    report: &RunReport<'_>,
) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    match format {
        OutputFormat::Json => serde_json::to_writer_pretty(file, report)?,
        OutputFormat::Yaml => serde_yaml::to_writer(file, report.measurements)?,
        OutputFormat::Csv => write_csv(file, report.measurements)?,
    }
    Ok(())
}

fn write_csv(mut file: File, results: &[Measurement]) -> Result<()> {
    // BOM so spreadsheet tools pick UTF-8 for node names.
    file.write_all(b"\xEF\xBB\xBF")?;

    let mut writer = csv::Writer::from_writer(file);
    writer.write_record([
        "Node",
        "Bandwidth (MB/s)",
        "Latency (ms)",
        "Delay (ms)",
        "IP",
        "Country",
    ])?;
    for m in results {
        let bandwidth = if m.bandwidth < 0.0 {
            "-1".to_string()
        } else {
            format!("{:.2}", m.bandwidth / 1024.0 / 1024.0)
        };
        let latency = format!("{:.0}", m.ttfb_millis());
        let delay = m.delay.to_string();
        writer.write_record([
            m.name.as_str(),
            bandwidth.as_str(),
            latency.as_str(),
            delay.as_str(),
            m.outbound_ip.as_str(),
            m.country.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Current UTC time as RFC 3339.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
