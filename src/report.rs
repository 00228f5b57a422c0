//! Terminal formatting and ordering of measurements.

use std::cmp::Ordering;
use std::fmt::Write;
use std::time::Duration;

use unicode_general_category::{get_general_category, GeneralCategory};
use unicode_truncate::{Alignment, UnicodeTruncateStr};

use crate::types::{Measurement, DELAY_UNREACHABLE};

const NAME_WIDTH: usize = 42;
const NOT_AVAILABLE: &str = "N/A";

/// Strip symbol characters (emoji included), collapse whitespace runs and trim.
pub fn format_name(name: &str) -> String {
    let kept: String = name.chars().filter(|&c| !is_symbol(c)).collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_symbol(c: char) -> bool {
    matches!(
        get_general_category(c),
        GeneralCategory::MathSymbol
            | GeneralCategory::CurrencySymbol
            | GeneralCategory::ModifierSymbol
            | GeneralCategory::OtherSymbol
    )
}

/// Bytes per second in 1024-based units, `N/A` when not positive.
pub fn format_bandwidth(v: f64) -> String {
    if v <= 0.0 {
        return NOT_AVAILABLE.to_string();
    }
    const UNITS: [&str; 5] = ["B/s", "KB/s", "MB/s", "GB/s", "TB/s"];
    let mut v = v;
    let mut i = 0;
    while v >= 1024.0 && i < UNITS.len() - 1 {
        v /= 1024.0;
        i += 1;
    }
    format!("{:.2}{}", v, UNITS[i])
}

pub fn format_ttfb(ttfb: Option<Duration>) -> String {
    match ttfb {
        Some(d) if !d.is_zero() => format!("{:.2}ms", d.as_secs_f64() * 1000.0),
        _ => NOT_AVAILABLE.to_string(),
    }
}

pub fn format_delay(delay: u16) -> String {
    if delay == DELAY_UNREACHABLE {
        NOT_AVAILABLE.to_string()
    } else {
        delay.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Bandwidth,
    Ttfb,
    Delay,
}

impl SortKey {
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "b" | "bandwidth" => Some(Self::Bandwidth),
            "t" | "ttfb" => Some(Self::Ttfb),
            "d" | "delay" => Some(Self::Delay),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Bandwidth => "bandwidth",
            Self::Ttfb => "ttfb",
            Self::Delay => "delay",
        }
    }
}

/// Sort by bandwidth (descending), TTFB or delay (ascending). Missing TTFB sorts last.
pub fn sort_results(results: &mut [Measurement], key: SortKey) {
    match key {
        SortKey::Bandwidth => results.sort_by(|a, b| b.bandwidth.total_cmp(&a.bandwidth)),
        SortKey::Ttfb => results.sort_by(|a, b| cmp_ttfb(valid_ttfb(a), valid_ttfb(b))),
        SortKey::Delay => results.sort_by_key(|m| m.delay),
    }
}

fn valid_ttfb(m: &Measurement) -> Option<Duration> {
    m.ttfb.filter(|d| !d.is_zero())
}

fn cmp_ttfb(a: Option<Duration>, b: Option<Duration>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn render_bandwidth_table(results: &[Measurement]) -> String {
    let rows = results
        .iter()
        .map(|m| {
            vec![
                format_name(&m.name),
                format_bandwidth(m.bandwidth),
                format_ttfb(m.ttfb),
                m.outbound_ip.clone(),
                m.country.clone(),
            ]
        })
        .collect();
    render_table(&["Node", "Bandwidth", "TTFB", "IP", "Country"], rows)
}

pub fn render_delay_table(results: &[Measurement]) -> String {
    let rows = results
        .iter()
        .map(|m| {
            vec![
                format_name(&m.name),
                format_delay(m.delay),
                m.outbound_ip.clone(),
                m.country.clone(),
            ]
        })
        .collect();
    render_table(&["Node", "Delay(ms)", "IP", "Country"], rows)
}

fn display_width(s: &str) -> usize {
    s.unicode_truncate(usize::MAX).1
}

/// Left-aligned columns separated by two spaces, header underlined with dashes.
/// The first column is capped at the name width.
fn render_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| display_width(h)).collect();
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(display_width(cell));
        }
    }
    if let Some(first) = widths.first_mut() {
        *first = (*first).min(NAME_WIDTH);
    }

    let mut out = String::new();
    let line = |cells: Vec<String>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, &w)| c.unicode_pad(w, Alignment::Left, true).into_owned())
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let _ = writeln!(out, "{}", line(headers.iter().map(|h| h.to_string()).collect()));
    let _ = writeln!(out, "{}", line(widths.iter().map(|&w| "-".repeat(w)).collect()));
    for row in rows {
        let _ = writeln!(out, "{}", line(row));
    }
    out
}
