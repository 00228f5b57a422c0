use anyhow::{Context, Result};
use regex::Regex;

use crate::config::ProxySet;
use crate::types::ProbeTarget;

/// Names in `proxies` matching `pattern`, sorted.
pub fn filter_names(pattern: &str, proxies: &ProxySet) -> Result<Vec<String>> {
    let re = Regex::new(pattern).with_context(|| format!("invalid filter regex: {pattern}"))?;
    let mut names: Vec<String> = proxies.keys().filter(|n| re.is_match(n)).cloned().collect();
    names.sort();
    Ok(names)
}

/// Probe targets for the proxies whose names match `pattern`.
pub fn select_targets(pattern: &str, proxies: &ProxySet) -> Result<Vec<ProbeTarget>> {
    Ok(filter_names(pattern, proxies)?
        .into_iter()
        .filter_map(|name| {
            let connector = proxies.get(&name)?.clone();
            Some(ProbeTarget::new(name, connector))
        })
        .collect())
}
