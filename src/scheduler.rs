use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::probe::{probe_bandwidth, probe_delay, DelaySettings, ProbeSettings};
use crate::types::{Measurement, ProbeTarget};

/// Probe every target once with at most `limit` probes in flight.
///
/// - Admission uses a `Semaphore`; a permit is taken before a probe starts
///   and released when its task ends, so a finished probe frees its slot
///   for the next pending target right away.
/// - Results are pushed into one shared `Vec` under a lock held only for the push.
/// - Returns after every probe has finished, in completion order.
/// - A probe task that panics still yields [`Measurement::aborted`] for its target.
pub async fn run_bounded<F, Fut>(targets: &[ProbeTarget], limit: usize, probe: F) -> Vec<Measurement>
where
    F: Fn(ProbeTarget) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Measurement> + Send + 'static,
{
    let total = targets.len() as u64;
    let done = Arc::new(AtomicU64::new(0));
    let collected = Arc::new(Mutex::new(Vec::with_capacity(targets.len())));
    let gate = Arc::new(Semaphore::new(limit.max(1)));
    let probe = Arc::new(probe);

    let mut set = JoinSet::new();
    let mut names = HashMap::with_capacity(targets.len());

    for target in targets {
        let permit = gate
            .clone()
            .acquire_owned()
            .await
            .expect("admission gate is never closed");
        let collected = collected.clone();
        let done = done.clone();
        let probe = probe.clone();
        let target = target.clone();
        let name = target.name.clone();

        let handle = set.spawn(async move {
            let _permit = permit; // released when the probe task ends
            let name = target.name.clone();
            let measurement = (probe.as_ref())(target).await;

            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            info!(proxy = %name, "[{finished}/{total}] probe finished");
            collected.lock().await.push(measurement);
        });
        names.insert(handle.id(), name);
    }

    while let Some(res) = set.join_next_with_id().await {
        match res {
            Ok((id, ())) => {
                names.remove(&id);
            }
            Err(err) => {
                let name = names.remove(&err.id()).unwrap_or_default();
                warn!(proxy = %name, "probe task failed: {err}");
                collected.lock().await.push(Measurement::aborted(name));
            }
        }
    }

    match Arc::try_unwrap(collected) {
        Ok(results) => results.into_inner(),
        Err(shared) => shared.lock().await.clone(),
    }
}

/// Bandwidth run over `targets` with `limit` targets in flight.
pub async fn test_bandwidth(
    targets: &[ProbeTarget],
    limit: usize,
    settings: &ProbeSettings,
) -> Vec<Measurement> {
    let settings = Arc::new(settings.clone());
    run_bounded(targets, limit, move |target| {
        let settings = settings.clone();
        async move { probe_bandwidth(&target, &settings).await }
    })
    .await
}

/// Delay-only run over `targets` with `limit` targets in flight.
pub async fn test_delay(
    targets: &[ProbeTarget],
    limit: usize,
    settings: &DelaySettings,
) -> Vec<Measurement> {
    let settings = Arc::new(settings.clone());
    run_bounded(targets, limit, move |target| {
        let settings = settings.clone();
        async move { probe_delay(&target, &settings).await }
    })
    .await
}
