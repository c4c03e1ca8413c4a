//! Link metrics GC.
//!
//! A metric is disposed only after it was orphaned on two consecutive
//! passes, so series created just before their link registers survive.

use std::collections::{HashMap, HashSet};

use tokio::time::MissedTickBehavior;

use super::registry::LinkRegistry;
use crate::metrics::link_id_of_metric;

pub(crate) async fn run(registry: LinkRegistry) {
    let close = registry.env().close.clone();
    let mut ticker = tokio::time::interval(registry.config().metrics_gc_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut previous: Option<HashSet<String>> = None;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                previous = Some(registry.gc_link_metrics(previous.as_ref()).await);
            }
            _ = close.closed() => break,
        }
    }
    tracing::debug!("link metrics gc stopped");
}

impl LinkRegistry {
    /// Names of link metrics whose link id is unknown.
    pub async fn get_orphaned_link_metrics(&self) -> HashSet<String> {
        let names = self.env().metrics.names();
        let mut known: HashMap<String, bool> = HashMap::new();
        let mut orphaned = HashSet::new();

        for name in names {
            let Some(link_id) = link_id_of_metric(&name) else {
                continue;
            };
            let is_known = match known.get(link_id) {
                Some(k) => *k,
                None => {
                    let k = self.is_known_link_id(link_id).await;
                    known.insert(link_id.to_string(), k);
                    k
                }
            };
            if !is_known {
                orphaned.insert(name);
            }
        }
        orphaned
    }

    /// Dispose metrics orphaned now and in `previous`. Returns the orphans
    /// still waiting for confirmation.
    pub async fn gc_link_metrics(&self, previous: Option<&HashSet<String>>) -> HashSet<String> {
        let mut orphaned = self.get_orphaned_link_metrics().await;

        if let Some(previous) = previous {
            let confirmed: Vec<String> = orphaned.intersection(previous).cloned().collect();
            for name in &confirmed {
                self.env().metrics.dispose(name);
                orphaned.remove(name);
            }
            if !confirmed.is_empty() {
                tracing::info!(disposed = confirmed.len(), "disposed orphaned link metrics");
            }
        }

        orphaned
    }
}
