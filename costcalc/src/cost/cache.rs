//! Cluster-wide workload stats, cached for the estimation endpoints and optionally refreshed in
//! the background.

use moka::future::Cache;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::{
    Controller, PREDICTION_BASIS,
    model::Estimation,
    period::Period,
    workloads::{Stat, WorkloadFilter},
};
use crate::errors::{Error, Result};

const STATS_TTL: Duration = Duration::from_secs(15 * 60);
const FLOW_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterStats {
    Analytics,
    Imports,
}

#[derive(Clone)]
pub struct StatsCache(pub(crate) Cache<ClusterStats, Arc<Vec<Stat>>>);

impl Default for StatsCache {
    fn default() -> Self {
        Self(Cache::builder().max_capacity(2).time_to_live(STATS_TTL).build())
    }
}

/// Estimates per flow id, shared by every user that can see the flow.
#[derive(Clone)]
pub struct FlowCache(pub(crate) Cache<String, Estimation>);

impl Default for FlowCache {
    fn default() -> Self {
        Self(Cache::builder().max_capacity(10_000).time_to_live(FLOW_TTL).build())
    }
}

impl Controller {
    /// Every workload of the namespace with a 24h projection, regardless of user.
    fn cluster_filter(&self, which: ClusterStats) -> WorkloadFilter {
        let namespace = match which {
            ClusterStats::Analytics => &self.config.namespace_analytics,
            ClusterStats::Imports => &self.config.namespace_imports,
        };
        WorkloadFilter::builder()
            .namespace(namespace.as_str())
            .cpu(true)
            .ram(true)
            .storage(true)
            .prediction_based_on(PREDICTION_BASIS)
            .build()
    }

    /// Cached cluster stats. With prefetch enabled only the background task fills the cache.
    pub(crate) async fn cluster_stats(&self, which: ClusterStats) -> Result<Arc<Vec<Stat>>> {
        if let Some(stats) = self.stats_cache.0.get(&which).await {
            return Ok(stats);
        }
        if self.config.prefetch {
            return Err(Error::CacheNotReady);
        }
        self.refresh_cluster_stats(which).await
    }

    #[instrument(skip(self), err)]
    pub(crate) async fn refresh_cluster_stats(&self, which: ClusterStats) -> Result<Arc<Vec<Stat>>> {
        let period = Period::current_month(self.now());
        let stats = Arc::new(self.workloads().stats(&self.cluster_filter(which), &period).await?);
        debug!(count = stats.len(), "cluster stats refreshed");
        self.stats_cache.0.insert(which, Arc::clone(&stats)).await;
        Ok(stats)
    }

    /// Refreshes both cluster stats.
    pub async fn prefetch(&self) -> Result<()> {
        tokio::try_join!(
            self.refresh_cluster_stats(ClusterStats::Analytics),
            self.refresh_cluster_stats(ClusterStats::Imports),
        )?;
        Ok(())
    }

    /// Refreshes the cluster stats immediately and then every `interval` until `shutdown` fires.
    /// A failed refresh is logged and retried on the next tick.
    pub async fn run_prefetch(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        info!(?interval, "starting cluster stats prefetch");
        loop {
            if let Err(e) = self.prefetch().await {
                e.log();
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("cluster stats prefetch stopped");
    }
}
