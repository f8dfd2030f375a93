//! Runs the cost domains concurrently and assembles their branches into one tree.

use bon::Builder;
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use super::{
    PREDICTION_BASIS,
    cache::{FlowCache, StatsCache},
    model::{CostTree, CostWithChildren},
    period::{Clock, Period},
    workloads::WorkloadStats,
};
use crate::{
    clients::{MetricsBackend, PermissionSearch, Pipelines, ServingInstances, UserDirectory},
    config::Config,
    errors::{Error, Result},
    pricing::PricingModel,
    types::CostType,
};

/// Who the tree is for and over which window.
#[derive(Debug, Clone)]
pub struct TreeRequest {
    pub user_id: String,
    /// Caller's `Authorization` header, forwarded to collaborators
    pub token: String,
    pub is_admin: bool,
    pub skip_estimation: bool,
    pub period: Period,
}

impl TreeRequest {
    /// Trailing window the month-end projection is based on, if one is wanted.
    pub fn prediction(&self) -> Option<Duration> {
        if self.skip_estimation { None } else { Some(PREDICTION_BASIS) }
    }
}

/// The cost engine with all its collaborators.
#[derive(Builder)]
pub struct Controller {
    pub(crate) config: Config,
    pub(crate) pricing: PricingModel,
    pub(crate) metrics: Arc<dyn MetricsBackend>,
    pub(crate) permissions: Arc<dyn PermissionSearch>,
    pub(crate) serving: Arc<dyn ServingInstances>,
    pub(crate) pipelines: Arc<dyn Pipelines>,
    pub(crate) users: Arc<dyn UserDirectory>,
    pub(crate) clock: Arc<dyn Clock>,
    #[builder(default)]
    pub(crate) stats_cache: StatsCache,
    #[builder(default)]
    pub(crate) flow_cache: FlowCache,
}

impl Controller {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn workloads(&self) -> WorkloadStats {
        WorkloadStats::new(self.metrics.clone(), self.pricing, self.config.custom_labels())
    }

    /// Computes all six domains concurrently.
    ///
    /// Domains without accrued cost are left out. Failing devices and API call domains are
    /// logged and left out; any other failure is returned next to the domains that did succeed.
    /// Dropping the returned future aborts every domain still running.
    #[instrument(skip_all, fields(user_id = %request.user_id, skip_estimation = request.skip_estimation))]
    pub async fn build_cost_tree(self: &Arc<Self>, request: TreeRequest) -> (CostTree, Option<Error>) {
        let request = Arc::new(request);
        let mut tasks = JoinSet::new();
        for domain in CostType::ALL {
            let controller = Arc::clone(self);
            let request = Arc::clone(&request);
            tasks.spawn(async move { (domain, controller.build_domain_subtree(domain, &request).await) });
        }

        let mut tree = CostTree::new();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((domain, Ok(node))) => {
                    if node.cost.month.is_zero() {
                        debug!(%domain, "no accrued cost, omitting domain");
                    } else {
                        tree.insert(domain.as_str().to_string(), node);
                    }
                    continue;
                }
                Ok((domain @ (CostType::Devices | CostType::ApiCalls), Err(e))) => {
                    warn!(%domain, error = %e, "omitting failed domain from cost tree");
                    continue;
                }
                Ok((_, Err(e))) => e,
                Err(join_error) => Error::Internal {
                    operation: format!("compute cost domain: {join_error}"),
                },
            };
            if first_error.is_none() {
                first_error = Some(failure);
            } else {
                failure.log();
            }
        }
        (tree, first_error)
    }

    /// Computes a single domain's branch, pruned of empty nodes.
    #[instrument(skip(self, request), fields(user_id = %request.user_id), err)]
    pub async fn build_domain_subtree(&self, domain: CostType, request: &TreeRequest) -> Result<CostWithChildren> {
        let period = &request.period;
        let prediction = request.prediction();
        let user_id = request.user_id.as_str();

        let result = match domain {
            CostType::Analytics => self.analytics_tree(user_id, period, prediction).await,
            CostType::Imports => self.imports_tree(user_id, period, prediction).await,
            CostType::Process => self.process_tree(user_id, period, prediction).await,
            CostType::ApiCalls => match self.users.get_username(user_id).await {
                Ok(username) => self.api_calls_tree(&username, period, request.skip_estimation).await,
                Err(e) => {
                    // without a username there are no gateway consumers to bill
                    warn!(error = %e, "username lookup failed, skipping API calls");
                    Ok(CostWithChildren::default())
                }
            },
            CostType::Devices => {
                self.devices_tree(user_id, &request.token, period, request.skip_estimation)
                    .await
            }
            CostType::Exports => {
                self.exports_tree(user_id, &request.token, request.is_admin, period, request.skip_estimation)
                    .await
            }
        };

        let mut node = result.map_err(|e| e.in_domain(domain.as_str()))?;
        node.prune();
        Ok(node)
    }
}
