//! Expected monthly cost of flows and imports, derived from what comparable workloads cost across
//! the cluster.

use futures::future::try_join_all;
use std::collections::HashMap;
use tracing::{debug, instrument};

use super::{Controller, cache::ClusterStats, model::Estimation, stats::calc_stats};
use crate::errors::{Error, Result};

const FLOW_ID_LABEL: &str = "label_flow_id";
const IMPORT_TYPE_LABEL: &str = "label_import_type_id";

/// Operator containers are named `<prefix>--<operator id>`.
const OPERATOR_SEPARATOR: &str = "--";

impl Controller {
    /// Estimations for `flow_ids`, in request order.
    ///
    /// Pipelines are fetched on every call since that is what checks the user may see them.
    #[instrument(skip(self, token), err)]
    pub async fn flow_estimations(&self, user_id: &str, token: &str, flow_ids: &[String]) -> Result<Vec<Estimation>> {
        let pipelines = try_join_all(
            flow_ids
                .iter()
                .map(|flow_id| self.pipelines.get_pipeline(flow_id, user_id, token)),
        )
        .await?;

        let mut cached = Vec::with_capacity(flow_ids.len());
        for flow_id in flow_ids {
            match self.flow_cache.0.get(flow_id).await {
                Some(estimation) => cached.push(estimation),
                None => break,
            }
        }
        if cached.len() == flow_ids.len() {
            debug!("all flow estimations cached");
            return Ok(cached);
        }

        let stats = self.cluster_stats(ClusterStats::Analytics).await?;
        let mut operator_samples: HashMap<String, Vec<f64>> = HashMap::new();
        let mut flow_samples: HashMap<String, Vec<f64>> = HashMap::new();
        for stat in stats.iter() {
            let total = stat.cost.estimation_month.total();
            if let Some(container) = stat.label("container").filter(|c| c.contains(OPERATOR_SEPARATOR)) {
                let parts: Vec<&str> = container.split(OPERATOR_SEPARATOR).collect();
                let [_, operator] = parts.as_slice() else {
                    return Err(Error::UnexpectedResponse {
                        service: "prometheus",
                        message: format!("container name is not formatted correctly: '{container}'"),
                    });
                };
                operator_samples.entry(operator.to_string()).or_default().push(total);
            } else if let Some(flow_id) = stat.label(FLOW_ID_LABEL) {
                flow_samples.entry(flow_id.to_string()).or_default().push(total);
            } else {
                return Err(Error::UnexpectedResponse {
                    service: "prometheus",
                    message: format!("stat has neither an operator container nor a flow id: {:?}", stat.labels),
                });
            }
        }

        let summarise = |samples: HashMap<String, Vec<f64>>| -> HashMap<String, Estimation> {
            samples.into_iter().map(|(id, data)| (id, calc_stats(data))).collect()
        };
        let operators = summarise(operator_samples);
        let flows = summarise(flow_samples);

        let mut estimations = Vec::with_capacity(pipelines.len());
        for (flow_id, pipeline) in flow_ids.iter().zip(&pipelines) {
            let mut estimation = Estimation::default();
            for operator in &pipeline.operators {
                if let Some(e) = operators.get(&operator.id) {
                    estimation += *e;
                }
            }
            if let Some(e) = flows.get(&pipeline.flow_id) {
                estimation += *e;
            }
            self.flow_cache.0.insert(flow_id.clone(), estimation).await;
            estimations.push(estimation);
        }
        Ok(estimations)
    }

    /// Estimation for one import type, from every running import of that type.
    #[instrument(skip(self), err)]
    pub async fn import_estimation(&self, import_type_id: &str) -> Result<Estimation> {
        let stats = self.cluster_stats(ClusterStats::Imports).await?;
        let label = import_type_id.replace(':', "_");
        let data = stats
            .iter()
            .filter(|stat| stat.label(IMPORT_TYPE_LABEL) == Some(label.as_str()))
            .map(|stat| stat.cost.estimation_month.total())
            .collect();
        Ok(calc_stats(data))
    }

    pub async fn import_estimations(&self, import_type_ids: &[String]) -> Result<Vec<Estimation>> {
        let mut estimations = Vec::with_capacity(import_type_ids.len());
        for id in import_type_ids {
            estimations.push(self.import_estimation(id).await?);
        }
        Ok(estimations)
    }
}
