//! Process domain: shared process engine, marshaller and process I/O workloads, apportioned to a
//! user by factor queries.

use regex::Regex;
use std::{
    collections::{BTreeMap, HashMap},
    sync::LazyLock,
    time::Duration,
};
use tracing::{debug, instrument};

use super::{
    Controller,
    model::{CostWithChildren, CostWithEstimation},
    period::{Period, promql_duration},
    promql::factor_query,
    workloads::{Stat, WorkloadFilter},
};
use crate::errors::{Error, Result};

pub const MARSHALLING: &str = "marshalling";
pub const PROCESS_IO: &str = "process-io";

const PROCESS_DEFINITION_LABEL: &str = "process_definition_id";

static STATEFUL_SET_ORDINAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-\d+$").expect("valid regex"));

/// Name of the workload a pod belongs to: the StatefulSet ordinal (`-0`) or the Deployment's
/// replica set and pod hashes (`-5d8f9c7b4-x2x7q`) are removed.
pub fn source_name(pod: &str) -> String {
    let parts: Vec<&str> = pod.split('-').collect();
    let suffix_parts = if STATEFUL_SET_ORDINAL.is_match(pod) { 1 } else { 2 };
    let kept = parts.len().saturating_sub(suffix_parts);
    if kept == 0 {
        return pod.to_string();
    }
    parts[..kept].join("-")
}

impl Controller {
    #[instrument(skip(self, period), err)]
    pub(crate) async fn process_tree(
        &self,
        user_id: &str,
        period: &Period,
        prediction: Option<Duration>,
    ) -> Result<CostWithChildren> {
        let queries = &self.config.factor_queries;
        let sources = &self.config.shared_costs;
        let range = promql_duration(period.passed());
        let mut root = CostWithChildren::default();

        let user_process = self.factor(&queries.user_process, user_id, &range, period).await?;
        debug!(user_process, "user process fraction");
        if user_process > 0.0 {
            for (namespace, patterns) in sorted(&sources.process_cost_sources) {
                let stats = self.source_stats(namespace, patterns, period, prediction).await?;

                let mut by_source: BTreeMap<String, CostWithEstimation> = BTreeMap::new();
                for stat in &stats {
                    let pod = stat.label("pod").ok_or_else(|| missing_pod(stat))?;
                    *by_source.entry(source_name(pod)).or_default() += stat.cost * user_process;
                }

                for (name, cost) in by_source {
                    let definitions = self.process_definition_fractions(&name, user_id, &range, period).await?;
                    let child = root.add_to_child(name, cost);
                    for (definition, fraction) in definitions {
                        if fraction != 0.0 {
                            child.children.entry(definition).or_default().cost += cost * fraction;
                        }
                    }
                }
            }
        }

        let user_marshaller = self.factor(&queries.user_marshaller, user_id, &range, period).await?;
        if user_marshaller > 0.0 {
            let process_marshaller = self.factor(&queries.process_marshaller, "", &range, period).await?;
            debug!(user_marshaller, process_marshaller, "marshaller fractions");
            let factor = user_marshaller * process_marshaller;
            if factor != 0.0 {
                let total = self.shared_total(&sources.marshalling_cost_sources, period, prediction).await?;
                root.add_to_child(MARSHALLING, total * factor);
            }
        }

        let user_process_io = self.factor(&queries.user_process_io, user_id, &range, period).await?;
        debug!(user_process_io, "user process io fraction");
        if user_process_io != 0.0 {
            let total = self.shared_total(&sources.process_io_cost_sources, period, prediction).await?;
            root.add_to_child(PROCESS_IO, total * user_process_io);
        }

        Ok(root)
    }

    /// Evaluates a factor query at the end of the window. An unconfigured query is a factor of 0.
    async fn factor(&self, template: &str, user_id: &str, range: &str, period: &Period) -> Result<f64> {
        if template.trim().is_empty() {
            return Ok(0.0);
        }
        let query = factor_query(template, user_id, range);
        self.metrics.query(&query, period.end).await?.into_scalar()
    }

    /// Share of each process definition in a process source's work, summing to 1.
    async fn process_definition_fractions(
        &self,
        source: &str,
        user_id: &str,
        range: &str,
        period: &Period,
    ) -> Result<BTreeMap<String, f64>> {
        let template = &self.config.factor_queries.user_process_definition;
        let Some(instance_id) = self.config.shared_costs.process_cost_source_to_instance_id.get(source) else {
            return Ok(BTreeMap::new());
        };
        if template.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let query = factor_query(&template.replace("$instance_id", instance_id), user_id, range);
        let samples = self.metrics.query(&query, period.end).await?.into_vector()?;

        let mut increases = BTreeMap::new();
        for sample in &samples {
            let definition = sample
                .label(PROCESS_DEFINITION_LABEL)
                .or_else(|| sample.labels.values().next().map(String::as_str));
            if let Some(definition) = definition {
                *increases.entry(definition.to_string()).or_insert(0.0) += sample.value();
            }
        }

        let sum: f64 = increases.values().sum();
        if sum == 0.0 {
            return Ok(BTreeMap::new());
        }
        Ok(increases.into_iter().map(|(k, v)| (k, v / sum)).collect())
    }

    async fn source_stats(
        &self,
        namespace: &str,
        patterns: &[String],
        period: &Period,
        prediction: Option<Duration>,
    ) -> Result<Vec<Stat>> {
        let filter = WorkloadFilter::builder()
            .namespace(namespace)
            .cpu(true)
            .ram(true)
            .storage(true)
            .maybe_prediction_based_on(prediction)
            .build()
            .with_label("pod", patterns.to_vec());
        self.workloads().stats(&filter, period).await
    }

    /// Total cost of all workloads of the given sources.
    async fn shared_total(
        &self,
        sources: &HashMap<String, Vec<String>>,
        period: &Period,
        prediction: Option<Duration>,
    ) -> Result<CostWithEstimation> {
        let mut total = CostWithEstimation::default();
        for (namespace, patterns) in sorted(sources) {
            for stat in self.source_stats(namespace, patterns, period, prediction).await? {
                total += stat.cost;
            }
        }
        Ok(total)
    }
}

fn sorted(sources: &HashMap<String, Vec<String>>) -> Vec<(&String, &Vec<String>)> {
    let mut entries: Vec<_> = sources.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

fn missing_pod(stat: &Stat) -> Error {
    Error::UnexpectedResponse {
        service: "prometheus",
        message: format!("missing pod in labels {:?}", stat.labels),
    }
}
