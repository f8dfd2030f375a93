//! Per-container CPU, RAM and volume cost from the kube-state-metrics recording rules.

use bon::Builder;
use std::{
    collections::{BTreeMap, btree_map::Entry},
    sync::Arc,
    time::Duration,
};
use tracing::instrument;

use super::{
    model::{CostEntry, CostWithEstimation},
    period::{Period, promql_duration, promql_std_duration},
    promql::{Dimension, LabelMatchers, WorkloadSelector},
};
use crate::{
    clients::{MetricsBackend, Sample},
    errors::{Error, Result},
    pricing::PricingModel,
};

/// Which workloads to price and which dimensions to include.
#[derive(Debug, Clone, Default, Builder)]
pub struct WorkloadFilter {
    #[builder(into)]
    pub namespace: Option<String>,
    #[builder(default)]
    pub labels: LabelMatchers,
    #[builder(default)]
    pub cpu: bool,
    #[builder(default)]
    pub ram: bool,
    #[builder(default)]
    pub storage: bool,
    /// Extrapolate to month end from usage over this trailing window
    pub prediction_based_on: Option<Duration>,
}

impl WorkloadFilter {
    /// Adds a label matcher.
    pub fn with_label(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.labels.insert(key.into(), values);
        self
    }
}

/// Cost of one container (or of a pod's volumes), with the labels of its series.
#[derive(Debug, Clone, PartialEq)]
pub struct Stat {
    pub labels: BTreeMap<String, String>,
    pub cost: CostWithEstimation,
}

impl Stat {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

/// Prices workload series with the pricing model.
pub struct WorkloadStats {
    backend: Arc<dyn MetricsBackend>,
    pricing: PricingModel,
    custom_labels: String,
}

impl Dimension {
    fn get(self, entry: &CostEntry) -> f64 {
        match self {
            Dimension::Cpu => entry.cpu,
            Dimension::Ram => entry.ram,
            Dimension::Storage => entry.storage,
        }
    }

    fn set(self, entry: &mut CostEntry, value: f64) {
        match self {
            Dimension::Cpu => entry.cpu = value,
            Dimension::Ram => entry.ram = value,
            Dimension::Storage => entry.storage = value,
        }
    }

    fn price(self, pricing: &PricingModel, value: f64, hours: f64) -> f64 {
        match self {
            Dimension::Cpu => pricing.cpu_cost(value, hours),
            Dimension::Ram => pricing.ram_cost(value, hours),
            Dimension::Storage => pricing.storage_cost(value, hours),
        }
    }
}

impl WorkloadStats {
    pub fn new(backend: Arc<dyn MetricsBackend>, pricing: PricingModel, custom_labels: impl Into<String>) -> Self {
        Self {
            backend,
            pricing,
            custom_labels: custom_labels.into(),
        }
    }

    /// One stat per namespace, pod and container matched by `filter`.
    ///
    /// Month cost covers `period.start..period.end`. With `prediction_based_on` set, the month
    /// estimate adds the usage rate of that trailing window over the rest of the month.
    #[instrument(skip(self, filter), fields(namespace = ?filter.namespace), err)]
    pub async fn stats(&self, filter: &WorkloadFilter, period: &Period) -> Result<Vec<Stat>> {
        period.check_prediction(filter.prediction_based_on)?;

        let (cpu, ram, storage) = tokio::try_join!(
            self.dimension(filter, period, Dimension::Cpu, filter.cpu),
            self.dimension(filter, period, Dimension::Ram, filter.ram),
            self.dimension(filter, period, Dimension::Storage, filter.storage),
        )?;

        let mut merged: BTreeMap<(String, String, String), Stat> = BTreeMap::new();
        for (dimension, stats) in [(Dimension::Cpu, cpu), (Dimension::Ram, ram), (Dimension::Storage, storage)] {
            merge(&mut merged, dimension, stats)?;
        }
        Ok(merged.into_values().collect())
    }

    async fn dimension(
        &self,
        filter: &WorkloadFilter,
        period: &Period,
        dimension: Dimension,
        enabled: bool,
    ) -> Result<Vec<Stat>> {
        if !enabled {
            return Ok(Vec::new());
        }
        let selector = WorkloadSelector {
            namespace: filter.namespace.as_deref(),
            labels: &filter.labels,
            custom_labels: &self.custom_labels,
        };

        let month_query = selector.render(dimension, &promql_duration(period.passed()));
        let month = self.backend.query(&month_query, period.end).await?.into_vector()?;

        let prediction = match (filter.prediction_based_on, dimension) {
            // volume sizes rarely change, so storage is projected from the month average
            (_, Dimension::Storage) | (None, _) => None,
            (Some(basis), _) => {
                let query = selector.render(dimension, &promql_std_duration(basis));
                let mut samples = self.backend.query(&query, period.now).await?.into_vector()?;
                samples.sort_by(|a, b| a.labels.cmp(&b.labels));
                Some(samples)
            }
        };

        let passed_hours = period.passed_hours();
        let remaining_hours = period.remaining_hours();
        let projecting = filter.prediction_based_on.is_some();

        Ok(month
            .into_iter()
            .map(|sample| {
                let mut cost = CostWithEstimation::default();
                let month_cost = dimension.price(&self.pricing, sample.value(), passed_hours);
                dimension.set(&mut cost.month, month_cost);

                if projecting {
                    let rate = match &prediction {
                        Some(predicted) => predicted
                            .binary_search_by(|p| p.labels.cmp(&sample.labels))
                            .ok()
                            .map(|i| predicted[i].value()),
                        None => Some(sample.value()),
                    };
                    let remainder = rate.map_or(0.0, |r| dimension.price(&self.pricing, r, remaining_hours));
                    dimension.set(&mut cost.estimation_month, month_cost + remainder);
                }

                into_stat(sample, dimension, cost)
            })
            .collect())
    }
}

fn into_stat(sample: Sample, dimension: Dimension, cost: CostWithEstimation) -> Stat {
    let mut labels = sample.labels;
    if dimension == Dimension::Storage {
        // always "kube-state-metrics" after the PVC to pod join
        labels.remove("container");
    }
    Stat { labels, cost }
}

fn merge(into: &mut BTreeMap<(String, String, String), Stat>, dimension: Dimension, stats: Vec<Stat>) -> Result<()> {
    for stat in stats {
        let required = |name: &str| {
            stat.label(name).map(str::to_string).ok_or_else(|| Error::UnexpectedResponse {
                service: "prometheus",
                message: format!("missing {name} in labels {:?}", stat.labels),
            })
        };
        let key = (
            required("namespace")?,
            required("pod")?,
            stat.label("container").unwrap_or_default().to_string(),
        );

        match into.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(stat);
            }
            Entry::Occupied(mut slot) => {
                // same dimension twice on one key: several volumes of one pod
                let existing = slot.get_mut();
                let month = dimension.get(&existing.cost.month) + dimension.get(&stat.cost.month);
                dimension.set(&mut existing.cost.month, month);
                let estimation =
                    dimension.get(&existing.cost.estimation_month) + dimension.get(&stat.cost.estimation_month);
                dimension.set(&mut existing.cost.estimation_month, estimation);
                existing.labels.extend(stat.labels);
            }
        }
    }
    Ok(())
}
