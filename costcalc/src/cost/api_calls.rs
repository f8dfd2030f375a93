//! API calls domain: gateway requests of the user's consumers, per client and service.

use tracing::instrument;

use super::{
    Controller,
    model::{CostEntry, CostWithChildren, CostWithEstimation},
    period::{Period, promql_duration},
    promql,
};
use crate::errors::Result;

const CONSUMER_LABEL: &str = "consumer";
const SERVICE_LABEL: &str = "exported_service";

impl Controller {
    /// Consumers are named `<username>_<client>`; the tree is keyed by client, then service.
    #[instrument(skip(self, period), err)]
    pub(crate) async fn api_calls_tree(
        &self,
        username: &str,
        period: &Period,
        skip_estimation: bool,
    ) -> Result<CostWithChildren> {
        let query = promql::api_calls(username, &promql_duration(period.passed()));
        let samples = self.metrics.query(&query, period.end).await?.into_vector()?;
        let multiplier = period.month_multiplier();
        let prefix = format!("{username}_");

        let mut root = CostWithChildren::default();
        for sample in &samples {
            let consumer = sample.require_label(CONSUMER_LABEL)?;
            let client = consumer.strip_prefix(&prefix).unwrap_or(consumer);
            let service = sample.label(SERVICE_LABEL).unwrap_or_default();
            let requests = sample.value();
            let cost = CostWithEstimation {
                month: CostEntry {
                    requests,
                    ..Default::default()
                },
                estimation_month: CostEntry {
                    requests: if skip_estimation {
                        0.0
                    } else {
                        (requests * multiplier).round()
                    },
                    ..Default::default()
                },
            };
            root.add_path(&[client, service], cost);
        }
        Ok(root)
    }
}
