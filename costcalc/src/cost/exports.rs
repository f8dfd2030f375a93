//! Exports domain: timescale tables written by the user's export instances.

use regex::Regex;
use std::{
    collections::{BTreeMap, HashMap},
    sync::LazyLock,
};
use tracing::{debug, instrument};

use super::{
    Controller, PREDICTION_BASIS,
    model::{CostEntry, CostWithChildren, CostWithEstimation},
    period::{Period, promql_duration, promql_std_duration},
    promql,
};
use crate::{
    clients::Instance,
    errors::{Error, Result},
    types::{long_id, shorten_id},
};

const TABLE_LABEL: &str = "table";

static EXPORT_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("userid:(.{22})_export:(.{22}).*").expect("valid regex"));

/// Export instance id a table belongs to.
fn export_for(table: &str) -> Result<String> {
    let unexpected = || Error::UnexpectedResponse {
        service: "prometheus",
        message: format!("received metric for unexpected table name '{table}'"),
    };
    let short = EXPORT_TABLE
        .captures(table)
        .and_then(|c| c.get(2))
        .ok_or_else(unexpected)?;
    long_id(short.as_str()).map_err(|_| unexpected())
}

fn short(id: &str) -> Result<String> {
    shorten_id(id).map_err(|e| Error::UnexpectedResponse {
        service: "serving",
        message: e.to_string(),
    })
}

impl Controller {
    #[instrument(skip(self, token, period), err)]
    pub(crate) async fn exports_tree(
        &self,
        user_id: &str,
        token: &str,
        is_admin: bool,
        period: &Period,
        skip_estimation: bool,
    ) -> Result<CostWithChildren> {
        let listed = if is_admin {
            self.serving.list_instances_as_admin(token).await?
        } else {
            self.serving.list_instances(token).await?
        };
        let database = self.config.serving_timescale_configured_url.as_str();
        let instances: Vec<Instance> = listed
            .into_iter()
            .filter(|i| i.user_id == user_id && i.export_database.url == database)
            .collect();
        debug!(instances = instances.len(), "export instances in the timescale database");

        let mut root = CostWithChildren::default();
        if instances.is_empty() {
            return Ok(root);
        }

        let short_user = short(user_id)?;
        let tables = instances
            .iter()
            .map(|i| Ok(format!("userid:{short_user}_export:{}", short(&i.id)?)))
            .collect::<Result<Vec<_>>>()?;

        let passed = promql_duration(period.passed());
        let month_query = promql::export_storage_month(&tables, &passed);
        let mut sizes: BTreeMap<String, f64> = BTreeMap::new();
        for sample in self.metrics.query(&month_query, period.end).await?.into_vector()? {
            *sizes.entry(sample.require_label(TABLE_LABEL)?.to_string()).or_insert(0.0) += sample.value();
        }

        let mut predicted: HashMap<String, f64> = HashMap::new();
        if !skip_estimation {
            let query = promql::export_storage_prediction(
                &tables,
                &promql_std_duration(PREDICTION_BASIS),
                period.remaining().num_seconds(),
            );
            for sample in self.metrics.query(&query, period.now).await?.into_vector()? {
                predicted.insert(sample.require_label(TABLE_LABEL)?.to_string(), sample.value());
            }
        }

        for (table, bytes) in &sizes {
            let month = self.pricing.storage_cost(*bytes, period.passed_hours());
            let estimation = if skip_estimation {
                0.0
            } else {
                let future = predicted.get(table).map_or(*bytes, |p| (p + bytes) / 2.0);
                month + self.pricing.storage_cost(future, period.remaining_hours())
            };
            let cost = CostWithEstimation {
                month: CostEntry {
                    storage: month,
                    ..Default::default()
                },
                estimation_month: CostEntry {
                    storage: estimation,
                    ..Default::default()
                },
            };
            root.add_path(&[&export_for(table)?], cost);
        }
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clients::{ExportDatabase, QueryValue, Sample},
        test_utils::{Fakes, FakeServing, MockMetrics},
    };
    use std::sync::Arc;

    const EXPORT: &str = "dd69ea0d-f553-4336-80f3-7f4567f85c7b";

    fn instance(id: &str, user_id: &str, url: &str) -> Instance {
        Instance {
            id: id.to_string(),
            user_id: user_id.to_string(),
            export_database: ExportDatabase { url: url.to_string() },
        }
    }

    fn table(user_id: &str) -> String {
        format!(
            "userid:{}_export:{}",
            shorten_id(user_id).unwrap(),
            shorten_id(EXPORT).unwrap()
        )
    }

    #[tokio::test]
    async fn test_only_own_exports_in_configured_database() {
        let mut fakes = Fakes::default();
        let url = fakes.config.serving_timescale_configured_url.clone();
        let other_user = "0b3a6b4c-8b0d-4f0e-9c3c-2a1b7d5e6f70";
        fakes.serving = Arc::new(FakeServing::new(vec![
            instance(EXPORT, &fakes.user_id, &url),
            instance(other_user, &fakes.user_id, "postgres://elsewhere"),
            instance(other_user, other_user, &url),
        ]));
        let table = table(&fakes.user_id);
        fakes.metrics = Arc::new(
            MockMetrics::new()
                .on("predict_linear", QueryValue::Vector(vec![Sample::new([("table", table.as_str())], 4e9)]))
                .on("avg_over_time", QueryValue::Vector(vec![Sample::new([("table", table.as_str())], 2e9)])),
        );
        let controller = fakes.controller();
        let period = Period::current_month(fakes.now);

        let tree = controller
            .exports_tree(&fakes.user_id, "Bearer t", false, &period, false)
            .await
            .unwrap();

        assert_eq!(tree.children.len(), 1);
        let node = &tree.children[EXPORT];
        let month = controller.pricing.storage_cost(2e9, period.passed_hours());
        let future = controller.pricing.storage_cost(3e9, period.remaining_hours());
        assert!((node.cost.month.storage - month).abs() < 1e-9);
        assert!((node.cost.estimation_month.storage - (month + future)).abs() < 1e-9);

        let queries = fakes.metrics.queries();
        assert_eq!(queries.len(), 2);
        assert!(queries.iter().all(|(q, _)| q.contains(&format!("table=~\"{table}\""))));
    }

    #[tokio::test]
    async fn test_no_matching_instances() {
        let fakes = Fakes::default();
        let controller = fakes.controller();
        let period = Period::current_month(fakes.now);

        let tree = controller
            .exports_tree("not-a-uuid", "Bearer t", true, &period, false)
            .await
            .unwrap();
        assert!(tree.is_empty());
        assert!(fakes.metrics.queries().is_empty());
    }

    #[test]
    fn test_export_for_table() {
        assert_eq!(
            export_for("userid:3WnqDfVTQzaA839FZ_hcew_export:3WnqDfVTQzaA839FZ_hcew_suffix").unwrap(),
            EXPORT
        );
        assert!(export_for("device:3WnqDfVTQzaA839FZ_hcew").is_err());
    }
}
