//! Devices domain: storage of each device's timescale tables and the messages it sent.

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
    clients::{PermissionQuery, ResourceRef, Sample},
    errors::{Error, Result},
    types::{long_id, shorten_id},
};

pub const DEVICE_ID_PREFIX: &str = "urn:infai:ses:device:";
pub const PAGE_SIZE: usize = 5000;

const TABLE_LABEL: &str = "table";
const DEVICE_ID_LABEL: &str = "device_id";

static DEVICE_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("device:(.{22})_service:(.{22}).*").expect("valid regex"));

/// Full device id for a series label: either a device id already or a device table name.
fn device_for(label: &str) -> Result<String> {
    if label.starts_with(DEVICE_ID_PREFIX) {
        return Ok(label.to_string());
    }
    let unexpected = || Error::UnexpectedResponse {
        service: "prometheus",
        message: format!("received metric for unexpected table name '{label}'"),
    };
    let short = DEVICE_TABLE
        .captures(label)
        .and_then(|c| c.get(1))
        .ok_or_else(unexpected)?;
    let id = long_id(short.as_str()).map_err(|_| unexpected())?;
    Ok(format!("{DEVICE_ID_PREFIX}{id}"))
}

impl Controller {
    /// Pages through the user's devices, newest id first, and prices each page.
    #[instrument(skip(self, token, period), err)]
    pub(crate) async fn devices_tree(
        &self,
        user_id: &str,
        token: &str,
        period: &Period,
        skip_estimation: bool,
    ) -> Result<CostWithChildren> {
        let mut root = CostWithChildren::default();
        let mut after = None;
        let mut pages = 0;
        loop {
            let query = PermissionQuery {
                resource: "devices".to_string(),
                after: after.take(),
                limit: PAGE_SIZE,
                filter: Some(("features.owner_id".to_string(), user_id.to_string())),
            };
            let page = self.permissions.query(token, &query).await?;
            pages += 1;
            if !page.is_empty() {
                self.add_device_page(&mut root, &page, period, skip_estimation).await?;
            }
            if page.len() < PAGE_SIZE {
                break;
            }
            after = page.last().map(|device| device.id.clone());
        }
        debug!(pages, devices = root.children.len(), "device costs collected");
        Ok(root)
    }

    async fn add_device_page(
        &self,
        root: &mut CostWithChildren,
        page: &[ResourceRef],
        period: &Period,
        skip_estimation: bool,
    ) -> Result<()> {
        let device_ids: Vec<String> = page.iter().map(|d| d.id.clone()).collect();
        let tables = page
            .iter()
            .map(|d| {
                shorten_id(&d.id)
                    .map(|short| format!("device:{short}.*"))
                    .map_err(|e| Error::UnexpectedResponse {
                        service: "permission search",
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let passed = promql_duration(period.passed());
        let passed_hours = period.passed_hours();
        let remaining_hours = period.remaining_hours();

        // average size per table over the window
        let month_query = promql::device_storage_month(&tables, &passed);
        let mut sizes: BTreeMap<String, f64> = BTreeMap::new();
        for sample in self.metrics.query(&month_query, period.end).await?.into_vector()? {
            let table = sample.require_label(TABLE_LABEL)?.to_string();
            *sizes.entry(table).or_insert(0.0) += sample.value();
        }

        let mut predicted: HashMap<String, f64> = HashMap::new();
        if !skip_estimation {
            let query = promql::device_storage_prediction(
                &tables,
                &promql_std_duration(PREDICTION_BASIS),
                period.remaining().num_seconds(),
            );
            for sample in self.metrics.query(&query, period.now).await?.into_vector()? {
                predicted.insert(sample.require_label(TABLE_LABEL)?.to_string(), sample.value());
            }
        }

        for (table, bytes) in &sizes {
            let month = self.pricing.storage_cost(*bytes, passed_hours);
            let mut cost = CostWithEstimation {
                month: CostEntry {
                    storage: month,
                    ..Default::default()
                },
                ..Default::default()
            };
            if !skip_estimation {
                // tables are assumed to grow linearly towards the predicted size
                let future = predicted.get(table).map_or(*bytes, |p| (p + bytes) / 2.0);
                cost.estimation_month.storage = month + self.pricing.storage_cost(future, remaining_hours);
            }
            root.add_path(&[&device_for(table)?], cost);
        }

        let requests_query = promql::device_requests(&device_ids, &passed);
        let multiplier = period.month_multiplier();
        for sample in self.metrics.query(&requests_query, period.end).await?.into_vector()? {
            let device = device_for(sample.require_label(DEVICE_ID_LABEL)?)?;
            root.add_path(&[&device], requests_cost(&sample, skip_estimation, multiplier));
        }
        Ok(())
    }
}

fn requests_cost(sample: &Sample, skip_estimation: bool, multiplier: f64) -> CostWithEstimation {
    let requests = sample.value();
    CostWithEstimation {
        month: CostEntry {
            requests,
            ..Default::default()
        },
        estimation_month: CostEntry {
            requests: if skip_estimation { 0.0 } else { requests * multiplier },
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clients::QueryValue,
        test_utils::{Fakes, MockMetrics, device_ids},
    };
    use std::sync::Arc;

    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    /// Answers the month storage query with a 1 GiB table for every device it asks for.
    fn storage_per_device(query: &str) -> QueryValue {
        if !query.starts_with("avg_over_time(table:timescale_table_size_bytes") {
            return QueryValue::Vector(vec![]);
        }
        let start = query.find("=~\"").map(|i| i + 3).unwrap_or(0);
        let end = query[start..].find('"').map(|i| start + i).unwrap_or(start);
        let samples = query[start..end]
            .split('|')
            .filter_map(|pattern| pattern.strip_prefix("device:")?.strip_suffix(".*"))
            .map(|short| {
                let table = format!("device:{short}_service:{}", "s".repeat(22));
                Sample::new([("table", table)], GIB)
            })
            .collect();
        QueryValue::Vector(samples)
    }

    #[test]
    fn test_device_for_table() {
        assert_eq!(
            device_for("device:3WnqDfVTQzaA839FZ_hcew_service:3WnqDfVTQzaA839FZ_hcew").unwrap(),
            "urn:infai:ses:device:dd69ea0d-f553-4336-80f3-7f4567f85c7b"
        );
        assert_eq!(device_for("urn:infai:ses:device:x").unwrap(), "urn:infai:ses:device:x");
        assert!(device_for("unrelated_table").is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_paged_devices_all_appear_once() {
        let mut fakes = Fakes::default();
        fakes.permissions.set_devices(device_ids(12_000));
        fakes.metrics = Arc::new(MockMetrics::new().respond_with("timescale_table_size_bytes", storage_per_device));
        let controller = fakes.controller();
        let period = Period::current_month(fakes.now);

        let tree = controller
            .devices_tree(&fakes.user_id, "Bearer t", &period, true)
            .await
            .unwrap();

        assert_eq!(tree.children.len(), 12_000);
        assert_eq!(fakes.permissions.pages_served(), 3);
        let expected = 12_000.0 * controller.pricing.storage_cost(GIB, period.passed_hours());
        assert!((tree.cost.month.storage - expected).abs() < 1e-6 * expected);
        assert!(tree.cost.estimation_month.is_zero());
    }

    #[tokio::test]
    async fn test_storage_projection_and_requests() {
        let device = "urn:infai:ses:device:dd69ea0d-f553-4336-80f3-7f4567f85c7b";
        let table = "device:3WnqDfVTQzaA839FZ_hcew_service:3WnqDfVTQzaA839FZ_hcew";
        let mut fakes = Fakes::default();
        fakes.permissions.set_devices(vec![device.to_string()]);
        fakes.metrics = Arc::new(
            MockMetrics::new()
                .on("predict_linear", QueryValue::Vector(vec![Sample::new([("table", table)], 3e9)]))
                .on("avg_over_time", QueryValue::Vector(vec![Sample::new([("table", table)], 1e9)]))
                .on(
                    "connector_source_received_device_msg_size_count",
                    QueryValue::Vector(vec![Sample::new([("device_id", device)], 100.0)]),
                ),
        );
        let controller = fakes.controller();
        let period = Period::current_month(fakes.now);

        let tree = controller
            .devices_tree(&fakes.user_id, "Bearer t", &period, false)
            .await
            .unwrap();

        let node = &tree.children[device];
        let month = controller.pricing.storage_cost(1e9, period.passed_hours());
        let future = controller.pricing.storage_cost(2e9, period.remaining_hours());
        assert!((node.cost.month.storage - month).abs() < 1e-9);
        assert!((node.cost.estimation_month.storage - (month + future)).abs() < 1e-9);
        assert_eq!(node.cost.month.requests, 100.0);
        assert!((node.cost.estimation_month.requests - 100.0 * period.month_multiplier()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_devices_means_no_queries() {
        let fakes = Fakes::default();
        let controller = fakes.controller();
        let period = Period::current_month(fakes.now);

        let tree = controller
            .devices_tree(&fakes.user_id, "Bearer t", &period, false)
            .await
            .unwrap();
        assert!(tree.is_empty());
        assert!(fakes.metrics.queries().is_empty());
    }
}
