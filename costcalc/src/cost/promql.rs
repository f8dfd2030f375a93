//! PromQL templates for every series the engine reads.

use std::collections::BTreeMap;

/// Label name -> accepted values. More than one value is matched as a regex alternative.
pub type LabelMatchers = BTreeMap<String, Vec<String>>;

/// Pod selectors are configured as name patterns, so they are always regex matched.
const POD_LABEL: &str = "pod";

/// Renders matchers as a selector suffix: `, k="v"` or `, k=~"a|b"` per non-empty entry.
pub fn label_filter(labels: &LabelMatchers) -> String {
    let mut out = String::new();
    for (key, values) in labels {
        match values.as_slice() {
            [] => continue,
            [single] if key != POD_LABEL => out.push_str(&format!(", {key}=\"{single}\"")),
            many => out.push_str(&format!(", {key}=~\"{}\"", many.join("|"))),
        }
    }
    out
}

/// A cost dimension of workload series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Cpu,
    Ram,
    Storage,
}

/// Selects the workloads of one query: an optional namespace plus `kube_pod_labels` matchers.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadSelector<'a> {
    pub namespace: Option<&'a str>,
    pub labels: &'a LabelMatchers,
    /// Pod labels copied onto the result series, comma separated
    pub custom_labels: &'a str,
}

impl WorkloadSelector<'_> {
    fn namespace_matcher(&self) -> String {
        match self.namespace {
            Some(ns) => format!("namespace=\"{ns}\""),
            None => String::new(),
        }
    }

    fn kube_state_matcher(&self) -> String {
        let mut out = String::from("container=\"kube-state-metrics\"");
        if let Some(ns) = self.namespace {
            out.push_str(&format!(", namespace=\"{ns}\""));
        }
        out
    }

    fn pod_labels(&self) -> String {
        format!(
            "kube_pod_labels{{{}{}}}",
            self.kube_state_matcher(),
            label_filter(self.labels)
        )
    }

    /// Average usage of `dimension` over `range`, joined with the pod labels.
    ///
    /// CPU yields cores, RAM and storage yield bytes.
    pub fn render(&self, dimension: Dimension, range: &str) -> String {
        let ns = self.namespace_matcher();
        let join = format!(
            " * on (namespace, pod) group_left({}) {}",
            self.custom_labels,
            self.pod_labels()
        );
        match dimension {
            Dimension::Cpu => format!(
                "avg_over_time(namespace_pod_container:container_cpu_usage_seconds_total:avg_rate_1h{{{ns}}}[{range}:]){join}"
            ),
            Dimension::Ram => format!(
                "avg_over_time(namespace_pod_container:container_memory_working_set_bytes:avg_1h{{{ns}}}[{range}:]){join}"
            ),
            Dimension::Storage => format!(
                "avg_over_time((namespace_persistentvolumeclaim:kube_persistentvolumeclaim_resource_requests_storage_bytes:avg_1h{{{ns}}})[{range}:]) * on (namespace, persistentvolumeclaim) group_right() kube_pod_spec_volumes_persistentvolumeclaims_info{{{}}}{join}",
                self.kube_state_matcher()
            ),
        }
    }
}

/// Fills the placeholders of a configured factor query.
pub fn factor_query(template: &str, user_id: &str, range: &str) -> String {
    template.replace("$user_id", user_id).replace("$__range", range)
}

fn alternatives(values: &[String]) -> String {
    values.join("|")
}

pub fn device_storage_month(tables: &[String], range: &str) -> String {
    format!(
        "avg_over_time(table:timescale_table_size_bytes:avg_1h{{table=~\"{}\"}}[{range}:])",
        alternatives(tables)
    )
}

pub fn device_storage_prediction(tables: &[String], basis: &str, remaining_secs: i64) -> String {
    format!(
        "predict_linear(table:timescale_table_size_bytes:avg_1h{{table=~\"{}\"}}[{basis}:], {remaining_secs})",
        alternatives(tables)
    )
}

pub fn device_requests(device_ids: &[String], range: &str) -> String {
    format!(
        "round(sum_over_time(device_id:connector_source_received_device_msg_size_count:sum_increase_1h{{device_id=~\"{}\"}}[{range}])) != 0",
        alternatives(device_ids)
    )
}

pub fn export_storage_month(tables: &[String], range: &str) -> String {
    format!(
        "avg_over_time(avg by (table) (timescale_table_size_bytes{{table=~\"{}\"}})[{range}:])",
        alternatives(tables)
    )
}

pub fn export_storage_prediction(tables: &[String], basis: &str, remaining_secs: i64) -> String {
    format!(
        "predict_linear(avg by (table) (timescale_table_size_bytes{{table=~\"{}\"}})[{basis}:], {remaining_secs})",
        alternatives(tables)
    )
}

/// Gateway requests per service of every consumer belonging to `username`.
pub fn api_calls(username: &str, range: &str) -> String {
    format!(
        "round(sum by (exported_service, consumer) (increase(kong_http_requests_total{{consumer=~\"{username}_.*\"}}[{range}]))) != 0"
    )
}
