//! Workload domains: the user's pipelines in the analytics namespace and imports in the imports
//! namespace.

use std::time::Duration;
use tracing::instrument;

use super::{Controller, model::CostWithChildren, period::Period, tree::build_tree, workloads::WorkloadFilter};
use crate::errors::Result;

pub const USER_LABEL: &str = "label_user";
pub const IMPORT_ID_LABEL: &str = "label_import_id";

impl Controller {
    /// Pipeline pods of the user, grouped by pod and container.
    #[instrument(skip(self, period), err)]
    pub(crate) async fn analytics_tree(
        &self,
        user_id: &str,
        period: &Period,
        prediction: Option<Duration>,
    ) -> Result<CostWithChildren> {
        let filter = WorkloadFilter::builder()
            .namespace(self.config.namespace_analytics.as_str())
            .cpu(true)
            .ram(true)
            .storage(true)
            .maybe_prediction_based_on(prediction)
            .build()
            .with_label(USER_LABEL, vec![user_id.to_string()]);
        let stats = self.workloads().stats(&filter, period).await?;
        Ok(build_tree(&stats, &["pod", "container"]))
    }

    /// Import pods of the user, grouped by import. Imports have no volumes.
    #[instrument(skip(self, period), err)]
    pub(crate) async fn imports_tree(
        &self,
        user_id: &str,
        period: &Period,
        prediction: Option<Duration>,
    ) -> Result<CostWithChildren> {
        let filter = WorkloadFilter::builder()
            .namespace(self.config.namespace_imports.as_str())
            .cpu(true)
            .ram(true)
            .maybe_prediction_based_on(prediction)
            .build()
            .with_label(USER_LABEL, vec![user_id.to_string()]);
        let stats = self.workloads().stats(&filter, period).await?;
        Ok(build_tree(&stats, &[IMPORT_ID_LABEL]))
    }
}
