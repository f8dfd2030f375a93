//! The cost attribution engine.
//!
//! Raw series from the metrics backend are priced with the [`PricingModel`](crate::pricing::PricingModel)
//! and folded into [`CostWithChildren`] trees, one per [`CostType`](crate::types::CostType):
//!
//! - [`workloads`] turns container CPU, RAM and volume series into per-container stats
//! - [`tree`] groups those stats by label into a hierarchy
//! - the domain modules ([`domains`], [`process`], [`devices`], [`exports`], [`api_calls`])
//!   each produce one branch
//! - [`controller`] runs the domains concurrently and assembles the tree
//! - [`estimation`] summarises cluster-wide stats into per-flow and per-import estimates

pub mod api_calls;
pub mod cache;
pub mod controller;
pub mod devices;
pub mod domains;
pub mod estimation;
pub mod exports;
pub mod model;
pub mod period;
pub mod process;
pub mod promql;
pub mod stats;
pub mod tree;
pub mod workloads;

pub use controller::{Controller, TreeRequest};
pub use model::{CostEntry, CostTree, CostWithChildren, CostWithEstimation, Estimation};
pub use period::{Clock, Period, SystemClock};
pub use workloads::{Stat, WorkloadFilter};

use std::time::Duration;

/// Window the month-end projection extrapolates from.
pub const PREDICTION_BASIS: Duration = Duration::from_secs(24 * 60 * 60);
