//! The cost tree returned by the API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{AddAssign, Mul};
use utoipa::ToSchema;

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

/// Amounts per dimension. `cpu`, `ram` and `storage` are monetary, `requests` is a count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CostEntry {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cpu: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ram: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub storage: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub requests: f64,
}

impl CostEntry {
    pub fn is_zero(&self) -> bool {
        self.cpu == 0.0 && self.ram == 0.0 && self.storage == 0.0 && self.requests == 0.0
    }

    /// Sum of the monetary dimensions.
    pub fn total(&self) -> f64 {
        self.cpu + self.ram + self.storage
    }
}

impl AddAssign for CostEntry {
    fn add_assign(&mut self, rhs: Self) {
        self.cpu += rhs.cpu;
        self.ram += rhs.ram;
        self.storage += rhs.storage;
        self.requests += rhs.requests;
    }
}

/// Scales the monetary dimensions; request counts are not shares of anything.
impl Mul<f64> for CostEntry {
    type Output = CostEntry;

    fn mul(self, factor: f64) -> CostEntry {
        CostEntry {
            cpu: self.cpu * factor,
            ram: self.ram * factor,
            storage: self.storage * factor,
            requests: self.requests,
        }
    }
}

/// Accrued cost so far (`month`) and the projected cost at month end (`estimation_month`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CostWithEstimation {
    #[serde(default)]
    pub month: CostEntry,
    #[serde(default)]
    pub estimation_month: CostEntry,
}

impl CostWithEstimation {
    pub fn is_zero(&self) -> bool {
        self.month.is_zero() && self.estimation_month.is_zero()
    }
}

impl AddAssign for CostWithEstimation {
    fn add_assign(&mut self, rhs: Self) {
        self.month += rhs.month;
        self.estimation_month += rhs.estimation_month;
    }
}

impl Mul<f64> for CostWithEstimation {
    type Output = CostWithEstimation;

    fn mul(self, factor: f64) -> CostWithEstimation {
        CostWithEstimation {
            month: self.month * factor,
            estimation_month: self.estimation_month * factor,
        }
    }
}

/// One node of a cost tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CostWithChildren {
    #[serde(flatten)]
    pub cost: CostWithEstimation,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schema(no_recursion)]
    pub children: BTreeMap<String, CostWithChildren>,
}

impl CostWithChildren {
    pub fn leaf(cost: CostWithEstimation) -> Self {
        Self {
            cost,
            children: BTreeMap::new(),
        }
    }

    /// Month and estimation are both zero in every dimension.
    pub fn is_empty(&self) -> bool {
        self.cost.is_zero()
    }

    /// Adds `cost` to this node and to the child at `key`, creating the child when needed.
    pub fn add_to_child(&mut self, key: impl Into<String>, cost: CostWithEstimation) -> &mut CostWithChildren {
        self.cost += cost;
        let child = self.children.entry(key.into()).or_default();
        child.cost += cost;
        child
    }

    /// Adds `cost` to this node and to every node along `path`, creating missing ones.
    pub fn add_path(&mut self, path: &[&str], cost: CostWithEstimation) {
        self.cost += cost;
        if let Some((first, rest)) = path.split_first() {
            self.children.entry((*first).to_string()).or_default().add_path(rest, cost);
        }
    }

    /// Drops every descendant whose month and estimation are all zero.
    pub fn prune(&mut self) {
        self.children.retain(|_, child| {
            child.prune();
            !child.is_empty()
        });
    }
}

/// The full tree, keyed by domain name (`analytics`, `imports`, `process`, `API Calls`,
/// `Devices`, `Exports`).
pub type CostTree = BTreeMap<String, CostWithChildren>;

/// Summary of monthly cost estimates observed across the cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Estimation {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

impl AddAssign for Estimation {
    fn add_assign(&mut self, rhs: Self) {
        self.min += rhs.min;
        self.max += rhs.max;
        self.mean += rhs.mean;
        self.median += rhs.median;
    }
}
