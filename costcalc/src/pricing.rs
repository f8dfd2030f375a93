//! Unit prices for the three cost dimensions, loaded once at startup.

use anyhow::Context;
use serde::{Deserialize, Deserializer};
use std::path::Path;

/// RAM and storage prices are quoted per GB-hour while the series report bytes.
pub const BYTES_PER_GB: f64 = 1_000_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PricingModel {
    /// Price per core-hour
    #[serde(rename = "CPU", deserialize_with = "number_or_string")]
    pub cpu: f64,
    /// Price per GB-hour of working-set memory
    #[serde(rename = "RAM", deserialize_with = "number_or_string")]
    pub ram: f64,
    /// Price per GB-hour of requested volume or table size
    #[serde(alias = "Storage", deserialize_with = "number_or_string")]
    pub storage: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| serde::de::Error::custom(format!("'{s}' is not a number: {e}"))),
    }
}

impl PricingModel {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading pricing model {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing pricing model {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let model: Self = serde_json::from_str(raw)?;
        for (name, value) in [("CPU", model.cpu), ("RAM", model.ram), ("storage", model.storage)] {
            anyhow::ensure!(value.is_finite() && value >= 0.0, "{name} price must be a finite, non-negative number");
        }
        Ok(model)
    }

    /// Cost of `cores` average usage sustained for `hours`.
    #[inline]
    pub fn cpu_cost(&self, cores: f64, hours: f64) -> f64 {
        self.cpu * cores * hours
    }

    #[inline]
    pub fn ram_cost(&self, bytes: f64, hours: f64) -> f64 {
        self.ram * bytes * hours / BYTES_PER_GB
    }

    #[inline]
    pub fn storage_cost(&self, bytes: f64, hours: f64) -> f64 {
        self.storage * bytes * hours / BYTES_PER_GB
    }
}
