//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `COSTCALC_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `COSTCALC_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `COSTCALC_UPSTREAMS__SERVING_URL=http://serving:8080` sets the `upstreams.serving_url` field.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! COSTCALC_PORT=8080
//! COSTCALC_PROMETHEUS_URL=http://prometheus-operated:9090
//! COSTCALC_FACTOR_QUERIES__USER_PROCESS='sum(increase(process_runs{user="$user_id"}[$__range])) / sum(increase(process_runs[$__range]))'
//! COSTCALC_PREFETCH=true
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "COSTCALC_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults defined in the `Default` implementation, so a partial YAML file is
/// enough to start the service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Base URL of the Prometheus HTTP API
    pub prometheus_url: String,
    /// Namespace running the analytics pipelines
    pub namespace_analytics: String,
    /// Namespace running the data imports
    pub namespace_imports: String,
    /// JSON file with the unit prices for CPU, RAM and storage
    pub pricing_model_file_path: String,
    /// Comma-separated pod labels exported into workload queries via `group_left(...)`
    pub custom_prometheus_labels: String,
    /// PromQL queries for the shared-cost factors
    pub factor_queries: FactorQueries,
    /// Workloads whose cost is shared between users
    pub shared_costs: SharedCostSources,
    /// Only export instances writing to this database URL are attributed
    pub serving_timescale_configured_url: String,
    /// Locations of the collaborator services
    pub upstreams: UpstreamsConfig,
    /// Fill the estimation stats cache in the background and never query it on demand
    pub prefetch: bool,
    /// How often the background prefetch refreshes the stats cache
    #[serde(with = "humantime_serde")]
    pub prefetch_interval: Duration,
    /// Lower the default log filter to `debug`
    pub debug: bool,
    /// Skip token parsing and act as this user (local development only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_overwrite_user_id: Option<String>,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// CORS settings for browser clients
    pub cors: CorsConfig,
}

/// PromQL templates for the shared-cost factors.
///
/// `$user_id` is replaced with the requesting user, `$__range` with the length of the window and
/// `$instance_id` (process definition query only) with the instance mapped to the cost source.
/// An empty query is treated as a factor of zero.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FactorQueries {
    pub user_process: String,
    pub process_marshaller: String,
    pub user_marshaller: String,
    pub user_process_definition: String,
    pub user_process_io: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SharedCostSources {
    /// namespace -> pod name patterns of the process engine workloads
    pub process_cost_sources: HashMap<String, Vec<String>>,
    /// namespace -> pod name patterns of the marshaller workloads
    pub marshalling_cost_sources: HashMap<String, Vec<String>>,
    /// namespace -> pod name patterns of the process I/O workloads
    pub process_io_cost_sources: HashMap<String, Vec<String>>,
    /// process cost source short name -> `$instance_id` for the process definition query
    pub process_cost_source_to_instance_id: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamsConfig {
    pub permission_search_url: String,
    pub serving_url: String,
    pub analytics_parsing_url: String,
    pub user_management_url: String,
    /// Timeout applied to every outgoing request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for UpstreamsConfig {
    fn default() -> Self {
        Self {
            permission_search_url: "http://permission-search:8080".to_string(),
            serving_url: "http://serving:8000".to_string(),
            analytics_parsing_url: "http://analytics-parsing:8000".to_string(),
            user_management_url: "http://user-management:8080".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any origin. Empty disables CORS headers.
    pub allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            prometheus_url: "http://localhost:9090".to_string(),
            namespace_analytics: "analytics".to_string(),
            namespace_imports: "imports".to_string(),
            pricing_model_file_path: "pricing_model.json".to_string(),
            custom_prometheus_labels: "label_user,label_flow_id,label_pipeline_id,label_import_id,label_import_type_id"
                .to_string(),
            factor_queries: FactorQueries::default(),
            shared_costs: SharedCostSources::default(),
            serving_timescale_configured_url: String::new(),
            upstreams: UpstreamsConfig::default(),
            prefetch: false,
            prefetch_interval: Duration::from_secs(5 * 60),
            debug: false,
            dev_overwrite_user_id: None,
            enable_metrics: false,
            enable_otel_export: false,
            cors: CorsConfig::default(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate configuration for consistency
    pub fn validate(&self) -> Result<(), Error> {
        if self.port == 0 {
            return Err(Error::Internal {
                operation: "Config validation: port must not be 0".to_string(),
            });
        }

        for (name, value) in [
            ("prometheus_url", &self.prometheus_url),
            ("upstreams.permission_search_url", &self.upstreams.permission_search_url),
            ("upstreams.serving_url", &self.upstreams.serving_url),
            ("upstreams.analytics_parsing_url", &self.upstreams.analytics_parsing_url),
            ("upstreams.user_management_url", &self.upstreams.user_management_url),
        ] {
            Url::parse(value).map_err(|e| Error::Internal {
                operation: format!("Config validation: {name} '{value}' is not a valid URL: {e}"),
            })?;
        }

        if self.prefetch && self.prefetch_interval.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: prefetch_interval must be greater than 0 when prefetch is enabled".to_string(),
            });
        }

        if self.shared_costs.process_cost_source_to_instance_id.keys().any(|k| k.is_empty()) {
            return Err(Error::Internal {
                operation: "Config validation: process_cost_source_to_instance_id contains an empty source name".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can override specific values; COSTCALC_CONFIG names the file itself
            .merge(Env::prefixed("COSTCALC_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The custom label list with whitespace around entries removed.
    pub fn custom_labels(&self) -> String {
        self.custom_prometheus_labels
            .split(',')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(",")
    }
}
