//! # costcalc: per-tenant cost attribution
//!
//! `costcalc` tells every user of a multi-tenant data platform what their share of the cluster
//! costs this month, and what it will cost by the end of the month if usage continues as it has
//! over the last day.
//!
//! ## Overview
//!
//! Usage comes from Prometheus: container CPU and working-set memory, persistent volume requests,
//! device and export table sizes, and API gateway request counters. Each series is priced with a
//! [`PricingModel`](pricing::PricingModel) and attributed to a user either directly, through a
//! pod label, or through a shared-cost factor query that says which fraction of a shared
//! workload a user caused.
//!
//! The result is a cost tree with six top-level domains: `analytics`, `imports`, `process`,
//! `API Calls`, `Devices` and `Exports`. Every node carries the month-to-date cost and, unless
//! the caller asks to skip it, a month-end projection.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum). There is no database: everything
//! is computed on request from the metrics backend and four collaborator services, all reached
//! over HTTP through [`clients`].
//!
//! - The **API layer** ([`api`]) exposes the cost trees and the estimation endpoints.
//! - The **authentication layer** ([`auth`]) reads the caller from the gateway-verified token.
//! - The **cost engine** ([`cost`]) runs the domains concurrently, assembles the tree and keeps
//!   the cluster-wide stats behind the estimations in a cache, optionally refreshed in the
//!   background.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use costcalc::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = costcalc::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     costcalc::telemetry::init_telemetry(config.debug, config.enable_otel_export)?;
//!
//!     let app = Application::new(config)?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod client;
pub mod clients;
pub mod config;
pub mod cost;
pub mod errors;
mod openapi;
pub mod pricing;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;
pub mod types;

use axum::{
    Router,
    http::{self, HeaderValue},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    api::handlers::{costs, estimations, health},
    clients::{
        PermissionSearchReqwest, PipelinesReqwest, PrometheusClient, ServingInstancesReqwest, UserDirectoryReqwest,
        http_client,
    },
    cost::{Controller, SystemClock},
    openapi::ApiDoc,
    pricing::PricingModel,
};

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .controller(controller)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub controller: Arc<Controller>,
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let origins = &config.cors.allowed_origins;
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let mut values = Vec::with_capacity(origins.len());
        for origin in origins {
            values.push(origin.parse::<HeaderValue>()?);
        }
        AllowOrigin::list(values)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE]))
}

/// Build the application router with all endpoints and middleware.
///
/// Besides the API routes this mounts the Scalar docs at `/docs`, the Prometheus endpoint at
/// `/internal/metrics` when `enable_metrics` is set, CORS and request tracing.
///
/// # Errors
///
/// Returns an error if the CORS configuration is invalid.
#[instrument(skip_all)]
pub fn build_router(state: &mut AppState) -> anyhow::Result<Router> {
    let router = Router::new()
        .route("/tree", get(costs::get_cost_tree))
        .route("/tree/{cost_type}", get(costs::get_domain_tree))
        .route("/estimation/flow", post(estimations::post_flow_estimations))
        .route("/estimation/flow/{id}", get(estimations::get_flow_estimation))
        .route("/estimation/import", post(estimations::post_import_estimations))
        .route("/estimation/import/{id}", get(estimations::get_import_estimation))
        .route("/health", get(health::health))
        .with_state(state.clone())
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The service with its collaborators wired up.
///
/// 1. **Create**: [`Application::new`] loads the pricing model and builds the HTTP clients and
///    the cost engine
/// 2. **Serve**: [`Application::serve`] binds to a TCP port, starts the stats prefetch if enabled
///    and handles requests
/// 3. **Shutdown**: when the shutdown signal is received, in-flight requests finish, the prefetch
///    stops and telemetry is flushed
pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
}

impl Application {
    /// Create a new application instance with all collaborators initialized
    pub fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting cost calculator with configuration: {:#?}", config);

        let pricing = PricingModel::load(&config.pricing_model_file_path)?;
        info!(cpu = pricing.cpu, ram = pricing.ram, storage = pricing.storage, "Loaded pricing model");

        let client = http_client(config.upstreams.request_timeout)?;
        let upstreams = &config.upstreams;
        let controller = Controller::builder()
            .config(config.clone())
            .pricing(pricing)
            .metrics(Arc::new(PrometheusClient::new(&config.prometheus_url, client.clone())?))
            .permissions(Arc::new(PermissionSearchReqwest::new(
                &upstreams.permission_search_url,
                client.clone(),
            )?))
            .serving(Arc::new(ServingInstancesReqwest::new(&upstreams.serving_url, client.clone())?))
            .pipelines(Arc::new(PipelinesReqwest::new(&upstreams.analytics_parsing_url, client.clone())?))
            .users(Arc::new(UserDirectoryReqwest::new(&upstreams.user_management_url, client)?))
            .clock(Arc::new(SystemClock))
            .build();

        let mut app_state = AppState::builder()
            .config(config.clone())
            .controller(Arc::new(controller))
            .build();
        let router = build_router(&mut app_state)?;

        Ok(Self {
            router,
            app_state,
            config,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Cost calculator listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        let shutdown_token = CancellationToken::new();
        let prefetch = self.config.prefetch.then(|| {
            let controller = Arc::clone(&self.app_state.controller);
            tokio::spawn(controller.run_prefetch(self.config.prefetch_interval, shutdown_token.clone()))
        });

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        shutdown_token.cancel();
        if let Some(task) = prefetch {
            info!("Waiting for the stats prefetch to stop...");
            if let Err(e) = task.await {
                tracing::warn!("Stats prefetch task ended abnormally: {}", e);
            }
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
