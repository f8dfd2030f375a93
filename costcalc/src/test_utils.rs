//! In-memory collaborators and fixtures for unit and HTTP tests.

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::{DateTime, TimeZone, Utc};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use uuid::Uuid;

use crate::{
    AppState,
    clients::{
        Instance, MetricsBackend, PermissionQuery, PermissionSearch, Pipeline, Pipelines, QueryValue, ResourceRef,
        ServingInstances, UserDirectory,
    },
    config::Config,
    cost::{Clock, Controller, Period},
    errors::{Error, Result},
    pricing::PricingModel,
};

type Responder = Box<dyn Fn(&str) -> QueryValue + Send + Sync>;

enum Reply {
    Value(QueryValue),
    Fail,
    Dynamic(Responder),
}

/// Metrics backend answering by the first rule whose substring occurs in the query. Unmatched
/// queries get an empty vector.
#[derive(Default)]
pub struct MockMetrics {
    rules: Vec<(String, Reply)>,
    queries: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl MockMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, contains: &str, value: QueryValue) -> Self {
        self.rules.push((contains.to_string(), Reply::Value(value)));
        self
    }

    pub fn fail_on(mut self, contains: &str) -> Self {
        self.rules.push((contains.to_string(), Reply::Fail));
        self
    }

    pub fn respond_with<F>(mut self, contains: &str, responder: F) -> Self
    where
        F: Fn(&str) -> QueryValue + Send + Sync + 'static,
    {
        self.rules.push((contains.to_string(), Reply::Dynamic(Box::new(responder))));
        self
    }

    /// Every query seen so far with its evaluation time.
    pub fn queries(&self) -> Vec<(String, DateTime<Utc>)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsBackend for MockMetrics {
    async fn query(&self, query: &str, time: DateTime<Utc>) -> Result<QueryValue> {
        self.queries.lock().unwrap().push((query.to_string(), time));
        match self.rules.iter().find(|(contains, _)| query.contains(contains.as_str())) {
            Some((_, Reply::Value(value))) => Ok(value.clone()),
            Some((_, Reply::Dynamic(responder))) => Ok(responder(query)),
            Some((_, Reply::Fail)) => Err(Error::Upstream {
                service: "prometheus",
                message: format!("mock failure for {query}"),
            }),
            None => Ok(QueryValue::Vector(vec![])),
        }
    }
}

/// `n` distinct device ids.
pub fn device_ids(n: usize) -> Vec<String> {
    (1..=n as u128)
        .map(|i| format!("urn:infai:ses:device:{}", Uuid::from_u128(i)))
        .collect()
}

/// Permission search over a fixed set of devices, paged by id descending.
#[derive(Default)]
pub struct FakePermissions {
    devices: Mutex<Vec<String>>,
    pages: AtomicUsize,
    failing: AtomicBool,
}

impl FakePermissions {
    pub fn set_devices(&self, mut ids: Vec<String>) {
        ids.sort_by(|a, b| b.cmp(a));
        *self.devices.lock().unwrap() = ids;
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn pages_served(&self) -> usize {
        self.pages.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionSearch for FakePermissions {
    async fn query(&self, _token: &str, query: &PermissionQuery) -> Result<Vec<ResourceRef>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Upstream {
                service: "permission search",
                message: "503 Service Unavailable".to_string(),
            });
        }
        self.pages.fetch_add(1, Ordering::SeqCst);
        let devices = self.devices.lock().unwrap();
        Ok(devices
            .iter()
            .filter(|id| query.after.as_ref().is_none_or(|after| id.as_str() < after.as_str()))
            .take(query.limit)
            .map(|id| ResourceRef { id: id.clone() })
            .collect())
    }
}

#[derive(Default)]
pub struct FakeServing {
    instances: Vec<Instance>,
}

impl FakeServing {
    pub fn new(instances: Vec<Instance>) -> Self {
        Self { instances }
    }
}

#[async_trait]
impl ServingInstances for FakeServing {
    async fn list_instances(&self, _token: &str) -> Result<Vec<Instance>> {
        Ok(self.instances.clone())
    }

    async fn list_instances_as_admin(&self, _token: &str) -> Result<Vec<Instance>> {
        Ok(self.instances.clone())
    }
}

/// Pipelines by flow id; any other flow is refused like an inaccessible one.
#[derive(Default)]
pub struct FakePipelines {
    pipelines: HashMap<String, Pipeline>,
}

impl FakePipelines {
    pub fn new<'a>(pipelines: impl IntoIterator<Item = (&'a str, Pipeline)>) -> Self {
        Self {
            pipelines: pipelines.into_iter().map(|(id, p)| (id.to_string(), p)).collect(),
        }
    }
}

#[async_trait]
impl Pipelines for FakePipelines {
    async fn get_pipeline(&self, flow_id: &str, _user_id: &str, _token: &str) -> Result<Pipeline> {
        self.pipelines.get(flow_id).cloned().ok_or_else(|| Error::Upstream {
            service: "analytics parsing",
            message: format!("404 Not Found - flow {flow_id}"),
        })
    }
}

pub struct FakeUsers {
    name: Option<String>,
}

impl Default for FakeUsers {
    fn default() -> Self {
        Self {
            name: Some("alice".to_string()),
        }
    }
}

impl FakeUsers {
    pub fn unknown() -> Self {
        Self { name: None }
    }
}

#[async_trait]
impl UserDirectory for FakeUsers {
    async fn get_username(&self, user_id: &str) -> Result<String> {
        self.name.clone().ok_or_else(|| Error::Upstream {
            service: "user management",
            message: format!("404 Not Found - user {user_id}"),
        })
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        namespace_analytics: "ana".to_string(),
        namespace_imports: "imp".to_string(),
        serving_timescale_configured_url: "postgres://timescale:5432/exports".to_string(),
        ..Default::default()
    }
}

/// Everything a [`Controller`] needs, replaceable per test before calling [`Fakes::controller`].
pub struct Fakes {
    pub user_id: String,
    /// Halfway through April: 360 hours passed, 360 remaining
    pub now: DateTime<Utc>,
    pub config: Config,
    pub pricing: PricingModel,
    pub metrics: Arc<MockMetrics>,
    pub permissions: Arc<FakePermissions>,
    pub serving: Arc<FakeServing>,
    pub pipelines: Arc<FakePipelines>,
    pub users: Arc<FakeUsers>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            user_id: "5f5a9e8e-0c3b-4a37-9b1e-2d4c6a8f0e11".to_string(),
            now: Utc.with_ymd_and_hms(2024, 4, 16, 0, 0, 0).unwrap(),
            config: create_test_config(),
            pricing: PricingModel {
                cpu: 0.1,
                ram: 0.01,
                storage: 0.0001,
            },
            metrics: Arc::new(MockMetrics::new()),
            permissions: Arc::new(FakePermissions::default()),
            serving: Arc::new(FakeServing::default()),
            pipelines: Arc::new(FakePipelines::default()),
            users: Arc::new(FakeUsers::default()),
        }
    }
}

impl Fakes {
    pub fn passed_hours(&self) -> f64 {
        Period::current_month(self.now).passed_hours()
    }

    pub fn controller(&self) -> Arc<Controller> {
        Arc::new(
            Controller::builder()
                .config(self.config.clone())
                .pricing(self.pricing)
                .metrics(self.metrics.clone())
                .permissions(self.permissions.clone())
                .serving(self.serving.clone())
                .pipelines(self.pipelines.clone())
                .users(self.users.clone())
                .clock(Arc::new(FixedClock(self.now)))
                .build(),
        )
    }

    /// A test server over the full router, backed by these fakes.
    pub fn server(&self) -> TestServer {
        let mut state = AppState::builder()
            .config(self.config.clone())
            .controller(self.controller())
            .build();
        let router = crate::build_router(&mut state).expect("router builds");
        TestServer::new(router).expect("test server starts")
    }
}
