//! Instant queries against the Prometheus HTTP API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, de::IgnoredAny};
use serde_with::{DisplayFromStr, serde_as};
use std::{collections::BTreeMap, time::Instant};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{join, parse_base_url, send};
use crate::errors::{Error, Result};

const SERVICE: &str = "prometheus";

/// One series of an instant vector. The label set is the identity of the series.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: BTreeMap<String, String>,
    pub raw_value: f64,
}

impl Sample {
    pub fn new<K: Into<String>, V: Into<String>>(labels: impl IntoIterator<Item = (K, V)>, value: f64) -> Self {
        Self {
            labels: labels.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            raw_value: value,
        }
    }

    /// The sample value with NaN treated as "no contribution".
    pub fn value(&self) -> f64 {
        nan_to_zero(self.raw_value)
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    /// Looks up a label the query guarantees, failing with an upstream error if it is missing.
    pub fn require_label(&self, name: &str) -> Result<&str> {
        self.label(name).ok_or_else(|| Error::UnexpectedResponse {
            service: SERVICE,
            message: format!("sample is missing label '{name}': {:?}", self.labels),
        })
    }
}

pub fn nan_to_zero(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Vector(Vec<Sample>),
    Scalar(f64),
}

impl QueryValue {
    pub fn into_vector(self) -> Result<Vec<Sample>> {
        match self {
            QueryValue::Vector(v) => Ok(v),
            QueryValue::Scalar(s) => Err(Error::UnexpectedResponse {
                service: SERVICE,
                message: format!("expected a vector, got scalar {s}"),
            }),
        }
    }

    /// The scalar value, NaN coerced to zero.
    pub fn into_scalar(self) -> Result<f64> {
        match self {
            QueryValue::Scalar(s) => Ok(nan_to_zero(s)),
            QueryValue::Vector(v) => Err(Error::UnexpectedResponse {
                service: SERVICE,
                message: format!("expected a scalar, got a vector of {} samples", v.len()),
            }),
        }
    }
}

/// A metrics backend that evaluates PromQL at a point in time.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    async fn query(&self, query: &str, time: DateTime<Utc>) -> Result<QueryValue>;
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct Point(f64, #[serde_as(as = "DisplayFromStr")] f64);

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: Point,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Vector(Vec<VectorSample>),
    Scalar(Point),
    Matrix(IgnoredAny),
    String(IgnoredAny),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    status: String,
    data: Option<QueryData>,
    error_type: Option<String>,
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

pub struct PrometheusClient {
    client: Client,
    query_url: Url,
}

impl PrometheusClient {
    pub fn new(base_url: &str, client: Client) -> Result<Self> {
        let base = parse_base_url(SERVICE, base_url)?;
        let query_url = join(SERVICE, &base, "api/v1/query")?;
        Ok(Self { client, query_url })
    }

    async fn run(&self, query: &str, time: DateTime<Utc>) -> Result<QueryValue> {
        let mut url = self.query_url.clone();
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("time", &format!("{:.3}", time.timestamp_millis() as f64 / 1000.0));

        let response = send(SERVICE, self.client.get(url)).await?;
        let status = response.status();
        let body = response.text().await.map_err(|e| Error::Upstream {
            service: SERVICE,
            message: e.to_string(),
        })?;

        // Prometheus answers errors with a JSON envelope too, so decode before checking status
        let parsed: ApiResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::error!("Failed to parse prometheus response as JSON. Error: {}", e);
            tracing::error!("Response body was: {}", body);
            if status.is_success() {
                Error::UnexpectedResponse {
                    service: SERVICE,
                    message: format!("error decoding response body: {e}"),
                }
            } else {
                Error::Upstream {
                    service: SERVICE,
                    message: format!("{status} - {body}"),
                }
            }
        })?;

        if !parsed.warnings.is_empty() {
            warn!(warnings = ?parsed.warnings, "prometheus returned warnings");
        }

        if parsed.status != "success" || !status.is_success() {
            return Err(Error::Upstream {
                service: SERVICE,
                message: format!(
                    "{status} {}: {}",
                    parsed.error_type.unwrap_or_default(),
                    parsed.error.unwrap_or_default()
                ),
            });
        }

        match parsed.data {
            Some(QueryData::Vector(samples)) => Ok(QueryValue::Vector(
                samples
                    .into_iter()
                    .map(|s| Sample {
                        labels: s.metric,
                        raw_value: s.value.1,
                    })
                    .collect(),
            )),
            Some(QueryData::Scalar(Point(_, value))) => Ok(QueryValue::Scalar(value)),
            Some(QueryData::Matrix(_)) | Some(QueryData::String(_)) | None => Err(Error::UnexpectedResponse {
                service: SERVICE,
                message: format!("query returned neither vector nor scalar: {query}"),
            }),
        }
    }
}

#[async_trait]
impl MetricsBackend for PrometheusClient {
    #[instrument(skip(self), err)]
    async fn query(&self, query: &str, time: DateTime<Utc>) -> Result<QueryValue> {
        let started = Instant::now();
        let result = self.run(query, time).await;
        metrics::histogram!("costcalc_prometheus_query_duration_seconds").record(started.elapsed().as_secs_f64());
        if result.is_err() {
            metrics::counter!("costcalc_prometheus_query_errors_total").increment(1);
        }
        debug!(elapsed = ?started.elapsed(), "prometheus query finished");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, query_param},
    };

    fn client(server: &MockServer) -> PrometheusClient {
        PrometheusClient::new(&server.uri(), crate::clients::test_client()).unwrap()
    }

    #[tokio::test]
    async fn test_vector_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .and(query_param("query", "up"))
            .and(query_param("time", "1700000000.000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {
                    "resultType": "vector",
                    "result": [
                        {"metric": {"namespace": "ana", "pod": "p1"}, "value": [1700000000.0, "0.5"]},
                        {"metric": {"namespace": "ana", "pod": "p2"}, "value": [1700000000.0, "NaN"]}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let time = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let samples = client(&server).query("up", time).await.unwrap().into_vector().unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].label("pod"), Some("p1"));
        assert_eq!(samples[0].value(), 0.5);
        assert!(samples[1].raw_value.is_nan());
        assert_eq!(samples[1].value(), 0.0);
    }

    #[tokio::test]
    async fn test_scalar_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"resultType": "scalar", "result": [1700000000.0, "0.25"]},
                "warnings": ["PromQL info: something"]
            })))
            .mount(&server)
            .await;

        let value = client(&server).query("scalar(x)", Utc::now()).await.unwrap();
        assert_eq!(value.clone().into_scalar().unwrap(), 0.25);
        assert!(matches!(value.into_vector(), Err(Error::UnexpectedResponse { .. })));
    }

    #[tokio::test]
    async fn test_error_envelope_becomes_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "status": "error",
                "errorType": "bad_data",
                "error": "parse error at char 3"
            })))
            .mount(&server)
            .await;

        let err = client(&server).query("((", Utc::now()).await.unwrap_err();
        match err {
            Error::Upstream { service, message } => {
                assert_eq!(service, "prometheus");
                assert!(message.contains("parse error"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_matrix_is_unexpected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"resultType": "matrix", "result": []}
            })))
            .mount(&server)
            .await;

        let err = client(&server).query("up[5m]", Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse { .. }));
    }

    #[test]
    fn test_require_label() {
        let sample = Sample::new([("pod", "p1")], 1.0);
        assert_eq!(sample.require_label("pod").unwrap(), "p1");
        assert!(matches!(sample.require_label("namespace"), Err(Error::UnexpectedResponse { .. })));
    }
}
