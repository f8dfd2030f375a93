//! Typed client for this service, for other platform services that show or act on costs.
//!
//! ```no_run
//! # async fn example() -> costcalc::errors::Result<()> {
//! use costcalc::client::{CostCalcClient, TreeParams};
//!
//! let client = CostCalcClient::new("http://costcalc:8080", costcalc::clients::http_client(std::time::Duration::from_secs(30))?)?;
//! let tree = client.get_tree("Bearer ...", &TreeParams::default()).await?;
//! println!("{}", tree.cost.month.total());
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use tracing::instrument;
use url::Url;

use crate::{
    clients::{parse_base_url, read_json, send, with_token},
    cost::{CostWithChildren, Estimation},
    errors::{Error, Result},
    types::CostType,
};

const SERVICE: &str = "cost calculator";

/// Query parameters of the tree endpoints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeParams {
    pub skip_estimation: bool,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Another user's tree; the caller must be an admin
    pub for_user: Option<String>,
}

pub struct CostCalcClient {
    client: Client,
    base_url: Url,
}

impl CostCalcClient {
    pub fn new(base_url: &str, client: Client) -> Result<Self> {
        Ok(Self {
            client,
            base_url: parse_base_url(SERVICE, base_url)?,
        })
    }

    /// `base_url` extended by `segments`, each percent-encoded as one path segment.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Internal {
                operation: format!("construct {SERVICE} URL"),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn tree_url(&self, segments: &[&str], params: &TreeParams) -> Result<Url> {
        let mut url = self.url(segments)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("skip_estimation", if params.skip_estimation { "true" } else { "false" });
            if let Some(start) = params.start {
                query.append_pair("start", &start.to_rfc3339_opts(SecondsFormat::Secs, true));
            }
            if let Some(end) = params.end {
                query.append_pair("end", &end.to_rfc3339_opts(SecondsFormat::Secs, true));
            }
            if let Some(user) = &params.for_user {
                query.append_pair("for_user", user);
            }
        }
        Ok(url)
    }

    /// The whole cost tree. A partially computed tree is an error.
    #[instrument(skip(self, token), err)]
    pub async fn get_tree(&self, token: &str, params: &TreeParams) -> Result<CostWithChildren> {
        let url = self.tree_url(&["tree"], params)?;
        let response = send(SERVICE, with_token(self.client.get(url), token)).await?;
        read_json(SERVICE, response).await
    }

    #[instrument(skip(self, token), err)]
    pub async fn get_sub_tree(&self, token: &str, cost_type: CostType, params: &TreeParams) -> Result<CostWithChildren> {
        let url = self.tree_url(&["tree", cost_type.as_str()], params)?;
        let response = send(SERVICE, with_token(self.client.get(url), token)).await?;
        read_json(SERVICE, response).await
    }

    #[instrument(skip(self, token), err)]
    pub async fn get_flow_estimation(&self, token: &str, flow_id: &str) -> Result<Estimation> {
        let url = self.url(&["estimation", "flow", flow_id])?;
        let response = send(SERVICE, with_token(self.client.get(url), token)).await?;
        let estimations: Vec<Estimation> = read_json(SERVICE, response).await?;
        estimations.into_iter().next().ok_or_else(|| Error::UnexpectedResponse {
            service: SERVICE,
            message: format!("no estimation for flow {flow_id}"),
        })
    }

    #[instrument(skip(self, token), err)]
    pub async fn get_flow_estimations(&self, token: &str, flow_ids: &[String]) -> Result<Vec<Estimation>> {
        let url = self.url(&["estimation", "flow"])?;
        let response = send(SERVICE, with_token(self.client.post(url), token).json(flow_ids)).await?;
        read_json(SERVICE, response).await
    }

    #[instrument(skip(self, token), err)]
    pub async fn get_import_estimation(&self, token: &str, import_type_id: &str) -> Result<Estimation> {
        let url = self.url(&["estimation", "import", import_type_id])?;
        let response = send(SERVICE, with_token(self.client.get(url), token)).await?;
        read_json(SERVICE, response).await
    }

    #[instrument(skip(self, token), err)]
    pub async fn get_import_estimations(&self, token: &str, import_type_ids: &[String]) -> Result<Vec<Estimation>> {
        let url = self.url(&["estimation", "import"])?;
        let response = send(SERVICE, with_token(self.client.post(url), token).json(import_type_ids)).await?;
        read_json(SERVICE, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::current_user::test_token,
        clients::{QueryValue, Sample, test_client},
        test_utils::{Fakes, MockMetrics},
    };
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, header, method, path, query_param},
    };

    #[tokio::test]
    async fn test_sub_tree_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tree/API%20Calls"))
            .and(header("authorization", "Bearer t"))
            .and(query_param("skip_estimation", "true"))
            .and(query_param("start", "2024-04-01T00:00:00Z"))
            .and(query_param("end", "2024-04-02T00:00:00Z"))
            .and(query_param("for_user", "u2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "month": {"requests": 3.0},
                "estimation_month": {},
                "children": {"app": {"month": {"requests": 3.0}, "estimation_month": {}}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = CostCalcClient::new(&server.uri(), test_client()).unwrap();
        let params = TreeParams {
            skip_estimation: true,
            start: Some(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2024, 4, 2, 0, 0, 0).unwrap()),
            for_user: Some("u2".to_string()),
        };
        let tree = client.get_sub_tree("Bearer t", CostType::ApiCalls, &params).await.unwrap();
        assert_eq!(tree.cost.month.requests, 3.0);
        assert_eq!(tree.children["app"].cost.month.requests, 3.0);
    }

    #[tokio::test]
    async fn test_estimation_requests() {
        let server = MockServer::start().await;
        let estimation = json!({"min": 1.0, "max": 3.0, "mean": 2.0, "median": 2.0});
        Mock::given(method("GET"))
            .and(path("/estimation/flow/f1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([estimation])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/estimation/import"))
            .and(body_json(json!(["urn:a", "urn:b"])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([estimation, estimation])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/estimation/import/urn:x"))
            .respond_with(ResponseTemplate::new(500).set_body_string("estimation failed"))
            .mount(&server)
            .await;

        let client = CostCalcClient::new(&server.uri(), test_client()).unwrap();
        let flow = client.get_flow_estimation("Bearer t", "f1").await.unwrap();
        assert_eq!(flow.mean, 2.0);

        let imports = client
            .get_import_estimations("Bearer t", &["urn:a".to_string(), "urn:b".to_string()])
            .await
            .unwrap();
        assert_eq!(imports.len(), 2);

        assert!(matches!(
            client.get_import_estimation("Bearer t", "urn:x").await,
            Err(Error::Upstream { .. })
        ));
    }

    #[tokio::test]
    async fn test_against_running_service() {
        let mut fakes = Fakes::default();
        fakes.metrics = Arc::new(MockMetrics::new().on(
            "container_cpu_usage_seconds_total:avg_rate_1h{namespace=\"ana\"}",
            QueryValue::Vector(vec![Sample::new(
                [("namespace", "ana"), ("pod", "p1"), ("container", "c1")],
                0.5,
            )]),
        ));
        let mut state = crate::AppState::builder()
            .config(fakes.config.clone())
            .controller(fakes.controller())
            .build();
        let router = crate::build_router(&mut state).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await });

        let client = CostCalcClient::new(&format!("http://{address}"), test_client()).unwrap();
        let token = test_token(&fakes.user_id, false);

        let params = TreeParams {
            skip_estimation: true,
            ..Default::default()
        };
        let tree = client.get_tree(&token, &params).await.unwrap();
        assert!(tree.children["analytics"].cost.month.cpu > 0.0);

        let analytics = client.get_sub_tree(&token, CostType::Analytics, &params).await.unwrap();
        assert_eq!(analytics, tree.children["analytics"]);

        assert!(matches!(
            client.get_tree("", &params).await,
            Err(Error::Upstream { .. })
        ));
    }
}
