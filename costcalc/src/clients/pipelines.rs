//! Analytics parsing service: pipeline definitions with their operators.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use super::{join, parse_base_url, read_json, send, with_token};
use crate::errors::Result;

const SERVICE: &str = "analytics parsing";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operator {
    /// Operator instance id; pods of this operator run a container named `<prefix>--<id>`
    pub id: String,
    #[serde(default)]
    pub operator_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub flow_id: String,
    #[serde(default)]
    pub operators: Vec<Operator>,
}

#[async_trait]
pub trait Pipelines: Send + Sync {
    /// Fetches a flow's pipeline as `user_id`. Fails when the user can't access the flow.
    async fn get_pipeline(&self, flow_id: &str, user_id: &str, token: &str) -> Result<Pipeline>;
}

pub struct PipelinesReqwest {
    client: Client,
    base_url: Url,
}

impl PipelinesReqwest {
    pub fn new(base_url: &str, client: Client) -> Result<Self> {
        Ok(Self {
            client,
            base_url: parse_base_url(SERVICE, base_url)?,
        })
    }
}

#[async_trait]
impl Pipelines for PipelinesReqwest {
    #[instrument(skip(self, token), err)]
    async fn get_pipeline(&self, flow_id: &str, user_id: &str, token: &str) -> Result<Pipeline> {
        let mut url = join(SERVICE, &self.base_url, "pipe")?;
        url.path_segments_mut()
            .map_err(|_| crate::errors::Error::Internal {
                operation: "construct pipeline URL".to_string(),
            })?
            .push(flow_id);
        let request = with_token(self.client.get(url), token).header("X-UserId", user_id);
        let response = send(SERVICE, request).await?;
        read_json(SERVICE, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path},
    };

    #[tokio::test]
    async fn test_get_pipeline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pipe/flow-1"))
            .and(header("x-userid", "u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pipeline-1",
                "flowId": "flow-1",
                "operators": [{"id": "op-a", "operatorId": "adder"}, {"id": "op-b"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pipe/forbidden"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = PipelinesReqwest::new(&server.uri(), crate::clients::test_client()).unwrap();
        let pipeline = client.get_pipeline("flow-1", "u1", "Bearer t").await.unwrap();
        assert_eq!(pipeline.flow_id, "flow-1");
        assert_eq!(pipeline.operators.len(), 2);
        assert_eq!(pipeline.operators[0].operator_id, "adder");

        let err = client.get_pipeline("forbidden", "u1", "Bearer t").await.unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
    }
}
