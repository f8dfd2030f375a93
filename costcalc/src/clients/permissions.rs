//! Permission registry search, used to enumerate the resources a user owns.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use url::Url;

use super::{join, parse_base_url, read_json, send, with_token};
use crate::errors::Result;

const SERVICE: &str = "permission search";

/// A page request: `limit` resources of kind `resource`, sorted by id descending, starting after
/// the resource with id `after`.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionQuery {
    pub resource: String,
    pub after: Option<String>,
    pub limit: usize,
    /// Feature path and value that must be equal, e.g. `features.owner_id == <user>`
    pub filter: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResourceRef {
    pub id: String,
}

#[async_trait]
pub trait PermissionSearch: Send + Sync {
    async fn query(&self, token: &str, query: &PermissionQuery) -> Result<Vec<ResourceRef>>;
}

#[derive(Serialize)]
struct QueryMessage<'a> {
    resource: &'a str,
    find: QueryFind<'a>,
}

#[derive(Serialize)]
struct QueryFind<'a> {
    limit: usize,
    offset: usize,
    sort_by: &'a str,
    sort_desc: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    after: Option<ListAfter<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Selection<'a>>,
}

#[derive(Serialize)]
struct ListAfter<'a> {
    id: &'a str,
}

#[derive(Serialize)]
struct Selection<'a> {
    condition: Condition<'a>,
}

#[derive(Serialize)]
struct Condition<'a> {
    feature: &'a str,
    operation: &'a str,
    value: &'a str,
}

impl<'a> From<&'a PermissionQuery> for QueryMessage<'a> {
    fn from(q: &'a PermissionQuery) -> Self {
        QueryMessage {
            resource: &q.resource,
            find: QueryFind {
                limit: q.limit,
                offset: 0,
                sort_by: "id",
                sort_desc: true,
                after: q.after.as_deref().map(|id| ListAfter { id }),
                filter: q.filter.as_ref().map(|(feature, value)| Selection {
                    condition: Condition {
                        feature,
                        operation: "==",
                        value,
                    },
                }),
            },
        }
    }
}

pub struct PermissionSearchReqwest {
    client: Client,
    query_url: Url,
}

impl PermissionSearchReqwest {
    pub fn new(base_url: &str, client: Client) -> Result<Self> {
        let base = parse_base_url(SERVICE, base_url)?;
        Ok(Self {
            client,
            query_url: join(SERVICE, &base, "v3/query")?,
        })
    }
}

#[async_trait]
impl PermissionSearch for PermissionSearchReqwest {
    #[instrument(skip(self, token), fields(resource = %query.resource, after = ?query.after), err)]
    async fn query(&self, token: &str, query: &PermissionQuery) -> Result<Vec<ResourceRef>> {
        let request = with_token(self.client.post(self.query_url.clone()), token).json(&QueryMessage::from(query));
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
        matchers::{body_json, header, method, path},
    };

    #[tokio::test]
    async fn test_query_body_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/query"))
            .and(header("authorization", "Bearer abc"))
            .and(body_json(json!({
                "resource": "devices",
                "find": {
                    "limit": 2,
                    "offset": 0,
                    "sort_by": "id",
                    "sort_desc": true,
                    "after": {"id": "d3"},
                    "filter": {"condition": {"feature": "features.owner_id", "operation": "==", "value": "u1"}}
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "d2", "name": "thermometer"},
                {"id": "d1"}
            ])))
            .mount(&server)
            .await;

        let client = PermissionSearchReqwest::new(&server.uri(), crate::clients::test_client()).unwrap();
        let page = client
            .query(
                "Bearer abc",
                &PermissionQuery {
                    resource: "devices".into(),
                    after: Some("d3".into()),
                    limit: 2,
                    filter: Some(("features.owner_id".into(), "u1".into())),
                },
            )
            .await
            .unwrap();

        assert_eq!(page, vec![ResourceRef { id: "d2".into() }, ResourceRef { id: "d1".into() }]);
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("access denied"))
            .mount(&server)
            .await;

        let client = PermissionSearchReqwest::new(&server.uri(), crate::clients::test_client()).unwrap();
        let query = PermissionQuery {
            resource: "devices".into(),
            after: None,
            limit: 10,
            filter: None,
        };
        assert!(matches!(client.query("", &query).await, Err(Error::Upstream { .. })));
    }
}
