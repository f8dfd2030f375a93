//! Serving service: lists the export instances that write user data into the timescale database.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use super::{join, parse_base_url, read_json, send, with_token};
use crate::errors::Result;

const SERVICE: &str = "serving";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExportDatabase {
    #[serde(rename = "Url", alias = "url", default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Instance {
    #[serde(rename = "ID", alias = "id")]
    pub id: String,
    #[serde(rename = "UserId", alias = "user_id", default)]
    pub user_id: String,
    #[serde(rename = "ExportDatabase", alias = "export_database", default)]
    pub export_database: ExportDatabase,
}

#[async_trait]
pub trait ServingInstances: Send + Sync {
    /// Instances visible to the token's user.
    async fn list_instances(&self, token: &str) -> Result<Vec<Instance>>;
    /// All instances; only valid with an admin token.
    async fn list_instances_as_admin(&self, token: &str) -> Result<Vec<Instance>>;
}

#[derive(Deserialize)]
struct InstancesPage {
    #[serde(default)]
    instances: Vec<Instance>,
}

pub struct ServingInstancesReqwest {
    client: Client,
    base_url: Url,
}

impl ServingInstancesReqwest {
    pub fn new(base_url: &str, client: Client) -> Result<Self> {
        Ok(Self {
            client,
            base_url: parse_base_url(SERVICE, base_url)?,
        })
    }

    fn internal_only(&self, path: &str) -> Result<Url> {
        let mut url = join(SERVICE, &self.base_url, path)?;
        url.query_pairs_mut().append_pair("internal_only", "true");
        Ok(url)
    }
}

#[async_trait]
impl ServingInstances for ServingInstancesReqwest {
    #[instrument(skip_all, err)]
    async fn list_instances(&self, token: &str) -> Result<Vec<Instance>> {
        let url = self.internal_only("instances")?;
        let response = send(SERVICE, with_token(self.client.get(url), token)).await?;
        let page: InstancesPage = read_json(SERVICE, response).await?;
        Ok(page.instances)
    }

    #[instrument(skip_all, err)]
    async fn list_instances_as_admin(&self, token: &str) -> Result<Vec<Instance>> {
        let url = self.internal_only("admin/instances")?;
        let response = send(SERVICE, with_token(self.client.get(url), token)).await?;
        read_json(SERVICE, response).await
    }
}
