//! User management: resolves user ids to the usernames the API gateway uses as consumer prefix.

use async_trait::async_trait;
use reqwest::Client;
use tracing::instrument;
use url::Url;

use super::{join, parse_base_url, read_json, send};
use crate::errors::{Error, Result};

const SERVICE: &str = "user management";

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_username(&self, user_id: &str) -> Result<String>;
}

pub struct UserDirectoryReqwest {
    client: Client,
    base_url: Url,
}

impl UserDirectoryReqwest {
    pub fn new(base_url: &str, client: Client) -> Result<Self> {
        Ok(Self {
            client,
            base_url: parse_base_url(SERVICE, base_url)?,
        })
    }
}

#[async_trait]
impl UserDirectory for UserDirectoryReqwest {
    #[instrument(skip(self), err)]
    async fn get_username(&self, user_id: &str) -> Result<String> {
        if user_id.is_empty() {
            return Err(Error::BadRequest {
                message: "no user id provided".to_string(),
            });
        }
        let mut url = join(SERVICE, &self.base_url, "user/id")?;
        url.path_segments_mut()
            .map_err(|_| Error::Internal {
                operation: "construct username URL".to_string(),
            })?
            .push(user_id)
            .push("name");
        let response = send(SERVICE, self.client.get(url)).await?;
        read_json(SERVICE, response).await
    }
}
