//! HTTP adapters for the services the cost engine depends on.
//!
//! Every collaborator is an `async_trait` trait so the engine can be exercised against in-memory
//! fakes; the `*Reqwest` types are the production implementations.

pub mod permissions;
pub mod pipelines;
pub mod prometheus;
pub mod serving;
pub mod users;

use reqwest::{Client, RequestBuilder, Response, header::AUTHORIZATION};
use serde::de::DeserializeOwned;
use std::{sync::Once, time::Duration};
use url::Url;

use crate::errors::{Error, Result};

pub use permissions::{PermissionQuery, PermissionSearch, PermissionSearchReqwest, ResourceRef};
pub use pipelines::{Operator, Pipeline, Pipelines, PipelinesReqwest};
pub use prometheus::{MetricsBackend, PrometheusClient, QueryValue, Sample};
pub use serving::{ExportDatabase, Instance, ServingInstances, ServingInstancesReqwest};
pub use users::{UserDirectory, UserDirectoryReqwest};

/// reqwest is built without a bundled crypto provider, so one has to be installed before the first
/// client is constructed.
pub fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Err means another provider is already installed, which is fine
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

pub fn http_client(timeout: Duration) -> Result<Client> {
    install_crypto_provider();
    Client::builder().timeout(timeout).build().map_err(|e| Error::Internal {
        operation: format!("create HTTP client: {e}"),
    })
}

/// Makes sure a url has a trailing slash.
///
/// `Url::join` replaces the last path segment unless the base ends in `/`, so
/// `http://host/api` + `query` would otherwise become `http://host/query`.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let mut path = new_url.path().to_string();
        path.push('/');
        new_url.set_path(&path);
        new_url
    }
}

pub(crate) fn parse_base_url(service: &'static str, raw: &str) -> Result<Url> {
    Url::parse(raw).map(|u| ensure_slash(&u)).map_err(|e| Error::Internal {
        operation: format!("parse {service} URL '{raw}': {e}"),
    })
}

pub(crate) fn join(service: &'static str, base: &Url, path: &str) -> Result<Url> {
    base.join(path.trim_start_matches('/')).map_err(|e| Error::Internal {
        operation: format!("construct {service} URL for '{path}': {e}"),
    })
}

/// Forwards the caller's `Authorization` header value, if there is one.
pub(crate) fn with_token(request: RequestBuilder, token: &str) -> RequestBuilder {
    if token.is_empty() {
        request
    } else {
        request.header(AUTHORIZATION, token)
    }
}

pub(crate) async fn send(service: &'static str, request: RequestBuilder) -> Result<Response> {
    request.send().await.map_err(|e| {
        tracing::error!("Failed to reach {}: {}", service, e);
        Error::Upstream {
            service,
            message: e.to_string(),
        }
    })
}

/// Checks the status and decodes a JSON body, logging the body when either step fails.
pub(crate) async fn read_json<T: DeserializeOwned>(service: &'static str, response: Response) -> Result<T> {
    let status = response.status();
    let url = response.url().clone();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!("Request to {} failed", service);
        tracing::error!("Url was: {}", url);
        return Err(Error::Upstream {
            service,
            message: format!("{status} - {body}"),
        });
    }

    let body_text = response.text().await.map_err(|e| Error::Upstream {
        service,
        message: e.to_string(),
    })?;
    tracing::trace!("{} response body: {}", service, body_text);

    serde_json::from_str::<T>(&body_text).map_err(|e| {
        tracing::error!("Failed to parse {} response as JSON. Error: {}", service, e);
        tracing::error!("Response body was: {}", body_text);
        Error::UnexpectedResponse {
            service,
            message: format!("error decoding response body: {e}"),
        }
    })
}

#[cfg(test)]
pub(crate) fn test_client() -> Client {
    http_client(Duration::from_secs(5)).expect("test HTTP client")
}
