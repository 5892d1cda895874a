//! HTTP client for the Nomad node API

use super::NodeScheduler;
use crate::error::{Error, Result};
use crate::types::{ClusterNode, DrainRequest};
use async_trait::async_trait;
use reqwest::{Certificate, Client};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const TOKEN_HEADER: &str = "X-Nomad-Token";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DrainSpec {
    /// Nanoseconds, as Go's time.Duration
    deadline: u128,
    ignore_system_jobs: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct NodeDrainBody<'a> {
    #[serde(rename = "NodeID")]
    node_id: &'a str,
    drain_spec: DrainSpec,
    mark_eligible: bool,
}

impl<'a> From<&'a DrainRequest> for NodeDrainBody<'a> {
    fn from(request: &'a DrainRequest) -> Self {
        Self {
            node_id: &request.node_id,
            drain_spec: DrainSpec {
                deadline: request.deadline.as_nanos(),
                ignore_system_jobs: request.ignore_system_jobs,
            },
            mark_eligible: false,
        }
    }
}

/// TLS options for reaching the Nomad API
#[derive(Debug, Default)]
pub struct NomadTls<'a> {
    pub ca_cert: Option<&'a Path>,
    pub skip_verify: bool,
}

/// Client for the Nomad HTTP API
pub struct NomadClient {
    http_client: Client,
    address: String,
    token: String,
}

impl NomadClient {
    pub fn new(
        address: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
        tls: NomadTls<'_>,
    ) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("spotdrain/", env!("CARGO_PKG_VERSION")));

        if let Some(path) = tls.ca_cert {
            let pem = std::fs::read(path).map_err(|e| {
                Error::ConfigError(format!("cannot read Nomad CA cert {}: {e}", path.display()))
            })?;
            let cert = Certificate::from_pem(&pem).map_err(Error::HttpError)?;
            builder = builder.add_root_certificate(cert);
        }
        if tls.skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            http_client: builder.build().map_err(Error::HttpError)?,
            address: address.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }
}

#[async_trait]
impl NodeScheduler for NomadClient {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        let url = format!("{}/v1/nodes", self.address);
        debug!("Listing Nomad nodes from {}", url);

        let response = self
            .http_client
            .get(&url)
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::from_response("list Nomad nodes", response).await);
        }

        response.json().await.map_err(|e| Error::ParseError {
            operation: "list Nomad nodes",
            message: e.to_string(),
        })
    }

    async fn drain_node(&self, request: &DrainRequest) -> Result<()> {
        let url = format!("{}/v1/node/{}/drain", self.address, request.node_id);
        debug!("Requesting drain of Nomad node {}", request.node_id);

        let response = self
            .http_client
            .post(&url)
            .header(TOKEN_HEADER, &self.token)
            .json(&NodeDrainBody::from(request))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::from_response("drain Nomad node", response).await);
        }
        Ok(())
    }
}
