//! HTTP client for the registry daemon.
//!
//! [`RegistryApi`] is the narrow surface the registration agent needs;
//! [`HttpRegistryClient`] implements it over `reqwest` and also carries the
//! operator calls used by the command line.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::ClientId;
use beacon_protocol::{
    routes, ClientEntry, ClientsResponse, DispatchRequest, DispatchResponse, DispatchTarget,
    HeartbeatRequest, IdentitiesResponse, RegisterRequest, StatusResponse,
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{AgentError, Result};

/// Registry calls made by the registration agent.
#[async_trait]
pub trait RegistryApi: Send + Sync + fmt::Debug {
    /// Registers (or re-registers) `identity` at `host:port`.
    async fn register(&self, identity: &ClientId, host: &str, port: u16) -> Result<()>;

    /// Refreshes `identity`. Fails with [`AgentError::UnknownIdentity`] if
    /// the registry does not know it.
    async fn heartbeat(&self, identity: &ClientId) -> Result<()>;
}

/// `reqwest`-backed registry client.
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    client: Client,
    base_url: String,
}

impl HttpRegistryClient {
    /// Creates a client for the registry at `base_url` (e.g. `http://10.0.0.1:4000`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET /identities`
    pub async fn list_identities(&self) -> Result<Vec<ClientId>> {
        let response = self.send(self.client.get(self.url(routes::IDENTITIES))).await?;
        let body: IdentitiesResponse = decode(response).await?;
        Ok(body.identities)
    }

    /// `GET /clients`
    pub async fn list_clients(&self) -> Result<Vec<ClientEntry>> {
        let response = self.send(self.client.get(self.url(routes::CLIENTS))).await?;
        let body: ClientsResponse = decode(response).await?;
        Ok(body.clients)
    }

    /// `POST /dispatch`
    ///
    /// A partially failed broadcast is not an error; inspect
    /// [`DispatchResponse::failed`].
    pub async fn dispatch(&self, target: &DispatchTarget, message: &str) -> Result<DispatchResponse> {
        let request = self
            .client
            .post(self.url(routes::DISPATCH))
            .json(&DispatchRequest::new(target, message));
        let response = self.send(request).await?;
        decode(response).await
    }

    /// Sends a request, turning transport failures and non-2xx answers into errors.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        // Error bodies are `{status:"error", message}`; fall back to the reason phrase
        let message = match response.json::<StatusResponse>().await {
            Ok(StatusResponse {
                message: Some(message),
                ..
            }) => message,
            _ => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };
        Err(AgentError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| AgentError::Decode(e.to_string()))
}

#[async_trait]
impl RegistryApi for HttpRegistryClient {
    async fn register(&self, identity: &ClientId, host: &str, port: u16) -> Result<()> {
        debug!(client_id = %identity, host, port, "Sending registration");
        let request = self
            .client
            .post(self.url(routes::REGISTER))
            .json(&RegisterRequest::new(identity, host, port));
        self.send(request).await?;
        Ok(())
    }

    async fn heartbeat(&self, identity: &ClientId) -> Result<()> {
        let request = self
            .client
            .post(self.url(routes::HEARTBEAT))
            .json(&HeartbeatRequest::new(identity));
        match self.send(request).await {
            Ok(_) => Ok(()),
            Err(AgentError::Rejected { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(AgentError::UnknownIdentity(identity.clone()))
            }
            Err(e) => Err(e),
        }
    }
}
