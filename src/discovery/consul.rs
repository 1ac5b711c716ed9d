//! Consul agent backend (HTTP API)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::Serialize;
use tracing::debug;

use crate::error::DiscoveryError;
use super::client::DiscoveryBackend;
use super::types::{CheckProtocol, HealthCheckSpec, ServiceRegistration};

/// Timeout for a single Consul API call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Consul service discovery backend
pub struct ConsulBackend {
    http_client: HttpClient,
    base_url: String,
    token: Option<String>,
}

// Request types (Consul agent API field names)

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceRegistration {
    #[serde(rename = "ID")]
    id: String,
    name: String,
    address: String,
    port: u16,
    check: AgentServiceCheck,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceCheck {
    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    http: Option<String>,
    #[serde(rename = "TCP", skip_serializing_if = "Option::is_none")]
    tcp: Option<String>,
    interval: String,
    timeout: String,
    deregister_critical_service_after: String,
}

impl ConsulBackend {
    /// Create new Consul backend for the agent at `base_url` (e.g. http://consul:8500)
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, DiscoveryError> {
        let http_client = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DiscoveryError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = if base_url.starts_with("http://") || base_url.starts_with("https://") {
            base_url.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", base_url.trim_end_matches('/'))
        };

        Ok(Self {
            http_client,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make an authenticated PUT request to the Consul API
    async fn put<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&T>,
    ) -> Result<reqwest::Response, DiscoveryError> {
        let url = format!("{}/v1{}", self.base_url, path);
        let mut request = self.http_client.put(&url);

        if let Some(ref token) = self.token {
            request = request.header("X-Consul-Token", token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        request
            .send()
            .await
            .map_err(|e| DiscoveryError::Connection(e.to_string()))
    }
}

#[async_trait]
impl DiscoveryBackend for ConsulBackend {
    async fn register(&self, registration: &ServiceRegistration) -> Result<(), DiscoveryError> {
        let payload = to_consul_format(registration);
        debug!(id = %payload.id, "PUT /v1/agent/service/register");

        let response = self.put("/agent/service/register", Some(&payload)).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(rejected(response).await)
        }
    }

    async fn deregister(&self, instance_id: &str) -> Result<(), DiscoveryError> {
        let path = format!("/agent/service/deregister/{}", instance_id);
        let response = self.put::<()>(&path, None).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            // Already removed (e.g. reaped by DeregisterCriticalServiceAfter)
            StatusCode::NOT_FOUND => {
                debug!(instance_id, "Service already absent from Consul");
                Ok(())
            }
            _ => Err(rejected(response).await),
        }
    }
}

async fn rejected(response: reqwest::Response) -> DiscoveryError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    DiscoveryError::Rejected { status, message }
}

fn to_consul_format(registration: &ServiceRegistration) -> AgentServiceRegistration {
    let identity = &registration.identity;
    AgentServiceRegistration {
        id: identity.instance_id().to_string(),
        name: identity.service_name().to_string(),
        address: identity.address().to_string(),
        port: identity.port(),
        check: to_consul_check(&registration.check),
    }
}

fn to_consul_check(check: &HealthCheckSpec) -> AgentServiceCheck {
    let (http, tcp) = match check.protocol {
        CheckProtocol::Http => (
            Some(format!("http://{}/health?service={}", check.target, check.service)),
            None,
        ),
        CheckProtocol::Tcp => (None, Some(check.target.clone())),
    };

    AgentServiceCheck {
        http,
        tcp,
        interval: consul_duration(check.interval),
        timeout: consul_duration(check.timeout),
        deregister_critical_service_after: consul_duration(check.deregister_after),
    }
}

/// Consul duration strings: "10s", "1m", "1500ms"
fn consul_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 || d.as_secs() == 0 {
        format!("{}ms", d.as_millis())
    } else if d.as_secs() % 60 == 0 {
        format!("{}m", d.as_secs() / 60)
    } else {
        format!("{}s", d.as_secs())
    }
}
