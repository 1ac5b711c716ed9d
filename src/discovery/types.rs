//! Service discovery types

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

/// Who this instance is, as seen by the discovery backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceIdentity {
    service_name: String,
    instance_id: String,
    address: String,
    port: u16,
}

impl ServiceIdentity {
    /// Instance id is `{service}-{host}-{port}`; two processes on one host
    /// cannot hold the same port, so the id is unique per running process.
    pub fn new(service_name: &str, address: &str, port: u16) -> Self {
        Self {
            service_name: service_name.to_string(),
            instance_id: format!("{}-{}-{}", service_name, address, port),
            address: address.to_string(),
            port,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `address:port` target for probes
    pub fn target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// How the discovery backend probes this instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckProtocol {
    /// GET /health?service=<name>, healthy on 2xx
    Http,
    /// Plain TCP connect
    Tcp,
}

impl FromStr for CheckProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(CheckProtocol::Http),
            "tcp" => Ok(CheckProtocol::Tcp),
            other => Err(format!("unknown health check protocol: {}", other)),
        }
    }
}

impl fmt::Display for CheckProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckProtocol::Http => f.write_str("http"),
            CheckProtocol::Tcp => f.write_str("tcp"),
        }
    }
}

/// Health check descriptor sent along with the registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckSpec {
    pub protocol: CheckProtocol,
    pub target: String,
    /// Service name probed on the health endpoint
    pub service: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub deregister_after: Duration,
}

impl HealthCheckSpec {
    pub fn for_identity(
        identity: &ServiceIdentity,
        protocol: CheckProtocol,
        interval: Duration,
        timeout: Duration,
        deregister_after: Duration,
    ) -> Self {
        Self {
            protocol,
            target: identity.target(),
            service: identity.service_name().to_string(),
            interval,
            timeout,
            deregister_after,
        }
    }
}

/// Full registration payload handed to a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    pub identity: ServiceIdentity,
    pub check: HealthCheckSpec,
}

/// Proof of a successful registration; consumed by `DiscoveryClient::deregister`.
///
/// Not `Clone`: there is exactly one per registered instance.
#[derive(Debug)]
pub struct RegistrationHandle {
    instance_id: String,
}

impl RegistrationHandle {
    pub(crate) fn new(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_derivation() {
        let identity = ServiceIdentity::new("inference-service", "node-7", 5000);
        assert_eq!(identity.instance_id(), "inference-service-node-7-5000");
        assert_eq!(identity.target(), "node-7:5000");
    }

    #[test]
    fn test_check_targets_identity() {
        let identity = ServiceIdentity::new("svc", "10.0.0.5", 6000);
        let check = HealthCheckSpec::for_identity(
            &identity,
            CheckProtocol::Http,
            Duration::from_secs(10),
            Duration::from_secs(1),
            Duration::from_secs(60),
        );
        assert_eq!(check.target, "10.0.0.5:6000");
        assert_eq!(check.service, "svc");
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("HTTP".parse::<CheckProtocol>().unwrap(), CheckProtocol::Http);
        assert_eq!(" tcp ".parse::<CheckProtocol>().unwrap(), CheckProtocol::Tcp);
        assert!("grpc+tls".parse::<CheckProtocol>().is_err());
    }
}
