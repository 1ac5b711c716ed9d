//! Service discovery: registration of this instance with a discovery backend

pub mod types;
pub mod client;
pub mod consul;

pub use types::{CheckProtocol, HealthCheckSpec, RegistrationHandle, ServiceIdentity, ServiceRegistration};
pub use client::{DiscoveryBackend, DiscoveryClient, RetryPolicy};
pub use consul::ConsulBackend;
