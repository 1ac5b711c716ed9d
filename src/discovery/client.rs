//! Discovery client: bounded-retry registration, best-effort deregistration

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::DiscoveryError;
use super::types::{HealthCheckSpec, RegistrationHandle, ServiceIdentity, ServiceRegistration};

/// Trait for service discovery backends
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// Register (or re-register) a service instance
    async fn register(&self, registration: &ServiceRegistration) -> Result<(), DiscoveryError>;

    /// Deregister a service instance; unknown ids should succeed
    async fn deregister(&self, instance_id: &str) -> Result<(), DiscoveryError>;
}

#[async_trait]
impl<B: DiscoveryBackend + ?Sized> DiscoveryBackend for Arc<B> {
    async fn register(&self, registration: &ServiceRegistration) -> Result<(), DiscoveryError> {
        (**self).register(registration).await
    }

    async fn deregister(&self, instance_id: &str) -> Result<(), DiscoveryError> {
        (**self).deregister(instance_id).await
    }
}

/// Fixed-delay, bounded retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Registers this instance with a discovery backend
pub struct DiscoveryClient<B> {
    backend: B,
    retry: RetryPolicy,
}

impl<B: DiscoveryBackend> DiscoveryClient<B> {
    pub fn new(backend: B, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Register with up to `max_attempts` tries, sleeping `delay` between them.
    ///
    /// Sleeps on the calling task only; request handling is unaffected.
    pub async fn register(
        &self,
        identity: &ServiceIdentity,
        check: &HealthCheckSpec,
    ) -> Result<RegistrationHandle, DiscoveryError> {
        let registration = ServiceRegistration {
            identity: identity.clone(),
            check: check.clone(),
        };
        let attempts = self.retry.max_attempts.max(1);

        info!(
            service_id = identity.instance_id(),
            target = %check.target,
            protocol = %check.protocol,
            "Registering service with discovery backend"
        );

        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.backend.register(&registration).await {
                Ok(()) => {
                    info!(
                        service_id = identity.instance_id(),
                        attempt,
                        "Service registered successfully"
                    );
                    return Ok(RegistrationHandle::new(identity.instance_id()));
                }
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Registration attempt failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }

        Err(DiscoveryError::RetriesExhausted {
            attempts,
            last_error,
        })
    }

    /// Best-effort deregistration: failures are logged, never returned.
    ///
    /// Takes the handle by value, so one registration is deregistered at most once.
    pub async fn deregister(&self, handle: RegistrationHandle) {
        let service_id = handle.instance_id();
        info!(service_id, "Deregistering service from discovery backend");

        match self.backend.deregister(service_id).await {
            Ok(()) => info!(service_id, "Service deregistered"),
            Err(e) => warn!(service_id, error = %e, "Failed to deregister service, continuing shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::types::CheckProtocol;
    use parking_lot::Mutex;

    /// Fails the first `failures` registrations, then succeeds
    #[derive(Default)]
    struct FlakyBackend {
        failures: u32,
        register_calls: Mutex<u32>,
        deregistered: Mutex<Vec<String>>,
        deregister_fails: bool,
    }

    #[async_trait]
    impl DiscoveryBackend for FlakyBackend {
        async fn register(&self, _registration: &ServiceRegistration) -> Result<(), DiscoveryError> {
            let mut calls = self.register_calls.lock();
            *calls += 1;
            if *calls <= self.failures {
                Err(DiscoveryError::Connection("connection refused".into()))
            } else {
                Ok(())
            }
        }

        async fn deregister(&self, instance_id: &str) -> Result<(), DiscoveryError> {
            self.deregistered.lock().push(instance_id.to_string());
            if self.deregister_fails {
                Err(DiscoveryError::Connection("agent gone".into()))
            } else {
                Ok(())
            }
        }
    }

    fn fixture() -> (ServiceIdentity, HealthCheckSpec) {
        let identity = ServiceIdentity::new("svc", "host", 5000);
        let check = HealthCheckSpec::for_identity(
            &identity,
            CheckProtocol::Http,
            Duration::from_secs(10),
            Duration::from_secs(1),
            Duration::from_secs(60),
        );
        (identity, check)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy { max_attempts: 5, delay: Duration::from_secs(3) }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_last_allowed_attempt() {
        let backend = Arc::new(FlakyBackend { failures: 4, ..Default::default() });
        let client = DiscoveryClient::new(backend.clone(), policy());
        let (identity, check) = fixture();

        let started = tokio::time::Instant::now();
        let handle = client.register(&identity, &check).await.unwrap();

        assert_eq!(handle.instance_id(), "svc-host-5000");
        assert_eq!(*backend.register_calls.lock(), 5);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(12) && elapsed < Duration::from_secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_exact_attempt_budget() {
        let backend = Arc::new(FlakyBackend { failures: u32::MAX, ..Default::default() });
        let client = DiscoveryClient::new(backend.clone(), policy());
        let (identity, check) = fixture();

        let started = tokio::time::Instant::now();
        let err = client.register(&identity, &check).await.unwrap_err();

        assert_eq!(*backend.register_calls.lock(), 5);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(12) && elapsed < Duration::from_secs(13));
        match err {
            DiscoveryError::RetriesExhausted { attempts, last_error } => {
                assert_eq!(attempts, 5);
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("Expected RetriesExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_delay_policy() {
        let backend = Arc::new(FlakyBackend { failures: 2, ..Default::default() });
        let client = DiscoveryClient::new(
            backend.clone(),
            RetryPolicy { max_attempts: 3, delay: Duration::ZERO },
        );
        let (identity, check) = fixture();
        tokio_test::assert_ok!(client.register(&identity, &check).await);
        assert_eq!(*backend.register_calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_deregister_failure_is_swallowed() {
        let backend = Arc::new(FlakyBackend { deregister_fails: true, ..Default::default() });
        let client = DiscoveryClient::new(backend.clone(), policy());
        let (identity, check) = fixture();

        let handle = client.register(&identity, &check).await.unwrap();
        client.deregister(handle).await;

        assert_eq!(*backend.deregistered.lock(), vec!["svc-host-5000".to_string()]);
    }
}
