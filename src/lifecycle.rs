//! Lifecycle coordinator
//!
//! ```text
//! INIT ─► TRACING_READY ─► MODEL_LOADED ─► LISTENING ─► REGISTERED ─► DRAINING ─► STOPPED
//!            (non-fatal)        │               │  │                      ▲
//!                               └──► FAILED ◄───┘  └── shutdown while ────┘
//!                       (model load, bind, registration)   registering
//! ```
//!
//! Startup runs top-down on the coordinator task. Shutdown is triggered by
//! OS signals that only flip a watch channel; the coordinator task observes
//! the flip and runs deregistration, tracing flush and server drain itself.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::constants::FEATURE_COUNT;
use crate::discovery::{
    DiscoveryBackend, DiscoveryClient, HealthCheckSpec, RegistrationHandle, RetryPolicy,
    ServiceIdentity,
};
use crate::error::{ScoringError, ServiceError};
use crate::health::{HealthRegistry, HealthStatus};
use crate::model::{ScoringAdapter, ScoringModel};
use crate::server::{self, AppState, RequestServer, RunningServer};
use crate::telemetry::Telemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    TracingReady,
    ModelLoaded,
    Listening,
    Registered,
    Draining,
    Stopped,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Init => "INIT",
            LifecycleState::TracingReady => "TRACING_READY",
            LifecycleState::ModelLoaded => "MODEL_LOADED",
            LifecycleState::Listening => "LISTENING",
            LifecycleState::Registered => "REGISTERED",
            LifecycleState::Draining => "DRAINING",
            LifecycleState::Stopped => "STOPPED",
            LifecycleState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

// ============================================================================
// SHUTDOWN SIGNALLING
// ============================================================================

/// Requests shutdown; safe to call any number of times from any task
#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    /// Returns `true` only for the call that actually requested shutdown
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|requested| {
            if *requested {
                false
            } else {
                *requested = true;
                true
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Coordinator side of the shutdown channel
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Resolves once shutdown was requested (or every trigger was dropped)
    pub async fn requested(&mut self) {
        let _ = self.rx.wait_for(|requested| *requested).await;
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownListener) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx: Arc::new(tx) }, ShutdownListener { rx })
}

/// Forward SIGINT/SIGTERM to `trigger`. Repeated signals are logged and ignored.
pub fn spawn_signal_listener(trigger: ShutdownTrigger) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                None
            }
        };

        loop {
            #[cfg(unix)]
            let name = tokio::select! {
                res = tokio::signal::ctrl_c() => match res {
                    Ok(()) => "interrupt",
                    Err(e) => {
                        warn!("Failed to listen for Ctrl+C: {}", e);
                        return;
                    }
                },
                Some(_) = async {
                    match terminate.as_mut() {
                        Some(signal) => signal.recv().await,
                        None => std::future::pending().await,
                    }
                } => "terminate",
            };

            #[cfg(not(unix))]
            let name = match tokio::signal::ctrl_c().await {
                Ok(()) => "interrupt",
                Err(e) => {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
            };

            if trigger.trigger() {
                info!(signal = name, "Shutdown requested");
            } else {
                info!(signal = name, "Shutdown already in progress, ignoring signal");
            }
        }
    })
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Drives startup and shutdown of one service instance
pub struct Coordinator<B> {
    config: Config,
    health: HealthRegistry,
    discovery: DiscoveryClient<B>,
    state_tx: watch::Sender<LifecycleState>,
    telemetry: Telemetry,
    server: Option<RunningServer>,
    registration: Option<RegistrationHandle>,
}

impl<B: DiscoveryBackend> Coordinator<B> {
    pub fn new(config: Config, backend: B) -> Self {
        let retry = RetryPolicy {
            max_attempts: config.register_max_attempts,
            delay: config.register_retry_delay,
        };
        let (state_tx, _) = watch::channel(LifecycleState::Init);

        Self {
            config,
            health: HealthRegistry::new(),
            discovery: DiscoveryClient::new(backend, retry),
            state_tx,
            telemetry: Telemetry::disabled(),
            server: None,
            registration: None,
        }
    }

    /// Registry shared with the request server's health endpoint
    pub fn health(&self) -> HealthRegistry {
        self.health.clone()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.state_tx.send_replace(next);
        info!(from = %previous, to = %next, "Lifecycle transition");
    }

    /// Run the full lifecycle: start up, serve until `shutdown` fires, tear down.
    ///
    /// `load_model` runs on the blocking pool after the tracing pipeline is up.
    pub async fn run<F>(mut self, load_model: F, mut shutdown: ShutdownListener) -> Result<(), ServiceError>
    where
        F: FnOnce() -> Result<Box<dyn ScoringModel>, ScoringError> + Send + 'static,
    {
        info!(service = %self.config.service_name, "Starting inference service");

        // INIT -> TRACING_READY (never fatal)
        self.telemetry = Telemetry::init(
            &self.config.service_name,
            self.config.tracing_endpoint.as_deref(),
        );
        self.transition(LifecycleState::TracingReady);

        // TRACING_READY -> MODEL_LOADED
        let loaded = tokio::task::spawn_blocking(load_model).await;
        let model = match loaded {
            Ok(Ok(model)) => model,
            Ok(Err(e)) => return self.fail(ServiceError::ModelLoad(e)).await,
            Err(e) => {
                let err = ScoringError::Model(format!("model loader panicked: {}", e));
                return self.fail(ServiceError::ModelLoad(err)).await;
            }
        };
        let scorer = Arc::new(ScoringAdapter::new(model, FEATURE_COUNT));
        info!(model = %scorer.describe(), dimensions = scorer.dimensions(), "Model ready");
        self.transition(LifecycleState::ModelLoaded);

        // MODEL_LOADED -> LISTENING
        let started = self.start_server(scorer).await;
        let identity = match started {
            Ok(identity) => identity,
            Err(e) => return self.fail(e).await,
        };
        self.transition(LifecycleState::Listening);

        // LISTENING -> REGISTERED
        let check = HealthCheckSpec::for_identity(
            &identity,
            self.config.check_protocol,
            self.config.check_interval,
            self.config.check_timeout,
            self.config.deregister_after,
        );
        let registered = tokio::select! {
            result = self.discovery.register(&identity, &check) => Some(result),
            _ = shutdown.requested() => None,
        };
        match registered {
            Some(Ok(handle)) => {
                self.registration = Some(handle);
                self.transition(LifecycleState::Registered);
                shutdown.requested().await;
            }
            Some(Err(e)) => return self.fail(ServiceError::Registration(e)).await,
            None => warn!("Shutdown requested while registering, abandoning registration"),
        }

        // REGISTERED (or LISTENING) -> DRAINING
        self.transition(LifecycleState::Draining);
        self.health
            .set_service_and_overall(&self.config.service_name, HealthStatus::NotServing);

        // Discovery first so no new traffic is routed here during the drain
        self.deregister().await;
        self.telemetry.shutdown(self.config.tracing_flush_timeout).await;
        if let Some(server) = self.server.take() {
            let outcome = server.stop(self.config.drain_timeout).await;
            info!(?outcome, "Request server stopped");
        }

        // DRAINING -> STOPPED
        self.transition(LifecycleState::Stopped);
        info!("Inference service stopped");
        Ok(())
    }

    /// Bind, start serving, then mark SERVING. Returns the advertised identity.
    async fn start_server(&mut self, scorer: Arc<ScoringAdapter>) -> Result<ServiceIdentity, ServiceError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.port));
        let state = AppState {
            scorer,
            health: self.health.clone(),
            predict_timeout: self.config.predict_timeout,
        };
        let router = server::create_router(state, self.telemetry.clone());

        let bound = RequestServer::bind(addr, router).await?;
        let port = bound.local_addr().port();
        self.server = Some(bound.start());

        // Listener is bound and the accept loop is running
        self.health
            .set_service_and_overall(&self.config.service_name, HealthStatus::Serving);

        Ok(ServiceIdentity::new(
            &self.config.service_name,
            &self.config.advertise_host,
            port,
        ))
    }

    /// Deregister at most once; later calls are no-ops
    async fn deregister(&mut self) {
        match self.registration.take() {
            Some(handle) => self.discovery.deregister(handle).await,
            None => info!("No active registration, skipping deregistration"),
        }
    }

    /// Tear down whatever was started and end in FAILED
    async fn fail(mut self, err: ServiceError) -> Result<(), ServiceError> {
        error!(state = %self.state(), error = %err, "Fatal lifecycle error");
        self.transition(LifecycleState::Failed);

        if let Some(server) = self.server.take() {
            self.health
                .set_service_and_overall(&self.config.service_name, HealthStatus::NotServing);
            server.stop(self.config.drain_timeout).await;
        }
        self.telemetry.shutdown(self.config.tracing_flush_timeout).await;

        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_is_idempotent() {
        let (trigger, _listener) = shutdown_channel();
        assert!(!trigger.is_triggered());
        assert!(trigger.trigger());
        assert!(!trigger.trigger());
        assert!(!trigger.clone().trigger());
        assert!(trigger.is_triggered());
    }

    #[tokio::test]
    async fn test_listener_wakes_on_trigger() {
        let (trigger, mut listener) = shutdown_channel();
        let waiter = tokio::spawn(async move { listener.requested().await });
        trigger.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_listener_wakes_when_triggers_dropped() {
        let (trigger, mut listener) = shutdown_channel();
        drop(trigger);
        tokio::time::timeout(std::time::Duration::from_secs(1), listener.requested())
            .await
            .unwrap();
    }

    #[test]
    fn test_state_names() {
        assert_eq!(LifecycleState::TracingReady.to_string(), "TRACING_READY");
        assert_eq!(LifecycleState::Failed.to_string(), "FAILED");
    }
}
