//! Request server
//!
//! ```text
//!  bind() ──► RequestServer ──start()──► RunningServer ──stop(timeout)──► DrainOutcome
//!   (listener bound,          (accept loop,        (listener closed, in-flight
//!    nothing served yet)       one task per conn)   finish or connections aborted)
//! ```

pub mod handlers;
pub mod trace;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
    middleware as axum_middleware,
};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::ServiceError;
use crate::health::HealthRegistry;
use crate::model::ScoringAdapter;
use crate::telemetry::Telemetry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub scorer: Arc<ScoringAdapter>,
    pub health: HealthRegistry,
    pub predict_timeout: Option<Duration>,
}

/// Create the router with all routes
pub fn create_router(state: AppState, telemetry: Telemetry) -> Router {
    Router::new()
        .route("/health", get(handlers::check))
        .route("/predict", post(handlers::predict))
        .route("/v1/predict", post(handlers::predict))
        .layer(axum_middleware::from_fn_with_state(telemetry, trace::trace_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Listener bound, not yet serving
pub struct RequestServer {
    listener: TcpListener,
    router: Router,
    local_addr: SocketAddr,
}

impl RequestServer {
    pub async fn bind(addr: SocketAddr, router: Router) -> Result<Self, ServiceError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServiceError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServiceError::Bind { addr, source })?;

        Ok(Self {
            listener,
            router,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawn the accept loop
    pub fn start(self) -> RunningServer {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(accept_loop(self.listener, self.router, shutdown.clone()));
        tracing::info!("Server listening on http://{}", self.local_addr);

        RunningServer { shutdown, task }
    }
}

/// Accept until `shutdown` fires, then drop the listener and hand back the
/// still-open connections.
async fn accept_loop(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> JoinSet<()> {
    let mut connections = JoinSet::new();

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => continue,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                tracing::trace!(%peer, "Connection accepted");
                connections.spawn(serve_connection(stream, router.clone(), shutdown.clone()));
            }
            Err(e) => {
                tracing::warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }

    connections
}

/// Serve one connection; on shutdown, finish the in-flight request and close
async fn serve_connection(stream: TcpStream, router: Router, shutdown: CancellationToken) {
    let builder = Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(
        TokioIo::new(stream),
        TowerToHyperService::new(router),
    );
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        tracing::debug!("Connection closed with error: {}", e);
    }
}

/// How a drain ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// All in-flight requests finished
    Drained,
    /// Timeout hit; remaining connections were aborted
    ForceClosed,
    /// Accept loop had already failed
    Failed,
}

/// Accept loop running on a tokio task
pub struct RunningServer {
    shutdown: CancellationToken,
    task: JoinHandle<JoinSet<()>>,
}

impl RunningServer {
    /// Stop accepting, wait up to `timeout` for in-flight requests, then abort
    /// every remaining connection.
    pub async fn stop(self, timeout: Duration) -> DrainOutcome {
        self.shutdown.cancel();

        let mut connections = match self.task.await {
            Ok(connections) => connections,
            Err(e) => {
                tracing::error!("Server task failed: {}", e);
                return DrainOutcome::Failed;
            }
        };

        let in_flight = connections.len();
        let drained = tokio::time::timeout(timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        match drained {
            Ok(()) => {
                tracing::info!(connections = in_flight, "Server drained");
                DrainOutcome::Drained
            }
            Err(_) => {
                tracing::warn!(
                    remaining = connections.len(),
                    "Drain timeout ({:?}) reached, closing remaining connections",
                    timeout
                );
                connections.shutdown().await;
                DrainOutcome::ForceClosed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::Notify;
    use tower::ServiceExt;

    use crate::error::ScoringError;
    use crate::health::{HealthStatus, OVERALL};
    use crate::model::{InferenceResult, ScoringModel};

    struct FixedModel(Result<InferenceResult, ScoringError>);

    impl ScoringModel for FixedModel {
        fn predict(&self, _features: &[f32]) -> Result<InferenceResult, ScoringError> {
            self.0.clone()
        }
    }

    struct SlowModel(Duration);

    impl ScoringModel for SlowModel {
        fn predict(&self, _features: &[f32]) -> Result<InferenceResult, ScoringError> {
            std::thread::sleep(self.0);
            Ok(InferenceResult { label: 1, score: None })
        }
    }

    fn state_with(model: Box<dyn ScoringModel>, dims: usize) -> AppState {
        AppState {
            scorer: Arc::new(ScoringAdapter::new(model, dims)),
            health: HealthRegistry::new(),
            predict_timeout: Some(Duration::from_millis(200)),
        }
    }

    fn predict_request(features: &[f32]) -> Request<Body> {
        predict_request_to("/v1/predict", features)
    }

    fn predict_request_to(uri: &str, features: &[f32]) -> Request<Body> {
        let body = serde_json::json!({ "features": features }).to_string();
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_predict_ok() {
        let model = FixedModel(Ok(InferenceResult { label: 1, score: Some(0.12) }));
        let app = create_router(state_with(Box::new(model), 3), Telemetry::disabled());

        let response = app.oneshot(predict_request(&[0.1, 0.2, 0.3])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["prediction"], 1);
        assert!((body["score"].as_f64().unwrap() - 0.12).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_predict_served_on_unversioned_path() {
        let model = FixedModel(Ok(InferenceResult { label: -1, score: Some(-0.3) }));
        let app = create_router(state_with(Box::new(model), 2), Telemetry::disabled());

        let response = app
            .clone()
            .oneshot(predict_request_to("/predict", &[7.0, 9.0]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["prediction"], -1);

        let response = app.oneshot(predict_request_to("/predict", &[7.0])).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_predict_wrong_length_is_bad_request() {
        let model = FixedModel(Ok(InferenceResult { label: 1, score: None }));
        let app = create_router(state_with(Box::new(model), 3), Telemetry::disabled());

        let response = app.oneshot(predict_request(&[0.1, 0.2])).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "expected 3 features, got 2");
    }

    #[tokio::test]
    async fn test_model_error_is_opaque() {
        let model = FixedModel(Err(ScoringError::Model("tree 17 corrupt at node 0x3f".into())));
        let app = create_router(state_with(Box::new(model), 1), Telemetry::disabled());

        let response = app.oneshot(predict_request(&[1.0])).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Internal server error during prediction");
        assert!(!body.to_string().contains("corrupt"));
    }

    #[tokio::test]
    async fn test_slow_model_times_out() {
        let app = create_router(
            state_with(Box::new(SlowModel(Duration::from_millis(800))), 1),
            Telemetry::disabled(),
        );

        let response = app.oneshot(predict_request(&[1.0])).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_health_probe_reflects_registry() {
        let state = state_with(Box::new(FixedModel(Ok(InferenceResult { label: 1, score: None }))), 1);
        let health = state.health.clone();
        let app = create_router(state, Telemetry::disabled());

        let probe = |uri: &str| Request::builder().uri(uri).body(Body::empty()).unwrap();

        let response = app.clone().oneshot(probe("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["status"], "UNKNOWN");

        health.set(OVERALL, HealthStatus::Serving);
        health.set("svc", HealthStatus::NotServing);

        let response = app.clone().oneshot(probe("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "SERVING");

        let response = app.oneshot(probe("/health?service=svc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["status"], "NOT_SERVING");
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let router = Router::new();

        let err = RequestServer::bind(addr, router).await.err().unwrap();
        assert!(matches!(err, ServiceError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_stop_refuses_new_connections() {
        let router = Router::new().route("/ping", get(|| async { "pong" }));
        let server = RequestServer::bind("127.0.0.1:0".parse().unwrap(), router).await.unwrap();
        let addr = server.local_addr();
        let running = server.start();

        assert!(tokio::net::TcpStream::connect(addr).await.is_ok());
        assert_eq!(running.stop(Duration::from_secs(2)).await, DrainOutcome::Drained);
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    /// Route that signals once the handler is running, then sleeps
    fn slow_router(delay: Duration, entered: Arc<Notify>) -> Router {
        Router::new().route(
            "/slow",
            get(move || {
                let entered = entered.clone();
                async move {
                    entered.notify_one();
                    tokio::time::sleep(delay).await;
                    "late"
                }
            }),
        )
    }

    async fn send_slow_request(addr: SocketAddr) -> TcpStream {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /slow HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        client
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_request() {
        let entered = Arc::new(Notify::new());
        let router = slow_router(Duration::from_millis(100), entered.clone());
        let server = RequestServer::bind("127.0.0.1:0".parse().unwrap(), router).await.unwrap();
        let addr = server.local_addr();
        let running = server.start();

        let mut client = send_slow_request(addr).await;
        tokio::time::timeout(Duration::from_secs(2), entered.notified()).await.unwrap();

        assert_eq!(running.stop(Duration::from_secs(2)).await, DrainOutcome::Drained);

        let mut reply = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert!(String::from_utf8_lossy(&reply).starts_with("HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    async fn test_stop_force_closes_after_timeout() {
        let entered = Arc::new(Notify::new());
        let router = slow_router(Duration::from_millis(800), entered.clone());
        let server = RequestServer::bind("127.0.0.1:0".parse().unwrap(), router).await.unwrap();
        let addr = server.local_addr();
        let running = server.start();

        let mut client = send_slow_request(addr).await;
        tokio::time::timeout(Duration::from_secs(2), entered.notified()).await.unwrap();

        assert_eq!(running.stop(Duration::from_millis(200)).await, DrainOutcome::ForceClosed);

        // Connection is gone: EOF or reset, never the late response
        let mut reply = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut reply))
            .await
            .unwrap();
        assert!(read.is_err() || reply.is_empty(), "got {:?}", String::from_utf8_lossy(&reply));
    }
}
