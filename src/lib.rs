//! Anomaly Inference Service
//!
//! Serves a pre-trained anomaly detector inside a Consul-discovered mesh.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  INFERENCE SERVICE                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │   Lifecycle Coordinator (control task, owns all transitions) │
//! │     │            │               │                │          │
//! │     ▼            ▼               ▼                ▼          │
//! │  Telemetry   Scoring Adapter   Request Server   Discovery    │
//! │  (OTLP)      (ONNX Runtime)    (Axum)           Client       │
//! │                    ▲             │   │          (Consul)     │
//! │                    └─────────────┘   ▼                       │
//! │                                 Health Registry              │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod constants;
pub mod discovery;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod model;
pub mod server;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, AppResult, DiscoveryError, ScoringError, ServiceError};
pub use lifecycle::{Coordinator, LifecycleState, ShutdownListener, ShutdownTrigger};
