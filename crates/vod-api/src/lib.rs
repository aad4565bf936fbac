//! Axum HTTP API server.
//!
//! This crate provides:
//! - Upload registration with presigned PUT URLs
//! - Job submission and inspection
//! - Media status polling and WebSocket subscriptions
//! - Background reconciliation of queue and catalog
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::ReconciliationScanner;
pub use state::AppState;
