//! Bot Orchestrator - routes user queries across a pool of bot services
//!
//! This library provides an HTTP orchestrator that keeps a registry of
//! downstream bot services and dispatches each query to one of them, with
//! features including:
//!
//! - **Least-Load Routing**: Each query goes to the active service with the
//!   fewest in-flight requests, ties broken by registration order
//! - **Per-Service Metrics**: Load, success rate and average response time
//! - **Conversation History**: Bounded, expiring per-conversation message logs
//! - **Model Authorization**: Optional allow-list for requested models
//! - **Health Monitoring**: Failing backends are taken out of rotation
//! - **Metrics & Monitoring**: Prometheus metrics for observability
//!
//! # Architecture
//!
//! The codebase is organized into three main layers:
//!
//! - [`core`]: Core functionality (config, errors, logging, metrics, middleware)
//! - [`api`]: HTTP handlers and request/response models
//! - [`services`]: Business logic (registry, routing, dispatch, conversations)
//!
//! # Configuration
//!
//! All settings have defaults. Optional environment variables:
//! - `CONFIG_FILE`: TOML/YAML/JSON file, may also list services to register
//! - `HOST`: Server bind address (default: 0.0.0.0)
//! - `PORT`: Server port (default: 8000)
//! - `MODEL_AUTHORIZATION_ENABLED` / `AUTHORIZED_MODELS`: model allow-list
//! - `RATE_LIMIT_PER_MINUTE`: per-client query limit (default: 60)

pub mod api;
pub mod core;
pub mod services;

// Re-export commonly used types for convenience
pub use api::{build_router, AppState};
pub use crate::core::{AppConfig, AppError, Result};
pub use services::{
    ConversationStore, ModelAuthorizationGuard, QueryOutcome, QueryProcessor, QueryRequest,
    ServiceRegistry,
};
