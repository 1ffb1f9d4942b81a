//! API layer for the orchestrator.
//!
//! This module contains the HTTP handlers, request/response models and the
//! router assembly.

pub mod handlers;
pub mod models;

// Re-export commonly used types
pub use handlers::{build_router, AppState, NO_SERVICE_MESSAGE};
pub use models::{
    ActiveToggle, ConversationResponse, HealthResponse, QueryResponse, ServiceCreate,
    ServiceResponse,
};
