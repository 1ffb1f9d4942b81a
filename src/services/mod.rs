//! Business logic services for the orchestrator.
//!
//! This module contains the service registry, least-load routing, query
//! processing, conversation state and the backends queries are sent to.

pub mod authorization;
pub mod backend;
pub mod conversation;
pub mod health;
pub mod processor;
pub mod registry;
pub mod router;
pub mod store;

// Re-export commonly used types
pub use authorization::ModelAuthorizationGuard;
pub use backend::{create_backend, BotBackend, EchoBackend, HttpBackend};
pub use conversation::{ConversationMetadata, ConversationStore, Message, MessageRole};
pub use health::HealthMonitor;
pub use processor::{QueryOutcome, QueryProcessor, QueryRequest, ServiceMetrics};
pub use registry::{
    InFlightGuard, LoadMetrics, NewService, ServiceDescriptor, ServiceHandle, ServiceRegistry,
    ServiceSnapshot, ServiceUpdate,
};
pub use router::LeastLoadRouter;
pub use store::{ExpiringStore, InMemoryStore};
