//! API request and response models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::services::conversation::{ConversationMetadata, Message};
use crate::services::processor::ServiceMetrics;
use crate::services::registry::{NewService, ServiceDescriptor};

/// Body of `POST /api/v1/services`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCreate {
    pub name: String,
    pub endpoint: String,
    /// Left empty, the backend's own capabilities are used
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub max_concurrent_requests: Option<u64>,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
}

impl From<ServiceCreate> for NewService {
    fn from(body: ServiceCreate) -> Self {
        NewService {
            name: body.name,
            endpoint: body.endpoint,
            capabilities: body.capabilities,
            description: body.description,
            max_concurrent_requests: body.max_concurrent_requests,
            timeout_seconds: body.timeout_seconds,
        }
    }
}

/// A service together with its derived load statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub capabilities: Vec<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub max_concurrent_requests: Option<u64>,
    pub timeout_seconds: Option<f64>,
    pub current_load: u64,
    pub total_requests: u64,
    pub success_rate: f64,
    pub average_response_time: f64,
}

impl ServiceResponse {
    pub fn new(descriptor: ServiceDescriptor, metrics: ServiceMetrics) -> Self {
        Self {
            id: descriptor.id,
            name: descriptor.name,
            endpoint: descriptor.endpoint,
            capabilities: descriptor.capabilities,
            description: descriptor.description,
            is_active: descriptor.is_active,
            max_concurrent_requests: descriptor.max_concurrent_requests,
            timeout_seconds: descriptor.timeout_seconds,
            current_load: metrics.current_load,
            total_requests: metrics.total_requests,
            success_rate: metrics.success_rate,
            average_response_time: metrics.average_response_time_seconds,
        }
    }
}

/// Body of `PUT /api/v1/services/:name/active`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ActiveToggle {
    pub is_active: bool,
}

/// Successful answer from `POST /api/v1/services/query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub service: String,
    pub response: Value,
    pub elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// A stored conversation with its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub messages: Vec<Message>,
}

impl ConversationResponse {
    pub fn new(conversation_id: String, metadata: ConversationMetadata, messages: Vec<Message>) -> Self {
        Self {
            conversation_id,
            created_at: metadata.created_at,
            updated_at: metadata.updated_at,
            message_count: messages.len(),
            messages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationList {
    pub conversations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub services: usize,
    pub active_services: usize,
}
