//! HTTP request handlers for the orchestrator API.
//!
//! This module contains the service management, query and conversation
//! endpoints, plus health and metrics, and assembles them into the router.

use crate::api::models::*;
use crate::core::config::AppConfig;
use crate::core::logging::get_request_id;
use crate::core::middleware::{rate_limit_middleware, request_id_middleware, MetricsMiddleware};
use crate::core::rate_limiter::RateLimiter;
use crate::core::{AppError, Result};
use crate::services::authorization::ModelAuthorizationGuard;
use crate::services::backend::create_backend;
use crate::services::conversation::{ConversationStore, MessageRole};
use crate::services::processor::{QueryOutcome, QueryProcessor, QueryRequest};
use crate::services::registry::{NewService, ServiceRegistry, ServiceUpdate};
use crate::services::store::ExpiringStore;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Message returned when no active service can take a query.
pub const NO_SERVICE_MESSAGE: &str = "No suitable service found for query";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<ServiceRegistry>,
    pub processor: Arc<QueryProcessor>,
    pub conversations: ConversationStore,
    pub rate_limiter: Arc<RateLimiter>,
    pub http_client: reqwest::Client,
}

impl AppState {
    /// Wire up registry, processor, conversation store and rate limiter.
    pub fn new(
        config: AppConfig,
        conversation_backend: Arc<dyn ExpiringStore>,
        http_client: reqwest::Client,
    ) -> Self {
        let registry = Arc::new(ServiceRegistry::new());
        let processor = Arc::new(QueryProcessor::new(
            registry.clone(),
            ModelAuthorizationGuard::from_config(&config),
            config.dispatch_timeout(),
        ));
        let conversations = ConversationStore::new(
            conversation_backend,
            config.max_conversation_history,
            config.conversation_timeout(),
        );
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute));

        Self {
            config,
            registry,
            processor,
            conversations,
            rate_limiter,
            http_client,
        }
    }

    /// Build a backend for `service` and add it to the registry.
    ///
    /// When no capabilities are given the backend's own are used.
    pub fn register_service(&self, mut service: NewService) -> Result<String> {
        let backend = create_backend(&service.name, &service.endpoint, &self.http_client)?;
        if service.capabilities.is_empty() {
            service.capabilities = backend.capabilities();
        }
        self.registry.register(service, backend)
    }

    /// Apply a partial update, rebuilding the backend when the endpoint moves.
    pub fn update_service(&self, name: &str, update: ServiceUpdate) -> Result<ServiceResponse> {
        let backend = match update.endpoint.as_deref() {
            Some(endpoint) => Some(create_backend(name, endpoint, &self.http_client)?),
            None => None,
        };
        self.registry.update(name, update, backend)?;
        self.service_response(name)
    }

    fn service_response(&self, name: &str) -> Result<ServiceResponse> {
        let handle = self
            .registry
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("Service {} not found", name)))?;
        let metrics = self.processor.get_service_metrics(name)?;
        Ok(ServiceResponse::new(handle.descriptor(), metrics))
    }
}

/// Build the HTTP router with all endpoints and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let query_routes = Router::new()
        .route("/api/v1/services/query", post(process_query))
        .route_layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ));

    let api_routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/v1/services", post(register_service).get(list_services))
        .route(
            "/api/v1/services/:name",
            patch(update_service).delete(deregister_service),
        )
        .route("/api/v1/services/:name/metrics", get(service_metrics))
        .route("/api/v1/services/:name/active", put(set_service_active))
        .route("/api/v1/conversations", get(list_conversations))
        .route(
            "/api/v1/conversations/:id",
            get(get_conversation).delete(delete_conversation),
        )
        .merge(query_routes)
        .layer(middleware::from_fn(MetricsMiddleware::track_metrics))
        .with_state(state);

    Router::new()
        .merge(api_routes)
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Bot orchestrator is running",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Basic health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        services: state.registry.len(),
        active_services: state.registry.list_active().len(),
    })
}

/// Register a new bot service.
#[tracing::instrument(skip(state, body), fields(service = %body.name, endpoint = %body.endpoint))]
pub async fn register_service(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ServiceCreate>,
) -> Result<Json<ServiceResponse>> {
    let name = body.name.trim().to_string();
    state.register_service(body.into())?;
    Ok(Json(state.service_response(&name)?))
}

/// List active services with their load statistics.
pub async fn list_services(State(state): State<Arc<AppState>>) -> Json<Vec<ServiceResponse>> {
    let services = state
        .registry
        .list_active()
        .into_iter()
        .filter_map(|descriptor| {
            // skip services deregistered since the listing was taken
            let metrics = state.processor.get_service_metrics(&descriptor.name).ok()?;
            Some(ServiceResponse::new(descriptor, metrics))
        })
        .collect();
    Json(services)
}

/// Update endpoint, capabilities, description, active flag or limits.
#[tracing::instrument(skip(state, body))]
pub async fn update_service(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<ServiceUpdate>,
) -> Result<Json<ServiceResponse>> {
    Ok(Json(state.update_service(&name, body)?))
}

#[tracing::instrument(skip(state))]
pub async fn deregister_service(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>> {
    state.registry.deregister(&name)?;
    Ok(Json(MessageResponse::new(format!(
        "Service {} successfully deregistered",
        name
    ))))
}

pub async fn service_metrics(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ServiceResponse>> {
    Ok(Json(state.service_response(&name)?))
}

#[tracing::instrument(skip(state, body), fields(is_active = body.is_active))]
pub async fn set_service_active(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<ActiveToggle>,
) -> Result<Json<ServiceResponse>> {
    state.registry.set_active(&name, body.is_active)?;
    Ok(Json(state.service_response(&name)?))
}

/// Route a query to the least-loaded active service.
///
/// With a `conversation_id`, earlier turns are passed to the backend and,
/// once the backend has answered, the query and the answer are appended to
/// the conversation. Rejected, unroutable and failed queries leave the
/// conversation untouched. Conversation store failures are logged and
/// otherwise ignored so they never fail the query.
#[tracing::instrument(
    skip(state, body),
    fields(
        model = ?body.model,
        capability = ?body.capability,
        conversation_id = ?body.conversation_id,
    )
)]
pub async fn process_query(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    if body.query.trim().is_empty() {
        return Err(AppError::BadRequest("Query must not be empty".to_string()));
    }

    let history = match body.conversation_id.as_deref() {
        Some(conversation_id) => state.conversations.get_conversation(conversation_id).await,
        None => Vec::new(),
    };

    match state.processor.process_with_history(&body, &history).await? {
        QueryOutcome::Completed {
            service,
            response,
            elapsed_seconds,
        } => {
            if let Some(conversation_id) = body.conversation_id.as_deref() {
                let _ = state
                    .conversations
                    .add_message(conversation_id, MessageRole::User, body.query.as_str(), None)
                    .await;

                let content = response
                    .get("response")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .unwrap_or_else(|| response.to_string());
                let mut metadata = serde_json::Map::new();
                metadata.insert("service".to_string(), json!(service));
                let _ = state
                    .conversations
                    .add_message(conversation_id, MessageRole::Assistant, content, Some(metadata))
                    .await;
            }

            tracing::debug!(
                request_id = %get_request_id(),
                service = %service,
                elapsed_seconds,
                "Query answered"
            );

            Ok(Json(QueryResponse {
                service,
                response,
                elapsed_seconds,
                conversation_id: body.conversation_id,
            }))
        }
        QueryOutcome::NoService => Err(AppError::NotFound(NO_SERVICE_MESSAGE.to_string())),
        QueryOutcome::Failed { error, .. } => Err(error),
    }
}

pub async fn list_conversations(State(state): State<Arc<AppState>>) -> Json<ConversationList> {
    Json(ConversationList {
        conversations: state.conversations.active_conversations().await,
    })
}

pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>> {
    let not_found = || AppError::NotFound(format!("Conversation {} not found", id));

    let metadata = state
        .conversations
        .load_metadata(&id)
        .await?
        .filter(|m| !m.is_expired);
    let Some(metadata) = metadata else {
        // drops an expired record if there was one
        state.conversations.get_conversation(&id).await;
        return Err(not_found());
    };

    let messages = state.conversations.get_conversation(&id).await;
    Ok(Json(ConversationResponse::new(id.clone(), metadata, messages)))
}

#[tracing::instrument(skip(state))]
pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    if state.conversations.load_metadata(&id).await?.is_none() {
        return Err(AppError::NotFound(format!("Conversation {} not found", id)));
    }
    state.conversations.delete_conversation(&id).await?;
    Ok(Json(MessageResponse::new(format!("Conversation {} deleted", id))))
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler() -> Result<Response> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response())
}
