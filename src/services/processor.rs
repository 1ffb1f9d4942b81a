//! Query processing: authorize, route, dispatch, account.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::error::{AppError, Result};
use crate::core::error_types::DispatchOutcome;
use crate::core::metrics::get_metrics;
use crate::services::authorization::ModelAuthorizationGuard;
use crate::services::conversation::Message;
use crate::services::registry::{InFlightGuard, ServiceRegistry, ServiceSnapshot};
use crate::services::router::LeastLoadRouter;

/// Default upper bound on a single backend dispatch.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A query to route to one backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Restrict routing to services advertising this capability tag
    #[serde(default)]
    pub capability: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    #[must_use]
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

/// Result of processing a query that passed authorization.
#[derive(Debug)]
pub enum QueryOutcome {
    Completed {
        service: String,
        response: Value,
        elapsed_seconds: f64,
    },
    /// No active service qualified for the query
    NoService,
    Failed {
        service: String,
        error: AppError,
    },
}

impl QueryOutcome {
    pub fn service(&self) -> Option<&str> {
        match self {
            QueryOutcome::Completed { service, .. } | QueryOutcome::Failed { service, .. } => {
                Some(service)
            }
            QueryOutcome::NoService => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, QueryOutcome::Completed { .. })
    }
}

/// Derived per-service statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub current_load: u64,
    pub total_requests: u64,
    pub success_rate: f64,
    pub average_response_time_seconds: f64,
}

/// Routes queries to the least-loaded active service and records the result.
pub struct QueryProcessor {
    registry: Arc<ServiceRegistry>,
    router: LeastLoadRouter,
    guard: ModelAuthorizationGuard,
    dispatch_timeout: Duration,
}

impl QueryProcessor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        guard: ModelAuthorizationGuard,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            router: LeastLoadRouter::new(),
            guard,
            dispatch_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn dispatch_timeout(&self) -> Duration {
        self.dispatch_timeout
    }

    /// Process one query.
    ///
    /// # Errors
    ///
    /// Only [`AppError::ModelNotAuthorized`] is returned as an error. Backend
    /// failures and timeouts are reported as [`QueryOutcome::Failed`].
    pub async fn process(&self, request: &QueryRequest) -> Result<QueryOutcome> {
        self.process_with_history(request, &[]).await
    }

    /// Process one query, passing earlier conversation turns to the backend.
    pub async fn process_with_history(
        &self,
        request: &QueryRequest,
        history: &[Message],
    ) -> Result<QueryOutcome> {
        if let Some(model) = request.model.as_deref() {
            if let Err(e) = self.guard.check_authorized(model) {
                tracing::warn!(model = %model, "Rejected query for unauthorized model");
                return Err(e);
            }
        }

        let candidates = self.registry.snapshot_active();
        let candidate_count = candidates.len();
        let Some(in_flight) = self.claim(candidates, request.capability.as_deref()) else {
            tracing::info!(
                candidates = candidate_count,
                capability = ?request.capability,
                "No suitable service found for query"
            );
            get_metrics()
                .dispatch_count
                .with_label_values(&["none", DispatchOutcome::NoService.as_str()])
                .inc();
            return Ok(QueryOutcome::NoService);
        };

        let handle = Arc::clone(in_flight.handle());
        let service = handle.name().to_string();
        let backend = handle.backend();
        let timeout = handle.timeout().unwrap_or(self.dispatch_timeout);

        tracing::debug!(
            service = %service,
            in_flight = handle.metrics().in_flight_requests,
            history = history.len(),
            "Dispatching query"
        );

        let start = Instant::now();
        let result =
            tokio::time::timeout(timeout, backend.process_query(&request.query, history)).await;
        let elapsed = start.elapsed();

        let metrics = get_metrics();
        metrics
            .dispatch_duration
            .with_label_values(&[&service])
            .observe(elapsed.as_secs_f64());

        let (outcome, label) = match result {
            Ok(Ok(response)) => {
                handle.record_success(elapsed);
                tracing::info!(
                    service = %service,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Query completed"
                );
                (
                    QueryOutcome::Completed {
                        service,
                        response,
                        elapsed_seconds: elapsed.as_secs_f64(),
                    },
                    DispatchOutcome::Success,
                )
            }
            Ok(Err(error)) => {
                handle.record_failure();
                tracing::warn!(service = %service, error = %error, "Backend dispatch failed");
                (QueryOutcome::Failed { service, error }, DispatchOutcome::Error)
            }
            Err(_) => {
                handle.record_failure();
                tracing::warn!(
                    service = %service,
                    timeout_secs = timeout.as_secs_f64(),
                    "Backend dispatch timed out"
                );
                let error = AppError::Timeout {
                    service: service.clone(),
                    timeout_secs: timeout.as_secs_f64(),
                };
                (QueryOutcome::Failed { service, error }, DispatchOutcome::Timeout)
            }
        };

        if let Some(name) = outcome.service() {
            metrics
                .dispatch_count
                .with_label_values(&[name, label.as_str()])
                .inc();
        }

        Ok(outcome)
    }

    /// Select a service and take one of its in-flight slots.
    ///
    /// The snapshot may be stale by the time a slot is taken: the chosen
    /// service can be deregistered, replaced by a new registration under the
    /// same name, or fill up to its concurrency cap. Such candidates are
    /// dropped and selection runs again over the rest.
    fn claim(
        &self,
        mut candidates: Vec<ServiceSnapshot>,
        capability: Option<&str>,
    ) -> Option<InFlightGuard> {
        loop {
            let choice = self.router.select(&candidates, capability)?;
            let sequence = choice.sequence;
            let guard = self
                .registry
                .get(&choice.descriptor.name)
                .filter(|h| h.id() == choice.descriptor.id && h.is_active())
                .and_then(|h| h.try_begin_request());
            match guard {
                Some(guard) => return Some(guard),
                None => {
                    tracing::debug!(
                        service = %choice.descriptor.name,
                        "Selected service no longer available, reselecting"
                    );
                    candidates.retain(|c| c.sequence != sequence);
                }
            }
        }
    }

    /// Derived statistics for one service.
    ///
    /// A service with no successful dispatches reports a 100% success rate and
    /// zero average response time.
    pub fn get_service_metrics(&self, name: &str) -> Result<ServiceMetrics> {
        let load = self.registry.get_metrics(name)?;
        let total_requests = load.total_successes + load.total_failures;

        let (success_rate, average_response_time_seconds) = if load.total_successes == 0 {
            (100.0, 0.0)
        } else {
            (
                load.total_successes as f64 / total_requests as f64 * 100.0,
                load.total_response_time_seconds / load.total_successes as f64,
            )
        };

        Ok(ServiceMetrics {
            current_load: load.in_flight_requests,
            total_requests,
            success_rate,
            average_response_time_seconds,
        })
    }
}
