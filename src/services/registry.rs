//! Service registry with per-service load metrics.
//!
//! Each registered service lives in a single [`ServiceHandle`] holding its
//! descriptor, load counters and backend. Handles are inserted into and
//! removed from a `DashMap` as one unit, so no reader ever observes a service
//! without its metrics. Load counters are atomics owned by the handle, so
//! dispatches to different services never share a lock.
//!
//! Updating a service swaps in a new handle with the same id and registration
//! order. The active flag and load counters are shared between the old and the
//! new handle, so requests still running against the old one are accounted
//! correctly.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::error::{AppError, Result};
use crate::core::metrics::get_metrics;
use crate::services::backend::BotBackend;

/// Registration request for a new service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewService {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Routing skips the service while this many dispatches are in flight
    #[serde(default)]
    pub max_concurrent_requests: Option<u64>,
    /// Overrides the processor's dispatch timeout for this service
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
}

impl NewService {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            capabilities: Vec::new(),
            description: None,
            max_concurrent_requests: None,
            timeout_seconds: None,
        }
    }

    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_max_concurrent_requests(mut self, limit: u64) -> Self {
        self.max_concurrent_requests = Some(limit);
        self
    }

    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

/// Partial update of a registered service. Absent fields are left unchanged.
///
/// The name is the registry key and cannot be changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceUpdate {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub max_concurrent_requests: Option<u64>,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
}

/// Point-in-time view of a registered service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub capabilities: Vec<String>,
    pub is_active: bool,
    pub description: Option<String>,
    pub max_concurrent_requests: Option<u64>,
    pub timeout_seconds: Option<f64>,
}

impl ServiceDescriptor {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Point-in-time view of a service's load counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadMetrics {
    pub in_flight_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_response_time_seconds: f64,
}

/// Descriptor, load and registration order captured together for routing.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSnapshot {
    pub descriptor: ServiceDescriptor,
    pub metrics: LoadMetrics,
    /// Monotonic registration order, lower registered earlier
    pub sequence: u64,
}

impl ServiceSnapshot {
    /// Whether the service can take another dispatch under its concurrency cap.
    pub fn has_capacity(&self) -> bool {
        self.descriptor
            .max_concurrent_requests
            .map_or(true, |limit| self.metrics.in_flight_requests < limit)
    }
}

#[derive(Debug, Default)]
struct LoadCounters {
    in_flight: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    response_time_micros: AtomicU64,
}

impl LoadCounters {
    fn snapshot(&self) -> LoadMetrics {
        LoadMetrics {
            in_flight_requests: self.in_flight.load(Ordering::Acquire),
            total_successes: self.successes.load(Ordering::Acquire),
            total_failures: self.failures.load(Ordering::Acquire),
            total_response_time_seconds: self.response_time_micros.load(Ordering::Acquire) as f64
                / 1_000_000.0,
        }
    }
}

/// Mutable state that survives updates of a service.
#[derive(Debug)]
struct SharedState {
    active: AtomicBool,
    load: LoadCounters,
}

/// A registered service: descriptor, load counters and backend.
pub struct ServiceHandle {
    id: String,
    name: String,
    endpoint: String,
    capabilities: Vec<String>,
    description: Option<String>,
    max_concurrent_requests: Option<u64>,
    timeout: Option<Duration>,
    sequence: u64,
    state: Arc<SharedState>,
    backend: Arc<dyn BotBackend>,
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("active", &self.is_active())
            .field("sequence", &self.sequence)
            .field("load", &self.state.load.snapshot())
            .finish()
    }
}

impl ServiceHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn backend(&self) -> Arc<dyn BotBackend> {
        self.backend.clone()
    }

    /// Per-service dispatch timeout, if one was configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Acquire)
    }

    /// Toggle the active flag, returning the previous value.
    pub fn set_active(&self, active: bool) -> bool {
        self.state.active.swap(active, Ordering::AcqRel)
    }

    pub fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor {
            id: self.id.clone(),
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            capabilities: self.capabilities.clone(),
            is_active: self.is_active(),
            description: self.description.clone(),
            max_concurrent_requests: self.max_concurrent_requests,
            timeout_seconds: self.timeout.map(|t| t.as_secs_f64()),
        }
    }

    pub fn metrics(&self) -> LoadMetrics {
        self.state.load.snapshot()
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            descriptor: self.descriptor(),
            metrics: self.metrics(),
            sequence: self.sequence,
        }
    }

    /// Count a dispatch as in flight until the returned guard is dropped.
    ///
    /// The guard decrements on every exit path, including early returns,
    /// panics and cancellation of the owning future.
    pub fn begin_request(self: &Arc<Self>) -> InFlightGuard {
        self.state.load.in_flight.fetch_add(1, Ordering::AcqRel);
        self.guard()
    }

    /// Like [`begin_request`](Self::begin_request), but returns `None` when
    /// the service is already at its concurrency cap.
    pub fn try_begin_request(self: &Arc<Self>) -> Option<InFlightGuard> {
        let in_flight = &self.state.load.in_flight;
        match self.max_concurrent_requests {
            None => {
                in_flight.fetch_add(1, Ordering::AcqRel);
            }
            Some(limit) => {
                in_flight
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < limit).then(|| n + 1)
                    })
                    .ok()?;
            }
        }
        Some(self.guard())
    }

    fn guard(self: &Arc<Self>) -> InFlightGuard {
        get_metrics()
            .in_flight_requests
            .with_label_values(&[&self.name])
            .inc();
        InFlightGuard {
            handle: Arc::clone(self),
        }
    }

    pub fn record_success(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.state
            .load
            .response_time_micros
            .fetch_add(micros, Ordering::AcqRel);
        self.state.load.successes.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_failure(&self) {
        self.state.load.failures.fetch_add(1, Ordering::AcqRel);
    }
}

/// Holds one unit of a service's in-flight load.
#[must_use = "dropping the guard immediately releases the in-flight slot"]
pub struct InFlightGuard {
    handle: Arc<ServiceHandle>,
}

impl InFlightGuard {
    pub fn handle(&self) -> &Arc<ServiceHandle> {
        &self.handle
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.handle
            .state
            .load
            .in_flight
            .fetch_sub(1, Ordering::AcqRel);
        get_metrics()
            .in_flight_requests
            .with_label_values(&[&self.handle.name])
            .dec();
    }
}

fn parse_timeout(seconds: Option<f64>) -> Result<Option<Duration>> {
    match seconds {
        None => Ok(None),
        Some(s) if s > 0.0 => Duration::try_from_secs_f64(s)
            .map(Some)
            .map_err(|e| AppError::BadRequest(format!("Invalid timeout_seconds {}: {}", s, e))),
        Some(s) => Err(AppError::BadRequest(format!(
            "timeout_seconds must be positive, got {}",
            s
        ))),
    }
}

fn check_max_concurrent(limit: Option<u64>) -> Result<()> {
    if limit == Some(0) {
        return Err(AppError::BadRequest(
            "max_concurrent_requests must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// In-memory registry of backend services.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: DashMap<String, Arc<ServiceHandle>>,
    next_sequence: AtomicU64,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service and return its generated id.
    ///
    /// # Errors
    ///
    /// * [`AppError::BadRequest`] if the name is blank or a limit is invalid
    /// * [`AppError::DuplicateService`] if the name is already registered
    pub fn register(&self, service: NewService, backend: Arc<dyn BotBackend>) -> Result<String> {
        let name = service.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::BadRequest("Service name must not be empty".to_string()));
        }
        let timeout = parse_timeout(service.timeout_seconds)?;
        check_max_concurrent(service.max_concurrent_requests)?;

        match self.services.entry(name.clone()) {
            Entry::Occupied(_) => Err(AppError::DuplicateService(name)),
            Entry::Vacant(slot) => {
                let id = uuid::Uuid::new_v4().to_string();
                let handle = ServiceHandle {
                    id: id.clone(),
                    name: name.clone(),
                    endpoint: service.endpoint,
                    capabilities: service.capabilities,
                    description: service.description,
                    max_concurrent_requests: service.max_concurrent_requests,
                    timeout,
                    sequence: self.next_sequence.fetch_add(1, Ordering::AcqRel),
                    state: Arc::new(SharedState {
                        active: AtomicBool::new(true),
                        load: LoadCounters::default(),
                    }),
                    backend,
                };
                slot.insert(Arc::new(handle));
                tracing::info!(service = %name, id = %id, "Service registered");
                Ok(id)
            }
        }
    }

    /// Apply a partial update, keeping id, registration order and metrics.
    ///
    /// `backend` replaces the current backend when given; callers pass one
    /// whenever the endpoint changes.
    pub fn update(
        &self,
        name: &str,
        update: ServiceUpdate,
        backend: Option<Arc<dyn BotBackend>>,
    ) -> Result<ServiceDescriptor> {
        let timeout = parse_timeout(update.timeout_seconds)?;
        check_max_concurrent(update.max_concurrent_requests)?;

        let mut entry = self.services.get_mut(name).ok_or_else(|| not_found(name))?;
        let current = entry.value();
        let replacement = ServiceHandle {
            id: current.id.clone(),
            name: current.name.clone(),
            endpoint: update.endpoint.unwrap_or_else(|| current.endpoint.clone()),
            capabilities: update
                .capabilities
                .unwrap_or_else(|| current.capabilities.clone()),
            description: update.description.or_else(|| current.description.clone()),
            max_concurrent_requests: update
                .max_concurrent_requests
                .or(current.max_concurrent_requests),
            timeout: timeout.or(current.timeout),
            sequence: current.sequence,
            state: Arc::clone(&current.state),
            backend: backend.unwrap_or_else(|| current.backend.clone()),
        };
        if let Some(active) = update.is_active {
            replacement.set_active(active);
        }

        let descriptor = replacement.descriptor();
        *entry.value_mut() = Arc::new(replacement);
        tracing::info!(service = %name, endpoint = %descriptor.endpoint, "Service updated");
        Ok(descriptor)
    }

    /// Remove a service together with its metrics and backend.
    pub fn deregister(&self, name: &str) -> Result<()> {
        match self.services.remove(name) {
            Some(_) => {
                tracing::info!(service = %name, "Service deregistered");
                Ok(())
            }
            None => Err(not_found(name)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServiceHandle>> {
        self.services.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// All handles, in registration order.
    pub fn handles(&self) -> Vec<Arc<ServiceHandle>> {
        let mut handles: Vec<Arc<ServiceHandle>> = self
            .services
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        handles.sort_by_key(|h| h.sequence);
        handles
    }

    /// Active services, in registration order.
    pub fn list_active(&self) -> Vec<ServiceDescriptor> {
        self.handles()
            .into_iter()
            .filter(|h| h.is_active())
            .map(|h| h.descriptor())
            .collect()
    }

    /// Every service including inactive ones, in registration order.
    pub fn list_all(&self) -> Vec<ServiceDescriptor> {
        self.handles().into_iter().map(|h| h.descriptor()).collect()
    }

    /// Active services with their current load, in registration order.
    pub fn snapshot_active(&self) -> Vec<ServiceSnapshot> {
        self.handles()
            .into_iter()
            .filter(|h| h.is_active())
            .map(|h| h.snapshot())
            .collect()
    }

    pub fn get_metrics(&self, name: &str) -> Result<LoadMetrics> {
        self.get(name)
            .map(|h| h.metrics())
            .ok_or_else(|| not_found(name))
    }

    pub fn set_active(&self, name: &str, active: bool) -> Result<()> {
        let handle = self.get(name).ok_or_else(|| not_found(name))?;
        if handle.set_active(active) != active {
            tracing::info!(service = %name, active, "Service active flag changed");
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

fn not_found(name: &str) -> AppError {
    AppError::NotFound(format!("Service {} not found", name))
}
