//! Periodic backend health checks.
//!
//! A failing backend is taken out of rotation by clearing its active flag and
//! put back once it passes again. Services deactivated through the API are
//! left alone: the monitor only reactivates services it deactivated itself.
//! Services are tracked by registration id, so a name that is deregistered and
//! registered again starts with a clean slate.

use dashmap::DashSet;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::core::metrics::get_metrics;
use crate::services::registry::{ServiceHandle, ServiceRegistry};

/// Upper bound on one backend's health check.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of checking one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub service: String,
    pub healthy: bool,
    pub is_active: bool,
}

pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    check_timeout: Duration,
    /// Registration ids of services this monitor took out of rotation
    deactivated: DashSet<String>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self::with_timeout(registry, DEFAULT_CHECK_TIMEOUT)
    }

    pub fn with_timeout(registry: Arc<ServiceRegistry>, check_timeout: Duration) -> Self {
        Self {
            registry,
            check_timeout,
            deactivated: DashSet::new(),
        }
    }

    /// Check every registered service concurrently and update active flags.
    pub async fn check_all(&self) -> Vec<HealthReport> {
        let handles = self.registry.handles();
        let checks = handles.iter().map(|handle| self.check_one(handle));
        let reports = join_all(checks).await;

        let live: HashSet<&str> = handles.iter().map(|h| h.id()).collect();
        self.deactivated.retain(|id| live.contains(id.as_str()));
        reports
    }

    async fn check_one(&self, handle: &Arc<ServiceHandle>) -> HealthReport {
        let name = handle.name().to_string();
        let healthy = timeout(self.check_timeout, handle.backend().health_check())
            .await
            .unwrap_or(false);

        get_metrics()
            .service_health
            .with_label_values(&[&name])
            .set(if healthy { 1.0 } else { 0.0 });

        if healthy {
            if self.deactivated.remove(handle.id()).is_some() {
                handle.set_active(true);
                tracing::info!(service = %name, "Service recovered, back in rotation");
            }
        } else if handle.is_active() {
            handle.set_active(false);
            self.deactivated.insert(handle.id().to_string());
            tracing::warn!(service = %name, "Service failed health check, taken out of rotation");
        } else {
            tracing::debug!(service = %name, "Service still unhealthy");
        }

        HealthReport {
            service: name,
            healthy,
            is_active: handle.is_active(),
        }
    }

    /// Run [`check_all`](Self::check_all) every `interval` until aborted.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reports = self.check_all().await;
                let unhealthy = reports.iter().filter(|r| !r.healthy).count();
                tracing::debug!(
                    checked = reports.len(),
                    unhealthy,
                    "Health check round finished"
                );
            }
        })
    }
}
