//! Least-load service selection.

use crate::services::registry::ServiceSnapshot;

/// Picks the active service with the fewest in-flight requests.
///
/// Services at their concurrency cap are skipped.
///
/// Ties are broken by registration order, earliest first, so repeated
/// selections over the same state are deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoadRouter;

impl LeastLoadRouter {
    pub fn new() -> Self {
        Self
    }

    /// Select from `candidates`, optionally restricted to services that
    /// advertise `capability`. Returns `None` when nothing qualifies.
    pub fn select<'a>(
        &self,
        candidates: &'a [ServiceSnapshot],
        capability: Option<&str>,
    ) -> Option<&'a ServiceSnapshot> {
        candidates
            .iter()
            .filter(|s| s.descriptor.is_active && s.has_capacity())
            .filter(|s| capability.map_or(true, |c| s.descriptor.has_capability(c)))
            .min_by_key(|s| (s.metrics.in_flight_requests, s.sequence))
    }
}
