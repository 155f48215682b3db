//! In-memory tracking of in-flight requests, for diagnostics and shutdown draining.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// How a tracked request finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Still in flight.
    InProgress,
    /// Completed with a successful status code.
    Success,
    /// Completed with a client error status code.
    ClientError,
    /// Completed with a server error status code, or the upstream call failed outright.
    ServerError,
}

/// A snapshot of one tracked request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Correlation id, shared with the `X-Request-Id` response header.
    pub request_id: String,
    /// Route path.
    pub path: String,
    /// Model requested, if applicable.
    pub model: Option<String>,
    /// When the request started.
    pub started_at: DateTime<Utc>,
    /// Current outcome.
    pub outcome: RequestOutcome,
}

/// Tracks in-flight and recently completed requests in memory.
///
/// Bounded by `capacity`: once the completed log exceeds it, the oldest entries are
/// dropped. Used by the readiness/debug endpoints to report what the gateway is doing
/// without querying the persistent store.
pub struct RequestTracker {
    capacity: usize,
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    in_flight: HashMap<Uuid, RequestInfo>,
    completed: Vec<RequestInfo>,
}

impl RequestTracker {
    /// Create a tracker that retains up to `capacity` completed requests.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Record that a request has started.
    pub async fn start(&self, request_id: Uuid, path: impl Into<String>, model: Option<String>) {
        let info = RequestInfo {
            request_id: request_id.to_string(),
            path: path.into(),
            model,
            started_at: Utc::now(),
            outcome: RequestOutcome::InProgress,
        };
        self.inner.write().await.in_flight.insert(request_id, info);
    }

    /// Record that a request has finished with the given outcome.
    pub async fn finish(&self, request_id: Uuid, outcome: RequestOutcome) {
        let mut inner = self.inner.write().await;
        if let Some(mut info) = inner.in_flight.remove(&request_id) {
            info.outcome = outcome;
            inner.completed.push(info);
            let overflow = inner.completed.len().saturating_sub(self.capacity);
            if overflow > 0 {
                inner.completed.drain(0..overflow);
            }
        }
    }

    /// Number of requests currently in flight.
    pub async fn in_flight_count(&self) -> usize {
        self.inner.read().await.in_flight.len()
    }

    /// Snapshot of completed requests, most recent last.
    pub async fn recent(&self) -> Vec<RequestInfo> {
        self.inner.read().await.completed.clone()
    }
}
