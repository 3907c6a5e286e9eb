//! Application state
//!
//! Shared state across all handlers: settings behind a snapshot lock,
//! the orchestrator, admission control and readiness tracking.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Semaphore, SemaphorePermit};

use ragline_config::Settings;
use ragline_core::Error;
use ragline_pipeline::Orchestrator;
use ragline_retrieval::CorpusStatsHandle;

/// Admission control: `max_concurrent` requests run, up to `queue_limit`
/// more wait for a slot, and everything beyond that is rejected.
pub struct Admission {
    semaphore: Semaphore,
    queue_limit: usize,
    queued: AtomicUsize,
}

impl Admission {
    pub fn new(max_concurrent: usize, queue_limit: usize) -> Self {
        Self {
            semaphore: Semaphore::new(max_concurrent.max(1)),
            queue_limit,
            queued: AtomicUsize::new(0),
        }
    }

    /// Acquire a processing slot or fail with `Overloaded`.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, Error> {
        if let Ok(permit) = self.semaphore.try_acquire() {
            return Ok(permit);
        }
        if self.queued.fetch_add(1, Ordering::SeqCst) >= self.queue_limit {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Overloaded);
        }
        let permit = self.semaphore.acquire().await;
        self.queued.fetch_sub(1, Ordering::SeqCst);
        permit.map_err(|_| Error::Overloaded)
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

/// Last observed health of the engine's dependencies.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeStatus {
    pub store: bool,
    pub embedding: bool,
    pub llm: bool,
}

impl ProbeStatus {
    pub fn all_up(&self) -> bool {
        self.store && self.embedding && self.llm
    }
}

/// Readiness: corpus statistics loaded plus a recent successful probe of
/// every dependency.
pub struct Readiness {
    stats: CorpusStatsHandle,
    status: RwLock<ProbeStatus>,
}

impl Readiness {
    pub fn new(stats: CorpusStatsHandle) -> Self {
        Self {
            stats,
            status: RwLock::new(ProbeStatus::default()),
        }
    }

    pub fn update(&self, status: ProbeStatus) {
        *self.status.write() = status;
    }

    pub fn status(&self) -> ProbeStatus {
        *self.status.read()
    }

    pub fn ready(&self) -> bool {
        self.stats.is_loaded() && self.status().all_up()
    }
}

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Configuration behind a lock for hot reload.
    pub settings: Arc<RwLock<Settings>>,
    pub orchestrator: Arc<Orchestrator>,
    /// Admission control; a rejected acquire is a 429.
    pub admission: Arc<Admission>,
    pub readiness: Arc<Readiness>,
    pub stats: CorpusStatsHandle,
    /// Rendered by the `/metrics` endpoint.
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}

impl AppState {
    pub fn new(
        settings: Settings,
        orchestrator: Arc<Orchestrator>,
        readiness: Arc<Readiness>,
        stats: CorpusStatsHandle,
        metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
    ) -> Self {
        let admission = Admission::new(
            settings.server.max_concurrent_requests,
            settings.server.admission_queue_limit,
        );
        Self {
            settings: Arc::new(RwLock::new(settings)),
            orchestrator,
            admission: Arc::new(admission),
            readiness,
            stats,
            metrics_handle,
        }
    }
}
