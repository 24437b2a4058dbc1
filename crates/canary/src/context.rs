//! Explicit dependency bundle passed into every task, replacing the ambient
//! globals (termination flag, shared HTTP pool, rendition-name registry) the
//! original source relied on (§9 redesign).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::fetcher::Fetcher;
use crate::metrics::MetricsSink;
use crate::model::StreamType;
use crate::sinks::BlobSink;

/// Append-only per-type registry of rendition names a supervisor has ever
/// discovered. Guarded by a single mutex; §5 names this the only shared
/// mutable state besides the per-endpoint `CorrelationBucket`.
#[derive(Debug, Default)]
pub struct RenditionRegistry {
    names: Mutex<HashMap<StreamType, HashSet<String>>>,
}

impl RenditionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `name` as known for `stream_type`. Returns `true` if this was
    /// the first time it was seen.
    pub fn record(&self, stream_type: StreamType, name: impl Into<String>) -> bool {
        let mut guard = self.names.lock();
        guard.entry(stream_type).or_default().insert(name.into())
    }

    pub fn known_for(&self, stream_type: StreamType) -> HashSet<String> {
        self.names.lock().get(&stream_type).cloned().unwrap_or_default()
    }
}

/// Bundle of everything a Supervisor, Monitor, or Correlator task needs,
/// passed explicitly instead of reached for through globals.
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub fetcher: Arc<Fetcher>,
    pub metrics_sink: Arc<dyn MetricsSink>,
    pub blob_sink: Arc<dyn BlobSink>,
    pub rendition_registry: Arc<RenditionRegistry>,
    /// Root cancellation token. Each endpoint derives a child token from this
    /// so a single endpoint can be torn down without affecting its siblings.
    pub cancellation: CancellationToken,
}

impl AppContext {
    pub fn new(
        config: Arc<AppConfig>,
        fetcher: Arc<Fetcher>,
        metrics_sink: Arc<dyn MetricsSink>,
        blob_sink: Arc<dyn BlobSink>,
    ) -> Self {
        Self {
            config,
            fetcher,
            metrics_sink,
            blob_sink,
            rendition_registry: Arc::new(RenditionRegistry::new()),
            cancellation: CancellationToken::new(),
        }
    }

    /// Derives a child token for one endpoint's premonitor, cancelled either
    /// by the root token or independently by the supervisor.
    pub fn child_token(&self) -> CancellationToken {
        self.cancellation.child_token()
    }
}
